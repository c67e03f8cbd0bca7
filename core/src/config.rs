//! Experiment configuration types
//!
//! The whole configuration surface is read once at process start and never
//! mutated afterwards. Validation is fail-fast: an invalid topology must
//! abort before any round runs.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::role::Role;

/// Emulated network parameters applied by the external shaping driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkParams {
    /// One-way latency in milliseconds
    pub latency_ms: u64,
    /// Bandwidth in megabytes per second
    pub bandwidth_mb: u64,
    /// Jitter as a percentage of latency
    #[serde(default)]
    pub jitter_pct: u64,
}

/// Payload to be generated and published by a holder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PayloadSpec {
    /// Deterministically generated random bytes
    Random {
        /// Payload size in bytes
        size: u64,
        /// Generation seed; repeated experiments reproduce identical content
        seed: u64,
    },
    /// Existing file or directory on disk
    Path {
        /// Filesystem path, resolved by the node-under-test
        path: String,
    },
}

impl PayloadSpec {
    /// Nominal size in bytes, used in metric scope paths. Path payloads
    /// report 0 since their size is only known to the node-under-test.
    pub fn nominal_size(&self) -> u64 {
        match self {
            PayloadSpec::Random { size, .. } => *size,
            PayloadSpec::Path { .. } => 0,
        }
    }

    /// The same payload with its generation seed offset, so each holder
    /// offers role-indexed content. Path payloads are returned unchanged.
    pub fn with_seed_offset(&self, offset: u64) -> PayloadSpec {
        match self {
            PayloadSpec::Random { size, seed } => PayloadSpec::Random {
                size: *size,
                seed: seed + offset,
            },
            PayloadSpec::Path { path } => PayloadSpec::Path { path: path.clone() },
        }
    }
}

/// One test configuration instance: payload plus network parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Permutation {
    /// Payload descriptor published by holders
    pub payload: PayloadSpec,
    /// Network emulation applied for this permutation
    pub network: NetworkParams,
}

/// One directed initial-debt entry seeded into the ledger matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebtEntry {
    /// Sender role
    pub from_role: Role,
    /// Sender role index
    pub from_index: usize,
    /// Receiver role
    pub to_role: Role,
    /// Receiver role index
    pub to_index: usize,
    /// Bytes the sender is considered to have already sent the receiver
    pub bytes: u64,
}

/// Per-group role count override.
///
/// When set, this process draws its sequence from the group-scoped topic and
/// the override counts replace the global ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupOverride {
    /// Group identifier; becomes part of the group topic name
    pub id: String,
    /// Requester count within the group (global count if absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requester_count: Option<usize>,
    /// Observer count within the group (global count if absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observer_count: Option<usize>,
}

fn default_run_count() -> usize {
    1
}

fn default_wave_count() -> usize {
    1
}

fn default_inter_wave_pause_ms() -> u64 {
    5_000
}

fn default_sample_interval_ms() -> u64 {
    1
}

fn default_seeder_rate() -> u32 {
    100
}

/// Full experiment configuration, read once at start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentConfig {
    /// Total number of processes in the experiment
    pub instance_count: usize,

    /// Number of Requester processes
    pub requester_count: usize,

    /// Number of Observer processes; remaining processes become Holders
    #[serde(default)]
    pub observer_count: usize,

    /// Rounds per permutation
    #[serde(default = "default_run_count")]
    pub run_count: usize,

    /// Overall experiment timeout in seconds, also the rendezvous timeout
    pub timeout_secs: u64,

    /// Per-round timeout in seconds; fetches get half of it
    pub run_timeout_secs: u64,

    /// Maximum connections dialed per second; 0 disables the limit
    #[serde(default)]
    pub max_connection_rate: u32,

    /// Number of requester waves per round
    #[serde(default = "default_wave_count")]
    pub wave_count: usize,

    /// Stagger between requester fetch starts, in milliseconds
    #[serde(default)]
    pub request_stagger_ms: u64,

    /// Pause between consecutive waves, in milliseconds
    #[serde(default = "default_inter_wave_pause_ms")]
    pub inter_wave_pause_ms: u64,

    /// Background ledger sampling interval, in milliseconds
    #[serde(default = "default_sample_interval_ms")]
    pub sample_interval_ms: u64,

    /// Percentage of holders that seed content for each permutation
    #[serde(default = "default_seeder_rate")]
    pub seeder_rate: u32,

    /// Run the out-of-band baseline transfer before the timed rounds
    #[serde(default)]
    pub baseline_transfer: bool,

    /// Test permutations; the run loop iterates this shared list
    pub permutations: Vec<Permutation>,

    /// Initial-debt topology seeded into the ledger matrix every round
    #[serde(default)]
    pub initial_debts: Vec<DebtEntry>,

    /// Per-requester-index debt ratios applied to the baseline at reset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debt_ratios: Option<Vec<f64>>,

    /// Group-scoped role count override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<GroupOverride>,
}

impl ExperimentConfig {
    /// Number of Holder processes implied by the counts.
    pub fn holder_count(&self) -> usize {
        self.instance_count
            .saturating_sub(self.requester_count + self.observer_count)
    }

    /// Number of holders that seed content, per the configured seeder rate.
    pub fn seeding_holder_count(&self) -> usize {
        let holders = self.holder_count() as f64;
        let rate = f64::from(self.seeder_rate.min(100)) / 100.0;
        (holders * rate).ceil() as usize
    }

    /// Effective role counts, honoring a group override when present.
    pub fn effective_counts(&self) -> (usize, usize) {
        match &self.group {
            Some(group) => (
                group.requester_count.unwrap_or(self.requester_count),
                group.observer_count.unwrap_or(self.observer_count),
            ),
            None => (self.requester_count, self.observer_count),
        }
    }

    /// Overall experiment timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Per-round timeout.
    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }

    /// Deadline for the fetch portion of a round.
    pub fn fetch_timeout(&self) -> Duration {
        self.run_timeout() / 2
    }

    /// Stagger between requester fetch starts.
    pub fn request_stagger(&self) -> Duration {
        Duration::from_millis(self.request_stagger_ms)
    }

    /// Validate the configuration; must pass before any round runs.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.instance_count == 0 {
            return Err(ConfigError::InvalidTopology(
                "instance_count must be at least 1".into(),
            ));
        }

        if self.requester_count + self.observer_count > self.instance_count {
            return Err(ConfigError::InvalidTopology(format!(
                "requester_count ({}) + observer_count ({}) exceeds instance_count ({})",
                self.requester_count, self.observer_count, self.instance_count
            )));
        }

        if self.permutations.is_empty() {
            return Err(ConfigError::InvalidPermutations(
                "at least one permutation is required".into(),
            ));
        }

        if self.requester_count > 0 && self.holder_count() == 0 {
            return Err(ConfigError::InvalidTopology(
                "requesters configured but no holder remains to serve them".into(),
            ));
        }

        if self.run_count == 0 {
            return Err(ConfigError::InvalidTiming(
                "run_count must be at least 1".into(),
            ));
        }

        if self.timeout_secs == 0 || self.run_timeout_secs == 0 {
            return Err(ConfigError::InvalidTiming(
                "timeout_secs and run_timeout_secs must be positive".into(),
            ));
        }

        if self.wave_count == 0 {
            return Err(ConfigError::InvalidWaves(
                "wave_count must be at least 1".into(),
            ));
        }

        if self.sample_interval_ms == 0 {
            return Err(ConfigError::InvalidTiming(
                "sample_interval_ms must be at least 1".into(),
            ));
        }

        if self.seeder_rate == 0 || self.seeder_rate > 100 {
            return Err(ConfigError::InvalidTopology(
                "seeder_rate must be within 1..=100".into(),
            ));
        }

        if let Some(ratios) = &self.debt_ratios {
            if ratios.len() != self.requester_count {
                return Err(ConfigError::InvalidDebtRatios(format!(
                    "debt_ratios has {} entries but requester_count is {}",
                    ratios.len(),
                    self.requester_count
                )));
            }
            if ratios.iter().any(|r| *r < 0.0 || !r.is_finite()) {
                return Err(ConfigError::InvalidDebtRatios(
                    "debt ratios must be finite and non-negative".into(),
                ));
            }
        }

        Ok(())
    }
}

/// Configuration validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Role counts or instance count do not form a valid topology
    #[error("invalid topology: {0}")]
    InvalidTopology(String),

    /// Permutation list is unusable
    #[error("invalid permutations: {0}")]
    InvalidPermutations(String),

    /// A timeout, round count, or sampling interval is out of range
    #[error("invalid timing: {0}")]
    InvalidTiming(String),

    /// Wave configuration is out of range
    #[error("invalid waves: {0}")]
    InvalidWaves(String),

    /// Debt-ratio table does not match the requester population
    #[error("invalid debt ratios: {0}")]
    InvalidDebtRatios(String),
}
