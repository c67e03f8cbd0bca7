//! Error taxonomy for the orchestration engine

use std::time::Duration;
use thiserror::Error;

use crate::config::ConfigError;
use crate::traits::NodeError;
use swapbench_sync::SyncError;

/// Engine error type
///
/// The variants mirror the failure policy: configuration problems abort
/// before any round runs, rendezvous timeouts and fetch failures abort the
/// experiment, and cleanup failures propagate rather than being swallowed,
/// since leftover state would corrupt subsequent rounds.
#[derive(Error, Debug)]
pub enum ExperimentError {
    /// Configuration rejected before any round ran
    #[error("configuration error: {0}")]
    Config(String),

    /// Structured configuration validation failure
    #[error(transparent)]
    InvalidConfig(#[from] ConfigError),

    /// Rendezvous failure (barrier or collect timeout, transport fault)
    #[error("rendezvous failed: {0}")]
    Sync(#[from] SyncError),

    /// Node-under-test failure outside the cleanup path
    #[error("node error: {0}")]
    Node(#[from] NodeError),

    /// One or more per-peer fetches failed; zero tolerance aborts the round
    #[error("{failures} fetch failure(s) in round {run_id}; aborting experiment")]
    FetchFailed {
        /// Round identifier (`<permutation>-<run>`)
        run_id: String,
        /// Number of content ids that could not be fetched
        failures: u64,
    },

    /// Cleanup step failed; subsequent rounds would inherit stale state
    #[error("cleanup failed: {0}")]
    Cleanup(#[source] NodeError),

    /// The overall experiment deadline elapsed
    #[error("experiment timed out after {0:?}")]
    Timeout(Duration),

    /// Invariant violation inside the engine itself
    #[error("internal error: {0}")]
    Internal(String),
}

impl ExperimentError {
    /// Build a configuration error from any displayable message
    pub fn config(msg: impl Into<String>) -> Self {
        ExperimentError::Config(msg.into())
    }

    /// Configuration error for a builder field that was never set
    pub fn missing(field: &str) -> Self {
        ExperimentError::Config(format!("missing required field: {field}"))
    }

    /// Wrap a node error that occurred during cleanup
    pub fn cleanup(err: NodeError) -> Self {
        ExperimentError::Cleanup(err)
    }

    /// Build an internal invariant-violation error
    pub fn internal(msg: impl Into<String>) -> Self {
        ExperimentError::Internal(msg.into())
    }
}

/// Result type alias for the orchestration engine
pub type ExperimentResult<T> = Result<T, ExperimentError>;
