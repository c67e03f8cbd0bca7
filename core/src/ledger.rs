//! Sparse directional ledger matrix
//!
//! Tracks per-peer-pair byte accounting: entry `(A -> B)` is independent of
//! `(B -> A)`. The matrix is seeded from the configured initial-debt
//! topology at the start of every round and mutated during the round only by
//! the background sampler's monotonic merges, so a lagging sample can never
//! roll counts backward.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config::DebtEntry;
use crate::role::Role;

/// One endpoint of a directed ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerRef {
    /// Role of the peer
    pub role: Role,
    /// 0-based index within the role
    pub index: usize,
}

impl PeerRef {
    /// Build a reference from role and role index.
    pub fn new(role: Role, index: usize) -> Self {
        Self { role, index }
    }
}

/// Sparse `(sender, receiver) -> bytes` table with default-zero lookup.
///
/// Absence of a pair means "no prior relationship", which is distinct from
/// an explicit zero written by a reset: lookups never fail, merges only ever
/// increase values, and pairs may be initialized independently without
/// declaring the full cross product.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerMatrix {
    entries: HashMap<(PeerRef, PeerRef), u64>,
}

impl LedgerMatrix {
    /// Create an empty matrix.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a baseline matrix from configured initial-debt entries.
    pub fn from_entries(debts: &[DebtEntry]) -> Self {
        let mut matrix = Self::new();
        for debt in debts {
            matrix.set(
                PeerRef::new(debt.from_role, debt.from_index),
                PeerRef::new(debt.to_role, debt.to_index),
                debt.bytes,
            );
        }
        matrix
    }

    /// Bytes recorded for the directed pair, 0 when unset.
    pub fn get(&self, from: PeerRef, to: PeerRef) -> u64 {
        self.entries.get(&(from, to)).copied().unwrap_or(0)
    }

    /// Overwrite the value for a directed pair.
    pub fn set(&mut self, from: PeerRef, to: PeerRef, bytes: u64) {
        self.entries.insert((from, to), bytes);
    }

    /// Monotonic merge: update only if `bytes` exceeds the stored value.
    /// Returns whether the entry changed.
    pub fn set_if_greater(&mut self, from: PeerRef, to: PeerRef, bytes: u64) -> bool {
        let current = self.entries.entry((from, to)).or_insert(0);
        if bytes > *current {
            *current = bytes;
            true
        } else {
            false
        }
    }

    /// Replace all entries with the baseline. Called once per round before
    /// any exchange begins so rounds don't inherit state from prior rounds.
    pub fn reset_from_baseline(&mut self, baseline: &LedgerMatrix) {
        self.entries = baseline.entries.clone();
    }

    /// Replace all entries with the baseline, scaling every entry whose
    /// sender is a Requester by that requester's ratio. Ratios are indexed
    /// by requester role index; a missing index leaves the value unscaled.
    pub fn reset_scaled(&mut self, baseline: &LedgerMatrix, ratios: &[f64]) {
        self.entries.clear();
        for (&(from, to), &bytes) in &baseline.entries {
            let scaled = if from.role == Role::Requester {
                let ratio = ratios.get(from.index).copied().unwrap_or(1.0);
                (bytes as f64 * ratio).round() as u64
            } else {
                bytes
            };
            self.entries.insert((from, to), scaled);
        }
    }

    /// Number of explicitly stored pairs.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no pair has been stored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn holder(index: usize) -> PeerRef {
        PeerRef::new(Role::Holder, index)
    }

    fn requester(index: usize) -> PeerRef {
        PeerRef::new(Role::Requester, index)
    }

    #[test]
    fn test_missing_pairs_read_as_zero() {
        let matrix = LedgerMatrix::new();
        assert_eq!(matrix.get(holder(0), requester(5)), 0);
        assert!(matrix.is_empty());
    }

    #[test]
    fn test_directionality() {
        let mut matrix = LedgerMatrix::new();
        matrix.set(holder(0), requester(1), 1_000);
        assert_eq!(matrix.get(holder(0), requester(1)), 1_000);
        assert_eq!(matrix.get(requester(1), holder(0)), 0);
    }

    #[test]
    fn test_set_if_greater_is_monotonic_and_idempotent() {
        let mut matrix = LedgerMatrix::new();
        assert!(matrix.set_if_greater(holder(0), requester(0), 100));
        assert!(!matrix.set_if_greater(holder(0), requester(0), 100));
        assert!(!matrix.set_if_greater(holder(0), requester(0), 40));
        assert!(matrix.set_if_greater(holder(0), requester(0), 250));
        assert_eq!(matrix.get(holder(0), requester(0)), 250);
    }

    #[test]
    fn test_get_after_writes_equals_maximum_ever_written() {
        let mut matrix = LedgerMatrix::new();
        for value in [3u64, 9, 1, 7, 9, 2] {
            matrix.set_if_greater(requester(2), holder(0), value);
        }
        assert_eq!(matrix.get(requester(2), holder(0)), 9);
    }

    #[test]
    fn test_reset_restores_baseline_regardless_of_prior_maxima() {
        let baseline = LedgerMatrix::from_entries(&[DebtEntry {
            from_role: Role::Holder,
            from_index: 0,
            to_role: Role::Requester,
            to_index: 1,
            bytes: 25_000,
        }]);

        let mut live = LedgerMatrix::new();
        live.reset_from_baseline(&baseline);

        // Sampler observes live sent=30000 then a lagging 20000.
        live.set_if_greater(holder(0), requester(1), 30_000);
        live.set_if_greater(holder(0), requester(1), 20_000);
        assert_eq!(live.get(holder(0), requester(1)), 30_000);

        // The next round's reset drops back to the configured baseline.
        live.reset_from_baseline(&baseline);
        assert_eq!(live.get(holder(0), requester(1)), 25_000);
    }

    #[test]
    fn test_reset_clears_entries_absent_from_baseline() {
        let baseline = LedgerMatrix::new();
        let mut live = LedgerMatrix::new();
        live.set(holder(0), requester(0), 42);

        live.reset_from_baseline(&baseline);
        assert_eq!(live.get(holder(0), requester(0)), 0);
        assert!(live.is_empty());
    }

    #[test]
    fn test_reset_scaled_applies_per_requester_ratio() {
        let baseline = LedgerMatrix::from_entries(&[
            DebtEntry {
                from_role: Role::Requester,
                from_index: 0,
                to_role: Role::Holder,
                to_index: 0,
                bytes: 1_000,
            },
            DebtEntry {
                from_role: Role::Requester,
                from_index: 1,
                to_role: Role::Holder,
                to_index: 0,
                bytes: 1_000,
            },
            DebtEntry {
                from_role: Role::Holder,
                from_index: 0,
                to_role: Role::Requester,
                to_index: 0,
                bytes: 500,
            },
        ]);

        let mut live = LedgerMatrix::new();
        live.reset_scaled(&baseline, &[2.0, 0.5]);

        assert_eq!(live.get(requester(0), holder(0)), 2_000);
        assert_eq!(live.get(requester(1), holder(0)), 500);
        // Holder-sent entries are not scaled.
        assert_eq!(live.get(holder(0), requester(0)), 500);
    }
}
