//! Deterministic role assignment from the shared sequence counter
//!
//! Every process publishes its identity once and receives a 1-based global
//! sequence number from the rendezvous service. Because that sequence is
//! already totally ordered, roles can be assigned by a contiguous range
//! split with no further negotiation: Requesters occupy positions
//! `[1..=R]`, Observers `(R..=R+O]`, and Holders everything above.

use serde::{Deserialize, Serialize};

/// Role of a process within the experiment topology. Fixed for the process
/// lifetime; never reassigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Fetches content from Holders (the data sink under test)
    Requester,
    /// Serves content to Requesters (the data source)
    Holder,
    /// Present in the topology but not actively exchanging data
    Observer,
}

impl Role {
    /// Stable lowercase name, used in metric scope paths.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Requester => "requester",
            Role::Holder => "holder",
            Role::Observer => "observer",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of role assignment for one process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAssignment {
    /// Assigned role
    pub role: Role,
    /// 0-based position of this process within its role
    pub index: usize,
    /// 1-based sequence the assignment was derived from (group-scoped when
    /// a group override is in effect)
    pub seq: u64,
}

/// Classify a process from its 1-based sequence number and the configured
/// role counts. Processes beyond `requester_count + observer_count` become
/// Holders.
pub fn assign(seq: u64, requester_count: usize, observer_count: usize) -> RoleAssignment {
    let r = requester_count as u64;
    let o = observer_count as u64;

    let (role, index) = if seq <= r {
        (Role::Requester, seq - 1)
    } else if seq > r + o {
        (Role::Holder, seq - 1 - (r + o))
    } else {
        (Role::Observer, seq - 1 - r)
    };

    RoleAssignment {
        role,
        index: index as usize,
        seq,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_assignment_matches_range_split() {
        // 2 requesters, 1 observer, 5 processes total.
        assert_eq!(assign(1, 2, 1).role, Role::Requester);
        assert_eq!(assign(1, 2, 1).index, 0);
        assert_eq!(assign(2, 2, 1).role, Role::Requester);
        assert_eq!(assign(2, 2, 1).index, 1);
        assert_eq!(assign(3, 2, 1).role, Role::Observer);
        assert_eq!(assign(3, 2, 1).index, 0);
        assert_eq!(assign(4, 2, 1).role, Role::Holder);
        assert_eq!(assign(4, 2, 1).index, 0);
        assert_eq!(assign(5, 2, 1).role, Role::Holder);
        assert_eq!(assign(5, 2, 1).index, 1);
    }

    #[test]
    fn test_partition_counts_and_contiguous_indices() {
        // For all valid (R, O, N): exactly R requesters, O observers,
        // N-R-O holders, with unique contiguous indices starting at 0.
        for n in 1..=12usize {
            for r in 0..=n {
                for o in 0..=(n - r) {
                    let mut by_role: HashMap<Role, Vec<usize>> = HashMap::new();
                    for seq in 1..=n as u64 {
                        let a = assign(seq, r, o);
                        by_role.entry(a.role).or_default().push(a.index);
                    }

                    let count = |role| by_role.get(&role).map(Vec::len).unwrap_or(0);
                    assert_eq!(count(Role::Requester), r, "R={r} O={o} N={n}");
                    assert_eq!(count(Role::Observer), o, "R={r} O={o} N={n}");
                    assert_eq!(count(Role::Holder), n - r - o, "R={r} O={o} N={n}");

                    for (role, mut indices) in by_role {
                        indices.sort_unstable();
                        let expected: Vec<usize> = (0..indices.len()).collect();
                        assert_eq!(indices, expected, "{role} indices not contiguous");
                    }
                }
            }
        }
    }

    #[test]
    fn test_all_holders_when_counts_are_zero() {
        for seq in 1..=4 {
            let a = assign(seq, 0, 0);
            assert_eq!(a.role, Role::Holder);
            assert_eq!(a.index as u64, seq - 1);
        }
    }

    #[test]
    fn test_role_names_are_stable() {
        assert_eq!(Role::Requester.to_string(), "requester");
        assert_eq!(Role::Holder.to_string(), "holder");
        assert_eq!(Role::Observer.to_string(), "observer");
    }
}
