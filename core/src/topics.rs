//! Topic names and barrier phase keys
//!
//! These strings are the wire contract with the rendezvous service; existing
//! experiment runners key on them. Keys carrying a permutation or round
//! identifier must stay unique per phase, because the barrier counters are
//! append-only: a reused key would satisfy later rounds instantly.

/// Identity topic; the publish position here is the global sequence number.
pub const PEERS: &str = "peers";

/// Descriptor topic collected by every process before any round.
pub const PEER_INFOS: &str = "peerInfos";

/// Group-scoped identity topic for per-group sequence numbers.
pub fn node_group(group_id: &str) -> String {
    format!("nodes{group_id}")
}

/// Discovery topic for content ids of permutation `p` (1-based).
pub fn root_cid(p: usize) -> String {
    format!("root-cid-{p}")
}

/// Discovery topic for baseline-transfer addresses of permutation `p`.
pub fn tcp_addr(p: usize) -> String {
    format!("tcp-addr-{p}")
}

/// Round identifier combining 1-based permutation and run numbers.
pub fn run_id(p: usize, run: usize) -> String {
    format!("{p}-{run}")
}

/// Barrier: network shaping applied for permutation `p`.
pub fn setup_network(p: usize) -> String {
    format!("setup-network-{p}")
}

/// Barrier: all processes ready to publish/collect content ids.
pub fn start_cid_publish(p: usize) -> String {
    format!("start-cid-publish-{p}")
}

/// Barrier: content ids published and collected for permutation `p`.
pub fn injest_complete(p: usize) -> String {
    format!("injest-complete-{p}")
}

/// Barrier: baseline transfer for permutation `p` finished.
pub fn tcp_fetch(p: usize) -> String {
    format!("tcp-fetch-{p}")
}

/// Barrier: all processes ready to start the round.
pub fn start_run(run_id: &str) -> String {
    format!("start-run-{run_id}")
}

/// Barrier: dialing finished for the round.
pub fn connect_complete(run_id: &str) -> String {
    format!("connect-complete-{run_id}")
}

/// Barrier: initial debts pushed into the node ledgers.
pub fn ledgers_initialized(run_id: &str) -> String {
    format!("ledgers-initialized-{run_id}")
}

/// Barrier: background samplers running on every process.
pub fn metric_gathering_started(run_id: &str) -> String {
    format!("background-metric-gathering-started-{run_id}")
}

/// Barrier: fetches completed (or cancelled) across the population.
pub fn transfer_complete(run_id: &str) -> String {
    format!("transfer-complete-{run_id}")
}

/// Barrier: cleanup finished, round fully drained.
pub fn run_complete(run_id: &str) -> String {
    format!("run-complete-{run_id}")
}

/// Requester-only barrier gating wave `w` of the round.
pub fn leech_wave(run_id: &str, wave: usize) -> String {
    format!("leech-wave-{run_id}-{wave}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_names_are_wire_stable() {
        assert_eq!(PEERS, "peers");
        assert_eq!(PEER_INFOS, "peerInfos");
        assert_eq!(node_group("edge"), "nodesedge");
        assert_eq!(root_cid(3), "root-cid-3");
        assert_eq!(tcp_addr(1), "tcp-addr-1");
    }

    #[test]
    fn test_barrier_keys_are_wire_stable() {
        let id = run_id(1, 1);
        assert_eq!(id, "1-1");
        assert_eq!(start_run(&id), "start-run-1-1");
        assert_eq!(connect_complete(&id), "connect-complete-1-1");
        assert_eq!(ledgers_initialized(&id), "ledgers-initialized-1-1");
        assert_eq!(
            metric_gathering_started(&id),
            "background-metric-gathering-started-1-1"
        );
        assert_eq!(transfer_complete(&id), "transfer-complete-1-1");
        assert_eq!(run_complete(&id), "run-complete-1-1");
        assert_eq!(leech_wave(&id, 0), "leech-wave-1-1-0");
        assert_eq!(injest_complete(2), "injest-complete-2");
    }

    #[test]
    fn test_keys_are_unique_per_round() {
        let first = connect_complete(&run_id(1, 1));
        let second = connect_complete(&run_id(1, 2));
        let other_perm = connect_complete(&run_id(2, 1));
        assert_ne!(first, second);
        assert_ne!(first, other_perm);
    }
}
