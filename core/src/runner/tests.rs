//! Tests for the runner module
//!
//! Whole populations run as local tasks over the in-memory sync service,
//! with a mock exchange node backed by a shared content registry.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use swapbench_sync::{InMemoryService, SyncService};

use crate::config::{
    DebtEntry, ExperimentConfig, NetworkParams, PayloadSpec, Permutation,
};
use crate::error::ExperimentError;
use crate::peer::{ContentId, PeerDescriptor, PeerId};
use crate::role::Role;
use crate::traits::{
    BaselineTransfer, ExchangeNode, LedgerOps, LedgerReceipt, NetworkShaper, NodeError, NodeStats,
    RecordSink,
};

use super::{wave_of, ExperimentRunnerBuilder, ExperimentSummary};

// ============================================================================
// Mock exchange node
// ============================================================================

type ContentRegistry = Arc<Mutex<HashMap<ContentId, u64>>>;

struct MockNode {
    id: PeerId,
    registry: ContentRegistry,
    store: Mutex<HashSet<ContentId>>,
    connected: Mutex<Vec<PeerId>>,
    ledgers: Mutex<HashMap<PeerId, (u64, u64)>>,
    fail_fetch: bool,
    with_ledger: bool,
}

impl MockNode {
    fn build(id: &str, registry: ContentRegistry, fail_fetch: bool, with_ledger: bool) -> Arc<Self> {
        Arc::new(Self {
            id: PeerId::from(id),
            registry,
            store: Mutex::new(HashSet::new()),
            connected: Mutex::new(Vec::new()),
            ledgers: Mutex::new(HashMap::new()),
            fail_fetch,
            with_ledger,
        })
    }

    fn new(id: &str, registry: ContentRegistry) -> Arc<Self> {
        Self::build(id, registry, false, true)
    }

    fn failing(id: &str, registry: ContentRegistry) -> Arc<Self> {
        Self::build(id, registry, true, true)
    }

    fn without_ledger(id: &str, registry: ContentRegistry) -> Arc<Self> {
        Self::build(id, registry, false, false)
    }

    fn connected_ids(&self) -> Vec<PeerId> {
        self.connected.lock().unwrap().clone()
    }

    fn ledger_entry(&self, peer: &PeerId) -> Option<(u64, u64)> {
        self.ledgers.lock().unwrap().get(peer).copied()
    }
}

#[async_trait]
impl ExchangeNode for MockNode {
    fn id(&self) -> PeerId {
        self.id.clone()
    }

    async fn connect(&self, peer: &PeerDescriptor) -> Result<(), NodeError> {
        self.connected.lock().unwrap().push(peer.id.clone());
        Ok(())
    }

    async fn disconnect_all(&self) -> Result<(), NodeError> {
        self.connected.lock().unwrap().clear();
        Ok(())
    }

    async fn publish_payload(&self, payload: &PayloadSpec) -> Result<ContentId, NodeError> {
        let (cid, size) = match payload {
            PayloadSpec::Random { size, seed } => {
                (ContentId(format!("cid-{seed}-{size}")), *size)
            }
            PayloadSpec::Path { path } => (ContentId(format!("cid-path-{path}")), 0),
        };
        self.registry.lock().unwrap().insert(cid.clone(), size);
        self.store.lock().unwrap().insert(cid.clone());
        Ok(cid)
    }

    async fn remove_content(&self, id: &ContentId) -> Result<(), NodeError> {
        self.store.lock().unwrap().remove(id);
        Ok(())
    }

    async fn clear_store(&self) -> Result<(), NodeError> {
        self.store.lock().unwrap().clear();
        Ok(())
    }

    async fn fetch(&self, id: &ContentId, _peers: &[PeerDescriptor]) -> Result<u64, NodeError> {
        if self.fail_fetch {
            return Err(NodeError::Fetch {
                id: id.clone(),
                reason: "simulated failure".into(),
            });
        }
        // Simulated transfer latency.
        tokio::time::sleep(Duration::from_millis(5)).await;
        let size = self
            .registry
            .lock()
            .unwrap()
            .get(id)
            .copied()
            .ok_or_else(|| NodeError::NotFound(id.clone()))?;
        self.store.lock().unwrap().insert(id.clone());
        Ok(size)
    }

    fn stat(&self) -> Result<NodeStats, NodeError> {
        Ok(NodeStats::default())
    }

    async fn close(&self) -> Result<(), NodeError> {
        Ok(())
    }

    fn ledger_ops(&self) -> Option<&dyn LedgerOps> {
        if self.with_ledger {
            Some(self)
        } else {
            None
        }
    }

    fn baseline(&self) -> Option<&dyn BaselineTransfer> {
        Some(self)
    }
}

impl LedgerOps for MockNode {
    fn set_ledger_sent_bytes(&self, peer: &PeerId, bytes: u64) {
        self.ledgers.lock().unwrap().entry(peer.clone()).or_default().0 = bytes;
    }

    fn set_ledger_received_bytes(&self, peer: &PeerId, bytes: u64) {
        self.ledgers.lock().unwrap().entry(peer.clone()).or_default().1 = bytes;
    }

    fn add_to_ledger_sent_bytes(&self, peer: &PeerId, bytes: u64) {
        self.ledgers.lock().unwrap().entry(peer.clone()).or_default().0 += bytes;
    }

    fn ledger_for_peer(&self, peer: &PeerId) -> Option<LedgerReceipt> {
        let (sent, recv) = self.ledger_entry(peer).unwrap_or((0, 0));
        Some(LedgerReceipt {
            peer: peer.clone(),
            sent,
            recv,
            value: sent as f64 - recv as f64,
            exchanged: sent + recv,
            weight: 0.0,
            work_remaining: 0,
        })
    }
}

#[async_trait]
impl BaselineTransfer for MockNode {
    async fn serve(&self, payload: &PayloadSpec) -> Result<String, NodeError> {
        Ok(format!("mock://{}/{}", self.id, payload.nominal_size()))
    }

    async fn fetch(&self, addr: &str) -> Result<u64, NodeError> {
        tokio::time::sleep(Duration::from_millis(2)).await;
        addr.rsplit('/')
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| NodeError::Other(format!("bad baseline addr {addr}")))
    }

    async fn stop_serving(&self) -> Result<(), NodeError> {
        Ok(())
    }
}

// ============================================================================
// Mock shaper and sink
// ============================================================================

#[derive(Default)]
struct RecordingShaper {
    applied: Mutex<Vec<NetworkParams>>,
}

#[async_trait]
impl NetworkShaper for RecordingShaper {
    async fn apply(
        &self,
        params: &NetworkParams,
        _role: Role,
        _index: usize,
    ) -> Result<(), NodeError> {
        self.applied.lock().unwrap().push(*params);
        Ok(())
    }
}

#[derive(Default)]
struct VecSink {
    points: Mutex<Vec<(String, f64)>>,
}

impl RecordSink for VecSink {
    fn record_point(&self, id: &str, value: f64) {
        self.points.lock().unwrap().push((id.to_string(), value));
    }
}

impl VecSink {
    fn count_named(&self, name: &str) -> usize {
        let needle = format!("/name:{name}");
        self.points
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id.ends_with(&needle))
            .count()
    }

    fn count_prefixed(&self, prefix: &str) -> usize {
        self.points
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id.starts_with(prefix))
            .count()
    }
}

// ============================================================================
// Harness
// ============================================================================

fn test_config(instances: usize, requesters: usize, observers: usize) -> ExperimentConfig {
    ExperimentConfig {
        instance_count: instances,
        requester_count: requesters,
        observer_count: observers,
        run_count: 1,
        timeout_secs: 30,
        run_timeout_secs: 10,
        max_connection_rate: 0,
        wave_count: 1,
        request_stagger_ms: 0,
        inter_wave_pause_ms: 20,
        sample_interval_ms: 1,
        seeder_rate: 100,
        baseline_transfer: false,
        permutations: vec![Permutation {
            payload: PayloadSpec::Random { size: 1000, seed: 1 },
            network: NetworkParams {
                latency_ms: 10,
                bandwidth_mb: 100,
                jitter_pct: 0,
            },
        }],
        initial_debts: Vec::new(),
        debt_ratios: None,
        group: None,
    }
}

struct Population {
    nodes: Vec<Arc<MockNode>>,
    sinks: Vec<Arc<VecSink>>,
    summaries: Vec<ExperimentSummary>,
}

impl Population {
    fn by_role(&self, role: Role) -> Vec<usize> {
        self.summaries
            .iter()
            .enumerate()
            .filter(|(_, s)| s.assignment.role == role)
            .map(|(i, _)| i)
            .collect()
    }
}

/// Run a full population to completion, panicking on any process error.
async fn run_population(config: ExperimentConfig, nodes: Vec<Arc<MockNode>>) -> Population {
    let service = InMemoryService::new();
    let mut sinks = Vec::new();
    let mut handles = Vec::new();

    for node in &nodes {
        let sink = Arc::new(VecSink::default());
        sinks.push(Arc::clone(&sink));
        let runner = ExperimentRunnerBuilder::new()
            .config(config.clone())
            .node(Arc::clone(node) as Arc<dyn ExchangeNode>)
            .service(Arc::clone(&service) as Arc<dyn SyncService>)
            .shaper(Arc::new(RecordingShaper::default()))
            .sink(sink as Arc<dyn RecordSink>)
            .build()
            .expect("build runner");
        handles.push(tokio::spawn(runner.run()));
    }

    let mut summaries = Vec::new();
    for handle in handles {
        summaries.push(handle.await.expect("task panicked").expect("run failed"));
    }

    Population {
        nodes,
        sinks,
        summaries,
    }
}

// ============================================================================
// Integration tests
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_end_to_end_one_holder_two_requesters() {
    let registry: ContentRegistry = Arc::default();
    let nodes: Vec<Arc<MockNode>> = (0..3)
        .map(|i| MockNode::new(&format!("proc-{i}"), Arc::clone(&registry)))
        .collect();

    let population = run_population(test_config(3, 2, 0), nodes).await;

    let requesters = population.by_role(Role::Requester);
    let holders = population.by_role(Role::Holder);
    assert_eq!(requesters.len(), 2);
    assert_eq!(holders.len(), 1);

    // Exactly one time_to_fetch point per requester, none for the holder.
    for &i in &requesters {
        assert_eq!(population.sinks[i].count_named("time_to_fetch"), 1);
        assert_eq!(population.sinks[i].count_named("data_sent"), 1);
    }
    let holder = holders[0];
    assert_eq!(population.sinks[holder].count_named("time_to_fetch"), 0);
    assert_eq!(population.sinks[holder].count_named("data_sent"), 1);

    // Each requester dialed the holder before crossing connect-complete.
    let holder_id = population.nodes[holder].id();
    for &i in &requesters {
        assert!(
            population.nodes[i].connected_ids().contains(&holder_id),
            "requester {i} never dialed the holder"
        );
    }

    // The background sampler produced receipt samples.
    let receipts: usize = population
        .sinks
        .iter()
        .map(|s| s.count_prefixed("receiptAtTime/"))
        .sum();
    assert!(receipts > 0, "no receipt samples recorded");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_missing_peers_fail_initialization_with_timeout() {
    let registry: ContentRegistry = Arc::default();
    let service = InMemoryService::new();

    let mut config = test_config(3, 2, 0);
    config.timeout_secs = 1;

    // Only 2 of the 3 configured processes ever join.
    let mut handles = Vec::new();
    for i in 0..2 {
        let runner = ExperimentRunnerBuilder::new()
            .config(config.clone())
            .node(MockNode::new(&format!("proc-{i}"), Arc::clone(&registry))
                as Arc<dyn ExchangeNode>)
            .service(Arc::clone(&service) as Arc<dyn SyncService>)
            .sink(Arc::new(VecSink::default()) as Arc<dyn RecordSink>)
            .build()
            .expect("build runner");
        handles.push(tokio::spawn(runner.run()));
    }

    for handle in handles {
        let err = handle.await.expect("task panicked").unwrap_err();
        match err {
            ExperimentError::Sync(swapbench_sync::SyncError::Timeout { got, needed, .. }) => {
                assert_eq!(got, 2);
                assert_eq!(needed, 3);
            }
            // The overall deadline may win the race against the collect
            // timeout; both name the same condition.
            ExperimentError::Timeout(_) => {}
            other => panic!("expected timeout, got {other}"),
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_fetch_failure_aborts_round_with_zero_tolerance() {
    let registry: ContentRegistry = Arc::default();
    let service = InMemoryService::new();

    let mut config = test_config(2, 1, 0);
    config.timeout_secs = 5;

    let mut handles = Vec::new();
    for i in 0..2 {
        // Every process gets a failing fetch; only the requester exercises it.
        let node = MockNode::failing(&format!("proc-{i}"), Arc::clone(&registry));
        let runner = ExperimentRunnerBuilder::new()
            .config(config.clone())
            .node(node as Arc<dyn ExchangeNode>)
            .service(Arc::clone(&service) as Arc<dyn SyncService>)
            .sink(Arc::new(VecSink::default()) as Arc<dyn RecordSink>)
            .build()
            .expect("build runner");
        handles.push(tokio::spawn(runner.run()));
    }

    let mut saw_fetch_failure = false;
    for handle in handles {
        let result = handle.await.expect("task panicked");
        let err = result.unwrap_err();
        if let ExperimentError::FetchFailed { failures, run_id } = &err {
            assert_eq!(*failures, 1);
            assert_eq!(run_id, "1-1");
            saw_fetch_failure = true;
        }
    }
    assert!(saw_fetch_failure, "no process reported the fetch failure");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_initial_debts_seed_node_ledgers() {
    let registry: ContentRegistry = Arc::default();
    let nodes: Vec<Arc<MockNode>> = (0..2)
        .map(|i| MockNode::new(&format!("proc-{i}"), Arc::clone(&registry)))
        .collect();

    let mut config = test_config(2, 1, 0);
    config.initial_debts = vec![
        DebtEntry {
            from_role: Role::Holder,
            from_index: 0,
            to_role: Role::Requester,
            to_index: 0,
            bytes: 1_000,
        },
        DebtEntry {
            from_role: Role::Requester,
            from_index: 0,
            to_role: Role::Holder,
            to_index: 0,
            bytes: 5_000_000_000,
        },
    ];

    let population = run_population(config, nodes).await;

    let holder = population.by_role(Role::Holder)[0];
    let requester = population.by_role(Role::Requester)[0];
    let holder_id = population.nodes[holder].id();
    let requester_id = population.nodes[requester].id();

    // Holder pushed its sent debt and its mirrored received debt.
    assert_eq!(
        population.nodes[holder].ledger_entry(&requester_id),
        Some((1_000, 5_000_000_000))
    );
    // Requester sees the reverse orientation.
    assert_eq!(
        population.nodes[requester].ledger_entry(&holder_id),
        Some((5_000_000_000, 1_000))
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_waves_partition_requesters_and_complete() {
    let registry: ContentRegistry = Arc::default();
    let nodes: Vec<Arc<MockNode>> = (0..4)
        .map(|i| MockNode::new(&format!("proc-{i}"), Arc::clone(&registry)))
        .collect();

    let mut config = test_config(4, 3, 0);
    config.wave_count = 2;
    config.request_stagger_ms = 5;
    config.inter_wave_pause_ms = 10;

    let population = run_population(config, nodes).await;

    for &i in &population.by_role(Role::Requester) {
        assert_eq!(population.sinks[i].count_named("time_to_fetch"), 1);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_observer_participates_without_fetching() {
    let registry: ContentRegistry = Arc::default();
    let nodes: Vec<Arc<MockNode>> = (0..3)
        .map(|i| MockNode::new(&format!("proc-{i}"), Arc::clone(&registry)))
        .collect();

    let population = run_population(test_config(3, 1, 1), nodes).await;

    let observers = population.by_role(Role::Observer);
    assert_eq!(observers.len(), 1);
    let observer = observers[0];

    assert_eq!(population.sinks[observer].count_named("time_to_fetch"), 0);
    assert_eq!(population.sinks[observer].count_named("msgs_rcvd"), 1);
    assert!(population.nodes[observer].connected_ids().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_baseline_transfer_records_tcp_fetch() {
    let registry: ContentRegistry = Arc::default();
    let nodes: Vec<Arc<MockNode>> = (0..2)
        .map(|i| MockNode::new(&format!("proc-{i}"), Arc::clone(&registry)))
        .collect();

    let mut config = test_config(2, 1, 0);
    config.baseline_transfer = true;

    let population = run_population(config, nodes).await;

    let requester = population.by_role(Role::Requester)[0];
    let holder = population.by_role(Role::Holder)[0];
    assert_eq!(population.sinks[requester].count_named("tcp_fetch"), 1);
    assert_eq!(population.sinks[holder].count_named("tcp_fetch"), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_multiple_runs_and_permutations() {
    let registry: ContentRegistry = Arc::default();
    let nodes: Vec<Arc<MockNode>> = (0..2)
        .map(|i| MockNode::new(&format!("proc-{i}"), Arc::clone(&registry)))
        .collect();

    let mut config = test_config(2, 1, 0);
    config.run_count = 2;
    config.permutations.push(Permutation {
        payload: PayloadSpec::Random { size: 2000, seed: 9 },
        network: NetworkParams {
            latency_ms: 50,
            bandwidth_mb: 10,
            jitter_pct: 5,
        },
    });

    let population = run_population(config, nodes).await;

    for summary in &population.summaries {
        assert_eq!(summary.rounds, 4);
    }
    let requester = population.by_role(Role::Requester)[0];
    // 2 permutations x 2 runs.
    assert_eq!(population.sinks[requester].count_named("time_to_fetch"), 4);
}

// ============================================================================
// Unit tests
// ============================================================================

#[test]
fn test_wave_of_assigns_every_index_exactly_once() {
    for wave_count in 1..=5 {
        for index in 0..20 {
            let active: Vec<usize> = (0..wave_count)
                .filter(|&w| wave_of(index, wave_count) == w)
                .collect();
            assert_eq!(active.len(), 1);
            assert_eq!(active[0], index % wave_count);
        }
    }
}

#[test]
fn test_builder_missing_node() {
    let result = ExperimentRunnerBuilder::new()
        .config(test_config(2, 1, 0))
        .service(InMemoryService::new() as Arc<dyn SyncService>)
        .sink(Arc::new(VecSink::default()) as Arc<dyn RecordSink>)
        .build();
    let err = result.unwrap_err();
    assert!(err.to_string().contains("node"));
}

#[test]
fn test_builder_rejects_node_without_ledger_support() {
    let registry: ContentRegistry = Arc::default();
    let result = ExperimentRunnerBuilder::new()
        .config(test_config(2, 1, 0))
        .node(MockNode::without_ledger("proc-0", registry) as Arc<dyn ExchangeNode>)
        .service(InMemoryService::new() as Arc<dyn SyncService>)
        .sink(Arc::new(VecSink::default()) as Arc<dyn RecordSink>)
        .build();
    let err = result.unwrap_err();
    assert!(err.to_string().contains("ledger"));
}

#[test]
fn test_builder_rejects_invalid_topology() {
    let registry: ContentRegistry = Arc::default();
    let mut config = test_config(2, 1, 0);
    config.requester_count = 5;
    let result = ExperimentRunnerBuilder::new()
        .config(config)
        .node(MockNode::new("proc-0", registry) as Arc<dyn ExchangeNode>)
        .service(InMemoryService::new() as Arc<dyn SyncService>)
        .sink(Arc::new(VecSink::default()) as Arc<dyn RecordSink>)
        .build();
    assert!(result.is_err());
}
