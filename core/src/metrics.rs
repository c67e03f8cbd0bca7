//! Metric scope paths and round emission
//!
//! Every observation is encoded as `scope-path/name:metric = value`. The
//! scope path embeds topology shape, network parameters, run identifiers,
//! role, and role index, so concurrent samples stay unique and downstream
//! aggregation can group by any subset of dimensions without schema
//! coordination.

use std::sync::Arc;
use std::time::Duration;

use crate::role::Role;
use crate::traits::{LedgerReceipt, NodeStats, RecordSink};

/// Dimensions identifying this process across an experiment's samples.
#[derive(Debug, Clone)]
pub struct MetricsScope {
    /// Number of Holder processes
    pub holder_count: usize,
    /// Number of Requester processes
    pub requester_count: usize,
    /// Number of Observer processes
    pub observer_count: usize,
    /// Global sequence number of this process
    pub seq: u64,
    /// Group name, empty when ungrouped
    pub group_name: String,
    /// Group-scoped sequence number (equals `seq` when ungrouped)
    pub group_seq: u64,
    /// Role of this process
    pub role: Role,
    /// Role index of this process
    pub index: usize,
}

/// Per-round outcome consumed by the emitter and then discarded.
#[derive(Debug, Clone)]
pub struct RoundRecord {
    /// 1-based run number within the permutation
    pub run: usize,
    /// Emulated latency in effect, milliseconds
    pub latency_ms: u64,
    /// Emulated bandwidth in effect, megabytes per second
    pub bandwidth_mb: u64,
    /// Nominal payload size for the permutation, bytes
    pub payload_size: u64,
    /// Wall time of the fetch, requesters only
    pub time_to_fetch: Option<Duration>,
    /// Wall time of the out-of-band baseline fetch, when it ran
    pub baseline_fetch: Option<Duration>,
    /// Per-peer fetch failures observed this round
    pub fetch_failures: u64,
    /// Counter snapshot taken after the round drained
    pub stats: NodeStats,
    /// When the round finished
    pub recorded_at: chrono::DateTime<chrono::Utc>,
}

/// Encodes round outcomes and sampler receipts against the telemetry sink.
pub struct MetricsEmitter {
    sink: Arc<dyn RecordSink>,
    scope: MetricsScope,
}

impl MetricsEmitter {
    /// Create an emitter scoped to this process.
    pub fn new(sink: Arc<dyn RecordSink>, scope: MetricsScope) -> Self {
        Self { sink, scope }
    }

    fn round_scope(&self, record: &RoundRecord) -> String {
        let s = &self.scope;
        format!(
            "topology:({}-{}-{})/latencyMS:{}/bandwidthMB:{}/run:{}/seq:{}/groupName:{}/groupSeq:{}/fileSize:{}/nodeType:{}/nodeTypeIndex:{}",
            s.holder_count,
            s.requester_count,
            s.observer_count,
            record.latency_ms,
            record.bandwidth_mb,
            record.run,
            s.seq,
            s.group_name,
            s.group_seq,
            record.payload_size,
            s.role,
            s.index,
        )
    }

    /// Emit the full metric set for a drained round.
    ///
    /// Requesters additionally report `time_to_fetch` (and `tcp_fetch` when
    /// the baseline transfer ran); all roles report the counter snapshot.
    pub fn emit_round(&self, record: &RoundRecord) {
        let scope = self.round_scope(record);
        let point = |name: &str, value: f64| {
            self.sink.record_point(&format!("{scope}/name:{name}"), value);
        };

        if self.scope.role == Role::Requester {
            let nanos = record
                .time_to_fetch
                .map(|d| d.as_nanos() as f64)
                .unwrap_or(0.0);
            point("time_to_fetch", nanos);

            if let Some(baseline) = record.baseline_fetch {
                point("tcp_fetch", baseline.as_nanos() as f64);
            }
        }

        let stats = &record.stats;
        point("msgs_rcvd", stats.messages_received as f64);
        point("data_sent", stats.data_sent as f64);
        point("data_rcvd", stats.data_received as f64);
        point("block_data_rcvd", stats.block_data_received as f64);
        point("dup_data_rcvd", stats.dup_data_received as f64);
        point("blks_sent", stats.blocks_sent as f64);
        point("blks_rcvd", stats.blocks_received as f64);
        point("dup_blks_rcvd", stats.dup_blocks_received as f64);

        tracing::debug!(run = record.run, failures = record.fetch_failures, "round metrics emitted");
    }

    /// Emit one background-sampler ledger receipt.
    pub fn emit_receipt(&self, run: usize, receipt: &LedgerReceipt) {
        let id = format!(
            "receiptAtTime/run:{}/peer:{}/sent:{}/recv:{}/value:{}/exchanged:{}/weight:{}/workRemaining:{}",
            run,
            receipt.peer,
            receipt.sent,
            receipt.recv,
            receipt.value,
            receipt.exchanged,
            receipt.weight,
            receipt.work_remaining,
        );
        self.sink.record_point(&id, 1.0);
    }
}

impl std::fmt::Debug for MetricsEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsEmitter")
            .field("scope", &self.scope)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::PeerId;
    use std::sync::Mutex;

    #[derive(Default)]
    struct VecSink {
        points: Mutex<Vec<(String, f64)>>,
    }

    impl RecordSink for VecSink {
        fn record_point(&self, id: &str, value: f64) {
            self.points
                .lock()
                .expect("sink poisoned")
                .push((id.to_string(), value));
        }
    }

    impl VecSink {
        fn count_named(&self, name: &str) -> usize {
            let needle = format!("/name:{name}");
            self.points
                .lock()
                .expect("sink poisoned")
                .iter()
                .filter(|(id, _)| id.ends_with(&needle))
                .count()
        }
    }

    fn scope(role: Role) -> MetricsScope {
        MetricsScope {
            holder_count: 1,
            requester_count: 2,
            observer_count: 0,
            seq: 3,
            group_name: String::new(),
            group_seq: 3,
            role,
            index: 0,
        }
    }

    fn record() -> RoundRecord {
        RoundRecord {
            run: 1,
            latency_ms: 10,
            bandwidth_mb: 100,
            payload_size: 1000,
            time_to_fetch: Some(Duration::from_millis(42)),
            baseline_fetch: None,
            fetch_failures: 0,
            stats: NodeStats {
                messages_received: 5,
                data_sent: 2000,
                data_received: 1000,
                block_data_received: 1000,
                dup_data_received: 0,
                blocks_sent: 2,
                blocks_received: 1,
                dup_blocks_received: 0,
            },
            recorded_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_scope_path_format() {
        let sink = Arc::new(VecSink::default());
        let emitter = MetricsEmitter::new(sink.clone(), scope(Role::Requester));
        emitter.emit_round(&record());

        let points = sink.points.lock().unwrap();
        let (id, _) = points
            .iter()
            .find(|(id, _)| id.contains("name:data_sent"))
            .expect("data_sent point");
        assert_eq!(
            id,
            "topology:(1-2-0)/latencyMS:10/bandwidthMB:100/run:1/seq:3/groupName:/groupSeq:3/fileSize:1000/nodeType:requester/nodeTypeIndex:0/name:data_sent"
        );
    }

    #[test]
    fn test_requester_emits_time_to_fetch() {
        let sink = Arc::new(VecSink::default());
        let emitter = MetricsEmitter::new(sink.clone(), scope(Role::Requester));
        emitter.emit_round(&record());
        assert_eq!(sink.count_named("time_to_fetch"), 1);
    }

    #[test]
    fn test_holder_emits_no_time_to_fetch() {
        let sink = Arc::new(VecSink::default());
        let emitter = MetricsEmitter::new(sink.clone(), scope(Role::Holder));
        emitter.emit_round(&record());
        assert_eq!(sink.count_named("time_to_fetch"), 0);
        assert_eq!(sink.count_named("data_sent"), 1);
    }

    #[test]
    fn test_baseline_point_only_when_present() {
        let sink = Arc::new(VecSink::default());
        let emitter = MetricsEmitter::new(sink.clone(), scope(Role::Requester));

        emitter.emit_round(&record());
        assert_eq!(sink.count_named("tcp_fetch"), 0);

        let mut with_baseline = record();
        with_baseline.baseline_fetch = Some(Duration::from_millis(7));
        emitter.emit_round(&with_baseline);
        assert_eq!(sink.count_named("tcp_fetch"), 1);
    }

    #[test]
    fn test_receipt_point_format() {
        let sink = Arc::new(VecSink::default());
        let emitter = MetricsEmitter::new(sink.clone(), scope(Role::Holder));
        emitter.emit_receipt(
            2,
            &LedgerReceipt {
                peer: PeerId::from("peer-9"),
                sent: 100,
                recv: 50,
                value: 50.0,
                exchanged: 150,
                weight: 1.0,
                work_remaining: 0,
            },
        );

        let points = sink.points.lock().unwrap();
        assert_eq!(points.len(), 1);
        let (id, value) = &points[0];
        assert_eq!(
            id,
            "receiptAtTime/run:2/peer:peer-9/sent:100/recv:50/value:50/exchanged:150/weight:1/workRemaining:0"
        );
        assert_eq!(*value, 1.0);
    }
}
