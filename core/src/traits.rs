//! Capability surfaces required from external collaborators
//!
//! The engine is protocol-agnostic: it drives the node-under-test only
//! through [`ExchangeNode`], applies traffic shaping only through
//! [`NetworkShaper`], and emits telemetry only through [`RecordSink`].
//! Implementations live outside this crate.

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};

use crate::config::{NetworkParams, PayloadSpec};
use crate::peer::{ContentId, PeerDescriptor, PeerId};
use crate::role::Role;

// ============================================================================
// Exchange node
// ============================================================================

/// Message and byte counters reported by the node-under-test.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStats {
    /// Protocol messages received
    pub messages_received: u64,
    /// Payload bytes sent
    pub data_sent: u64,
    /// Payload bytes received
    pub data_received: u64,
    /// Bytes received as blocks
    pub block_data_received: u64,
    /// Bytes received more than once
    pub dup_data_received: u64,
    /// Blocks sent
    pub blocks_sent: u64,
    /// Blocks received
    pub blocks_received: u64,
    /// Blocks received more than once
    pub dup_blocks_received: u64,
}

/// Live ledger view for one peer, as reported by the exchange strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerReceipt {
    /// Peer the ledger is kept against
    pub peer: PeerId,
    /// Bytes sent to the peer
    pub sent: u64,
    /// Bytes received from the peer
    pub recv: u64,
    /// Strategy value derived from the exchange balance
    pub value: f64,
    /// Total bytes exchanged in both directions
    pub exchanged: u64,
    /// Strategy weight assigned to the peer
    pub weight: f64,
    /// Outstanding work queued for the peer
    pub work_remaining: u64,
}

/// Errors surfaced by the node-under-test.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    /// Dialing a peer failed
    #[error("dial to {0} failed: {1}")]
    Dial(PeerId, String),

    /// Requested content is not available anywhere
    #[error("content {0} not found")]
    NotFound(ContentId),

    /// A fetch failed after the content was located
    #[error("fetch of {id} failed: {reason}")]
    Fetch {
        /// Content that could not be fetched
        id: ContentId,
        /// Node-reported reason
        reason: String,
    },

    /// Local store operation failed
    #[error("store error: {0}")]
    Store(String),

    /// Network emulation driver failure
    #[error("network setup failed: {0}")]
    Network(String),

    /// Any other node-reported failure
    #[error("{0}")]
    Other(String),
}

/// Extended ledger operations, supported only by credit-based exchange
/// strategies.
///
/// The engine resolves this capability once at startup; experiments that
/// seed initial debt abort before any round if the node lacks it.
pub trait LedgerOps: Send + Sync {
    /// Overwrite the bytes-sent side of the ledger kept against `peer`.
    fn set_ledger_sent_bytes(&self, peer: &PeerId, bytes: u64);

    /// Overwrite the bytes-received side of the ledger kept against `peer`.
    fn set_ledger_received_bytes(&self, peer: &PeerId, bytes: u64);

    /// Add to the bytes-sent side of the ledger kept against `peer`.
    fn add_to_ledger_sent_bytes(&self, peer: &PeerId, bytes: u64);

    /// Current ledger state for `peer`, if one is kept.
    fn ledger_for_peer(&self, peer: &PeerId) -> Option<LedgerReceipt>;
}

/// Out-of-band reference transfer, used to record a baseline fetch time the
/// exchange protocol can be compared against.
#[async_trait]
pub trait BaselineTransfer: Send + Sync {
    /// Start serving `payload` out-of-band; returns the address to publish.
    async fn serve(&self, payload: &PayloadSpec) -> Result<String, NodeError>;

    /// Fetch the payload served at `addr`; returns the byte count.
    async fn fetch(&self, addr: &str) -> Result<u64, NodeError>;

    /// Stop serving once every requester has fetched.
    async fn stop_serving(&self) -> Result<(), NodeError>;
}

/// The node-under-test.
///
/// One instance per process, constructed before the experiment starts and
/// closed after the last round. All methods take `&self`; implementations
/// are expected to handle their own interior synchronization.
#[async_trait]
pub trait ExchangeNode: Send + Sync {
    /// Network identity of this node, published in its peer descriptor.
    fn id(&self) -> PeerId;

    /// Open a connection to the peer.
    async fn connect(&self, peer: &PeerDescriptor) -> Result<(), NodeError>;

    /// Close every active connection.
    async fn disconnect_all(&self) -> Result<(), NodeError>;

    /// Generate the payload, add it to the local store, and return its
    /// content id.
    async fn publish_payload(&self, payload: &PayloadSpec) -> Result<ContentId, NodeError>;

    /// Remove previously published or fetched content.
    async fn remove_content(&self, id: &ContentId) -> Result<(), NodeError>;

    /// Clear the local store entirely.
    async fn clear_store(&self) -> Result<(), NodeError>;

    /// Fetch one content id from the given peers; returns the byte count.
    async fn fetch(&self, id: &ContentId, peers: &[PeerDescriptor]) -> Result<u64, NodeError>;

    /// Fetch every id concurrently, one task per id, joined before
    /// returning. Results are in input order; failures are reported
    /// per-id, not short-circuited.
    async fn fetch_all(
        &self,
        ids: &[ContentId],
        peers: &[PeerDescriptor],
    ) -> Vec<Result<u64, NodeError>> {
        join_all(ids.iter().map(|id| self.fetch(id, peers))).await
    }

    /// Counter snapshot for metrics emission.
    fn stat(&self) -> Result<NodeStats, NodeError>;

    /// Release node resources at the end of the experiment.
    async fn close(&self) -> Result<(), NodeError>;

    /// Ledger capability, when the exchange strategy supports it.
    fn ledger_ops(&self) -> Option<&dyn LedgerOps> {
        None
    }

    /// Baseline-transfer capability, when available.
    fn baseline(&self) -> Option<&dyn BaselineTransfer> {
        None
    }
}

// ============================================================================
// Network shaping
// ============================================================================

/// Applies emulated latency, bandwidth, and jitter to the host interface.
#[async_trait]
pub trait NetworkShaper: Send + Sync {
    /// Apply `params` for this process before a permutation's rounds start.
    async fn apply(&self, params: &NetworkParams, role: Role, index: usize)
        -> Result<(), NodeError>;
}

/// Shaper that applies nothing; for tests and local simulations.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopShaper;

#[async_trait]
impl NetworkShaper for NoopShaper {
    async fn apply(
        &self,
        params: &NetworkParams,
        role: Role,
        index: usize,
    ) -> Result<(), NodeError> {
        tracing::debug!(
            latency_ms = params.latency_ms,
            bandwidth_mb = params.bandwidth_mb,
            jitter_pct = params.jitter_pct,
            %role,
            index,
            "network shaping skipped"
        );
        Ok(())
    }
}

// ============================================================================
// Telemetry
// ============================================================================

/// Externally supplied telemetry sink.
///
/// Every observation is a `scope-path/name:metric = value` point; the sink
/// decides where it goes.
pub trait RecordSink: Send + Sync {
    /// Record one named numeric sample.
    fn record_point(&self, id: &str, value: f64);
}
