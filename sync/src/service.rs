//! Transport contract for the shared synchronization service
//!
//! The service is the only component whose writes are visible to other
//! processes. It provides two primitives: append-only, totally ordered topics
//! and monotonically increasing state counters. Everything else in the
//! rendezvous layer is built from these.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::SyncResult;

/// Ordered-topic and state-counter service shared by all experiment processes.
///
/// Implementations must guarantee that a topic is append-only and totally
/// ordered for a given name, and that [`publish`](SyncService::publish)
/// returns the 1-based position of the appended item. Sequence numbers
/// derived from that position drive role assignment, so two processes must
/// never observe the same position for different items.
#[async_trait]
pub trait SyncService: Send + Sync {
    /// Append `payload` to the named topic, returning its 1-based position.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> SyncResult<u64>;

    /// Subscribe to the named topic from the beginning.
    ///
    /// The receiver yields every item ever published to the topic, in publish
    /// order, followed by items published after the subscription was taken.
    async fn subscribe(&self, topic: &str) -> SyncResult<mpsc::Receiver<Vec<u8>>>;

    /// Increment the counter for a state key, returning the new count.
    async fn signal(&self, state: &str) -> SyncResult<u64>;

    /// Resolve once the counter for `state` has reached `target`.
    async fn wait_for(&self, state: &str, target: u64) -> SyncResult<()>;

    /// Current counter value for `state` (0 if never signalled).
    async fn current(&self, state: &str) -> SyncResult<u64>;
}
