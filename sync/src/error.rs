//! Error types for the rendezvous layer

use std::time::Duration;
use thiserror::Error;

/// Rendezvous error type
///
/// A [`SyncError::Timeout`] from a barrier or a collect call is fatal for the
/// experiment: lockstep progression cannot be guaranteed once a peer is late.
#[derive(Error, Debug)]
pub enum SyncError {
    /// A barrier or subscribe-collect call did not reach its target in time
    #[error("timed out after {waited:?} waiting on {key:?}: {got}/{needed} arrived")]
    Timeout {
        /// Topic or state key that was being waited on
        key: String,
        /// Elapsed wait before giving up
        waited: Duration,
        /// Items or signals observed before the timeout
        got: u64,
        /// Items or signals required
        needed: u64,
    },

    /// Payload could not be encoded or decoded
    #[error("codec error on {topic:?}: {source}")]
    Codec {
        /// Topic whose payload failed to round-trip
        topic: String,
        /// Underlying serde error
        #[source]
        source: serde_json::Error,
    },

    /// The service dropped a subscription or counter mid-wait
    #[error("sync service closed while waiting on {0:?}")]
    Closed(String),

    /// Transport-level failure reported by the service implementation
    #[error("transport error: {0}")]
    Transport(String),
}

impl SyncError {
    /// Build a codec error for the given topic
    pub fn codec(topic: impl Into<String>, source: serde_json::Error) -> Self {
        SyncError::Codec {
            topic: topic.into(),
            source,
        }
    }
}

/// Result type alias for the rendezvous layer
pub type SyncResult<T> = Result<T, SyncError>;
