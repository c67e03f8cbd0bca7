//! Typed rendezvous client over a [`SyncService`]
//!
//! The client owns the experiment-wide rendezvous timeout and the configured
//! instance count, and exposes the primitives the run loop is built from:
//! typed topic publish, subscribe-until-N, and signal-and-wait barriers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{SyncError, SyncResult};
use crate::service::SyncService;

/// Typed client for the shared synchronization service.
///
/// Cloning is cheap; clones share the underlying service.
#[derive(Clone)]
pub struct SyncClient {
    service: Arc<dyn SyncService>,
    instance_count: u64,
    timeout: Duration,
}

impl SyncClient {
    /// Create a client for an experiment of `instance_count` processes with
    /// the given rendezvous timeout.
    pub fn new(service: Arc<dyn SyncService>, instance_count: u64, timeout: Duration) -> Self {
        Self {
            service,
            instance_count,
            timeout,
        }
    }

    /// Number of processes expected at every full barrier.
    pub fn instance_count(&self) -> u64 {
        self.instance_count
    }

    /// Publish a value to the named topic, returning its 1-based position.
    ///
    /// The position of a process's identity publish is its global sequence
    /// number, which role assignment is derived from.
    pub async fn publish<T: Serialize>(&self, topic: &str, value: &T) -> SyncResult<u64> {
        let payload = serde_json::to_vec(value).map_err(|e| SyncError::codec(topic, e))?;
        self.service.publish(topic, payload).await
    }

    /// Collect `count` items from the named topic, in publish order.
    ///
    /// Blocks until `count` items have been observed or the rendezvous
    /// timeout elapses; the timeout error reports the elapsed wait and how
    /// many items arrived.
    pub async fn subscribe_collect<T: DeserializeOwned>(
        &self,
        topic: &str,
        count: usize,
    ) -> SyncResult<Vec<T>> {
        let start = Instant::now();
        let mut rx = self.service.subscribe(topic).await?;
        let mut items = Vec::with_capacity(count);

        while items.len() < count {
            let remaining = self.timeout.saturating_sub(start.elapsed());
            let item = match tokio::time::timeout(remaining, rx.recv()).await {
                Ok(Some(payload)) => payload,
                Ok(None) => return Err(SyncError::Closed(topic.to_string())),
                Err(_) => {
                    return Err(SyncError::Timeout {
                        key: topic.to_string(),
                        waited: start.elapsed(),
                        got: items.len() as u64,
                        needed: count as u64,
                    })
                }
            };
            items.push(serde_json::from_slice(&item).map_err(|e| SyncError::codec(topic, e))?);
        }

        Ok(items)
    }

    /// Signal that this process has reached `phase_key` and block until every
    /// configured process has signalled the same key.
    ///
    /// This is the barrier primitive behind every phase transition; a timeout
    /// here is fatal for the run.
    pub async fn signal_and_wait_for_all(&self, phase_key: &str) -> SyncResult<()> {
        self.barrier(phase_key, self.instance_count).await
    }

    /// Signal `key` and block until `target` processes have signalled it.
    ///
    /// Used when only a subset must rendezvous, e.g. requester-only wave
    /// gates or serial seed generation.
    pub async fn barrier(&self, key: &str, target: u64) -> SyncResult<()> {
        let start = Instant::now();
        tracing::debug!(key, needed = target, "entering barrier");
        self.service.signal(key).await?;

        match tokio::time::timeout(self.timeout, self.service.wait_for(key, target)).await {
            Ok(result) => {
                result?;
                tracing::debug!(key, elapsed = ?start.elapsed(), "crossed barrier");
                Ok(())
            }
            Err(_) => {
                let got = self.service.current(key).await.unwrap_or(0);
                Err(SyncError::Timeout {
                    key: key.to_string(),
                    waited: start.elapsed(),
                    got,
                    needed: target,
                })
            }
        }
    }
}

impl std::fmt::Debug for SyncClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncClient")
            .field("instance_count", &self.instance_count)
            .field("timeout", &self.timeout)
            .finish()
    }
}
