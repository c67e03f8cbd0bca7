//! In-process implementation of the synchronization service
//!
//! Backs tests and local single-machine simulations. Topics are plain
//! vectors with a length watch for notification; subscribers replay the
//! backlog and then follow live appends with no gap, because the snapshot
//! and the watch subscription are taken under the same lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use crate::error::{SyncError, SyncResult};
use crate::service::SyncService;

/// Buffer size for subscription channels.
const SUBSCRIBE_BUFFER: usize = 64;

struct TopicState {
    items: Vec<Vec<u8>>,
    len_tx: watch::Sender<usize>,
}

impl TopicState {
    fn new() -> Self {
        let (len_tx, _) = watch::channel(0);
        Self {
            items: Vec::new(),
            len_tx,
        }
    }
}

type TopicMap = HashMap<String, TopicState>;

/// Single-process [`SyncService`] holding all topics and counters in memory.
///
/// Share one instance between simulated processes via [`Arc`].
#[derive(Default)]
pub struct InMemoryService {
    topics: Arc<Mutex<TopicMap>>,
    states: Mutex<HashMap<String, watch::Sender<u64>>>,
}

impl InMemoryService {
    /// Create an empty service behind an [`Arc`].
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn state_watch(&self, state: &str) -> watch::Receiver<u64> {
        let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        states
            .entry(state.to_string())
            .or_insert_with(|| watch::channel(0).0)
            .subscribe()
    }
}

fn lock_topics(topics: &Mutex<TopicMap>) -> std::sync::MutexGuard<'_, TopicMap> {
    topics.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl SyncService for InMemoryService {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> SyncResult<u64> {
        let mut topics = lock_topics(&self.topics);
        let state = topics
            .entry(topic.to_string())
            .or_insert_with(TopicState::new);
        state.items.push(payload);
        let len = state.items.len();
        state.len_tx.send_replace(len);
        Ok(len as u64)
    }

    async fn subscribe(&self, topic: &str) -> SyncResult<mpsc::Receiver<Vec<u8>>> {
        let (tx, rx) = mpsc::channel(SUBSCRIBE_BUFFER);
        let topics = Arc::clone(&self.topics);
        let topic = topic.to_string();
        let mut len_rx = {
            let mut map = lock_topics(&topics);
            map.entry(topic.clone())
                .or_insert_with(TopicState::new)
                .len_tx
                .subscribe()
        };

        tokio::spawn(async move {
            let mut delivered = 0usize;
            loop {
                let batch: Vec<Vec<u8>> = {
                    let map = lock_topics(&topics);
                    match map.get(&topic) {
                        Some(state) => state.items[delivered..].to_vec(),
                        None => Vec::new(),
                    }
                };
                for item in batch {
                    if tx.send(item).await.is_err() {
                        return;
                    }
                    delivered += 1;
                }
                if len_rx.wait_for(|len| *len > delivered).await.is_err() {
                    return;
                }
            }
        });

        Ok(rx)
    }

    async fn signal(&self, state: &str) -> SyncResult<u64> {
        let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = states
            .entry(state.to_string())
            .or_insert_with(|| watch::channel(0).0);
        let mut count = 0;
        tx.send_modify(|c| {
            *c += 1;
            count = *c;
        });
        Ok(count)
    }

    async fn wait_for(&self, state: &str, target: u64) -> SyncResult<()> {
        let mut rx = self.state_watch(state);
        rx.wait_for(|count| *count >= target)
            .await
            .map_err(|_| SyncError::Closed(state.to_string()))?;
        Ok(())
    }

    async fn current(&self, state: &str) -> SyncResult<u64> {
        let states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(states.get(state).map(|tx| *tx.borrow()).unwrap_or(0))
    }
}
