//! In-process simulation of an exchange network
//!
//! `swapbench run` executes a whole experiment population as local tasks:
//! every process gets a [`SimNode`] wired to one shared [`SimNetwork`],
//! which stands in for the real exchange protocol. Transfers are modeled as
//! short sleeps scaled by payload size, and both sides of each transfer are
//! accounted in a shared per-pair ledger so receipt sampling sees live data.

use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

use swapbench_core::{
    ContentId, ExchangeNode, LedgerOps, LedgerReceipt, NodeError, NodeStats, PayloadSpec,
    PeerDescriptor, PeerId, RecordSink,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared state standing in for the network between simulated nodes.
#[derive(Default)]
pub struct SimNetwork {
    /// content id -> (owner, size)
    content: Mutex<HashMap<ContentId, (PeerId, u64)>>,
    /// (from, to) -> bytes transferred
    ledgers: Mutex<HashMap<(PeerId, PeerId), u64>>,
    stats: Mutex<HashMap<PeerId, NodeStats>>,
}

impl SimNetwork {
    /// Create an empty simulated network.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

/// Simulated exchange node with ledger support.
pub struct SimNode {
    id: PeerId,
    network: Arc<SimNetwork>,
    store: Mutex<HashSet<ContentId>>,
    connected: Mutex<HashSet<PeerId>>,
}

impl SimNode {
    /// Create a node attached to the shared network.
    pub fn new(id: impl Into<String>, network: Arc<SimNetwork>) -> Arc<Self> {
        Arc::new(Self {
            id: PeerId(id.into()),
            network,
            store: Mutex::new(HashSet::new()),
            connected: Mutex::new(HashSet::new()),
        })
    }

    fn content_id_for(payload: &PayloadSpec) -> ContentId {
        match payload {
            PayloadSpec::Random { size, seed } => {
                // Content-address a seeded sample of the generated bytes.
                let mut rng = StdRng::seed_from_u64(*seed);
                let mut sample = vec![0u8; (*size).min(4096) as usize];
                rng.fill_bytes(&mut sample);

                let mut hasher = std::collections::hash_map::DefaultHasher::new();
                sample.hash(&mut hasher);
                size.hash(&mut hasher);
                ContentId(format!("sim{:016x}", hasher.finish()))
            }
            PayloadSpec::Path { path } => ContentId(format!("simpath-{path}")),
        }
    }
}

#[async_trait]
impl ExchangeNode for SimNode {
    fn id(&self) -> PeerId {
        self.id.clone()
    }

    async fn connect(&self, peer: &PeerDescriptor) -> Result<(), NodeError> {
        lock(&self.connected).insert(peer.id.clone());
        Ok(())
    }

    async fn disconnect_all(&self) -> Result<(), NodeError> {
        lock(&self.connected).clear();
        Ok(())
    }

    async fn publish_payload(&self, payload: &PayloadSpec) -> Result<ContentId, NodeError> {
        let size = payload.nominal_size();
        let cid = Self::content_id_for(payload);
        lock(&self.network.content).insert(cid.clone(), (self.id.clone(), size));
        lock(&self.store).insert(cid.clone());
        Ok(cid)
    }

    async fn remove_content(&self, id: &ContentId) -> Result<(), NodeError> {
        lock(&self.store).remove(id);
        let mut content = lock(&self.network.content);
        if content.get(id).is_some_and(|(owner, _)| *owner == self.id) {
            content.remove(id);
        }
        Ok(())
    }

    async fn clear_store(&self) -> Result<(), NodeError> {
        lock(&self.store).clear();
        Ok(())
    }

    async fn fetch(&self, id: &ContentId, _peers: &[PeerDescriptor]) -> Result<u64, NodeError> {
        let (owner, size) = lock(&self.network.content)
            .get(id)
            .cloned()
            .ok_or_else(|| NodeError::NotFound(id.clone()))?;

        let duplicate = lock(&self.store).contains(id);

        // Transfer time scales with payload size.
        tokio::time::sleep(Duration::from_micros(100 + size / 512)).await;

        {
            let mut ledgers = lock(&self.network.ledgers);
            *ledgers.entry((owner.clone(), self.id.clone())).or_default() += size;
        }
        {
            let mut stats = lock(&self.network.stats);
            let mine = stats.entry(self.id.clone()).or_default();
            mine.messages_received += 1;
            mine.data_received += size;
            mine.block_data_received += size;
            mine.blocks_received += 1;
            if duplicate {
                mine.dup_data_received += size;
                mine.dup_blocks_received += 1;
            }
            let theirs = stats.entry(owner).or_default();
            theirs.data_sent += size;
            theirs.blocks_sent += 1;
        }

        lock(&self.store).insert(id.clone());
        Ok(size)
    }

    fn stat(&self) -> Result<NodeStats, NodeError> {
        Ok(lock(&self.network.stats)
            .get(&self.id)
            .copied()
            .unwrap_or_default())
    }

    async fn close(&self) -> Result<(), NodeError> {
        Ok(())
    }

    fn ledger_ops(&self) -> Option<&dyn LedgerOps> {
        Some(self)
    }
}

impl LedgerOps for SimNode {
    fn set_ledger_sent_bytes(&self, peer: &PeerId, bytes: u64) {
        lock(&self.network.ledgers).insert((self.id.clone(), peer.clone()), bytes);
    }

    fn set_ledger_received_bytes(&self, peer: &PeerId, bytes: u64) {
        lock(&self.network.ledgers).insert((peer.clone(), self.id.clone()), bytes);
    }

    fn add_to_ledger_sent_bytes(&self, peer: &PeerId, bytes: u64) {
        *lock(&self.network.ledgers)
            .entry((self.id.clone(), peer.clone()))
            .or_default() += bytes;
    }

    fn ledger_for_peer(&self, peer: &PeerId) -> Option<LedgerReceipt> {
        let ledgers = lock(&self.network.ledgers);
        let sent = ledgers
            .get(&(self.id.clone(), peer.clone()))
            .copied()
            .unwrap_or(0);
        let recv = ledgers
            .get(&(peer.clone(), self.id.clone()))
            .copied()
            .unwrap_or(0);
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

/// Sink that counts points and forwards them to the tracing pipeline.
#[derive(Default)]
pub struct LogSink {
    points: AtomicU64,
}

impl LogSink {
    /// Total points recorded so far.
    pub fn total(&self) -> u64 {
        self.points.load(Ordering::Relaxed)
    }
}

impl RecordSink for LogSink {
    fn record_point(&self, id: &str, value: f64) {
        self.points.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(target: "telemetry", id, value, "point");
    }
}
