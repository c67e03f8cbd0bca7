//! Background ledger sampling
//!
//! One cancellable task per round polls the node's per-peer ledger state at
//! a fixed short interval, emits a telemetry sample per peer per tick, and
//! feeds the ledger matrix's monotonic merge so observed traffic persists
//! correctly into the next round. The task is stopped via an explicit
//! signal and joined before any metric is read.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use crate::error::{ExperimentError, ExperimentResult};
use crate::ledger::{LedgerMatrix, PeerRef};
use crate::metrics::MetricsEmitter;
use crate::peer::{PeerDescriptor, PeerId};
use crate::traits::ExchangeNode;

/// Handle to a running sampler task.
pub(crate) struct SamplerHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Inputs for one round's sampler task.
pub(crate) struct SamplerContext {
    /// Node whose ledgers are polled
    pub node: Arc<dyn ExchangeNode>,
    /// Full peer population; the sampler skips this process's own entry
    pub peers: Vec<PeerDescriptor>,
    /// Identity of this process
    pub self_id: PeerId,
    /// Matrix endpoint of this process
    pub self_ref: PeerRef,
    /// Shared matrix receiving monotonic merges
    pub ledger: Arc<Mutex<LedgerMatrix>>,
    /// Emitter for per-tick receipt samples
    pub emitter: Arc<MetricsEmitter>,
    /// 1-based run number, embedded in every receipt sample
    pub run: usize,
    /// Tick interval
    pub interval: Duration,
}

/// Start the sampler for one round.
pub(crate) fn spawn(ctx: SamplerContext) -> SamplerHandle {
    let (stop, mut stopped) = watch::channel(false);

    let task = tokio::spawn(async move {
        let mut tick = tokio::time::interval(ctx.interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = stopped.changed() => {
                    tracing::debug!(run = ctx.run, "ledger sampler stopping");
                    break;
                }

                _ = tick.tick() => {
                    let Some(ops) = ctx.node.ledger_ops() else {
                        break;
                    };
                    let mut matrix = ctx.ledger.lock().await;
                    for peer in &ctx.peers {
                        if peer.id == ctx.self_id {
                            continue;
                        }
                        if let Some(receipt) = ops.ledger_for_peer(&peer.id) {
                            ctx.emitter.emit_receipt(ctx.run, &receipt);
                            let other = PeerRef::new(peer.role, peer.index);
                            matrix.set_if_greater(ctx.self_ref, other, receipt.sent);
                            matrix.set_if_greater(other, ctx.self_ref, receipt.recv);
                        }
                    }
                }
            }
        }
    });

    SamplerHandle { stop, task }
}

impl SamplerHandle {
    /// Signal the task to stop and wait for it to drain.
    ///
    /// Must complete before metrics are emitted: no sample may be read
    /// while the task is still mutating shared state.
    pub(crate) async fn stop(self) -> ExperimentResult<()> {
        let _ = self.stop.send(true);
        self.task
            .await
            .map_err(|e| ExperimentError::internal(format!("ledger sampler panicked: {e}")))
    }
}
