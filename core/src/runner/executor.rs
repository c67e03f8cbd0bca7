//! Runner execution logic

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use swapbench_sync::SyncClient;

use crate::config::{ExperimentConfig, PayloadSpec, Permutation};
use crate::dialer::{self, DialRateLimiter};
use crate::error::{ExperimentError, ExperimentResult};
use crate::ledger::{LedgerMatrix, PeerRef};
use crate::metrics::{MetricsEmitter, MetricsScope, RoundRecord};
use crate::peer::{ContentId, PeerDescriptor};
use crate::role::{self, Role, RoleAssignment};
use crate::topics;
use crate::traits::{ExchangeNode, LedgerOps, NetworkShaper, RecordSink};

use super::sampler::{self, SamplerContext};

/// Wave a requester index belongs to: index `i` is active in wave
/// `i mod W`, so every requester is active in exactly one wave per round.
pub fn wave_of(index: usize, wave_count: usize) -> usize {
    index % wave_count.max(1)
}

/// Final outcome of a completed experiment, for this process.
#[derive(Debug, Clone)]
pub struct ExperimentSummary {
    /// Role assignment this process ran under
    pub assignment: RoleAssignment,
    /// Global sequence number of this process
    pub global_seq: u64,
    /// Group-scoped sequence number (equals `global_seq` when ungrouped)
    pub group_seq: u64,
    /// Rounds completed across all permutations
    pub rounds: usize,
}

/// Process-local state established during initialization.
struct ExperimentState {
    assignment: RoleAssignment,
    global_seq: u64,
    group_seq: u64,
    seed_index: u64,
    descriptor: PeerDescriptor,
    peers: Vec<PeerDescriptor>,
    baseline: LedgerMatrix,
    ledger: Arc<Mutex<LedgerMatrix>>,
    emitter: Arc<MetricsEmitter>,
}

impl ExperimentState {
    fn self_ref(&self) -> PeerRef {
        PeerRef::new(self.assignment.role, self.assignment.index)
    }
}

/// Drives one process through the barrier-ordered experiment lifecycle.
///
/// Use [`ExperimentRunnerBuilder`](super::ExperimentRunnerBuilder) for
/// construction; it performs configuration validation and capability checks.
pub struct ExperimentRunner {
    config: ExperimentConfig,
    node: Arc<dyn ExchangeNode>,
    shaper: Arc<dyn NetworkShaper>,
    sink: Arc<dyn RecordSink>,
    sync: SyncClient,
}

impl ExperimentRunner {
    pub(crate) fn new(
        config: ExperimentConfig,
        node: Arc<dyn ExchangeNode>,
        shaper: Arc<dyn NetworkShaper>,
        sink: Arc<dyn RecordSink>,
        sync: SyncClient,
    ) -> Self {
        Self {
            config,
            node,
            shaper,
            sink,
            sync,
        }
    }

    /// Run the whole experiment under the overall timeout.
    pub async fn run(self) -> ExperimentResult<ExperimentSummary> {
        let overall = self.config.timeout();
        match tokio::time::timeout(overall, self.run_inner()).await {
            Ok(result) => result,
            Err(_) => Err(ExperimentError::Timeout(overall)),
        }
    }

    async fn run_inner(&self) -> ExperimentResult<ExperimentSummary> {
        let state = self.initialize().await?;
        let mut rounds = 0;

        for (ordinal, permutation) in self.config.permutations.iter().enumerate() {
            let p = ordinal + 1;
            rounds += self.run_permutation(&state, p, permutation).await?;
        }

        self.node.close().await?;
        tracing::info!(rounds, "experiment complete");

        Ok(ExperimentSummary {
            assignment: state.assignment,
            global_seq: state.global_seq,
            group_seq: state.group_seq,
            rounds,
        })
    }

    fn ledger_ops(&self) -> ExperimentResult<&dyn LedgerOps> {
        self.node.ledger_ops().ok_or_else(|| {
            ExperimentError::config("node does not support ledger operations")
        })
    }

    /// Publish identity, derive the role, exchange descriptors.
    async fn initialize(&self) -> ExperimentResult<ExperimentState> {
        let self_id = self.node.id();

        // The position of our identity publish is the global sequence.
        let global_seq = self.sync.publish(topics::PEERS, &self_id).await?;

        let (requester_count, observer_count) = self.config.effective_counts();
        let group_seq = match &self.config.group {
            Some(group) => {
                self.sync
                    .publish(&topics::node_group(&group.id), &self_id)
                    .await?
            }
            None => global_seq,
        };

        let assignment = role::assign(group_seq, requester_count, observer_count);
        tracing::info!(
            role = %assignment.role,
            index = assignment.index,
            seq = global_seq,
            group_seq,
            "role assigned"
        );

        // Holders derive a globally unique seed index: directly from the
        // sequence when ungrouped, via a holder-only rendezvous otherwise.
        let seed_index = if assignment.role == Role::Holder {
            if self.config.group.is_some() {
                self.sync
                    .publish(&topics::node_group("seeds"), &self_id)
                    .await?
                    - 1
            } else {
                assignment.index as u64
            }
        } else {
            0
        };

        let descriptor = PeerDescriptor {
            id: self_id,
            role: assignment.role,
            index: assignment.index,
        };
        self.sync.publish(topics::PEER_INFOS, &descriptor).await?;

        let peers: Vec<PeerDescriptor> = self
            .sync
            .subscribe_collect(topics::PEER_INFOS, self.config.instance_count)
            .await?;
        tracing::info!(peers = peers.len(), "collected all peer descriptors");

        let baseline = LedgerMatrix::from_entries(&self.config.initial_debts);
        let emitter = Arc::new(MetricsEmitter::new(
            Arc::clone(&self.sink),
            MetricsScope {
                holder_count: self.config.holder_count(),
                requester_count: self.config.requester_count,
                observer_count: self.config.observer_count,
                seq: global_seq,
                group_name: self
                    .config
                    .group
                    .as_ref()
                    .map(|g| g.id.clone())
                    .unwrap_or_default(),
                group_seq,
                role: assignment.role,
                index: assignment.index,
            },
        ));

        Ok(ExperimentState {
            assignment,
            global_seq,
            group_seq,
            seed_index,
            descriptor,
            peers,
            baseline,
            ledger: Arc::new(Mutex::new(LedgerMatrix::new())),
            emitter,
        })
    }

    /// All rounds for one permutation. Returns the number of rounds run.
    async fn run_permutation(
        &self,
        state: &ExperimentState,
        p: usize,
        permutation: &Permutation,
    ) -> ExperimentResult<usize> {
        let role = state.assignment.role;

        self.shaper
            .apply(&permutation.network, role, state.assignment.index)
            .await?;
        self.sync
            .signal_and_wait_for_all(&topics::setup_network(p))
            .await?;

        self.sync
            .signal_and_wait_for_all(&topics::start_cid_publish(p))
            .await?;

        // Only the configured fraction of holders seeds content.
        let seeders = self.config.seeding_holder_count();
        let is_seeder = role == Role::Holder && (state.seed_index as usize) < seeders;

        let payload = permutation.payload.with_seed_offset(state.seed_index);
        let own_cid = if is_seeder {
            let cid = self.node.publish_payload(&payload).await?;
            tracing::info!(%cid, permutation = p, "published content id");
            self.sync.publish(&topics::root_cid(p), &cid).await?;
            Some(cid)
        } else {
            None
        };

        let cids: Vec<ContentId> = if role == Role::Requester {
            let collected: Vec<ContentId> = self
                .sync
                .subscribe_collect(&topics::root_cid(p), seeders)
                .await?;
            let mut unique = Vec::with_capacity(collected.len());
            for cid in collected {
                if !unique.contains(&cid) {
                    unique.push(cid);
                }
            }
            tracing::info!(cids = unique.len(), permutation = p, "collected content ids");
            unique
        } else {
            Vec::new()
        };

        self.sync
            .signal_and_wait_for_all(&topics::injest_complete(p))
            .await?;

        let baseline_fetch = if self.config.baseline_transfer {
            self.run_baseline(state, p, &payload, is_seeder).await?
        } else {
            None
        };

        for run in 1..=self.config.run_count {
            self.run_round(state, p, run, permutation, &cids, baseline_fetch)
                .await?;
        }

        // Holders keep their store across runs of a permutation and drop it
        // between payload sizes: published content first, then the store.
        if role == Role::Holder {
            if let Some(cid) = &own_cid {
                self.node
                    .remove_content(cid)
                    .await
                    .map_err(ExperimentError::cleanup)?;
            }
            self.node
                .clear_store()
                .await
                .map_err(ExperimentError::cleanup)?;
        }

        Ok(self.config.run_count)
    }

    /// Out-of-band reference transfer, timed once per permutation.
    async fn run_baseline(
        &self,
        state: &ExperimentState,
        p: usize,
        payload: &PayloadSpec,
        is_seeder: bool,
    ) -> ExperimentResult<Option<Duration>> {
        let baseline = self
            .node
            .baseline()
            .ok_or_else(|| ExperimentError::config("node has no baseline capability"))?;

        match state.assignment.role {
            Role::Holder if is_seeder => {
                let addr = baseline.serve(payload).await?;
                tracing::info!(addr, "serving baseline transfer");
                self.sync.publish(&topics::tcp_addr(p), &addr).await?;
                self.sync
                    .signal_and_wait_for_all(&topics::tcp_fetch(p))
                    .await?;
                baseline.stop_serving().await?;
                Ok(None)
            }
            Role::Requester => {
                let addrs: Vec<String> =
                    self.sync.subscribe_collect(&topics::tcp_addr(p), 1).await?;
                let started = Instant::now();
                let bytes = baseline.fetch(&addrs[0]).await?;
                let elapsed = started.elapsed();
                tracing::info!(bytes, ?elapsed, "baseline fetch complete");
                self.sync
                    .signal_and_wait_for_all(&topics::tcp_fetch(p))
                    .await?;
                Ok(Some(elapsed))
            }
            _ => {
                self.sync
                    .signal_and_wait_for_all(&topics::tcp_fetch(p))
                    .await?;
                Ok(None)
            }
        }
    }

    /// One barrier-ordered round.
    #[allow(clippy::too_many_arguments)]
    async fn run_round(
        &self,
        state: &ExperimentState,
        p: usize,
        run: usize,
        permutation: &Permutation,
        cids: &[ContentId],
        baseline_fetch: Option<Duration>,
    ) -> ExperimentResult<()> {
        let run_id = topics::run_id(p, run);
        let role = state.assignment.role;

        self.sync
            .signal_and_wait_for_all(&topics::start_run(&run_id))
            .await?;
        tracing::info!(
            run_id,
            run,
            total = self.config.run_count,
            bytes = permutation.payload.nominal_size(),
            "starting round"
        );

        // Connection phase: role-pairing dial set at a bounded rate.
        let targets = dialer::dial_targets(role, &state.descriptor.id, &state.peers);
        let limiter = DialRateLimiter::new(self.config.max_connection_rate);
        let dialed = match tokio::time::timeout(
            self.config.run_timeout(),
            dialer::dial_all(self.node.as_ref(), &targets, &limiter),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => return Err(ExperimentError::Timeout(self.config.run_timeout())),
        };
        tracing::info!(dialed, run_id, "dialed peers");
        self.sync
            .signal_and_wait_for_all(&topics::connect_complete(&run_id))
            .await?;

        // Ledger initialization: reset the matrix to its configured
        // baseline, then push each pair's debt into the node.
        let ops = self.ledger_ops()?;
        {
            let mut matrix = state.ledger.lock().await;
            match &self.config.debt_ratios {
                Some(ratios) => matrix.reset_scaled(&state.baseline, ratios),
                None => matrix.reset_from_baseline(&state.baseline),
            }

            let me = state.self_ref();
            for peer in &state.peers {
                if peer.id == state.descriptor.id {
                    continue;
                }
                let other = PeerRef::new(peer.role, peer.index);

                let sent = matrix.get(me, other);
                if sent != 0 {
                    tracing::debug!(peer = %peer.id, bytes = sent, "seeding ledger sent bytes");
                    ops.set_ledger_sent_bytes(&peer.id, sent);
                }

                let received = matrix.get(other, me);
                if received != 0 {
                    tracing::debug!(peer = %peer.id, bytes = received, "seeding ledger received bytes");
                    ops.set_ledger_received_bytes(&peer.id, received);
                }
            }
        }
        self.sync
            .signal_and_wait_for_all(&topics::ledgers_initialized(&run_id))
            .await?;

        // Sampler runs for the whole timed portion; it is stopped and
        // joined below before any metric is read.
        let sampler = sampler::spawn(SamplerContext {
            node: Arc::clone(&self.node),
            peers: state.peers.clone(),
            self_id: state.descriptor.id.clone(),
            self_ref: state.self_ref(),
            ledger: Arc::clone(&state.ledger),
            emitter: Arc::clone(&state.emitter),
            run,
            interval: Duration::from_millis(self.config.sample_interval_ms),
        });

        let exchange = async {
            self.sync
                .signal_and_wait_for_all(&topics::metric_gathering_started(&run_id))
                .await?;

            let outcome = if role == Role::Requester {
                self.exchange_phase(state, &run_id, cids).await?
            } else {
                (None, 0)
            };

            self.sync
                .signal_and_wait_for_all(&topics::transfer_complete(&run_id))
                .await?;
            Ok::<_, ExperimentError>(outcome)
        }
        .await;

        sampler.stop().await?;
        let (time_to_fetch, failures) = exchange?;

        if failures > 0 {
            return Err(ExperimentError::FetchFailed { run_id, failures });
        }

        let stats = self.node.stat()?;
        state.emitter.emit_round(&RoundRecord {
            run,
            latency_ms: permutation.network.latency_ms,
            bandwidth_mb: permutation.network.bandwidth_mb,
            payload_size: permutation.payload.nominal_size(),
            time_to_fetch,
            baseline_fetch,
            fetch_failures: failures,
            stats,
            recorded_at: chrono::Utc::now(),
        });

        // Cleanup ordering is fixed: disconnect, remove content, clear the
        // store, then signal run-complete.
        self.node
            .disconnect_all()
            .await
            .map_err(ExperimentError::cleanup)?;
        if role == Role::Requester {
            for cid in cids {
                self.node
                    .remove_content(cid)
                    .await
                    .map_err(ExperimentError::cleanup)?;
            }
        }
        if role != Role::Holder {
            self.node
                .clear_store()
                .await
                .map_err(ExperimentError::cleanup)?;
        }
        self.sync
            .signal_and_wait_for_all(&topics::run_complete(&run_id))
            .await?;

        Ok(())
    }

    /// Wave-staggered fetch of every collected content id.
    ///
    /// Returns the fetch wall time (when every id arrived) and the failure
    /// count. Failures are counted, never retried within the round.
    async fn exchange_phase(
        &self,
        state: &ExperimentState,
        run_id: &str,
        cids: &[ContentId],
    ) -> ExperimentResult<(Option<Duration>, u64)> {
        let (requester_count, _) = self.config.effective_counts();
        let wave_count = self.config.wave_count;
        let mut time_to_fetch = None;
        let mut failures = 0u64;

        for wave in 0..wave_count {
            if wave_of(state.assignment.index, wave_count) == wave {
                // Stagger the first request from each requester.
                let delay = self.config.request_stagger() * (state.global_seq - 1) as u32;
                if !delay.is_zero() {
                    tracing::info!(?delay, wave, "staggering fetch start");
                    tokio::time::sleep(delay).await;
                }

                tracing::info!(wave, cids = cids.len(), run_id, "starting fetch wave");
                let started = Instant::now();
                match tokio::time::timeout(
                    self.config.fetch_timeout(),
                    self.node.fetch_all(cids, &state.peers),
                )
                .await
                {
                    Ok(results) => {
                        for (cid, result) in cids.iter().zip(&results) {
                            match result {
                                Ok(bytes) => {
                                    tracing::debug!(%cid, bytes, "fetch complete");
                                }
                                Err(err) => {
                                    failures += 1;
                                    tracing::warn!(%cid, error = %err, "fetch failed");
                                }
                            }
                        }
                        if failures == 0 {
                            time_to_fetch = Some(started.elapsed());
                        }
                    }
                    Err(_) => {
                        failures += cids.len() as u64;
                        tracing::warn!(
                            deadline = ?self.config.fetch_timeout(),
                            "fetch deadline elapsed, counting outstanding ids as failed"
                        );
                    }
                }
            }

            if wave < wave_count - 1 {
                tokio::time::sleep(Duration::from_millis(self.config.inter_wave_pause_ms)).await;
            }

            // Wave gate counts requesters only.
            self.sync
                .barrier(&topics::leech_wave(run_id, wave), requester_count as u64)
                .await?;
        }

        Ok((time_to_fetch, failures))
    }
}

impl std::fmt::Debug for ExperimentRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExperimentRunner")
            .field("instances", &self.config.instance_count)
            .field("permutations", &self.config.permutations.len())
            .field("run_count", &self.config.run_count)
            .finish()
    }
}
