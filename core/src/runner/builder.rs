//! Builder pattern for ExperimentRunner construction

use std::sync::Arc;

use swapbench_sync::{SyncClient, SyncService};

use crate::config::ExperimentConfig;
use crate::error::{ExperimentError, ExperimentResult};
use crate::traits::{ExchangeNode, NetworkShaper, NoopShaper, RecordSink};

use super::executor::ExperimentRunner;

/// Builder for creating an [`ExperimentRunner`] with validation.
///
/// Capability checks happen here, once, before any round runs: a node
/// without ledger support (or without baseline-transfer support when the
/// baseline is enabled) is a configuration error, not a mid-round surprise.
pub struct ExperimentRunnerBuilder {
    config: Option<ExperimentConfig>,
    node: Option<Arc<dyn ExchangeNode>>,
    service: Option<Arc<dyn SyncService>>,
    shaper: Option<Arc<dyn NetworkShaper>>,
    sink: Option<Arc<dyn RecordSink>>,
}

impl ExperimentRunnerBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self {
            config: None,
            node: None,
            service: None,
            shaper: None,
            sink: None,
        }
    }

    /// Set the experiment configuration.
    pub fn config(mut self, config: ExperimentConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the node-under-test.
    pub fn node(mut self, node: Arc<dyn ExchangeNode>) -> Self {
        self.node = Some(node);
        self
    }

    /// Set the synchronization service shared by all processes.
    pub fn service(mut self, service: Arc<dyn SyncService>) -> Self {
        self.service = Some(service);
        self
    }

    /// Set the network shaping driver. Defaults to [`NoopShaper`].
    pub fn shaper(mut self, shaper: Arc<dyn NetworkShaper>) -> Self {
        self.shaper = Some(shaper);
        self
    }

    /// Set the telemetry sink.
    pub fn sink(mut self, sink: Arc<dyn RecordSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Build the runner.
    ///
    /// # Errors
    ///
    /// Returns an error if a required field is missing, the configuration is
    /// invalid, or the node lacks a capability the configuration requires.
    pub fn build(self) -> ExperimentResult<ExperimentRunner> {
        let config = self.config.ok_or_else(|| ExperimentError::missing("config"))?;
        let node = self.node.ok_or_else(|| ExperimentError::missing("node"))?;
        let service = self
            .service
            .ok_or_else(|| ExperimentError::missing("service"))?;
        let sink = self.sink.ok_or_else(|| ExperimentError::missing("sink"))?;
        let shaper = self.shaper.unwrap_or_else(|| Arc::new(NoopShaper));

        config.validate()?;

        if node.ledger_ops().is_none() {
            return Err(ExperimentError::config(
                "node does not support ledger operations; unsupported node type",
            ));
        }

        if config.baseline_transfer && node.baseline().is_none() {
            return Err(ExperimentError::config(
                "baseline_transfer enabled but the node has no baseline capability",
            ));
        }

        let sync = SyncClient::new(service, config.instance_count as u64, config.timeout());

        Ok(ExperimentRunner::new(config, node, shaper, sink, sync))
    }
}

impl Default for ExperimentRunnerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
