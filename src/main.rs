//! swapbench - distributed content-exchange benchmark harness

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use swapbench_core::runner::ExperimentRunnerBuilder;
use swapbench_core::{ExchangeNode, ExperimentConfig, RecordSink};
use swapbench_sync::{InMemoryService, SyncService};

mod cli;
mod sim;

use sim::{LogSink, SimNetwork, SimNode};

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    match args.command {
        cli::Commands::Run { config } => run_local(&config).await,
        cli::Commands::Validate { config } => validate(&config),
    }
}

fn load_config(path: &str) -> Result<ExperimentConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading configuration from {path}"))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing configuration from {path}"))
}

fn validate(path: &str) -> Result<()> {
    let config = load_config(path)?;
    config.validate()?;
    tracing::info!(
        instances = config.instance_count,
        requesters = config.requester_count,
        observers = config.observer_count,
        holders = config.holder_count(),
        permutations = config.permutations.len(),
        "configuration is valid"
    );
    Ok(())
}

/// Run the whole population in-process over the in-memory sync service.
async fn run_local(path: &str) -> Result<()> {
    let config = load_config(path)?;
    config.validate()?;

    let service = InMemoryService::new();
    let network = SimNetwork::new();
    let sink = Arc::new(LogSink::default());

    tracing::info!(
        instances = config.instance_count,
        rounds = config.run_count * config.permutations.len(),
        "starting local experiment"
    );

    let mut handles = Vec::with_capacity(config.instance_count);
    for i in 0..config.instance_count {
        let runner = ExperimentRunnerBuilder::new()
            .config(config.clone())
            .node(SimNode::new(format!("sim-{i}"), Arc::clone(&network)) as Arc<dyn ExchangeNode>)
            .service(Arc::clone(&service) as Arc<dyn SyncService>)
            .sink(Arc::clone(&sink) as Arc<dyn RecordSink>)
            .build()?;
        handles.push(tokio::spawn(runner.run()));
    }

    for (i, handle) in handles.into_iter().enumerate() {
        let summary = handle
            .await
            .with_context(|| format!("process {i} panicked"))?
            .with_context(|| format!("process {i} failed"))?;
        tracing::info!(
            process = i,
            role = %summary.assignment.role,
            index = summary.assignment.index,
            seq = summary.global_seq,
            rounds = summary.rounds,
            "process finished"
        );
    }

    tracing::info!(points = sink.total(), "experiment complete");
    Ok(())
}
