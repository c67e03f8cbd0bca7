//! swapbench-core: distributed experiment orchestration engine
//!
//! Coordinates independent peer processes through reproducible, multi-phase
//! benchmark rounds of a content-exchange protocol:
//!
//! - Deterministic role assignment from a shared sequence counter ([`role`])
//! - Barrier-ordered phase progression over the rendezvous service
//!   ([`runner`], [`topics`])
//! - Sparse per-peer-pair byte accounting ([`ledger`])
//! - Scope-path metric emission ([`metrics`])
//!
//! The engine is protocol-agnostic: the exchange protocol, the network
//! emulation driver, and the telemetry pipeline are reached only through the
//! capability traits in [`traits`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod dialer;
pub mod error;
pub mod ledger;
pub mod metrics;
pub mod peer;
pub mod role;
pub mod runner;
pub mod topics;
pub mod traits;

pub use config::{
    ConfigError, DebtEntry, ExperimentConfig, GroupOverride, NetworkParams, PayloadSpec,
    Permutation,
};
pub use error::{ExperimentError, ExperimentResult};
pub use ledger::{LedgerMatrix, PeerRef};
pub use metrics::{MetricsEmitter, MetricsScope, RoundRecord};
pub use peer::{ContentId, PeerDescriptor, PeerId};
pub use role::{assign, Role, RoleAssignment};
pub use runner::{ExperimentRunner, ExperimentRunnerBuilder, ExperimentSummary};
pub use traits::{
    BaselineTransfer, ExchangeNode, LedgerOps, LedgerReceipt, NetworkShaper, NodeError, NodeStats,
    NoopShaper, RecordSink,
};
