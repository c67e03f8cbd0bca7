//! swapbench-sync: rendezvous layer for distributed experiments
//!
//! This crate wraps the shared publish/subscribe/counter service that
//! coordinates independent experiment processes:
//!
//! - [`SyncService`]: the transport contract (ordered topics + state counters)
//! - [`SyncClient`]: typed publish, subscribe-until-N, and barrier primitives
//! - [`InMemoryService`]: a single-process service for tests and local runs
//!
//! All cross-process coordination is pull-free: a process never polls another
//! process directly, everything passes through the service.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod error;
pub mod memory;
pub mod service;

pub use client::SyncClient;
pub use error::{SyncError, SyncResult};
pub use memory::InMemoryService;
pub use service::SyncService;
