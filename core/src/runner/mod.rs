//! Experiment run loop
//!
//! The runner drives one process through the whole experiment lifecycle:
//!
//! 1. Initialization: publish identity, derive the role from the sequence
//!    counter, publish the peer descriptor, collect everyone else's.
//! 2. Per permutation: apply network shaping, publish/collect content ids,
//!    optionally time an out-of-band baseline transfer.
//! 3. Per round: dial by role pairing, seed node ledgers from the matrix,
//!    start the background sampler, run the staggered fetch waves, emit
//!    metrics, clean up.
//!
//! Every transition crosses a named barrier, so the population advances in
//! lockstep or not at all. Any barrier timeout, fetch failure, or cleanup
//! error aborts the experiment; retries belong to a higher-level driver.
//!
//! # Example
//!
//! ```ignore
//! use swapbench_core::runner::ExperimentRunnerBuilder;
//!
//! let runner = ExperimentRunnerBuilder::new()
//!     .config(config)
//!     .node(node)
//!     .service(service)
//!     .sink(sink)
//!     .build()?;
//!
//! let summary = runner.run().await?;
//! println!("completed {} rounds as {}", summary.rounds, summary.assignment.role);
//! ```

mod builder;
mod executor;
mod sampler;

pub use builder::ExperimentRunnerBuilder;
pub use executor::{wave_of, ExperimentRunner, ExperimentSummary};

#[cfg(test)]
mod tests;
