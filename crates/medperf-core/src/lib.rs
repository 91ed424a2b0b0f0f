//! Compatibility-test orchestration over the medperf resource cache.
//!
//! [`resolve_and_run`] validates a combination of inputs, materializes the
//! cubes and dataset they name, and either returns a stored report for the
//! same combination or executes the test and persists a new one.

pub mod comms;
pub mod config;
pub mod cube;
pub mod dataset;
pub mod effects;
pub mod entities;
mod error;
pub mod pipeline;
pub mod records;
pub mod report;
pub mod resolver;
pub mod sandbox;

pub use config::Config;
pub use effects::{Effects, ExecutionSummary, Results, SharedEffects, SystemEffects};
pub use error::{error_kind, FailureKind, TestError};
pub use pipeline::{resolve_and_run, TestContext, TestOutcome, TestRequest};
pub use resolver::{DataSource, TestParams};

#[cfg(test)]
pub(crate) mod testing;
