//! Black-box consistency harness for a primary/replica key-value cluster
//!
//! The harness writes a topology and one instruction script per client,
//! launches the cluster roles, waits for every client's execution log and
//! checks the logs against the scenario's consistency predicates.
//!
//! The same scenarios can run in-process against [`testing::InMemoryCluster`],
//! which models the primary/replica propagation window.

pub mod client;
pub mod config;
pub mod error;
pub mod log;
pub mod logging;
pub mod model;
pub mod oracle;
pub mod orchestrator;
pub mod runner;
pub mod scenario;

/// In-memory cluster used by `simulate` and the tests
pub mod testing;

pub use error::{HarnessError, Result};
