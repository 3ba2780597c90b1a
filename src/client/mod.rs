//! Client side of the execution-log contract
//!
//! - `target`: the `KvTarget` seam a client issues operations through
//! - `executor`: sequential script execution and log persistence

pub mod executor;
pub mod target;

pub use executor::{run_client, ScriptExecutor};
pub use target::{KvTarget, ReadTarget, TargetError};
