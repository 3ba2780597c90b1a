//! Execution logs: the record a client leaves behind for the oracle
//!
//! - `entry`: typed entries and the versioned text form
//! - `file`: per-client log paths and atomic, write-once persistence
//! - `transcript`: the reference Go client's running transcript

pub mod entry;
pub mod file;
mod transcript;

use serde::{Deserialize, Serialize};

pub use entry::{ExecutionLog, LogEntry, Observed, Opcode, LOG_VERSION};
pub use file::{log_path, read_log, read_log_as, write_log};

/// Text form the oracle expects client logs in
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientLogFormat {
    /// Decide per file from its first line
    #[default]
    Auto,
    /// `<opcode> <key> <value> <latencyMs>` lines under a version header
    Structured,
    /// `INITIATED` / `RECEIVED` / `FINISHED` lines
    Transcript,
}

impl ClientLogFormat {
    /// Parse log text. Errors carry the 1-based line number.
    pub fn parse(self, text: &str) -> Result<ExecutionLog, (Option<usize>, String)> {
        match self {
            ClientLogFormat::Structured => ExecutionLog::parse(text),
            ClientLogFormat::Transcript => transcript::parse(text),
            ClientLogFormat::Auto if transcript::is_transcript(text) => transcript::parse(text),
            ClientLogFormat::Auto => ExecutionLog::parse(text),
        }
    }
}
