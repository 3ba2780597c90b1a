//! Error taxonomy for the harness
//!
//! Structural errors (malformed inputs, invalid scenarios, launch failures)
//! abort a run before a verdict can be computed. A missing log file is a hard
//! failure for one scenario. Predicate failures are not errors at all: they are
//! carried inside a [`Verdict`](crate::oracle::Verdict).

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::model::NodeAddress;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, HarnessError>;

#[derive(Debug, Error)]
pub enum HarnessError {
    /// Topology descriptor could not be parsed
    #[error("malformed topology{}: {reason}", line_suffix(.line))]
    MalformedTopology { line: Option<usize>, reason: String },

    /// Instruction script could not be parsed
    #[error("malformed instruction script{}: {reason}", line_suffix(.line))]
    MalformedInstructionScript { line: Option<usize>, reason: String },

    /// Execution log on disk does not follow the log format
    #[error("malformed execution log {path:?}{}: {reason}", line_suffix(.line))]
    MalformedLog {
        path: PathBuf,
        line: Option<usize>,
        reason: String,
    },

    /// Input files are individually valid but inconsistent with each other
    #[error("invalid scenario: {0}")]
    InvalidScenario(String),

    /// A client's log did not appear before the oracle timed out
    #[error("missing log file for client {client} at {path:?} after waiting {waited:?}")]
    MissingLogFile {
        client: NodeAddress,
        path: PathBuf,
        waited: Duration,
    },

    /// A role process could not be started
    #[error("failed to launch {role} ({command}): {source}")]
    ProcessLaunch {
        role: String,
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// A role process started but never accepted connections
    #[error("{role} at {address} not ready after {waited:?}")]
    ReadinessTimeout {
        role: String,
        address: NodeAddress,
        waited: Duration,
    },

    /// Logs are written at most once per client per run
    #[error("execution log already written at {path:?}")]
    LogAlreadyWritten { path: PathBuf },

    /// The cluster under test failed an operation issued by a client
    #[error("client {client}: {reason}")]
    Target { client: NodeAddress, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl HarnessError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        HarnessError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn topology(line: Option<usize>, reason: impl Into<String>) -> Self {
        HarnessError::MalformedTopology {
            line,
            reason: reason.into(),
        }
    }

    pub(crate) fn script(line: Option<usize>, reason: impl Into<String>) -> Self {
        HarnessError::MalformedInstructionScript {
            line,
            reason: reason.into(),
        }
    }

    /// Structural errors must stop the run before any process is launched
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            HarnessError::MalformedTopology { .. }
                | HarnessError::MalformedInstructionScript { .. }
                | HarnessError::InvalidScenario(_)
                | HarnessError::Config(_)
        )
    }
}

fn line_suffix(line: &Option<usize>) -> String {
    match line {
        Some(n) => format!(" (line {})", n),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_line_number() {
        let err = HarnessError::topology(Some(3), "address before any section keyword");
        assert_eq!(
            err.to_string(),
            "malformed topology (line 3): address before any section keyword"
        );

        let err = HarnessError::script(None, "missing exit");
        assert_eq!(err.to_string(), "malformed instruction script: missing exit");
    }

    #[test]
    fn test_structural_classification() {
        assert!(HarnessError::InvalidScenario("x".into()).is_structural());
        assert!(!HarnessError::LogAlreadyWritten {
            path: PathBuf::from("a.txt")
        }
        .is_structural());
    }
}
