//! Abstraction over the cluster a client talks to

use std::fmt;

use async_trait::async_trait;

/// Node a read is sent to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReadTarget {
    Primary,
    /// `replicas[index]`, bypassing the primary
    Replica(usize),
}

impl From<Option<usize>> for ReadTarget {
    fn from(replica: Option<usize>) -> Self {
        match replica {
            Some(idx) => ReadTarget::Replica(idx),
            None => ReadTarget::Primary,
        }
    }
}

impl fmt::Display for ReadTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadTarget::Primary => f.write_str("primary"),
            ReadTarget::Replica(idx) => write!(f, "replica {}", idx),
        }
    }
}

/// Errors a cluster can return for one operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetError {
    /// Read addressed a replica the cluster does not have
    NoSuchReplica(usize),
    /// The node could not be reached
    Unreachable(String),
}

impl fmt::Display for TargetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetError::NoSuchReplica(idx) => write!(f, "no replica at index {}", idx),
            TargetError::Unreachable(msg) => write!(f, "node unreachable: {}", msg),
        }
    }
}

impl std::error::Error for TargetError {}

/// Key-value operations a scripted client issues
///
/// Each call resolves only once the cluster has answered, which is what makes
/// a client's issue order equal to its log order.
#[async_trait]
pub trait KvTarget: Send + Sync {
    /// Write through the primary; returns the value the primary acknowledged
    async fn set(&self, key: &str, value: &str) -> Result<String, TargetError>;

    /// Read a key; `None` when the node has no record of it
    async fn get(&self, key: &str, from: ReadTarget) -> Result<Option<String>, TargetError>;
}
