//! Verification predicates over parsed execution logs
//!
//! A predicate names a client's log, a scope inside it and a token that must be
//! present or absent. Tokens are compared against whole key/value fields, so
//! `12` never matches `120` or a latency of 12 ms.

use std::fmt;

use serde::Serialize;

use crate::log::{ExecutionLog, LogEntry};
use crate::model::NodeAddress;

/// Which fields of a log a predicate looks at
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Key and value fields of every entry
    WholeLog,
    /// Key and value fields of the entry at a 0-based position
    Entry(usize),
    /// Observed values of every `get` of a key
    ReadsOf(String),
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::WholeLog => f.write_str("log"),
            Scope::Entry(pos) => write!(f, "entry {}", pos),
            Scope::ReadsOf(key) => write!(f, "reads of {}", key),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Expectation {
    Contains(String),
    Lacks(String),
}

impl Expectation {
    fn holds(&self, fields: &[&str]) -> bool {
        match self {
            Expectation::Contains(token) => fields.iter().any(|f| *f == token.as_str()),
            Expectation::Lacks(token) => fields.iter().all(|f| *f != token.as_str()),
        }
    }
}

impl fmt::Display for Expectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expectation::Contains(token) => write!(f, "contains {:?}", token),
            Expectation::Lacks(token) => write!(f, "lacks {:?}", token),
        }
    }
}

/// One check a scenario requires
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Predicate {
    /// A token check against one client's log
    Token {
        client: NodeAddress,
        scope: Scope,
        expectation: Expectation,
    },
    /// The combined logs admit a sequentially consistent total order
    SequentiallyConsistent,
}

impl Predicate {
    pub fn token(client: NodeAddress, scope: Scope, expectation: Expectation) -> Self {
        Predicate::Token {
            client,
            scope,
            expectation,
        }
    }

    /// `client`'s log contains `token` in some key or value field
    pub fn log_contains(client: NodeAddress, token: impl Into<String>) -> Self {
        Self::token(client, Scope::WholeLog, Expectation::Contains(token.into()))
    }

    pub fn log_lacks(client: NodeAddress, token: impl Into<String>) -> Self {
        Self::token(client, Scope::WholeLog, Expectation::Lacks(token.into()))
    }

    pub fn entry_contains(client: NodeAddress, position: usize, token: impl Into<String>) -> Self {
        Self::token(client, Scope::Entry(position), Expectation::Contains(token.into()))
    }

    /// Every read of `key` by `client` returned something other than `token`
    pub fn reads_lack(client: NodeAddress, key: impl Into<String>, token: impl Into<String>) -> Self {
        Self::token(client, Scope::ReadsOf(key.into()), Expectation::Lacks(token.into()))
    }

    /// Client whose log the predicate reads, if it reads only one
    pub fn client(&self) -> Option<&NodeAddress> {
        match self {
            Predicate::Token { client, .. } => Some(client),
            Predicate::SequentiallyConsistent => None,
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Token {
                client,
                scope,
                expectation,
            } => write!(f, "{} {} {}", client, scope, expectation),
            Predicate::SequentiallyConsistent => f.write_str("logs are sequentially consistent"),
        }
    }
}

/// Evidence for a predicate that did not hold
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PredicateFailure {
    pub description: String,
    pub client: Option<NodeAddress>,
    pub expected: String,
    pub found: String,
}

impl fmt::Display for PredicateFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: expected {}, found {}",
            self.description, self.expected, self.found
        )
    }
}

/// Evaluate a token predicate against the client's log
pub(crate) fn check_token(
    client: &NodeAddress,
    scope: &Scope,
    expectation: &Expectation,
    log: &ExecutionLog,
) -> Result<(), PredicateFailure> {
    let failure = |found: String| PredicateFailure {
        description: format!("{} {} {}", client, scope, expectation),
        client: Some(client.clone()),
        expected: expectation.to_string(),
        found,
    };

    let fields: Vec<&str> = match scope {
        Scope::WholeLog => log.entries().iter().flat_map(LogEntry::data_fields).collect(),
        Scope::Entry(pos) => match log.entry(*pos) {
            Some(entry) => entry.data_fields().to_vec(),
            None => {
                return Err(failure(format!(
                    "no entry at position {} ({} entries)",
                    pos,
                    log.len()
                )))
            }
        },
        Scope::ReadsOf(key) => log.reads_of(key).map(|o| o.token()).collect(),
    };

    if expectation.holds(&fields) {
        return Ok(());
    }

    let found = match scope {
        Scope::Entry(pos) => log.entry(*pos).map(summarize).unwrap_or_default(),
        Scope::ReadsOf(_) if fields.is_empty() => "no reads".to_string(),
        Scope::ReadsOf(_) => format!("[{}]", fields.join(", ")),
        Scope::WholeLog if log.is_empty() => "empty log".to_string(),
        Scope::WholeLog => format!(
            "[{}]",
            log.entries().iter().map(summarize).collect::<Vec<_>>().join("; ")
        ),
    };
    Err(failure(found))
}

fn summarize(entry: &LogEntry) -> String {
    let [key, value] = entry.data_fields();
    format!("{} {} {}", entry.opcode, key, value)
}

/// Reports the latency of one log entry for operator visibility
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LatencyProbe {
    pub label: String,
    pub client: NodeAddress,
    pub position: usize,
}

impl LatencyProbe {
    pub fn new(label: impl Into<String>, client: NodeAddress, position: usize) -> Self {
        LatencyProbe {
            label: label.into(),
            client,
            position,
        }
    }
}
