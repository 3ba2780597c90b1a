//! Scenario verdicts and the human-readable summary

use std::fmt;

use serde::Serialize;

use super::predicate::PredicateFailure;
use crate::model::NodeAddress;

/// Latency of one probed entry; `None` when the entry does not exist
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LatencyReport {
    pub label: String,
    pub client: NodeAddress,
    pub latency_ms: Option<u64>,
}

impl fmt::Display for LatencyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.latency_ms {
            Some(ms) => write!(f, "Latency of {} ({}): {} ms", self.label, self.client, ms),
            None => write!(f, "Latency of {} ({}): missing", self.label, self.client),
        }
    }
}

/// Outcome of evaluating one scenario's predicates
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Verdict {
    pub scenario: String,
    pub latencies: Vec<LatencyReport>,
    pub failures: Vec<PredicateFailure>,
    pub predicates_checked: usize,
}

impl Verdict {
    /// Conjunction of every predicate
    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for latency in &self.latencies {
            writeln!(f, "{}", latency)?;
        }
        for failure in &self.failures {
            writeln!(f, "  failed: {}", failure)?;
        }
        if self.passed() {
            write!(f, "{}: PASS ({} checks)", self.scenario, self.predicates_checked)
        } else {
            write!(
                f,
                "{}: FAIL ({} of {} checks failed)",
                self.scenario,
                self.failures.len(),
                self.predicates_checked
            )
        }
    }
}
