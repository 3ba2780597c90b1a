//! Consistency oracle
//!
//! Waits for every expected execution log, parses them, and evaluates a
//! scenario's predicates into a [`Verdict`]. A log that never appears is a
//! hard error; predicates that do not hold are reported inside the verdict.

mod predicate;
pub mod sequential;
mod verdict;

use predicate::check_token;
pub use predicate::{Expectation, LatencyProbe, Predicate, PredicateFailure, Scope};
pub use verdict::{LatencyReport, Verdict};

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result};
use crate::log::{self, ClientLogFormat, ExecutionLog};
use crate::model::NodeAddress;
use crate::scenario::Scenario;

/// Parsed logs of one run, keyed by client
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LogSet {
    logs: BTreeMap<NodeAddress, ExecutionLog>,
}

impl LogSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, client: NodeAddress, log: ExecutionLog) {
        self.logs.insert(client, log);
    }

    pub fn get(&self, client: &NodeAddress) -> Option<&ExecutionLog> {
        self.logs.get(client)
    }

    pub fn len(&self) -> usize {
        self.logs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.logs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NodeAddress, &ExecutionLog)> {
        self.logs.iter()
    }

    pub fn as_map(&self) -> &BTreeMap<NodeAddress, ExecutionLog> {
        &self.logs
    }
}

impl FromIterator<(NodeAddress, ExecutionLog)> for LogSet {
    fn from_iter<I: IntoIterator<Item = (NodeAddress, ExecutionLog)>>(iter: I) -> Self {
        LogSet {
            logs: iter.into_iter().collect(),
        }
    }
}

pub struct Oracle {
    output_dir: PathBuf,
    log_timeout: Duration,
    poll_interval: Duration,
    log_format: ClientLogFormat,
}

impl Oracle {
    pub fn new(config: &HarnessConfig) -> Self {
        Oracle {
            output_dir: config.paths.output_dir.clone(),
            log_timeout: config.timing.log_timeout(),
            poll_interval: config.timing.poll_interval(),
            log_format: config.oracle.log_format,
        }
    }

    /// Wait until every client's log exists, then parse them all.
    ///
    /// Presence is checked once more at the deadline itself; a log still
    /// absent then is reported as [`HarnessError::MissingLogFile`].
    pub async fn collect(&self, clients: &[NodeAddress]) -> Result<LogSet> {
        let start = Instant::now();
        let deadline = start + self.log_timeout;

        loop {
            let missing = self.first_missing(clients);
            let Some(client) = missing else {
                debug!(clients = clients.len(), elapsed = ?start.elapsed(), "all logs present");
                break;
            };

            let now = Instant::now();
            if now >= deadline {
                let path = log::log_path(&self.output_dir, client);
                warn!(client = %client, path = %path.display(), "log never appeared");
                return Err(HarnessError::MissingLogFile {
                    client: client.clone(),
                    path,
                    waited: start.elapsed(),
                });
            }
            sleep(self.poll_interval.min(deadline - now)).await;
        }

        self.read_all(clients)
    }

    /// Parse logs that must already exist, without waiting
    pub fn read_existing(&self, clients: &[NodeAddress]) -> Result<LogSet> {
        if let Some(client) = self.first_missing(clients) {
            return Err(HarnessError::MissingLogFile {
                client: client.clone(),
                path: log::log_path(&self.output_dir, client),
                waited: Duration::ZERO,
            });
        }
        self.read_all(clients)
    }

    /// Collect the scenario's logs and evaluate it
    pub async fn check(&self, scenario: &Scenario) -> Result<Verdict> {
        let logs = self.collect(scenario.topology().clients()).await?;
        Ok(evaluate(scenario, &logs))
    }

    fn first_missing<'a>(&self, clients: &'a [NodeAddress]) -> Option<&'a NodeAddress> {
        clients
            .iter()
            .find(|client| !log::log_path(&self.output_dir, client).exists())
    }

    fn read_all(&self, clients: &[NodeAddress]) -> Result<LogSet> {
        clients
            .iter()
            .map(|client| -> Result<(NodeAddress, ExecutionLog)> {
                let log = log::read_log_as(&log::log_path(&self.output_dir, client), self.log_format)?;
                Ok((client.clone(), log))
            })
            .collect()
    }
}

/// Evaluate a scenario against parsed logs. Pure: the same logs always give
/// the same verdict.
pub fn evaluate(scenario: &Scenario, logs: &LogSet) -> Verdict {
    let latencies = scenario
        .probes()
        .iter()
        .map(|probe| LatencyReport {
            label: probe.label.clone(),
            client: probe.client.clone(),
            latency_ms: logs
                .get(&probe.client)
                .and_then(|log| log.entry(probe.position))
                .map(|entry| entry.latency_ms()),
        })
        .collect();

    let failures: Vec<PredicateFailure> = scenario
        .predicates()
        .iter()
        .filter_map(|predicate| check_predicate(scenario, predicate, logs).err())
        .collect();

    let verdict = Verdict {
        scenario: scenario.name().to_string(),
        latencies,
        failures,
        predicates_checked: scenario.predicates().len(),
    };

    if verdict.passed() {
        info!(scenario = %verdict.scenario, checks = verdict.predicates_checked, "scenario passed");
    } else {
        for failure in &verdict.failures {
            warn!(scenario = %verdict.scenario, %failure, "predicate failed");
        }
    }
    verdict
}

fn check_predicate(
    scenario: &Scenario,
    predicate: &Predicate,
    logs: &LogSet,
) -> std::result::Result<(), PredicateFailure> {
    match predicate {
        Predicate::Token {
            client,
            scope,
            expectation,
        } => match logs.get(client) {
            Some(log) => check_token(client, scope, expectation, log),
            None => Err(PredicateFailure {
                description: predicate.to_string(),
                client: Some(client.clone()),
                expected: expectation.to_string(),
                found: "no log".to_string(),
            }),
        },
        Predicate::SequentiallyConsistent => sequential::check(logs.as_map(), scenario.scripts()),
    }
}
