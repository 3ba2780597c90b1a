//! Scenario execution
//!
//! A scenario runs either against real cluster processes (prepare, launch,
//! oracle, shutdown) or in-process, with each client's script executed as a
//! concurrent task against a [`KvTarget`]. Both paths end in the same oracle.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::client::{run_client, KvTarget};
use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result};
use crate::oracle::{Oracle, Verdict};
use crate::orchestrator::Orchestrator;
use crate::scenario::Scenario;
use crate::testing::InMemoryCluster;

/// Run a scenario against spawned cluster processes
pub async fn run_scenario(config: &HarnessConfig, scenario: &Scenario) -> Result<Verdict> {
    let orchestrator = Orchestrator::new(config);
    orchestrator.prepare(scenario)?;

    let supervisor = orchestrator.launch(scenario).await?;
    let verdict = Oracle::new(config).check(scenario).await;

    let report = supervisor.shutdown(config.timing.shutdown_grace()).await;
    if !report.killed.is_empty() {
        warn!(
            scenario = scenario.name(),
            killed = ?report.killed,
            "roles did not exit on their own"
        );
    }
    verdict
}

/// Run a scenario with every client executing in this process against `target`
pub async fn run_in_process(
    config: &HarnessConfig,
    scenario: &Scenario,
    target: Arc<dyn KvTarget>,
) -> Result<Verdict> {
    Orchestrator::new(config).prepare(scenario)?;

    let output_dir = &config.paths.output_dir;
    let clients = scenario.scripts().iter().map(|(client, script)| {
        let target = target.clone();
        async move { run_client(client.clone(), script, target, output_dir).await }
    });

    for result in join_all(clients).await {
        result?;
    }

    Oracle::new(config).check(scenario).await
}

/// How a batch executes its scenarios
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Execution {
    /// Spawn the configured role commands
    Processes,
    /// Run clients in-process against a fresh [`InMemoryCluster`] per scenario
    Simulated { propagation_step: Duration },
}

#[derive(Debug)]
pub enum ScenarioOutcome {
    Passed(Verdict),
    Failed(Verdict),
    Aborted(HarnessError),
}

impl ScenarioOutcome {
    fn from_result(result: Result<Verdict>) -> Self {
        match result {
            Ok(verdict) if verdict.passed() => ScenarioOutcome::Passed(verdict),
            Ok(verdict) => ScenarioOutcome::Failed(verdict),
            Err(err) => ScenarioOutcome::Aborted(err),
        }
    }

    pub fn passed(&self) -> bool {
        matches!(self, ScenarioOutcome::Passed(_))
    }

    pub fn verdict(&self) -> Option<&Verdict> {
        match self {
            ScenarioOutcome::Passed(v) | ScenarioOutcome::Failed(v) => Some(v),
            ScenarioOutcome::Aborted(_) => None,
        }
    }
}

#[derive(Debug)]
pub struct ScenarioReport {
    pub name: String,
    pub outcome: ScenarioOutcome,
    pub duration: Duration,
}

/// Result of a batch; one report per scenario, in run order
#[derive(Debug, Default)]
pub struct BatchReport {
    pub scenarios: Vec<ScenarioReport>,
}

impl BatchReport {
    pub fn all_passed(&self) -> bool {
        self.scenarios.iter().all(|s| s.outcome.passed())
    }

    pub fn to_json(&self) -> Value {
        let scenarios: Vec<Value> = self
            .scenarios
            .iter()
            .map(|report| {
                let (status, detail) = match &report.outcome {
                    ScenarioOutcome::Passed(v) => ("passed", json!(v)),
                    ScenarioOutcome::Failed(v) => ("failed", json!(v)),
                    ScenarioOutcome::Aborted(e) => ("aborted", json!({ "error": e.to_string() })),
                };
                json!({
                    "scenario": report.name,
                    "status": status,
                    "duration_ms": report.duration.as_millis() as u64,
                    "detail": detail,
                })
            })
            .collect();
        json!({ "passed": self.all_passed(), "scenarios": scenarios })
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for report in &self.scenarios {
            match &report.outcome {
                ScenarioOutcome::Passed(v) | ScenarioOutcome::Failed(v) => writeln!(f, "{}", v)?,
                ScenarioOutcome::Aborted(e) => writeln!(f, "{}: ABORTED ({})", report.name, e)?,
            }
        }
        let passed = self.scenarios.iter().filter(|s| s.outcome.passed()).count();
        write!(f, "{} of {} scenarios passed", passed, self.scenarios.len())
    }
}

/// Validate every scenario, then run them one after another.
///
/// A structural error in any scenario aborts the batch before anything is
/// launched. After that, each scenario's failure is recorded and the batch
/// continues.
pub async fn run_batch(
    config: &HarnessConfig,
    scenarios: &[Scenario],
    execution: Execution,
) -> Result<BatchReport> {
    config.validate()?;
    for scenario in scenarios {
        scenario.validate()?;
    }

    let mut report = BatchReport::default();
    for scenario in scenarios {
        info!(scenario = scenario.name(), ?execution, "running scenario");
        let started = Instant::now();

        let result = match execution {
            Execution::Processes => run_scenario(config, scenario).await,
            Execution::Simulated { propagation_step } => {
                let cluster = InMemoryCluster::new(scenario.topology(), propagation_step);
                run_in_process(config, scenario, cluster).await
            }
        };

        let outcome = ScenarioOutcome::from_result(result);
        if let ScenarioOutcome::Aborted(err) = &outcome {
            warn!(scenario = scenario.name(), error = %err, "scenario aborted");
        }
        report.scenarios.push(ScenarioReport {
            name: scenario.name().to_string(),
            outcome,
            duration: started.elapsed(),
        });
    }
    Ok(report)
}
