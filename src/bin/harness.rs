//! distkv-harness binary
//!
//! Usage:
//!   distkv-harness list
//!   distkv-harness run [--scenario NAME]... [--config FILE] [--json]
//!   distkv-harness simulate [--scenario NAME]... [--propagation-step-ms N] [--json]
//!   distkv-harness check --scenario NAME [--config FILE] [--json]
//!   distkv-harness validate --topology FILE [--scripts DIR]
//!
//! Exit status is 0 when every scenario passed, 1 when any failed or aborted,
//! and 2 on malformed inputs or configuration.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use distkv_harness::config::HarnessConfig;
use distkv_harness::oracle::{self, Oracle, Verdict};
use distkv_harness::orchestrator;
use distkv_harness::runner::{self, BatchReport, Execution};
use distkv_harness::scenario::{self, Scenario};
use distkv_harness::{logging, HarnessError, Result};

/// Consistency test harness for a primary/replica key-value cluster
#[derive(Parser, Debug)]
#[command(name = "distkv-harness", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the built-in scenarios
    List,
    /// Run scenarios against spawned cluster processes
    Run {
        #[command(flatten)]
        selection: Selection,
        #[command(flatten)]
        config: ConfigArgs,
    },
    /// Run scenarios in-process against a simulated cluster
    Simulate {
        #[command(flatten)]
        selection: Selection,
        #[command(flatten)]
        config: ConfigArgs,
        /// Delay before each successive replica applies a write
        #[arg(long = "propagation-step-ms", default_value_t = 5000)]
        propagation_step_ms: u64,
    },
    /// Re-evaluate a scenario against logs already in the output directory
    Check {
        #[arg(short = 's', long = "scenario")]
        scenario: String,
        #[command(flatten)]
        config: ConfigArgs,
        #[arg(long = "json")]
        json: bool,
    },
    /// Parse and cross-check a topology file and its client scripts
    Validate {
        #[arg(long = "topology")]
        topology: PathBuf,
        /// Directory holding one script per client, named `<host>_<port>`
        #[arg(long = "scripts")]
        scripts: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
struct Selection {
    /// Scenario to run; repeat for several. Defaults to every built-in.
    #[arg(short = 's', long = "scenario")]
    scenarios: Vec<String>,
    /// Print the report as JSON
    #[arg(long = "json")]
    json: bool,
}

#[derive(Args, Debug)]
struct ConfigArgs {
    /// TOML configuration file
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,
    #[arg(long = "input-dir")]
    input_dir: Option<PathBuf>,
    #[arg(long = "output-dir")]
    output_dir: Option<PathBuf>,
    /// How long to wait for every client's log
    #[arg(long = "log-timeout-ms")]
    log_timeout_ms: Option<u64>,
    /// Overrides the configured log level
    #[arg(long = "log-level")]
    log_level: Option<String>,
}

impl ConfigArgs {
    fn load(&self) -> Result<HarnessConfig> {
        let mut config = match &self.config {
            Some(path) => HarnessConfig::load(path).map_err(|e| match e {
                HarnessError::Io { path, source } => {
                    HarnessError::Config(format!("cannot read {}: {}", path.display(), source))
                }
                other => other,
            })?,
            None => HarnessConfig::default(),
        };
        if let Some(dir) = &self.input_dir {
            config.paths.input_dir = dir.clone();
        }
        if let Some(dir) = &self.output_dir {
            config.paths.output_dir = dir.clone();
        }
        if let Some(ms) = self.log_timeout_ms {
            config = config.with_log_timeout(Duration::from_millis(ms));
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        config.validate()?;
        logging::init(&config.logging);
        Ok(config)
    }
}

fn select(names: &[String]) -> Result<Vec<Scenario>> {
    if names.is_empty() {
        return scenario::builtin();
    }
    names.iter().map(|name| scenario::by_name(name)).collect()
}

fn print_batch(report: &BatchReport, json: bool) {
    if json {
        println!("{}", report.to_json());
    } else {
        println!("{}", report);
    }
}

fn print_verdict(verdict: &Verdict, json: bool) {
    if json {
        match serde_json::to_string_pretty(verdict) {
            Ok(text) => println!("{}", text),
            Err(e) => eprintln!("error: could not encode verdict: {}", e),
        }
    } else {
        println!("{}", verdict);
    }
}

fn batch_status(report: &BatchReport) -> ExitCode {
    if report.all_passed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    }
}

fn validate_files(topology_path: &Path, scripts_dir: Option<&PathBuf>) -> Result<String> {
    let topology = orchestrator::read_topology(topology_path)?;

    let Some(dir) = scripts_dir else {
        return Ok(format!(
            "{}: {} replicas, {} clients",
            topology_path.display(),
            topology.replicas().len(),
            topology.clients().len()
        ));
    };

    let scripts = orchestrator::read_scripts(dir, &topology)?;
    let scenario = scripts
        .into_iter()
        .fold(Scenario::new("files", topology), |s, (client, script)| s.with_script(client, script));
    scenario.validate()?;
    Ok(format!(
        "{}: {} replicas, {} clients, scripts valid",
        topology_path.display(),
        scenario.topology().replicas().len(),
        scenario.scripts().len()
    ))
}

async fn execute(command: Command) -> Result<ExitCode> {
    match command {
        Command::List => {
            for scenario in scenario::builtin()? {
                println!(
                    "{}\t{} clients, {} checks",
                    scenario.name(),
                    scenario.topology().clients().len(),
                    scenario.predicates().len()
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Run { selection, config } => {
            let config = config.load()?;
            let scenarios = select(&selection.scenarios)?;
            let report = runner::run_batch(&config, &scenarios, Execution::Processes).await?;
            print_batch(&report, selection.json);
            Ok(batch_status(&report))
        }
        Command::Simulate {
            selection,
            config,
            propagation_step_ms,
        } => {
            let config = config.load()?;
            let scenarios = select(&selection.scenarios)?;
            let execution = Execution::Simulated {
                propagation_step: Duration::from_millis(propagation_step_ms),
            };
            let report = runner::run_batch(&config, &scenarios, execution).await?;
            print_batch(&report, selection.json);
            Ok(batch_status(&report))
        }
        Command::Check {
            scenario,
            config,
            json,
        } => {
            let config = config.load()?;
            let scenario = scenario::by_name(&scenario)?;
            let logs = Oracle::new(&config).read_existing(scenario.topology().clients())?;
            let verdict = oracle::evaluate(&scenario, &logs);
            print_verdict(&verdict, json);
            Ok(if verdict.passed() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            })
        }
        Command::Validate { topology, scripts } => {
            println!("{}", validate_files(&topology, scripts.as_ref())?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match execute(cli.command).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {}", e);
            if e.is_structural() {
                ExitCode::from(2)
            } else {
                ExitCode::from(1)
            }
        }
    }
}
