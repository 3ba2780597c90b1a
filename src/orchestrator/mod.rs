//! Process orchestration
//!
//! Prepares the on-disk inputs of a scenario and launches the cluster roles
//! that consume them.

pub mod layout;
pub mod supervisor;

pub use layout::{read_inputs, read_scripts, read_topology, reset_output_dir, write_inputs};
pub use supervisor::{ProcessStatus, Role, ShutdownReport, Supervisor};

use tracing::info;

use crate::config::HarnessConfig;
use crate::error::Result;
use crate::scenario::Scenario;

pub struct Orchestrator {
    config: HarnessConfig,
}

impl Orchestrator {
    pub fn new(config: &HarnessConfig) -> Self {
        Orchestrator {
            config: config.clone(),
        }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Validate the config and scenario, empty the output directory, then
    /// write the topology and scripts. Nothing is touched if validation fails.
    pub fn prepare(&self, scenario: &Scenario) -> Result<()> {
        self.config.validate()?;
        scenario.validate()?;
        reset_output_dir(&self.config.paths.output_dir)?;
        write_inputs(&self.config.paths, scenario.topology(), scenario.scripts())?;
        info!(
            scenario = scenario.name(),
            clients = scenario.topology().clients().len(),
            input_dir = %self.config.paths.input_dir.display(),
            "scenario inputs prepared"
        );
        Ok(())
    }

    /// Start every role of the scenario's topology
    pub async fn launch(&self, scenario: &Scenario) -> Result<Supervisor> {
        Supervisor::launch(&self.config, scenario.topology()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Instruction, InstructionScript, NodeAddress};
    use crate::scenario;
    use crate::HarnessError;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> HarnessConfig {
        HarnessConfig::default().with_dirs(dir.path().join("input_files"), dir.path().join("output_files"))
    }

    #[test]
    fn test_prepare_writes_inputs_and_clears_outputs() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        std::fs::create_dir_all(&config.paths.output_dir).unwrap();
        std::fs::write(config.paths.output_dir.join("localhost_9003.txt"), "get x 12 1\n").unwrap();

        let scenario = scenario::stale_read().unwrap();
        Orchestrator::new(&config).prepare(&scenario).unwrap();

        let (topology, scripts) = read_inputs(&config.paths).unwrap();
        assert_eq!(&topology, scenario.topology());
        assert_eq!(&scripts, scenario.scripts());
        assert_eq!(std::fs::read_dir(&config.paths.output_dir).unwrap().count(), 0);
    }

    #[test]
    fn test_prepare_rejects_invalid_scenario_before_writing() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let scenario = scenario::stale_read().unwrap().with_script(
            NodeAddress::new("localhost", 9003),
            InstructionScript::from_body(vec![Instruction::get_from("x", 7)]).unwrap(),
        );

        let err = Orchestrator::new(&config).prepare(&scenario).unwrap_err();

        assert!(err.is_structural());
        assert!(!config.paths.init_file().exists());
    }

    #[test]
    fn test_prepare_refuses_output_dir_around_inputs() {
        let dir = TempDir::new().unwrap();
        let run = dir.path().join("run");
        let config = HarnessConfig::default().with_dirs(run.join("input_files"), run.clone());
        std::fs::create_dir_all(&run).unwrap();
        std::fs::write(run.join("notes.txt"), "keep me").unwrap();

        let err = Orchestrator::new(&config)
            .prepare(&scenario::stale_read().unwrap())
            .unwrap_err();

        assert!(matches!(err, HarnessError::Config(_)));
        assert!(run.join("notes.txt").exists());
        assert!(!config.paths.init_file().exists());
    }
}
