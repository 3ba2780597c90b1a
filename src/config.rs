//! Harness configuration
//!
//! Built once (from defaults, a TOML file, or CLI overrides), validated with
//! [`HarnessConfig::validate`], then passed by reference to every component.
//!
//! ```toml
//! [paths]
//! input_dir = "input_files"
//! output_dir = "output_files"
//!
//! [timing]
//! log_timeout_ms = 30000
//! readiness = "listen"
//!
//! [oracle]
//! log_format = "auto"
//!
//! [roles.worker]
//! program = "go"
//! args = ["run", "./worker.go", "{port}"]
//! cwd = "src/worker"
//! ```

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, Result};
use crate::log::ClientLogFormat;
use crate::logging::LogFormat;
use crate::model::NodeAddress;

/// Complete harness configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub paths: PathsConfig,
    pub timing: TimingConfig,
    pub roles: RolesConfig,
    pub oracle: OracleConfig,
    pub logging: LoggingConfig,
}

impl HarnessConfig {
    /// Load from a TOML file; missing keys take their defaults
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| HarnessError::io(path, e))?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: HarnessConfig =
            toml::from_str(text).map_err(|e| HarnessError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Set the input and output directories
    pub fn with_dirs(mut self, input_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        self.paths.input_dir = input_dir.into();
        self.paths.output_dir = output_dir.into();
        self
    }

    /// Set how long the oracle waits for logs
    pub fn with_log_timeout(mut self, timeout: Duration) -> Self {
        self.timing.log_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the oracle's polling interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.timing.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Set the readiness barrier strategy
    pub fn with_readiness(mut self, readiness: Readiness) -> Self {
        self.timing.readiness = readiness;
        self
    }

    /// Set the command used for one role
    pub fn with_role(mut self, role: RoleKind, command: RoleCommand) -> Self {
        match role {
            RoleKind::Worker => self.roles.worker = command,
            RoleKind::Client => self.roles.client = command,
            RoleKind::Tester => self.roles.tester = command,
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        let t = &self.timing;
        if t.log_timeout_ms == 0 {
            return Err(HarnessError::Config("timing.log_timeout_ms must be positive".into()));
        }
        if t.poll_interval_ms == 0 || t.poll_interval_ms > t.log_timeout_ms {
            return Err(HarnessError::Config(
                "timing.poll_interval_ms must be positive and at most log_timeout_ms".into(),
            ));
        }
        if t.readiness == Readiness::Listen && t.startup_timeout_ms == 0 {
            return Err(HarnessError::Config(
                "timing.startup_timeout_ms must be positive when readiness = \"listen\"".into(),
            ));
        }
        // The output directory is emptied before every run
        let input = lexical_absolute(&self.paths.input_dir);
        let output = lexical_absolute(&self.paths.output_dir);
        if input.starts_with(&output) || output.starts_with(&input) {
            return Err(HarnessError::Config(format!(
                "paths.input_dir ({}) and paths.output_dir ({}) must not contain each other",
                self.paths.input_dir.display(),
                self.paths.output_dir.display()
            )));
        }
        for (name, role) in [
            ("worker", &self.roles.worker),
            ("client", &self.roles.client),
            ("tester", &self.roles.tester),
        ] {
            if role.program.trim().is_empty() {
                return Err(HarnessError::Config(format!("roles.{}.program is empty", name)));
            }
        }
        Ok(())
    }
}

/// Absolute form of `path` with `.` and `..` resolved without touching the
/// filesystem
fn lexical_absolute(path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };
    let mut out = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

/// Where inputs are written and logs are collected
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        PathsConfig {
            input_dir: PathBuf::from("input_files"),
            output_dir: PathBuf::from("output_files"),
        }
    }
}

impl PathsConfig {
    /// Topology descriptor location
    pub fn init_file(&self) -> PathBuf {
        self.input_dir.join("init.txt")
    }

    pub fn scripts_dir(&self) -> PathBuf {
        self.input_dir.join("client_inputs")
    }

    /// A client's instruction script location (no extension)
    pub fn script_path(&self, client: &NodeAddress) -> PathBuf {
        self.scripts_dir().join(client.file_stem())
    }
}

/// How the orchestrator decides spawned roles are up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Readiness {
    /// Poll each role's address until it accepts a TCP connection
    Listen,
    /// Sleep for `startup_delay_ms`
    Delay,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub readiness: Readiness,
    pub startup_timeout_ms: u64,
    pub startup_delay_ms: u64,
    pub log_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub shutdown_grace_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        TimingConfig {
            readiness: Readiness::Listen,
            startup_timeout_ms: 10_000,
            startup_delay_ms: 2_000,
            log_timeout_ms: 30_000,
            poll_interval_ms: 500,
            shutdown_grace_ms: 5_000,
        }
    }
}

impl TimingConfig {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_millis(self.startup_delay_ms)
    }

    pub fn log_timeout(&self) -> Duration {
        Duration::from_millis(self.log_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleKind {
    Worker,
    Client,
    Tester,
}

/// External process used for one role. Arguments are templates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
}

impl RoleCommand {
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        RoleCommand {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
            cwd: None,
        }
    }

    pub fn in_dir(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Substitute `{name}` placeholders in every argument
    pub fn render_args(&self, vars: &[(&str, String)]) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| {
                vars.iter().fold(arg.clone(), |acc, (name, value)| {
                    acc.replace(&format!("{{{}}}", name), value)
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RolesConfig {
    pub worker: RoleCommand,
    pub client: RoleCommand,
    pub tester: RoleCommand,
}

impl Default for RolesConfig {
    fn default() -> Self {
        RolesConfig {
            worker: RoleCommand::new("go", &["run", "./worker.go", "{port}"]).in_dir("src/worker"),
            client: RoleCommand::new("go", &["run", "./client.go", "{port}"]).in_dir("src/client"),
            tester: RoleCommand::new("go", &["run", "./tester.go", "testmode=TRUE"])
                .in_dir("src/tester"),
        }
    }
}

/// How client logs are read back
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    pub log_format: ClientLogFormat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = HarnessConfig::default();
        config.validate().unwrap();
        assert_eq!(config.paths.init_file(), Path::new("input_files/init.txt"));
        assert_eq!(config.timing.log_timeout(), Duration::from_secs(30));
        assert_eq!(config.timing.readiness, Readiness::Listen);
    }

    #[test]
    fn test_script_path_uses_file_stem() {
        let paths = PathsConfig::default();
        let client = NodeAddress::new("localhost", 9002);
        assert_eq!(
            paths.script_path(&client),
            Path::new("input_files/client_inputs/localhost_9002")
        );
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = HarnessConfig::from_toml(
            r#"
            [paths]
            output_dir = "/tmp/logs"

            [timing]
            log_timeout_ms = 1000
            poll_interval_ms = 100
            readiness = "delay"

            [oracle]
            log_format = "transcript"

            [roles.tester]
            program = "./tester"
            args = ["testmode=TRUE"]
            "#,
        )
        .unwrap();

        assert_eq!(config.paths.output_dir, PathBuf::from("/tmp/logs"));
        assert_eq!(config.paths.input_dir, PathBuf::from("input_files"));
        assert_eq!(config.timing.readiness, Readiness::Delay);
        assert_eq!(config.timing.shutdown_grace_ms, 5_000);
        assert_eq!(config.roles.tester.program, "./tester");
        assert_eq!(config.roles.tester.cwd, None);
        assert_eq!(config.roles.worker.program, "go");
        assert_eq!(config.oracle.log_format, ClientLogFormat::Transcript);
        assert_eq!(HarnessConfig::default().oracle.log_format, ClientLogFormat::Auto);
    }

    #[test]
    fn test_rejects_bad_timing() {
        let err = HarnessConfig::default()
            .with_poll_interval(Duration::from_secs(60))
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("poll_interval_ms"));

        assert!(HarnessConfig::from_toml("[timing]\nlog_timeout_ms = 0").is_err());
        assert!(HarnessConfig::from_toml("[timing]\nreadiness = \"psychic\"").is_err());
    }

    #[test]
    fn test_rejects_shared_dirs() {
        let err = HarnessConfig::default().with_dirs("io", "io").validate().unwrap_err();
        assert!(matches!(err, HarnessError::Config(_)));
    }

    #[test]
    fn test_rejects_nested_dirs() {
        let nested = [
            ("run/input_files", "run"),
            ("input_files", "."),
            ("out/../in", "in/./logs"),
            ("/tmp/run", "/tmp/run/output_files"),
        ];
        for (input, output) in nested {
            let err = HarnessConfig::default().with_dirs(input, output).validate().unwrap_err();
            assert!(err.to_string().contains("must not contain each other"), "{input} / {output}");
        }

        HarnessConfig::default()
            .with_dirs("run/input_files", "run/output_files")
            .validate()
            .unwrap();
        HarnessConfig::default().with_dirs("run/in", "run/input").validate().unwrap();
    }

    #[test]
    fn test_render_args() {
        let cmd = RoleCommand::new("sh", &["-c", "echo {address} > {output_dir}/{host}_{port}"]);
        let args = cmd.render_args(&[
            ("port", "9002".to_string()),
            ("host", "localhost".to_string()),
            ("address", "localhost:9002".to_string()),
            ("output_dir", "out".to_string()),
        ]);
        assert_eq!(args, vec!["-c", "echo localhost:9002 > out/localhost_9002"]);
    }
}
