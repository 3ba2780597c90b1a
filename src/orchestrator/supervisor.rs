//! Process supervision for cluster roles
//!
//! `Supervisor` owns a handle to every process it spawns. Processes are killed
//! when the supervisor is dropped, so a failed launch never leaves orphans.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use crate::config::{HarnessConfig, Readiness, RoleCommand, RoleKind};
use crate::error::{HarnessError, Result};
use crate::model::{NodeAddress, Topology};

/// A cluster role, with its position in the topology
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    Primary,
    Replica(usize),
    Client(usize),
    Tester,
}

impl Role {
    pub fn kind(&self) -> RoleKind {
        match self {
            Role::Primary | Role::Replica(_) => RoleKind::Worker,
            Role::Client(_) => RoleKind::Client,
            Role::Tester => RoleKind::Tester,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Primary => f.write_str("primary"),
            Role::Replica(idx) => write!(f, "replica {}", idx),
            Role::Client(idx) => write!(f, "client {}", idx),
            Role::Tester => f.write_str("tester"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProcessStatus {
    Running,
    Exited(Option<i32>),
}

struct ManagedProcess {
    role: Role,
    address: NodeAddress,
    command_line: String,
    child: Child,
}

impl ManagedProcess {
    fn status(&mut self) -> ProcessStatus {
        match self.child.try_wait() {
            Ok(Some(status)) => ProcessStatus::Exited(status.code()),
            Ok(None) => ProcessStatus::Running,
            Err(e) => {
                warn!(role = %self.role, error = %e, "could not query process status");
                ProcessStatus::Running
            }
        }
    }

    /// Kill and reap the process; false if the kill failed
    async fn force_kill(&mut self) -> bool {
        match self.child.kill().await {
            Ok(()) => true,
            Err(e) => {
                warn!(role = %self.role, error = %e, "kill failed");
                false
            }
        }
    }
}

/// Which roles ended on their own and which had to be killed
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    pub exited: Vec<Role>,
    pub killed: Vec<Role>,
}

/// Owns every spawned role process
pub struct Supervisor {
    config: HarnessConfig,
    processes: Vec<ManagedProcess>,
}

impl Supervisor {
    pub fn new(config: &HarnessConfig) -> Self {
        Supervisor {
            config: config.clone(),
            processes: Vec::new(),
        }
    }

    /// Launch a whole topology: primary, replicas and clients, the readiness
    /// barrier, then the tester in test mode.
    pub async fn launch(config: &HarnessConfig, topology: &Topology) -> Result<Self> {
        let mut supervisor = Supervisor::new(config);

        supervisor.spawn(Role::Primary, topology.primary())?;
        for (idx, replica) in topology.replicas().iter().enumerate() {
            supervisor.spawn(Role::Replica(idx), replica)?;
        }
        for (idx, client) in topology.clients().iter().enumerate() {
            supervisor.spawn(Role::Client(idx), client)?;
        }

        supervisor.await_ready().await?;

        supervisor.spawn(Role::Tester, topology.tester())?;
        info!(processes = supervisor.len(), "cluster launched");
        Ok(supervisor)
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    fn command_for(&self, role: &Role) -> &RoleCommand {
        match role.kind() {
            RoleKind::Worker => &self.config.roles.worker,
            RoleKind::Client => &self.config.roles.client,
            RoleKind::Tester => &self.config.roles.tester,
        }
    }

    /// Spawn one role process listening on `address`
    pub fn spawn(&mut self, role: Role, address: &NodeAddress) -> Result<()> {
        let command = self.command_for(&role).clone();
        let vars = [
            ("port", address.port().to_string()),
            ("host", address.host().to_string()),
            ("address", address.to_string()),
            ("input_dir", absolute(&self.config.paths.input_dir).display().to_string()),
            ("output_dir", absolute(&self.config.paths.output_dir).display().to_string()),
        ];
        let args = command.render_args(&vars);
        let command_line = std::iter::once(command.program.as_str())
            .chain(args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ");

        let mut cmd = Command::new(&command.program);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(cwd) = &command.cwd {
            cmd.current_dir(cwd);
        }

        let child = cmd.spawn().map_err(|source| HarnessError::ProcessLaunch {
            role: role.to_string(),
            command: command_line.clone(),
            source,
        })?;

        debug!(role = %role, address = %address, command = %command_line, pid = ?child.id(), "spawned");
        self.processes.push(ManagedProcess {
            role,
            address: address.clone(),
            command_line,
            child,
        });
        Ok(())
    }

    /// Block until every spawned role is ready to take traffic
    pub async fn await_ready(&mut self) -> Result<()> {
        match self.config.timing.readiness {
            Readiness::Delay => {
                let delay = self.config.timing.startup_delay();
                debug!(?delay, "waiting fixed startup delay");
                sleep(delay).await;
                Ok(())
            }
            Readiness::Listen => {
                let deadline = Instant::now() + self.config.timing.startup_timeout();
                let poll = self.config.timing.poll_interval().min(Duration::from_millis(100));
                for process in &mut self.processes {
                    wait_listening(process, deadline, poll).await?;
                }
                Ok(())
            }
        }
    }

    /// Current status of every role
    pub fn health(&mut self) -> Vec<(Role, ProcessStatus)> {
        self.processes
            .iter_mut()
            .map(|p| (p.role.clone(), p.status()))
            .collect()
    }

    /// Give roles `grace` to exit on their own, then kill the rest
    pub async fn shutdown(mut self, grace: Duration) -> ShutdownReport {
        let deadline = Instant::now() + grace;
        let mut report = ShutdownReport::default();

        for process in &mut self.processes {
            if let ProcessStatus::Exited(code) = process.status() {
                debug!(role = %process.role, ?code, "exited");
                report.exited.push(process.role.clone());
                continue;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            match timeout(remaining, process.child.wait()).await {
                Ok(Ok(status)) => {
                    debug!(role = %process.role, ?status, "exited");
                    report.exited.push(process.role.clone());
                }
                Ok(Err(e)) => {
                    warn!(role = %process.role, error = %e, "wait failed, killing");
                    process.force_kill().await;
                    report.killed.push(process.role.clone());
                }
                Err(_) => {
                    warn!(role = %process.role, command = %process.command_line, "still running after grace period, killing");
                    process.force_kill().await;
                    report.killed.push(process.role.clone());
                }
            }
        }

        report
    }
}

async fn wait_listening(process: &mut ManagedProcess, deadline: Instant, poll: Duration) -> Result<()> {
    let started = Instant::now();
    let target = (process.address.host().to_string(), process.address.port());

    loop {
        if let ProcessStatus::Exited(code) = process.status() {
            return Err(HarnessError::ProcessLaunch {
                role: process.role.to_string(),
                command: process.command_line.clone(),
                source: std::io::Error::other(format!(
                    "exited with status {:?} before accepting connections",
                    code
                )),
            });
        }

        if let Ok(Ok(_)) = timeout(poll, TcpStream::connect(target.clone())).await {
            debug!(role = %process.role, address = %process.address, elapsed = ?started.elapsed(), "ready");
            return Ok(());
        }

        if Instant::now() >= deadline {
            return Err(HarnessError::ReadinessTimeout {
                role: process.role.to_string(),
                address: process.address.clone(),
                waited: started.elapsed(),
            });
        }
        sleep(poll).await;
    }
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}
