//! Scripted client execution
//!
//! Runs an instruction script strictly sequentially against a [`KvTarget`],
//! recording one log entry per instruction. The log is persisted before the
//! client reports completion.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::time::Instant;
use tracing::{debug, info};

use super::target::{KvTarget, ReadTarget};
use crate::error::{HarnessError, Result};
use crate::log::{self, ExecutionLog, LogEntry};
use crate::model::{Instruction, InstructionScript, NodeAddress};

/// Executes one client's script
pub struct ScriptExecutor {
    client: NodeAddress,
    target: Arc<dyn KvTarget>,
}

impl ScriptExecutor {
    pub fn new(client: NodeAddress, target: Arc<dyn KvTarget>) -> Self {
        ScriptExecutor { client, target }
    }

    pub fn client(&self) -> &NodeAddress {
        &self.client
    }

    /// Run the script to `exit`. Instruction n+1 is issued only after
    /// instruction n has completed.
    pub async fn run(&self, script: &InstructionScript) -> Result<ExecutionLog> {
        let mut log = ExecutionLog::new();

        for instruction in script.instructions() {
            let started = Instant::now();

            let entry = match instruction {
                Instruction::Set { key, value } => {
                    let acked = self
                        .target
                        .set(key, value)
                        .await
                        .map_err(|e| self.target_error(instruction, e))?;
                    LogEntry::set(key.clone(), acked, started.elapsed())
                }
                Instruction::Get { key, replica } => {
                    let from = ReadTarget::from(*replica);
                    let observed = self
                        .target
                        .get(key, from)
                        .await
                        .map_err(|e| self.target_error(instruction, e))?;
                    LogEntry::get(key.clone(), observed, started.elapsed())
                }
                Instruction::Wait(duration) => {
                    tokio::time::sleep(*duration).await;
                    LogEntry::wait(started.elapsed())
                }
                Instruction::Exit => break,
            };

            debug!(client = %self.client, entry = %entry, "instruction completed");
            log.push(entry);
        }

        Ok(log)
    }

    fn target_error(&self, instruction: &Instruction, err: impl std::fmt::Display) -> HarnessError {
        HarnessError::Target {
            client: self.client.clone(),
            reason: format!("'{}' failed: {}", instruction, err),
        }
    }
}

/// Execute a script and persist its log into `output_dir`.
/// Returns the log path once the file is complete.
pub async fn run_client(
    client: NodeAddress,
    script: &InstructionScript,
    target: Arc<dyn KvTarget>,
    output_dir: &Path,
) -> Result<PathBuf> {
    let executor = ScriptExecutor::new(client.clone(), target);
    let log = executor.run(script).await?;
    let path = log::write_log(output_dir, &client, &log)?;
    info!(client = %client, entries = log.len(), "client finished script");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::target::TargetError;
    use crate::log::Opcode;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::time::Duration;

    /// Single-node store that takes a fixed time per call and records call order
    struct SlowStore {
        data: Mutex<HashMap<String, String>>,
        calls: Mutex<Vec<String>>,
        delay: Duration,
    }

    impl SlowStore {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(SlowStore {
                data: Mutex::new(HashMap::new()),
                calls: Mutex::new(Vec::new()),
                delay,
            })
        }
    }

    #[async_trait]
    impl KvTarget for SlowStore {
        async fn set(&self, key: &str, value: &str) -> std::result::Result<String, TargetError> {
            self.calls.lock().push(format!("set {}", key));
            tokio::time::sleep(self.delay).await;
            self.data.lock().insert(key.to_string(), value.to_string());
            Ok(value.to_string())
        }

        async fn get(
            &self,
            key: &str,
            from: ReadTarget,
        ) -> std::result::Result<Option<String>, TargetError> {
            if let ReadTarget::Replica(idx) = from {
                if idx > 0 {
                    return Err(TargetError::NoSuchReplica(idx));
                }
            }
            self.calls.lock().push(format!("get {}", key));
            tokio::time::sleep(self.delay).await;
            Ok(self.data.lock().get(key).cloned())
        }
    }

    fn client() -> NodeAddress {
        NodeAddress::new("localhost", 9002)
    }

    #[tokio::test(start_paused = true)]
    async fn test_log_order_matches_script_order() {
        let store = SlowStore::new(Duration::from_millis(20));
        let script =
            InstructionScript::parse("get x\nset x 12\nwait 1\nget x 0\nset y 3\nexit\n").unwrap();

        let log = ScriptExecutor::new(client(), store.clone()).run(&script).await.unwrap();

        assert_eq!(
            log.opcodes(),
            vec![Opcode::Get, Opcode::Set, Opcode::Wait, Opcode::Get, Opcode::Set]
        );
        assert_eq!(
            *store.calls.lock(),
            vec!["get x", "set x", "get x", "set y"]
        );
        assert_eq!(log.entry(0).unwrap().data_fields(), ["x", "NULL"]);
        assert_eq!(log.entry(3).unwrap().data_fields(), ["x", "12"]);
        assert!(log.entry(1).unwrap().latency >= Duration::from_millis(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_latency_covers_requested_duration() {
        let store = SlowStore::new(Duration::ZERO);
        let script = InstructionScript::parse("wait 8\nwait 0.25\nexit\n").unwrap();

        let log = ScriptExecutor::new(client(), store).run(&script).await.unwrap();

        assert!(log.entry(0).unwrap().latency >= Duration::from_secs(8));
        assert!(log.entry(1).unwrap().latency >= Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_target_failure_aborts_without_log() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = SlowStore::new(Duration::ZERO);
        let script = InstructionScript::parse("get x 3\nexit\n").unwrap();

        let err = run_client(client(), &script, store, dir.path()).await.unwrap_err();

        assert!(matches!(err, HarnessError::Target { .. }));
        assert!(err.to_string().contains("no replica at index 3"));
        assert!(!log::log_path(dir.path(), &client()).exists());
    }

    #[tokio::test]
    async fn test_run_client_persists_log() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = SlowStore::new(Duration::ZERO);
        let script = InstructionScript::parse("set x 12\nget x\nexit\n").unwrap();

        let path = run_client(client(), &script, store, dir.path()).await.unwrap();

        let log = log::read_log(&path).unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log.entry(1).unwrap().observed.as_value(), Some("12"));
    }
}
