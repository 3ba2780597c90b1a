//! In-process primary/replica cluster for exercising the harness
//!
//! Writes land on the primary immediately and reach `replicas[i]` after
//! `(i + 1) * propagation_step`, one replica at a time. Under `sequential` and
//! `linearizable` the primary acknowledges once every replica has the value;
//! under `eventual` it acknowledges at once. With the default 5 s step this
//! reproduces the staleness window the reference cluster exhibits.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::client::{KvTarget, ReadTarget, TargetError};
use crate::model::{ConsistencyModel, Topology};

/// Propagation delay per replica used by the reference cluster
pub const DEFAULT_PROPAGATION_STEP: Duration = Duration::from_secs(5);

type Store = Arc<Mutex<HashMap<String, String>>>;

/// Simulated cluster shared by every client of a test run
pub struct InMemoryCluster {
    consistency: ConsistencyModel,
    primary: Store,
    replicas: Vec<Store>,
    propagation_step: Duration,
    /// Serializes writes so every replica applies them in the same order
    write_lock: Arc<tokio::sync::Mutex<()>>,
}

impl InMemoryCluster {
    pub fn new(topology: &Topology, propagation_step: Duration) -> Arc<Self> {
        Arc::new(InMemoryCluster {
            consistency: topology.consistency(),
            primary: Store::default(),
            replicas: topology.replicas().iter().map(|_| Store::default()).collect(),
            propagation_step,
            write_lock: Arc::new(tokio::sync::Mutex::new(())),
        })
    }

    /// Cluster with the reference propagation window
    pub fn with_default_window(topology: &Topology) -> Arc<Self> {
        Self::new(topology, DEFAULT_PROPAGATION_STEP)
    }

    /// Value currently held by a node
    pub fn value_at(&self, from: ReadTarget, key: &str) -> Option<String> {
        match from {
            ReadTarget::Primary => self.primary.lock().get(key).cloned(),
            ReadTarget::Replica(idx) => self
                .replicas
                .get(idx)
                .and_then(|store| store.lock().get(key).cloned()),
        }
    }

    async fn propagate(
        replicas: Vec<Store>,
        step: Duration,
        key: String,
        value: String,
        _guard: tokio::sync::OwnedMutexGuard<()>,
    ) {
        for (idx, replica) in replicas.iter().enumerate() {
            tokio::time::sleep(step).await;
            replica.lock().insert(key.clone(), value.clone());
            debug!(replica = idx, key = %key, value = %value, "replica applied write");
        }
    }
}

#[async_trait]
impl KvTarget for InMemoryCluster {
    async fn set(&self, key: &str, value: &str) -> Result<String, TargetError> {
        let guard = self.write_lock.clone().lock_owned().await;
        self.primary.lock().insert(key.to_string(), value.to_string());

        let propagation = Self::propagate(
            self.replicas.clone(),
            self.propagation_step,
            key.to_string(),
            value.to_string(),
            guard,
        );

        if self.consistency.acks_after_replication() {
            propagation.await;
        } else {
            tokio::spawn(propagation);
        }
        Ok(value.to_string())
    }

    async fn get(&self, key: &str, from: ReadTarget) -> Result<Option<String>, TargetError> {
        if let ReadTarget::Replica(idx) = from {
            if idx >= self.replicas.len() {
                return Err(TargetError::NoSuchReplica(idx));
            }
        }
        Ok(self.value_at(from, key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    fn topology(model: &str) -> Topology {
        Topology::parse(&format!(
            "consistency\n{}\nprimary\nlocalhost:9000\ntester\nlocalhost:8999\nreplicas\nlocalhost:9001\nlocalhost:9004\nclients\nlocalhost:9002",
            model
        ))
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequential_ack_waits_for_all_replicas() {
        let cluster = InMemoryCluster::with_default_window(&topology("sequential"));
        let start = Instant::now();

        cluster.set("x", "12").await.unwrap();

        assert!(start.elapsed() >= Duration::from_secs(10));
        assert_eq!(cluster.value_at(ReadTarget::Replica(1), "x"), Some("12".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_replicas_lag_during_propagation() {
        let cluster = InMemoryCluster::with_default_window(&topology("sequential"));
        let writer = cluster.clone();
        tokio::spawn(async move { writer.set("x", "12").await });

        tokio::time::sleep(Duration::from_secs(8)).await;

        assert_eq!(cluster.get("x", ReadTarget::Primary).await.unwrap(), Some("12".into()));
        assert_eq!(cluster.get("x", ReadTarget::Replica(0)).await.unwrap(), Some("12".into()));
        assert_eq!(cluster.get("x", ReadTarget::Replica(1)).await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_eventual_acks_immediately() {
        let cluster = InMemoryCluster::with_default_window(&topology("eventual"));
        let start = Instant::now();

        cluster.set("x", "1").await.unwrap();

        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(cluster.value_at(ReadTarget::Replica(0), "x"), None);
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(cluster.value_at(ReadTarget::Replica(1), "x"), Some("1".into()));
    }

    #[tokio::test]
    async fn test_unknown_replica() {
        let cluster = InMemoryCluster::new(&topology("sequential"), Duration::ZERO);
        assert_eq!(
            cluster.get("x", ReadTarget::Replica(2)).await,
            Err(TargetError::NoSuchReplica(2))
        );
    }
}
