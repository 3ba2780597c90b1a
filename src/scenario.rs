//! Test scenarios
//!
//! A scenario bundles a topology, one instruction script per client, the
//! predicates the resulting logs must satisfy and the entries whose latency is
//! reported.

use std::collections::BTreeMap;

use crate::error::{HarnessError, Result};
use crate::model::{ConsistencyModel, Instruction, InstructionScript, NodeAddress, Topology, NULL_TOKEN};
use crate::oracle::{LatencyProbe, Predicate};

#[derive(Clone, Debug, PartialEq)]
pub struct Scenario {
    name: String,
    topology: Topology,
    scripts: BTreeMap<NodeAddress, InstructionScript>,
    predicates: Vec<Predicate>,
    probes: Vec<LatencyProbe>,
}

impl Scenario {
    pub fn new(name: impl Into<String>, topology: Topology) -> Self {
        Scenario {
            name: name.into(),
            topology,
            scripts: BTreeMap::new(),
            predicates: Vec::new(),
            probes: Vec::new(),
        }
    }

    pub fn with_script(mut self, client: NodeAddress, script: InstructionScript) -> Self {
        self.scripts.insert(client, script);
        self
    }

    pub fn with_predicate(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn with_probe(mut self, probe: LatencyProbe) -> Self {
        self.probes.push(probe);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn scripts(&self) -> &BTreeMap<NodeAddress, InstructionScript> {
        &self.scripts
    }

    pub fn script(&self, client: &NodeAddress) -> Option<&InstructionScript> {
        self.scripts.get(client)
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    pub fn probes(&self) -> &[LatencyProbe] {
        &self.probes
    }

    /// Cross-check scripts, predicates and probes against the topology
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| -> Result<()> {
            Err(HarnessError::InvalidScenario(format!("{}: {}", self.name, reason)))
        };

        for client in self.topology.clients() {
            if !self.scripts.contains_key(client) {
                return invalid(format!("client {} has no instruction script", client));
            }
        }

        let replicas = self.topology.replicas().len();
        for (client, script) in &self.scripts {
            if !self.topology.has_client(client) {
                return invalid(format!("script for {} which is not a client in the topology", client));
            }
            if let Some(idx) = script.max_replica_index() {
                if idx >= replicas {
                    return invalid(format!(
                        "client {} reads from replica {} but the topology has {} replicas",
                        client, idx, replicas
                    ));
                }
            }
        }

        for predicate in &self.predicates {
            if let Some(client) = predicate.client() {
                if !self.topology.has_client(client) {
                    return invalid(format!("predicate '{}' names unknown client {}", predicate, client));
                }
            }
        }
        for probe in &self.probes {
            if !self.topology.has_client(&probe.client) {
                return invalid(format!("latency probe '{}' names unknown client {}", probe.label, probe.client));
            }
        }
        Ok(())
    }
}

fn local(port: u16) -> NodeAddress {
    NodeAddress::new("localhost", port)
}

fn script(body: Vec<Instruction>) -> Result<InstructionScript> {
    InstructionScript::from_body(body)
}

/// One primary, two replicas, a writer and two delayed readers
fn reference_topology() -> Result<Topology> {
    Topology::new(
        ConsistencyModel::Sequential,
        local(9000),
        local(8999),
        vec![local(9001), local(9004)],
        vec![local(9002), local(9003), local(9005)],
    )
}

/// Client 9002 writes `x = 12`. After 8 s, 9003 reads replica 0 and must see
/// the write while 9005 reads replica 1 and must still see `NULL`.
pub fn stale_read() -> Result<Scenario> {
    stale_read_base("stale-read", Vec::new())
}

/// `stale-read`, plus 9002 reads `x` back through the primary right after
/// writing it and must see its own write.
pub fn read_your_writes() -> Result<Scenario> {
    let scenario = stale_read_base("read-your-writes", vec![Instruction::get("x")])?;
    Ok(scenario
        .with_predicate(Predicate::entry_contains(local(9002), 1, "12"))
        .with_probe(LatencyProbe::new("third read", local(9002), 1)))
}

fn stale_read_base(name: &str, writer_tail: Vec<Instruction>) -> Result<Scenario> {
    let mut writer = vec![Instruction::set("x", "12")];
    writer.extend(writer_tail);

    let mut scenario = Scenario::new(name, reference_topology()?)
        .with_script(local(9002), script(writer)?)
        .with_script(
            local(9003),
            script(vec![Instruction::wait_secs(8.0)?, Instruction::get_from("x", 0)])?,
        )
        .with_script(
            local(9005),
            script(vec![Instruction::wait_secs(8.0)?, Instruction::get_from("x", 1)])?,
        )
        .with_predicate(Predicate::log_contains(local(9003), "12"))
        .with_predicate(Predicate::log_contains(local(9005), NULL_TOKEN))
        .with_probe(LatencyProbe::new("write", local(9002), 0))
        .with_probe(LatencyProbe::new("first read", local(9003), 1))
        .with_probe(LatencyProbe::new("second read", local(9005), 1));

    if scenario.topology().consistency() == ConsistencyModel::Sequential {
        scenario = scenario.with_predicate(Predicate::SequentiallyConsistent);
    }
    Ok(scenario)
}

/// Names of the built-in scenarios, in run order
pub const BUILTIN: [&str; 2] = ["stale-read", "read-your-writes"];

pub fn builtin() -> Result<Vec<Scenario>> {
    Ok(vec![stale_read()?, read_your_writes()?])
}

pub fn by_name(name: &str) -> Result<Scenario> {
    match name {
        "stale-read" => stale_read(),
        "read-your-writes" => read_your_writes(),
        other => Err(HarnessError::Config(format!(
            "unknown scenario '{}' (known: {})",
            other,
            BUILTIN.join(", ")
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_validate() {
        for scenario in builtin().unwrap() {
            scenario.validate().unwrap();
        }
    }

    #[test]
    fn test_stale_read_layout() {
        let scenario = stale_read().unwrap();

        assert_eq!(scenario.topology().to_string(), "consistency\nsequential\nprimary\nlocalhost:9000\ntester\nlocalhost:8999\nreplicas\nlocalhost:9001\nlocalhost:9004\nclients\nlocalhost:9002\nlocalhost:9003\nlocalhost:9005\n");
        assert_eq!(scenario.script(&local(9002)).unwrap().to_string(), "set x 12\nexit\n");
        assert_eq!(scenario.script(&local(9005)).unwrap().to_string(), "wait 8\nget x 1\nexit\n");
        assert_eq!(scenario.predicates().len(), 3);
        assert_eq!(scenario.probes().len(), 3);
    }

    #[test]
    fn test_read_your_writes_extends_writer() {
        let scenario = read_your_writes().unwrap();

        assert_eq!(scenario.script(&local(9002)).unwrap().to_string(), "set x 12\nget x\nexit\n");
        assert!(scenario
            .predicates()
            .contains(&Predicate::entry_contains(local(9002), 1, "12")));
        assert_eq!(scenario.probes().last().unwrap().label, "third read");
    }

    #[test]
    fn test_replica_index_out_of_range() {
        let scenario = stale_read()
            .unwrap()
            .with_script(local(9005), script(vec![Instruction::get_from("x", 2)]).unwrap());

        let err = scenario.validate().unwrap_err();
        assert!(err.is_structural());
        assert!(err.to_string().contains("reads from replica 2"));
    }

    #[test]
    fn test_missing_and_foreign_scripts() {
        let topology = reference_topology().unwrap();
        let missing = Scenario::new("partial", topology.clone())
            .with_script(local(9002), script(vec![]).unwrap());
        assert!(missing.validate().unwrap_err().to_string().contains("localhost:9003 has no instruction script"));

        let foreign = stale_read().unwrap().with_script(local(7000), script(vec![]).unwrap());
        assert!(foreign.validate().unwrap_err().to_string().contains("localhost:7000"));
    }

    #[test]
    fn test_predicate_for_unknown_client() {
        let scenario = stale_read()
            .unwrap()
            .with_predicate(Predicate::log_contains(local(9010), "12"));
        assert!(matches!(scenario.validate(), Err(HarnessError::InvalidScenario(_))));
    }

    #[test]
    fn test_by_name() {
        assert_eq!(by_name("read-your-writes").unwrap().name(), "read-your-writes");
        assert!(matches!(by_name("nope"), Err(HarnessError::Config(_))));
    }
}
