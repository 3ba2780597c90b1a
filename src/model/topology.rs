//! Topology descriptor (`init.txt`)
//!
//! Line-oriented format. A section keyword on its own line opens a section and
//! every following non-keyword line belongs to it:
//!
//! ```text
//! consistency
//! sequential
//! primary
//! localhost:9000
//! tester
//! localhost:8999
//! replicas
//! localhost:9001
//! localhost:9004
//! clients
//! localhost:9002
//! localhost:9003
//! ```

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::address::NodeAddress;
use crate::error::{HarnessError, Result};

/// Consistency model the cluster claims to provide
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsistencyModel {
    Sequential,
    Linearizable,
    Eventual,
}

impl ConsistencyModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsistencyModel::Sequential => "sequential",
            ConsistencyModel::Linearizable => "linearizable",
            ConsistencyModel::Eventual => "eventual",
        }
    }

    /// Whether the primary waits for every replica before acknowledging a write
    pub fn acks_after_replication(&self) -> bool {
        !matches!(self, ConsistencyModel::Eventual)
    }
}

impl fmt::Display for ConsistencyModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConsistencyModel {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "sequential" => Ok(ConsistencyModel::Sequential),
            "linearizable" => Ok(ConsistencyModel::Linearizable),
            "eventual" => Ok(ConsistencyModel::Eventual),
            other => Err(HarnessError::topology(
                None,
                format!("unknown consistency model '{}'", other),
            )),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum Section {
    Consistency,
    Primary,
    Tester,
    Replicas,
    Clients,
}

impl Section {
    const ALL: [Section; 5] = [
        Section::Consistency,
        Section::Primary,
        Section::Tester,
        Section::Replicas,
        Section::Clients,
    ];

    fn keyword(&self) -> &'static str {
        match self {
            Section::Consistency => "consistency",
            Section::Primary => "primary",
            Section::Tester => "tester",
            Section::Replicas => "replicas",
            Section::Clients => "clients",
        }
    }

    fn from_keyword(line: &str) -> Option<Section> {
        Section::ALL.into_iter().find(|s| s.keyword() == line)
    }
}

/// The declared roles and addresses for one test run
///
/// Replica order is significant: client reads address replicas by index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Topology {
    consistency: ConsistencyModel,
    primary: NodeAddress,
    tester: NodeAddress,
    replicas: Vec<NodeAddress>,
    clients: Vec<NodeAddress>,
}

impl Topology {
    /// Build a topology, checking the non-empty and distinct-address invariants
    pub fn new(
        consistency: ConsistencyModel,
        primary: NodeAddress,
        tester: NodeAddress,
        replicas: Vec<NodeAddress>,
        clients: Vec<NodeAddress>,
    ) -> Result<Self> {
        if replicas.is_empty() {
            return Err(HarnessError::topology(None, "replicas section is empty"));
        }
        if clients.is_empty() {
            return Err(HarnessError::topology(None, "clients section is empty"));
        }

        let mut seen = HashSet::new();
        let all = std::iter::once(&primary)
            .chain(std::iter::once(&tester))
            .chain(replicas.iter())
            .chain(clients.iter());
        for addr in all {
            if !seen.insert(addr) {
                return Err(HarnessError::topology(
                    None,
                    format!("address {} is used more than once", addr),
                ));
            }
        }

        Ok(Topology {
            consistency,
            primary,
            tester,
            replicas,
            clients,
        })
    }

    pub fn consistency(&self) -> ConsistencyModel {
        self.consistency
    }

    pub fn primary(&self) -> &NodeAddress {
        &self.primary
    }

    pub fn tester(&self) -> &NodeAddress {
        &self.tester
    }

    pub fn replicas(&self) -> &[NodeAddress] {
        &self.replicas
    }

    pub fn clients(&self) -> &[NodeAddress] {
        &self.clients
    }

    /// Replica addressed by a client read, `None` if out of range
    pub fn replica(&self, index: usize) -> Option<&NodeAddress> {
        self.replicas.get(index)
    }

    pub fn has_client(&self, addr: &NodeAddress) -> bool {
        self.clients.contains(addr)
    }

    /// Primary followed by replicas, in launch order
    pub fn workers(&self) -> impl Iterator<Item = &NodeAddress> {
        std::iter::once(&self.primary).chain(self.replicas.iter())
    }

    /// Parse the textual descriptor
    pub fn parse(text: &str) -> Result<Self> {
        let mut current: Option<Section> = None;
        let mut values: Vec<(Section, Vec<(usize, String)>)> = Vec::new();

        for (idx, raw) in text.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }

            if let Some(section) = Section::from_keyword(line) {
                if values.iter().any(|(s, _)| *s == section) {
                    return Err(HarnessError::topology(
                        Some(line_no),
                        format!("section '{}' appears twice", section.keyword()),
                    ));
                }
                values.push((section, Vec::new()));
                current = Some(section);
                continue;
            }

            if current.is_none() {
                return Err(HarnessError::topology(
                    Some(line_no),
                    format!("'{}' appears before any section keyword", line),
                ));
            }
            if let Some((_, lines)) = values.last_mut() {
                lines.push((line_no, line.to_string()));
            }
        }

        let section = |wanted: Section| -> Result<&Vec<(usize, String)>> {
            values
                .iter()
                .find(|(s, _)| *s == wanted)
                .map(|(_, v)| v)
                .ok_or_else(|| {
                    HarnessError::topology(
                        None,
                        format!("missing required section '{}'", wanted.keyword()),
                    )
                })
        };

        let single = |wanted: Section| -> Result<(usize, String)> {
            let lines = section(wanted)?;
            match lines.as_slice() {
                [only] => Ok(only.clone()),
                [] => Err(HarnessError::topology(
                    None,
                    format!("section '{}' has no value", wanted.keyword()),
                )),
                [_, extra, ..] => Err(HarnessError::topology(
                    Some(extra.0),
                    format!("section '{}' takes exactly one value", wanted.keyword()),
                )),
            }
        };

        let address = |(line_no, value): &(usize, String)| -> Result<NodeAddress> {
            value
                .parse()
                .map_err(|e| HarnessError::topology(Some(*line_no), format!("bad address: {}", e)))
        };

        let (model_line, model) = single(Section::Consistency)?;
        let consistency = model.parse::<ConsistencyModel>().map_err(|e| match e {
            HarnessError::MalformedTopology { reason, .. } => {
                HarnessError::topology(Some(model_line), reason)
            }
            other => other,
        })?;
        let primary = address(&single(Section::Primary)?)?;
        let tester = address(&single(Section::Tester)?)?;
        let replicas = section(Section::Replicas)?
            .iter()
            .map(address)
            .collect::<Result<Vec<_>>>()?;
        let clients = section(Section::Clients)?
            .iter()
            .map(address)
            .collect::<Result<Vec<_>>>()?;

        Topology::new(consistency, primary, tester, replicas, clients)
    }
}

impl FromStr for Topology {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self> {
        Topology::parse(s)
    }
}

/// Canonical serialization, the exact inverse of [`Topology::parse`]
impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", Section::Consistency.keyword())?;
        writeln!(f, "{}", self.consistency)?;
        writeln!(f, "{}", Section::Primary.keyword())?;
        writeln!(f, "{}", self.primary)?;
        writeln!(f, "{}", Section::Tester.keyword())?;
        writeln!(f, "{}", self.tester)?;
        writeln!(f, "{}", Section::Replicas.keyword())?;
        for replica in &self.replicas {
            writeln!(f, "{}", replica)?;
        }
        writeln!(f, "{}", Section::Clients.keyword())?;
        for client in &self.clients {
            writeln!(f, "{}", client)?;
        }
        Ok(())
    }
}
