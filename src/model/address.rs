//! Node addresses

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A `(host, port)` pair, written canonically as `host:port`
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeAddress {
    host: String,
    port: u16,
}

impl NodeAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        NodeAddress {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// File-name form of the address: the separator is rewritten to `_`
    /// (`localhost:9002` -> `localhost_9002`).
    pub fn file_stem(&self) -> String {
        format!("{}_{}", self.host, self.port)
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Reason an address string was rejected
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AddressParseError(pub String);

impl fmt::Display for AddressParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for AddressParseError {}

impl FromStr for NodeAddress {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| AddressParseError(format!("'{}' has no ':' separator", s)))?;

        if host.is_empty() {
            return Err(AddressParseError(format!("'{}' has an empty host", s)));
        }
        if host.chars().any(char::is_whitespace) {
            return Err(AddressParseError(format!("'{}' contains whitespace", s)));
        }

        let port: u16 = port
            .parse()
            .map_err(|_| AddressParseError(format!("'{}' has a non-numeric port", s)))?;

        Ok(NodeAddress::new(host, port))
    }
}

impl TryFrom<String> for NodeAddress {
    type Error = AddressParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<NodeAddress> for String {
    fn from(addr: NodeAddress) -> Self {
        addr.to_string()
    }
}
