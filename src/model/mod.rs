//! Test inputs: node addresses, the topology descriptor and instruction scripts

pub mod address;
pub mod script;
pub mod topology;

pub use address::{AddressParseError, NodeAddress};
pub use script::{Instruction, InstructionScript, ABSENT_TOKEN, NULL_TOKEN};
pub use topology::{ConsistencyModel, Topology};
