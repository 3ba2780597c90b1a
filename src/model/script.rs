//! Per-client instruction scripts
//!
//! One instruction per line, whitespace separated:
//!
//! ```text
//! set x 12
//! get x          (read through the primary)
//! get x 1        (read replicas[1] directly)
//! wait 8
//! exit
//! ```

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{HarnessError, Result};

/// Token written to the log when a node has no record of a key
pub const NULL_TOKEN: &str = "NULL";

/// Placeholder for an absent log field
pub const ABSENT_TOKEN: &str = "-";

/// One scripted client operation
#[derive(Clone, Debug, PartialEq)]
pub enum Instruction {
    /// Write through the primary
    Set { key: String, value: String },
    /// Read from the primary, or from `replicas[replica]` when given
    Get { key: String, replica: Option<usize> },
    /// Idle for the given duration
    Wait(Duration),
    /// End of script
    Exit,
}

impl Instruction {
    pub fn set(key: impl Into<String>, value: impl Into<String>) -> Self {
        Instruction::Set {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn get(key: impl Into<String>) -> Self {
        Instruction::Get {
            key: key.into(),
            replica: None,
        }
    }

    pub fn get_from(key: impl Into<String>, replica: usize) -> Self {
        Instruction::Get {
            key: key.into(),
            replica: Some(replica),
        }
    }

    pub fn wait(duration: Duration) -> Self {
        Instruction::Wait(duration)
    }

    /// Wait for a fractional number of seconds; fails on negative, non-finite
    /// or overflowing values
    pub fn wait_secs(secs: f64) -> Result<Self> {
        Duration::try_from_secs_f64(secs)
            .map(Instruction::Wait)
            .map_err(|e| HarnessError::script(None, format!("wait duration {}: {}", secs, e)))
    }

    pub fn opcode(&self) -> &'static str {
        match self {
            Instruction::Set { .. } => "set",
            Instruction::Get { .. } => "get",
            Instruction::Wait(_) => "wait",
            Instruction::Exit => "exit",
        }
    }

    fn parse_line(line: &str, line_no: usize) -> Result<Self> {
        let tokens: Vec<&str> = line.split_ascii_whitespace().collect();
        let err = |reason: String| HarnessError::script(Some(line_no), reason);

        match tokens.as_slice() {
            ["set", key, value] => {
                check_token(key).map_err(&err)?;
                check_token(value).map_err(&err)?;
                Ok(Instruction::set(*key, *value))
            }
            ["set", ..] => Err(err("usage: set <key> <value>".to_string())),
            ["get", key] => {
                check_token(key).map_err(&err)?;
                Ok(Instruction::get(*key))
            }
            ["get", key, index] => {
                check_token(key).map_err(&err)?;
                let index: usize = index
                    .parse()
                    .map_err(|_| err(format!("replica index '{}' is not a non-negative integer", index)))?;
                Ok(Instruction::get_from(*key, index))
            }
            ["get", ..] => Err(err("usage: get <key> [<replicaIndex>]".to_string())),
            ["wait", secs] => {
                let secs: f64 = secs
                    .parse()
                    .map_err(|_| err(format!("wait duration '{}' is not a number", secs)))?;
                Duration::try_from_secs_f64(secs)
                    .map(Instruction::Wait)
                    .map_err(|e| err(format!("wait duration {}: {}", secs, e)))
            }
            ["wait", ..] => Err(err("usage: wait <seconds>".to_string())),
            ["exit"] => Ok(Instruction::Exit),
            ["exit", ..] => Err(err("exit takes no arguments".to_string())),
            [op, ..] => Err(err(format!("unknown instruction '{}'", op))),
            [] => Err(err("empty instruction".to_string())),
        }
    }
}

/// Keys and values share the log's field space, so the log's sentinels are off limits
fn check_token(token: &str) -> std::result::Result<(), String> {
    if token == NULL_TOKEN || token == ABSENT_TOKEN {
        Err(format!("'{}' is reserved", token))
    } else {
        Ok(())
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Set { key, value } => write!(f, "set {} {}", key, value),
            Instruction::Get { key, replica: None } => write!(f, "get {}", key),
            Instruction::Get {
                key,
                replica: Some(idx),
            } => write!(f, "get {} {}", key, idx),
            Instruction::Wait(d) => write!(f, "wait {}", d.as_secs_f64()),
            Instruction::Exit => f.write_str("exit"),
        }
    }
}

/// Ordered instructions for one client, always terminated by a single `exit`
#[derive(Clone, Debug, PartialEq)]
pub struct InstructionScript {
    instructions: Vec<Instruction>,
}

impl InstructionScript {
    /// Build a script from a full instruction list (the last must be `Exit`)
    pub fn new(instructions: Vec<Instruction>) -> Result<Self> {
        let exit_positions: Vec<usize> = instructions
            .iter()
            .enumerate()
            .filter(|(_, i)| matches!(i, Instruction::Exit))
            .map(|(pos, _)| pos)
            .collect();

        match exit_positions.as_slice() {
            [] => Err(HarnessError::script(None, "script does not end with exit")),
            [pos] if *pos + 1 == instructions.len() => Ok(InstructionScript { instructions }),
            [pos, ..] => Err(HarnessError::script(
                Some(pos + 2),
                "instructions after exit",
            )),
        }
    }

    /// Build a script from its body; `exit` is appended
    pub fn from_body(body: Vec<Instruction>) -> Result<Self> {
        let mut instructions = body;
        instructions.push(Instruction::Exit);
        InstructionScript::new(instructions)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut instructions = Vec::new();
        let mut exit_line = None;

        for (idx, raw) in text.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }
            if exit_line.is_some() {
                return Err(HarnessError::script(Some(line_no), "instructions after exit"));
            }
            let instruction = Instruction::parse_line(line, line_no)?;
            if instruction == Instruction::Exit {
                exit_line = Some(line_no);
            }
            instructions.push(instruction);
        }

        if exit_line.is_none() {
            return Err(HarnessError::script(None, "script does not end with exit"));
        }
        Ok(InstructionScript { instructions })
    }

    /// Every instruction including the final `exit`
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Instructions that produce a log entry
    pub fn body(&self) -> &[Instruction] {
        &self.instructions[..self.instructions.len() - 1]
    }

    /// Highest replica index this script reads from directly
    pub fn max_replica_index(&self) -> Option<usize> {
        self.instructions
            .iter()
            .filter_map(|i| match i {
                Instruction::Get { replica, .. } => *replica,
                _ => None,
            })
            .max()
    }
}

impl FromStr for InstructionScript {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self> {
        InstructionScript::parse(s)
    }
}

impl fmt::Display for InstructionScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for instruction in &self.instructions {
            writeln!(f, "{}", instruction)?;
        }
        Ok(())
    }
}
