//! Execution log records
//!
//! A client produces one entry per executed instruction, in issue order. The
//! on-disk form is one line per entry:
//!
//! ```text
//! # distkv-log v1
//! set x 12 10003
//! get x NULL 2
//! wait - - 8000
//! ```
//!
//! Fields are `<opcode> <key> <value> <latencyMs>`. `wait` has no key and no
//! observation, written as `-`, so it never matches a value or `NULL` check.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::model::{ABSENT_TOKEN, NULL_TOKEN};

/// Format version written in the log header
pub const LOG_VERSION: u32 = 1;

const HEADER_PREFIX: &str = "# distkv-log v";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Opcode {
    Set,
    Get,
    Wait,
}

impl Opcode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Opcode::Set => "set",
            Opcode::Get => "get",
            Opcode::Wait => "wait",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an entry recorded in its value field
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Observed {
    /// Value written or returned
    Value(String),
    /// The queried node had no record of the key
    Null,
    /// No observation (wait)
    Absent,
}

impl Observed {
    pub fn token(&self) -> &str {
        match self {
            Observed::Value(v) => v,
            Observed::Null => NULL_TOKEN,
            Observed::Absent => ABSENT_TOKEN,
        }
    }

    fn from_token(token: &str) -> Self {
        match token {
            NULL_TOKEN => Observed::Null,
            ABSENT_TOKEN => Observed::Absent,
            v => Observed::Value(v.to_string()),
        }
    }

    pub fn as_value(&self) -> Option<&str> {
        match self {
            Observed::Value(v) => Some(v),
            _ => None,
        }
    }
}

impl From<Option<String>> for Observed {
    fn from(value: Option<String>) -> Self {
        match value {
            Some(v) => Observed::Value(v),
            None => Observed::Null,
        }
    }
}

/// One executed instruction
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub opcode: Opcode,
    pub key: Option<String>,
    pub observed: Observed,
    /// Time from issuing the instruction until the client could issue the next
    #[serde(rename = "latency_ms", serialize_with = "as_millis")]
    pub latency: Duration,
}

fn as_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

impl LogEntry {
    pub fn set(key: impl Into<String>, acknowledged: impl Into<String>, latency: Duration) -> Self {
        LogEntry {
            opcode: Opcode::Set,
            key: Some(key.into()),
            observed: Observed::Value(acknowledged.into()),
            latency,
        }
    }

    pub fn get(key: impl Into<String>, value: Option<String>, latency: Duration) -> Self {
        LogEntry {
            opcode: Opcode::Get,
            key: Some(key.into()),
            observed: value.into(),
            latency,
        }
    }

    pub fn wait(latency: Duration) -> Self {
        LogEntry {
            opcode: Opcode::Wait,
            key: None,
            observed: Observed::Absent,
            latency,
        }
    }

    pub fn latency_ms(&self) -> u64 {
        self.latency.as_millis() as u64
    }

    /// Key and value fields as they appear on disk; latency is not a data field
    pub fn data_fields(&self) -> [&str; 2] {
        [
            self.key.as_deref().unwrap_or(ABSENT_TOKEN),
            self.observed.token(),
        ]
    }

    pub fn is_read_of(&self, key: &str) -> bool {
        self.opcode == Opcode::Get && self.key.as_deref() == Some(key)
    }

    /// Parse one data line. `exit` lines yield `Ok(None)`.
    pub(crate) fn parse_line(line: &str) -> Result<Option<Self>, String> {
        let fields: Vec<&str> = line.split_ascii_whitespace().collect();
        if fields.first() == Some(&"exit") {
            return Ok(None);
        }
        let [opcode, key, value, latency] = fields.as_slice() else {
            return Err(format!("expected 4 fields, found {}", fields.len()));
        };

        let latency_ms: u64 = latency
            .parse()
            .map_err(|_| format!("latency '{}' is not a non-negative integer", latency))?;
        let latency = Duration::from_millis(latency_ms);

        match *opcode {
            "set" | "get" => {
                if *key == ABSENT_TOKEN || *key == NULL_TOKEN {
                    return Err(format!("{} entry has no key", opcode));
                }
                let observed = Observed::from_token(value);
                let opcode = if *opcode == "set" {
                    if observed != Observed::Value(value.to_string()) {
                        return Err("set entry must carry the written value".to_string());
                    }
                    Opcode::Set
                } else {
                    if observed == Observed::Absent {
                        return Err("get entry must carry a value or NULL".to_string());
                    }
                    Opcode::Get
                };
                Ok(Some(LogEntry {
                    opcode,
                    key: Some(key.to_string()),
                    observed,
                    latency,
                }))
            }
            "wait" => Ok(Some(LogEntry::wait(latency))),
            "exit" => Ok(None),
            other => Err(format!("unknown opcode '{}'", other)),
        }
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [key, value] = self.data_fields();
        write!(f, "{} {} {} {}", self.opcode, key, value, self.latency_ms())
    }
}

/// Everything one client recorded, in issue order
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionLog {
    entries: Vec<LogEntry>,
}

impl ExecutionLog {
    pub fn new() -> Self {
        ExecutionLog::default()
    }

    pub fn push(&mut self, entry: LogEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn entry(&self, position: usize) -> Option<&LogEntry> {
        self.entries.get(position)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn opcodes(&self) -> Vec<Opcode> {
        self.entries.iter().map(|e| e.opcode).collect()
    }

    /// Observations of every `get` on `key`
    pub fn reads_of<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a Observed> + 'a {
        self.entries
            .iter()
            .filter(move |e| e.is_read_of(key))
            .map(|e| &e.observed)
    }

    /// Serialize with the version header
    pub fn to_text(&self) -> String {
        let mut out = format!("{}{}\n", HEADER_PREFIX, LOG_VERSION);
        for entry in &self.entries {
            out.push_str(&entry.to_string());
            out.push('\n');
        }
        out
    }

    /// Parse log text. Errors carry the 1-based line number.
    pub fn parse(text: &str) -> Result<Self, (Option<usize>, String)> {
        let mut log = ExecutionLog::new();

        for (idx, raw) in text.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(version) = line.strip_prefix(HEADER_PREFIX) {
                match version.trim().parse::<u32>() {
                    Ok(LOG_VERSION) => continue,
                    _ => {
                        return Err((
                            Some(line_no),
                            format!("unsupported log version '{}'", version.trim()),
                        ))
                    }
                }
            }
            if line.starts_with('#') {
                continue;
            }
            if let Some(entry) =
                LogEntry::parse_line(line).map_err(|reason| (Some(line_no), reason))?
            {
                log.push(entry);
            }
        }

        Ok(log)
    }
}

impl FromIterator<LogEntry> for ExecutionLog {
    fn from_iter<I: IntoIterator<Item = LogEntry>>(iter: I) -> Self {
        ExecutionLog {
            entries: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_entry_lines() {
        assert_eq!(LogEntry::set("x", "12", ms(10003)).to_string(), "set x 12 10003");
        assert_eq!(LogEntry::get("x", None, ms(2)).to_string(), "get x NULL 2");
        assert_eq!(
            LogEntry::get("x", Some("12".into()), ms(4)).to_string(),
            "get x 12 4"
        );
        assert_eq!(LogEntry::wait(ms(8000)).to_string(), "wait - - 8000");
    }

    #[test]
    fn test_parse_text() {
        let text = "# distkv-log v1\nwait - - 8001\nget x 12 3\n";
        let log = ExecutionLog::parse(text).unwrap();
        assert_eq!(log.opcodes(), vec![Opcode::Wait, Opcode::Get]);
        assert_eq!(log.entry(1).unwrap().observed, Observed::Value("12".into()));
        assert_eq!(log.entry(0).unwrap().latency, ms(8001));
        assert_eq!(ExecutionLog::parse(&log.to_text()).unwrap(), log);
    }

    #[test]
    fn test_parse_without_header_and_with_exit() {
        let log = ExecutionLog::parse("set x 12 5\nexit - - 0\n").unwrap();
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_wait_with_null_value_is_not_an_observation() {
        let log = ExecutionLog::parse("wait - NULL 8000\n").unwrap();
        assert_eq!(log.entry(0).unwrap().observed, Observed::Absent);
    }

    #[test]
    fn test_parse_errors() {
        let (line, reason) = ExecutionLog::parse("set x 12 5\nget x 7\n").unwrap_err();
        assert_eq!(line, Some(2));
        assert!(reason.contains("4 fields"));

        assert!(ExecutionLog::parse("get x 1 -5\n").is_err());
        assert!(ExecutionLog::parse("put x 1 5\n").is_err());
        assert!(ExecutionLog::parse("get - 1 5\n").is_err());
        assert!(ExecutionLog::parse("get x - 5\n").is_err());
        assert!(ExecutionLog::parse("# distkv-log v9\n").is_err());
    }

    #[test]
    fn test_reads_of_key() {
        let log: ExecutionLog = vec![
            LogEntry::set("x", "12", ms(1)),
            LogEntry::get("x", Some("12".into()), ms(1)),
            LogEntry::get("y", None, ms(1)),
            LogEntry::wait(ms(1)),
        ]
        .into_iter()
        .collect();

        let reads: Vec<_> = log.reads_of("x").collect();
        assert_eq!(reads, vec![&Observed::Value("12".into())]);
        assert_eq!(log.reads_of("y").count(), 1);
        assert_eq!(log.reads_of("z").count(), 0);
    }
}
