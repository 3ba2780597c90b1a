//! Transcript logs
//!
//! The reference Go client records each instruction as it runs, together with
//! the reply it waited for:
//!
//! ```text
//! INITIATED @ 1700000000000: get x 0
//! RECEIVED: get-result x 12 1700000000
//! FINISHED @ 1700000000000 (LATENCY: 1503 ms): get x 0
//! INITIATED @ 1700000001503: exit
//! ```
//!
//! Every `FINISHED` line becomes one entry. Its observed value is taken from
//! the `RECEIVED` reply of the same instruction.

use std::time::Duration;

use super::entry::{ExecutionLog, LogEntry};
use crate::model::NULL_TOKEN;

const INITIATED: &str = "INITIATED @ ";
const RECEIVED: &str = "RECEIVED:";
const FINISHED: &str = "FINISHED @ ";

/// True when the first non-empty line is a transcript line
pub(crate) fn is_transcript(text: &str) -> bool {
    text.lines()
        .map(clean)
        .find(|line| !line.is_empty())
        .is_some_and(|line| {
            line.starts_with(INITIATED) || line.starts_with(RECEIVED) || line.starts_with(FINISHED)
        })
}

/// Replies are read from fixed-size socket buffers and may carry NUL padding
fn clean(line: &str) -> &str {
    line.trim_matches(|c: char| c.is_whitespace() || c == '\0')
}

/// Parse a transcript. Errors carry the 1-based line number.
pub(crate) fn parse(text: &str) -> Result<ExecutionLog, (Option<usize>, String)> {
    let mut log = ExecutionLog::new();
    let mut reply: Option<Vec<&str>> = None;

    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = clean(raw);
        if line.is_empty() {
            continue;
        }

        if line.starts_with(INITIATED) {
            reply = None;
        } else if let Some(message) = line.strip_prefix(RECEIVED) {
            reply = Some(message.split_ascii_whitespace().collect());
        } else if let Some(rest) = line.strip_prefix(FINISHED) {
            let entry = finished(rest, reply.take()).map_err(|reason| (Some(line_no), reason))?;
            log.push(entry);
        } else {
            return Err((Some(line_no), format!("unrecognized transcript line '{}'", line)));
        }
    }

    Ok(log)
}

/// `<start> (LATENCY: <n> ms): <instruction>`
fn finished(rest: &str, reply: Option<Vec<&str>>) -> Result<LogEntry, String> {
    let (_, after) = rest
        .split_once("(LATENCY: ")
        .ok_or_else(|| "FINISHED line has no latency".to_string())?;
    let (ms, instruction) = after
        .split_once(" ms):")
        .ok_or_else(|| "FINISHED line has no latency".to_string())?;
    let latency_ms: u64 = ms
        .trim()
        .parse()
        .map_err(|_| format!("latency '{}' is not a non-negative integer", ms.trim()))?;
    let latency = Duration::from_millis(latency_ms);

    let tokens: Vec<&str> = instruction.split_ascii_whitespace().collect();
    match tokens.as_slice() {
        ["wait", ..] => Ok(LogEntry::wait(latency)),
        ["set", key, _] => match reply_value(reply, "primary-set-result", key)? {
            Some(acknowledged) => Ok(LogEntry::set(*key, acknowledged, latency)),
            None => Err(format!("set {} acknowledged with {}", key, NULL_TOKEN)),
        },
        ["get", key] | ["get", key, _] => {
            let observed = reply_value(reply, "get-result", key)?;
            Ok(LogEntry::get(*key, observed, latency))
        }
        _ => Err(format!("unexpected instruction '{}'", instruction.trim())),
    }
}

/// Value field of a `<kind> <key> <value> <id>` reply; `None` for `NULL`
fn reply_value(reply: Option<Vec<&str>>, kind: &str, key: &str) -> Result<Option<String>, String> {
    let reply = reply.ok_or_else(|| format!("no reply recorded for {} {}", kind, key))?;
    match reply.as_slice() {
        [k, reply_key, value, ..] if *k == kind && *reply_key == key => {
            Ok((*value != NULL_TOKEN).then(|| value.to_string()))
        }
        _ => Err(format!("expected a {} reply for key {}, got '{}'", kind, key, reply.join(" "))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::{Observed, Opcode};

    const WRITER: &str = "INITIATED @ 1700000000000: set x 12\n\
        RECEIVED: primary-set-result x 12 1700000000\n\
        FINISHED @ 1700000000000 (LATENCY: 10004 ms): set x 12\n\
        INITIATED @ 1700000010004: exit\n";

    const STALE_READER: &str = "INITIATED @ 1700000000000: wait 8\n\
        FINISHED @ 1700000000000 (LATENCY: 8001 ms): wait 8\n\
        INITIATED @ 1700000008001: get x 1\n\
        RECEIVED: get-result x NULL 1700000008\0\0\0\n\
        FINISHED @ 1700000008001 (LATENCY: 1502 ms): get x 1\n\
        INITIATED @ 1700000009503: exit\n";

    #[test]
    fn test_writer_transcript() {
        assert!(is_transcript(WRITER));
        let log = parse(WRITER).unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log.entry(0).unwrap().to_string(), "set x 12 10004");
    }

    #[test]
    fn test_reader_transcript() {
        let log = parse(STALE_READER).unwrap();
        assert_eq!(log.opcodes(), vec![Opcode::Wait, Opcode::Get]);
        assert_eq!(log.entry(1).unwrap().observed, Observed::Null);
        assert_eq!(log.entry(1).unwrap().latency_ms(), 1502);
        assert_eq!(log.entry(0).unwrap().latency_ms(), 8001);
    }

    #[test]
    fn test_structured_log_is_not_a_transcript() {
        assert!(!is_transcript("# distkv-log v1\nset x 12 5\n"));
        assert!(!is_transcript(""));
    }

    #[test]
    fn test_malformed_transcripts() {
        // Reply for another key
        let text = "INITIATED @ 1: get x\nRECEIVED: get-result y 1 1\nFINISHED @ 1 (LATENCY: 2 ms): get x\n";
        assert_eq!(parse(text).unwrap_err().0, Some(3));

        // Reply missing
        let text = "INITIATED @ 1: get x\nFINISHED @ 1 (LATENCY: 2 ms): get x\n";
        assert!(parse(text).unwrap_err().1.contains("no reply"));

        // Stray line
        assert_eq!(parse("INITIATED @ 1: get x\nhello\n").unwrap_err().0, Some(2));

        // Bad latency
        assert!(parse("FINISHED @ 1 (LATENCY: soon ms): wait 1\n").is_err());
    }
}
