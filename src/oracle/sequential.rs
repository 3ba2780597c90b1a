//! Sequential consistency checker
//!
//! Searches for a single total order of every client's `set` and `get`
//! entries that keeps each client's program order and in which every `get`
//! returns the latest preceding `set` of its key (`NULL` before any). Real
//! time is ignored, so a read may lag a write that completed earlier.
//!
//! The search is a depth-first interleaving with backtracking. Reads that hold
//! in the current store are taken eagerly since they cannot change it; states
//! already proven dead are memoized.

use std::collections::{BTreeMap, HashSet};

use crate::log::{ExecutionLog, Observed, Opcode};
use crate::model::{Instruction, InstructionScript, NodeAddress};

use super::predicate::PredicateFailure;

#[derive(Clone, Debug, PartialEq, Eq)]
enum Op {
    Write { key: String, value: String },
    Read { key: String, value: Option<String> },
}

/// A client's operations with their positions in its log
struct History<'a> {
    client: &'a NodeAddress,
    ops: Vec<(usize, Op)>,
}

impl<'a> History<'a> {
    fn from_log(client: &'a NodeAddress, log: &ExecutionLog, script: Option<&InstructionScript>) -> Self {
        let ops = log
            .entries()
            .iter()
            .enumerate()
            .filter_map(|(pos, entry)| {
                let key = entry.key.clone()?;
                let op = match (entry.opcode, &entry.observed) {
                    (Opcode::Set, Observed::Value(logged)) => {
                        let value = scripted_value(script, pos, &key).unwrap_or_else(|| logged.clone());
                        Op::Write { key, value }
                    }
                    (Opcode::Get, Observed::Value(v)) => Op::Read { key, value: Some(v.clone()) },
                    (Opcode::Get, Observed::Null) => Op::Read { key, value: None },
                    _ => return None,
                };
                Some((pos, op))
            })
            .collect();
        History { client, ops }
    }
}

/// The value the script wrote at `pos`. A client may log an acknowledgement
/// such as `ok` in place of the value.
fn scripted_value(script: Option<&InstructionScript>, pos: usize, key: &str) -> Option<String> {
    match script?.body().get(pos)? {
        Instruction::Set { key: k, value } if k == key => Some(value.clone()),
        _ => None,
    }
}

type Store = BTreeMap<String, String>;

/// One open state of the search
struct Frame {
    cursor: Vec<usize>,
    store: Store,
    /// Length of the order before this state's write and drained reads
    mark: usize,
    /// Next client whose pending write is worth trying
    next: usize,
}

enum Visit {
    Complete,
    Dead,
    Open(Frame),
}

struct Search<'a> {
    histories: Vec<History<'a>>,
    dead: HashSet<(Vec<usize>, Store)>,
    /// Furthest state reached, for diagnostics
    best: (usize, Vec<usize>, Store),
}

impl<'a> Search<'a> {
    fn step_is_valid(op: &Op, store: &Store) -> bool {
        match op {
            Op::Write { .. } => true,
            Op::Read { key, value } => store.get(key) == value.as_ref(),
        }
    }

    fn apply(op: &Op, store: &mut Store) {
        if let Op::Write { key, value } = op {
            store.insert(key.clone(), value.clone());
        }
    }

    /// Take every read that currently holds, repeatedly
    fn drain_reads(&self, cursor: &mut [usize], store: &Store, order: &mut Vec<(usize, usize)>) {
        let mut progressed = true;
        while progressed {
            progressed = false;
            for (c, history) in self.histories.iter().enumerate() {
                while let Some((pos, op @ Op::Read { .. })) = history.ops.get(cursor[c]) {
                    if !Self::step_is_valid(op, store) {
                        break;
                    }
                    order.push((c, *pos));
                    cursor[c] += 1;
                    progressed = true;
                }
            }
        }
    }

    fn visit(&mut self, mut cursor: Vec<usize>, store: Store, mark: usize, order: &mut Vec<(usize, usize)>) -> Visit {
        self.drain_reads(&mut cursor, &store, order);

        let done: usize = cursor.iter().sum();
        if done == self.total() {
            return Visit::Complete;
        }
        if done > self.best.0 {
            self.best = (done, cursor.clone(), store.clone());
        }

        let state = (cursor, store);
        if self.dead.contains(&state) {
            order.truncate(mark);
            return Visit::Dead;
        }
        let (cursor, store) = state;
        Visit::Open(Frame {
            cursor,
            store,
            mark,
            next: 0,
        })
    }

    /// Depth-first search on an explicit stack; `order` holds the complete
    /// interleaving on success
    fn run(&mut self, order: &mut Vec<(usize, usize)>) -> bool {
        let start = vec![0; self.histories.len()];
        let mut stack = match self.visit(start, Store::new(), order.len(), order) {
            Visit::Complete => return true,
            Visit::Dead => return false,
            Visit::Open(frame) => vec![frame],
        };

        while let Some(frame) = stack.last_mut() {
            // Only writes can unblock a stuck read, so branch on each pending write
            let pending = (frame.next..self.histories.len()).find_map(|c| {
                match self.histories[c].ops.get(frame.cursor[c]) {
                    Some((pos, op @ Op::Write { .. })) => Some((c, *pos, op.clone())),
                    _ => None,
                }
            });

            let Some((c, pos, op)) = pending else {
                if let Some(exhausted) = stack.pop() {
                    order.truncate(exhausted.mark);
                    self.dead.insert((exhausted.cursor, exhausted.store));
                }
                continue;
            };

            frame.next = c + 1;
            let mut store = frame.store.clone();
            Self::apply(&op, &mut store);
            let mut cursor = frame.cursor.clone();
            cursor[c] += 1;

            let mark = order.len();
            order.push((c, pos));
            match self.visit(cursor, store, mark, order) {
                Visit::Complete => return true,
                Visit::Dead => {}
                Visit::Open(child) => stack.push(child),
            }
        }
        false
    }

    fn total(&self) -> usize {
        self.histories.iter().map(|h| h.ops.len()).sum()
    }

    fn describe_stuck(&self) -> String {
        let (_, cursor, store) = &self.best;
        let blocked: Vec<String> = self
            .histories
            .iter()
            .zip(cursor)
            .filter_map(|(history, &at)| match history.ops.get(at) {
                Some((pos, Op::Read { key, value })) => Some(format!(
                    "{} entry {} read {}={} while store holds {}",
                    history.client,
                    pos,
                    key,
                    value.as_deref().unwrap_or("NULL"),
                    store.get(key).map(String::as_str).unwrap_or("NULL"),
                )),
                _ => None,
            })
            .collect();
        if blocked.is_empty() {
            "no order respects every client's program order".to_string()
        } else {
            blocked.join("; ")
        }
    }
}

/// Find a sequentially consistent order, as `(client, log position)` pairs.
/// Written values come from `scripts` where a client has one.
pub fn find_order(
    logs: &BTreeMap<NodeAddress, ExecutionLog>,
    scripts: &BTreeMap<NodeAddress, InstructionScript>,
) -> Option<Vec<(NodeAddress, usize)>> {
    let mut search = new_search(logs, scripts);
    let mut order = Vec::new();
    if search.run(&mut order) {
        Some(
            order
                .into_iter()
                .map(|(c, pos)| (search.histories[c].client.clone(), pos))
                .collect(),
        )
    } else {
        None
    }
}

fn new_search<'a>(
    logs: &'a BTreeMap<NodeAddress, ExecutionLog>,
    scripts: &BTreeMap<NodeAddress, InstructionScript>,
) -> Search<'a> {
    let histories: Vec<History<'a>> = logs
        .iter()
        .map(|(client, log)| History::from_log(client, log, scripts.get(client)))
        .collect();
    let start = vec![0; histories.len()];
    Search {
        histories,
        dead: HashSet::new(),
        best: (0, start, Store::new()),
    }
}

/// Check the combined logs, describing the furthest point reached on failure
pub(crate) fn check(
    logs: &BTreeMap<NodeAddress, ExecutionLog>,
    scripts: &BTreeMap<NodeAddress, InstructionScript>,
) -> Result<(), PredicateFailure> {
    let mut search = new_search(logs, scripts);
    if search.run(&mut Vec::new()) {
        return Ok(());
    }
    Err(PredicateFailure {
        description: "logs are sequentially consistent".to_string(),
        client: None,
        expected: "a total order of all reads and writes preserving each client's program order".to_string(),
        found: search.describe_stuck(),
    })
}
