//! Shared wire and host-facing types: log entries, roles, and applied commands.

use serde::{Deserialize, Serialize};

/// Index of a peer within the fixed, statically known peer array.
pub type PeerId = usize;

/// A single entry in the replicated log.
///
/// `command` is an opaque blob supplied by the host; the consensus core never
/// inspects it. Index 0 of every log is a sentinel entry (`term: 0`, empty
/// command) so that `prev_log_index == 0` is always a valid reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub term: u64,
    pub command: Vec<u8>,
}

impl LogEntry {
    pub(crate) fn sentinel() -> Self {
        LogEntry {
            term: 0,
            command: Vec::new(),
        }
    }
}

/// The role a replica currently believes it occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Follower,
    Candidate,
    Leader,
}

/// A newly committed log entry delivered to the host state machine, in index
/// order, exactly once per index.
#[derive(Debug, Clone)]
pub struct ApplyMsg {
    pub valid: bool,
    pub command: Vec<u8>,
    pub index: u64,
}
