//! Wire structures for the two inbound RPCs peers exchange.
//!
//! Field names and meanings are normative; encoding is whatever the
//! transport picks (the TCP transport in [`crate::transport`] uses JSON).

use serde::{Deserialize, Serialize};

use crate::types::{LogEntry, PeerId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestVoteArgs {
    pub term: u64,
    pub cand_id: PeerId,
    pub last_log_idx: u64,
    pub last_log_term: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestVoteReply {
    pub term: u64,
    pub vote_granted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesArgs {
    pub term: u64,
    pub leader_id: PeerId,
    pub prev_log_index: u64,
    pub prev_log_term: u64,
    pub entries: Vec<LogEntry>,
    pub leader_commit: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesReply {
    pub term: u64,
    pub success: bool,
    pub conflict_next_index: u64,
}
