//! The volatile and persistent fields of a replica (§3), plus the pure
//! comparisons the RPC handlers and replication driver need.

use serde::{Deserialize, Serialize};

use crate::types::{LogEntry, PeerId, Role};

#[derive(Debug, Serialize, Deserialize)]
struct PersistentSnapshot {
    current_term: u64,
    voted_for: Option<PeerId>,
    log: Vec<LogEntry>,
}

/// All mutable state of a replica, persistent and volatile, protected by a
/// single mutex in [`crate::raft::Raft`]. `next_index`/`match_index` are only
/// meaningful while `role == Role::Leader`, but are kept allocated
/// (indexed by peer id) rather than reinitialized as `Option` each term, to
/// avoid reallocating on every election.
pub struct RaftState {
    // Persistent state (§3 PersistentState).
    pub current_term: u64,
    pub voted_for: Option<PeerId>,
    pub log: Vec<LogEntry>,

    // Volatile state, all peers (§3 VolatileState).
    pub role: Role,
    pub commit_index: u64,
    pub last_applied: u64,
    pub leader_hint: Option<PeerId>,
    pub heartbeat_seen: bool,

    // Volatile state, leaders only (§3 LeaderVolatileState).
    pub next_index: Vec<u64>,
    pub match_index: Vec<u64>,
}

impl RaftState {
    pub fn new(n_peers: usize) -> Self {
        RaftState {
            current_term: 0,
            voted_for: None,
            log: vec![LogEntry::sentinel()],
            role: Role::Follower,
            commit_index: 0,
            last_applied: 0,
            leader_hint: None,
            heartbeat_seen: false,
            next_index: vec![0; n_peers],
            match_index: vec![0; n_peers],
        }
    }

    pub fn last_log_index(&self) -> u64 {
        self.log.len() as u64 - 1
    }

    pub fn last_log_term(&self) -> u64 {
        self.log[self.last_log_index() as usize].term
    }

    pub fn term_at(&self, index: u64) -> Option<u64> {
        self.log.get(index as usize).map(|e| e.term)
    }

    /// §4.3 step 3: is a candidate's log at least as up-to-date as mine?
    pub fn is_candidate_log_up_to_date(&self, last_log_term: u64, last_log_idx: u64) -> bool {
        let my_last_term = self.last_log_term();
        let my_last_idx = self.last_log_index();
        last_log_term > my_last_term || (last_log_term == my_last_term && last_log_idx >= my_last_idx)
    }

    /// Adopts `term` and resets to Follower with a cleared vote, per the
    /// term-update rule in §4.1. No-op (and returns `false`) if `term` is not
    /// strictly greater than the current term.
    pub fn maybe_step_down_for_term(&mut self, term: u64) -> bool {
        if term <= self.current_term {
            return false;
        }
        self.current_term = term;
        self.voted_for = None;
        self.role = Role::Follower;
        true
    }

    /// Reinitializes leader volatile state on winning an election (§4.2).
    pub fn become_leader(&mut self, me: PeerId) {
        self.role = Role::Leader;
        self.leader_hint = Some(me);
        let next = self.log.len() as u64;
        for n in self.next_index.iter_mut() {
            *n = next;
        }
        for m in self.match_index.iter_mut() {
            *m = 0;
        }
        self.match_index[me] = self.last_log_index();
    }

    pub fn encode(&self) -> Vec<u8> {
        let snapshot = PersistentSnapshot {
            current_term: self.current_term,
            voted_for: self.voted_for,
            log: self.log.clone(),
        };
        // Encoding a well-formed snapshot of our own in-memory fields never
        // fails; bincode only errors on types it can't represent.
        bincode::serialize(&snapshot).expect("persistent state is always encodable")
    }

    /// Restores `(current_term, voted_for, log)` from a previously saved
    /// blob. Returns `false` (leaving state untouched) if `blob` is empty or
    /// fails to decode, per §7's "persistence decode failure at boot" rule;
    /// the caller should log a diagnostic and start fresh at term 0.
    pub fn restore(&mut self, blob: &[u8]) -> bool {
        if blob.is_empty() {
            return false;
        }
        match bincode::deserialize::<PersistentSnapshot>(blob) {
            Ok(snapshot) => {
                self.current_term = snapshot.current_term;
                self.voted_for = snapshot.voted_for;
                self.log = snapshot.log;
                true
            }
            Err(_) => false,
        }
    }
}
