//! Inbound RPC handlers (§4.3, §4.4): `RequestVote` and `AppendEntries`.
//!
//! Both run the full "atomic" receiver logic while holding the state lock,
//! including the persist() calls the logic requires, matching the locking
//! discipline in §5 (persistence happens before any reply that depends on
//! the persisted fields, without releasing the lock in between).

use log::{debug, info};

use crate::rpc::{AppendEntriesArgs, AppendEntriesReply, RequestVoteArgs, RequestVoteReply};
use crate::types::{LogEntry, Role};

use super::Raft;

impl Raft {
    pub async fn request_vote(&self, args: RequestVoteArgs) -> RequestVoteReply {
        let mut state = self.state.lock().await;

        if args.term < state.current_term {
            return RequestVoteReply {
                term: state.current_term,
                vote_granted: false,
            };
        }

        let stepped_down = state.maybe_step_down_for_term(args.term);

        let already_voted_for_other = matches!(state.voted_for, Some(v) if v != args.cand_id);
        let log_ok = state.is_candidate_log_up_to_date(args.last_log_term, args.last_log_idx);

        let vote_granted = !already_voted_for_other && log_ok;
        if vote_granted {
            state.voted_for = Some(args.cand_id);
            state.heartbeat_seen = true;
        }

        if stepped_down || vote_granted {
            self.persist(&state);
        }

        if vote_granted {
            info!("[{}] granted vote to {} for term {}", self.me, args.cand_id, args.term);
        } else {
            debug!(
                "[{}] denied vote to {} for term {} (already_voted_for_other={}, log_ok={})",
                self.me, args.cand_id, args.term, already_voted_for_other, log_ok
            );
        }

        RequestVoteReply {
            term: state.current_term,
            vote_granted,
        }
    }

    pub async fn append_entries(&self, args: AppendEntriesArgs) -> AppendEntriesReply {
        let mut state = self.state.lock().await;

        if args.term < state.current_term {
            return AppendEntriesReply {
                term: state.current_term,
                success: false,
                conflict_next_index: 0,
            };
        }

        let stepped_down = state.maybe_step_down_for_term(args.term);
        state.heartbeat_seen = true;
        state.leader_hint = Some(args.leader_id);
        state.role = Role::Follower;

        let log_len = state.log.len() as u64;
        if args.prev_log_index >= log_len {
            if stepped_down {
                self.persist(&state);
            }
            return AppendEntriesReply {
                term: state.current_term,
                success: false,
                conflict_next_index: log_len,
            };
        }

        if state.term_at(args.prev_log_index) != Some(args.prev_log_term) {
            let mut probe = args.prev_log_index;
            while probe > 0 && state.term_at(probe) != Some(args.prev_log_term) {
                probe -= 1;
            }
            if stepped_down {
                self.persist(&state);
            }
            return AppendEntriesReply {
                term: state.current_term,
                success: false,
                conflict_next_index: probe + 1,
            };
        }

        let num_entries = args.entries.len() as u64;
        let mut log_changed = false;
        let mut next_index = args.prev_log_index + 1;
        for entry in args.entries {
            merge_one_entry(&mut state.log, next_index, entry, &mut log_changed);
            next_index += 1;
        }

        if log_changed || stepped_down {
            self.persist(&state);
        }

        if args.leader_commit > state.commit_index {
            let last_new_index = args.prev_log_index + num_entries;
            state.commit_index = args.leader_commit.min(last_new_index);
            let _ = self.commit_signal.send(());
        }

        AppendEntriesReply {
            term: state.current_term,
            success: true,
            conflict_next_index: 0,
        }
    }
}

/// Applies the Figure-2 "delete conflicting suffix, then append" merge rule
/// for a single incoming entry landing at `index`. Only ever truncates
/// indices that a correct leader would not have committed yet (invariant 4).
fn merge_one_entry(log: &mut Vec<LogEntry>, index: u64, entry: LogEntry, changed: &mut bool) {
    let idx = index as usize;
    if idx < log.len() {
        if log[idx].term != entry.term {
            log.truncate(idx);
            log.push(entry);
            *changed = true;
        }
    } else {
        log.push(entry);
        *changed = true;
    }
}
