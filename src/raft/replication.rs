//! The leader's replication driver (§4.5): periodic `AppendEntries` fan-out,
//! per-follower cursor updates, and commit-index advancement.

use std::sync::Arc;

use log::{debug, info};

use crate::rpc::{AppendEntriesArgs, AppendEntriesReply};
use crate::types::{PeerId, Role};

use super::Raft;

impl Raft {
    /// Runs for as long as this replica remains Leader in `term`. Ticks
    /// every `heartbeat_interval`, dispatching one `AppendEntries` per
    /// follower in parallel each round. Exits as soon as a tick observes the
    /// role or term has changed (step-down), or the replica is killed.
    pub(super) async fn run_replication_driver(self: Arc<Self>, term: u64) {
        while !self.is_killed() {
            let still_leader = {
                let state = self.state.lock().await;
                state.role == Role::Leader && state.current_term == term
            };
            if !still_leader {
                return;
            }

            for peer in self.other_peers() {
                tokio::spawn(Arc::clone(&self).replicate_to_peer(peer, term));
            }

            tokio::time::sleep(self.config.heartbeat_interval).await;
        }
    }

    /// Sends one `AppendEntries` to `peer` carrying whatever the leader's
    /// `next_index[peer]` says it still needs, and processes the reply.
    /// Spawned both by the periodic driver and, on a consistency failure,
    /// immediately again without waiting for the next tick (§4.5).
    async fn replicate_to_peer(self: Arc<Self>, peer: PeerId, term: u64) {
        let args = {
            let state = self.state.lock().await;
            if state.role != Role::Leader || state.current_term != term {
                return;
            }
            let next_index = state.next_index[peer];
            let prev_log_index = next_index - 1;
            let prev_log_term = state.term_at(prev_log_index).unwrap_or(0);
            let entries = state.log[next_index as usize..].to_vec();
            AppendEntriesArgs {
                term,
                leader_id: self.me,
                prev_log_index,
                prev_log_term,
                entries,
                leader_commit: state.commit_index,
            }
        };

        let sent_prev_index = args.prev_log_index;
        let sent_entries_len = args.entries.len() as u64;

        let reply = match self.peers[peer].append_entries(args).await {
            Ok(reply) => reply,
            // Transient transport failure: no information, retried on the
            // next heartbeat tick.
            Err(e) => {
                debug!("[{}] append_entries to {} failed: {}", self.me, peer, e);
                return;
            }
        };

        self.handle_append_entries_reply(peer, term, sent_prev_index, sent_entries_len, reply)
            .await;
    }

    async fn handle_append_entries_reply(
        self: Arc<Self>,
        peer: PeerId,
        term: u64,
        sent_prev_index: u64,
        sent_entries_len: u64,
        reply: AppendEntriesReply,
    ) {
        let mut state = self.state.lock().await;

        if reply.term > state.current_term {
            state.maybe_step_down_for_term(reply.term);
            self.persist(&state);
            return;
        }

        // A reply for a round we are no longer leading (stepped down and
        // back up, or a stale reply from a prior term) carries no useful
        // cursor information.
        if state.role != Role::Leader || state.current_term != term {
            return;
        }

        if reply.success {
            let new_match = sent_prev_index + sent_entries_len;
            if new_match > state.match_index[peer] {
                state.match_index[peer] = new_match;
            }
            state.next_index[peer] = state.match_index[peer] + 1;
            drop(state);
            self.advance_commit_index(term).await;
        } else {
            state.next_index[peer] = reply.conflict_next_index.max(1);
            drop(state);
            // Retry immediately with the rewound next_index rather than
            // waiting for the next heartbeat tick (§4.5, §7).
            tokio::spawn(Arc::clone(&self).replicate_to_peer(peer, term));
        }
    }

    /// §4.5 commit advancement: the largest index replicated to a majority
    /// whose entry belongs to the current term. Leaders never commit a prior
    /// term's entry directly — only transitively, once some entry of their
    /// own term reaches majority (§5.4 of the paper, scenario 6 in the
    /// testable properties).
    async fn advance_commit_index(&self, term: u64) {
        let mut state = self.state.lock().await;
        if state.role != Role::Leader || state.current_term != term {
            return;
        }

        let last_index = state.last_log_index();
        let majority = self.majority();

        let mut candidate = state.commit_index;
        for n in (state.commit_index + 1)..=last_index {
            if state.term_at(n) != Some(state.current_term) {
                continue;
            }
            let replicated_count = state.match_index.iter().filter(|&&m| m >= n).count();
            if replicated_count >= majority {
                candidate = n;
            }
        }

        if candidate > state.commit_index {
            state.commit_index = candidate;
            info!("[{}] leader advanced commit_index to {}", self.me, candidate);
            let _ = self.commit_signal.send(());
        }
    }
}
