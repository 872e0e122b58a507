//! Election timer and candidacy driver (§4.2).

use std::sync::Arc;
use std::time::Duration;

use log::info;
use rand::Rng;

use crate::rpc::RequestVoteArgs;
use crate::types::Role;

use super::Raft;

impl Raft {
    fn random_election_timeout(&self) -> Duration {
        let lo = self.config.election_timeout_min.as_millis() as u64;
        let hi = self.config.election_timeout_max.as_millis() as u64;
        let ms = rand::thread_rng().gen_range(lo..=hi);
        Duration::from_millis(ms)
    }

    /// Perpetual per-replica ticker. Sleeps a randomized interval, and if no
    /// heartbeat was seen and we aren't already leading, kicks off a
    /// candidacy in a detached task so the ticker itself never blocks on an
    /// election's outcome.
    pub(super) async fn run_election_timer(self: Arc<Self>) {
        while !self.is_killed() {
            let timeout = self.random_election_timeout();
            tokio::time::sleep(timeout).await;
            if self.is_killed() {
                return;
            }

            let should_start_election = {
                let state = self.state.lock().await;
                !state.heartbeat_seen && state.role != Role::Leader
            };

            if should_start_election {
                tokio::spawn(Arc::clone(&self).run_election());
            }

            self.state.lock().await.heartbeat_seen = false;
        }
    }

    /// Runs one candidacy end to end: becomes Candidate, persists, fans out
    /// `RequestVote` in parallel, and resolves into Leader, Follower (on a
    /// higher term), or falls back to remaining Candidate for the next
    /// election timeout.
    async fn run_election(self: Arc<Self>) {
        let (term, last_log_index, last_log_term) = {
            let mut state = self.state.lock().await;
            state.role = Role::Candidate;
            state.current_term += 1;
            state.voted_for = Some(self.me);
            self.persist(&state);
            (state.current_term, state.last_log_index(), state.last_log_term())
        };

        info!("[{}] starting election for term {}", self.me, term);

        let majority = self.majority();
        let mut votes_granted = 1usize; // we voted for ourselves

        if votes_granted >= majority {
            self.clone().finish_election_as_winner(term).await;
            return;
        }

        let args = RequestVoteArgs {
            term,
            cand_id: self.me,
            last_log_idx: last_log_index,
            last_log_term,
        };

        let mut tasks = Vec::new();
        for peer in self.other_peers() {
            let rf = Arc::clone(&self);
            let args = args.clone();
            tasks.push(tokio::spawn(async move { rf.peers[peer].request_vote(args).await }));
        }

        for task in tasks {
            let reply = match task.await {
                Ok(Ok(reply)) => reply,
                // Transient transport failure or a panicked RPC task: the
                // missing vote simply doesn't count (§7).
                Ok(Err(_)) | Err(_) => continue,
            };

            let mut state = self.state.lock().await;
            if state.maybe_step_down_for_term(reply.term) {
                self.persist(&state);
                return;
            }
            let still_this_election = state.role == Role::Candidate && state.current_term == term;
            drop(state);

            if !still_this_election {
                return;
            }

            if reply.vote_granted {
                votes_granted += 1;
                if votes_granted >= majority {
                    self.clone().finish_election_as_winner(term).await;
                    return;
                }
            }
        }

        // Split vote or not enough replies: remain Candidate. The next
        // election timeout will bump the term and try again.
    }

    async fn finish_election_as_winner(self: Arc<Self>, term: u64) {
        let became_leader = {
            let mut state = self.state.lock().await;
            if state.role == Role::Candidate && state.current_term == term {
                state.become_leader(self.me);
                true
            } else {
                false
            }
        };

        if became_leader {
            info!("[{}] became leader for term {}", self.me, term);
            tokio::spawn(Arc::clone(&self).run_replication_driver(term));
        }
    }
}
