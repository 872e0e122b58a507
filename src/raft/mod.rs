//! The Raft consensus core: per-peer role, leader election, log replication,
//! commit-index advancement, and delivery of committed entries to the host.
//!
//! The algorithm itself lives across this module's siblings, split by the
//! component breakdown of the design: [`state`] (the volatile/persistent
//! fields and their pure comparisons), [`election`] (timer + candidacy),
//! [`replication`] (the leader's replication driver), [`handlers`] (the two
//! inbound RPCs), and [`apply`] (the apply pump). This file owns the shared
//! `Raft` struct and the handful of operations the host calls directly.

mod apply;
mod election;
mod handlers;
mod replication;
pub mod state;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::info;
use tokio::sync::{mpsc, watch, Mutex};

use crate::config::RaftConfig;
use crate::persister::Persister;
use crate::transport::RpcTransport;
use crate::types::{ApplyMsg, LogEntry, PeerId, Role};

use self::state::RaftState;

/// A single Raft peer.
///
/// Always lives behind an `Arc` once started: [`Raft::new`] hands back an
/// `Arc<Raft>` with the election ticker and apply pump already spawned, the
/// same way background tasks keep their own clone of the `Arc` alive for as
/// long as they run.
pub struct Raft {
    me: PeerId,
    peer_count: usize,
    peers: Vec<Box<dyn RpcTransport>>,
    persister: Box<dyn Persister>,
    config: RaftConfig,

    state: Mutex<RaftState>,
    killed: AtomicBool,
    /// Wakes the apply pump whenever `commit_index` may have advanced.
    /// `watch` (rather than `Notify`) is used deliberately: its "has this
    /// changed since I last looked" semantics can't lose a wakeup the way a
    /// bare `Notify::notify_waiters()` can if it fires between the pump
    /// checking state and subscribing to wait.
    commit_signal: watch::Sender<()>,
    apply_tx: mpsc::Sender<ApplyMsg>,
}

impl Raft {
    /// Constructs and starts a replica: restores persisted state (if any),
    /// then spawns the election ticker and the apply pump and returns
    /// immediately. `peers[me]` must be a no-op/unused entry — the core
    /// never calls out to itself.
    pub fn new(
        peers: Vec<Box<dyn RpcTransport>>,
        me: PeerId,
        persister: Box<dyn Persister>,
        apply_tx: mpsc::Sender<ApplyMsg>,
        config: RaftConfig,
    ) -> Arc<Raft> {
        let peer_count = peers.len();
        let mut state = RaftState::new(peer_count);

        let blob = persister.read_raft_state();
        if !blob.is_empty() && !state.restore(&blob) {
            log::error!("[{}] failed to decode persisted state; starting fresh at term 0", me);
        }

        let (commit_signal, commit_signal_rx) = watch::channel(());

        let rf = Arc::new(Raft {
            me,
            peer_count,
            peers,
            persister,
            config,
            state: Mutex::new(state),
            killed: AtomicBool::new(false),
            commit_signal,
            apply_tx,
        });

        info!("[{}] raft replica started with {} peers", me, peer_count);

        tokio::spawn(Arc::clone(&rf).run_election_timer());
        tokio::spawn(Arc::clone(&rf).run_apply_pump(commit_signal_rx));

        rf
    }

    /// Current term and whether this replica believes it is the leader.
    pub async fn get_state(&self) -> (u64, bool) {
        let state = self.state.lock().await;
        (state.current_term, state.role == Role::Leader)
    }

    /// The peer this replica currently believes is leader, if any.
    pub async fn leader_hint(&self) -> Option<PeerId> {
        self.state.lock().await.leader_hint
    }

    /// Appends `command` to the leader's log and returns the index it would
    /// occupy if ever committed. Returns `(-1, term, false)` encoded as
    /// `(None, term, false)` when this replica is not the leader; see §4.7.
    /// There is no guarantee of commit — callers learn that only via the
    /// apply channel.
    pub async fn start(&self, command: Vec<u8>) -> (Option<u64>, u64, bool) {
        let mut state = self.state.lock().await;
        if state.role != Role::Leader {
            return (None, state.current_term, false);
        }

        let term = state.current_term;
        state.log.push(LogEntry { term, command });
        let index = state.last_log_index();
        state.match_index[self.me] = index;

        // §5: persistence happens while still holding the state lock, before
        // any externally observable effect of this call is visible.
        self.persist(&state);

        (Some(index), term, true)
    }

    /// Requests the replica to stop all background work. Cancellation is
    /// best-effort: in-flight RPCs are not drained.
    pub fn kill(&self) {
        self.killed.store(true, Ordering::Relaxed);
        let _ = self.commit_signal.send(());
    }

    fn is_killed(&self) -> bool {
        self.killed.load(Ordering::Relaxed)
    }

    fn other_peers(&self) -> impl Iterator<Item = PeerId> + '_ {
        (0..self.peer_count).filter(move |&p| p != self.me)
    }

    fn majority(&self) -> usize {
        self.peer_count / 2 + 1
    }

    /// Encodes and saves the persistent fields. Callers hold `state`'s
    /// mutex guard across this call so that persistence always precedes any
    /// externally observable effect of the state change that triggered it
    /// (§4.8, §5).
    fn persist(&self, state: &RaftState) {
        self.persister.save(state.encode());
    }
}
