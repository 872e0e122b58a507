//! In-process cluster harness for the integration tests: an in-memory,
//! fault-injectable transport wired directly to each replica's handler
//! methods (no real sockets), plus helpers for the partition/restart/drain
//! operations the end-to-end scenarios need.

use std::collections::HashSet;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::timeout;

use raft_consensus::{
    AppendEntriesArgs, AppendEntriesReply, ApplyMsg, MemoryPersister, PeerId, Persister, Raft,
    RaftConfig, RequestVoteArgs, RequestVoteReply, RpcTransport,
};

/// Which directed links are currently up. Absence of `(from, to)` means the
/// link is cut; calls across a cut link fail exactly like a real dropped
/// connection would (§6/§7), never blocking or panicking.
#[derive(Default)]
struct NetworkState {
    up: StdMutex<HashSet<(PeerId, PeerId)>>,
}

impl NetworkState {
    fn fully_connected(n: usize) -> Arc<Self> {
        let mut up = HashSet::new();
        for i in 0..n {
            for j in 0..n {
                if i != j {
                    up.insert((i, j));
                }
            }
        }
        Arc::new(NetworkState { up: StdMutex::new(up) })
    }

    fn is_up(&self, from: PeerId, to: PeerId) -> bool {
        self.up.lock().unwrap().contains(&(from, to))
    }

    fn cut(&self, a: PeerId, b: PeerId) {
        let mut up = self.up.lock().unwrap();
        up.remove(&(a, b));
        up.remove(&(b, a));
    }

    fn restore(&self, a: PeerId, b: PeerId) {
        let mut up = self.up.lock().unwrap();
        up.insert((a, b));
        up.insert((b, a));
    }
}

type Registry = Arc<StdMutex<Vec<Option<Arc<Raft>>>>>;

/// One node's outbound endpoint to a single peer. Dispatches straight into
/// the target's handler methods once it has been registered, short-circuits
/// if the link is cut, and fails if the target hasn't registered yet (the
/// same "no information" case a real dropped connection produces).
struct InMemoryLink {
    from: PeerId,
    to: PeerId,
    network: Arc<NetworkState>,
    registry: Registry,
}

impl InMemoryLink {
    fn target(&self) -> Result<Arc<Raft>> {
        if !self.network.is_up(self.from, self.to) {
            return Err(anyhow!("peer {} unreachable from {}", self.to, self.from));
        }
        self.registry
            .lock()
            .unwrap()
            .get(self.to)
            .cloned()
            .flatten()
            .ok_or_else(|| anyhow!("peer {} not yet started", self.to))
    }
}

#[async_trait]
impl RpcTransport for InMemoryLink {
    async fn request_vote(&self, args: RequestVoteArgs) -> Result<RequestVoteReply> {
        Ok(self.target()?.request_vote(args).await)
    }

    async fn append_entries(&self, args: AppendEntriesArgs) -> Result<AppendEntriesReply> {
        Ok(self.target()?.append_entries(args).await)
    }
}

/// A persister shared between a node's original incarnation and whatever
/// replaces it after a simulated crash, so restart tests observe state that
/// actually survived.
struct SharedPersister(Arc<MemoryPersister>);

impl Persister for SharedPersister {
    fn save(&self, state: Vec<u8>) {
        self.0.save(state);
    }

    fn read_raft_state(&self) -> Vec<u8> {
        self.0.read_raft_state()
    }
}

/// An in-process N-node Raft cluster, plus the machinery to drive the
/// end-to-end scenarios: stable-leader detection, partition/heal, restart
/// against the same persister, and per-node applied-entry draining.
pub struct Cluster {
    pub nodes: Vec<Arc<Raft>>,
    apply_rxs: Vec<mpsc::Receiver<ApplyMsg>>,
    persisters: Vec<Arc<MemoryPersister>>,
    network: Arc<NetworkState>,
    registry: Registry,
    config: RaftConfig,
    /// Nodes currently down. `get_state()` on a killed node still reflects
    /// whatever role it held at the moment it stopped (its background tasks
    /// just aren't running to change it), so leader discovery must skip
    /// killed nodes rather than trust their stale in-memory role.
    killed: HashSet<PeerId>,
}

impl Cluster {
    /// Builds `n` replicas, fully connected, each with fresh in-memory
    /// persistence and compressed timers so the scenarios run in milliseconds
    /// rather than the production election window.
    pub fn new(n: usize) -> Self {
        let network = NetworkState::fully_connected(n);
        let registry: Registry = Arc::new(StdMutex::new(vec![None; n]));
        let config = RaftConfig::with_fast_timers();

        let mut nodes = Vec::with_capacity(n);
        let mut apply_rxs = Vec::with_capacity(n);
        let mut persisters = Vec::with_capacity(n);

        for me in 0..n {
            let persister = Arc::new(MemoryPersister::new());
            persisters.push(Arc::clone(&persister));

            let peers: Vec<Box<dyn RpcTransport>> = (0..n)
                .map(|to| -> Box<dyn RpcTransport> {
                    Box::new(InMemoryLink {
                        from: me,
                        to,
                        network: Arc::clone(&network),
                        registry: Arc::clone(&registry),
                    })
                })
                .collect();

            let (apply_tx, apply_rx) = mpsc::channel(256);
            let raft = Raft::new(
                peers,
                me,
                Box::new(SharedPersister(Arc::clone(&persister))),
                apply_tx,
                config.clone(),
            );
            registry.lock().unwrap()[me] = Some(Arc::clone(&raft));
            nodes.push(raft);
            apply_rxs.push(apply_rx);
        }

        Cluster {
            nodes,
            apply_rxs,
            persisters,
            network,
            registry,
            config,
            killed: HashSet::new(),
        }
    }

    pub fn cut(&self, a: PeerId, b: PeerId) {
        self.network.cut(a, b);
    }

    pub fn heal(&self, a: PeerId, b: PeerId) {
        self.network.restore(a, b);
    }

    /// Isolates `node` from every other peer, simulating a minority partition
    /// of one.
    pub fn isolate(&self, node: PeerId) {
        for other in 0..self.nodes.len() {
            if other != node {
                self.cut(node, other);
            }
        }
    }

    pub fn heal_all(&self, node: PeerId) {
        for other in 0..self.nodes.len() {
            if other != node {
                self.heal(node, other);
            }
        }
    }

    /// Stops `node`'s background tasks and drops the harness's handle to it.
    /// Its persister survives in `self.persisters` for a later `restart`.
    pub fn kill(&mut self, node: PeerId) {
        self.nodes[node].kill();
        self.registry.lock().unwrap()[node] = None;
        self.killed.insert(node);
    }

    /// Recreates `node` from scratch against the same persister it had
    /// before `kill`, simulating a process restart that reloads disk state.
    pub fn restart(&mut self, node: PeerId) {
        let n = self.nodes.len();
        let peers: Vec<Box<dyn RpcTransport>> = (0..n)
            .map(|to| -> Box<dyn RpcTransport> {
                Box::new(InMemoryLink {
                    from: node,
                    to,
                    network: Arc::clone(&self.network),
                    registry: Arc::clone(&self.registry),
                })
            })
            .collect();

        let (apply_tx, apply_rx) = mpsc::channel(256);
        let raft = Raft::new(
            peers,
            node,
            Box::new(SharedPersister(Arc::clone(&self.persisters[node]))),
            apply_tx,
            self.config.clone(),
        );
        self.registry.lock().unwrap()[node] = Some(Arc::clone(&raft));
        self.nodes[node] = raft;
        self.apply_rxs[node] = apply_rx;
        self.killed.remove(&node);
    }

    /// Polls every node's `get_state` until exactly one reports leadership,
    /// or `bound` elapses. Returns `(leader_id, term)`.
    pub async fn wait_for_leader(&self, bound: Duration) -> Option<(PeerId, u64)> {
        let deadline = tokio::time::Instant::now() + bound;
        loop {
            for (id, node) in self.nodes.iter().enumerate() {
                if self.killed.contains(&id) {
                    continue;
                }
                let (term, is_leader) = node.get_state().await;
                if is_leader {
                    return Some((id, term));
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Waits until `node`'s apply channel delivers `index`, returning its
    /// command, or `None` on timeout.
    pub async fn wait_for_apply(
        &mut self,
        node: PeerId,
        index: u64,
        bound: Duration,
    ) -> Option<Vec<u8>> {
        let deadline = tokio::time::Instant::now() + bound;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return None;
            }
            match timeout(remaining, self.apply_rxs[node].recv()).await {
                Ok(Some(msg)) if msg.index == index => return Some(msg.command),
                Ok(Some(_)) => continue,
                Ok(None) | Err(_) => return None,
            }
        }
    }
}
