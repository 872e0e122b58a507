//! A library implementation of the Raft consensus algorithm's core: leader
//! election, log replication, and commit-index advancement, independent of
//! any particular storage engine or wire transport beyond the swappable
//! [`Persister`] and [`RpcTransport`] collaborators it ships.
//!
//! Hosts embedding this crate construct a [`raft::Raft`] via [`raft::Raft::new`],
//! call [`raft::Raft::start`] to propose commands, and receive committed
//! entries on the `apply_tx`/`apply_rx` channel they supply.

pub mod config;
pub mod persister;
pub mod rpc;
pub mod transport;
pub mod types;

pub mod raft;

pub use config::RaftConfig;
pub use persister::{FilePersister, MemoryPersister, Persister};
pub use raft::Raft;
pub use rpc::{AppendEntriesArgs, AppendEntriesReply, RequestVoteArgs, RequestVoteReply};
pub use transport::{RpcTransport, TcpTransport};
pub use types::{ApplyMsg, LogEntry, PeerId, Role};
