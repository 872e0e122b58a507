//! Standalone demo binary: runs one Raft replica over TCP, persisting to a
//! local file, and lets an operator propose commands from stdin.
//!
//! ```text
//! raft_node --id 0 --peer 127.0.0.1:9000 --peer 127.0.0.1:9001 --peer 127.0.0.1:9002 --data-dir ./data
//! ```
//!
//! `--peer` is repeated once per replica in the cluster, in `id` order,
//! including this node's own address (never dialed — `peers[me]` is a
//! placeholder the core skips).

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::Parser;
use log::{error, info};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use raft_consensus::{FilePersister, Raft, RaftConfig, RpcTransport, TcpTransport};

#[derive(Parser, Debug)]
#[command(about = "Runs a single Raft replica")]
struct Args {
    /// This replica's index into --peer, e.g. 0.
    #[arg(long)]
    id: usize,

    /// One cluster member's address; repeat once per replica, in id order.
    #[arg(long = "peer", required = true)]
    peers: Vec<String>,

    /// Directory for this replica's persisted state file.
    #[arg(long = "data-dir", default_value = "./data")]
    data_dir: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    if args.id >= args.peers.len() {
        bail!("--id {} is out of range for {} peers", args.id, args.peers.len());
    }

    std::fs::create_dir_all(&args.data_dir)?;
    let state_path = args.data_dir.join(format!("raft-{}.state", args.id));
    let persister = Box::new(FilePersister::new(state_path));

    let peers: Vec<Box<dyn RpcTransport>> = args
        .peers
        .iter()
        .enumerate()
        .map(|(i, addr)| -> Box<dyn RpcTransport> {
            if i == args.id {
                Box::new(UnusedSelfTransport)
            } else {
                Box::new(TcpTransport::new(addr.clone()))
            }
        })
        .collect();

    let (apply_tx, mut apply_rx) = mpsc::channel(64);
    let raft = Raft::new(peers, args.id, persister, apply_tx, RaftConfig::default());

    let my_addr = args.peers[args.id].clone();
    raft_consensus::transport::serve(&my_addr, Arc::clone(&raft)).await?;
    info!("[{}] listening on {}", args.id, my_addr);

    let apply_me = args.id;
    tokio::spawn(async move {
        while let Some(msg) = apply_rx.recv().await {
            info!(
                "[{}] applied index {}: {:?}",
                apply_me,
                msg.index,
                String::from_utf8_lossy(&msg.command)
            );
        }
    });

    info!("[{}] ready; type a line and press enter to propose it as a command", args.id);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.is_empty() {
            continue;
        }
        let (index, term, is_leader) = raft.start(line.into_bytes()).await;
        match index {
            Some(index) if is_leader => info!("proposed at index {} term {}", index, term),
            _ => error!("not the leader (leader hint: {:?})", raft.leader_hint().await),
        }
    }

    Ok(())
}

/// Placeholder for `peers[me]`: the core never calls out to itself, so any
/// call here would be a bug.
struct UnusedSelfTransport;

#[async_trait::async_trait]
impl RpcTransport for UnusedSelfTransport {
    async fn request_vote(
        &self,
        _args: raft_consensus::RequestVoteArgs,
    ) -> Result<raft_consensus::RequestVoteReply> {
        bail!("a replica must never call itself")
    }

    async fn append_entries(
        &self,
        _args: raft_consensus::AppendEntriesArgs,
    ) -> Result<raft_consensus::AppendEntriesReply> {
        bail!("a replica must never call itself")
    }
}
