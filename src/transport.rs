//! The RPC transport consumed by the consensus core.
//!
//! The core only needs, for each peer, something that can deliver a
//! `RequestVote` or `AppendEntries` call and return either a reply or a
//! failure indication within bounded time. This module ships the transport
//! the teacher crate already used — length-prefixed JSON over TCP — plus a
//! `serve` entry point that turns inbound connections into calls on a
//! replica's handler methods.
//!
//! The in-memory, fault-injectable transport used by the integration tests
//! to simulate drops/delays/partitions lives under `tests/common` since it
//! only ever wires together [`crate::raft::Raft`] instances that already
//! live in the same test process.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use crate::raft::Raft;
use crate::rpc::{AppendEntriesArgs, AppendEntriesReply, RequestVoteArgs, RequestVoteReply};

/// How long an outbound call waits for a reply before treating it as a
/// transient transport failure (§7).
const CALL_TIMEOUT: Duration = Duration::from_millis(2000);

/// One peer's outbound RPC endpoint, as seen by the consensus core.
///
/// Mirrors the paper's `Call(method_name, args, &reply) -> bool` with two
/// typed methods instead of a stringly-typed dispatch: an `Err` return
/// stands in for the `false`/timeout case, which callers must treat as "no
/// information", never as a hard failure.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    async fn request_vote(&self, args: RequestVoteArgs) -> Result<RequestVoteReply>;
    async fn append_entries(&self, args: AppendEntriesArgs) -> Result<AppendEntriesReply>;
}

#[derive(Debug, Serialize, Deserialize)]
enum WireRequest {
    RequestVote(RequestVoteArgs),
    AppendEntries(AppendEntriesArgs),
}

#[derive(Debug, Serialize, Deserialize)]
enum WireReply {
    RequestVote(RequestVoteReply),
    AppendEntries(AppendEntriesReply),
}

async fn write_frame<T: Serialize>(stream: &mut TcpStream, msg: &T) -> Result<()> {
    let bytes = serde_json::to_vec(msg)?;
    stream.write_u32(bytes.len() as u32).await?;
    stream.write_all(&bytes).await?;
    stream.flush().await?;
    Ok(())
}

async fn read_frame<T: for<'a> Deserialize<'a>>(stream: &mut TcpStream) -> Result<T> {
    let len = stream.read_u32().await?;
    let mut buf = vec![0u8; len as usize];
    stream.read_exact(&mut buf).await?;
    Ok(serde_json::from_slice(&buf)?)
}

async fn call(addr: &str, req: WireRequest) -> Result<WireReply> {
    let fut = async {
        let mut stream = TcpStream::connect(addr).await?;
        write_frame(&mut stream, &req).await?;
        read_frame(&mut stream).await
    };
    match tokio::time::timeout(CALL_TIMEOUT, fut).await {
        Ok(result) => result,
        Err(_) => Err(anyhow!("rpc to {} timed out", addr)),
    }
}

/// Dials a peer over TCP for every call; matches the teacher crate's own
/// connect-per-call style rather than pooling connections.
pub struct TcpTransport {
    addr: String,
}

impl TcpTransport {
    pub fn new(addr: impl Into<String>) -> Self {
        TcpTransport { addr: addr.into() }
    }
}

#[async_trait]
impl RpcTransport for TcpTransport {
    async fn request_vote(&self, args: RequestVoteArgs) -> Result<RequestVoteReply> {
        match call(&self.addr, WireRequest::RequestVote(args)).await? {
            WireReply::RequestVote(reply) => Ok(reply),
            _ => Err(anyhow!("unexpected reply shape from {}", self.addr)),
        }
    }

    async fn append_entries(&self, args: AppendEntriesArgs) -> Result<AppendEntriesReply> {
        match call(&self.addr, WireRequest::AppendEntries(args)).await? {
            WireReply::AppendEntries(reply) => Ok(reply),
            _ => Err(anyhow!("unexpected reply shape from {}", self.addr)),
        }
    }
}

/// Binds `addr` and dispatches every inbound connection's single RPC to
/// `raft`'s handler methods, writing back the length-prefixed JSON reply.
pub async fn serve(addr: &str, raft: Arc<Raft>) -> Result<JoinHandle<()>> {
    let listener = TcpListener::bind(addr).await?;
    Ok(tokio::spawn(async move {
        loop {
            let (stream, peer_addr) = match listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    warn!("raft transport accept failed: {}", e);
                    continue;
                }
            };
            let raft = Arc::clone(&raft);
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, &raft).await {
                    debug!("raft transport connection from {} failed: {}", peer_addr, e);
                }
            });
        }
    }))
}

async fn handle_connection(mut stream: TcpStream, raft: &Arc<Raft>) -> Result<()> {
    let req: WireRequest = read_frame(&mut stream).await?;
    let reply = match req {
        WireRequest::RequestVote(args) => WireReply::RequestVote(raft.request_vote(args).await),
        WireRequest::AppendEntries(args) => {
            WireReply::AppendEntries(raft.append_entries(args).await)
        }
    };
    write_frame(&mut stream, &reply).await
}
