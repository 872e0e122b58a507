//! The stable storage facility consumed by the consensus core.
//!
//! The core only ever needs to save and reload one opaque blob; it never
//! interprets the bytes itself (see [`crate::raft::state`] for the encoding).

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::error;

/// Byte-blob persister: atomic "save current state" / "read last saved
/// state". Implementations must make `save` durable before it returns, since
/// the core calls it synchronously under its state lock before sending any
/// reply that depends on the saved fields (§4.8).
pub trait Persister: Send + Sync {
    fn save(&self, state: Vec<u8>);
    fn read_raft_state(&self) -> Vec<u8>;
}

/// In-memory persister. Loses all state on process exit; suitable for tests
/// and for single-process demos that don't care about crash recovery.
#[derive(Default)]
pub struct MemoryPersister {
    state: Mutex<Vec<u8>>,
}

impl MemoryPersister {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Persister for MemoryPersister {
    fn save(&self, state: Vec<u8>) {
        *self.state.lock().unwrap() = state;
    }

    fn read_raft_state(&self) -> Vec<u8> {
        self.state.lock().unwrap().clone()
    }
}

/// File-backed persister: writes the raw state blob to a single file on disk,
/// overwriting it each time. Mirrors the teacher crate's own disk-persistence
/// approach, generalized to hold an arbitrary pre-encoded blob rather than a
/// specific struct.
pub struct FilePersister {
    path: PathBuf,
    cache: Mutex<Vec<u8>>,
}

impl FilePersister {
    /// Opens (or creates) the persister backed by `path`. If the file exists
    /// and is non-empty, its contents are cached for the first
    /// `read_raft_state` call; a decode failure downstream is the caller's
    /// responsibility to treat as "no prior state" per §7.
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let existing = std::fs::read(&path).unwrap_or_default();
        FilePersister {
            path,
            cache: Mutex::new(existing),
        }
    }
}

impl Persister for FilePersister {
    fn save(&self, state: Vec<u8>) {
        if let Err(e) = std::fs::write(&self.path, &state) {
            error!("failed to persist raft state to {}: {}", self.path.display(), e);
            return;
        }
        *self.cache.lock().unwrap() = state;
    }

    fn read_raft_state(&self) -> Vec<u8> {
        self.cache.lock().unwrap().clone()
    }
}
