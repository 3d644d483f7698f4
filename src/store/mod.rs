// src/store/mod.rs

//! Content-addressed chunk storage
//!
//! Chunks are immutable byte blobs named by the 20-byte hash of their
//! contents. A store also carries a single mutable *root* pointer,
//! advanced by compare-and-swap; everything else in the system hangs off
//! that one mutable cell.
//!
//! Two implementations: [`MemoryChunkStore`] for tests and scratch work,
//! and [`FsChunkStore`] which persists chunks in append-only table files
//! described by an atomically replaced manifest.

mod fs_store;
mod manifest;
mod table_file;

pub use fs_store::FsChunkStore;
pub use manifest::{Manifest, ManifestFile};
pub use table_file::{TableFileReader, TableFileWriter};

use crate::hash::Addr;
use crate::Result;
use std::collections::HashMap;
use std::sync::Mutex;

/// Result of a bulk presence probe
#[derive(Debug, Default)]
pub struct HasResult {
    pub present: Vec<Addr>,
    pub absent: Vec<Addr>,
}

/// Description of one table file, for GC and replication
#[derive(Debug, Clone)]
pub struct SourceInfo {
    /// File name within the store directory
    pub name: String,
    /// Number of chunks the file holds
    pub chunk_count: u32,
}

/// A content-addressed chunk store with a CAS root pointer
pub trait ChunkStore: Send + Sync {
    /// Store a chunk; idempotent. Returns the content address.
    fn put(&self, data: &[u8]) -> Result<Addr>;

    /// Fetch a chunk, or `None` when absent
    fn get(&self, addr: &Addr) -> Result<Option<Vec<u8>>>;

    /// Bulk presence probe
    fn has_many(&self, addrs: &[Addr]) -> Result<HasResult>;

    /// Current root address; [`Addr::EMPTY`] for a fresh store
    fn root(&self) -> Result<Addr>;

    /// Atomically replace the root if it still equals `current`.
    /// Returns false when the swap lost a race.
    fn commit_root(&self, current: Addr, next: Addr) -> Result<bool>;

    /// Persist buffered writes without touching the root
    fn flush(&self) -> Result<()>;

    /// Enumerate the table files backing this store
    fn sources(&self) -> Result<Vec<SourceInfo>>;

    /// Fetch a chunk that must exist
    fn get_required(&self, addr: &Addr) -> Result<Vec<u8>> {
        self.get(addr)?.ok_or(crate::Error::ChunkNotFound(*addr))
    }
}

impl std::fmt::Debug for dyn ChunkStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "dyn ChunkStore")
    }
}

/// In-memory chunk store; the model implementation
#[derive(Default)]
pub struct MemoryChunkStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    chunks: HashMap<Addr, Vec<u8>>,
    root: Addr,
}

impl MemoryChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of chunks held
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ChunkStore for MemoryChunkStore {
    fn put(&self, data: &[u8]) -> Result<Addr> {
        let addr = Addr::of(data);
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.chunks.entry(addr).or_insert_with(|| data.to_vec());
        Ok(addr)
    }

    fn get(&self, addr: &Addr) -> Result<Option<Vec<u8>>> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Ok(inner.chunks.get(addr).cloned())
    }

    fn has_many(&self, addrs: &[Addr]) -> Result<HasResult> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut result = HasResult::default();
        for addr in addrs {
            if inner.chunks.contains_key(addr) {
                result.present.push(*addr);
            } else {
                result.absent.push(*addr);
            }
        }
        Ok(result)
    }

    fn root(&self) -> Result<Addr> {
        Ok(self.inner.lock().unwrap_or_else(|e| e.into_inner()).root)
    }

    fn commit_root(&self, current: Addr, next: Addr) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.root != current {
            return Ok(false);
        }
        inner.root = next;
        Ok(true)
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }

    fn sources(&self) -> Result<Vec<SourceInfo>> {
        Ok(Vec::new())
    }
}
