// src/remote/mod.rs

//! Remote synchronization
//!
//! The logical surface between two chunk stores is six operations:
//! list refs, read a ref, CAS a ref, bulk-probe chunks, download
//! chunks, upload chunks. Everything else — push, fetch, pull, clone —
//! is built on those plus the content-addressed graph walk in
//! `walker`. Transports are pluggable; this build ships a
//! filesystem-path transport (a bare store directory), which is also
//! what the tests use. Because chunks are content addressed, any
//! interrupted transfer is resumable at no duplicate cost.

mod file_remote;
mod sync;
mod walker;

pub use file_remote::FileRemote;
pub use sync::{fetch, fetch_all, pull, push, FetchReport, PullReport, PushReport};
pub use walker::{collect_commit_closure, collect_root_closure};

use crate::hash::Addr;
use crate::store::HasResult;
use crate::{Error, Result};
use std::path::PathBuf;

/// Batch size for probe/upload/download rounds
pub const TRANSFER_BATCH: usize = 4096;

/// The six logical remote operations
pub trait ChunkTransport: Send + Sync {
    /// All branch and tag refs, with full ref names
    fn list_refs(&self) -> Result<Vec<(String, Addr)>>;

    fn get_ref(&self, name: &str) -> Result<Option<Addr>>;

    /// CAS a ref. `expected = None` means "create if absent"; `force`
    /// replaces unconditionally. The receiver must hold the full
    /// ancestor closure of `new` before this succeeds.
    fn set_ref(&self, name: &str, new: Addr, expected: Option<Addr>, force: bool) -> Result<()>;

    fn has(&self, addrs: &[Addr]) -> Result<HasResult>;

    fn get_chunks(&self, addrs: &[Addr]) -> Result<Vec<(Addr, Vec<u8>)>>;

    fn put_chunks(&self, chunks: &[(Addr, Vec<u8>)]) -> Result<()>;
}

impl std::fmt::Debug for dyn ChunkTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "dyn ChunkTransport")
    }
}

/// Open a transport for a remote URL. File paths (with or without a
/// `file://` scheme) get the bare-directory transport; network schemes
/// belong to transport plugins outside this crate.
pub fn open_remote(url: &str) -> Result<Box<dyn ChunkTransport>> {
    let path = if let Ok(parsed) = url::Url::parse(url) {
        match parsed.scheme() {
            "file" => PathBuf::from(parsed.path()),
            scheme => {
                return Err(Error::Transport(format!(
                    "no transport available for '{}' remotes",
                    scheme
                )))
            }
        }
    } else {
        PathBuf::from(url)
    };
    Ok(Box::new(FileRemote::open(&path)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_remote_rejects_network_schemes() {
        let err = open_remote("https://example.com/repo").unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }

    #[test]
    fn test_open_remote_accepts_paths() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(open_remote(dir.path().to_str().unwrap()).is_ok());
        let url = format!("file://{}", dir.path().display());
        assert!(open_remote(&url).is_ok());
    }
}
