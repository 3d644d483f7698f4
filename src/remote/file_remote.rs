// src/remote/file_remote.rs

//! Bare-directory transport
//!
//! A remote that is just another store directory on a reachable
//! filesystem. Ref CAS rides on the store's manifest lock, and chunk
//! uploads verify content addresses before anything is persisted, so a
//! corrupt sender cannot poison the receiver.

use super::ChunkTransport;
use crate::commit::RefStore;
use crate::hash::Addr;
use crate::store::{ChunkStore, FsChunkStore, HasResult};
use crate::{Error, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

pub struct FileRemote {
    store: Arc<dyn ChunkStore>,
    refs: RefStore,
}

impl FileRemote {
    pub fn open(path: &Path) -> Result<Self> {
        let store: Arc<dyn ChunkStore> = Arc::new(FsChunkStore::open(path)?);
        let refs = RefStore::new(store.clone());
        Ok(Self { store, refs })
    }

    /// The receiving side's ref namespace (used by clone/fetch tests)
    pub fn refs(&self) -> &RefStore {
        &self.refs
    }
}

impl ChunkTransport for FileRemote {
    fn list_refs(&self) -> Result<Vec<(String, Addr)>> {
        let mut refs = Vec::new();
        for (name, addr) in self.refs.list("refs/heads/")? {
            refs.push((format!("refs/heads/{}", name), addr));
        }
        for (name, addr) in self.refs.list("refs/tags/")? {
            refs.push((format!("refs/tags/{}", name), addr));
        }
        Ok(refs)
    }

    fn get_ref(&self, name: &str) -> Result<Option<Addr>> {
        self.refs.get(name)
    }

    fn set_ref(&self, name: &str, new: Addr, expected: Option<Addr>, force: bool) -> Result<()> {
        // Never advance a ref whose target isn't fully received
        let probe = self.store.has_many(&[new])?;
        if !probe.absent.is_empty() {
            return Err(Error::Transport(format!(
                "refusing to set {}: target {} not present on the remote",
                name, new
            )));
        }

        if force {
            self.refs.set(name, new)?;
            debug!(name, %new, "force-set remote ref");
            return Ok(());
        }
        let swapped = self.refs.compare_and_set(name, expected, Some(new))?;
        if !swapped {
            return Err(Error::AncestryRequired);
        }
        debug!(name, %new, "advanced remote ref");
        Ok(())
    }

    fn has(&self, addrs: &[Addr]) -> Result<HasResult> {
        self.store.has_many(addrs)
    }

    fn get_chunks(&self, addrs: &[Addr]) -> Result<Vec<(Addr, Vec<u8>)>> {
        let mut out = Vec::with_capacity(addrs.len());
        for addr in addrs {
            if let Some(bytes) = self.store.get(addr)? {
                out.push((*addr, bytes));
            }
        }
        Ok(out)
    }

    fn put_chunks(&self, chunks: &[(Addr, Vec<u8>)]) -> Result<()> {
        for (addr, bytes) in chunks {
            if Addr::of(bytes) != *addr {
                return Err(Error::Integrity(format!(
                    "uploaded chunk does not hash to {}",
                    addr
                )));
            }
            self.store.put(bytes)?;
        }
        self.store.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_put_get_roundtrip() {
        let dir = TempDir::new().unwrap();
        let remote = FileRemote::open(dir.path()).unwrap();

        let body = b"remote chunk".to_vec();
        let addr = Addr::of(&body);
        remote.put_chunks(&[(addr, body.clone())]).unwrap();

        let fetched = remote.get_chunks(&[addr]).unwrap();
        assert_eq!(fetched, vec![(addr, body)]);
    }

    #[test]
    fn test_put_rejects_bad_hash() {
        let dir = TempDir::new().unwrap();
        let remote = FileRemote::open(dir.path()).unwrap();
        let err = remote
            .put_chunks(&[(Addr::of(b"claimed"), b"actual".to_vec())])
            .unwrap_err();
        assert!(matches!(err, Error::Integrity(_)));
    }

    #[test]
    fn test_set_ref_requires_present_target() {
        let dir = TempDir::new().unwrap();
        let remote = FileRemote::open(dir.path()).unwrap();
        let err = remote
            .set_ref("refs/heads/main", Addr::of(b"missing"), None, false)
            .unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }

    #[test]
    fn test_set_ref_cas() {
        let dir = TempDir::new().unwrap();
        let remote = FileRemote::open(dir.path()).unwrap();

        let body = b"commit".to_vec();
        let addr = Addr::of(&body);
        remote.put_chunks(&[(addr, body)]).unwrap();

        remote.set_ref("refs/heads/main", addr, None, false).unwrap();
        assert_eq!(remote.get_ref("refs/heads/main").unwrap().unwrap(), addr);

        // Wrong expectation is an ancestry rejection
        let other = b"other commit".to_vec();
        let other_addr = Addr::of(&other);
        remote.put_chunks(&[(other_addr, other)]).unwrap();
        let err = remote
            .set_ref("refs/heads/main", other_addr, None, false)
            .unwrap_err();
        assert!(matches!(err, Error::AncestryRequired));

        // Force replaces unconditionally
        remote
            .set_ref("refs/heads/main", other_addr, None, true)
            .unwrap();
        assert_eq!(
            remote.get_ref("refs/heads/main").unwrap().unwrap(),
            other_addr
        );
    }
}
