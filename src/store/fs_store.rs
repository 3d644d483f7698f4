// src/store/fs_store.rs

//! Filesystem chunk store
//!
//! Novel chunks are buffered in memory and spilled into a new table file
//! on flush; the manifest then picks the file up under the store lock.
//! Reads consult the buffer first, then table files newest-first.
//!
//! Table files present on disk but absent from the manifest are crash
//! leftovers and are ignored. An observed integrity failure poisons the
//! store: reads keep working so the operator can salvage, writes are
//! refused.

use super::manifest::{Manifest, ManifestFile};
use super::table_file::{TableFileReader, TableFileWriter};
use super::{ChunkStore, HasResult, SourceInfo};
use crate::hash::Addr;
use crate::{Error, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

pub struct FsChunkStore {
    dir: PathBuf,
    manifest: ManifestFile,
    inner: Mutex<Inner>,
}

struct Inner {
    /// Table files in manifest order, oldest first
    tables: Vec<(String, TableFileReader)>,
    /// Chunks written since the last flush
    pending: HashMap<Addr, Vec<u8>>,
    poisoned: bool,
}

impl FsChunkStore {
    /// Open a store directory, creating it if needed
    pub fn open(dir: &Path) -> Result<Self> {
        let manifest = ManifestFile::open(dir)?;
        let contents = manifest.read()?;
        let tables = Self::load_tables(dir, &contents)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            manifest,
            inner: Mutex::new(Inner {
                tables,
                pending: HashMap::new(),
                poisoned: false,
            }),
        })
    }

    fn load_tables(dir: &Path, manifest: &Manifest) -> Result<Vec<(String, TableFileReader)>> {
        let mut tables = Vec::with_capacity(manifest.tables.len());
        for name in &manifest.tables {
            let path = dir.join(name);
            match TableFileReader::open(&path) {
                Ok(reader) => tables.push((name.clone(), reader)),
                Err(Error::Integrity(detail)) => return Err(Error::Integrity(detail)),
                Err(e) => {
                    // A manifest-listed file that fails to parse is fatal;
                    // unlisted leftovers are skipped in sources() instead.
                    return Err(Error::Integrity(format!(
                        "manifest references unreadable table file {}: {}",
                        name, e
                    )));
                }
            }
        }
        Ok(tables)
    }

    fn check_writable(inner: &Inner) -> Result<()> {
        if inner.poisoned {
            return Err(Error::Integrity(
                "store is poisoned after an integrity failure; writes refused".to_string(),
            ));
        }
        Ok(())
    }

    /// Merge manifest additions made by this or another process
    fn refresh_tables(&self, inner: &mut Inner, manifest: &Manifest) -> Result<()> {
        for name in &manifest.tables {
            if !inner.tables.iter().any(|(n, _)| n == name) {
                let reader = TableFileReader::open(&self.dir.join(name))?;
                inner.tables.push((name.clone(), reader));
            }
        }
        Ok(())
    }

    fn flush_locked(&self, inner: &mut Inner) -> Result<()> {
        if inner.pending.is_empty() {
            return Ok(());
        }
        Self::check_writable(inner)?;

        let mut writer = TableFileWriter::new();
        for (addr, body) in inner.pending.iter() {
            writer.add(*addr, body)?;
        }
        let count = writer.chunk_count();
        let name = writer.finish(&self.dir)?;
        let manifest = self.manifest.add_tables(std::slice::from_ref(&name))?;
        self.refresh_tables(inner, &manifest)?;
        inner.pending.clear();
        debug!(name, count, "flushed pending chunks");
        Ok(())
    }
}

impl ChunkStore for FsChunkStore {
    fn put(&self, data: &[u8]) -> Result<Addr> {
        let addr = Addr::of(data);
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Self::check_writable(&inner)?;
        if inner.pending.contains_key(&addr) || inner.tables.iter().any(|(_, t)| t.has(&addr)) {
            return Ok(addr);
        }
        inner.pending.insert(addr, data.to_vec());
        Ok(addr)
    }

    fn get(&self, addr: &Addr) -> Result<Option<Vec<u8>>> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(body) = inner.pending.get(addr) {
            return Ok(Some(body.clone()));
        }
        let Some(idx) = inner.tables.iter().rposition(|(_, t)| t.has(addr)) else {
            return Ok(None);
        };
        match inner.tables[idx].1.get(addr) {
            Ok(body) => Ok(body),
            Err(Error::Integrity(detail)) => {
                let name = inner.tables[idx].0.clone();
                warn!(table = %name, %addr, "integrity failure; poisoning store");
                inner.poisoned = true;
                Err(Error::Integrity(detail))
            }
            Err(e) => Err(e),
        }
    }

    fn has_many(&self, addrs: &[Addr]) -> Result<HasResult> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut result = HasResult::default();
        for addr in addrs {
            let present = inner.pending.contains_key(addr)
                || inner.tables.iter().any(|(_, t)| t.has(addr));
            if present {
                result.present.push(*addr);
            } else {
                result.absent.push(*addr);
            }
        }
        Ok(result)
    }

    fn root(&self) -> Result<Addr> {
        self.manifest.read()?.root_addr()
    }

    fn commit_root(&self, current: Addr, next: Addr) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Self::check_writable(&inner)?;
        // Everything the new root references must be durable first
        self.flush_locked(&mut inner)?;
        let (manifest, swapped) = self.manifest.swap_root(current, next)?;
        self.refresh_tables(&mut inner, &manifest)?;
        Ok(swapped)
    }

    fn flush(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        self.flush_locked(&mut inner)
    }

    fn sources(&self) -> Result<Vec<SourceInfo>> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Ok(inner
            .tables
            .iter()
            .map(|(name, table)| SourceInfo {
                name: name.clone(),
                chunk_count: table.chunk_count(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_put_flush_reopen() {
        let dir = TempDir::new().unwrap();
        let addr;
        {
            let store = FsChunkStore::open(dir.path()).unwrap();
            addr = store.put(b"durable chunk").unwrap();
            store.flush().unwrap();
        }
        let store = FsChunkStore::open(dir.path()).unwrap();
        assert_eq!(store.get(&addr).unwrap().unwrap(), b"durable chunk");
        assert_eq!(store.sources().unwrap().len(), 1);
    }

    #[test]
    fn test_unflushed_puts_are_volatile() {
        let dir = TempDir::new().unwrap();
        let addr;
        {
            let store = FsChunkStore::open(dir.path()).unwrap();
            addr = store.put(b"never flushed").unwrap();
            assert_eq!(store.get(&addr).unwrap().unwrap(), b"never flushed");
        }
        let store = FsChunkStore::open(dir.path()).unwrap();
        assert!(store.get(&addr).unwrap().is_none());
    }

    #[test]
    fn test_commit_root_flushes() {
        let dir = TempDir::new().unwrap();
        let addr;
        {
            let store = FsChunkStore::open(dir.path()).unwrap();
            addr = store.put(b"root value").unwrap();
            assert!(store.commit_root(Addr::EMPTY, addr).unwrap());
        }
        let store = FsChunkStore::open(dir.path()).unwrap();
        assert_eq!(store.root().unwrap(), addr);
        assert_eq!(store.get(&addr).unwrap().unwrap(), b"root value");
    }

    #[test]
    fn test_cas_race_lost() {
        let dir = TempDir::new().unwrap();
        let store = FsChunkStore::open(dir.path()).unwrap();
        let a = store.put(b"a").unwrap();
        let b = store.put(b"b").unwrap();
        assert!(store.commit_root(Addr::EMPTY, a).unwrap());
        assert!(!store.commit_root(Addr::EMPTY, b).unwrap());
        assert_eq!(store.root().unwrap(), a);
    }

    #[test]
    fn test_orphan_table_file_ignored() {
        let dir = TempDir::new().unwrap();
        {
            let store = FsChunkStore::open(dir.path()).unwrap();
            store.put(b"kept").unwrap();
            store.flush().unwrap();
        }
        // Simulate a crash leftover: a stray file not in the manifest
        std::fs::write(dir.path().join("deadbeef.table"), b"not a table file").unwrap();

        let store = FsChunkStore::open(dir.path()).unwrap();
        assert_eq!(store.sources().unwrap().len(), 1);
    }

    #[test]
    fn test_two_handles_share_root() {
        let dir = TempDir::new().unwrap();
        let store1 = FsChunkStore::open(dir.path()).unwrap();
        let store2 = FsChunkStore::open(dir.path()).unwrap();

        let a = store1.put(b"from one").unwrap();
        assert!(store1.commit_root(Addr::EMPTY, a).unwrap());

        // The second handle observes the new root through the manifest
        assert_eq!(store2.root().unwrap(), a);
        let b = store2.put(b"from two").unwrap();
        assert!(store2.commit_root(a, b).unwrap());
        assert_eq!(store1.root().unwrap(), b);
    }
}
