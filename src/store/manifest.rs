// src/store/manifest.rs

//! Store manifest
//!
//! The manifest is the only mutable file in a store directory. It names
//! the ordered table files and the current root address. Updates write a
//! sibling temp file and rename it into place while holding an exclusive
//! `fs2` lock on a separate LOCK file, so a root compare-and-swap is
//! race-free across processes and a crash can never leave a torn
//! manifest behind.

use crate::hash::Addr;
use crate::{Error, Result};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

const MANIFEST_NAME: &str = "manifest.json";
const LOCK_NAME: &str = "LOCK";
const FORMAT_VERSION: u32 = 1;

/// Persistent manifest contents
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u32,
    /// Hex of the current root address; empty string for a fresh store
    pub root: String,
    /// Ordered table file names, oldest first
    pub tables: Vec<String>,
}

impl Manifest {
    pub fn empty() -> Self {
        Self {
            version: FORMAT_VERSION,
            root: String::new(),
            tables: Vec::new(),
        }
    }

    pub fn root_addr(&self) -> Result<Addr> {
        if self.root.is_empty() {
            return Ok(Addr::EMPTY);
        }
        self.root
            .parse()
            .map_err(|e| Error::Decode(format!("manifest root: {}", e)))
    }

    pub fn set_root(&mut self, addr: Addr) {
        self.root = if addr.is_empty() {
            String::new()
        } else {
            addr.to_hex()
        };
    }
}

/// Handle to the manifest of one store directory
pub struct ManifestFile {
    dir: PathBuf,
}

impl ManifestFile {
    /// Open (creating if needed) the manifest for `dir`
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let this = Self {
            dir: dir.to_path_buf(),
        };
        if !this.manifest_path().exists() {
            let _guard = this.lock()?;
            // Re-check under the lock; another process may have won
            if !this.manifest_path().exists() {
                this.write_manifest(&Manifest::empty())?;
                debug!(dir = %dir.display(), "initialized store manifest");
            }
        }
        Ok(this)
    }

    fn manifest_path(&self) -> PathBuf {
        self.dir.join(MANIFEST_NAME)
    }

    /// Take the exclusive cross-process lock
    fn lock(&self) -> Result<LockGuard> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.dir.join(LOCK_NAME))?;
        file.lock_exclusive()?;
        Ok(LockGuard { file })
    }

    /// Read the current manifest without locking (reads are safe against
    /// atomic replace)
    pub fn read(&self) -> Result<Manifest> {
        let bytes = fs::read(self.manifest_path())?;
        let manifest: Manifest =
            serde_json::from_slice(&bytes).map_err(|e| Error::Decode(format!("manifest: {}", e)))?;
        if manifest.version != FORMAT_VERSION {
            return Err(Error::Config(format!(
                "unsupported store format version {}",
                manifest.version
            )));
        }
        Ok(manifest)
    }

    fn write_manifest(&self, manifest: &Manifest) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(manifest)
            .map_err(|e| Error::Encode(format!("manifest: {}", e)))?;
        let tmp = self.dir.join(format!("{}.tmp", MANIFEST_NAME));
        let mut file = File::create(&tmp)?;
        use std::io::Write;
        file.write_all(&bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, self.manifest_path())?;
        Ok(())
    }

    /// Append table files under the lock, merging with concurrent writers.
    /// Returns the manifest as written.
    pub fn add_tables(&self, names: &[String]) -> Result<Manifest> {
        let _guard = self.lock()?;
        let mut manifest = self.read()?;
        for name in names {
            if !manifest.tables.iter().any(|t| t == name) {
                manifest.tables.push(name.clone());
            }
        }
        self.write_manifest(&manifest)?;
        Ok(manifest)
    }

    /// Compare-and-swap the root. Returns the manifest as written plus
    /// whether the swap happened; a lost race leaves the manifest alone.
    pub fn swap_root(&self, current: Addr, next: Addr) -> Result<(Manifest, bool)> {
        let _guard = self.lock()?;
        let mut manifest = self.read()?;
        if manifest.root_addr()? != current {
            return Ok((manifest, false));
        }
        manifest.set_root(next);
        self.write_manifest(&manifest)?;
        debug!(root = %next, "advanced store root");
        Ok((manifest, true))
    }
}

struct LockGuard {
    file: File,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_fresh_manifest() {
        let dir = TempDir::new().unwrap();
        let mf = ManifestFile::open(dir.path()).unwrap();
        let manifest = mf.read().unwrap();
        assert_eq!(manifest.root_addr().unwrap(), Addr::EMPTY);
        assert!(manifest.tables.is_empty());
    }

    #[test]
    fn test_swap_root_cas() {
        let dir = TempDir::new().unwrap();
        let mf = ManifestFile::open(dir.path()).unwrap();

        let a = Addr::of(b"first root");
        let (_, swapped) = mf.swap_root(Addr::EMPTY, a).unwrap();
        assert!(swapped);

        // Stale expectation loses and leaves the root alone
        let b = Addr::of(b"second root");
        let (manifest, swapped) = mf.swap_root(Addr::EMPTY, b).unwrap();
        assert!(!swapped);
        assert_eq!(manifest.root_addr().unwrap(), a);
    }

    #[test]
    fn test_add_tables_merges() {
        let dir = TempDir::new().unwrap();
        let mf = ManifestFile::open(dir.path()).unwrap();

        mf.add_tables(&["aa.table".to_string()]).unwrap();
        let manifest = mf
            .add_tables(&["aa.table".to_string(), "bb.table".to_string()])
            .unwrap();
        assert_eq!(manifest.tables, vec!["aa.table", "bb.table"]);
    }

    #[test]
    fn test_reopen_preserves_state() {
        let dir = TempDir::new().unwrap();
        let a = Addr::of(b"persisted");
        {
            let mf = ManifestFile::open(dir.path()).unwrap();
            mf.swap_root(Addr::EMPTY, a).unwrap();
        }
        let mf = ManifestFile::open(dir.path()).unwrap();
        assert_eq!(mf.read().unwrap().root_addr().unwrap(), a);
    }
}
