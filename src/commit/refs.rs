// src/commit/refs.rs

//! Named refs over the chunk store root
//!
//! Every ref in the database lives in a single canonical map chunk:
//! name → address, with names grouped into buckets (`refs/heads/`,
//! `refs/tags/`, `refs/remotes/<r>/`, `refs/internal/`,
//! `workingSets/heads/`, `refs/stash/`). Advancing a ref re-writes that
//! map and CASes the store root; a lost race re-reads and retries with
//! backoff, bounded so persistent contention surfaces as a transient
//! error instead of a livelock.

use crate::codec::{Reader, Writer};
use crate::hash::Addr;
use crate::store::ChunkStore;
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Bounded CAS retries before surfacing contention
pub const CAS_MAX_RETRIES: u32 = 16;

pub fn branch_ref(name: &str) -> String {
    format!("refs/heads/{}", name)
}

pub fn tag_ref(name: &str) -> String {
    format!("refs/tags/{}", name)
}

pub fn remote_ref(remote: &str, branch: &str) -> String {
    format!("refs/remotes/{}/{}", remote, branch)
}

pub fn internal_ref(name: &str) -> String {
    format!("refs/internal/{}", name)
}

pub fn workingset_ref(branch: &str) -> String {
    format!("workingSets/heads/{}", branch)
}

pub fn stash_ref(name: &str) -> String {
    format!("refs/stash/{}", name)
}

fn encode_map(map: &BTreeMap<String, Addr>) -> Vec<u8> {
    let mut w = Writer::new();
    w.put_u32(map.len() as u32);
    for (name, addr) in map {
        w.put_str(name);
        w.put_addr(addr);
    }
    w.into_bytes()
}

fn decode_map(bytes: &[u8]) -> Result<BTreeMap<String, Addr>> {
    let mut r = Reader::new(bytes);
    let count = r.get_u32()? as usize;
    let mut map = BTreeMap::new();
    for _ in 0..count {
        let name = r.get_str()?.to_string();
        let addr = r.get_addr()?;
        map.insert(name, addr);
    }
    r.finish()?;
    Ok(map)
}

/// The ref namespace of one chunk store
#[derive(Clone, Debug)]
pub struct RefStore {
    store: Arc<dyn ChunkStore>,
}

impl RefStore {
    pub fn new(store: Arc<dyn ChunkStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn ChunkStore> {
        &self.store
    }

    /// Read the current root and its ref map
    fn read(&self) -> Result<(Addr, BTreeMap<String, Addr>)> {
        let root = self.store.root()?;
        if root.is_empty() {
            return Ok((root, BTreeMap::new()));
        }
        let bytes = self.store.get_required(&root)?;
        Ok((root, decode_map(&bytes)?))
    }

    pub fn get(&self, name: &str) -> Result<Option<Addr>> {
        Ok(self.read()?.1.get(name).copied())
    }

    pub fn require(&self, name: &str) -> Result<Addr> {
        self.get(name)?
            .ok_or_else(|| Error::RefNotFound(name.to_string()))
    }

    /// All refs under a prefix, e.g. `refs/heads/`, with the prefix
    /// stripped.
    pub fn list(&self, prefix: &str) -> Result<Vec<(String, Addr)>> {
        Ok(self
            .read()?
            .1
            .into_iter()
            .filter(|(name, _)| name.starts_with(prefix))
            .map(|(name, addr)| (name[prefix.len()..].to_string(), addr))
            .collect())
    }

    /// Apply `mutate` to the ref map and CAS the result in, retrying
    /// lost races against a re-read map. The closure re-runs on every
    /// retry with fresh contents.
    pub fn update<F>(&self, mut mutate: F) -> Result<()>
    where
        F: FnMut(&mut BTreeMap<String, Addr>) -> Result<()>,
    {
        for attempt in 0..CAS_MAX_RETRIES {
            let (current, mut map) = self.read()?;
            mutate(&mut map)?;
            let next = self.store.put(&encode_map(&map))?;
            if next == current {
                return Ok(());
            }
            if self.store.commit_root(current, next)? {
                return Ok(());
            }
            let delay = Duration::from_millis(1u64 << attempt.min(6));
            debug!(attempt, ?delay, "ref map CAS lost; retrying");
            std::thread::sleep(delay);
        }
        warn!("ref map CAS exhausted retries");
        Err(Error::Contention("ref update".to_string()))
    }

    pub fn set(&self, name: &str, addr: Addr) -> Result<()> {
        self.update(|map| {
            map.insert(name.to_string(), addr);
            Ok(())
        })
    }

    pub fn delete(&self, name: &str) -> Result<()> {
        self.update(|map| {
            map.remove(name);
            Ok(())
        })
    }

    /// Single-ref CAS: succeed only while the ref still points at
    /// `expected` (`None` = must not exist). `new = None` deletes.
    pub fn compare_and_set(
        &self,
        name: &str,
        expected: Option<Addr>,
        new: Option<Addr>,
    ) -> Result<bool> {
        let mut swapped = true;
        let result = self.update(|map| {
            if map.get(name).copied() != expected {
                swapped = false;
                return Ok(());
            }
            swapped = true;
            match new {
                Some(addr) => map.insert(name.to_string(), addr),
                None => map.remove(name),
            };
            Ok(())
        });
        result.map(|()| swapped)
    }
}
