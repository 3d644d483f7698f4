// src/commit/mod.rs

//! Commits, root values, and tags
//!
//! A root value maps table names to table addresses and carries the
//! database-wide metadata (foreign keys, feature version). A commit
//! names one root value plus parents and author metadata. All three are
//! canonical chunks: the commit address fixes the entire database state
//! it describes.

mod merge_base;
mod refs;

pub use merge_base::{is_ancestor, merge_base};
pub use refs::{
    branch_ref, internal_ref, remote_ref, stash_ref, tag_ref, workingset_ref, RefStore,
    CAS_MAX_RETRIES,
};

use crate::codec::{Reader, Writer};
use crate::hash::Addr;
use crate::schema::ForeignKey;
use crate::store::ChunkStore;
use crate::table::Table;
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::sync::Arc;

/// The message of the canonical initial commit
pub const INIT_COMMIT_MESSAGE: &str = "Initialize data repository";

/// Storage format generation for forward-compat checks
pub const FEATURE_VERSION: u32 = 1;

/// A database state: table name → table address, plus global metadata
#[derive(Debug, Clone, PartialEq)]
pub struct RootValue {
    tables: BTreeMap<String, Addr>,
    foreign_keys: Vec<ForeignKey>,
    feature_version: u32,
}

impl Default for RootValue {
    fn default() -> Self {
        Self::new()
    }
}

impl RootValue {
    pub fn new() -> Self {
        Self {
            tables: BTreeMap::new(),
            foreign_keys: Vec::new(),
            feature_version: FEATURE_VERSION,
        }
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }

    pub fn table_addr(&self, name: &str) -> Option<Addr> {
        self.tables.get(name).copied()
    }

    /// Resolve a table name case-insensitively, returning the stored
    /// spelling.
    pub fn resolve_table_name(&self, name: &str) -> Option<String> {
        if self.tables.contains_key(name) {
            return Some(name.to_string());
        }
        self.tables
            .keys()
            .find(|k| k.eq_ignore_ascii_case(name))
            .cloned()
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.resolve_table_name(name).is_some()
    }

    pub fn get_table(&self, store: &Arc<dyn ChunkStore>, name: &str) -> Result<Option<Table>> {
        let Some(stored) = self.resolve_table_name(name) else {
            return Ok(None);
        };
        let addr = self.tables[&stored];
        Ok(Some(Table::load(store.clone(), &addr)?))
    }

    /// Store `table` and bind it under `name` in a new root
    pub fn put_table(&self, name: &str, table: &Table) -> Result<RootValue> {
        let addr = table.save()?;
        let mut root = self.clone();
        let stored = root.resolve_table_name(name).unwrap_or_else(|| name.to_string());
        root.tables.insert(stored, addr);
        Ok(root)
    }

    pub fn remove_table(&self, name: &str) -> Result<RootValue> {
        let stored = self
            .resolve_table_name(name)
            .ok_or_else(|| Error::Argument(format!("table not found: {}", name)))?;
        let mut root = self.clone();
        root.tables.remove(&stored);
        root.foreign_keys
            .retain(|fk| fk.child_table != stored && fk.parent_table != stored);
        Ok(root)
    }

    pub fn rename_table(&self, old: &str, new: &str) -> Result<RootValue> {
        let stored = self
            .resolve_table_name(old)
            .ok_or_else(|| Error::Argument(format!("table not found: {}", old)))?;
        if self.has_table(new) {
            return Err(Error::Argument(format!("table already exists: {}", new)));
        }
        let mut root = self.clone();
        let addr = root.tables.remove(&stored).unwrap_or(Addr::EMPTY);
        root.tables.insert(new.to_string(), addr);
        for fk in &mut root.foreign_keys {
            if fk.child_table == stored {
                fk.child_table = new.to_string();
            }
            if fk.parent_table == stored {
                fk.parent_table = new.to_string();
            }
        }
        Ok(root)
    }

    pub fn foreign_keys(&self) -> &[ForeignKey] {
        &self.foreign_keys
    }

    pub fn add_foreign_key(&self, fk: ForeignKey) -> Result<RootValue> {
        if self
            .foreign_keys
            .iter()
            .any(|existing| existing.name.eq_ignore_ascii_case(&fk.name))
        {
            return Err(Error::Schema(format!(
                "foreign key '{}' already exists",
                fk.name
            )));
        }
        let mut root = self.clone();
        root.foreign_keys.push(fk);
        root.foreign_keys.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(root)
    }

    pub fn drop_foreign_key(&self, name: &str) -> Result<RootValue> {
        let mut root = self.clone();
        let before = root.foreign_keys.len();
        root.foreign_keys
            .retain(|fk| !fk.name.eq_ignore_ascii_case(name));
        if root.foreign_keys.len() == before {
            return Err(Error::Schema(format!("foreign key '{}' not found", name)));
        }
        Ok(root)
    }

    /// Foreign keys whose parent side is this table's primary key
    pub fn fks_referencing(&self, table: &str) -> Vec<&ForeignKey> {
        self.foreign_keys
            .iter()
            .filter(|fk| fk.parent_table.eq_ignore_ascii_case(table))
            .collect()
    }

    /// Any table carrying a non-empty conflict or violation sidecar
    pub fn unmerged_tables(&self, store: &Arc<dyn ChunkStore>) -> Result<Vec<String>> {
        let mut out = Vec::new();
        for name in self.table_names() {
            if let Some(table) = self.get_table(store, &name)? {
                if table.has_conflicts() || table.has_violations() {
                    out.push(name);
                }
            }
        }
        Ok(out)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.put_u32(self.feature_version);
        w.put_u16(self.tables.len() as u16);
        for (name, addr) in &self.tables {
            w.put_str(name);
            w.put_addr(addr);
        }
        w.put_u16(self.foreign_keys.len() as u16);
        for fk in &self.foreign_keys {
            fk.encode(&mut w);
        }
        w.into_bytes()
    }

    pub fn hash(&self) -> Addr {
        Addr::of(&self.encode())
    }

    pub fn save(&self, store: &Arc<dyn ChunkStore>) -> Result<Addr> {
        store.put(&self.encode())
    }

    pub fn load(store: &Arc<dyn ChunkStore>, addr: &Addr) -> Result<RootValue> {
        let bytes = store.get_required(addr)?;
        let mut r = Reader::new(&bytes);
        let feature_version = r.get_u32()?;
        if feature_version > FEATURE_VERSION {
            return Err(Error::Config(format!(
                "root value requires feature version {}, this build supports {}",
                feature_version, FEATURE_VERSION
            )));
        }
        let table_count = r.get_u16()? as usize;
        let mut tables = BTreeMap::new();
        for _ in 0..table_count {
            let name = r.get_str()?.to_string();
            let addr = r.get_addr()?;
            tables.insert(name, addr);
        }
        let fk_count = r.get_u16()? as usize;
        let mut foreign_keys = Vec::with_capacity(fk_count);
        for _ in 0..fk_count {
            foreign_keys.push(ForeignKey::decode(&mut r)?);
        }
        r.finish()?;
        Ok(RootValue {
            tables,
            foreign_keys,
            feature_version,
        })
    }
}

/// Who made a commit, and when
#[derive(Debug, Clone, PartialEq)]
pub struct CommitMeta {
    pub name: String,
    pub email: String,
    /// Set when the committer differs from the author (amend)
    pub committer_name: Option<String>,
    pub committer_email: Option<String>,
    /// Unix seconds
    pub timestamp: i64,
    /// Minutes east of UTC
    pub tz_offset_minutes: i32,
    pub message: String,
}

impl CommitMeta {
    pub fn new(name: &str, email: &str, timestamp: i64, message: &str) -> Self {
        Self {
            name: name.to_string(),
            email: email.to_string(),
            committer_name: None,
            committer_email: None,
            timestamp,
            tz_offset_minutes: 0,
            message: message.to_string(),
        }
    }

    fn encode(&self, w: &mut Writer) {
        w.put_str(&self.name);
        w.put_str(&self.email);
        match (&self.committer_name, &self.committer_email) {
            (Some(name), Some(email)) => {
                w.put_bool(true);
                w.put_str(name);
                w.put_str(email);
            }
            _ => w.put_bool(false),
        }
        w.put_i64(self.timestamp);
        w.put_i32(self.tz_offset_minutes);
        w.put_str(&self.message);
    }

    fn decode(r: &mut Reader) -> Result<CommitMeta> {
        let name = r.get_str()?.to_string();
        let email = r.get_str()?.to_string();
        let (committer_name, committer_email) = if r.get_bool()? {
            (
                Some(r.get_str()?.to_string()),
                Some(r.get_str()?.to_string()),
            )
        } else {
            (None, None)
        };
        let timestamp = r.get_i64()?;
        let tz_offset_minutes = r.get_i32()?;
        let message = r.get_str()?.to_string();
        Ok(CommitMeta {
            name,
            email,
            committer_name,
            committer_email,
            timestamp,
            tz_offset_minutes,
            message,
        })
    }
}

/// A node of the history DAG
#[derive(Debug, Clone, PartialEq)]
pub struct Commit {
    pub parents: Vec<Addr>,
    pub root: Addr,
    pub meta: CommitMeta,
}

impl Commit {
    pub fn is_initial(&self) -> bool {
        self.parents.is_empty()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.put_u16(self.parents.len() as u16);
        for parent in &self.parents {
            w.put_addr(parent);
        }
        w.put_addr(&self.root);
        self.meta.encode(&mut w);
        w.into_bytes()
    }

    pub fn hash(&self) -> Addr {
        Addr::of(&self.encode())
    }

    pub fn save(&self, store: &Arc<dyn ChunkStore>) -> Result<Addr> {
        store.put(&self.encode())
    }

    pub fn load(store: &Arc<dyn ChunkStore>, addr: &Addr) -> Result<Commit> {
        let bytes = store.get_required(addr)?;
        let mut r = Reader::new(&bytes);
        let parent_count = r.get_u16()? as usize;
        let mut parents = Vec::with_capacity(parent_count);
        for _ in 0..parent_count {
            parents.push(r.get_addr()?);
        }
        let root = r.get_addr()?;
        let meta = CommitMeta::decode(&mut r)?;
        r.finish()?;
        Ok(Commit {
            parents,
            root,
            meta,
        })
    }

    pub fn load_root(&self, store: &Arc<dyn ChunkStore>) -> Result<RootValue> {
        RootValue::load(store, &self.root)
    }
}

/// A tag capsule: the tagged commit plus tagger metadata
#[derive(Debug, Clone, PartialEq)]
pub struct TagValue {
    pub commit: Addr,
    pub meta: CommitMeta,
}

impl TagValue {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.put_addr(&self.commit);
        self.meta.encode(&mut w);
        w.into_bytes()
    }

    pub fn save(&self, store: &Arc<dyn ChunkStore>) -> Result<Addr> {
        store.put(&self.encode())
    }

    pub fn load(store: &Arc<dyn ChunkStore>, addr: &Addr) -> Result<TagValue> {
        let bytes = store.get_required(addr)?;
        let mut r = Reader::new(&bytes);
        let commit = r.get_addr()?;
        let meta = CommitMeta::decode(&mut r)?;
        r.finish()?;
        Ok(TagValue { commit, meta })
    }
}

/// Walk history from `head` newest-first by commit timestamp
pub fn history(
    store: &Arc<dyn ChunkStore>,
    head: Addr,
    limit: Option<usize>,
) -> Result<Vec<(Addr, Commit)>> {
    use std::collections::{BinaryHeap, HashSet};

    #[derive(PartialEq, Eq)]
    struct Entry(i64, Addr);
    impl Ord for Entry {
        fn cmp(&self, other: &Self) -> std::cmp::Ordering {
            self.0.cmp(&other.0).then(self.1.cmp(&other.1))
        }
    }
    impl PartialOrd for Entry {
        fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
            Some(self.cmp(other))
        }
    }

    let mut out = Vec::new();
    let mut heap = BinaryHeap::new();
    let mut seen = HashSet::new();

    let commit = Commit::load(store, &head)?;
    heap.push(Entry(commit.meta.timestamp, head));
    seen.insert(head);

    while let Some(Entry(_, addr)) = heap.pop() {
        let commit = Commit::load(store, &addr)?;
        for parent in &commit.parents {
            if seen.insert(*parent) {
                let parent_commit = Commit::load(store, parent)?;
                heap.push(Entry(parent_commit.meta.timestamp, *parent));
            }
        }
        out.push((addr, commit));
        if let Some(limit) = limit {
            if out.len() >= limit {
                break;
            }
        }
    }
    Ok(out)
}
