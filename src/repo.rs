// src/repo.rs

//! Repository: the on-disk `.dolt/` directory and its moving parts
//!
//! ```text
//! <root>/.dolt/
//!   noms/            chunk store (table files + manifest)
//!   config.json      repo-local configuration
//!   repo_state.json  which branch is checked out
//! ```
//!
//! `Repository` wires the store, ref namespace, branch operations, and
//! configuration together; the CLI commands and the stored-procedure
//! surface both run through it. The store is passed around as an
//! explicit `Arc`, never a global.

use crate::commit::{branch_ref, workingset_ref, Commit, CommitMeta, RefStore, RootValue, TagValue};
use crate::config::{check_bin_format, Config};
use crate::hash::Addr;
use crate::store::{ChunkStore, FsChunkStore};
use crate::workingset::{BranchOps, WorkingSet};
use crate::{Error, Result};
use chrono::{Local, Offset};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

const DOLT_DIR: &str = ".dolt";
const STORE_DIR: &str = "noms";
const STATE_FILE: &str = "repo_state.json";

#[derive(Debug, Serialize, Deserialize)]
struct RepoState {
    /// The checked-out branch name
    head: String,
}

#[derive(Debug)]
pub struct Repository {
    dolt_dir: PathBuf,
    store: Arc<dyn ChunkStore>,
    ops: BranchOps,
    config: Config,
    current_branch: String,
}

impl Repository {
    /// Create a repository in `dir`, with the default branch from
    /// configuration (or `initial_branch`) and the canonical initial
    /// commit.
    pub fn init(
        dir: &Path,
        doltcfg_dir: Option<&Path>,
        initial_branch: Option<&str>,
    ) -> Result<Repository> {
        check_bin_format()?;
        let dolt_dir = dir.join(DOLT_DIR);
        if dolt_dir.exists() {
            return Err(Error::Argument(format!(
                "{} already exists",
                dolt_dir.display()
            )));
        }
        fs::create_dir_all(&dolt_dir)?;

        let config = Config::load(Some(&dolt_dir), doltcfg_dir)?;
        let (name, email) = config.committer()?;
        let branch = initial_branch
            .map(String::from)
            .unwrap_or_else(|| config.default_branch());

        let store: Arc<dyn ChunkStore> = Arc::new(FsChunkStore::open(&dolt_dir.join(STORE_DIR))?);
        let refs = RefStore::new(store.clone());

        let root = RootValue::new();
        let root_addr = root.save(&store)?;
        let initial = Commit {
            parents: vec![],
            root: root_addr,
            meta: now_meta(&name, &email, crate::commit::INIT_COMMIT_MESSAGE),
        };
        let commit_addr = initial.save(&store)?;
        let ws = WorkingSet::clean(commit_addr, root_addr);
        let ws_addr = store.put(&ws.encode())?;
        refs.update(|map| {
            map.insert(branch_ref(&branch), commit_addr);
            map.insert(workingset_ref(&branch), ws_addr);
            Ok(())
        })?;

        let state = RepoState {
            head: branch.clone(),
        };
        fs::write(
            dolt_dir.join(STATE_FILE),
            serde_json::to_vec_pretty(&state)
                .map_err(|e| Error::Config(format!("repo state: {}", e)))?,
        )?;

        info!(dir = %dir.display(), branch, "initialized repository");
        Ok(Repository {
            dolt_dir,
            store: store.clone(),
            ops: BranchOps::new(refs),
            config,
            current_branch: branch,
        })
    }

    /// Open the repository at `dir` (the directory containing `.dolt/`)
    pub fn open(dir: &Path, doltcfg_dir: Option<&Path>) -> Result<Repository> {
        check_bin_format()?;
        let dolt_dir = dir.join(DOLT_DIR);
        if !dolt_dir.exists() {
            return Err(Error::Argument(format!(
                "not a repository: {} not found",
                dolt_dir.display()
            )));
        }
        let config = Config::load(Some(&dolt_dir), doltcfg_dir)?;
        let store: Arc<dyn ChunkStore> = Arc::new(FsChunkStore::open(&dolt_dir.join(STORE_DIR))?);
        let refs = RefStore::new(store.clone());

        let state_bytes = fs::read(dolt_dir.join(STATE_FILE))?;
        let state: RepoState = serde_json::from_slice(&state_bytes)
            .map_err(|e| Error::Config(format!("repo state: {}", e)))?;

        Ok(Repository {
            dolt_dir,
            store,
            ops: BranchOps::new(refs),
            config,
            current_branch: state.head,
        })
    }

    pub fn dolt_dir(&self) -> &Path {
        &self.dolt_dir
    }

    pub fn store(&self) -> &Arc<dyn ChunkStore> {
        &self.store
    }

    pub fn refs(&self) -> &RefStore {
        self.ops.refs()
    }

    pub fn ops(&self) -> &BranchOps {
        &self.ops
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    pub fn current_branch(&self) -> &str {
        &self.current_branch
    }

    /// Session-only branch override (`--branch`); never persisted
    pub fn override_branch(&mut self, branch: &str) {
        self.current_branch = branch.to_string();
    }

    /// Record the checked-out branch in `repo_state.json`
    pub fn set_current_branch(&mut self, branch: &str) -> Result<()> {
        let state = RepoState {
            head: branch.to_string(),
        };
        fs::write(
            self.dolt_dir.join(STATE_FILE),
            serde_json::to_vec_pretty(&state)
                .map_err(|e| Error::Config(format!("repo state: {}", e)))?,
        )?;
        self.current_branch = branch.to_string();
        Ok(())
    }

    /// Renaming the checked-out default branch follows it in config
    pub fn rename_branch(&mut self, old: &str, new: &str) -> Result<()> {
        self.ops.rename_branch(old, new)?;
        if self.current_branch == old {
            self.set_current_branch(new)?;
            if self.config.default_branch() == old {
                self.config
                    .set(crate::config::ConfigScope::Local, crate::config::INIT_DEFAULT_BRANCH, new)?;
            }
        }
        Ok(())
    }

    /// Committer metadata stamped with the local clock
    pub fn commit_meta(&self, message: &str) -> Result<CommitMeta> {
        let (name, email) = self.config.committer()?;
        Ok(now_meta(&name, &email, message))
    }

    /// Resolve a revision string: branch name, tag name, or full hash
    pub fn resolve_commit(&self, revision: &str) -> Result<Addr> {
        if let Some(addr) = self.refs().get(&branch_ref(revision))? {
            return Ok(addr);
        }
        if let Some(capsule_addr) = self.refs().get(&crate::commit::tag_ref(revision))? {
            let capsule = TagValue::load(&self.store, &capsule_addr)?;
            return Ok(capsule.commit);
        }
        // Remote-tracking ref spelled remote/branch
        if let Some((remote, branch)) = revision.split_once('/') {
            if let Some(addr) = self
                .refs()
                .get(&crate::commit::remote_ref(remote, branch))?
            {
                return Ok(addr);
            }
        }
        if revision == "HEAD" {
            return self.ops.branch_head(&self.current_branch);
        }
        if let Ok(addr) = revision.parse::<Addr>() {
            if self.store.has_many(&[addr])?.absent.is_empty() {
                return Ok(addr);
            }
        }
        Err(Error::RefNotFound(revision.to_string()))
    }

    /// The working root of the checked-out branch
    pub fn working_root(&self) -> Result<RootValue> {
        self.ops.working_root(&self.current_branch)
    }

    pub fn set_working_root(&self, root: &RootValue) -> Result<()> {
        self.ops.set_working_root(&self.current_branch, root)
    }

    /// Open a transport for a configured remote name
    pub fn open_remote(&self, remote: &str) -> Result<Box<dyn crate::remote::ChunkTransport>> {
        let url = self
            .config
            .remote_url(remote)
            .ok_or_else(|| Error::RemoteNotFound(remote.to_string()))?;
        crate::remote::open_remote(&url)
    }
}

/// Commit metadata stamped with the current local time and zone
fn now_meta(name: &str, email: &str, message: &str) -> CommitMeta {
    let now = Local::now();
    let mut meta = CommitMeta::new(name, email, now.timestamp(), message);
    meta.tz_offset_minutes = now.offset().fix().local_minus_utc() / 60;
    meta
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigScope;
    use tempfile::TempDir;

    fn init_repo(dir: &TempDir) -> Repository {
        let cfg_dir = dir.path().join("cfg");
        // Seed the committer identity globally, as a user would
        let mut config = Config::load(None, Some(&cfg_dir)).unwrap();
        config.set(ConfigScope::Global, "user.name", "alice").unwrap();
        config
            .set(ConfigScope::Global, "user.email", "alice@example.com")
            .unwrap();
        Repository::init(dir.path(), Some(&cfg_dir), None).unwrap()
    }

    #[test]
    fn test_init_creates_initial_commit() {
        let dir = TempDir::new().unwrap();
        let repo = init_repo(&dir);

        assert_eq!(repo.current_branch(), "main");
        let head = repo.ops().branch_head("main").unwrap();
        let commit = Commit::load(repo.store(), &head).unwrap();
        assert!(commit.is_initial());
        assert_eq!(commit.meta.message, crate::commit::INIT_COMMIT_MESSAGE);
        assert!(repo.ops().status("main").unwrap().is_clean());
    }

    #[test]
    fn test_reopen_repository() {
        let dir = TempDir::new().unwrap();
        let head;
        {
            let repo = init_repo(&dir);
            head = repo.ops().branch_head("main").unwrap();
        }
        let cfg_dir = dir.path().join("cfg");
        let repo = Repository::open(dir.path(), Some(&cfg_dir)).unwrap();
        assert_eq!(repo.ops().branch_head("main").unwrap(), head);
        assert_eq!(repo.current_branch(), "main");
    }

    #[test]
    fn test_double_init_rejected() {
        let dir = TempDir::new().unwrap();
        init_repo(&dir);
        let cfg_dir = dir.path().join("cfg");
        assert!(Repository::init(dir.path(), Some(&cfg_dir), None).is_err());
    }

    #[test]
    fn test_init_requires_identity() {
        let dir = TempDir::new().unwrap();
        let cfg_dir = dir.path().join("empty-cfg");
        let err = Repository::init(dir.path(), Some(&cfg_dir), None).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_resolve_commit_forms() {
        let dir = TempDir::new().unwrap();
        let repo = init_repo(&dir);
        let head = repo.ops().branch_head("main").unwrap();

        assert_eq!(repo.resolve_commit("main").unwrap(), head);
        assert_eq!(repo.resolve_commit("HEAD").unwrap(), head);
        assert_eq!(repo.resolve_commit(&head.to_hex()).unwrap(), head);
        assert!(repo.resolve_commit("no-such-ref").is_err());
    }

    #[test]
    fn test_default_branch_rename_updates_config() {
        let dir = TempDir::new().unwrap();
        let mut repo = init_repo(&dir);
        repo.config_mut()
            .set(ConfigScope::Local, crate::config::INIT_DEFAULT_BRANCH, "main")
            .unwrap();
        repo.rename_branch("main", "trunk").unwrap();
        assert_eq!(repo.current_branch(), "trunk");
        assert_eq!(repo.config().default_branch(), "trunk");
        assert!(repo.ops().branch_exists("trunk").unwrap());
        assert!(!repo.ops().branch_exists("main").unwrap());
    }
}
