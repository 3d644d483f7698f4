// src/workingset/mod.rs

//! Working sets: the HEAD / STAGED / WORKING triple per branch
//!
//! Each branch owns a working-set chunk under `workingSets/heads/`,
//! holding the head commit, the staged root (the index), the working
//! root (uncommitted edits), and a merge-in-progress marker. On a
//! clean branch all three roots coincide. Every transition here is one
//! ref-map CAS, so concurrent writers to a branch serialize and the
//! loser retries against fresh state.

mod stash;

pub use stash::{StashEntry, StashStack};

use crate::codec::{Reader, Writer};
use crate::commit::{
    branch_ref, is_ancestor, workingset_ref, Commit, CommitMeta, RefStore, RootValue,
};
use crate::hash::Addr;
use crate::merge::{merge_commits, MergeOutcome};
use crate::table::Table;
use crate::{Error, Result};
use std::sync::Arc;
use tracing::{debug, info};

/// A merge waiting for conflicts to be resolved and committed
#[derive(Debug, Clone, PartialEq)]
pub struct MergeState {
    /// The commit being merged in (the second parent to record)
    pub commit: Addr,
    /// Message for the eventual merge commit
    pub message: String,
    /// The working root as it was before the merge started
    pub pre_merge_working: Addr,
}

/// The per-branch mutable triple
#[derive(Debug, Clone, PartialEq)]
pub struct WorkingSet {
    /// Head commit address
    pub head: Addr,
    /// Staged root value address
    pub staged: Addr,
    /// Working root value address
    pub working: Addr,
    pub merge_state: Option<MergeState>,
}

impl WorkingSet {
    /// A clean working set at `commit` with root `root`
    pub fn clean(commit: Addr, root: Addr) -> Self {
        Self {
            head: commit,
            staged: root,
            working: root,
            merge_state: None,
        }
    }

    /// No divergence between STAGED and WORKING and no open merge.
    /// Callers compare against the head commit's root for full
    /// cleanliness.
    pub fn is_clean(&self) -> bool {
        self.staged == self.working && self.merge_state.is_none()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.put_addr(&self.head);
        w.put_addr(&self.staged);
        w.put_addr(&self.working);
        match &self.merge_state {
            Some(state) => {
                w.put_bool(true);
                w.put_addr(&state.commit);
                w.put_str(&state.message);
                w.put_addr(&state.pre_merge_working);
            }
            None => w.put_bool(false),
        }
        w.into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<WorkingSet> {
        let mut r = Reader::new(bytes);
        let head = r.get_addr()?;
        let staged = r.get_addr()?;
        let working = r.get_addr()?;
        let merge_state = if r.get_bool()? {
            Some(MergeState {
                commit: r.get_addr()?,
                message: r.get_str()?.to_string(),
                pre_merge_working: r.get_addr()?,
            })
        } else {
            None
        };
        r.finish()?;
        Ok(WorkingSet {
            head,
            staged,
            working,
            merge_state,
        })
    }
}

/// How one table differs between two roots
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableChange {
    Added,
    Modified,
    Dropped,
}

impl TableChange {
    pub fn label(&self) -> &'static str {
        match self {
            TableChange::Added => "new table",
            TableChange::Modified => "modified",
            TableChange::Dropped => "deleted",
        }
    }
}

/// `dolt status` content
#[derive(Debug, Default)]
pub struct Status {
    pub staged: Vec<(String, TableChange)>,
    pub unstaged: Vec<(String, TableChange)>,
    pub merging: bool,
    pub conflicted: Vec<String>,
}

impl Status {
    pub fn is_clean(&self) -> bool {
        self.staged.is_empty() && self.unstaged.is_empty() && self.conflicted.is_empty()
    }
}

/// Table-level diff between two roots
pub fn diff_table_names(from: &RootValue, to: &RootValue) -> Vec<(String, TableChange)> {
    let mut out = Vec::new();
    for name in to.table_names() {
        match from.table_addr(&name) {
            None => out.push((name, TableChange::Added)),
            Some(addr) if Some(addr) != to.table_addr(&name) => {
                out.push((name, TableChange::Modified))
            }
            _ => {}
        }
    }
    for name in from.table_names() {
        if !to.has_table(&name) {
            out.push((name, TableChange::Dropped));
        }
    }
    out.sort_by(|a, b| a.0.cmp(&b.0));
    out
}

/// Branch-level operations over the ref store
#[derive(Debug)]
pub struct BranchOps {
    refs: RefStore,
}

impl BranchOps {
    pub fn new(refs: RefStore) -> Self {
        Self { refs }
    }

    pub fn refs(&self) -> &RefStore {
        &self.refs
    }

    fn store(&self) -> Arc<dyn crate::store::ChunkStore> {
        self.refs.store().clone()
    }

    pub fn working_set(&self, branch: &str) -> Result<WorkingSet> {
        let addr = self.refs.require(&workingset_ref(branch))?;
        WorkingSet::decode(&self.store().get_required(&addr)?)
    }

    fn save_working_set(&self, ws: &WorkingSet) -> Result<Addr> {
        self.store().put(&ws.encode())
    }

    pub fn branch_head(&self, branch: &str) -> Result<Addr> {
        self.refs.require(&branch_ref(branch))
    }

    pub fn branch_exists(&self, branch: &str) -> Result<bool> {
        Ok(self.refs.get(&branch_ref(branch))?.is_some())
    }

    pub fn branches(&self) -> Result<Vec<(String, Addr)>> {
        let mut branches = self.refs.list("refs/heads/")?;
        branches.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(branches)
    }

    /// Create a branch (and its clean working set) at `commit`
    pub fn create_branch(&self, name: &str, commit: Addr) -> Result<()> {
        if self.branch_exists(name)? {
            return Err(Error::BranchExists(name.to_string()));
        }
        let commit_value = Commit::load(&self.store(), &commit)?;
        let ws = WorkingSet::clean(commit, commit_value.root);
        let ws_addr = self.save_working_set(&ws)?;
        self.refs.update(|map| {
            if map.contains_key(&branch_ref(name)) {
                return Err(Error::BranchExists(name.to_string()));
            }
            map.insert(branch_ref(name), commit);
            map.insert(workingset_ref(name), ws_addr);
            Ok(())
        })?;
        info!(branch = name, %commit, "created branch");
        Ok(())
    }

    /// Delete a branch. Without `force`, refuse when its history is
    /// not reachable from `current_branch`.
    pub fn delete_branch(&self, name: &str, force: bool, current_branch: &str) -> Result<()> {
        if name == current_branch {
            return Err(Error::Argument(format!(
                "cannot delete checked-out branch '{}'",
                name
            )));
        }
        let head = self.branch_head(name)?;
        if !force {
            let current_head = self.branch_head(current_branch)?;
            if !is_ancestor(&self.store(), head, current_head)? {
                return Err(Error::BranchNotMerged(name.to_string()));
            }
        }
        // The working set is deleted with its branch
        self.refs.update(|map| {
            map.remove(&branch_ref(name));
            map.remove(&workingset_ref(name));
            Ok(())
        })?;
        info!(branch = name, force, "deleted branch");
        Ok(())
    }

    pub fn rename_branch(&self, old: &str, new: &str) -> Result<()> {
        if self.branch_exists(new)? {
            return Err(Error::BranchExists(new.to_string()));
        }
        self.refs.update(|map| {
            let head = map
                .remove(&branch_ref(old))
                .ok_or_else(|| Error::RefNotFound(branch_ref(old)))?;
            let ws = map.remove(&workingset_ref(old));
            map.insert(branch_ref(new), head);
            if let Some(ws) = ws {
                map.insert(workingset_ref(new), ws);
            }
            Ok(())
        })
    }

    pub fn head_root(&self, branch: &str) -> Result<RootValue> {
        let head = self.branch_head(branch)?;
        Commit::load(&self.store(), &head)?.load_root(&self.store())
    }

    pub fn staged_root(&self, branch: &str) -> Result<RootValue> {
        let ws = self.working_set(branch)?;
        RootValue::load(&self.store(), &ws.staged)
    }

    pub fn working_root(&self, branch: &str) -> Result<RootValue> {
        let ws = self.working_set(branch)?;
        RootValue::load(&self.store(), &ws.working)
    }

    /// Replace the working root (used by SQL writes and table edits)
    pub fn set_working_root(&self, branch: &str, root: &RootValue) -> Result<()> {
        let root_addr = root.save(&self.store())?;
        let ws = self.working_set(branch)?;
        let next = WorkingSet {
            working: root_addr,
            ..ws
        };
        let next_addr = self.save_working_set(&next)?;
        self.refs.set(&workingset_ref(branch), next_addr)
    }

    pub fn status(&self, branch: &str) -> Result<Status> {
        let ws = self.working_set(branch)?;
        let store = self.store();
        let head_root = Commit::load(&store, &ws.head)?.load_root(&store)?;
        let staged_root = RootValue::load(&store, &ws.staged)?;
        let working_root = RootValue::load(&store, &ws.working)?;
        Ok(Status {
            staged: diff_table_names(&head_root, &staged_root),
            unstaged: diff_table_names(&staged_root, &working_root),
            merging: ws.merge_state.is_some(),
            conflicted: working_root.unmerged_tables(&store)?,
        })
    }

    /// `dolt add`: copy tables from WORKING into STAGED. `None` stages
    /// everything.
    pub fn stage(&self, branch: &str, tables: Option<&[String]>) -> Result<()> {
        let store = self.store();
        let ws = self.working_set(branch)?;
        let working_root = RootValue::load(&store, &ws.working)?;
        let mut staged_root = RootValue::load(&store, &ws.staged)?;

        let changes = diff_table_names(&staged_root, &working_root);
        for (name, change) in changes {
            let wanted = match tables {
                None => true,
                Some(list) => list
                    .iter()
                    .any(|t| t.eq_ignore_ascii_case(&name) || t.as_str() == "."),
            };
            if !wanted {
                continue;
            }
            match change {
                TableChange::Dropped => staged_root = staged_root.remove_table(&name)?,
                _ => {
                    let addr = working_root
                        .table_addr(&name)
                        .ok_or_else(|| Error::Argument(format!("table not found: {}", name)))?;
                    let table = Table::load(store.clone(), &addr)?;
                    staged_root = staged_root.put_table(&name, &table)?;
                }
            }
            debug!(branch, table = %name, "staged table");
        }

        let staged_addr = staged_root.save(&store)?;
        let next = WorkingSet {
            staged: staged_addr,
            ..ws
        };
        let next_addr = self.save_working_set(&next)?;
        self.refs.set(&workingset_ref(branch), next_addr)
    }

    /// `dolt reset`: copy tables from HEAD back into STAGED (and into
    /// WORKING too when `hard`). `None` resets everything; a hard reset
    /// with no tables also aborts a merge in progress.
    pub fn reset(&self, branch: &str, tables: Option<&[String]>, hard: bool) -> Result<()> {
        let store = self.store();
        let ws = self.working_set(branch)?;
        let head_root = Commit::load(&store, &ws.head)?.load_root(&store)?;

        let (staged, working, merge_state) = match tables {
            None => {
                let head_addr = head_root.save(&store)?;
                if hard {
                    (head_addr, head_addr, None)
                } else {
                    (head_addr, ws.working, ws.merge_state.clone())
                }
            }
            Some(list) => {
                let mut staged_root = RootValue::load(&store, &ws.staged)?;
                let mut working_root = RootValue::load(&store, &ws.working)?;
                for name in list {
                    match head_root.table_addr(name) {
                        Some(addr) => {
                            let table = Table::load(store.clone(), &addr)?;
                            staged_root = staged_root.put_table(name, &table)?;
                            if hard {
                                working_root = working_root.put_table(name, &table)?;
                            }
                        }
                        None => {
                            if staged_root.has_table(name) {
                                staged_root = staged_root.remove_table(name)?;
                            }
                            if hard && working_root.has_table(name) {
                                working_root = working_root.remove_table(name)?;
                            }
                        }
                    }
                }
                (
                    staged_root.save(&store)?,
                    working_root.save(&store)?,
                    ws.merge_state.clone(),
                )
            }
        };

        let next = WorkingSet {
            head: ws.head,
            staged,
            working,
            merge_state,
        };
        let next_addr = self.save_working_set(&next)?;
        self.refs.set(&workingset_ref(branch), next_addr)
    }

    /// `dolt commit`: seal STAGED into a commit
    pub fn commit(
        &self,
        branch: &str,
        meta: CommitMeta,
        allow_empty: bool,
        stage_all: bool,
    ) -> Result<Addr> {
        if stage_all {
            self.stage(branch, None)?;
        }
        let store = self.store();
        let ws = self.working_set(branch)?;
        let head_commit = Commit::load(&store, &ws.head)?;
        let staged_root = RootValue::load(&store, &ws.staged)?;

        let unmerged = staged_root.unmerged_tables(&store)?;
        if !unmerged.is_empty() {
            return Err(Error::Unmerged);
        }
        if ws.staged == head_commit.root && ws.merge_state.is_none() && !allow_empty {
            return Err(Error::Argument(
                "nothing to commit (use dolt add or --all to stage changes)".to_string(),
            ));
        }

        let mut parents = vec![ws.head];
        if let Some(state) = &ws.merge_state {
            parents.push(state.commit);
        }
        let commit = Commit {
            parents,
            root: ws.staged,
            meta,
        };
        let commit_addr = commit.save(&store)?;

        let next = WorkingSet {
            head: commit_addr,
            staged: ws.staged,
            working: ws.working,
            merge_state: None,
        };
        let next_addr = self.save_working_set(&next)?;

        let expected_head = ws.head;
        self.refs.update(|map| {
            // Another session committing to this branch serializes here
            if map.get(&branch_ref(branch)).copied() != Some(expected_head) {
                return Err(Error::Contention(format!("branch '{}'", branch)));
            }
            map.insert(branch_ref(branch), commit_addr);
            map.insert(workingset_ref(branch), next_addr);
            Ok(())
        })?;
        info!(branch, commit = %commit_addr, "created commit");
        Ok(commit_addr)
    }

    /// `dolt checkout <branch>`: working changes travel when they
    /// apply cleanly to the target; otherwise the checkout is refused.
    pub fn checkout(&self, from_branch: &str, to_branch: &str, force: bool) -> Result<()> {
        let store = self.store();
        if !self.branch_exists(to_branch)? {
            // A 40-hex argument is a detached-head request
            if to_branch.len() == 40 && to_branch.parse::<Addr>().is_ok() {
                return Err(Error::DetachedHead(to_branch.to_string()));
            }
            return Err(Error::RefNotFound(branch_ref(to_branch)));
        }

        let from_ws = self.working_set(from_branch)?;
        let from_head_root = Commit::load(&store, &from_ws.head)?.load_root(&store)?;
        let from_working = RootValue::load(&store, &from_ws.working)?;
        let from_staged = RootValue::load(&store, &from_ws.staged)?;

        let to_ws = self.working_set(to_branch)?;
        let to_head_root = Commit::load(&store, &to_ws.head)?.load_root(&store)?;

        let mut target_working = to_head_root.clone();
        let mut target_staged = to_head_root.clone();

        if !force {
            // Carry each changed table iff the target agrees with our
            // head on it (so applying the change cannot stomp anything)
            for (name, _) in diff_table_names(&from_head_root, &from_working) {
                let ours_base = from_head_root.table_addr(&name);
                let target_now = to_head_root.table_addr(&name);
                if target_now != ours_base && target_now != from_working.table_addr(&name) {
                    return Err(Error::CheckoutWouldClobber(name));
                }
                target_working = apply_table(&store, target_working, &from_working, &name)?;
            }
            for (name, _) in diff_table_names(&from_head_root, &from_staged) {
                let ours_base = from_head_root.table_addr(&name);
                let target_now = to_head_root.table_addr(&name);
                if target_now != ours_base && target_now != from_staged.table_addr(&name) {
                    return Err(Error::CheckoutWouldClobber(name));
                }
                target_staged = apply_table(&store, target_staged, &from_staged, &name)?;
            }
        }

        let new_from = WorkingSet::clean(from_ws.head, from_head_root.save(&store)?);
        let new_from_addr = self.save_working_set(&new_from)?;
        let new_to = WorkingSet {
            head: to_ws.head,
            staged: target_staged.save(&store)?,
            working: target_working.save(&store)?,
            merge_state: None,
        };
        let new_to_addr = self.save_working_set(&new_to)?;

        self.refs.update(|map| {
            map.insert(workingset_ref(from_branch), new_from_addr);
            map.insert(workingset_ref(to_branch), new_to_addr);
            Ok(())
        })?;
        info!(from = from_branch, to = to_branch, "checked out branch");
        Ok(())
    }

    /// `dolt merge`: merge `theirs` into the branch head
    pub fn merge(
        &self,
        branch: &str,
        theirs: Addr,
        message: &str,
        meta: CommitMeta,
        no_commit: bool,
    ) -> Result<(MergeOutcome, Option<Addr>)> {
        let store = self.store();
        let ws = self.working_set(branch)?;
        let head_commit = Commit::load(&store, &ws.head)?;
        if ws.staged != head_commit.root || ws.working != head_commit.root {
            return Err(Error::Argument(
                "cannot merge with uncommitted changes; commit or stash them first".to_string(),
            ));
        }

        let outcome = merge_commits(&store, ws.head, theirs)?;
        if outcome.up_to_date {
            return Ok((outcome, None));
        }

        if outcome.fast_forward {
            let their_commit = Commit::load(&store, &theirs)?;
            let next = WorkingSet::clean(theirs, their_commit.root);
            let next_addr = self.save_working_set(&next)?;
            let expected = ws.head;
            self.refs.update(|map| {
                if map.get(&branch_ref(branch)).copied() != Some(expected) {
                    return Err(Error::Contention(format!("branch '{}'", branch)));
                }
                map.insert(branch_ref(branch), theirs);
                map.insert(workingset_ref(branch), next_addr);
                Ok(())
            })?;
            return Ok((outcome, Some(theirs)));
        }

        let merged_addr = outcome.root.save(&store)?;
        if outcome.is_clean() && !no_commit {
            let commit = Commit {
                parents: vec![ws.head, theirs],
                root: merged_addr,
                meta,
            };
            let commit_addr = commit.save(&store)?;
            let next = WorkingSet::clean(commit_addr, merged_addr);
            let next_addr = self.save_working_set(&next)?;
            let expected = ws.head;
            self.refs.update(|map| {
                if map.get(&branch_ref(branch)).copied() != Some(expected) {
                    return Err(Error::Contention(format!("branch '{}'", branch)));
                }
                map.insert(branch_ref(branch), commit_addr);
                map.insert(workingset_ref(branch), next_addr);
                Ok(())
            })?;
            info!(branch, commit = %commit_addr, "merge committed");
            return Ok((outcome, Some(commit_addr)));
        }

        // Leave the merge open in the working set
        let next = WorkingSet {
            head: ws.head,
            staged: merged_addr,
            working: merged_addr,
            merge_state: Some(MergeState {
                commit: theirs,
                message: message.to_string(),
                pre_merge_working: ws.working,
            }),
        };
        let next_addr = self.save_working_set(&next)?;
        self.refs.set(&workingset_ref(branch), next_addr)?;
        info!(
            branch,
            conflicts = outcome.conflict_tables.len(),
            violations = outcome.violation_tables.len(),
            "merge left open in working set"
        );
        Ok((outcome, None))
    }
}

/// Copy one table (or its absence) from `source` into `target`
fn apply_table(
    store: &Arc<dyn crate::store::ChunkStore>,
    target: RootValue,
    source: &RootValue,
    name: &str,
) -> Result<RootValue> {
    match source.table_addr(name) {
        Some(addr) => {
            let table = Table::load(store.clone(), &addr)?;
            target.put_table(name, &table)
        }
        None => {
            if target.has_table(name) {
                target.remove_table(name)
            } else {
                Ok(target)
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests_support {
    use super::*;
    use crate::commit::INIT_COMMIT_MESSAGE;
    use crate::store::MemoryChunkStore;

    /// A fresh in-memory database with an initialized `main` branch
    pub(crate) fn setup_ops() -> BranchOps {
        let store: Arc<dyn crate::store::ChunkStore> = Arc::new(MemoryChunkStore::new());
        let refs = RefStore::new(store.clone());
        let ops = BranchOps::new(refs);

        let root = RootValue::new();
        let root_addr = root.save(&store).unwrap();
        let initial = Commit {
            parents: vec![],
            root: root_addr,
            meta: CommitMeta::new("alice", "alice@example.com", 1_700_000_000, INIT_COMMIT_MESSAGE),
        };
        let commit_addr = initial.save(&store).unwrap();
        let ws = WorkingSet::clean(commit_addr, root_addr);
        let ws_addr = store.put(&ws.encode()).unwrap();
        ops.refs()
            .update(|map| {
                map.insert(branch_ref("main"), commit_addr);
                map.insert(workingset_ref("main"), ws_addr);
                Ok(())
            })
            .unwrap();
        ops
    }
}
