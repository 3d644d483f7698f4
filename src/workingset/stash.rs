// src/workingset/stash.rs

//! Stashes
//!
//! A stash entry is a commit-shaped capsule of a working set: the
//! branch it came from, the head commit at save time, and the staged
//! and working roots. Entries live in a stack chunk under
//! `refs/stash/stash`. Popping three-way merges the capsule against
//! its saved base into the current working set; a conflicted pop keeps
//! the capsule.

use super::{BranchOps, WorkingSet};
use crate::codec::{Reader, Writer};
use crate::commit::{stash_ref, Commit, RootValue};
use crate::hash::Addr;
use crate::merge::merge_roots;
use crate::{Error, Result};
use tracing::{debug, info};

/// One stashed working set
#[derive(Debug, Clone, PartialEq)]
pub struct StashEntry {
    pub branch: String,
    /// Head commit when the stash was saved (the merge base for pop)
    pub head: Addr,
    pub staged: Addr,
    pub working: Addr,
    pub include_untracked: bool,
    /// Unix seconds
    pub saved_at: i64,
}

impl StashEntry {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.put_str(&self.branch);
        w.put_addr(&self.head);
        w.put_addr(&self.staged);
        w.put_addr(&self.working);
        w.put_bool(self.include_untracked);
        w.put_i64(self.saved_at);
        w.into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<StashEntry> {
        let mut r = Reader::new(bytes);
        let branch = r.get_str()?.to_string();
        let head = r.get_addr()?;
        let staged = r.get_addr()?;
        let working = r.get_addr()?;
        let include_untracked = r.get_bool()?;
        let saved_at = r.get_i64()?;
        r.finish()?;
        Ok(StashEntry {
            branch,
            head,
            staged,
            working,
            include_untracked,
            saved_at,
        })
    }
}

/// The stash stack of one database
pub struct StashStack<'a> {
    ops: &'a BranchOps,
}

impl<'a> StashStack<'a> {
    pub fn new(ops: &'a BranchOps) -> Self {
        Self { ops }
    }

    fn ref_name() -> String {
        stash_ref("stash")
    }

    /// Entry addresses, newest first
    fn load_stack(&self) -> Result<Vec<Addr>> {
        let store = self.ops.refs().store();
        let Some(addr) = self.ops.refs().get(&Self::ref_name())? else {
            return Ok(Vec::new());
        };
        let bytes = store.get_required(&addr)?;
        let mut r = Reader::new(&bytes);
        let count = r.get_u32()? as usize;
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push(r.get_addr()?);
        }
        r.finish()?;
        Ok(out)
    }

    fn save_stack(&self, stack: &[Addr]) -> Result<()> {
        if stack.is_empty() {
            return self.ops.refs().delete(&Self::ref_name());
        }
        let mut w = Writer::new();
        w.put_u32(stack.len() as u32);
        for addr in stack {
            w.put_addr(addr);
        }
        let addr = self.ops.refs().store().put(&w.into_bytes())?;
        self.ops.refs().set(&Self::ref_name(), addr)
    }

    pub fn entries(&self) -> Result<Vec<StashEntry>> {
        let store = self.ops.refs().store();
        self.load_stack()?
            .iter()
            .map(|addr| StashEntry::decode(&store.get_required(addr)?))
            .collect()
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.load_stack()?.is_empty())
    }

    /// `dolt stash`: capture STAGED and WORKING, then reset the branch
    /// clean. Fails when there is nothing to stash.
    pub fn push(&self, branch: &str, include_untracked: bool, saved_at: i64) -> Result<()> {
        let store = self.ops.refs().store().clone();
        let ws = self.ops.working_set(branch)?;
        let head_commit = Commit::load(&store, &ws.head)?;
        if ws.staged == head_commit.root && ws.working == head_commit.root {
            return Err(Error::Argument("no local changes to stash".to_string()));
        }

        let entry = StashEntry {
            branch: branch.to_string(),
            head: ws.head,
            staged: ws.staged,
            working: ws.working,
            include_untracked,
            saved_at,
        };
        let entry_addr = store.put(&entry.encode())?;

        let mut stack = self.load_stack()?;
        stack.insert(0, entry_addr);
        self.save_stack(&stack)?;

        self.ops.reset(branch, None, true)?;
        info!(branch, "stashed working set");
        Ok(())
    }

    /// `dolt stash pop`: apply the newest entry to `branch` via
    /// three-way merge against the capsule's base. Conflicts abort the
    /// pop and keep the capsule.
    pub fn pop(&self, branch: &str) -> Result<StashEntry> {
        let store = self.ops.refs().store().clone();
        let mut stack = self.load_stack()?;
        let Some(entry_addr) = stack.first().copied() else {
            return Err(Error::Argument("no stash entries found".to_string()));
        };
        let entry = StashEntry::decode(&store.get_required(&entry_addr)?)?;

        let base_root = Commit::load(&store, &entry.head)?.load_root(&store)?;
        let stashed_working = RootValue::load(&store, &entry.working)?;
        let current_working = self.ops.working_root(branch)?;

        let outcome = merge_roots(&store, Some(&base_root), &current_working, &stashed_working)?;
        if !outcome.is_clean() {
            return Err(Error::Argument(format!(
                "stash pop would conflict on: {}; the stash entry was kept",
                outcome
                    .conflict_tables
                    .iter()
                    .chain(outcome.violation_tables.iter())
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        }
        self.ops.set_working_root(branch, &outcome.root)?;

        // Re-apply staged state when the capsule had one
        if entry.staged != Commit::load(&store, &entry.head)?.root {
            let stashed_staged = RootValue::load(&store, &entry.staged)?;
            let staged_outcome =
                merge_roots(&store, Some(&base_root), &self.ops.staged_root(branch)?, &stashed_staged)?;
            if staged_outcome.is_clean() {
                let ws = self.ops.working_set(branch)?;
                let staged_addr = staged_outcome.root.save(&store)?;
                let next = WorkingSet {
                    staged: staged_addr,
                    ..ws
                };
                let next_addr = store.put(&next.encode())?;
                self.ops
                    .refs()
                    .set(&crate::commit::workingset_ref(branch), next_addr)?;
            } else {
                debug!(branch, "stash staged state did not apply; left unstaged");
            }
        }

        stack.remove(0);
        self.save_stack(&stack)?;
        info!(branch, "popped stash");
        Ok(entry)
    }

    /// `dolt stash drop`: discard the newest entry
    pub fn drop_newest(&self) -> Result<StashEntry> {
        let store = self.ops.refs().store();
        let mut stack = self.load_stack()?;
        let Some(entry_addr) = stack.first().copied() else {
            return Err(Error::Argument("no stash entries found".to_string()));
        };
        let entry = StashEntry::decode(&store.get_required(&entry_addr)?)?;
        stack.remove(0);
        self.save_stack(&stack)?;
        Ok(entry)
    }

    /// `dolt stash clear`
    pub fn clear(&self) -> Result<()> {
        self.save_stack(&[])
    }
}
