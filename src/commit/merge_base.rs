// src/commit/merge_base.rs

//! Merge-base computation
//!
//! Finds a lowest common ancestor of two commits by marking every
//! ancestor of one side, then searching the other side breadth-first
//! newest-first. A criss-cross history can have several candidates;
//! this picks the first one found rather than building a recursive
//! virtual base.

use super::Commit;
use crate::hash::Addr;
use crate::store::ChunkStore;
use crate::Result;
use std::collections::{BinaryHeap, HashSet, VecDeque};
use std::sync::Arc;

/// Every commit reachable from `head`, including itself
fn ancestors(store: &Arc<dyn ChunkStore>, head: Addr) -> Result<HashSet<Addr>> {
    let mut seen = HashSet::new();
    let mut queue = VecDeque::new();
    queue.push_back(head);
    seen.insert(head);
    while let Some(addr) = queue.pop_front() {
        let commit = Commit::load(store, &addr)?;
        for parent in commit.parents {
            if seen.insert(parent) {
                queue.push_back(parent);
            }
        }
    }
    Ok(seen)
}

/// True when `ancestor` is reachable from `descendant` (inclusive)
pub fn is_ancestor(store: &Arc<dyn ChunkStore>, ancestor: Addr, descendant: Addr) -> Result<bool> {
    if ancestor == descendant {
        return Ok(true);
    }
    let mut seen = HashSet::new();
    let mut queue = VecDeque::new();
    queue.push_back(descendant);
    seen.insert(descendant);
    while let Some(addr) = queue.pop_front() {
        let commit = Commit::load(store, &addr)?;
        for parent in commit.parents {
            if parent == ancestor {
                return Ok(true);
            }
            if seen.insert(parent) {
                queue.push_back(parent);
            }
        }
    }
    Ok(false)
}

/// The merge base of `a` and `b`, or `None` for unrelated histories
pub fn merge_base(store: &Arc<dyn ChunkStore>, a: Addr, b: Addr) -> Result<Option<Addr>> {
    if a == b {
        return Ok(Some(a));
    }
    let reachable_from_a = ancestors(store, a)?;

    // Search b's history newest-first so the first hit is a lowest
    // common ancestor, not just any common one.
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

    let mut heap = BinaryHeap::new();
    let mut seen = HashSet::new();
    let head = Commit::load(store, &b)?;
    heap.push(Entry(head.meta.timestamp, b));
    seen.insert(b);

    while let Some(Entry(_, addr)) = heap.pop() {
        if reachable_from_a.contains(&addr) {
            return Ok(Some(addr));
        }
        let commit = Commit::load(store, &addr)?;
        for parent in commit.parents {
            if seen.insert(parent) {
                let parent_commit = Commit::load(store, &parent)?;
                heap.push(Entry(parent_commit.meta.timestamp, parent));
            }
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commit::{CommitMeta, RootValue};
    use crate::store::MemoryChunkStore;

    fn store() -> Arc<dyn ChunkStore> {
        Arc::new(MemoryChunkStore::new())
    }

    fn commit(store: &Arc<dyn ChunkStore>, parents: Vec<Addr>, ts: i64) -> Addr {
        let root = RootValue::new().save(store).unwrap();
        Commit {
            parents,
            root,
            meta: CommitMeta::new("a", "a@x", ts, "c"),
        }
        .save(store)
        .unwrap()
    }

    #[test]
    fn test_linear_history() {
        let store = store();
        let c0 = commit(&store, vec![], 100);
        let c1 = commit(&store, vec![c0], 200);
        let c2 = commit(&store, vec![c1], 300);

        assert_eq!(merge_base(&store, c2, c1).unwrap().unwrap(), c1);
        assert_eq!(merge_base(&store, c1, c2).unwrap().unwrap(), c1);
        assert!(is_ancestor(&store, c0, c2).unwrap());
        assert!(!is_ancestor(&store, c2, c0).unwrap());
    }

    #[test]
    fn test_forked_history() {
        let store = store();
        let base = commit(&store, vec![], 100);
        let left = commit(&store, vec![base], 200);
        let right = commit(&store, vec![base], 250);

        assert_eq!(merge_base(&store, left, right).unwrap().unwrap(), base);
        assert_eq!(merge_base(&store, right, left).unwrap().unwrap(), base);
    }

    #[test]
    fn test_base_after_merge() {
        // After merging right into left, the base of (merge, right) is
        // right itself.
        let store = store();
        let base = commit(&store, vec![], 100);
        let left = commit(&store, vec![base], 200);
        let right = commit(&store, vec![base], 250);
        let merge = commit(&store, vec![left, right], 300);

        assert_eq!(merge_base(&store, merge, right).unwrap().unwrap(), right);
        assert!(is_ancestor(&store, right, merge).unwrap());
    }

    #[test]
    fn test_unrelated_histories() {
        let store = store();
        let a = commit(&store, vec![], 100);
        let b = commit(&store, vec![], 200);
        assert!(merge_base(&store, a, b).unwrap().is_none());
    }

    #[test]
    fn test_same_commit() {
        let store = store();
        let a = commit(&store, vec![], 100);
        assert_eq!(merge_base(&store, a, a).unwrap().unwrap(), a);
    }
}
