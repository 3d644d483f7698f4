// src/remote/walker.rs

//! Typed reachability over the chunk graph
//!
//! Chunks are opaque bytes; which addresses they reference depends on
//! what they are. The walker knows the shapes — commit → root value →
//! tables → prolly nodes → tuple-embedded blob chunks — and descends
//! with a shared visited set, so shared subtrees are collected once.

use crate::codec::Value;
use crate::commit::{Commit, RootValue};
use crate::hash::Addr;
use crate::prolly::Node;
use crate::store::ChunkStore;
use crate::table::Table;
use crate::Result;
use std::collections::HashSet;
use std::sync::Arc;

/// Collect every chunk reachable from a prolly root
fn collect_map_closure(
    store: &Arc<dyn ChunkStore>,
    root: Addr,
    out: &mut HashSet<Addr>,
) -> Result<()> {
    if root.is_empty() || !out.insert(root) {
        return Ok(());
    }
    let mut stack = vec![root];
    while let Some(addr) = stack.pop() {
        let node = Node::load(store.as_ref(), &addr)?;
        if node.is_leaf() {
            for value in &node.values {
                // Leaf values that decode as tuples may embed blob refs
                if let Ok(Value::Tuple(fields)) = Value::from_bytes(value) {
                    collect_blob_refs(&fields, out);
                }
            }
        } else {
            for idx in 0..node.len() {
                let (child, _) = node.child_ref(idx)?;
                if out.insert(child) {
                    stack.push(child);
                }
            }
        }
    }
    Ok(())
}

fn collect_blob_refs(fields: &[Value], out: &mut HashSet<Addr>) {
    for field in fields {
        match field {
            Value::Blob(blob) => {
                for chunk in &blob.chunks {
                    out.insert(*chunk);
                }
            }
            Value::Tuple(inner) => collect_blob_refs(inner, out),
            _ => {}
        }
    }
}

/// Collect every chunk reachable from a root value (tables, their
/// trees, sidecars, blobs), including the root value chunk itself.
pub fn collect_root_closure(
    store: &Arc<dyn ChunkStore>,
    root_addr: Addr,
    out: &mut HashSet<Addr>,
) -> Result<()> {
    if !out.insert(root_addr) {
        return Ok(());
    }
    let root = RootValue::load(store, &root_addr)?;
    for name in root.table_names() {
        let Some(table_addr) = root.table_addr(&name) else {
            continue;
        };
        if !out.insert(table_addr) {
            continue;
        }
        let table = Table::load(store.clone(), &table_addr)?;
        collect_map_closure(store, table.primary().root_addr(), out)?;
        for def in table.schema().indexes() {
            if let Some(index) = table.index(&def.name) {
                collect_map_closure(store, index.root_addr(), out)?;
            }
        }
        if let Some(conflicts) = table.conflicts() {
            collect_map_closure(store, conflicts.rows.root_addr(), out)?;
        }
        if let Some(violations) = table.violations() {
            collect_map_closure(store, violations.root_addr(), out)?;
        }
    }
    Ok(())
}

/// Collect the closure of a commit: the commit chunk, its root
/// closure, and (recursively) its parents, stopping at commits in
/// `boundary` whose closures are already complete elsewhere.
pub fn collect_commit_closure(
    store: &Arc<dyn ChunkStore>,
    tip: Addr,
    boundary: &HashSet<Addr>,
    out: &mut HashSet<Addr>,
) -> Result<()> {
    let mut stack = vec![tip];
    let mut seen_commits = HashSet::new();
    while let Some(addr) = stack.pop() {
        if boundary.contains(&addr) || !seen_commits.insert(addr) {
            continue;
        }
        out.insert(addr);
        let commit = Commit::load(store, &addr)?;
        collect_root_closure(store, commit.root, out)?;
        for parent in commit.parents {
            stack.push(parent);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Value;
    use crate::commit::CommitMeta;
    use crate::schema::{Schema, SqlType};
    use crate::store::MemoryChunkStore;

    fn store() -> Arc<dyn ChunkStore> {
        Arc::new(MemoryChunkStore::new())
    }

    fn sample_commit(store: &Arc<dyn ChunkStore>, rows: i64, parents: Vec<Addr>) -> Addr {
        let schema = Schema::builder("t")
            .column("pk", SqlType::Int, false)
            .column("v", SqlType::Int, true)
            .primary_key(&["pk"])
            .build()
            .unwrap();
        let table = Table::new(store.clone(), schema);
        let mut editor = table.editor();
        for i in 0..rows {
            editor
                .insert_row(vec![Value::Int(i), Value::Int(i)])
                .unwrap();
        }
        let table = editor.flush().unwrap();
        let root = RootValue::new().put_table("t", &table).unwrap();
        let root_addr = root.save(store).unwrap();
        Commit {
            parents,
            root: root_addr,
            meta: CommitMeta::new("a", "a@x", 100, "c"),
        }
        .save(store)
        .unwrap()
    }

    #[test]
    fn test_closure_contains_all_shapes() {
        let store = store();
        let tip = sample_commit(&store, 500, vec![]);

        let mut closure = HashSet::new();
        collect_commit_closure(&store, tip, &HashSet::new(), &mut closure).unwrap();

        // Every collected chunk exists in the store
        let addrs: Vec<Addr> = closure.iter().copied().collect();
        let result = store.has_many(&addrs).unwrap();
        assert!(result.absent.is_empty());
        assert!(closure.contains(&tip));
        // commit + root + table + at least one tree node
        assert!(closure.len() >= 4);
    }

    #[test]
    fn test_boundary_stops_walk() {
        let store = store();
        let base = sample_commit(&store, 10, vec![]);
        let tip = sample_commit(&store, 20, vec![base]);

        let mut full = HashSet::new();
        collect_commit_closure(&store, tip, &HashSet::new(), &mut full).unwrap();
        assert!(full.contains(&base));

        let mut bounded = HashSet::new();
        let boundary: HashSet<Addr> = [base].into_iter().collect();
        collect_commit_closure(&store, tip, &boundary, &mut bounded).unwrap();
        assert!(!bounded.contains(&base));
        assert!(bounded.len() < full.len());
    }

    #[test]
    fn test_shared_chunks_collected_once() {
        let store = store();
        let a = sample_commit(&store, 100, vec![]);
        let b = sample_commit(&store, 100, vec![a]);

        // Both commits share the same table contents, so the closure
        // of b is barely larger than the closure of a.
        let mut closure_a = HashSet::new();
        collect_commit_closure(&store, a, &HashSet::new(), &mut closure_a).unwrap();
        let mut closure_b = HashSet::new();
        collect_commit_closure(&store, b, &HashSet::new(), &mut closure_b).unwrap();
        assert!(closure_b.len() > closure_a.len());
        assert!(closure_b.len() < closure_a.len() * 2);
    }
}
