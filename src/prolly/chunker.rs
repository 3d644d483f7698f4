// src/prolly/chunker.rs

//! Content-defined node boundaries and the bottom-up tree builder
//!
//! A boundary falls after an entry when the xxh3 of that entry (seeded
//! by tree level) lands on the target residue. The decision depends
//! only on the entry bytes and the level, so the same sorted entry
//! stream always splits into the same nodes no matter which sequence of
//! edits produced it. Min/max entry clamps bound node size without
//! breaking that determinism.

use super::node::Node;
use crate::hash::Addr;
use crate::store::ChunkStore;
use crate::Result;
use xxhash_rust::xxh3::xxh3_64_with_seed;

/// Boundary falls when hash % TARGET == 0, so nodes average
/// MIN + TARGET entries.
const TARGET: u64 = 47;
const MIN_ENTRIES: usize = 8;
const MAX_ENTRIES: usize = 192;

/// Chunking parameters are part of the storage format; never change
/// them without re-addressing every tree.
fn is_boundary(level: u8, key: &[u8], value: &[u8]) -> bool {
    let mut buf = Vec::with_capacity(8 + key.len() + value.len());
    buf.extend_from_slice(&(key.len() as u32).to_le_bytes());
    buf.extend_from_slice(key);
    buf.extend_from_slice(&(value.len() as u32).to_le_bytes());
    buf.extend_from_slice(value);
    xxh3_64_with_seed(&buf, level as u64) % TARGET == 0
}

struct LevelChunker {
    level: u8,
    keys: Vec<Vec<u8>>,
    values: Vec<Vec<u8>>,
    counts: Vec<u64>,
    nodes_emitted: usize,
}

impl LevelChunker {
    fn new(level: u8) -> Self {
        Self {
            level,
            keys: Vec::new(),
            values: Vec::new(),
            counts: Vec::new(),
            nodes_emitted: 0,
        }
    }

    fn is_idle(&self) -> bool {
        self.keys.is_empty() && self.nodes_emitted == 0
    }
}

/// Streams sorted entries into a stored tree
pub struct TreeBuilder<'a> {
    store: &'a dyn ChunkStore,
    levels: Vec<LevelChunker>,
}

impl<'a> TreeBuilder<'a> {
    pub fn new(store: &'a dyn ChunkStore) -> Self {
        Self {
            store,
            levels: vec![LevelChunker::new(0)],
        }
    }

    /// Append the next leaf entry; keys must arrive in strictly
    /// ascending order.
    pub fn push(&mut self, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        self.push_at(0, key, value, 1)
    }

    fn push_at(&mut self, level: usize, key: Vec<u8>, value: Vec<u8>, count: u64) -> Result<()> {
        if self.levels.len() == level {
            self.levels.push(LevelChunker::new(level as u8));
        }
        let boundary = {
            let lc = &mut self.levels[level];
            lc.keys.push(key);
            lc.values.push(value);
            lc.counts.push(count);
            let len = lc.keys.len();
            len >= MAX_ENTRIES
                || (len >= MIN_ENTRIES
                    && is_boundary(
                        lc.level,
                        &lc.keys[len - 1],
                        &lc.values[len - 1],
                    ))
        };
        if boundary {
            self.emit(level)?;
        }
        Ok(())
    }

    /// Seal the pending entries of `level` into a node and hand its
    /// reference to the level above.
    fn emit(&mut self, level: usize) -> Result<()> {
        let (node, total) = {
            let lc = &mut self.levels[level];
            let node = Node {
                level: lc.level,
                keys: std::mem::take(&mut lc.keys),
                values: std::mem::take(&mut lc.values),
            };
            let total: u64 = std::mem::take(&mut lc.counts).iter().sum();
            lc.nodes_emitted += 1;
            (node, total)
        };
        let last_key = node
            .keys
            .last()
            .cloned()
            .unwrap_or_default();
        let addr = node.save(self.store)?;
        self.push_at(
            level + 1,
            last_key,
            Node::encode_child_ref(addr, total),
            total,
        )
    }

    /// Flush remainders and return the root address and total entry
    /// count; `None` for an empty tree.
    pub fn finish(mut self) -> Result<Option<(Addr, u64)>> {
        let mut level = 0;
        loop {
            if level >= self.levels.len() {
                return Ok(None);
            }
            let higher_active = self.levels[level + 1..].iter().any(|l| !l.is_idle());
            let lc = &self.levels[level];

            if !higher_active && lc.nodes_emitted == 0 {
                // This level holds the whole tree.
                if lc.keys.is_empty() {
                    return Ok(None);
                }
                if level > 0 && lc.keys.len() == 1 {
                    // A single-child internal node collapses to its child
                    let node = Node {
                        level: lc.level,
                        keys: lc.keys.clone(),
                        values: lc.values.clone(),
                    };
                    let (addr, count) = node.child_ref(0)?;
                    return Ok(Some((addr, count)));
                }
                let node = Node {
                    level: lc.level,
                    keys: self.levels[level].keys.clone(),
                    values: self.levels[level].values.clone(),
                };
                let total: u64 = self.levels[level].counts.iter().sum();
                let addr = node.save(self.store)?;
                return Ok(Some((addr, total)));
            }

            if !lc.keys.is_empty() {
                self.emit(level)?;
            }
            level += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryChunkStore;

    fn entry(i: u32) -> (Vec<u8>, Vec<u8>) {
        (
            format!("key-{:08}", i).into_bytes(),
            format!("val-{}", i).into_bytes(),
        )
    }

    fn build(store: &MemoryChunkStore, n: u32) -> Option<(Addr, u64)> {
        let mut builder = TreeBuilder::new(store);
        for i in 0..n {
            let (k, v) = entry(i);
            builder.push(k, v).unwrap();
        }
        builder.finish().unwrap()
    }

    #[test]
    fn test_empty_tree() {
        let store = MemoryChunkStore::new();
        assert!(build(&store, 0).is_none());
    }

    #[test]
    fn test_small_tree_is_single_leaf() {
        let store = MemoryChunkStore::new();
        let (addr, count) = build(&store, 5).unwrap();
        assert_eq!(count, 5);
        let node = Node::load(&store, &addr).unwrap();
        assert!(node.is_leaf());
        assert_eq!(node.len(), 5);
    }

    #[test]
    fn test_large_tree_counts() {
        let store = MemoryChunkStore::new();
        let (addr, count) = build(&store, 10_000).unwrap();
        assert_eq!(count, 10_000);
        let node = Node::load(&store, &addr).unwrap();
        assert!(!node.is_leaf());
        assert_eq!(node.subtree_count().unwrap(), 10_000);
    }

    #[test]
    fn test_deterministic_roots() {
        let s1 = MemoryChunkStore::new();
        let s2 = MemoryChunkStore::new();
        let r1 = build(&s1, 3_000).unwrap();
        let r2 = build(&s2, 3_000).unwrap();
        assert_eq!(r1.0, r2.0);
    }

    #[test]
    fn test_node_size_bounds() {
        let store = MemoryChunkStore::new();
        let (addr, _) = build(&store, 10_000).unwrap();
        // Walk every node and verify the clamps held
        let mut stack = vec![addr];
        while let Some(a) = stack.pop() {
            let node = Node::load(&store, &a).unwrap();
            assert!(node.len() <= MAX_ENTRIES);
            if !node.is_leaf() {
                for i in 0..node.len() {
                    stack.push(node.child_ref(i).unwrap().0);
                }
            }
        }
    }
}
