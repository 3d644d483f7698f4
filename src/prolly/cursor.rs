// src/prolly/cursor.rs

//! Tree cursors
//!
//! A cursor is a lazy, finite, non-restartable walk over one immutable
//! root; it stays valid while newer roots are written. The diff walk
//! additionally uses [`Cursor::leaf_addr_at_start`] and
//! [`Cursor::skip_leaf`] to hop over whole leaves the two trees share.

use super::node::Node;
use super::KeyOrder;
use crate::hash::Addr;
use crate::store::ChunkStore;
use crate::Result;
use std::cmp::Ordering;

pub struct Cursor<'a> {
    store: &'a dyn ChunkStore,
    /// Path from root to leaf; each frame is (node, next index, addr)
    stack: Vec<(Node, usize, Addr)>,
}

impl<'a> Cursor<'a> {
    /// Cursor positioned before the first entry
    pub fn at_start(store: &'a dyn ChunkStore, root: Option<Addr>) -> Result<Self> {
        let mut cursor = Self {
            store,
            stack: Vec::new(),
        };
        if let Some(addr) = root {
            let node = Node::load(store, &addr)?;
            cursor.stack.push((node, 0, addr));
            cursor.descend_first()?;
        }
        Ok(cursor)
    }

    /// Cursor positioned at the first entry with key >= `key`
    pub fn seek(
        store: &'a dyn ChunkStore,
        root: Option<Addr>,
        key: &[u8],
        order: &KeyOrder,
    ) -> Result<Self> {
        let mut cursor = Self {
            store,
            stack: Vec::new(),
        };
        let Some(mut addr) = root else {
            return Ok(cursor);
        };
        loop {
            let node = Node::load(store, &addr)?;
            // First entry with key >= target; internal keys are subtree
            // maxima so the same rule picks the right child.
            let idx = node
                .keys
                .partition_point(|k| order.compare(k, key) == Ordering::Less);
            if node.is_leaf() {
                cursor.stack.push((node, idx, addr));
                cursor.normalize()?;
                return Ok(cursor);
            }
            if idx == node.len() {
                // Every key in this subtree is < target
                cursor.stack.push((node, idx, addr));
                cursor.normalize()?;
                return Ok(cursor);
            }
            let (child, _) = node.child_ref(idx)?;
            cursor.stack.push((node, idx, addr));
            addr = child;
        }
    }

    /// Descend from the current top frame to its first leaf
    fn descend_first(&mut self) -> Result<()> {
        loop {
            let Some((node, idx, _)) = self.stack.last() else {
                return Ok(());
            };
            if node.is_leaf() || *idx >= node.len() {
                return Ok(());
            }
            let (child, _) = node.child_ref(*idx)?;
            let child_node = Node::load(self.store, &child)?;
            self.stack.push((child_node, 0, child));
        }
    }

    /// Pop exhausted frames and advance parents until the cursor points
    /// at a real entry (or runs off the end).
    fn normalize(&mut self) -> Result<()> {
        loop {
            let Some((node, idx, _)) = self.stack.last() else {
                return Ok(());
            };
            if *idx < node.len() {
                if node.is_leaf() {
                    return Ok(());
                }
                return self.descend_first();
            }
            self.stack.pop();
            if let Some(frame) = self.stack.last_mut() {
                frame.1 += 1;
            }
        }
    }

    /// True when no entries remain
    pub fn exhausted(&self) -> bool {
        self.stack.is_empty()
    }

    /// Current entry without advancing
    pub fn peek(&self) -> Option<(&[u8], &[u8])> {
        let (node, idx, _) = self.stack.last()?;
        if *idx < node.len() && node.is_leaf() {
            Some((&node.keys[*idx], &node.values[*idx]))
        } else {
            None
        }
    }

    /// Current entry, then advance
    pub fn next_entry(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let Some((node, idx, _)) = self.stack.last_mut() else {
            return Ok(None);
        };
        debug_assert!(node.is_leaf());
        let entry = (node.keys[*idx].clone(), node.values[*idx].clone());
        *idx += 1;
        self.normalize()?;
        Ok(Some(entry))
    }

    /// When positioned at the first entry of a leaf, that leaf's address
    pub fn leaf_addr_at_start(&self) -> Option<Addr> {
        let (node, idx, addr) = self.stack.last()?;
        if node.is_leaf() && *idx == 0 && !node.is_empty() {
            Some(*addr)
        } else {
            None
        }
    }

    /// Jump past the current leaf entirely
    pub fn skip_leaf(&mut self) -> Result<()> {
        if let Some((node, idx, _)) = self.stack.last_mut() {
            debug_assert!(node.is_leaf());
            *idx = node.len();
        }
        self.normalize()
    }
}

#[cfg(test)]
mod tests {
    use super::super::chunker::TreeBuilder;
    use super::*;
    use crate::store::MemoryChunkStore;

    fn build(store: &MemoryChunkStore, n: u32) -> Option<Addr> {
        let mut builder = TreeBuilder::new(store);
        for i in 0..n {
            builder
                .push(
                    format!("key-{:06}", i).into_bytes(),
                    format!("val-{}", i).into_bytes(),
                )
                .unwrap();
        }
        builder.finish().unwrap().map(|(a, _)| a)
    }

    #[test]
    fn test_walk_all() {
        let store = MemoryChunkStore::new();
        let root = build(&store, 2_000);
        let mut cursor = Cursor::at_start(&store, root).unwrap();
        let mut seen = 0u32;
        while let Some((key, _)) = cursor.next_entry().unwrap() {
            assert_eq!(key, format!("key-{:06}", seen).into_bytes());
            seen += 1;
        }
        assert_eq!(seen, 2_000);
    }

    #[test]
    fn test_seek_middle() {
        let store = MemoryChunkStore::new();
        let root = build(&store, 2_000);
        let mut cursor =
            Cursor::seek(&store, root, b"key-001500", &KeyOrder::Bytes).unwrap();
        let (key, _) = cursor.next_entry().unwrap().unwrap();
        assert_eq!(key, b"key-001500".to_vec());
    }

    #[test]
    fn test_seek_between_and_past() {
        let store = MemoryChunkStore::new();
        let root = build(&store, 100);
        // Between two keys lands on the next one
        let mut cursor = Cursor::seek(&store, root, b"key-000050x", &KeyOrder::Bytes).unwrap();
        let (key, _) = cursor.next_entry().unwrap().unwrap();
        assert_eq!(key, b"key-000051".to_vec());
        // Past the end is exhausted
        let mut cursor = Cursor::seek(&store, root, b"zzz", &KeyOrder::Bytes).unwrap();
        assert!(cursor.next_entry().unwrap().is_none());
    }

    #[test]
    fn test_empty_cursor() {
        let store = MemoryChunkStore::new();
        let mut cursor = Cursor::at_start(&store, None).unwrap();
        assert!(cursor.exhausted());
        assert!(cursor.next_entry().unwrap().is_none());
    }
}
