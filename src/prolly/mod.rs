// src/prolly/mod.rs

//! Prolly trees: content-addressed ordered maps
//!
//! An ordered key/value map stored as a probabilistically balanced
//! B-tree whose node boundaries are chosen by content (see `chunker`).
//! Equal contents produce equal root hashes regardless of the edit
//! sequence, which is what makes diff and merge proportional to the
//! size of the change rather than the size of the map.
//!
//! Maps are immutable; [`ProllyMap::edit`] accumulates changes and
//! [`MapEditor::flush`] produces a new map, leaving old roots (and any
//! cursors over them) untouched.

mod chunker;
mod cursor;
mod diff;
mod node;

pub use chunker::TreeBuilder;
pub use cursor::Cursor;
pub use diff::{diff, diff_entries, three_way_diff, DiffEntry, ThreeWayEntry};
pub use node::Node;

use crate::codec::{Collation, Value};
use crate::hash::Addr;
use crate::store::ChunkStore;
use crate::Result;
use std::cmp::Ordering;
use std::sync::Arc;

/// How keys of a map are ordered. A closed sum; the table layer picks
/// the variant that matches the schema of the keys it stores.
#[derive(Debug, Clone)]
pub enum KeyOrder {
    /// Plain lexicographic byte order
    Bytes,
    /// Keys are encoded tuples; fields compare typed, strings honor the
    /// per-field collation
    Tuple(Vec<Collation>),
}

impl KeyOrder {
    pub fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        match self {
            KeyOrder::Bytes => a.cmp(b),
            KeyOrder::Tuple(collations) => match (Value::from_bytes(a), Value::from_bytes(b)) {
                (Ok(Value::Tuple(xs)), Ok(Value::Tuple(ys))) => {
                    for (i, (x, y)) in xs.iter().zip(ys.iter()).enumerate() {
                        let collation = collations.get(i).copied().unwrap_or_default();
                        match x.compare(y, collation) {
                            Ordering::Equal => continue,
                            other => return other,
                        }
                    }
                    xs.len().cmp(&ys.len())
                }
                _ => a.cmp(b),
            },
        }
    }
}

/// An immutable ordered map handle
#[derive(Clone, Debug)]
pub struct ProllyMap {
    store: Arc<dyn ChunkStore>,
    root: Option<Addr>,
    count: u64,
    order: KeyOrder,
}

impl ProllyMap {
    pub fn empty(store: Arc<dyn ChunkStore>, order: KeyOrder) -> Self {
        Self {
            store,
            root: None,
            count: 0,
            order,
        }
    }

    /// Attach to an existing root. The entry count is read from the
    /// root node.
    pub fn load(store: Arc<dyn ChunkStore>, root: Addr, order: KeyOrder) -> Result<Self> {
        if root.is_empty() {
            return Ok(Self::empty(store, order));
        }
        let node = Node::load(store.as_ref(), &root)?;
        let count = node.subtree_count()?;
        Ok(Self {
            store,
            root: Some(root),
            count,
            order,
        })
    }

    /// Build from pre-sorted entries
    pub fn from_sorted_entries<I>(
        store: Arc<dyn ChunkStore>,
        order: KeyOrder,
        entries: I,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = (Vec<u8>, Vec<u8>)>,
    {
        let mut builder = TreeBuilder::new(store.as_ref());
        for (key, value) in entries {
            builder.push(key, value)?;
        }
        let root = builder.finish()?;
        Ok(Self {
            store,
            root: root.map(|(a, _)| a),
            count: root.map(|(_, c)| c).unwrap_or(0),
            order,
        })
    }

    /// Root address; [`Addr::EMPTY`] for an empty map
    pub fn root_addr(&self) -> Addr {
        self.root.unwrap_or(Addr::EMPTY)
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn order(&self) -> &KeyOrder {
        &self.order
    }

    pub fn store(&self) -> &Arc<dyn ChunkStore> {
        &self.store
    }

    /// Two maps with one root hold identical contents
    pub fn same_root(&self, other: &ProllyMap) -> bool {
        self.root_addr() == other.root_addr()
    }

    /// Point lookup
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut cursor = Cursor::seek(self.store.as_ref(), self.root, key, &self.order)?;
        match cursor.peek() {
            Some((found, value)) if self.order.compare(found, key) == Ordering::Equal => {
                Ok(Some(value.to_vec()))
            }
            _ => Ok(None),
        }
    }

    pub fn contains(&self, key: &[u8]) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Lazy iterator over all entries
    pub fn iter(&self) -> Result<RangeIter<'_>> {
        Ok(RangeIter {
            cursor: Cursor::at_start(self.store.as_ref(), self.root)?,
            end: None,
            order: self.order.clone(),
        })
    }

    /// Lazy iterator over `[start, end)`; either bound may be open
    pub fn range(&self, start: Option<&[u8]>, end: Option<&[u8]>) -> Result<RangeIter<'_>> {
        let cursor = match start {
            Some(key) => Cursor::seek(self.store.as_ref(), self.root, key, &self.order)?,
            None => Cursor::at_start(self.store.as_ref(), self.root)?,
        };
        Ok(RangeIter {
            cursor,
            end: end.map(|k| k.to_vec()),
            order: self.order.clone(),
        })
    }

    /// Start a batch of edits against this map
    pub fn edit(&self) -> MapEditor {
        MapEditor {
            base: self.clone(),
            edits: Vec::new(),
        }
    }
}

/// A lazy range scan; a fresh call to `range` re-opens
pub struct RangeIter<'a> {
    cursor: Cursor<'a>,
    end: Option<Vec<u8>>,
    order: KeyOrder,
}

impl Iterator for RangeIter<'_> {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.cursor.next_entry() {
            Err(e) => Some(Err(e)),
            Ok(None) => None,
            Ok(Some((key, value))) => {
                if let Some(end) = &self.end {
                    if self.order.compare(&key, end) != Ordering::Less {
                        return None;
                    }
                }
                Some(Ok((key, value)))
            }
        }
    }
}

/// Accumulated edits over a base map
pub struct MapEditor {
    base: ProllyMap,
    /// Insertion order; the last edit to a key wins
    edits: Vec<(Vec<u8>, Option<Vec<u8>>)>,
}

impl MapEditor {
    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.edits.push((key, Some(value)));
    }

    pub fn delete(&mut self, key: Vec<u8>) {
        self.edits.push((key, None));
    }

    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    /// Stream the base entries merged with the edits through the
    /// chunker, producing the successor map.
    pub fn flush(self) -> Result<ProllyMap> {
        let MapEditor { base, mut edits } = self;
        if edits.is_empty() {
            return Ok(base);
        }
        let order = base.order.clone();

        // Sort stably, then keep the last edit per key
        edits.sort_by(|a, b| order.compare(&a.0, &b.0));
        let mut deduped: Vec<(Vec<u8>, Option<Vec<u8>>)> = Vec::with_capacity(edits.len());
        for edit in edits {
            match deduped.last_mut() {
                Some(last) if order.compare(&last.0, &edit.0) == Ordering::Equal => *last = edit,
                _ => deduped.push(edit),
            }
        }

        let mut builder = TreeBuilder::new(base.store.as_ref());
        let mut tree = Cursor::at_start(base.store.as_ref(), base.root)?;
        let mut edits_iter = deduped.into_iter().peekable();

        loop {
            let next_tree = tree.peek().map(|(k, _)| k.to_vec());
            match (next_tree, edits_iter.peek()) {
                (None, None) => break,
                (Some(_), None) => {
                    let (k, v) = tree.next_entry()?.unwrap_or_default();
                    builder.push(k, v)?;
                }
                (None, Some(_)) => {
                    let (k, v) = edits_iter.next().unwrap_or_default();
                    if let Some(v) = v {
                        builder.push(k, v)?;
                    }
                }
                (Some(tree_key), Some((edit_key, _))) => {
                    match order.compare(&tree_key, edit_key) {
                        Ordering::Less => {
                            let (k, v) = tree.next_entry()?.unwrap_or_default();
                            builder.push(k, v)?;
                        }
                        Ordering::Equal => {
                            tree.next_entry()?;
                            let (k, v) = edits_iter.next().unwrap_or_default();
                            if let Some(v) = v {
                                builder.push(k, v)?;
                            }
                        }
                        Ordering::Greater => {
                            let (k, v) = edits_iter.next().unwrap_or_default();
                            if let Some(v) = v {
                                builder.push(k, v)?;
                            }
                        }
                    }
                }
            }
        }

        let root = builder.finish()?;
        Ok(ProllyMap {
            store: base.store,
            root: root.map(|(a, _)| a),
            count: root.map(|(_, c)| c).unwrap_or(0),
            order,
        })
    }
}
