// src/prolly/node.rs

//! Tree node format
//!
//! A node is a flat list of (key, value) entries plus a level byte.
//! Leaf values are caller payloads; internal values are a child address
//! and the entry count of that subtree. Internal keys are the *last*
//! key of the child they reference, so search descends into the first
//! child whose key is >= the target.

use crate::codec::{Reader, Writer};
use crate::hash::{Addr, ADDR_LEN};
use crate::store::ChunkStore;
use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct Node {
    pub level: u8,
    pub keys: Vec<Vec<u8>>,
    pub values: Vec<Vec<u8>>,
}

impl Node {
    pub fn is_leaf(&self) -> bool {
        self.level == 0
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Child address and subtree count of an internal entry
    pub fn child_ref(&self, idx: usize) -> Result<(Addr, u64)> {
        debug_assert!(!self.is_leaf());
        let bytes = &self.values[idx];
        if bytes.len() != ADDR_LEN + 8 {
            return Err(Error::Decode(format!(
                "bad child ref length: {}",
                bytes.len()
            )));
        }
        let addr = Addr::from_slice(&bytes[..ADDR_LEN]).map_err(|e| Error::Decode(e.to_string()))?;
        let count = u64::from_le_bytes(bytes[ADDR_LEN..].try_into().unwrap_or_default());
        Ok((addr, count))
    }

    /// Encode a child reference for storage in an internal entry
    pub fn encode_child_ref(addr: Addr, count: u64) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(ADDR_LEN + 8);
        bytes.extend_from_slice(addr.as_bytes());
        bytes.extend_from_slice(&count.to_le_bytes());
        bytes
    }

    /// Entries reachable through this node
    pub fn subtree_count(&self) -> Result<u64> {
        if self.is_leaf() {
            return Ok(self.len() as u64);
        }
        let mut total = 0u64;
        for idx in 0..self.len() {
            total += self.child_ref(idx)?.1;
        }
        Ok(total)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.put_u8(self.level);
        w.put_u16(self.keys.len() as u16);
        for (key, value) in self.keys.iter().zip(&self.values) {
            w.put_bytes(key);
            w.put_bytes(value);
        }
        w.into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Node> {
        let mut r = Reader::new(bytes);
        let level = r.get_u8()?;
        let count = r.get_u16()? as usize;
        let mut keys = Vec::with_capacity(count);
        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            keys.push(r.get_bytes()?.to_vec());
            values.push(r.get_bytes()?.to_vec());
        }
        r.finish()?;
        Ok(Node {
            level,
            keys,
            values,
        })
    }

    /// Load and decode a node chunk
    pub fn load(store: &dyn ChunkStore, addr: &Addr) -> Result<Node> {
        Node::decode(&store.get_required(addr)?)
    }

    /// Encode and store, returning the node address
    pub fn save(&self, store: &dyn ChunkStore) -> Result<Addr> {
        store.put(&self.encode())
    }
}
