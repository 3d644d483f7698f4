// src/table/sidecar.rs

//! Conflict and constraint-violation sidecars
//!
//! A merge that cannot reconcile a row records it here instead of
//! failing. Sidecars ride inside the table value, so an unmerged table
//! hashes differently from a clean one and a commit can refuse to
//! proceed while either sidecar is non-empty. Resolution rewrites the
//! table without the sidecar.

use crate::codec::{Reader, Writer};
use crate::prolly::{KeyOrder, ProllyMap};
use crate::schema::Schema;
use crate::store::ChunkStore;
use crate::{Error, Result};
use std::sync::Arc;

/// One conflicted row: how the merge base and both sides saw it.
/// `None` means the row was absent on that side.
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictRow {
    pub base: Option<Vec<u8>>,
    pub ours: Option<Vec<u8>>,
    pub theirs: Option<Vec<u8>>,
}

impl ConflictRow {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        super::row::encode_opt_tuple(&mut w, &self.base);
        super::row::encode_opt_tuple(&mut w, &self.ours);
        super::row::encode_opt_tuple(&mut w, &self.theirs);
        w.into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<ConflictRow> {
        let mut r = Reader::new(bytes);
        let mut get_opt = |r: &mut Reader| -> Result<Option<Vec<u8>>> {
            Ok(if r.get_bool()? {
                Some(r.get_bytes()?.to_vec())
            } else {
                None
            })
        };
        let base = get_opt(&mut r)?;
        let ours = get_opt(&mut r)?;
        let theirs = get_opt(&mut r)?;
        r.finish()?;
        Ok(ConflictRow { base, ours, theirs })
    }
}

/// The per-table conflicts sidecar: the three schemas the merge saw,
/// plus a map from row key to [`ConflictRow`].
#[derive(Clone, Debug)]
pub struct Conflicts {
    pub base_schema: Schema,
    pub our_schema: Schema,
    pub their_schema: Schema,
    pub rows: ProllyMap,
}

impl Conflicts {
    pub fn new(
        store: Arc<dyn ChunkStore>,
        order: KeyOrder,
        base_schema: Schema,
        our_schema: Schema,
        their_schema: Schema,
    ) -> Self {
        Self {
            base_schema,
            our_schema,
            their_schema,
            rows: ProllyMap::empty(store, order),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn count(&self) -> u64 {
        self.rows.count()
    }

    pub fn encode(&self, w: &mut Writer) {
        w.put_bytes(&self.base_schema.to_bytes());
        w.put_bytes(&self.our_schema.to_bytes());
        w.put_bytes(&self.their_schema.to_bytes());
        w.put_addr(&self.rows.root_addr());
    }

    pub fn decode(r: &mut Reader, store: Arc<dyn ChunkStore>, order: KeyOrder) -> Result<Conflicts> {
        let decode_schema = |bytes: &[u8]| -> Result<Schema> {
            let mut sr = Reader::new(bytes);
            let schema = Schema::decode(&mut sr)?;
            sr.finish()?;
            Ok(schema)
        };
        let base_schema = decode_schema(r.get_bytes()?)?;
        let our_schema = decode_schema(r.get_bytes()?)?;
        let their_schema = decode_schema(r.get_bytes()?)?;
        let root = r.get_addr()?;
        let rows = ProllyMap::load(store, root, order)?;
        Ok(Conflicts {
            base_schema,
            our_schema,
            their_schema,
            rows,
        })
    }
}

/// The kind of constraint a merged row broke
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ViolationType {
    ForeignKey = 0,
    Unique = 1,
    NotNull = 2,
    Check = 3,
}

impl ViolationType {
    pub fn name(&self) -> &'static str {
        match self {
            ViolationType::ForeignKey => "foreign key",
            ViolationType::Unique => "unique index",
            ViolationType::NotNull => "not null",
            ViolationType::Check => "check constraint",
        }
    }

    pub fn from_u8(v: u8) -> Result<Self> {
        Ok(match v {
            0 => Self::ForeignKey,
            1 => Self::Unique,
            2 => Self::NotNull,
            3 => Self::Check,
            _ => return Err(Error::Decode(format!("unknown violation type: {}", v))),
        })
    }
}

/// One constraint violation recorded after a merge
#[derive(Debug, Clone, PartialEq)]
pub struct Violation {
    pub vtype: ViolationType,
    /// Machine-readable detail (JSON), e.g. the constraint name
    pub info: String,
    /// The violating row's key tuple
    pub row_key: Vec<u8>,
    /// The violating row's value tuple
    pub row_value: Vec<u8>,
}

impl Violation {
    /// Sidecar map key: type byte then row key, so one row can carry
    /// one violation per constraint class.
    pub fn map_key(&self) -> Vec<u8> {
        let mut key = Vec::with_capacity(1 + self.row_key.len());
        key.push(self.vtype as u8);
        key.extend_from_slice(&self.row_key);
        key
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.put_str(&self.info);
        w.put_bytes(&self.row_value);
        w.into_bytes()
    }

    pub fn decode(map_key: &[u8], bytes: &[u8]) -> Result<Violation> {
        if map_key.is_empty() {
            return Err(Error::Decode("empty violation key".to_string()));
        }
        let vtype = ViolationType::from_u8(map_key[0])?;
        let row_key = map_key[1..].to_vec();
        let mut r = Reader::new(bytes);
        let info = r.get_str()?.to_string();
        let row_value = r.get_bytes()?.to_vec();
        r.finish()?;
        Ok(Violation {
            vtype,
            info,
            row_key,
            row_value,
        })
    }
}
