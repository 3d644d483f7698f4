// src/lib.rs

//! Dolt: a version-controlled SQL table store
//!
//! Persistent state is a content-addressed Merkle DAG: tables are
//! prolly trees, commits own root values mapping table names to table
//! hashes, and named refs resolve through a single CAS root pointer.
//! On top of that sit the working-set lifecycle (HEAD/STAGED/WORKING),
//! a three-way merge engine with conflict and constraint-violation
//! sidecars, and a remote protocol that ships only absent chunks.
//!
//! # Architecture
//!
//! - Content-addressed first: every structure is an immutable chunk;
//!   the store's root pointer is the only mutable cell
//! - Prolly trees: ordered maps whose hash depends only on contents,
//!   so diff and merge cost tracks the size of the change
//! - Columns matched by tag, not name, so renames and concurrent
//!   schema edits merge cleanly
//! - One operations layer: the CLI and the SQL procedures drive the
//!   same code paths

pub mod cli;
pub mod codec;
pub mod commands;
pub mod commit;
pub mod config;
mod error;
pub mod hash;
pub mod merge;
pub mod procedures;
pub mod prolly;
pub mod remote;
pub mod repo;
pub mod schema;
pub mod store;
pub mod sysdep;
pub mod table;
pub mod workingset;

pub use codec::{Collation, Value, ValueKind};
pub use commit::{Commit, CommitMeta, RefStore, RootValue, TagValue};
pub use config::Config;
pub use error::{Error, Result};
pub use hash::{Addr, ADDR_LEN};
pub use merge::{MergeOutcome, RowMergeStats};
pub use prolly::{KeyOrder, ProllyMap};
pub use repo::Repository;
pub use schema::{Column, Schema, SqlType};
pub use store::{ChunkStore, FsChunkStore, MemoryChunkStore};
pub use sysdep::Relation;
pub use table::Table;
pub use workingset::{BranchOps, StashStack, WorkingSet};
