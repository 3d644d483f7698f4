// src/error.rs

//! Crate-wide error type
//!
//! One closed enum covers every failure class the store can surface:
//! argument problems, schema/constraint violations, merge conflicts,
//! ref contention, remote failures, and integrity errors. User-fixable
//! errors carry the message the caller should see; integrity errors
//! poison the store against further writes.

use crate::hash::Addr;
use thiserror::Error;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Malformed chunk or value bytes
    #[error("decode error: {0}")]
    Decode(String),

    /// Value cannot be canonically encoded (e.g. NaN)
    #[error("encode error: {0}")]
    Encode(String),

    /// A chunk the graph references is absent from the store
    #[error("chunk not found: {0}")]
    ChunkNotFound(Addr),

    /// Content did not hash to its address, or a table file is truncated.
    /// The store refuses further writes once this is observed.
    #[error("integrity failure: {0}")]
    Integrity(String),

    #[error("invalid argument: {0}")]
    Argument(String),

    #[error("config error: {0}")]
    Config(String),

    // Schema and constraint errors. No state change has occurred when
    // one of these is returned.
    #[error("duplicate primary key given: {0}")]
    DuplicateKey(String),

    #[error("column '{0}' cannot be NULL")]
    NotNull(String),

    #[error("value out of range for column '{column}': {detail}")]
    TypeDomain { column: String, detail: String },

    #[error("check constraint '{0}' violated")]
    CheckFailed(String),

    #[error("foreign key violation on table '{table}': {detail}")]
    ForeignKey { table: String, detail: String },

    #[error("duplicate unique key given: {0}")]
    UniqueKey(String),

    #[error("schema error: {0}")]
    Schema(String),

    #[error("can't drop index 'PRIMARY': needed in a foreign key constraint")]
    PrimaryKeyNeededByForeignKey,

    // Merge errors
    #[error("cannot merge two tables with different primary key sets")]
    DivergentPrimaryKeys,

    #[error("schema conflict on table '{table}': {detail}")]
    SchemaConflict { table: String, detail: String },

    /// Conflicts or constraint violations are present; commits are blocked
    /// until they are resolved.
    #[error("unresolved conflicts or violations; resolve them before committing")]
    Unmerged,

    // Ref and working-set errors
    #[error("ref not found: {0}")]
    RefNotFound(String),

    #[error("branch '{0}' already exists")]
    BranchExists(String),

    #[error("branch '{0}' is not fully merged")]
    BranchNotMerged(String),

    /// Root CAS lost too many rounds in a row; the caller may retry.
    #[error("transient contention on {0}; try again")]
    Contention(String),

    #[error("cannot commit changes on more than one branch / database")]
    MultiBranchCommit,

    /// Working changes would be clobbered by checkout
    #[error("checkout would overwrite working changes to: {0}")]
    CheckoutWouldClobber(String),

    #[error("cannot checkout commit '{0}'; create a branch first: dolt checkout -b <branch> {0}")]
    DetachedHead(String),

    // Remote errors
    #[error("remote '{0}' not found")]
    RemoteNotFound(String),

    #[error("Updates were rejected because the tip of your current branch is behind")]
    AncestryRequired,

    #[error("remote authentication failed: {0}")]
    RemoteAuth(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("operation cancelled: {0}")]
    Cancelled(String),

    #[error("unsupported operation: {0}")]
    Unsupported(String),
}

impl Error {
    /// True for errors the caller can fix and retry without operator help
    pub fn is_user_error(&self) -> bool {
        !matches!(self, Error::Io(_) | Error::Integrity(_) | Error::Decode(_))
    }
}
