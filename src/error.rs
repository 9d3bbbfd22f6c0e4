//! Error kinds surfaced by the engine and the record-store boundary.
//!
//! Failed operations never leave partial state behind: an insert that
//! returns `Capacity` or `OutOfMemory` has not touched any bucket, and a
//! record insert that fails mid-way unindexes whatever it had already
//! placed in the table.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CacheError>;

#[derive(Debug, Error)]
pub enum CacheError {
    /// Unknown similarity mode name at table open.
    #[error("unknown similarity mode {0:?} (expected \"L2NORM\" or \"COSINE\")")]
    InvalidMode(String),

    /// A vector or query whose length does not match the table dimension.
    #[error("vector dimension mismatch: expected {expected}, got {got}")]
    InvalidDims { expected: usize, got: usize },

    /// All buckets are full; the table caps its storage rather than growing.
    #[error("table is at capacity ({max_buckets} buckets full)")]
    Capacity { max_buckets: usize },

    /// An allocation failed while opening a table, rolling over to a new
    /// bucket, or sizing a result buffer.
    #[error("allocation failed")]
    OutOfMemory,

    /// Record-store I/O failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A record file that does not parse as the expected JSON shape.
    #[error("malformed record: {0}")]
    Json(#[from] serde_json::Error),
}
