//! # Error Kinds
//!
//! goldb reports failures through `eyre::Result` so every error carries its
//! context chain (path, operation, page number). The typed enums in this
//! module are attached as the *root cause* of those reports, which lets
//! callers classify failures without string matching:
//!
//! ```ignore
//! match features.one() {
//!     Err(e) if e.downcast_ref::<QueryError>()
//!         .is_some_and(|q| matches!(q, QueryError::NotUnique { .. })) => { ... }
//!     other => { ... }
//! }
//! ```
//!
//! Store-level kinds cover the on-disk format; query-level kinds cover GOQL
//! compilation and materialization. I/O and format errors surface to the
//! caller immediately and are never retried inside the crate.

use std::path::PathBuf;

use thiserror::Error;

/// Failure kinds raised by the blob store and the file mapping layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store path does not exist.
    #[error("file not found: {path}")]
    FileNotFound { path: PathBuf },

    /// An underlying syscall failed (open, map, flush, extend).
    #[error("I/O error on {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Magic/version mismatch, truncated header, a failed header checksum
    /// with no journal to roll back from, or a blob whose size bounds are
    /// inconsistent with the store.
    #[error("invalid store format in {path}: {reason}")]
    InvalidFormat { path: PathBuf, reason: String },

    /// The store cannot be extended by the requested number of pages.
    #[error("store full: {reason}")]
    StoreFull { reason: String },
}

/// Failure kinds raised by GOQL compilation and query materialization.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueryError {
    /// GOQL parse failure. `column` is 1-based within the query text.
    #[error("GOQL syntax error at column {column}: {message}")]
    Syntax { column: usize, message: String },

    /// `one()` found no matching feature.
    #[error("query produced no features")]
    Empty,

    /// `one()` found more than one matching feature.
    #[error("query produced {count} features where exactly one was expected")]
    NotUnique { count: usize },

    /// A tile referenced by the index (or required to resolve a feature)
    /// is not present in the store.
    #[error("tile {tile} is not present in the store")]
    MissingTile { tile: String },
}
