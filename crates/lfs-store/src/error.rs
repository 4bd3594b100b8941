use std::io;
use std::path::PathBuf;

use lfs_types::Oid;

/// Errors from object store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested object is not in the store.
    #[error("object not found: {0}")]
    NotFound(Oid),

    /// The number of bytes written differs from the declared size.
    #[error("size mismatch for {oid}: expected {expected} bytes, wrote {actual}")]
    SizeMismatch { oid: Oid, expected: u64, actual: u64 },

    /// The content digest differs from the object's id.
    #[error("hash mismatch: expected {oid}, computed {computed}")]
    HashMismatch { oid: Oid, computed: Oid },

    /// A shard or scratch directory could not be created.
    #[error("cannot create directory {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// I/O error from the underlying filesystem.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl StoreError {
    /// `true` for content integrity failures, which a fresh copy of the
    /// object can fix. Everything else is a property of the local
    /// filesystem.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(self, Self::SizeMismatch { .. } | Self::HashMismatch { .. })
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
