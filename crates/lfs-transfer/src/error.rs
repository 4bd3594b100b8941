use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use lfs_api::ApiError;
use lfs_store::StoreError;
use lfs_types::Oid;
use thiserror::Error;

/// Errors from the transfer engine.
///
/// Every per-object variant carries the affected [`Oid`]. Whether the queue
/// tries an object again is decided by [`TransferError::is_retriable`], so
/// all adapters share one retry policy.
#[derive(Debug, Error)]
pub enum TransferError {
    /// The batch call covering this object failed as a whole.
    #[error("batch negotiation failed for {oid}: {source}")]
    Negotiation {
        oid: Oid,
        retriable: bool,
        #[source]
        source: Arc<ApiError>,
    },

    /// The server rejected this object.
    #[error("server rejected {oid}: [{code}] {message}")]
    Object { oid: Oid, code: i32, message: String },

    #[error("HTTP {status} from {url} for {oid}")]
    Status { oid: Oid, status: u16, url: String },

    #[error("request for {oid} failed: {source}")]
    Request {
        oid: Oid,
        retriable: bool,
        #[source]
        source: reqwest::Error,
    },

    #[error("{kind} action for {oid} has expired")]
    ActionExpired { oid: Oid, kind: String },

    #[error("no {kind} action for {oid}")]
    MissingAction { oid: Oid, kind: String },

    #[error("{oid} is missing from the batch response")]
    MissingFromResponse { oid: Oid },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("cannot read {} for {oid}: {source}", path.display())]
    Read {
        oid: Oid,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Failure reported by a transfer adapter in its own terms.
    #[error("{oid}: {message}")]
    Adapter {
        oid: Oid,
        message: String,
        retriable: bool,
    },

    #[error("transfer of {oid} was cancelled")]
    Cancelled { oid: Oid },

    /// The batching loop stopped before this object finished.
    #[error("transfer of {oid} was abandoned")]
    Abandoned { oid: Oid },

    #[error("adapter {0} has not been started")]
    NotStarted(String),

    #[error("no transfer adapter named {0}")]
    UnknownAdapter(String),

    #[error("transfer queue is closed")]
    QueueClosed,

    #[error("cannot read configuration {}: {source}", path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(#[from] toml::de::Error),

    #[error("cannot build HTTP client: {0}")]
    Client(#[from] ApiError),
}

impl TransferError {
    /// Wrap a `reqwest` failure. Everything except a malformed request is
    /// treated as transient.
    pub fn request(oid: Oid, source: reqwest::Error) -> Self {
        let retriable = !source.is_builder();
        Self::Request {
            oid,
            retriable,
            source,
        }
    }

    /// `true` if a fresh attempt may succeed.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Negotiation { retriable, .. }
            | Self::Request { retriable, .. }
            | Self::Adapter { retriable, .. } => *retriable,
            Self::Status { status, .. } => is_retriable_status(*status),
            Self::ActionExpired { .. } => true,
            Self::Store(e) => e.is_integrity_failure(),
            _ => false,
        }
    }

    /// The object this error is about, if any.
    pub fn oid(&self) -> Option<Oid> {
        match self {
            Self::Negotiation { oid, .. }
            | Self::Object { oid, .. }
            | Self::Status { oid, .. }
            | Self::Request { oid, .. }
            | Self::ActionExpired { oid, .. }
            | Self::MissingAction { oid, .. }
            | Self::MissingFromResponse { oid }
            | Self::Read { oid, .. }
            | Self::Adapter { oid, .. }
            | Self::Cancelled { oid }
            | Self::Abandoned { oid } => Some(*oid),
            Self::Store(StoreError::NotFound(oid))
            | Self::Store(StoreError::SizeMismatch { oid, .. })
            | Self::Store(StoreError::HashMismatch { oid, .. }) => Some(*oid),
            _ => None,
        }
    }
}

/// Server errors, request timeouts and throttling are worth another try.
pub fn is_retriable_status(status: u16) -> bool {
    status >= 500 || status == 408 || status == 429
}

pub type Result<T> = std::result::Result<T, TransferError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn oid() -> Oid {
        Oid::digest(b"x")
    }

    #[test]
    fn status_classification() {
        for status in [500, 502, 503, 504, 408, 429] {
            let e = TransferError::Status { oid: oid(), status, url: "u".into() };
            assert!(e.is_retriable(), "{status}");
        }
        for status in [400, 401, 403, 404, 410, 422] {
            let e = TransferError::Status { oid: oid(), status, url: "u".into() };
            assert!(!e.is_retriable(), "{status}");
        }
    }

    #[test]
    fn integrity_failures_are_retriable_other_store_errors_are_not() {
        let mismatch = TransferError::Store(StoreError::SizeMismatch {
            oid: oid(),
            expected: 2,
            actual: 1,
        });
        assert!(mismatch.is_retriable());
        assert_eq!(mismatch.oid(), Some(oid()));

        let disk = TransferError::Store(StoreError::Io(io::Error::other("disk full")));
        assert!(!disk.is_retriable());
        assert_eq!(disk.oid(), None);
    }

    #[test]
    fn server_rejection_is_terminal() {
        let e = TransferError::Object { oid: oid(), code: 404, message: "gone".into() };
        assert!(!e.is_retriable());
        assert_eq!(e.to_string(), format!("server rejected {}: [404] gone", oid()));
    }

    #[test]
    fn expired_action_is_retriable() {
        let e = TransferError::ActionExpired { oid: oid(), kind: "download".into() };
        assert!(e.is_retriable());
    }

    #[test]
    fn cancellation_is_terminal() {
        assert!(!TransferError::Cancelled { oid: oid() }.is_retriable());
        assert!(!TransferError::QueueClosed.is_retriable());
        let abandoned = TransferError::Abandoned { oid: oid() };
        assert!(!abandoned.is_retriable());
        assert_eq!(abandoned.oid(), Some(oid()));
    }
}
