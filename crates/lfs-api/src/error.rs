use thiserror::Error;

/// Errors from a batch negotiation call.
///
/// Every variant describes the call as a whole. Per-object rejections
/// arrive inside a successful response as
/// [`ObjectError`](crate::types::ObjectError).
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid status for POST {url}: {status}")]
    Status { status: u16, url: String, body: String },

    #[error("malformed batch response: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("invalid header: {0}")]
    InvalidHeader(String),
}

impl ApiError {
    /// HTTP status of a rejected call, if the server answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// `true` when the call never produced a response (connect failure,
    /// timeout, broken body).
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Http(e) if e.status().is_none())
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
