//! Error types for the document store.

use thiserror::Error;

/// Errors that can occur when talking to the document store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Not authorized to access the store.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Snapshot file could not be read or written.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Document not found.
    #[error("document not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    /// A write precondition (existence or version) did not hold.
    #[error("precondition failed for {path}: {message}")]
    PreconditionFailed { path: String, message: String },

    /// The batch holds more operations than one transaction accepts.
    #[error("batch of {size} operations exceeds the limit of {limit}")]
    BatchTooLarge { size: usize, limit: usize },

    /// Invalid response from server.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Rate limited.
    #[error("rate limited{}", match retry_after_secs {
        Some(secs) => format!(" (retry after {}s)", secs),
        None => String::new(),
    })]
    RateLimited {
        /// Seconds to wait before retrying (from Retry-After header, optional).
        retry_after_secs: Option<u64>,
    },

    /// Error status returned by the backend.
    #[error("backend error: {status} - {message}")]
    Backend { status: String, message: String },

    /// Failure injected by the memory store.
    #[error("injected failure: {0}")]
    Injected(String),
}

impl StoreError {
    /// Whether the error is transient and worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Backend { status, .. } => {
                status == "UNAVAILABLE" || status == "INTERNAL" || status == "DEADLINE_EXCEEDED"
            }
            StoreError::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    /// Whether the backend certainly did not apply the request.
    ///
    /// A timeout does not qualify: the request may have been applied after
    /// the client gave up waiting.
    pub fn is_unapplied(&self) -> bool {
        match self {
            StoreError::Backend { status, .. } => status == "UNAVAILABLE",
            StoreError::Http(e) => e.is_connect(),
            _ => false,
        }
    }

    /// Whether the error reports a lost conditional write.
    pub fn is_precondition_failure(&self) -> bool {
        matches!(self, StoreError::PreconditionFailed { .. })
    }
}
