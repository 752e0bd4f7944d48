//! API error types and transport-failure classification.

use thiserror::Error;

/// Error type for backend API operations.
#[derive(Error, Debug)]
pub enum ApiError {
    /// Request exceeded the client timeout ceiling
    #[error("Request timed out")]
    Timeout,

    /// Transport failure (connection refused, DNS, TLS, ...)
    #[error("Network error: {0}")]
    Network(#[source] reqwest::Error),

    /// Server-side failure (5xx)
    #[error("Server error: HTTP {status}")]
    Server { status: u16 },

    /// Credentials or token rejected (401/403)
    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    /// Backend rejected the payload (400/422)
    #[error("Validation failed: {message}")]
    Validation { message: String },

    /// Backend declared failure inside a 2xx envelope (`success: false`)
    #[error("Request rejected: {message}")]
    Rejected { message: String },

    /// Any other non-success status
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// Response body did not match the expected shape
    #[error("Invalid response payload: {0}")]
    Decode(String),

    /// URL construction error
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Session storage error
    #[error("Storage error: {0}")]
    Storage(#[from] session_store::StorageError),
}

impl ApiError {
    /// Returns true if this error is transient and the operation can be
    /// retried without changing anything (timeouts, transport failures,
    /// 5xx responses).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ApiError::Timeout | ApiError::Network(_) | ApiError::Server { .. }
        )
    }

    /// Returns true if the server explicitly rejected the request
    /// (as opposed to the request not getting through).
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            ApiError::Unauthorized { .. }
                | ApiError::Validation { .. }
                | ApiError::Rejected { .. }
                | ApiError::Http { .. }
        )
    }

    /// Classify a reqwest transport error.
    pub(crate) fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ApiError::Timeout
        } else {
            ApiError::Network(e)
        }
    }
}

/// Result type alias using ApiError.
pub type ApiResult<T> = Result<T, ApiError>;
