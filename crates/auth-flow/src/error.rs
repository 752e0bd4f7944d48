//! Authentication error types.

use auth_api::ApiError;
use thiserror::Error;

/// Authentication error type surfaced to UI consumers.
#[derive(Error, Debug)]
pub enum AuthError {
    /// Operation called while the flow is not in the required state
    #[error("Invalid step: {0}")]
    InvalidStep(String),

    /// Payload rejected before or by the backend (malformed email, OTP
    /// format, password confirmation mismatch, ...)
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Credential or OTP wrong, or a step token expired
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    /// No session established
    #[error("Not logged in")]
    NotLoggedIn,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// API error (network, timeout, server failure, ...)
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] session_store::StorageError),
}

impl AuthError {
    /// Returns true if the failure is transient and the same call can be
    /// retried as-is.
    pub fn is_transient(&self) -> bool {
        matches!(self, AuthError::Api(e) if e.is_transient())
    }
}

/// Result type alias using AuthError.
pub type AuthResult<T> = Result<T, AuthError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_wraps_api_classification() {
        assert!(AuthError::Api(ApiError::Timeout).is_transient());
        assert!(AuthError::Api(ApiError::Server { status: 502 }).is_transient());
        assert!(!AuthError::Api(ApiError::Unauthorized {
            message: "no".to_string()
        })
        .is_transient());
    }

    #[test]
    fn test_local_errors_are_not_transient() {
        assert!(!AuthError::InvalidStep("wrong".to_string()).is_transient());
        assert!(!AuthError::Validation("bad".to_string()).is_transient());
        assert!(!AuthError::NotLoggedIn.is_transient());
    }
}
