//! Durable session persistence for the Shopfront client.
//!
//! This crate provides:
//! - A [`SessionStorage`] trait over durable key-value backends
//! - A file-backed implementation used in production
//! - The [`SessionStore`]: commit/clear/read of the bearer token and
//!   identity, with change notification for UI consumers

mod file;
mod keys;
mod store;
mod traits;

pub use file::FileStorage;
pub use keys::StorageKeys;
pub use store::{Identity, ListenerId, SessionListener, SessionSnapshot, SessionStore};
pub use traits::SessionStorage;

use thiserror::Error;

/// Error type for storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Backend-specific storage error
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// Encoding/decoding error
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
