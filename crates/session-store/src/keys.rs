//! Storage key constants.

/// Storage keys used by the session store
pub struct StorageKeys;

impl StorageKeys {
    /// Bearer token for the established session
    pub const BEARER_TOKEN: &'static str = "bearer_token";

    /// Session record (JSON: identity + authentication flag)
    pub const SESSION_RECORD: &'static str = "session_record";
}
