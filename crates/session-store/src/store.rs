//! The persisted session store: token custody, identity, and change notification.

use crate::{SessionStorage, StorageError, StorageKeys, StorageResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::debug;

/// The authenticated principal, as issued by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    /// Numeric user id
    pub id: u64,
    /// Display name
    pub name: String,
    /// Email address
    pub email: String,
    /// Role name (e.g. "customer", "admin")
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Durable record stored alongside the bearer token.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SessionRecord {
    identity: Identity,
    is_authenticated: bool,
}

/// Point-in-time view of the persisted session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub identity: Option<Identity>,
    pub token: Option<String>,
    pub is_authenticated: bool,
}

impl SessionSnapshot {
    fn signed_out() -> Self {
        Self {
            identity: None,
            token: None,
            is_authenticated: false,
        }
    }
}

/// Callback type for session change notifications.
pub type SessionListener = Box<dyn Fn(SessionSnapshot) + Send + Sync>;

/// Handle for removing a previously registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(u64);

/// Single source of truth for "is the user logged in".
///
/// Holds the bearer token and identity in durable storage and pushes a
/// fresh [`SessionSnapshot`] to every subscribed listener on each
/// commit/clear/update, so UI surfaces stay in sync without polling.
pub struct SessionStore {
    storage: Box<dyn SessionStorage>,
    listeners: Mutex<Vec<(ListenerId, SessionListener)>>,
    next_listener_id: AtomicU64,
}

impl SessionStore {
    /// Create a new session store over the given storage backend.
    pub fn new(storage: Box<dyn SessionStorage>) -> Self {
        Self {
            storage,
            listeners: Mutex::new(Vec::new()),
            next_listener_id: AtomicU64::new(1),
        }
    }

    /// Atomically establish a session: identity + bearer token + authenticated flag.
    ///
    /// Token is written before the record so an interrupted commit can never
    /// leave an authenticated-looking record without a token.
    pub fn commit(&self, identity: Identity, token: &str) -> StorageResult<()> {
        self.storage.set(StorageKeys::BEARER_TOKEN, token)?;
        self.write_record(&SessionRecord {
            identity,
            is_authenticated: true,
        })?;

        debug!("Session committed");
        self.notify();
        Ok(())
    }

    /// Erase the session: identity, token, and authenticated flag.
    ///
    /// Record is deleted before the token (mirror of the commit ordering).
    /// Deletes are best-effort so a half-cleared session still ends up
    /// signed out.
    pub fn clear(&self) -> StorageResult<()> {
        let _ = self.storage.delete(StorageKeys::SESSION_RECORD);
        let _ = self.storage.delete(StorageKeys::BEARER_TOKEN);

        debug!("Session cleared");
        self.notify();
        Ok(())
    }

    /// Replace the identity without touching the token or the flag.
    ///
    /// Used after profile edits; never establishes a session. No-op when no
    /// session record exists.
    pub fn update_identity(&self, identity: Identity) -> StorageResult<()> {
        let Some(record) = self.read_record()? else {
            debug!("No session record, ignoring identity update");
            return Ok(());
        };

        self.write_record(&SessionRecord {
            identity,
            is_authenticated: record.is_authenticated,
        })?;
        self.notify();
        Ok(())
    }

    /// Replace the bearer token, keeping identity and flag (silent refresh path).
    pub fn replace_token(&self, token: &str) -> StorageResult<()> {
        self.storage.set(StorageKeys::BEARER_TOKEN, token)?;
        self.notify();
        Ok(())
    }

    /// Synchronous read of the current session state.
    ///
    /// A record claiming `is_authenticated` with no token present is reported
    /// as signed out.
    pub fn current(&self) -> StorageResult<SessionSnapshot> {
        let token = self.storage.get(StorageKeys::BEARER_TOKEN)?;
        let record = self.read_record()?;

        let (identity, flag) = match record {
            Some(r) => (Some(r.identity), r.is_authenticated),
            None => (None, false),
        };

        Ok(SessionSnapshot {
            is_authenticated: flag && token.is_some(),
            identity,
            token,
        })
    }

    /// Register a listener notified with a fresh snapshot after every change.
    pub fn subscribe(&self, listener: SessionListener) -> ListenerId {
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::SeqCst));
        self.listeners.lock().unwrap().push((id, listener));
        id
    }

    /// Remove a listener. Returns false if it was already gone.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock().unwrap();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    fn notify(&self) {
        let snapshot = self.current().unwrap_or_else(|_| SessionSnapshot::signed_out());
        let listeners = self.listeners.lock().unwrap();
        for (_, listener) in listeners.iter() {
            listener(snapshot.clone());
        }
    }

    fn read_record(&self) -> StorageResult<Option<SessionRecord>> {
        match self.storage.get(StorageKeys::SESSION_RECORD)? {
            Some(json) => {
                let record: SessionRecord = serde_json::from_str(&json)
                    .map_err(|e| StorageError::Encoding(e.to_string()))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    fn write_record(&self, record: &SessionRecord) -> StorageResult<()> {
        let json = serde_json::to_string(record)
            .map_err(|e| StorageError::Encoding(e.to_string()))?;
        self.storage.set(StorageKeys::SESSION_RECORD, &json)
    }
}
