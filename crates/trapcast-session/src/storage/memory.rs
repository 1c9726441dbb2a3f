//! In-memory session storage.

use std::{
    collections::HashMap,
    sync::RwLock,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use trapcast_core::{SessionIdentity, SessionValidator, ValidationError};
use uuid::Uuid;

use super::StoreError;

struct SessionEntry {
    username: String,
    issued_at: Instant,
}

/// In-memory session store.
///
/// Tokens are lost on restart, which forces clients to log in again.
/// With a TTL configured, sessions older than the TTL stop validating
/// and are dropped on the next lookup.
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, SessionEntry>>,
    ttl: Option<Duration>,
}

impl MemorySessionStore {
    /// Create a store whose sessions never expire.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl: None,
        }
    }

    /// Create a store whose sessions expire `ttl` after issue.
    #[must_use]
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl: Some(ttl),
        }
    }

    /// Issue a fresh token for `username`.
    ///
    /// # Errors
    /// Returns error if the store lock is poisoned.
    pub fn issue(&self, username: impl Into<String>) -> Result<String, StoreError> {
        let token = Uuid::new_v4().to_string();
        self.insert(token.clone(), username)?;
        Ok(token)
    }

    /// Register a known token, e.g. one seeded from configuration.
    ///
    /// # Errors
    /// Returns error if the store lock is poisoned.
    pub fn insert(
        &self,
        token: impl Into<String>,
        username: impl Into<String>,
    ) -> Result<(), StoreError> {
        let entry = SessionEntry {
            username: username.into(),
            issued_at: Instant::now(),
        };
        self.sessions
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?
            .insert(token.into(), entry);
        Ok(())
    }

    /// Revoke a token (logout). Returns whether it existed.
    ///
    /// # Errors
    /// Returns error if the store lock is poisoned.
    pub fn revoke(&self, token: &str) -> Result<bool, StoreError> {
        Ok(self
            .sessions
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?
            .remove(token)
            .is_some())
    }

    /// Drop every expired session. Returns how many were removed.
    ///
    /// # Errors
    /// Returns error if the store lock is poisoned.
    pub fn purge_expired(&self) -> Result<usize, StoreError> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        let before = sessions.len();
        sessions.retain(|_, entry| !self.is_expired(entry));
        Ok(before - sessions.len())
    }

    /// Number of stored sessions, expired ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.read().map_or(0, |s| s.len())
    }

    /// Whether the store holds no sessions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_expired(&self, entry: &SessionEntry) -> bool {
        self.ttl
            .is_some_and(|ttl| entry.issued_at.elapsed() >= ttl)
    }

    fn lookup(&self, token: &str) -> Result<Option<SessionIdentity>, StoreError> {
        let expired = {
            let sessions = self
                .sessions
                .read()
                .map_err(|e| StoreError::Internal(e.to_string()))?;
            match sessions.get(token) {
                None => return Ok(None),
                Some(entry) if !self.is_expired(entry) => {
                    return Ok(Some(entry.username.clone()));
                }
                Some(_) => true,
            }
        };

        if expired {
            tracing::debug!("Dropping expired session");
            self.revoke(token)?;
        }
        Ok(None)
    }
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionValidator for MemorySessionStore {
    async fn validate(&self, token: &str) -> Result<Option<SessionIdentity>, ValidationError> {
        if token.is_empty() {
            return Ok(None);
        }
        self.lookup(token)
            .map_err(|e| ValidationError::Unavailable(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_then_validate() {
        let store = MemorySessionStore::new();
        let token = store.issue("admin").unwrap();

        let identity = tokio_test::block_on(store.validate(&token)).unwrap();
        assert_eq!(identity.as_deref(), Some("admin"));
    }

    #[test]
    fn test_unknown_and_empty_tokens_are_invalid() {
        let store = MemorySessionStore::new();
        store.insert("abc123", "admin").unwrap();

        assert!(tokio_test::block_on(store.validate("abc124")).unwrap().is_none());
        assert!(tokio_test::block_on(store.validate("")).unwrap().is_none());
    }

    #[test]
    fn test_revoke() {
        let store = MemorySessionStore::new();
        store.insert("abc123", "admin").unwrap();

        assert!(store.revoke("abc123").unwrap());
        assert!(!store.revoke("abc123").unwrap());
        assert!(tokio_test::block_on(store.validate("abc123")).unwrap().is_none());
    }

    #[test]
    fn test_expired_session_is_dropped_on_lookup() {
        let store = MemorySessionStore::with_ttl(Duration::ZERO);
        store.insert("abc123", "admin").unwrap();

        assert!(tokio_test::block_on(store.validate("abc123")).unwrap().is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_purge_expired_keeps_live_sessions() {
        let store = MemorySessionStore::with_ttl(Duration::from_secs(3600));
        store.insert("abc123", "admin").unwrap();
        assert_eq!(store.purge_expired().unwrap(), 0);
        assert_eq!(store.len(), 1);

        let expiring = MemorySessionStore::with_ttl(Duration::ZERO);
        expiring.insert("a", "x").unwrap();
        expiring.insert("b", "y").unwrap();
        assert_eq!(expiring.purge_expired().unwrap(), 2);
    }
}
