//! Per-session credential storage.
//!
//! Callers may attach an upstream credential to a session id so repeated
//! downloads reuse it without resending cookies. The store is a seam; the
//! bundled implementation is in-memory with TTL entries swept lazily on
//! access.

use dashmap::DashMap;
use std::time::{Duration, Instant};
use uuid::Uuid;

use bget_extractor::Credential;

/// Default session lifetime.
const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Credential storage keyed by opaque session id.
pub trait SessionStore: Send + Sync {
    /// Store a credential and return the new session id.
    fn create(&self, credential: Credential) -> String;

    /// Fetch the credential for a session, refreshing its lifetime.
    fn get(&self, session_id: &str) -> Option<Credential>;

    fn remove(&self, session_id: &str) -> bool;
}

struct SessionEntry {
    credential: Credential,
    expires_at: Instant,
}

/// In-memory TTL-bearing store.
pub struct MemorySessionStore {
    entries: DashMap<String, SessionEntry>,
    ttl: Duration,
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_TTL)
    }
}

impl MemorySessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Drop every expired entry.
    pub fn sweep(&self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| entry.expires_at > now);
    }
}

impl SessionStore for MemorySessionStore {
    fn create(&self, credential: Credential) -> String {
        let id = Uuid::new_v4().to_string();
        self.entries.insert(
            id.clone(),
            SessionEntry {
                credential,
                expires_at: Instant::now() + self.ttl,
            },
        );
        id
    }

    fn get(&self, session_id: &str) -> Option<Credential> {
        let mut entry = self.entries.get_mut(session_id)?;
        if entry.expires_at <= Instant::now() {
            drop(entry);
            self.entries.remove(session_id);
            return None;
        }
        entry.expires_at = Instant::now() + self.ttl;
        Some(entry.credential.clone())
    }

    fn remove(&self, session_id: &str) -> bool {
        self.entries.remove(session_id).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credential() -> Credential {
        Credential {
            sessdata: "s".to_string(),
            bili_jct: "j".to_string(),
            dede_user_id: "1".to_string(),
        }
    }

    #[test]
    fn roundtrip_and_remove() {
        let store = MemorySessionStore::default();
        let id = store.create(credential());
        assert!(store.get(&id).is_some());
        assert!(store.remove(&id));
        assert!(store.get(&id).is_none());
    }

    #[test]
    fn expired_entries_are_gone() {
        let store = MemorySessionStore::new(Duration::ZERO);
        let id = store.create(credential());
        assert!(store.get(&id).is_none());
    }

    #[test]
    fn sweep_clears_expired() {
        let store = MemorySessionStore::new(Duration::ZERO);
        store.create(credential());
        store.create(credential());
        store.sweep();
        assert!(store.entries.is_empty());
    }
}
