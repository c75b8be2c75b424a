//! Session registry.
//!
//! [`SessionRegistry`] owns the set of live sessions. Everything else holds a
//! plain [`SessionId`] and asks the registry whether the session is alive.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;

use dashmap::DashMap;

use crate::id::SessionId;

/// Metadata for a live session.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub id: SessionId,
    /// Optional human-readable name (e.g. "builtin:" or a server URL).
    pub name: Option<String>,
    pub opened_at: Instant,
}

/// Registry of live sessions.
///
/// Backed by `DashMap` so it can be shared between a proxy manager and the
/// components that only need liveness checks.
pub struct SessionRegistry {
    sessions: DashMap<SessionId, SessionInfo>,
    next_id: AtomicU32,
}

impl SessionRegistry {
    /// Creates a new empty registry. Session ids start at 1.
    pub fn new() -> Self {
        SessionRegistry {
            sessions: DashMap::new(),
            next_id: AtomicU32::new(1),
        }
    }

    /// Opens a new session and returns its id.
    pub fn open(&self, name: Option<String>) -> SessionId {
        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.sessions.insert(
            id,
            SessionInfo {
                id,
                name,
                opened_at: Instant::now(),
            },
        );
        id
    }

    /// Closes a session. Returns `true` if it was open.
    pub fn close(&self, id: SessionId) -> bool {
        self.sessions.remove(&id).is_some()
    }

    pub fn is_alive(&self, id: SessionId) -> bool {
        self.sessions.contains_key(&id)
    }

    pub fn get(&self, id: SessionId) -> Option<SessionInfo> {
        self.sessions.get(&id).map(|entry| entry.clone())
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
