//! Live call registry
//!
//! Tracks the media streams currently being served and enforces the
//! concurrent call limit. A call stays registered for as long as its
//! [`CallGuard`] is alive.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use crate::ServerError;

/// A registered media stream
#[derive(Debug, Clone)]
pub struct CallInfo {
    pub id: String,
    pub remote: Option<String>,
    pub started_at: Instant,
}

/// Registry of live calls
pub struct SessionManager {
    calls: RwLock<HashMap<String, CallInfo>>,
    max_sessions: usize,
}

impl SessionManager {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            calls: RwLock::new(HashMap::new()),
            max_sessions,
        }
    }

    /// Register a new stream, refusing it when the server is full
    pub fn register(self: &Arc<Self>, remote: Option<String>) -> Result<CallGuard, ServerError> {
        let mut calls = self.calls.write();
        if calls.len() >= self.max_sessions {
            tracing::warn!(active = calls.len(), max = self.max_sessions, "Refusing call, at capacity");
            return Err(ServerError::Session("Max sessions reached".to_string()));
        }

        let id = uuid::Uuid::new_v4().to_string();
        calls.insert(
            id.clone(),
            CallInfo {
                id: id.clone(),
                remote,
                started_at: Instant::now(),
            },
        );
        tracing::debug!(connection_id = %id, active = calls.len(), "Registered stream");

        Ok(CallGuard {
            id,
            manager: Arc::clone(self),
        })
    }

    pub fn get(&self, id: &str) -> Option<CallInfo> {
        self.calls.read().get(id).cloned()
    }

    fn remove(&self, id: &str) {
        if self.calls.write().remove(id).is_some() {
            tracing::debug!(connection_id = %id, "Released stream");
        }
    }

    pub fn count(&self) -> usize {
        self.calls.read().len()
    }

    pub fn capacity(&self) -> usize {
        self.max_sessions
    }
}

/// Keeps a call registered; dropping it frees the slot
pub struct CallGuard {
    id: String,
    manager: Arc<SessionManager>,
}

impl CallGuard {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        self.manager.remove(&self.id);
    }
}
