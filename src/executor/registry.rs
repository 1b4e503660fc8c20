use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;

use super::context::CancelHandle;
use crate::core::{DatabaseError, SessionId};

/// What SHOW PROCESSLIST reports about one connection
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub id: SessionId,
    pub user: String,
    pub database: String,
    pub connected_at: Instant,
    /// SQL of the running statement, empty while idle
    pub command: String,
    pub cancel: CancelHandle,
}

/// Registry of live sessions shared by all connections
///
/// Provides:
/// - Unique session id allocation
/// - Process list snapshots
/// - Cancellation of another session's statement (KILL)
#[derive(Debug, Clone)]
pub struct SessionRegistry {
    next_id: Arc<AtomicU64>,
    sessions: Arc<RwLock<HashMap<SessionId, SessionInfo>>>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: Arc::new(AtomicU64::new(1)),
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn allocate_id(&self) -> SessionId {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn register(&self, id: SessionId, user: &str, database: &str, cancel: CancelHandle) {
        self.sessions.write().insert(
            id,
            SessionInfo {
                id,
                user: user.to_string(),
                database: database.to_string(),
                connected_at: Instant::now(),
                command: String::new(),
                cancel,
            },
        );
    }

    pub fn unregister(&self, id: SessionId) {
        self.sessions.write().remove(&id);
    }

    pub fn set_command(&self, id: SessionId, sql: &str) {
        if let Some(info) = self.sessions.write().get_mut(&id) {
            info.command.clear();
            info.command.push_str(sql);
        }
    }

    #[must_use]
    pub fn get(&self, id: SessionId) -> Option<SessionInfo> {
        self.sessions.read().get(&id).cloned()
    }

    /// Sessions ordered by id
    #[must_use]
    pub fn snapshot(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<_> = self.sessions.read().values().cloned().collect();
        sessions.sort_by_key(|s| s.id);
        sessions
    }

    /// KILL QUERY interrupts the running statement; KILL CONNECTION also closes the session
    pub fn cancel(&self, id: SessionId, query_only: bool) -> Result<(), DatabaseError> {
        let sessions = self.sessions.read();
        let info = sessions.get(&id).ok_or(DatabaseError::SessionNotFound(id))?;
        if query_only {
            info.cancel.cancel_query();
        } else {
            info.cancel.terminate();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_unique_ids() {
        let registry = SessionRegistry::new();
        let a = registry.allocate_id();
        let b = registry.clone().allocate_id();
        assert_ne!(a, b);
    }

    #[test]
    fn test_register_and_snapshot() {
        let registry = SessionRegistry::new();
        registry.register(2, "bob", "main", CancelHandle::default());
        registry.register(1, "root", "main", CancelHandle::default());
        registry.set_command(2, "SELECT 1");
        let list = registry.snapshot();
        assert_eq!(list.iter().map(|s| s.id).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(list[1].command, "SELECT 1");
        registry.unregister(1);
        assert!(registry.get(1).is_none());
    }

    #[test]
    fn test_cancel() {
        let registry = SessionRegistry::new();
        let handle = CancelHandle::default();
        registry.register(5, "bob", "main", handle.clone());
        registry.cancel(5, true).unwrap();
        assert!(handle.take_query_cancel());
        assert!(!handle.is_terminated());
        registry.cancel(5, false).unwrap();
        assert!(handle.is_terminated());
        assert!(matches!(registry.cancel(6, true), Err(DatabaseError::SessionNotFound(6))));
    }
}
