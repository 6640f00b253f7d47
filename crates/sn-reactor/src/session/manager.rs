//! Session manager implementation

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use sn_core::error::SessionError;
use sn_protocol::{AuthId, SessionId};

use super::reliable::Session;

/// Owns every live session, indexed by id
pub struct SessionManager {
    /// Sessions indexed by session ID
    sessions: DashMap<SessionId, Arc<Session>>,
    /// Last id handed out; ids start at 1
    last_id: AtomicU64,
}

impl SessionManager {
    /// Create a new session manager
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            last_id: AtomicU64::new(SessionId::UNASSIGNED.as_u64()),
        }
    }

    /// Allocate a session with the next id and a random auth id
    pub fn new_session(&self) -> Arc<Session> {
        let id = SessionId::new(self.last_id.fetch_add(1, Ordering::SeqCst) + 1);
        let auth_id = AuthId::new(rand::random());
        let session = Arc::new(Session::new(id, auth_id));
        self.sessions.insert(id, Arc::clone(&session));

        tracing::debug!(session = %id, auth = %auth_id, "Session created");
        session
    }

    /// Track a session whose id was assigned by the remote side
    ///
    /// Returns the existing session if one with `id` is already tracked.
    pub fn adopt(&self, id: SessionId, auth_id: AuthId) -> Arc<Session> {
        let session = self
            .sessions
            .entry(id)
            .or_insert_with(|| Arc::new(Session::new(id, auth_id)));
        Arc::clone(&session)
    }

    /// Get a session by ID
    pub fn find_session(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions.get(&id).map(|r| Arc::clone(&r))
    }

    /// Look up a session and check the presented auth id
    pub fn authenticate(&self, id: SessionId, auth_id: AuthId) -> Result<Arc<Session>, SessionError> {
        let session = self.find_session(id).ok_or(SessionError::NotFound(id))?;
        if session.auth_id() != auth_id {
            return Err(SessionError::AuthMismatch(id));
        }
        Ok(session)
    }

    /// Stop tracking `session`; unknown sessions are ignored
    pub fn delete_session(&self, session: &Session) -> Option<Arc<Session>> {
        let removed = self.sessions.remove(&session.id()).map(|(_, s)| s);
        if removed.is_some() {
            tracing::debug!(session = %session.id(), "Session removed");
        }
        removed
    }

    /// List all sessions
    pub fn list(&self) -> Vec<Arc<Session>> {
        self.sessions.iter().map(|r| Arc::clone(&r)).collect()
    }

    /// Number of tracked sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sn_core::SessionStatus;
    use std::thread;

    #[test]
    fn test_ids_are_sequential_from_one() {
        let manager = SessionManager::new();
        let first = manager.new_session();
        let second = manager.new_session();

        assert_eq!(first.id(), SessionId::new(1));
        assert_eq!(second.id(), SessionId::new(2));
        assert_eq!(first.status(), SessionStatus::NotConnected);
        assert!(first.packets().is_empty());
        assert_eq!(manager.len(), 2);
    }

    #[test]
    fn test_concurrent_allocation_is_unique() {
        let manager = Arc::new(SessionManager::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let manager = Arc::clone(&manager);
                thread::spawn(move || (0..50).map(|_| manager.new_session().id()).collect::<Vec<_>>())
            })
            .collect();

        let mut ids: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .map(|id| id.as_u64())
            .collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 200);
        assert_eq!(ids.first(), Some(&1));
        assert_eq!(ids.last(), Some(&200));
    }

    #[test]
    fn test_find_and_delete() {
        let manager = SessionManager::new();
        let session = manager.new_session();

        let found = manager.find_session(session.id()).unwrap();
        assert!(Arc::ptr_eq(&found, &session));

        assert!(manager.delete_session(&session).is_some());
        assert!(manager.find_session(session.id()).is_none());
        assert!(manager.delete_session(&session).is_none());
        assert!(manager.is_empty());
    }

    #[test]
    fn test_authenticate() {
        let manager = SessionManager::new();
        let session = manager.new_session();

        assert!(manager.authenticate(session.id(), session.auth_id()).is_ok());

        let wrong = AuthId::new(session.auth_id().as_u16().wrapping_add(1));
        assert!(matches!(
            manager.authenticate(session.id(), wrong),
            Err(SessionError::AuthMismatch(_))
        ));
        assert!(matches!(
            manager.authenticate(SessionId::new(99), wrong),
            Err(SessionError::NotFound(_))
        ));
    }

    #[test]
    fn test_adopt_is_idempotent() {
        let manager = SessionManager::new();
        let first = manager.adopt(SessionId::new(7), AuthId::new(1));
        let again = manager.adopt(SessionId::new(7), AuthId::new(2));
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(again.auth_id(), AuthId::new(1));
    }
}
