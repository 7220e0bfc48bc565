//! Per-connection session table.
//!
//! The table is the only state shared by concurrent `open_session` callers.
//! Entries live in a `DashMap` so listing and state updates never block each
//! other. Opening and closing are coordinated by a close gate:
//!
//! - `register` holds the gate shared, so concurrent opens proceed in parallel
//!   and the multiplexing limit is enforced by an atomic reservation.
//! - `close` holds the gate exclusively, flips the closed flag, cancels every
//!   session token and drains the map. Once `close` returns, no registration
//!   can succeed and every live session observes cancellation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use super::error::RemoteError;
use super::types::{SessionInfo, SessionMode, SessionState};

pub struct SessionTable {
    sessions: DashMap<String, SessionInfo>,
    closed: RwLock<bool>,
    active: AtomicUsize,
    max_sessions: usize,
    shutdown: CancellationToken,
}

impl SessionTable {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            closed: RwLock::new(false),
            active: AtomicUsize::new(0),
            max_sessions,
            shutdown: CancellationToken::new(),
        }
    }

    /// Add a session entry, returning a registration that removes it on drop.
    pub fn register(
        self: &Arc<Self>,
        mode: SessionMode,
    ) -> Result<SessionRegistration, RemoteError> {
        let closed = self.closed.read().unwrap_or_else(|e| e.into_inner());
        if *closed {
            return Err(RemoteError::Session("connection is closed".to_string()));
        }

        let previous = self.active.fetch_add(1, Ordering::SeqCst);
        if previous >= self.max_sessions {
            self.active.fetch_sub(1, Ordering::SeqCst);
            return Err(RemoteError::Session(format!(
                "session limit of {} reached",
                self.max_sessions
            )));
        }

        let session_id = Uuid::new_v4().to_string();
        self.sessions.insert(
            session_id.clone(),
            SessionInfo {
                session_id: session_id.clone(),
                mode,
                state: SessionState::Open,
                opened_at: chrono::Utc::now().to_rfc3339(),
            },
        );
        drop(closed);

        debug!("Registered {:?} session {}", mode, session_id);

        Ok(SessionRegistration {
            session_id,
            mode,
            cancel: self.shutdown.child_token(),
            table: Arc::clone(self),
        })
    }

    /// Close the table. Returns the number of sessions that were invalidated.
    pub fn close(&self) -> Result<usize, RemoteError> {
        let mut closed = self.closed.write().unwrap_or_else(|e| e.into_inner());
        if *closed {
            return Err(RemoteError::AlreadyClosed);
        }
        *closed = true;
        self.shutdown.cancel();

        let invalidated = self.sessions.len();
        self.sessions.clear();
        Ok(invalidated)
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn list(&self) -> Vec<SessionInfo> {
        self.sessions.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn get(&self, session_id: &str) -> Option<SessionInfo> {
        self.sessions.get(session_id).map(|entry| entry.value().clone())
    }

    fn set_state(&self, session_id: &str, state: SessionState) {
        if let Some(mut entry) = self.sessions.get_mut(session_id) {
            entry.state = state;
        }
    }

    fn unregister(&self, session_id: &str) {
        self.sessions.remove(session_id);
        self.active.fetch_sub(1, Ordering::SeqCst);
        debug!("Unregistered session {}", session_id);
    }
}

/// Scoped membership in a [`SessionTable`].
///
/// Dropping the registration removes the entry and frees its slot, on every
/// exit path.
pub struct SessionRegistration {
    session_id: String,
    mode: SessionMode,
    cancel: CancellationToken,
    table: Arc<SessionTable>,
}

impl SessionRegistration {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    /// Cancelled when the owning connection closes.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn set_state(&self, state: SessionState) {
        self.table.set_state(&self.session_id, state);
    }
}

impl std::fmt::Debug for SessionRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistration")
            .field("session_id", &self.session_id)
            .field("mode", &self.mode)
            .finish()
    }
}

impl Drop for SessionRegistration {
    fn drop(&mut self) {
        self.table.unregister(&self.session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_table_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SessionTable>();
        assert_send_sync::<SessionRegistration>();
    }

    #[test]
    fn test_register_and_drop() {
        let table = Arc::new(SessionTable::new(4));
        let reg = table.register(SessionMode::Exec).unwrap();

        let info = table.get(reg.session_id()).unwrap();
        assert_eq!(info.mode, SessionMode::Exec);
        assert_eq!(info.state, SessionState::Open);
        assert_eq!(table.len(), 1);

        drop(reg);
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn test_state_updates_are_visible() {
        let table = Arc::new(SessionTable::new(4));
        let reg = table.register(SessionMode::Shell).unwrap();
        reg.set_state(SessionState::Running);
        assert_eq!(
            table.get(reg.session_id()).unwrap().state,
            SessionState::Running
        );
    }

    #[test]
    fn test_limit_is_enforced_and_released() {
        let table = Arc::new(SessionTable::new(2));
        let a = table.register(SessionMode::Exec).unwrap();
        let _b = table.register(SessionMode::Exec).unwrap();

        let err = table.register(SessionMode::Exec).unwrap_err();
        assert!(matches!(err, RemoteError::Session(_)));

        drop(a);
        assert!(table.register(SessionMode::Exec).is_ok());
    }

    #[test]
    fn test_close_rejects_new_sessions_and_cancels_live_ones() {
        let table = Arc::new(SessionTable::new(4));
        let reg = table.register(SessionMode::Shell).unwrap();

        assert_eq!(table.close().unwrap(), 1);
        assert!(table.is_closed());
        assert!(reg.cancel_token().is_cancelled());
        assert_eq!(table.len(), 0);

        let err = table.register(SessionMode::Exec).unwrap_err();
        assert!(matches!(err, RemoteError::Session(_)));
    }

    #[test]
    fn test_registration_debug_names_session() {
        let table = Arc::new(SessionTable::new(1));
        let reg = table.register(SessionMode::Transfer).unwrap();
        let printed = format!("{:?}", reg);
        assert!(printed.contains(reg.session_id()));
        assert!(printed.contains("Transfer"));
        assert!(!printed.contains("sessions"));
    }

    #[test]
    fn test_second_close_is_reported() {
        let table = SessionTable::new(1);
        table.close().unwrap();
        assert!(matches!(table.close(), Err(RemoteError::AlreadyClosed)));
    }

    #[test]
    fn test_drop_after_close_is_harmless() {
        let table = Arc::new(SessionTable::new(1));
        let reg = table.register(SessionMode::Transfer).unwrap();
        table.close().unwrap();
        drop(reg);
        assert_eq!(table.len(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_registrations_are_distinct() {
        const N: usize = 64;
        let table = Arc::new(SessionTable::new(N));

        let tasks = (0..N).map(|_| {
            let table = Arc::clone(&table);
            tokio::spawn(async move { table.register(SessionMode::Exec) })
        });
        let registrations: Vec<_> = futures::future::join_all(tasks)
            .await
            .into_iter()
            .map(|r| r.unwrap().unwrap())
            .collect();

        let ids: HashSet<_> = registrations
            .iter()
            .map(|r| r.session_id().to_string())
            .collect();
        assert_eq!(ids.len(), N);
        assert_eq!(table.len(), N);

        let listed: HashSet<_> = table.list().into_iter().map(|i| i.session_id).collect();
        assert_eq!(listed, ids);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_registrations_respect_limit() {
        let table = Arc::new(SessionTable::new(5));

        let tasks = (0..32).map(|_| {
            let table = Arc::clone(&table);
            tokio::spawn(async move { table.register(SessionMode::Exec) })
        });
        let results: Vec<_> = futures::future::join_all(tasks)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        let accepted = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(accepted, 5);
        assert_eq!(table.len(), 5);
    }
}
