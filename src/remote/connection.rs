//! An authenticated, multiplexed connection.
//!
//! A [`Connection`] only exists once the handshake and authentication have
//! both succeeded. It is cheap to clone; all clones share one transport and
//! one session table, so a connection can be closed from a different task than
//! the ones driving its sessions.
//!
//! Closing is a cancellation signal for every outstanding session: anything
//! blocked on a channel read or write returns `ConnectionClosed` promptly.

use std::sync::Arc;

use russh::{Disconnect, client};
use tracing::{debug, info, warn};

use super::error::RemoteError;
use super::handler::ClientHandler;
use super::session::Session;
use super::table::SessionTable;
use super::types::{ConnectionInfo, SessionInfo, SessionMode};

#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

struct ConnectionInner {
    info: ConnectionInfo,
    handle: client::Handle<ClientHandler>,
    table: Arc<SessionTable>,
    chunk_size: usize,
}

impl Connection {
    pub(crate) fn new(
        handle: client::Handle<ClientHandler>,
        info: ConnectionInfo,
        max_sessions: usize,
        chunk_size: usize,
    ) -> Self {
        Self {
            inner: Arc::new(ConnectionInner {
                info,
                handle,
                table: Arc::new(SessionTable::new(max_sessions)),
                chunk_size,
            }),
        }
    }

    pub fn info(&self) -> &ConnectionInfo {
        &self.inner.info
    }

    /// Open a new channel on this connection for the given mode.
    pub async fn open_session(&self, mode: SessionMode) -> Result<Session, RemoteError> {
        let registration = self.inner.table.register(mode)?;

        if self.inner.handle.is_closed() {
            return Err(RemoteError::Session("connection is closed".to_string()));
        }

        let cancel = registration.cancel_token().clone();
        let channel = tokio::select! {
            biased;

            _ = cancel.cancelled() => return Err(RemoteError::ConnectionClosed),

            opened = self.inner.handle.channel_open_session() => opened
                .map_err(|e| RemoteError::Session(format!("Failed to open channel: {}", e)))?,
        };

        debug!(
            "Opened {:?} session {} on {}",
            mode,
            registration.session_id(),
            self.inner.info.connection_id
        );

        Ok(Session::new(registration, channel))
    }

    /// Close the connection.
    ///
    /// Invalidates every session of this connection and disconnects the
    /// transport. A second call returns `AlreadyClosed` and does nothing else.
    pub async fn close(&self) -> Result<(), RemoteError> {
        let invalidated = self.inner.table.close()?;

        info!(
            "Closing connection {} to {}@{}:{} ({} active session(s) invalidated)",
            self.inner.info.connection_id,
            self.inner.info.username,
            self.inner.info.host,
            self.inner.info.port,
            invalidated
        );

        if let Err(e) = self
            .inner
            .handle
            .disconnect(Disconnect::ByApplication, "Connection closed by client", "en")
            .await
        {
            warn!("Error during disconnect: {}", e);
        }

        Ok(())
    }

    /// True once `close` was called or the transport went away.
    pub fn is_closed(&self) -> bool {
        self.inner.table.is_closed() || self.inner.handle.is_closed()
    }

    pub fn sessions(&self) -> Vec<SessionInfo> {
        self.inner.table.list()
    }

    pub fn session(&self, session_id: &str) -> Option<SessionInfo> {
        self.inner.table.get(session_id)
    }

    pub fn session_count(&self) -> usize {
        self.inner.table.len()
    }

    pub(crate) fn chunk_size(&self) -> usize {
        self.inner.chunk_size
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("info", &self.inner.info)
            .field("sessions", &self.inner.table.len())
            .field("closed", &self.inner.table.is_closed())
            .finish()
    }
}
