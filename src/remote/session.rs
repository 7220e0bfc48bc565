//! A single logical channel of a connection.
//!
//! A session's mode is fixed when it is opened and its lifecycle is enforced by
//! a small state machine rather than by convention:
//!
//! ```text
//! Open --begin--> Running --finish--> Closed
//! ```
//!
//! `begin` hands the underlying channel to the operation that drives it, so
//! a session can run at most one command, shell or transfer. `finish` releases
//! the session's slot in the connection's table; dropping the session does the
//! same on any other exit path.

use russh::Channel;
use russh::client::Msg;
use tokio_util::sync::CancellationToken;

use super::error::RemoteError;
use super::table::SessionRegistration;
use super::types::{SessionMode, SessionState};

/// The mode-tagged state machine behind a [`Session`].
#[derive(Debug)]
pub(crate) struct Lifecycle {
    session_id: String,
    mode: SessionMode,
    state: SessionState,
}

impl Lifecycle {
    pub(crate) fn new(session_id: impl Into<String>, mode: SessionMode) -> Self {
        Self {
            session_id: session_id.into(),
            mode,
            state: SessionState::Open,
        }
    }

    pub(crate) fn begin(&mut self, mode: SessionMode, closed: bool) -> Result<(), RemoteError> {
        if self.mode != mode {
            return Err(RemoteError::Session(format!(
                "session {} was opened for {:?}, not {:?}",
                self.session_id, self.mode, mode
            )));
        }
        if closed {
            return Err(RemoteError::ConnectionClosed);
        }
        if self.state != SessionState::Open {
            return Err(RemoteError::Session(format!(
                "session {} has already been used",
                self.session_id
            )));
        }
        self.state = SessionState::Running;
        Ok(())
    }

    pub(crate) fn finish(&mut self) {
        self.state = SessionState::Closed;
    }
}

pub struct Session {
    lifecycle: Lifecycle,
    cancel: CancellationToken,
    channel: Option<Channel<Msg>>,
    registration: Option<SessionRegistration>,
}

impl Session {
    pub(crate) fn new(registration: SessionRegistration, channel: Channel<Msg>) -> Self {
        Self {
            lifecycle: Lifecycle::new(registration.session_id(), registration.mode()),
            cancel: registration.cancel_token().clone(),
            channel: Some(channel),
            registration: Some(registration),
        }
    }

    pub fn id(&self) -> &str {
        &self.lifecycle.session_id
    }

    pub fn mode(&self) -> SessionMode {
        self.lifecycle.mode
    }

    pub fn state(&self) -> SessionState {
        self.lifecycle.state
    }

    /// Cancelled when the owning connection is closed.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Move from `Open` to `Running`, taking ownership of the channel.
    pub(crate) fn begin(&mut self, mode: SessionMode) -> Result<Channel<Msg>, RemoteError> {
        self.lifecycle.begin(mode, self.cancel.is_cancelled())?;
        let channel = self.channel.take().ok_or_else(|| {
            RemoteError::Session(format!("session {} has no channel", self.id()))
        })?;
        if let Some(registration) = &self.registration {
            registration.set_state(SessionState::Running);
        }
        Ok(channel)
    }

    /// Mark the session closed and release its table slot.
    pub(crate) fn finish(&mut self) {
        self.lifecycle.finish();
        self.channel = None;
        self.registration = None;
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("session_id", &self.lifecycle.session_id)
            .field("mode", &self.lifecycle.mode)
            .field("state", &self.lifecycle.state)
            .finish()
    }
}
