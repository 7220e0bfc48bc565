//! Error taxonomy for the remote session layer.
//!
//! Every public operation returns a typed [`RemoteError`]. The variants map
//! one-to-one onto the failure classes of the layer they come from:
//!
//! | Kind | Raised when | Fatal to |
//! |------|-------------|----------|
//! | `Dial` | transport connect fails | the `connect` call |
//! | `Auth` | credentials rejected or unusable | the `connect` call |
//! | `Timeout` | handshake exceeds its bound | the `connect` call |
//! | `Session` | channel negotiation fails, limit reached, connection closed | the `open_session` call |
//! | `Exec` | remote command fails to start or its channel faults | that `run` call |
//! | `Shell` | PTY negotiation or forwarding fault | that `start` call |
//! | `Transfer` | local or remote I/O fault while streaming | that transfer |
//! | `ConnectionClosed` | connection closed while a session is active | every session of the connection |
//!
//! # Retry classification
//!
//! Connect failures are never retried implicitly. When a caller opts into
//! retries, only transient dial failures and handshake timeouts qualify.
//! Authentication failures take precedence over everything else and are never
//! retryable, to avoid repeatedly failing (and locking accounts) with bad
//! credentials.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Dial failure patterns that indicate a transient condition.
const TRANSIENT_DIAL_ERRORS: &[&str] = &[
    "connection refused",
    "connection reset",
    "connection timed out",
    "timeout",
    "network is unreachable",
    "no route to host",
    "host is down",
    "temporary failure",
    "resource temporarily unavailable",
    "broken pipe",
];

/// Dial failure patterns that will not go away by dialing again.
const PERMANENT_DIAL_ERRORS: &[&str] = &[
    "host key",
    "unknown key",
    "permission denied",
    "invalid port",
];

/// Coarse classification of a [`RemoteError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Dial,
    Auth,
    Timeout,
    Session,
    Exec,
    Shell,
    Transfer,
    ConnectionClosed,
    AlreadyClosed,
    DeadlineExceeded,
}

/// Which end of a file transfer failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferSide {
    Local,
    Remote,
}

impl fmt::Display for TransferSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferSide::Local => f.write_str("local"),
            TransferSide::Remote => f.write_str("remote"),
        }
    }
}

/// Failure of a single command execution.
///
/// `Remote` means the server refused or faulted the command itself;
/// `Transport` means the channel carrying it broke.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("remote refused command: {0}")]
    Remote(String),
    #[error("command channel failed: {0}")]
    Transport(String),
}

/// Failure of a single upload or download.
#[derive(Debug, Error)]
#[error("{side} transfer failure on {}: {reason}", path.display())]
pub struct TransferError {
    pub side: TransferSide,
    pub path: PathBuf,
    pub reason: String,
}

impl TransferError {
    pub fn local(path: impl Into<PathBuf>, reason: impl fmt::Display) -> Self {
        Self {
            side: TransferSide::Local,
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn remote(path: impl Into<PathBuf>, reason: impl fmt::Display) -> Self {
        Self {
            side: TransferSide::Remote,
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("failed to connect to {address}: {reason}")]
    Dial { address: String, reason: String },

    #[error("authentication failed for {user}: {reason}")]
    Auth { user: String, reason: String },

    #[error("handshake with {address} timed out after {after:?}")]
    Timeout { address: String, after: Duration },

    #[error("session error: {0}")]
    Session(String),

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error("shell error: {0}")]
    Shell(String),

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("connection already closed")]
    AlreadyClosed,

    #[error("{operation} exceeded its deadline of {after:?}")]
    DeadlineExceeded {
        operation: &'static str,
        after: Duration,
    },
}

impl RemoteError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RemoteError::Dial { .. } => ErrorKind::Dial,
            RemoteError::Auth { .. } => ErrorKind::Auth,
            RemoteError::Timeout { .. } => ErrorKind::Timeout,
            RemoteError::Session(_) => ErrorKind::Session,
            RemoteError::Exec(_) => ErrorKind::Exec,
            RemoteError::Shell(_) => ErrorKind::Shell,
            RemoteError::Transfer(_) => ErrorKind::Transfer,
            RemoteError::ConnectionClosed => ErrorKind::ConnectionClosed,
            RemoteError::AlreadyClosed => ErrorKind::AlreadyClosed,
            RemoteError::DeadlineExceeded { .. } => ErrorKind::DeadlineExceeded,
        }
    }

    /// Whether this error invalidates the owning connection.
    ///
    /// Per-operation failures (non-zero exits, a failed transfer, a refused
    /// PTY) leave the connection usable; the caller decides what to do next.
    pub fn is_fatal_to_connection(&self) -> bool {
        matches!(self, RemoteError::ConnectionClosed)
    }

    /// Whether an opt-in connect retry may try again after this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            RemoteError::Timeout { .. } => true,
            RemoteError::Dial { reason, .. } => is_transient_dial_failure(reason),
            _ => false,
        }
    }

    /// The failing side, for transfer errors.
    pub fn transfer_side(&self) -> Option<TransferSide> {
        match self {
            RemoteError::Transfer(e) => Some(e.side),
            _ => None,
        }
    }
}

/// Decide whether a dial failure reason describes a transient condition.
///
/// Permanent patterns (host key rejection and the like) are checked first and
/// take precedence. Reasons matching neither list are treated as permanent.
pub(crate) fn is_transient_dial_failure(reason: &str) -> bool {
    let reason = reason.to_lowercase();

    if PERMANENT_DIAL_ERRORS.iter().any(|p| reason.contains(p)) {
        return false;
    }

    TRANSIENT_DIAL_ERRORS.iter().any(|p| reason.contains(p))
}
