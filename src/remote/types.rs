//! Serializable result and metadata types.

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};

use super::error::RemoteError;

/// Caller-supplied byte source.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
/// Caller-supplied byte sink.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Per-operation context threaded into exec, shell and transfer calls.
///
/// `OpContext::default()` carries no deadline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpContext {
    pub deadline: Option<Duration>,
}

impl OpContext {
    pub fn with_deadline(deadline: Duration) -> Self {
        Self {
            deadline: Some(deadline),
        }
    }

    /// Run `fut` under this context's deadline, if any.
    pub(crate) async fn bound<T, F>(
        &self,
        operation: &'static str,
        fut: F,
    ) -> Result<T, RemoteError>
    where
        F: Future<Output = Result<T, RemoteError>>,
    {
        match self.deadline {
            Some(after) => tokio::time::timeout(after, fut)
                .await
                .map_err(|_| RemoteError::DeadlineExceeded { operation, after })?,
            None => fut.await,
        }
    }
}

/// Connection metadata captured at connect time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub connection_id: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    /// RFC3339 timestamp
    pub connected_at: String,
    pub compression_enabled: bool,
    /// Number of retry attempts needed to establish the connection
    pub retry_attempts: u32,
}

/// What a session is used for. Fixed when the session is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    /// One command, then the session closes itself
    Exec,
    /// Interactive PTY shell, open until the remote exits
    Shell,
    /// SFTP subchannel, open until the transfer channel is closed
    Transfer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Channel allocated, nothing started yet
    Open,
    /// Command, shell or transfer in progress
    Running,
    /// Finished; the channel cannot be reused
    Closed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub mode: SessionMode,
    pub state: SessionState,
    /// RFC3339 timestamp
    pub opened_at: String,
}

/// Outcome of one remote command.
///
/// Output is captured in memory in full; very large output is not streamed
/// and is not truncated either.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    /// Remote exit status, or -1 if the remote reported none (e.g. killed by a signal)
    pub exit_code: i32,
    /// Signal name if the command was terminated by a signal
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_signal: Option<String>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Outcome of an interactive shell.
///
/// Local faults in one forwarding direction do not abort the shell; they are
/// reported here instead.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellOutcome {
    pub exit_status: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_signal: Option<String>,
    /// Failure reading local input, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_fault: Option<String>,
    /// Failure writing local output, if any (remaining output was discarded)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_fault: Option<String>,
}

impl ShellOutcome {
    /// Exit status as a signed code, -1 if the remote reported none.
    pub fn code(&self) -> i32 {
        self.exit_status.map(|c| c as i32).unwrap_or(-1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferDirection {
    Upload,
    Download,
}

/// One requested file transfer. Consumed by a single transfer call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub direction: TransferDirection,
    pub local_path: PathBuf,
    pub remote_path: String,
}

impl TransferRequest {
    pub fn upload(local_path: impl Into<PathBuf>, remote_path: impl Into<String>) -> Self {
        Self {
            direction: TransferDirection::Upload,
            local_path: local_path.into(),
            remote_path: remote_path.into(),
        }
    }

    pub fn download(remote_path: impl Into<String>, local_path: impl Into<PathBuf>) -> Self {
        Self {
            direction: TransferDirection::Download,
            local_path: local_path.into(),
            remote_path: remote_path.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferOutcome {
    pub direction: TransferDirection,
    pub local_path: PathBuf,
    pub remote_path: String,
    pub bytes: u64,
}
