//! SessionExecutor: one command per exec session.
//!
//! The command's stdout and stderr are accumulated in memory until the remote
//! reports completion. There is no bound on the captured size and no
//! streaming; callers expecting very large output should use a shell or a
//! file transfer instead.

use russh::{ChannelMsg, Sig};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::channel::ChannelEvents;
use super::connection::Connection;
use super::error::{ExecError, RemoteError};
use super::session::Session;
use super::types::{CommandResult, OpContext, SessionMode};

/// Runs commands on exec-mode sessions.
pub struct SessionExecutor;

impl SessionExecutor {
    /// Execute `command` on `session` and wait for it to finish.
    ///
    /// The session is closed afterwards whatever the outcome; a second `run`
    /// on the same session fails with `SessionError`.
    pub async fn run(
        session: &mut Session,
        command: &str,
        ctx: &OpContext,
    ) -> Result<CommandResult, RemoteError> {
        let mut channel = session.begin(SessionMode::Exec)?;
        let cancel = session.cancel_token().clone();

        debug!("Running command on session {}: {}", session.id(), command);

        let result = async {
            channel
                .exec(true, command)
                .await
                .map_err(|e| ExecError::Transport(format!("Failed to execute command: {}", e)))?;

            ctx.bound("exec", collect_command_output(&mut channel, &cancel))
                .await
        }
        .await;

        if let Err(e) = channel.close().await {
            debug!("Error closing exec channel: {}", e);
        }
        session.finish();

        match &result {
            Ok(output) => debug!(
                "Command finished on session {} with exit code {} ({} bytes stdout, {} bytes stderr)",
                session.id(),
                output.exit_code,
                output.stdout.len(),
                output.stderr.len()
            ),
            Err(e) => warn!("Command failed on session {}: {}", session.id(), e),
        }

        result
    }
}

/// Open an exec session on `connection`, run `command` and close the session.
pub async fn run_command(
    connection: &Connection,
    command: &str,
) -> Result<CommandResult, RemoteError> {
    let mut session = connection.open_session(SessionMode::Exec).await?;
    SessionExecutor::run(&mut session, command, &OpContext::default()).await
}

/// Collect output until the remote reports completion.
///
/// The exec request's reply arrives on the same message stream; a refusal is
/// a remote fault, while the channel ending without any exit report is a
/// transport fault.
pub(crate) async fn collect_command_output<E: ChannelEvents + ?Sized>(
    events: &mut E,
    cancel: &CancellationToken,
) -> Result<CommandResult, RemoteError> {
    let mut stdout = Vec::with_capacity(4096);
    let mut stderr = Vec::with_capacity(1024);
    let mut exit_code: Option<u32> = None;
    let mut exit_signal: Option<String> = None;

    loop {
        let msg = tokio::select! {
            biased;

            _ = cancel.cancelled() => return Err(RemoteError::ConnectionClosed),

            msg = events.next_event() => msg,
        };

        match msg {
            Some(ChannelMsg::Data { data }) => {
                stdout.extend_from_slice(&data);
            }
            Some(ChannelMsg::ExtendedData { data, ext }) => {
                // ext == 1 is stderr in SSH protocol
                if ext == 1 {
                    stderr.extend_from_slice(&data);
                }
            }
            Some(ChannelMsg::ExitStatus { exit_status }) => {
                exit_code = Some(exit_status);
            }
            Some(ChannelMsg::ExitSignal { signal_name, .. }) => {
                exit_signal = Some(signal_label(&signal_name));
            }
            Some(ChannelMsg::Failure) if exit_code.is_none() && exit_signal.is_none() => {
                return Err(ExecError::Remote(
                    "command execution was refused by the remote host".to_string(),
                )
                .into());
            }
            Some(ChannelMsg::Eof) => {
                // Keep waiting for the exit report if it has not arrived yet
                if exit_code.is_some() || exit_signal.is_some() {
                    break;
                }
            }
            Some(ChannelMsg::Close) | None => break,
            Some(_) => {}
        }
    }

    if exit_code.is_none() && exit_signal.is_none() {
        return Err(ExecError::Transport(
            "channel closed before the command reported an exit status".to_string(),
        )
        .into());
    }

    Ok(CommandResult {
        exit_code: exit_code.map(|c| c as i32).unwrap_or(-1),
        exit_signal,
        stdout,
        stderr,
    })
}

pub(crate) fn signal_label(sig: &Sig) -> String {
    match sig {
        Sig::Custom(name) => name.clone(),
        other => format!("{:?}", other),
    }
}
