//! InteractiveShell: a PTY shell forwarded to caller-owned streams.
//!
//! # Architecture
//!
//! After the PTY and shell requests are accepted, the channel is split and two
//! flows run concurrently on the calling task:
//!
//! - **input**: local stdin and resize events to the remote. End of local input
//!   sends EOF; a local read fault is recorded and the flow stops, but output
//!   keeps flowing.
//! - **output**: remote stdout/stderr to the local writers, verbatim, flushed
//!   per message. A local write fault is recorded and further output is
//!   discarded so the remote never stalls on a full window.
//!
//! The call returns once the remote has reported exit and both flows have
//! stopped, or as soon as the connection is closed (`ConnectionClosed`).

use std::io::{self, Read};
use std::sync::Mutex;

use bytes::Bytes;
use russh::{ChannelMsg, Pty};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::channel::{ChannelEvents, ChannelSink, await_reply};
use super::connection::Connection;
use super::error::RemoteError;
use super::exec::signal_label;
use super::session::Session;
use super::types::{BoxedReader, BoxedWriter, OpContext, SessionMode, ShellOutcome};

const INPUT_BUFFER_SIZE: usize = 8192;

/// Terminal dimensions in characters and pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminalSize {
    pub cols: u32,
    pub rows: u32,
    pub pix_width: u32,
    pub pix_height: u32,
}

impl TerminalSize {
    pub fn new(cols: u32, rows: u32) -> Self {
        Self {
            cols,
            rows,
            pix_width: 0,
            pix_height: 0,
        }
    }
}

impl Default for TerminalSize {
    fn default() -> Self {
        Self::new(80, 40)
    }
}

/// What is negotiated with the remote when the PTY is requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalConfig {
    pub term: String,
    pub size: TerminalSize,
    pub echo: bool,
    /// Input speed in baud
    pub input_speed: u32,
    /// Output speed in baud
    pub output_speed: u32,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            term: "linux".to_string(),
            size: TerminalSize::default(),
            echo: false,
            input_speed: 14400,
            output_speed: 14400,
        }
    }
}

impl TerminalConfig {
    pub fn with_term(mut self, term: impl Into<String>) -> Self {
        self.term = term.into();
        self
    }

    pub fn with_size(mut self, size: TerminalSize) -> Self {
        self.size = size;
        self
    }

    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    pub(crate) fn modes(&self) -> Vec<(Pty, u32)> {
        vec![
            (Pty::ECHO, u32::from(self.echo)),
            (Pty::TTY_OP_ISPEED, self.input_speed),
            (Pty::TTY_OP_OSPEED, self.output_speed),
        ]
    }
}

/// Live terminal state of a shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellState {
    pub term: String,
    pub size: TerminalSize,
    pub echo: bool,
    pub open: bool,
}

impl ShellState {
    fn from_config(config: &TerminalConfig) -> Self {
        Self {
            term: config.term.clone(),
            size: config.size,
            echo: config.echo,
            open: false,
        }
    }
}

/// Caller-owned local side of a shell.
pub struct ShellIo {
    pub stdin: BoxedReader,
    pub stdout: BoxedWriter,
    pub stderr: BoxedWriter,
    /// Terminal resize events, forwarded as window-change requests
    pub resize: Option<mpsc::Receiver<TerminalSize>>,
}

impl ShellIo {
    pub fn new(stdin: BoxedReader, stdout: BoxedWriter, stderr: BoxedWriter) -> Self {
        Self {
            stdin,
            stdout,
            stderr,
            resize: None,
        }
    }

    /// The process's own standard streams.
    ///
    /// Stdin is read on a dedicated thread, so a read still pending when the
    /// shell ends does not keep the runtime from shutting down.
    pub fn stdio() -> Self {
        Self::new(
            blocking_reader(std::io::stdin()),
            Box::new(tokio::io::stdout()),
            Box::new(tokio::io::stderr()),
        )
    }

    pub fn with_resize(mut self, resize: mpsc::Receiver<TerminalSize>) -> Self {
        self.resize = Some(resize);
        self
    }
}

/// Interactive shell bound to one terminal configuration.
///
/// The state is readable from other tasks while [`InteractiveShell::start`]
/// is running.
pub struct InteractiveShell {
    config: TerminalConfig,
    state: Mutex<ShellState>,
}

impl InteractiveShell {
    pub fn new(config: TerminalConfig) -> Self {
        Self {
            state: Mutex::new(ShellState::from_config(&config)),
            config,
        }
    }

    pub fn config(&self) -> &TerminalConfig {
        &self.config
    }

    pub fn state(&self) -> ShellState {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn update_state(&self, f: impl FnOnce(&mut ShellState)) {
        f(&mut self.state.lock().unwrap_or_else(|e| e.into_inner()));
    }

    /// Negotiate a PTY and a shell on `session`, then forward until the remote
    /// exits or the connection closes.
    pub async fn start(
        &self,
        session: &mut Session,
        io: ShellIo,
        ctx: &OpContext,
    ) -> Result<ShellOutcome, RemoteError> {
        let mut channel = session.begin(SessionMode::Shell)?;
        let cancel = session.cancel_token().clone();
        let session_id = session.id().to_string();

        let result = ctx
            .bound("shell", async {
                let size = self.config.size;
                channel
                    .request_pty(
                        true,
                        &self.config.term,
                        size.cols,
                        size.rows,
                        size.pix_width,
                        size.pix_height,
                        &self.config.modes(),
                    )
                    .await
                    .map_err(|e| RemoteError::Shell(format!("Failed to request PTY: {}", e)))?;
                confirm(&mut channel, "PTY").await?;

                channel
                    .request_shell(true)
                    .await
                    .map_err(|e| RemoteError::Shell(format!("Failed to start shell: {}", e)))?;
                confirm(&mut channel, "shell").await?;

                self.update_state(|s| s.open = true);
                info!(
                    "Shell started on session {} ({} {}x{})",
                    session_id, self.config.term, size.cols, size.rows
                );

                let (mut reader, writer) = channel.split();
                let outcome = self.forward(&mut reader, &writer, io, &cancel).await;
                if let Err(e) = ChannelSink::close(&writer).await {
                    debug!("{}", e);
                }
                outcome
            })
            .await;

        self.update_state(|s| s.open = false);
        session.finish();

        match &result {
            Ok(outcome) => info!(
                "Shell on session {} finished with exit status {:?}",
                session_id, outcome.exit_status
            ),
            Err(e) => warn!("Shell on session {} ended: {}", session_id, e),
        }

        result
    }

    /// Run both forwarding flows until the remote exits, or until `cancel`.
    pub(crate) async fn forward<R, W>(
        &self,
        reader: &mut R,
        writer: &W,
        io: ShellIo,
        cancel: &CancellationToken,
    ) -> Result<ShellOutcome, RemoteError>
    where
        R: ChannelEvents + ?Sized,
        W: ChannelSink + ?Sized,
    {
        let ShellIo {
            mut stdin,
            mut stdout,
            mut stderr,
            resize,
        } = io;
        let remote_done = CancellationToken::new();

        let flows = async {
            let output = async {
                let report = pump_output(reader, &mut *stdout, &mut *stderr).await;
                remote_done.cancel();
                report
            };
            let input = self.pump_input(&mut *stdin, resize, writer, &remote_done);
            tokio::join!(output, input)
        };

        let (output, input_fault) = tokio::select! {
            biased;

            _ = cancel.cancelled() => return Err(RemoteError::ConnectionClosed),

            flows = flows => flows,
        };

        let output = output?;
        if let Some(fault) = &input_fault {
            warn!("Shell input stopped early: {}", fault);
        }
        if let Some(fault) = &output.fault {
            warn!("Shell output discarded after local write failure: {}", fault);
        }

        Ok(ShellOutcome {
            exit_status: output.exit_status,
            exit_signal: output.exit_signal,
            input_fault,
            output_fault: output.fault,
        })
    }

    /// Local input and resize events to the remote. Returns the input fault,
    /// if any.
    async fn pump_input<W: ChannelSink + ?Sized>(
        &self,
        stdin: &mut (dyn AsyncRead + Send + Unpin),
        mut resize: Option<mpsc::Receiver<TerminalSize>>,
        writer: &W,
        remote_done: &CancellationToken,
    ) -> Option<String> {
        let mut buf = vec![0u8; INPUT_BUFFER_SIZE];
        let mut input_open = true;
        let mut fault = None;

        loop {
            tokio::select! {
                biased;

                _ = remote_done.cancelled() => return fault,

                size = next_resize(&mut resize) => match size {
                    Some(size) => {
                        self.update_state(|s| s.size = size);
                        if let Err(e) = writer.resize(size).await {
                            debug!("{}", e);
                        }
                    }
                    None => resize = None,
                },

                read = stdin.read(&mut buf), if input_open => match read {
                    Ok(0) => {
                        input_open = false;
                        if let Err(e) = writer.send_eof().await {
                            debug!("{}", e);
                        }
                    }
                    Ok(n) => {
                        if let Err(e) = writer.send_data(&buf[..n]).await {
                            input_open = false;
                            fault = Some(e);
                        }
                    }
                    Err(e) => {
                        input_open = false;
                        fault = Some(format!("Failed to read local input: {}", e));
                        if let Err(e) = writer.send_eof().await {
                            debug!("{}", e);
                        }
                    }
                },
            }
        }
    }
}

/// Start a shell with the default terminal on a fresh session of `connection`,
/// forwarding the process's standard streams.
pub async fn start_shell(
    connection: &Connection,
    config: TerminalConfig,
) -> Result<ShellOutcome, RemoteError> {
    let mut session = connection.open_session(SessionMode::Shell).await?;
    InteractiveShell::new(config)
        .start(&mut session, ShellIo::stdio(), &OpContext::default())
        .await
}

async fn confirm<E: ChannelEvents + ?Sized>(events: &mut E, what: &str) -> Result<(), RemoteError> {
    if await_reply(events).await? {
        Ok(())
    } else {
        Err(RemoteError::Shell(format!(
            "{} request was refused by the remote host",
            what
        )))
    }
}

/// Read `source` on its own thread and expose it as an async reader.
///
/// The thread ends at end of input, on a read error, or once the reader is
/// dropped and its next read completes.
pub(crate) fn blocking_reader<R>(mut source: R) -> BoxedReader
where
    R: Read + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<io::Result<Bytes>>(4);

    let spawned = std::thread::Builder::new()
        .name("shell-input".to_string())
        .spawn(move || {
            let mut buf = vec![0u8; INPUT_BUFFER_SIZE];
            loop {
                let chunk = match source.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => Ok(Bytes::copy_from_slice(&buf[..n])),
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => Err(e),
                };
                let last = chunk.is_err();
                if tx.blocking_send(chunk).is_err() || last {
                    break;
                }
            }
        });
    if let Err(e) = spawned {
        warn!("Failed to start input thread: {}", e);
    }

    let chunks = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|chunk| (chunk, rx))
    });
    Box::new(StreamReader::new(Box::pin(chunks)))
}

async fn next_resize(resize: &mut Option<mpsc::Receiver<TerminalSize>>) -> Option<TerminalSize> {
    match resize {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

struct OutputReport {
    exit_status: Option<u32>,
    exit_signal: Option<String>,
    fault: Option<String>,
}

/// Remote output to the local writers until the channel closes.
async fn pump_output<R: ChannelEvents + ?Sized>(
    reader: &mut R,
    stdout: &mut (dyn AsyncWrite + Send + Unpin),
    stderr: &mut (dyn AsyncWrite + Send + Unpin),
) -> Result<OutputReport, RemoteError> {
    let mut report = OutputReport {
        exit_status: None,
        exit_signal: None,
        fault: None,
    };

    loop {
        match reader.next_event().await {
            Some(ChannelMsg::Data { data }) => {
                deliver(stdout, &data, &mut report.fault, "stdout").await;
            }
            Some(ChannelMsg::ExtendedData { data, ext }) => {
                if ext == 1 {
                    deliver(stderr, &data, &mut report.fault, "stderr").await;
                }
            }
            Some(ChannelMsg::ExitStatus { exit_status }) => {
                report.exit_status = Some(exit_status);
            }
            Some(ChannelMsg::ExitSignal { signal_name, .. }) => {
                report.exit_signal = Some(signal_label(&signal_name));
            }
            Some(ChannelMsg::Close) => return Ok(report),
            None => {
                if report.exit_status.is_some() || report.exit_signal.is_some() {
                    return Ok(report);
                }
                return Err(RemoteError::ConnectionClosed);
            }
            Some(_) => {}
        }
    }
}

async fn deliver(
    out: &mut (dyn AsyncWrite + Send + Unpin),
    data: &[u8],
    fault: &mut Option<String>,
    stream: &str,
) {
    if fault.is_some() {
        return;
    }
    let written = async {
        out.write_all(data).await?;
        out.flush().await
    }
    .await;
    if let Err(e) = written {
        *fault = Some(format!("Failed to write {}: {}", stream, e));
    }
}
