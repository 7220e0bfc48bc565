//! FileTransferChannel: file upload and download over a dedicated SFTP
//! subchannel.
//!
//! Content is streamed in chunks of the connection's configured size, so
//! memory use does not depend on file size. Both file handles are owned by
//! the transfer call and released on every exit path, including errors and
//! cancellation.
//!
//! The local side is always acquired first. If it fails, the error is a
//! `TransferError` with `side: Local` and no remote operation is attempted.

use std::path::Path;

use async_trait::async_trait;
use russh_sftp::client::SftpSession;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::channel::await_reply;
use super::connection::Connection;
use super::error::{RemoteError, TransferError};
use super::session::Session;
use super::types::{
    BoxedReader, BoxedWriter, OpContext, SessionMode, TransferDirection, TransferOutcome,
    TransferRequest,
};

/// Remote file system reachable over a transfer subchannel.
#[async_trait]
pub trait RemoteFiles: Send + Sync {
    /// Create or truncate `path` for writing.
    async fn create(&self, path: &str) -> Result<BoxedWriter, String>;

    /// Open an existing `path` for reading.
    async fn open(&self, path: &str) -> Result<BoxedReader, String>;

    async fn close(&self) -> Result<(), String> {
        Ok(())
    }
}

struct SftpRemote {
    sftp: SftpSession,
}

#[async_trait]
impl RemoteFiles for SftpRemote {
    async fn create(&self, path: &str) -> Result<BoxedWriter, String> {
        let file = self.sftp.create(path).await.map_err(|e| e.to_string())?;
        Ok(Box::new(file))
    }

    async fn open(&self, path: &str) -> Result<BoxedReader, String> {
        let file = self.sftp.open(path).await.map_err(|e| e.to_string())?;
        Ok(Box::new(file))
    }

    async fn close(&self) -> Result<(), String> {
        self.sftp.close().await.map_err(|e| e.to_string())
    }
}

/// The transfer engine, independent of how the remote side is reached.
pub(crate) struct Transfers {
    remote: Box<dyn RemoteFiles>,
    chunk_size: usize,
    cancel: CancellationToken,
}

impl Transfers {
    pub(crate) fn new(
        remote: Box<dyn RemoteFiles>,
        chunk_size: usize,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            remote,
            chunk_size: chunk_size.max(1),
            cancel,
        }
    }

    async fn upload(
        &self,
        local_path: &Path,
        remote_path: &str,
        ctx: &OpContext,
    ) -> Result<TransferOutcome, RemoteError> {
        let local = open_local(local_path).await?;
        self.send(local, local_path, remote_path, ctx).await
    }

    async fn download(
        &self,
        remote_path: &str,
        local_path: &Path,
        ctx: &OpContext,
    ) -> Result<TransferOutcome, RemoteError> {
        let local = create_local(local_path).await?;
        self.receive(remote_path, local, local_path, ctx).await
    }

    /// Stream an already-open local file to `remote_path`.
    pub(crate) async fn send(
        &self,
        mut local: tokio::fs::File,
        local_path: &Path,
        remote_path: &str,
        ctx: &OpContext,
    ) -> Result<TransferOutcome, RemoteError> {
        let bytes = ctx
            .bound("upload", async {
                let mut remote = self
                    .remote
                    .create(remote_path)
                    .await
                    .map_err(|e| TransferError::remote(remote_path, e))?;

                copy_chunks(
                    &mut local,
                    &mut *remote,
                    self.chunk_size,
                    &self.cancel,
                    |e| TransferError::local(local_path, e),
                    |e| TransferError::remote(remote_path, e),
                )
                .await
            })
            .await?;

        info!(
            "Uploaded {} bytes from {} to {}",
            bytes,
            local_path.display(),
            remote_path
        );

        Ok(TransferOutcome {
            direction: TransferDirection::Upload,
            local_path: local_path.to_path_buf(),
            remote_path: remote_path.to_string(),
            bytes,
        })
    }

    /// Stream `remote_path` into an already-created local file.
    ///
    /// If the remote file cannot be opened the freshly created local file is
    /// removed again.
    pub(crate) async fn receive(
        &self,
        remote_path: &str,
        mut local: tokio::fs::File,
        local_path: &Path,
        ctx: &OpContext,
    ) -> Result<TransferOutcome, RemoteError> {
        let bytes = ctx
            .bound("download", async {
                let mut remote = match self.remote.open(remote_path).await {
                    Ok(remote) => remote,
                    Err(e) => {
                        if let Err(rm) = tokio::fs::remove_file(local_path).await {
                            debug!("Could not remove {}: {}", local_path.display(), rm);
                        }
                        return Err(TransferError::remote(remote_path, e).into());
                    }
                };

                copy_chunks(
                    &mut *remote,
                    &mut local,
                    self.chunk_size,
                    &self.cancel,
                    |e| TransferError::remote(remote_path, e),
                    |e| TransferError::local(local_path, e),
                )
                .await
            })
            .await?;

        info!(
            "Downloaded {} bytes from {} to {}",
            bytes,
            remote_path,
            local_path.display()
        );

        Ok(TransferOutcome {
            direction: TransferDirection::Download,
            local_path: local_path.to_path_buf(),
            remote_path: remote_path.to_string(),
            bytes,
        })
    }
}

/// An SFTP subchannel, open for any number of sequential transfers.
pub struct FileTransferChannel {
    transfers: Transfers,
    session: Session,
}

impl FileTransferChannel {
    /// Open a transfer-mode session on `connection` and start the SFTP
    /// subsystem on it.
    pub async fn open(connection: &Connection) -> Result<Self, RemoteError> {
        let mut session = connection.open_session(SessionMode::Transfer).await?;
        let mut channel = session.begin(SessionMode::Transfer)?;

        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|e| RemoteError::Session(format!("Failed to request sftp subsystem: {}", e)))?;
        if !await_reply(&mut channel).await? {
            return Err(RemoteError::Session(
                "sftp subsystem was refused by the remote host".to_string(),
            ));
        }

        let sftp = SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| RemoteError::Session(format!("Failed to start sftp session: {}", e)))?;

        debug!("Opened transfer channel on session {}", session.id());

        Ok(Self {
            transfers: Transfers::new(
                Box::new(SftpRemote { sftp }),
                connection.chunk_size(),
                session.cancel_token().clone(),
            ),
            session,
        })
    }

    pub fn session_id(&self) -> &str {
        self.session.id()
    }

    pub async fn upload(
        &self,
        local_path: impl AsRef<Path>,
        remote_path: &str,
        ctx: &OpContext,
    ) -> Result<TransferOutcome, RemoteError> {
        self.transfers
            .upload(local_path.as_ref(), remote_path, ctx)
            .await
    }

    pub async fn download(
        &self,
        remote_path: &str,
        local_path: impl AsRef<Path>,
        ctx: &OpContext,
    ) -> Result<TransferOutcome, RemoteError> {
        self.transfers
            .download(remote_path, local_path.as_ref(), ctx)
            .await
    }

    /// Run one request in whichever direction it names.
    pub async fn transfer(
        &self,
        request: TransferRequest,
        ctx: &OpContext,
    ) -> Result<TransferOutcome, RemoteError> {
        match request.direction {
            TransferDirection::Upload => {
                self.upload(&request.local_path, &request.remote_path, ctx)
                    .await
            }
            TransferDirection::Download => {
                self.download(&request.remote_path, &request.local_path, ctx)
                    .await
            }
        }
    }

    /// End the SFTP session and release the subchannel.
    pub async fn close(mut self) {
        if let Err(e) = self.transfers.remote.close().await {
            debug!("Error closing sftp session: {}", e);
        }
        self.session.finish();
    }
}

/// Upload one file over a fresh transfer subchannel.
///
/// The local file is opened before anything is sent to the remote.
pub async fn upload(
    connection: &Connection,
    local_path: impl AsRef<Path>,
    remote_path: &str,
) -> Result<TransferOutcome, RemoteError> {
    let local_path = local_path.as_ref();
    let local = open_local(local_path).await?;

    let channel = FileTransferChannel::open(connection).await?;
    let result = channel
        .transfers
        .send(local, local_path, remote_path, &OpContext::default())
        .await;
    channel.close().await;
    result
}

/// Download one file over a fresh transfer subchannel.
///
/// The local file is created before anything is sent to the remote.
pub async fn download(
    connection: &Connection,
    remote_path: &str,
    local_path: impl AsRef<Path>,
) -> Result<TransferOutcome, RemoteError> {
    let local_path = local_path.as_ref();
    let local = create_local(local_path).await?;

    let channel = match FileTransferChannel::open(connection).await {
        Ok(channel) => channel,
        Err(e) => {
            if let Err(rm) = tokio::fs::remove_file(local_path).await {
                debug!("Could not remove {}: {}", local_path.display(), rm);
            }
            return Err(e);
        }
    };
    let result = channel
        .transfers
        .receive(remote_path, local, local_path, &OpContext::default())
        .await;
    channel.close().await;
    result
}

async fn open_local(path: &Path) -> Result<tokio::fs::File, RemoteError> {
    tokio::fs::File::open(path)
        .await
        .map_err(|e| TransferError::local(path, e).into())
}

async fn create_local(path: &Path) -> Result<tokio::fs::File, RemoteError> {
    tokio::fs::File::create(path)
        .await
        .map_err(|e| TransferError::local(path, e).into())
}

/// Copy `reader` to `writer` one chunk at a time, then flush and shut the
/// writer down. Faults are attributed to the side that produced them; a
/// rejected shutdown (the SFTP close of a remote target) is a write fault.
pub(crate) async fn copy_chunks<R, W>(
    reader: &mut R,
    writer: &mut W,
    chunk_size: usize,
    cancel: &CancellationToken,
    read_fault: impl Fn(std::io::Error) -> TransferError,
    write_fault: impl Fn(std::io::Error) -> TransferError,
) -> Result<u64, RemoteError>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = vec![0u8; chunk_size];
    let mut total: u64 = 0;

    loop {
        let n = tokio::select! {
            biased;

            _ = cancel.cancelled() => return Err(RemoteError::ConnectionClosed),

            read = reader.read(&mut buf) => read.map_err(&read_fault)?,
        };
        if n == 0 {
            break;
        }

        tokio::select! {
            biased;

            _ = cancel.cancelled() => return Err(RemoteError::ConnectionClosed),

            written = writer.write_all(&buf[..n]) => written.map_err(&write_fault)?,
        }
        total += n as u64;
    }

    writer.flush().await.map_err(&write_fault)?;
    writer.shutdown().await.map_err(&write_fault)?;

    Ok(total)
}
