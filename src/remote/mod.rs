//! Secure remote sessions over SSH.
//!
//! This module is organized into the following submodules:
//!
//! - `transport`: Dialing, handshake and authentication (`TransportManager`)
//! - `connection`: Authenticated connections and their session tables
//! - `session`: Mode-tagged sessions and their lifecycle
//! - `exec`: One-shot command execution (`SessionExecutor`)
//! - `shell`: Interactive PTY shells (`InteractiveShell`)
//! - `transfer`: SFTP file transfer (`FileTransferChannel`)
//! - `error`: Error taxonomy and classification
//! - `config`: Configuration resolution with environment variable support
//! - `auth`: Authentication strategies
//! - `collab`: Crypto and document store interfaces consumed by this crate
//! - `journal`: Optional command history in a document store
//!
//! # Example
//!
//! ```ignore
//! use remote_session::remote::{Credentials, RemoteEndpoint, TransportManager, run_command};
//!
//! let manager = TransportManager::from_env();
//! let conn = manager
//!     .connect(&RemoteEndpoint::parse("10.0.0.5")?, &Credentials::password("root", "secret"))
//!     .await?;
//! let result = run_command(&conn, "uname -a").await?;
//! println!("{}", result.stdout_lossy());
//! conn.close().await?;
//! ```

pub mod auth;
pub(crate) mod channel;
pub mod collab;
pub mod config;
pub mod connection;
pub mod error;
pub mod exec;
pub mod handler;
pub mod journal;
pub mod session;
pub mod shell;
pub(crate) mod table;
pub mod transfer;
pub mod transport;
pub mod types;

pub use auth::Credentials;
pub use config::ConnectOptions;
pub use connection::Connection;
pub use error::{ErrorKind, ExecError, RemoteError, TransferError, TransferSide};
pub use exec::{SessionExecutor, run_command};
pub use handler::HostKeyPolicy;
pub use session::Session;
pub use shell::{InteractiveShell, ShellIo, ShellState, TerminalConfig, TerminalSize, start_shell};
pub use transfer::{FileTransferChannel, RemoteFiles, download, upload};
pub use transport::{RemoteEndpoint, TransportManager, connect};
pub use types::{
    CommandResult, ConnectionInfo, OpContext, SessionInfo, SessionMode, SessionState,
    ShellOutcome, TransferDirection, TransferOutcome, TransferRequest,
};
