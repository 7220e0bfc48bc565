//! Authentication strategy trait definition.

use async_trait::async_trait;
use russh::client;
use thiserror::Error;

use crate::remote::handler::ClientHandler;

/// Why an authentication attempt produced no answer from the server.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthFailure {
    /// The method could not be tried (unreadable key, no agent, ...).
    #[error("{0}")]
    Unavailable(String),
    /// The transport failed while the attempt was in flight.
    #[error("{0}")]
    Transport(String),
}

/// One way of proving identity to the server.
///
/// Implementations must be `Send + Sync` so a chain can be driven from any
/// task.
#[async_trait]
pub trait AuthStrategy: Send + Sync {
    /// Attempt to authenticate.
    ///
    /// * `Ok(true)` - the server accepted the credentials
    /// * `Ok(false)` - the server rejected them
    /// * `Err(failure)` - the attempt could not be made, or the transport failed
    async fn authenticate(
        &self,
        handle: &mut client::Handle<ClientHandler>,
        username: &str,
    ) -> Result<bool, AuthFailure>;

    /// Short name used in logs. Never contains secret material.
    fn name(&self) -> &'static str;
}
