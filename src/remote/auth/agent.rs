//! SSH agent authentication.

use async_trait::async_trait;
use russh::{client, keys};
use tracing::{debug, info};

use crate::remote::handler::ClientHandler;

use super::traits::{AuthFailure, AuthStrategy};

/// Tries every identity offered by the agent at `SSH_AUTH_SOCK`.
#[derive(Default)]
pub struct AgentAuth;

impl AgentAuth {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AuthStrategy for AgentAuth {
    async fn authenticate(
        &self,
        handle: &mut client::Handle<ClientHandler>,
        username: &str,
    ) -> Result<bool, AuthFailure> {
        let mut agent = keys::agent::client::AgentClient::connect_env()
            .await
            .map_err(|e| {
                AuthFailure::Unavailable(format!("Failed to connect to SSH agent: {}", e))
            })?;

        let identities = agent.request_identities().await.map_err(|e| {
            AuthFailure::Unavailable(format!("Failed to get identities from SSH agent: {}", e))
        })?;

        if identities.is_empty() {
            return Err(AuthFailure::Unavailable(
                "No identities found in SSH agent".to_string(),
            ));
        }

        let hash_alg = handle
            .best_supported_rsa_hash()
            .await
            .ok()
            .flatten()
            .flatten();

        for identity in identities {
            debug!("Trying SSH agent identity: {:?}", identity.comment());

            match handle
                .authenticate_publickey_with(username, identity.clone(), hash_alg, &mut agent)
                .await
            {
                Ok(result) if result.success() => {
                    info!("Authenticated {} with SSH agent", username);
                    return Ok(true);
                }
                Ok(_) => debug!("Agent identity not accepted, trying next"),
                Err(e) => debug!("Agent authentication error: {}, trying next", e),
            }
        }

        Ok(false)
    }

    fn name(&self) -> &'static str {
        "agent"
    }
}
