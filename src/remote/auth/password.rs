//! Password-based authentication.

use async_trait::async_trait;
use russh::client;

use crate::remote::handler::ClientHandler;

use super::traits::{AuthFailure, AuthStrategy};

pub struct PasswordAuth {
    password: String,
}

impl PasswordAuth {
    pub fn new(password: impl Into<String>) -> Self {
        Self {
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for PasswordAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PasswordAuth(<redacted>)")
    }
}

#[async_trait]
impl AuthStrategy for PasswordAuth {
    async fn authenticate(
        &self,
        handle: &mut client::Handle<ClientHandler>,
        username: &str,
    ) -> Result<bool, AuthFailure> {
        let result = handle
            .authenticate_password(username, &self.password)
            .await
            .map_err(|e| AuthFailure::Transport(format!("Password authentication failed: {}", e)))?;

        Ok(result.success())
    }

    fn name(&self) -> &'static str {
        "password"
    }
}
