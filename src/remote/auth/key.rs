//! Private key authentication, from a key file or in-memory key material.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use russh::{client, keys};
use tracing::debug;

use crate::remote::handler::ClientHandler;

use super::traits::{AuthFailure, AuthStrategy};

#[derive(Clone)]
enum KeySource {
    File(PathBuf),
    Pem(String),
}

pub struct KeyAuth {
    source: KeySource,
    passphrase: Option<String>,
}

impl KeyAuth {
    /// Load the key from `key_path` at authentication time.
    pub fn from_file(key_path: impl Into<PathBuf>, passphrase: Option<String>) -> Self {
        Self {
            source: KeySource::File(key_path.into()),
            passphrase,
        }
    }

    /// Use an OpenSSH/PEM encoded private key held in memory.
    pub fn from_pem(pem: impl Into<String>, passphrase: Option<String>) -> Self {
        Self {
            source: KeySource::Pem(pem.into()),
            passphrase,
        }
    }

    fn load(&self) -> Result<keys::PrivateKey, String> {
        let passphrase = self.passphrase.as_deref();
        match &self.source {
            KeySource::File(path) => keys::load_secret_key(path, passphrase)
                .map_err(|e| format!("Failed to load private key from {:?}: {}", path, e)),
            KeySource::Pem(pem) => keys::decode_secret_key(pem, passphrase)
                .map_err(|e| format!("Failed to decode private key material: {}", e)),
        }
    }
}

#[async_trait]
impl AuthStrategy for KeyAuth {
    async fn authenticate(
        &self,
        handle: &mut client::Handle<ClientHandler>,
        username: &str,
    ) -> Result<bool, AuthFailure> {
        let key_pair = self.load().map_err(AuthFailure::Unavailable)?;

        let hash_alg = handle
            .best_supported_rsa_hash()
            .await
            .ok()
            .flatten()
            .flatten();
        debug!("Using RSA hash algorithm for key auth: {:?}", hash_alg);

        let key_with_hash = keys::PrivateKeyWithHashAlg::new(Arc::new(key_pair), hash_alg);

        let result = handle
            .authenticate_publickey(username, key_with_hash)
            .await
            .map_err(|e| AuthFailure::Transport(format!("Key authentication failed: {}", e)))?;

        Ok(result.success())
    }

    fn name(&self) -> &'static str {
        match self.source {
            KeySource::File(_) => "key",
            KeySource::Pem(_) => "key-material",
        }
    }
}
