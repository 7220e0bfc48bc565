//! Caller-supplied authentication material.

use std::fmt;
use std::path::PathBuf;

use crate::remote::collab::CryptoProvider;
use crate::remote::error::RemoteError;

/// A single way the user can authenticate.
#[derive(Clone)]
pub enum AuthMethod {
    Password(String),
    KeyFile {
        path: PathBuf,
        passphrase: Option<String>,
    },
    KeyMaterial {
        pem: String,
        passphrase: Option<String>,
    },
    Agent,
}

impl fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMethod::Password(_) => f.write_str("Password(<redacted>)"),
            AuthMethod::KeyFile { path, .. } => {
                f.debug_struct("KeyFile").field("path", path).finish()
            }
            AuthMethod::KeyMaterial { .. } => f.write_str("KeyMaterial(<redacted>)"),
            AuthMethod::Agent => f.write_str("Agent"),
        }
    }
}

/// Username plus the ordered authentication methods to try.
///
/// Credentials are never stored by this crate; they live as long as the
/// caller keeps them.
#[derive(Clone, Debug)]
pub struct Credentials {
    username: String,
    methods: Vec<AuthMethod>,
}

impl Credentials {
    /// Credentials with no explicit method; the SSH agent is used.
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            methods: Vec::new(),
        }
    }

    pub fn password(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::new(username).with_password(password)
    }

    pub fn key_file(username: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self::new(username).with_key_file(path, None)
    }

    /// Unseal a password that was encrypted with `provider` for `private_key`.
    ///
    /// An unreadable or undecryptable password is an authentication failure:
    /// no connection attempt can succeed with it.
    pub fn from_sealed_password(
        username: impl Into<String>,
        provider: &dyn CryptoProvider,
        private_key: &str,
        sealed: &[u8],
    ) -> Result<Self, RemoteError> {
        let username = username.into();

        let plain = provider
            .decrypt(private_key, sealed)
            .map_err(|e| RemoteError::Auth {
                user: username.clone(),
                reason: format!("could not unseal password: {}", e),
            })?;

        let password = String::from_utf8(plain).map_err(|_| RemoteError::Auth {
            user: username.clone(),
            reason: "unsealed password is not valid UTF-8".to_string(),
        })?;

        Ok(Self::password(username, password))
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.methods.push(AuthMethod::Password(password.into()));
        self
    }

    pub fn with_key_file(mut self, path: impl Into<PathBuf>, passphrase: Option<String>) -> Self {
        self.methods.push(AuthMethod::KeyFile {
            path: path.into(),
            passphrase,
        });
        self
    }

    pub fn with_key_material(mut self, pem: impl Into<String>, passphrase: Option<String>) -> Self {
        self.methods.push(AuthMethod::KeyMaterial {
            pem: pem.into(),
            passphrase,
        });
        self
    }

    pub fn with_agent(mut self) -> Self {
        self.methods.push(AuthMethod::Agent);
        self
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn methods(&self) -> &[AuthMethod] {
        &self.methods
    }
}
