//! Establishing connections.
//!
//! ## Connection Lifecycle
//!
//! 1. **Endpoint**: `host:port`, with port 22 when none is given.
//! 2. **Client configuration**: keepalive and compression preferences for the
//!    russh client.
//! 3. **Handshake**: TCP connect plus SSH key exchange, including host key
//!    verification through [`ClientHandler`].
//! 4. **Authentication**: the credential methods run as an [`AuthChain`]; the
//!    first accepted method wins.
//!
//! Steps 3 and 4 together are bounded by the connect timeout. A caller never
//! sees a half-open connection: either a fully authenticated [`Connection`]
//! is returned or an error is.
//!
//! ## Retry Strategy
//!
//! Retries are opt-in (`max_retries` defaults to 0). When enabled, attempts use
//! exponential backoff with jitter via `backon`, capped at [`MAX_RETRY_DELAY`],
//! and only errors for which [`RemoteError::is_retryable`] holds are retried.
//! Authentication failures are never retried to avoid account lockouts.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use backon::{ExponentialBuilder, Retryable};
use russh::client;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::auth::{AuthChain, AuthFailure, AuthStrategy, Credentials};
use super::config::{
    ConnectOptions, DEFAULT_PORT, KEEPALIVE_INTERVAL, KEEPALIVE_MAX, MAX_RETRY_DELAY,
};
use super::connection::Connection;
use super::error::RemoteError;
use super::handler::ClientHandler;
use super::types::ConnectionInfo;

/// Build russh client configuration.
///
/// No inactivity timeout: shells may legitimately idle for hours. Keepalives
/// detect a silently dropped peer instead.
pub(crate) fn build_client_config(compress: bool) -> Arc<client::Config> {
    let compression = if compress {
        (&[russh::compression::ZLIB, russh::compression::NONE][..]).into()
    } else {
        (&[russh::compression::NONE][..]).into()
    };

    let preferred = russh::Preferred {
        compression,
        ..Default::default()
    };

    Arc::new(client::Config {
        inactivity_timeout: None,
        keepalive_interval: Some(KEEPALIVE_INTERVAL),
        keepalive_max: KEEPALIVE_MAX,
        preferred,
        ..Default::default()
    })
}

/// A remote host and port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEndpoint {
    pub host: String,
    pub port: u16,
}

impl RemoteEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse `host:port` or `host` (port 22).
    ///
    /// Uses `rsplit_once` so bracketed IPv6 addresses (`[::1]:22`) keep their
    /// colons. The brackets themselves are stripped from the host.
    pub fn parse(address: &str) -> Result<Self, RemoteError> {
        Self::parse_with_default(address, DEFAULT_PORT)
    }

    /// Like [`RemoteEndpoint::parse`], with `default_port` when the address
    /// names no port.
    pub fn parse_with_default(address: &str, default_port: u16) -> Result<Self, RemoteError> {
        let invalid = |reason: String| RemoteError::Dial {
            address: address.to_string(),
            reason,
        };

        let (host, port) = match address.rsplit_once(':') {
            Some((host, port_str)) if !host.contains(':') || host.ends_with(']') => {
                let port = port_str
                    .parse::<u16>()
                    .map_err(|e| invalid(format!("Invalid port number: {}", e)))?;
                (host, port)
            }
            // Bare IPv6 address without brackets or port
            Some(_) => (address, default_port),
            None => (address, default_port),
        };

        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(invalid("Missing host".to_string()));
        }

        Ok(Self::new(host, port))
    }

    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl std::fmt::Display for RemoteEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.address())
    }
}

/// TransportManager: opens authenticated connections.
pub struct TransportManager {
    options: ConnectOptions,
}

impl TransportManager {
    pub fn new(options: ConnectOptions) -> Self {
        Self { options }
    }

    /// Manager configured from the environment.
    pub fn from_env() -> Self {
        Self::new(ConnectOptions::from_env())
    }

    pub fn options(&self) -> &ConnectOptions {
        &self.options
    }

    /// Dial, handshake and authenticate.
    ///
    /// Fails with `Dial` if the endpoint is unreachable or the handshake is
    /// rejected, `Auth` if no credential method is accepted and `Timeout` if
    /// the whole sequence exceeds the connect timeout.
    pub async fn connect(
        &self,
        endpoint: &RemoteEndpoint,
        credentials: &Credentials,
    ) -> Result<Connection, RemoteError> {
        connect_with_retry(endpoint, credentials, &self.options).await
    }
}

/// Convenience wrapper around [`TransportManager::connect`].
pub async fn connect(
    endpoint: &RemoteEndpoint,
    credentials: &Credentials,
    options: &ConnectOptions,
) -> Result<Connection, RemoteError> {
    connect_with_retry(endpoint, credentials, options).await
}

async fn connect_with_retry(
    endpoint: &RemoteEndpoint,
    credentials: &Credentials,
    options: &ConnectOptions,
) -> Result<Connection, RemoteError> {
    let attempt_counter = AtomicU32::new(0);
    let username = credentials.username();

    let backoff = ExponentialBuilder::default()
        .with_min_delay(options.retry_delay)
        .with_max_delay(MAX_RETRY_DELAY)
        .with_max_times(options.max_retries as usize)
        .with_jitter();

    let result = (|| async {
        let current_attempt = attempt_counter.fetch_add(1, Ordering::SeqCst);

        if current_attempt > 0 {
            warn!(
                "SSH connection retry attempt {} to {}@{}",
                current_attempt, username, endpoint
            );
        }

        connect_once(endpoint, credentials, options).await
    })
    .retry(backoff)
    .when(|e: &RemoteError| {
        let retryable = e.is_retryable();
        if !retryable && options.max_retries > 0 {
            warn!(
                "SSH connection to {}@{} failed with non-retryable error: {}",
                username, endpoint, e
            );
        }
        retryable
    })
    .notify(|err, dur| {
        warn!("SSH connection failed: {}. Retrying in {:?}", err, dur);
    })
    .await;

    let total_attempts = attempt_counter.load(Ordering::SeqCst);
    let retry_count = total_attempts.saturating_sub(1);

    match result {
        Ok(handle) => {
            let info = ConnectionInfo {
                connection_id: Uuid::new_v4().to_string(),
                host: endpoint.host.clone(),
                port: endpoint.port,
                username: username.to_string(),
                connected_at: chrono::Utc::now().to_rfc3339(),
                compression_enabled: options.compression,
                retry_attempts: retry_count,
            };

            info!(
                "Connected to {}@{} as {}{}",
                username,
                endpoint,
                info.connection_id,
                if retry_count > 0 {
                    format!(" after {} retry attempt(s)", retry_count)
                } else {
                    String::new()
                }
            );

            Ok(Connection::new(
                handle,
                info,
                options.max_sessions,
                options.chunk_size,
            ))
        }
        Err(e) => {
            error!(
                "SSH connection to {}@{} failed after {} attempt(s). Last error: {}",
                username, endpoint, total_attempts, e
            );
            Err(e)
        }
    }
}

/// One attempt: handshake and authentication under a single timeout.
async fn connect_once(
    endpoint: &RemoteEndpoint,
    credentials: &Credentials,
    options: &ConnectOptions,
) -> Result<client::Handle<ClientHandler>, RemoteError> {
    let timeout = options.connect_timeout;

    match tokio::time::timeout(
        timeout,
        handshake_and_authenticate(endpoint, credentials, options),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => Err(RemoteError::Timeout {
            address: endpoint.address(),
            after: timeout,
        }),
    }
}

async fn handshake_and_authenticate(
    endpoint: &RemoteEndpoint,
    credentials: &Credentials,
    options: &ConnectOptions,
) -> Result<client::Handle<ClientHandler>, RemoteError> {
    let config = build_client_config(options.compression);
    let handler = ClientHandler::new(
        endpoint.host.clone(),
        endpoint.port,
        options.host_key_policy.clone(),
    );

    let mut handle = client::connect(config, (endpoint.host.as_str(), endpoint.port), handler)
        .await
        .map_err(|e| RemoteError::Dial {
            address: endpoint.address(),
            reason: e.to_string(),
        })?;

    let chain = AuthChain::from_credentials(credentials);
    debug!(
        "Authenticating {} with {:?}",
        credentials.username(),
        chain.names()
    );

    let accepted = chain
        .authenticate(&mut handle, credentials.username())
        .await
        .map_err(|failure| auth_error(endpoint, credentials.username(), failure))?;

    if !accepted {
        return Err(auth_error(
            endpoint,
            credentials.username(),
            AuthFailure::Unavailable("no authentication methods succeeded".to_string()),
        ));
    }

    Ok(handle)
}

/// Rejected or untried credentials are `Auth`; a transport that fails
/// mid-authentication is `Dial`.
fn auth_error(endpoint: &RemoteEndpoint, username: &str, failure: AuthFailure) -> RemoteError {
    match failure {
        AuthFailure::Unavailable(reason) => RemoteError::Auth {
            user: username.to_string(),
            reason,
        },
        AuthFailure::Transport(reason) => RemoteError::Dial {
            address: endpoint.address(),
            reason,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod endpoint_parsing {
        use super::*;

        #[test]
        fn test_host_with_port() {
            let endpoint = RemoteEndpoint::parse("192.168.1.1:2222").unwrap();
            assert_eq!(endpoint.host, "192.168.1.1");
            assert_eq!(endpoint.port, 2222);
        }

        #[test]
        fn test_host_without_port_defaults_to_22() {
            let endpoint = RemoteEndpoint::parse("example.com").unwrap();
            assert_eq!(endpoint.host, "example.com");
            assert_eq!(endpoint.port, 22);
        }

        #[test]
        fn test_invalid_port_is_dial_error() {
            let err = RemoteEndpoint::parse("example.com:invalid").unwrap_err();
            match err {
                RemoteError::Dial { reason, .. } => assert!(reason.contains("Invalid port number")),
                other => panic!("unexpected error: {:?}", other),
            }
        }

        #[test]
        fn test_port_out_of_range() {
            assert!(RemoteEndpoint::parse("example.com:99999").is_err());
        }

        #[test]
        fn test_ipv6_with_port() {
            let endpoint = RemoteEndpoint::parse("[::1]:22").unwrap();
            assert_eq!(endpoint.host, "::1");
            assert_eq!(endpoint.port, 22);
            assert_eq!(endpoint.address(), "[::1]:22");
        }

        #[test]
        fn test_bare_ipv6_defaults_to_22() {
            let endpoint = RemoteEndpoint::parse("fe80::1").unwrap();
            assert_eq!(endpoint.host, "fe80::1");
            assert_eq!(endpoint.port, 22);
        }

        #[test]
        fn test_default_port_applies_only_without_port() {
            let bracketed = RemoteEndpoint::parse_with_default("[::1]:2222", 2200).unwrap();
            assert_eq!((bracketed.host.as_str(), bracketed.port), ("::1", 2222));

            let bare = RemoteEndpoint::parse_with_default("[::1]", 2200).unwrap();
            assert_eq!((bare.host.as_str(), bare.port), ("::1", 2200));

            let named = RemoteEndpoint::parse_with_default("bastion", 2200).unwrap();
            assert_eq!((named.host.as_str(), named.port), ("bastion", 2200));

            let explicit = RemoteEndpoint::parse_with_default("bastion:22", 2200).unwrap();
            assert_eq!(explicit.port, 22);
        }

        #[test]
        fn test_empty_host_is_rejected() {
            assert!(RemoteEndpoint::parse(":22").is_err());
            assert!(RemoteEndpoint::parse("").is_err());
        }

        #[test]
        fn test_display() {
            assert_eq!(RemoteEndpoint::new("localhost", 22).to_string(), "localhost:22");
        }
    }

    mod auth_classification {
        use super::*;
        use crate::remote::error::ErrorKind;

        #[test]
        fn test_rejected_credentials_are_auth() {
            let endpoint = RemoteEndpoint::new("10.0.0.1", 22);
            let err = auth_error(
                &endpoint,
                "deploy",
                AuthFailure::Unavailable("password authentication rejected".to_string()),
            );
            assert!(matches!(err, RemoteError::Auth { ref user, .. } if user == "deploy"));
            assert!(!err.is_retryable());
        }

        #[test]
        fn test_transport_failure_during_auth_is_dial() {
            let endpoint = RemoteEndpoint::new("10.0.0.1", 2222);
            let err = auth_error(
                &endpoint,
                "deploy",
                AuthFailure::Transport("Key authentication failed: Disconnected".to_string()),
            );
            match &err {
                RemoteError::Dial { address, reason } => {
                    assert_eq!(address, "10.0.0.1:2222");
                    assert!(reason.contains("Disconnected"));
                }
                other => panic!("unexpected error: {:?}", other),
            }
            assert_eq!(err.kind(), ErrorKind::Dial);
        }
    }

    mod client_config {
        use super::*;
        use std::time::Duration;

        #[test]
        fn test_keepalive_without_inactivity_timeout() {
            let config = build_client_config(true);
            assert_eq!(config.keepalive_interval, Some(Duration::from_secs(30)));
            assert_eq!(config.keepalive_max, 3);
            assert_eq!(config.inactivity_timeout, None);
        }

        #[test]
        fn test_compression_preferences_are_never_empty() {
            let on = build_client_config(true);
            let off = build_client_config(false);
            assert!(!on.preferred.compression.is_empty());
            assert!(!off.preferred.compression.is_empty());
        }
    }
}
