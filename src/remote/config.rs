//! Configuration resolution for remote sessions.
//!
//! Every knob follows a three-tier priority system:
//!
//! 1. **Parameter** - Explicitly provided value (highest priority)
//! 2. **Environment Variable** - Value from environment variable
//! 3. **Default** - Built-in default value (lowest priority)
//!
//! Unparseable environment values are ignored and the default is used.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `SSH_PORT` | 22 | Remote SSH port |
//! | `SSH_CONNECT_TIMEOUT` | 30s | Handshake + authentication bound in seconds |
//! | `SSH_MAX_RETRIES` | 0 | Opt-in connect retries for transient failures |
//! | `SSH_RETRY_DELAY_MS` | 1000ms | Initial retry delay in milliseconds |
//! | `SSH_COMPRESSION` | true | Enable zlib compression |
//! | `SSH_MAX_SESSIONS` | 10 | Concurrent sessions per connection |
//! | `SSH_TRANSFER_CHUNK_SIZE` | 32768 | Bytes per transfer chunk |
//! | `SSH_HOST_KEY_POLICY` | known-hosts | `known-hosts`, `accept-any`, or comma separated `SHA256:` fingerprints |
//! | `SSH_KNOWN_HOSTS` | `$HOME/.ssh/known_hosts` | known_hosts file for the `known-hosts` policy |

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use super::handler::HostKeyPolicy;

/// Default SSH port
pub(crate) const DEFAULT_PORT: u16 = 22;

/// Default handshake timeout in seconds
pub(crate) const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Connect retries are opt-in
pub(crate) const DEFAULT_MAX_RETRIES: u32 = 0;

/// Default retry delay in milliseconds
pub(crate) const DEFAULT_RETRY_DELAY_MS: u64 = 1000;

/// Maximum retry delay cap
pub(crate) const MAX_RETRY_DELAY: Duration = Duration::from_secs(10);

/// Default number of concurrent sessions per connection (matches OpenSSH `MaxSessions`)
pub(crate) const DEFAULT_MAX_SESSIONS: usize = 10;

/// Default transfer chunk size in bytes
pub(crate) const DEFAULT_CHUNK_SIZE: usize = 32 * 1024;

/// Keepalive interval sent on idle connections
pub(crate) const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Unanswered keepalives before the connection is considered dead
pub(crate) const KEEPALIVE_MAX: usize = 3;

pub(crate) const PORT_ENV_VAR: &str = "SSH_PORT";
pub(crate) const CONNECT_TIMEOUT_ENV_VAR: &str = "SSH_CONNECT_TIMEOUT";
pub(crate) const MAX_RETRIES_ENV_VAR: &str = "SSH_MAX_RETRIES";
pub(crate) const RETRY_DELAY_MS_ENV_VAR: &str = "SSH_RETRY_DELAY_MS";
pub(crate) const COMPRESSION_ENV_VAR: &str = "SSH_COMPRESSION";
pub(crate) const MAX_SESSIONS_ENV_VAR: &str = "SSH_MAX_SESSIONS";
pub(crate) const CHUNK_SIZE_ENV_VAR: &str = "SSH_TRANSFER_CHUNK_SIZE";
pub(crate) const HOST_KEY_POLICY_ENV_VAR: &str = "SSH_HOST_KEY_POLICY";
pub(crate) const KNOWN_HOSTS_ENV_VAR: &str = "SSH_KNOWN_HOSTS";

/// Connection-level settings, fully resolved.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub connect_timeout: Duration,
    pub host_key_policy: HostKeyPolicy,
    pub compression: bool,
    pub max_sessions: usize,
    pub chunk_size: usize,
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            host_key_policy: HostKeyPolicy::KnownHosts(default_known_hosts_path()),
            compression: true,
            max_sessions: DEFAULT_MAX_SESSIONS,
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
        }
    }
}

impl ConnectOptions {
    /// Resolve every setting from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            connect_timeout: Duration::from_secs(resolve_connect_timeout(None)),
            host_key_policy: resolve_host_key_policy(None),
            compression: resolve_compression(None),
            max_sessions: resolve_max_sessions(None),
            chunk_size: resolve_chunk_size(None),
            max_retries: resolve_max_retries(None),
            retry_delay: Duration::from_millis(resolve_retry_delay_ms(None)),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_host_key_policy(mut self, policy: HostKeyPolicy) -> Self {
        self.host_key_policy = policy;
        self
    }

    pub fn with_max_sessions(mut self, max_sessions: usize) -> Self {
        self.max_sessions = max_sessions;
        self
    }

    pub fn with_retries(mut self, max_retries: u32, delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay = delay;
        self
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse::<T>().ok())
}

/// Resolve the remote port with priority: parameter -> env var -> default
pub fn resolve_port(port_param: Option<u16>) -> u16 {
    port_param
        .or_else(|| env_parsed(PORT_ENV_VAR))
        .unwrap_or(DEFAULT_PORT)
}

/// Resolve the connect timeout (seconds) with priority: parameter -> env var -> default
pub(crate) fn resolve_connect_timeout(timeout_param: Option<u64>) -> u64 {
    timeout_param
        .or_else(|| env_parsed(CONNECT_TIMEOUT_ENV_VAR))
        .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS)
}

/// Resolve the max retries value with priority: parameter -> env var -> default
pub(crate) fn resolve_max_retries(max_retries_param: Option<u32>) -> u32 {
    max_retries_param
        .or_else(|| env_parsed(MAX_RETRIES_ENV_VAR))
        .unwrap_or(DEFAULT_MAX_RETRIES)
}

/// Resolve the retry delay value with priority: parameter -> env var -> default
pub(crate) fn resolve_retry_delay_ms(retry_delay_param: Option<u64>) -> u64 {
    retry_delay_param
        .or_else(|| env_parsed(RETRY_DELAY_MS_ENV_VAR))
        .unwrap_or(DEFAULT_RETRY_DELAY_MS)
}

/// Resolve the compression setting with priority: parameter -> env var -> default (true)
pub(crate) fn resolve_compression(compress_param: Option<bool>) -> bool {
    if let Some(compress) = compress_param {
        return compress;
    }

    if let Ok(env_compress) = env::var(COMPRESSION_ENV_VAR) {
        return env_compress.eq_ignore_ascii_case("true") || env_compress == "1";
    }

    true
}

/// Resolve the per-connection session limit. Zero is not a usable limit and falls back.
pub(crate) fn resolve_max_sessions(max_sessions_param: Option<usize>) -> usize {
    max_sessions_param
        .or_else(|| env_parsed(MAX_SESSIONS_ENV_VAR))
        .filter(|n| *n > 0)
        .unwrap_or(DEFAULT_MAX_SESSIONS)
}

/// Resolve the transfer chunk size. Zero falls back to the default.
pub(crate) fn resolve_chunk_size(chunk_size_param: Option<usize>) -> usize {
    chunk_size_param
        .or_else(|| env_parsed(CHUNK_SIZE_ENV_VAR))
        .filter(|n| *n > 0)
        .unwrap_or(DEFAULT_CHUNK_SIZE)
}

/// Resolve the host key policy with priority: parameter -> env var -> known_hosts default.
pub(crate) fn resolve_host_key_policy(policy_param: Option<HostKeyPolicy>) -> HostKeyPolicy {
    if let Some(policy) = policy_param {
        return policy;
    }

    if let Ok(raw) = env::var(HOST_KEY_POLICY_ENV_VAR)
        && let Some(policy) = parse_host_key_policy(&raw)
    {
        return policy;
    }

    HostKeyPolicy::KnownHosts(resolve_known_hosts_path())
}

fn parse_host_key_policy(raw: &str) -> Option<HostKeyPolicy> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("accept-any") {
        return Some(HostKeyPolicy::AcceptAny);
    }
    if raw.eq_ignore_ascii_case("known-hosts") {
        return Some(HostKeyPolicy::KnownHosts(resolve_known_hosts_path()));
    }

    let fingerprints: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|f| f.starts_with("SHA256:"))
        .map(str::to_string)
        .collect();

    if fingerprints.is_empty() {
        None
    } else {
        Some(HostKeyPolicy::Fingerprints(fingerprints))
    }
}

fn resolve_known_hosts_path() -> PathBuf {
    env::var(KNOWN_HOSTS_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| default_known_hosts_path())
}

fn default_known_hosts_path() -> PathBuf {
    env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_default()
        .join(".ssh")
        .join("known_hosts")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    // Use a mutex to serialize env var tests to avoid race conditions
    static ENV_TEST_MUTEX: once_cell::sync::Lazy<StdMutex<()>> =
        once_cell::sync::Lazy::new(|| StdMutex::new(()));

    /// SAFETY: Must be called while holding ENV_TEST_MUTEX to prevent data races.
    unsafe fn set_env(key: &str, value: &str) {
        // SAFETY: Caller ensures ENV_TEST_MUTEX is held
        unsafe { env::set_var(key, value) };
    }

    /// SAFETY: Must be called while holding ENV_TEST_MUTEX to prevent data races.
    unsafe fn remove_env(key: &str) {
        // SAFETY: Caller ensures ENV_TEST_MUTEX is held
        unsafe { env::remove_var(key) };
    }

    /// Run `f` with `key` set to `value`, restoring an unset variable afterwards.
    fn with_env<T>(key: &str, value: &str, f: impl FnOnce() -> T) -> T {
        let _guard = ENV_TEST_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        // SAFETY: Holding ENV_TEST_MUTEX, no concurrent env access
        unsafe { set_env(key, value) };
        let result = f();
        // SAFETY: Holding ENV_TEST_MUTEX, no concurrent env access
        unsafe { remove_env(key) };
        result
    }

    fn without_env<T>(key: &str, f: impl FnOnce() -> T) -> T {
        let _guard = ENV_TEST_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        // SAFETY: Holding ENV_TEST_MUTEX, no concurrent env access
        unsafe { remove_env(key) };
        f()
    }

    mod port {
        use super::*;

        #[test]
        fn test_param_takes_priority_over_env() {
            let port = with_env(PORT_ENV_VAR, "2222", || resolve_port(Some(2200)));
            assert_eq!(port, 2200);
        }

        #[test]
        fn test_uses_env_var_when_no_param() {
            let port = with_env(PORT_ENV_VAR, "2222", || resolve_port(None));
            assert_eq!(port, 2222);
        }

        #[test]
        fn test_out_of_range_env_falls_back() {
            let port = with_env(PORT_ENV_VAR, "70000", || resolve_port(None));
            assert_eq!(port, DEFAULT_PORT);
        }

        #[test]
        fn test_default_port() {
            let port = without_env(PORT_ENV_VAR, || resolve_port(None));
            assert_eq!(port, 22);
        }
    }

    mod connect_timeout {
        use super::*;

        #[test]
        fn test_uses_param_when_provided() {
            assert_eq!(resolve_connect_timeout(Some(60)), 60);
        }

        #[test]
        fn test_uses_env_var_when_no_param() {
            let timeout = with_env(CONNECT_TIMEOUT_ENV_VAR, "90", || {
                resolve_connect_timeout(None)
            });
            assert_eq!(timeout, 90);
        }

        #[test]
        fn test_ignores_negative_env_var() {
            let timeout = with_env(CONNECT_TIMEOUT_ENV_VAR, "-10", || {
                resolve_connect_timeout(None)
            });
            assert_eq!(timeout, DEFAULT_CONNECT_TIMEOUT_SECS);
        }
    }

    mod retries {
        use super::*;

        #[test]
        fn test_retries_are_opt_in() {
            let retries = without_env(MAX_RETRIES_ENV_VAR, || resolve_max_retries(None));
            assert_eq!(retries, 0);
        }

        #[test]
        fn test_env_enables_retries() {
            let retries = with_env(MAX_RETRIES_ENV_VAR, "4", || resolve_max_retries(None));
            assert_eq!(retries, 4);
        }

        #[test]
        fn test_retry_delay_ignores_garbage() {
            let delay = with_env(RETRY_DELAY_MS_ENV_VAR, "soon", || {
                resolve_retry_delay_ms(None)
            });
            assert_eq!(delay, DEFAULT_RETRY_DELAY_MS);
        }

        #[test]
        fn test_max_retry_delay_is_reasonable() {
            assert!(MAX_RETRY_DELAY.as_secs() >= 5);
            assert!(MAX_RETRY_DELAY.as_secs() <= 60);
        }
    }

    mod compression {
        use super::*;

        #[test]
        fn test_default_enabled() {
            assert!(without_env(COMPRESSION_ENV_VAR, || resolve_compression(None)));
        }

        #[test]
        fn test_env_accepts_one_and_true() {
            assert!(with_env(COMPRESSION_ENV_VAR, "1", || resolve_compression(None)));
            assert!(with_env(COMPRESSION_ENV_VAR, "TRUE", || resolve_compression(None)));
            assert!(!with_env(COMPRESSION_ENV_VAR, "off", || resolve_compression(None)));
        }

        #[test]
        fn test_param_overrides_env() {
            assert!(!with_env(COMPRESSION_ENV_VAR, "true", || {
                resolve_compression(Some(false))
            }));
        }
    }

    mod limits {
        use super::*;

        #[test]
        fn test_zero_sessions_falls_back() {
            assert_eq!(resolve_max_sessions(Some(0)), DEFAULT_MAX_SESSIONS);
            let n = with_env(MAX_SESSIONS_ENV_VAR, "0", || resolve_max_sessions(None));
            assert_eq!(n, DEFAULT_MAX_SESSIONS);
        }

        #[test]
        fn test_sessions_from_env() {
            let n = with_env(MAX_SESSIONS_ENV_VAR, "25", || resolve_max_sessions(None));
            assert_eq!(n, 25);
        }

        #[test]
        fn test_chunk_size_from_param() {
            assert_eq!(resolve_chunk_size(Some(4096)), 4096);
            assert_eq!(resolve_chunk_size(Some(0)), DEFAULT_CHUNK_SIZE);
        }
    }

    mod host_key_policy {
        use super::*;

        #[test]
        fn test_accept_any_must_be_explicit() {
            let policy = without_env(HOST_KEY_POLICY_ENV_VAR, || resolve_host_key_policy(None));
            assert!(matches!(policy, HostKeyPolicy::KnownHosts(_)));
        }

        #[test]
        fn test_env_accept_any() {
            let policy = with_env(HOST_KEY_POLICY_ENV_VAR, "Accept-Any", || {
                resolve_host_key_policy(None)
            });
            assert!(matches!(policy, HostKeyPolicy::AcceptAny));
        }

        #[test]
        fn test_env_fingerprints() {
            let policy = with_env(
                HOST_KEY_POLICY_ENV_VAR,
                "SHA256:abc, SHA256:def ,md5:zzz",
                || resolve_host_key_policy(None),
            );
            match policy {
                HostKeyPolicy::Fingerprints(list) => {
                    assert_eq!(list, vec!["SHA256:abc", "SHA256:def"]);
                }
                other => panic!("unexpected policy {:?}", other),
            }
        }

        #[test]
        fn test_unrecognized_env_falls_back_to_known_hosts() {
            let policy = with_env(HOST_KEY_POLICY_ENV_VAR, "trust-me", || {
                resolve_host_key_policy(None)
            });
            assert!(matches!(policy, HostKeyPolicy::KnownHosts(_)));
        }

        #[test]
        fn test_param_wins() {
            let policy = with_env(HOST_KEY_POLICY_ENV_VAR, "known-hosts", || {
                resolve_host_key_policy(Some(HostKeyPolicy::AcceptAny))
            });
            assert!(matches!(policy, HostKeyPolicy::AcceptAny));
        }
    }
}
