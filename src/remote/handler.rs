//! russh client handler with an explicit host key verification policy.
//!
//! Trusting every server key is available, but only as the deliberately chosen
//! [`HostKeyPolicy::AcceptAny`]; the default checks `known_hosts`.

use std::path::PathBuf;

use russh::{client, keys};
use tracing::{debug, warn};

/// How the server's host key is verified during the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostKeyPolicy {
    /// Accept any server key (similar to `StrictHostKeyChecking=no`). Insecure.
    AcceptAny,
    /// Accept only keys listed for this host in the given known_hosts file.
    KnownHosts(PathBuf),
    /// Accept only keys whose SHA256 fingerprint (`SHA256:...`) is listed.
    Fingerprints(Vec<String>),
}

/// Client handler bound to one endpoint.
pub struct ClientHandler {
    host: String,
    port: u16,
    policy: HostKeyPolicy,
}

impl ClientHandler {
    pub fn new(host: impl Into<String>, port: u16, policy: HostKeyPolicy) -> Self {
        Self {
            host: host.into(),
            port,
            policy,
        }
    }

    fn verify(&self, key: &keys::PublicKey) -> bool {
        match &self.policy {
            HostKeyPolicy::AcceptAny => {
                warn!(
                    "Accepting host key for {}:{} without verification",
                    self.host, self.port
                );
                true
            }
            HostKeyPolicy::Fingerprints(allowed) => {
                let fingerprint = key.fingerprint(keys::HashAlg::Sha256).to_string();
                let accepted = allowed.iter().any(|f| f == &fingerprint);
                debug!(
                    "Host key {} for {}:{} {}",
                    fingerprint,
                    self.host,
                    self.port,
                    if accepted { "matched" } else { "not in allow list" }
                );
                accepted
            }
            HostKeyPolicy::KnownHosts(path) => {
                match keys::check_known_hosts_path(&self.host, self.port, key, path) {
                    Ok(found) => {
                        if !found {
                            warn!(
                                "Host {}:{} not present in {}",
                                self.host,
                                self.port,
                                path.display()
                            );
                        }
                        found
                    }
                    Err(e) => {
                        warn!(
                            "Host key check for {}:{} against {} failed: {}",
                            self.host,
                            self.port,
                            path.display(),
                            e
                        );
                        false
                    }
                }
            }
        }
    }
}

impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(self.verify(server_public_key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    // Keys from the wire carry no comment, and key equality includes it.
    const HOST_KEY: &str =
        "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAILjB7WVb6eUyvukfa44XKsMDfw9A+LyT357HHdWJEEp+";
    const OTHER_KEY: &str =
        "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIMEtr9gfnfd5w+MG319UgaeHB5x+ic1SHHZH06zQnyXo";
    const HOST_FINGERPRINT: &str = "SHA256:5B1yZwgl2PZn/DSlaE2YD3kBXGLCmMNRZ3mgYbfv/3E";

    fn host_key() -> keys::PublicKey {
        keys::PublicKey::from_openssh(HOST_KEY).unwrap()
    }

    #[test]
    fn test_accept_any() {
        let handler = ClientHandler::new("10.0.0.1", 22, HostKeyPolicy::AcceptAny);
        assert!(handler.verify(&host_key()));
    }

    #[test]
    fn test_fingerprint_match() {
        let handler = ClientHandler::new(
            "10.0.0.1",
            22,
            HostKeyPolicy::Fingerprints(vec![HOST_FINGERPRINT.to_string()]),
        );
        assert!(handler.verify(&host_key()));
    }

    #[test]
    fn test_fingerprint_mismatch() {
        let handler = ClientHandler::new(
            "10.0.0.1",
            22,
            HostKeyPolicy::Fingerprints(vec!["SHA256:not-this-one".to_string()]),
        );
        assert!(!handler.verify(&host_key()));
    }

    #[test]
    fn test_known_hosts_with_non_default_port() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[127.0.0.1]:2222 {}", HOST_KEY).unwrap();

        let known = HostKeyPolicy::KnownHosts(file.path().to_path_buf());
        let handler = ClientHandler::new("127.0.0.1", 2222, known.clone());
        assert!(handler.verify(&host_key()));

        let other_host = ClientHandler::new("127.0.0.2", 2222, known);
        assert!(!other_host.verify(&host_key()));
    }

    #[test]
    fn test_known_hosts_changed_key_rejects() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[127.0.0.1]:2222 {}", OTHER_KEY).unwrap();

        let handler = ClientHandler::new(
            "127.0.0.1",
            2222,
            HostKeyPolicy::KnownHosts(file.path().to_path_buf()),
        );
        assert!(!handler.verify(&host_key()));
    }

    #[test]
    fn test_missing_known_hosts_rejects() {
        let dir = tempfile::tempdir().unwrap();
        let handler = ClientHandler::new(
            "127.0.0.1",
            22,
            HostKeyPolicy::KnownHosts(dir.path().join("absent")),
        );
        assert!(!handler.verify(&host_key()));
    }

    #[tokio::test]
    async fn test_handler_reports_policy_decision() {
        use russh::client::Handler;

        let mut handler = ClientHandler::new(
            "10.0.0.1",
            22,
            HostKeyPolicy::Fingerprints(Vec::new()),
        );
        assert!(!handler.check_server_key(&host_key()).await.unwrap());
    }
}
