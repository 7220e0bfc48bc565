//! Authentication strategies for remote connections.
//!
//! Callers describe what they can authenticate with as [`Credentials`]; the
//! transport turns those into an [`AuthChain`] of [`AuthStrategy`]
//! implementations and tries them in order until one succeeds.
//!
//! # Available Strategies
//!
//! - [`PasswordAuth`]: Password-based authentication
//! - [`KeyAuth`]: Private key authentication, from a file or in-memory PEM
//! - [`AgentAuth`]: SSH agent authentication
//!
//! # Example
//!
//! ```ignore
//! use remote_session::remote::auth::Credentials;
//!
//! let creds = Credentials::new("deploy")
//!     .with_key_file("/home/deploy/.ssh/id_ed25519", None)
//!     .with_password("fallback");
//! ```

mod agent;
mod chain;
mod credentials;
mod key;
mod password;
mod traits;

pub use agent::AgentAuth;
pub use chain::AuthChain;
pub use credentials::{AuthMethod, Credentials};
pub use key::KeyAuth;
pub use password::PasswordAuth;
pub use traits::{AuthFailure, AuthStrategy};
