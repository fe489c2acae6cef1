//! # sshw
//!
//! Async SSH login launcher.
//!
//! sshw takes a connection profile (host, user, credentials, optional jump
//! host, commands to type after login), authenticates with whatever the
//! profile offers, and relays the local terminal to a remote interactive
//! shell.
//!
//! ## Features
//!
//! - Async SSH connections via russh
//! - Credential chain: agent, key file, default key, password, keyboard-interactive
//! - One password-prompt retry when every configured credential is rejected
//! - Single jump host tunneling over `direct-tcpip`
//! - Raw-mode terminal relay with resize propagation and keepalives
//! - Pluggable host key verification (known_hosts, pinned fingerprint, or none)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sshw::{ConnectionProfile, LoginContext, login};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), sshw::Error> {
//!     let profile = ConnectionProfile {
//!         user: "admin".into(),
//!         password: "secret".into(),
//!         ..ConnectionProfile::new("lab", "192.168.1.1")
//!     };
//!
//!     let outcome = login(&LoginContext::new(), &profile).await?;
//!     println!("remote exit status: {:?}", outcome.exit_status);
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod config;
pub mod context;
pub mod error;
mod login;
pub mod profile;
pub mod relay;
pub mod session;
pub mod transport;

// Re-export main types for convenience
pub use auth::{AuthResolver, CredentialCandidate, CredentialChain, Prompter, TerminalPrompter};
pub use config::ProfileTree;
pub use context::LoginContext;
pub use error::{Error, Result};
pub use login::{login, login_with};
pub use profile::{CallbackCommand, ConnectionProfile};
pub use relay::{RelayConfig, RelayOutcome, TerminalRelay};
pub use session::{ActiveSession, SessionState};
pub use transport::{Connection, HostKeyVerification, SessionDialer};
