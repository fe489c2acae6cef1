//! Credential resolution and negotiation.
//!
//! [`AuthResolver`] turns a [`ConnectionProfile`] into a [`CredentialChain`]
//! in fixed priority order:
//!
//! 1. agent-backed signer (`agentpath`)
//! 2. explicit key file (`keypath` + `passphrase`)
//! 3. default key file, only when no explicit key is configured
//! 4. static password
//! 5. keyboard-interactive challenge, always last
//!
//! Provider failures are logged and skipped; resolution itself never fails.
//! [`authenticate`] then offers each candidate to the server in order.

pub mod agent;
pub mod key;
mod negotiate;
pub mod prompt;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use russh::keys::PrivateKey;
use secrecy::SecretString;

pub use agent::{AgentAddress, AgentSigner};
pub use key::{default_key_path, load_key};
pub use negotiate::authenticate;
pub use prompt::{Prompter, TerminalPrompter, answer_challenge, ask_blocking};

use crate::error::AuthError;
use crate::profile::{ConnectionProfile, expand_tilde};

/// Default time allowed for reaching the agent.
pub const DEFAULT_AGENT_TIMEOUT: Duration = Duration::from_secs(10);

/// One authentication method to offer during negotiation.
pub enum CredentialCandidate {
    /// Signatures produced by a connected agent.
    Agent(AgentSigner),

    /// Key loaded from disk.
    KeyFile { path: PathBuf, key: Arc<PrivateKey> },

    /// Static password.
    Password(SecretString),

    /// Keyboard-interactive challenge answered on the terminal.
    KeyboardInteractive,
}

impl CredentialCandidate {
    /// Short method name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Agent(_) => "agent",
            Self::KeyFile { .. } => "publickey",
            Self::Password(_) => "password",
            Self::KeyboardInteractive => "keyboard-interactive",
        }
    }
}

impl fmt::Debug for CredentialCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Agent(signer) => f.debug_tuple("Agent").field(signer.address()).finish(),
            Self::KeyFile { path, .. } => f.debug_struct("KeyFile").field("path", path).finish(),
            Self::Password(_) => f.write_str("Password(..)"),
            Self::KeyboardInteractive => f.write_str("KeyboardInteractive"),
        }
    }
}

/// Ordered credential candidates; the last entry is always keyboard-interactive.
#[derive(Debug)]
pub struct CredentialChain {
    candidates: Vec<CredentialCandidate>,
    /// Providers that were configured but could not produce a candidate.
    skipped: Vec<AuthError>,
}

impl Default for CredentialChain {
    fn default() -> Self {
        Self::interactive_only()
    }
}

impl CredentialChain {
    /// A chain holding only the interactive fallback.
    pub fn interactive_only() -> Self {
        Self {
            candidates: vec![CredentialCandidate::KeyboardInteractive],
            skipped: Vec::new(),
        }
    }

    /// Add a candidate ahead of the interactive fallback.
    pub fn push(&mut self, candidate: CredentialCandidate) {
        if matches!(candidate, CredentialCandidate::KeyboardInteractive) {
            return;
        }
        let at = self.candidates.len().saturating_sub(1);
        self.candidates.insert(at, candidate);
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Method names in offer order.
    pub fn kinds(&self) -> Vec<&'static str> {
        self.candidates.iter().map(CredentialCandidate::kind).collect()
    }

    /// Whether a static password is part of the chain.
    pub fn has_password(&self) -> bool {
        self.candidates
            .iter()
            .any(|c| matches!(c, CredentialCandidate::Password(_)))
    }

    /// Configured providers left out of the chain, as `CredentialUnavailable`.
    pub fn skipped(&self) -> &[AuthError] {
        &self.skipped
    }

    fn skip(&mut self, destination: &str, provider: &str, error: AuthError) {
        let error = AuthError::CredentialUnavailable {
            provider: provider.to_string(),
            reason: error.to_string(),
        };
        warn!("[{}] {}", destination, error);
        self.skipped.push(error);
    }

    pub fn iter(&self) -> impl Iterator<Item = &CredentialCandidate> {
        self.candidates.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut CredentialCandidate> {
        self.candidates.iter_mut()
    }
}

/// Builds credential chains from profiles.
#[derive(Debug, Clone)]
pub struct AuthResolver {
    default_key_path: Option<PathBuf>,
    agent_timeout: Duration,
}

impl Default for AuthResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthResolver {
    /// Resolver using `~/.ssh/id_rsa` as the default key.
    pub fn new() -> Self {
        Self {
            default_key_path: default_key_path(),
            agent_timeout: DEFAULT_AGENT_TIMEOUT,
        }
    }

    /// Override (or disable, with `None`) the default key location.
    pub fn with_default_key_path(mut self, path: Option<PathBuf>) -> Self {
        self.default_key_path = path;
        self
    }

    pub fn with_agent_timeout(mut self, timeout: Duration) -> Self {
        self.agent_timeout = timeout;
        self
    }

    /// Produce the credential chain for `profile`.
    pub async fn resolve(&self, profile: &ConnectionProfile) -> CredentialChain {
        let mut chain = CredentialChain::interactive_only();
        let destination = profile.destination();

        if !profile.agent_path.is_empty() {
            match AgentSigner::connect(&profile.agent_path, self.agent_timeout).await {
                Ok(signer) => chain.push(CredentialCandidate::Agent(signer)),
                Err(e) => chain.skip(&destination, "agent", e),
            }
        }

        if !profile.key_path.is_empty() {
            let path = expand_tilde(&profile.key_path);
            match key::load_key_at(&path, &profile.passphrase).await {
                Ok(key) => chain.push(CredentialCandidate::KeyFile {
                    path,
                    key: Arc::new(key),
                }),
                Err(e) => chain.skip(&destination, "publickey", e),
            }
        } else if let Some(path) = &self.default_key_path {
            match key::load_key_at(path, "").await {
                Ok(key) => chain.push(CredentialCandidate::KeyFile {
                    path: path.clone(),
                    key: Arc::new(key),
                }),
                Err(e) => debug!("[{}] default key not used: {}", destination, e),
            }
        }

        if !profile.password.is_empty() {
            chain.push(CredentialCandidate::Password(SecretString::from(
                profile.password.clone(),
            )));
        }

        debug!("[{}] credential chain: {:?}", destination, chain.kinds());
        chain
    }
}
