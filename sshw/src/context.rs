//! Per-process login context.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::{
    AuthResolver, DEFAULT_AGENT_TIMEOUT, Prompter, TerminalPrompter, default_key_path,
};
use crate::relay::RelayConfig;
use crate::transport::{DEFAULT_CONNECT_TIMEOUT, HostKeyVerification, SessionDialer};

/// Everything a login needs besides the profile itself.
///
/// Built once at startup and passed explicitly to [`crate::login`].
///
/// # Example
///
/// ```rust,no_run
/// use std::time::Duration;
/// use sshw::{HostKeyVerification, LoginContext};
///
/// let ctx = LoginContext::new()
///     .with_connect_timeout(Duration::from_secs(5))
///     .with_host_key_verification(HostKeyVerification::Strict);
/// ```
#[derive(Clone)]
pub struct LoginContext {
    connect_timeout: Duration,
    agent_timeout: Duration,
    host_key_verification: HostKeyVerification,
    known_hosts_path: Option<PathBuf>,
    default_key_path: Option<PathBuf>,
    prompter: Arc<dyn Prompter>,
    relay: RelayConfig,
}

impl Default for LoginContext {
    fn default() -> Self {
        Self::new()
    }
}

impl LoginContext {
    pub fn new() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            agent_timeout: DEFAULT_AGENT_TIMEOUT,
            host_key_verification: HostKeyVerification::default(),
            known_hosts_path: None,
            default_key_path: default_key_path(),
            prompter: Arc::new(TerminalPrompter),
            relay: RelayConfig::default(),
        }
    }

    /// Limit on TCP connect plus handshake, per hop.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_agent_timeout(mut self, timeout: Duration) -> Self {
        self.agent_timeout = timeout;
        self
    }

    pub fn with_host_key_verification(mut self, verification: HostKeyVerification) -> Self {
        self.host_key_verification = verification;
        self
    }

    pub fn with_known_hosts_path(mut self, path: Option<PathBuf>) -> Self {
        self.known_hosts_path = path;
        self
    }

    /// Key tried when a profile has none; `None` disables it.
    pub fn with_default_key_path(mut self, path: Option<PathBuf>) -> Self {
        self.default_key_path = path;
        self
    }

    /// Source of interactive answers.
    pub fn with_prompter(mut self, prompter: Arc<dyn Prompter>) -> Self {
        self.prompter = prompter;
        self
    }

    pub fn with_relay_config(mut self, relay: RelayConfig) -> Self {
        self.relay = relay;
        self
    }

    pub fn host_key_verification(&self) -> &HostKeyVerification {
        &self.host_key_verification
    }

    pub fn relay_config(&self) -> &RelayConfig {
        &self.relay
    }

    pub fn prompter(&self) -> Arc<dyn Prompter> {
        Arc::clone(&self.prompter)
    }

    /// Credential resolver configured from this context.
    pub fn resolver(&self) -> AuthResolver {
        AuthResolver::new()
            .with_default_key_path(self.default_key_path.clone())
            .with_agent_timeout(self.agent_timeout)
    }

    /// Dialer configured from this context.
    pub fn dialer(&self) -> SessionDialer {
        SessionDialer::new(self.resolver(), self.prompter())
            .with_timeout(self.connect_timeout)
            .with_host_key_verification(self.host_key_verification.clone())
            .with_known_hosts_path(self.known_hosts_path.clone())
    }
}
