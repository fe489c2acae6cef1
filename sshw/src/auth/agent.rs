//! Agent bridge: signing through a local SSH agent without touching key material.
//!
//! The agent address is either a socket path (anything containing a path
//! separator after tilde expansion) or a `host:port` pair reached over TCP.

use std::time::Duration;

use log::{debug, info, warn};
use russh::client::{Handle, Handler};
use russh::keys::PublicKey;
use russh::keys::agent::client::{AgentClient, AgentStream};

use crate::error::AuthError;
use crate::profile::expand_tilde;

type DynAgent = AgentClient<Box<dyn AgentStream + Send + Unpin + 'static>>;

/// How an agent address is reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentAddress {
    /// Local domain socket.
    Socket(std::path::PathBuf),
    /// `host:port` stream.
    Tcp(String),
}

impl AgentAddress {
    /// Classify a configured agent path.
    pub fn parse(path: &str) -> Self {
        let expanded = expand_tilde(path);
        let text = expanded.to_string_lossy();
        if text.contains(std::path::MAIN_SEPARATOR) || text.contains('/') {
            Self::Socket(expanded)
        } else {
            Self::Tcp(text.into_owned())
        }
    }
}

impl std::fmt::Display for AgentAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Socket(path) => write!(f, "{}", path.display()),
            Self::Tcp(addr) => f.write_str(addr),
        }
    }
}

/// Connected agent that signs authentication challenges on demand.
pub struct AgentSigner {
    address: AgentAddress,
    agent: DynAgent,
}

impl std::fmt::Debug for AgentSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentSigner")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl AgentSigner {
    /// Connect to the agent at `path`, giving up after `timeout`.
    pub async fn connect(path: &str, timeout: Duration) -> Result<Self, AuthError> {
        let address = AgentAddress::parse(path);
        debug!("Connecting to agent at {}", address);

        let agent = tokio::time::timeout(timeout, Self::open(&address))
            .await
            .map_err(|_| AuthError::AgentTimeout {
                address: address.to_string(),
                timeout,
            })??;

        info!("Connected to agent at {}", address);
        Ok(Self { address, agent })
    }

    async fn open(address: &AgentAddress) -> Result<DynAgent, AuthError> {
        let failed = |e: std::io::Error| AuthError::Agent {
            address: address.to_string(),
            reason: e.to_string(),
        };

        match address {
            #[cfg(unix)]
            AgentAddress::Socket(path) => {
                let stream = tokio::net::UnixStream::connect(path).await.map_err(failed)?;
                Ok(AgentClient::connect(stream).dynamic())
            }
            #[cfg(not(unix))]
            AgentAddress::Socket(_) => Err(AuthError::Agent {
                address: address.to_string(),
                reason: "domain sockets are not supported on this platform".to_string(),
            }),
            AgentAddress::Tcp(addr) => {
                let stream = tokio::net::TcpStream::connect(addr.as_str())
                    .await
                    .map_err(failed)?;
                Ok(AgentClient::connect(stream).dynamic())
            }
        }
    }

    pub fn address(&self) -> &AgentAddress {
        &self.address
    }

    /// Public keys the agent is willing to sign with.
    pub async fn identities(&mut self) -> Result<Vec<PublicKey>, AuthError> {
        self.agent
            .request_identities()
            .await
            .map_err(|e| AuthError::Agent {
                address: self.address.to_string(),
                reason: format!("failed to list identities: {e}"),
            })
    }

    /// Offer each agent identity to the server until one is accepted.
    ///
    /// Returns `Ok(false)` when the agent holds no key the server accepts.
    pub async fn authenticate<H>(
        &mut self,
        handle: &mut Handle<H>,
        user: &str,
    ) -> Result<bool, AuthError>
    where
        H: Handler,
    {
        let keys = self.identities().await?;
        if keys.is_empty() {
            debug!("Agent at {} holds no keys", self.address);
            return Ok(false);
        }

        let hash_alg = handle.best_supported_rsa_hash().await?.flatten();

        for key in keys {
            debug!("Offering agent key {} ({})", key.algorithm(), key.comment());
            match handle
                .authenticate_publickey_with(user, key.clone(), hash_alg, &mut self.agent)
                .await
            {
                Ok(result) if result.success() => return Ok(true),
                Ok(_) => debug!("Agent key {} rejected", key.comment()),
                Err(e) => warn!("Agent signing failed for key {}: {}", key.comment(), e),
            }
        }

        Ok(false)
    }
}
