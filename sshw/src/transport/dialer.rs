//! Session dialing: direct, or tunneled through one jump host.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, info, warn};
use russh::Channel;
use russh::client::{self, Handle, Msg};
use secrecy::SecretString;
use tokio::io::{AsyncRead, AsyncWrite};

use super::config::{DEFAULT_CONNECT_TIMEOUT, DialConfig, HostKeyVerification};
use super::handler::{ClientHandler, HostKeyErrorSlot};
use crate::auth::{AuthResolver, CredentialCandidate, Prompter, ask_blocking, authenticate};
use crate::error::{AuthError, RelayError, Result, TransportError};
use crate::profile::ConnectionProfile;
use crate::session::SessionState;

/// An authenticated transport to the target, plus the jump hop it rides on.
pub struct Connection {
    handle: Arc<Handle<ClientHandler>>,
    /// Kept alive for as long as the tunnel is in use.
    jump: Option<Handle<ClientHandler>>,
    config: DialConfig,
}

impl Connection {
    /// Shared transport handle, used for keepalives.
    pub fn handle(&self) -> Arc<Handle<ClientHandler>> {
        Arc::clone(&self.handle)
    }

    /// `user@host:port` of the target.
    pub fn destination(&self) -> String {
        self.config.destination()
    }

    pub fn config(&self) -> &DialConfig {
        &self.config
    }

    /// Whether the target is reached through a jump host.
    pub fn is_tunneled(&self) -> bool {
        self.jump.is_some()
    }

    /// Open the remote command channel.
    pub async fn open_session(&self) -> std::result::Result<Channel<Msg>, RelayError> {
        self.handle
            .channel_open_session()
            .await
            .map_err(RelayError::ChannelOpen)
    }

    /// Disconnect the target and then the jump host.
    pub async fn close(self) {
        if let Err(e) = self
            .handle
            .disconnect(russh::Disconnect::ByApplication, "", "en")
            .await
        {
            debug!("Disconnect from {} failed: {}", self.config.destination(), e);
        }

        if let Some(jump) = self.jump {
            if let Err(e) = jump
                .disconnect(russh::Disconnect::ByApplication, "", "en")
                .await
            {
                debug!("Disconnect from jump host failed: {}", e);
            }
        }
    }
}

/// Opens authenticated transports for profiles.
#[derive(Clone)]
pub struct SessionDialer {
    resolver: AuthResolver,
    prompter: Arc<dyn Prompter>,
    timeout: Duration,
    host_key_verification: HostKeyVerification,
    known_hosts_path: Option<PathBuf>,
}

impl SessionDialer {
    pub fn new(resolver: AuthResolver, prompter: Arc<dyn Prompter>) -> Self {
        Self {
            resolver,
            prompter,
            timeout: DEFAULT_CONNECT_TIMEOUT,
            host_key_verification: HostKeyVerification::default(),
            known_hosts_path: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
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

    fn dial_config(&self, profile: &ConnectionProfile) -> DialConfig {
        DialConfig::for_profile(profile)
            .with_timeout(self.timeout)
            .with_host_key_verification(self.host_key_verification.clone())
            .with_known_hosts_path(self.known_hosts_path.clone())
    }

    /// Dial and authenticate `profile`, tunneling through its first jump
    /// profile when one is configured.
    pub async fn dial(&self, profile: &ConnectionProfile) -> Result<Connection> {
        let mut state = SessionState::Dialing;
        self.dial_tracked(profile, &mut state).await
    }

    /// [`SessionDialer::dial`], recording progress in `state`.
    ///
    /// Each TCP connect enters `Dialing` and each credential exchange
    /// enters `Authenticating`; a failure leaves `state` at `Closed`.
    pub async fn dial_tracked(
        &self,
        profile: &ConnectionProfile,
        state: &mut SessionState,
    ) -> Result<Connection> {
        let result = self.dial_any(profile, state).await;
        if result.is_err() {
            state.advance(SessionState::Closed);
        }
        result
    }

    async fn dial_any(
        &self,
        profile: &ConnectionProfile,
        state: &mut SessionState,
    ) -> Result<Connection> {
        match profile.jump() {
            Some(jump) => {
                if profile.jump_profiles.len() > 1 {
                    warn!(
                        "{} jump hosts configured for {}; multi-hop is not implemented, using {} only",
                        profile.jump_profiles.len(),
                        profile.destination(),
                        jump.destination()
                    );
                }
                self.dial_via_jump(profile, jump, state).await
            }
            None => self.dial_direct(profile, state).await,
        }
    }

    /// Direct dial with one password-prompt retry when every credential
    /// was rejected and no password was among them.
    async fn dial_direct(
        &self,
        profile: &ConnectionProfile,
        state: &mut SessionState,
    ) -> Result<Connection> {
        let config = self.dial_config(profile);
        let mut chain = self.resolver.resolve(profile).await;

        state.advance(SessionState::Dialing);
        let mut handle = self.connect(&config).await?;
        state.advance(SessionState::Authenticating);
        let outcome =
            authenticate(&mut handle, &config.user, &mut chain, self.prompter.clone()).await;
        match outcome {
            Ok(()) => {}
            Err(AuthError::Exhausted {
                password_tried: false,
                ..
            }) => {
                warn!(
                    "All credentials rejected by {}, asking for a password",
                    config.destination()
                );
                disconnect(&handle).await;

                let question = format!("{}@{}'s password:", config.user, config.host);
                let password = ask_blocking(self.prompter.clone(), question, false)
                    .await
                    .map_err(AuthError::from)?;
                // An empty answer retries with the original credentials only
                if !password.is_empty() {
                    chain.push(CredentialCandidate::Password(SecretString::from(password)));
                }

                state.advance(SessionState::Dialing);
                handle = self.connect(&config).await?;
                state.advance(SessionState::Authenticating);
                authenticate(&mut handle, &config.user, &mut chain, self.prompter.clone()).await?;
            }
            Err(e) => return Err(e.into()),
        }

        Ok(Connection {
            handle: Arc::new(handle),
            jump: None,
            config,
        })
    }

    /// Fully authenticate to `jump`, then run the target handshake over a
    /// `direct-tcpip` stream opened by the jump host.
    async fn dial_via_jump(
        &self,
        profile: &ConnectionProfile,
        jump: &ConnectionProfile,
        state: &mut SessionState,
    ) -> Result<Connection> {
        if !jump.jump_profiles.is_empty() {
            warn!(
                "Jump host {} has its own jump hosts; nested jumps are not implemented and are ignored",
                jump.destination()
            );
        }

        let jump_config = self.dial_config(jump);
        let mut jump_chain = self.resolver.resolve(jump).await;
        state.advance(SessionState::Dialing);
        let mut jump_handle = self.connect(&jump_config).await?;
        state.advance(SessionState::Authenticating);
        authenticate(
            &mut jump_handle,
            &jump_config.user,
            &mut jump_chain,
            self.prompter.clone(),
        )
        .await?;
        info!("Jump host {} ready", jump_config.destination());

        let config = self.dial_config(profile);
        let tunnel = jump_handle
            .channel_open_direct_tcpip(config.host.clone(), u32::from(config.port), "127.0.0.1", 0)
            .await
            .map_err(|source| TransportError::Tunnel {
                host: config.host.clone(),
                port: config.port,
                source,
            })?;
        debug!("Tunnel to {} open via {}", config.socket_addr(), jump_config.socket_addr());

        state.advance(SessionState::Dialing);
        let mut handle = self.connect_stream(tunnel.into_stream(), &config).await?;
        let mut chain = self.resolver.resolve(profile).await;
        state.advance(SessionState::Authenticating);
        authenticate(&mut handle, &config.user, &mut chain, self.prompter.clone()).await?;

        Ok(Connection {
            handle: Arc::new(handle),
            jump: Some(jump_handle),
            config,
        })
    }

    /// TCP connect and handshake, bounded by the dial timeout.
    async fn connect(&self, config: &DialConfig) -> Result<Handle<ClientHandler>> {
        debug!("Dialing {}", config.socket_addr());
        let slot = HostKeyErrorSlot::default();
        let handler = ClientHandler::new(config, slot.clone());

        let connected = tokio::time::timeout(
            config.timeout,
            client::connect(client_config(), (config.host.as_str(), config.port), handler),
        )
        .await;

        finish_handshake(connected, config, &slot)
    }

    /// Handshake over an already-open stream, bounded by the dial timeout.
    async fn connect_stream<S>(&self, stream: S, config: &DialConfig) -> Result<Handle<ClientHandler>>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let slot = HostKeyErrorSlot::default();
        let handler = ClientHandler::new(config, slot.clone());

        let connected = tokio::time::timeout(
            config.timeout,
            client::connect_stream(client_config(), stream, handler),
        )
        .await;

        finish_handshake(connected, config, &slot)
    }
}

fn client_config() -> Arc<client::Config> {
    // Idle sessions stay open; liveness is driven by the relay's keepalive.
    Arc::new(client::Config {
        inactivity_timeout: None,
        ..Default::default()
    })
}

fn finish_handshake(
    connected: std::result::Result<
        std::result::Result<Handle<ClientHandler>, russh::Error>,
        tokio::time::error::Elapsed,
    >,
    config: &DialConfig,
    slot: &Mutex<Option<TransportError>>,
) -> Result<Handle<ClientHandler>> {
    let handle = connected
        .map_err(|_| TransportError::DialTimeout {
            host: config.host.clone(),
            port: config.port,
            timeout: config.timeout,
        })?
        .map_err(|e| {
            // If check_server_key stored a detailed error, use that instead
            // of the generic russh::Error::UnknownKey
            match slot.lock().ok().and_then(|mut stored| stored.take()) {
                Some(host_key_error) => host_key_error,
                None => classify(e, config),
            }
        })?;

    debug!("Handshake with {} complete", config.socket_addr());
    Ok(handle)
}

fn classify(error: russh::Error, config: &DialConfig) -> TransportError {
    match error {
        russh::Error::IO(e) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
            TransportError::DialRefused {
                host: config.host.clone(),
                port: config.port,
            }
        }
        russh::Error::IO(source) => TransportError::ConnectionFailed {
            host: config.host.clone(),
            port: config.port,
            source,
        },
        e => TransportError::Ssh(e),
    }
}

async fn disconnect(handle: &Handle<ClientHandler>) {
    if let Err(e) = handle
        .disconnect(russh::Disconnect::ByApplication, "", "en")
        .await
    {
        debug!("Disconnect failed: {}", e);
    }
}
