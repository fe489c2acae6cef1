//! Active session lifecycle.

use std::fmt;

use log::{debug, info, warn};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::{RelayError, Result};
use crate::profile::CallbackCommand;
use crate::relay::{LocalTerminal, RelayOutcome, RemoteShell, TerminalRelay};
use crate::transport::Connection;

/// Where a login attempt currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Dialing,
    Authenticating,
    PtyRequested,
    ShellRunning,
    Closing,
    Closed,
}

impl SessionState {
    /// Move to `next`, logging the transition.
    pub fn advance(&mut self, next: SessionState) {
        debug!("Session state {} -> {}", self, next);
        *self = next;
    }

    /// Whether the shell was ever started.
    pub fn reached_shell(self) -> bool {
        matches!(self, Self::ShellRunning | Self::Closing)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Dialing => "dialing",
            Self::Authenticating => "authenticating",
            Self::PtyRequested => "pty-requested",
            Self::ShellRunning => "shell-running",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// An authenticated connection about to host, or hosting, an interactive shell.
///
/// Dropping or finishing the session always closes the transport.
pub struct ActiveSession {
    connection: Connection,
    state: SessionState,
}

impl ActiveSession {
    /// Wrap a freshly authenticated connection, continuing from the state
    /// the dial left behind.
    pub fn new(connection: Connection, state: SessionState) -> Self {
        Self { connection, state }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn destination(&self) -> String {
        self.connection.destination()
    }

    /// Open the session channel and relay the terminal until the shell ends,
    /// then close the transport.
    pub async fn run<T, I, O, E>(
        mut self,
        relay: &TerminalRelay<T>,
        callbacks: &[CallbackCommand],
        stdin: I,
        stdout: &mut O,
        stderr: &mut E,
    ) -> Result<RelayOutcome>
    where
        T: LocalTerminal,
        I: AsyncRead + Unpin + Send + 'static,
        O: AsyncWrite + Unpin,
        E: AsyncWrite + Unpin,
    {
        let destination = self.destination();
        let result = self.relay(relay, callbacks, stdin, stdout, stderr).await;

        let Self {
            connection,
            mut state,
        } = self;
        connection.close().await;
        if !state.reached_shell() {
            warn!("Session to {} ended before the shell started", destination);
        }
        state.advance(SessionState::Closed);
        info!("Session to {} closed", destination);

        result.map_err(Into::into)
    }

    async fn relay<T, I, O, E>(
        &mut self,
        relay: &TerminalRelay<T>,
        callbacks: &[CallbackCommand],
        stdin: I,
        stdout: &mut O,
        stderr: &mut E,
    ) -> std::result::Result<RelayOutcome, RelayError>
    where
        T: LocalTerminal,
        I: AsyncRead + Unpin + Send + 'static,
        O: AsyncWrite + Unpin,
        E: AsyncWrite + Unpin,
    {
        let channel = self.connection.open_session().await?;
        relay
            .run(
                RemoteShell::new(channel),
                self.connection.handle(),
                callbacks,
                stdin,
                stdout,
                stderr,
                &mut self.state,
            )
            .await
    }
}
