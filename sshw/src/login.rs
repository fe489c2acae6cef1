//! The login entry point.

use std::sync::Arc;

use log::{error, info};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::context::LoginContext;
use crate::error::Result;
use crate::profile::ConnectionProfile;
use crate::relay::{ControllingTerminal, LocalTerminal, RelayOutcome, TerminalRelay};
use crate::session::{ActiveSession, SessionState};

/// Dial `profile`, authenticate, and relay the controlling terminal until
/// the remote shell ends.
///
/// Failures are logged with the destination before being returned.
pub async fn login(ctx: &LoginContext, profile: &ConnectionProfile) -> Result<RelayOutcome> {
    login_with(
        ctx,
        profile,
        Arc::new(ControllingTerminal),
        tokio::io::stdin(),
        &mut tokio::io::stdout(),
        &mut tokio::io::stderr(),
    )
    .await
}

/// [`login`] against an arbitrary terminal and standard streams.
pub async fn login_with<T, I, O, E>(
    ctx: &LoginContext,
    profile: &ConnectionProfile,
    terminal: Arc<T>,
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
    let destination = profile.destination();

    let mut state = SessionState::Dialing;
    let connection = ctx
        .dialer()
        .dial_tracked(profile, &mut state)
        .await
        .inspect_err(|e| error!("[{}] login failed ({}): {}", destination, state, e))?;
    info!(
        "connect server ssh -p {} {}@{}",
        profile.effective_port(),
        profile.effective_user(),
        profile.host
    );

    let relay = TerminalRelay::new(terminal, ctx.relay_config().clone());
    ActiveSession::new(connection, state)
        .run(&relay, &profile.callback_commands, stdin, stdout, stderr)
        .await
        .inspect_err(|e| error!("[{}] session failed: {}", destination, e))
}
