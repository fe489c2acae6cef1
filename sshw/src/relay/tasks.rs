//! Background tasks supervised by the relay loop.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::channel::KeepaliveSink;
use super::terminal::{LocalTerminal, TermSize};
use crate::profile::CallbackCommand;

/// Type each command followed by a carriage return, in order, after its delay.
pub async fn write_callbacks<W>(writer: &mut W, callbacks: &[CallbackCommand]) -> io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    for command in callbacks {
        if !command.delay().is_zero() {
            tokio::time::sleep(command.delay()).await;
        }
        debug!("Sending callback command {:?}", command.text);
        writer.write_all(format!("{}\r", command.text).as_bytes()).await?;
        writer.flush().await?;
    }
    Ok(())
}

/// Callback commands first, then local input until either side closes.
///
/// Cancels `shutdown` when done so the relay loop stops waiting on the channel.
pub(crate) async fn forward_input<I, W>(
    callbacks: Vec<CallbackCommand>,
    mut input: I,
    mut writer: W,
    shutdown: CancellationToken,
) where
    I: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let result = async {
        write_callbacks(&mut writer, &callbacks).await?;
        tokio::io::copy(&mut input, &mut writer).await
    }
    .await;

    match result {
        Ok(bytes) => debug!("Local input closed after {} bytes", bytes),
        Err(e) => warn!("Input forwarding stopped: {}", e),
    }
    shutdown.cancel();
}

/// Poll the terminal size and report each change once.
///
/// Stops quietly when the size can no longer be read.
pub(crate) async fn watch_resize<T>(
    terminal: Arc<T>,
    mut last: TermSize,
    period: Duration,
    changes: UnboundedSender<TermSize>,
    shutdown: CancellationToken,
) where
    T: LocalTerminal,
{
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let size = match terminal.size() {
                    Ok(size) => size,
                    Err(e) => {
                        debug!("Terminal size unavailable, stopping resize watch: {}", e);
                        break;
                    }
                };
                if size != last {
                    debug!("Terminal resized {} -> {}", last, size);
                    if changes.send(size).is_err() {
                        break;
                    }
                    last = size;
                }
            }
        }
    }
}

/// Send a keepalive every `period` until cancelled or one fails.
pub(crate) async fn keepalive<K>(sink: Arc<K>, period: Duration, shutdown: CancellationToken)
where
    K: KeepaliveSink,
{
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = sink.ping().await {
                    debug!("Keepalive failed, stopping: {}", e);
                    break;
                }
            }
        }
    }
}
