//! Remote side of the relay: the session channel.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;

use log::debug;
use russh::client::{self, Handle, Msg};
use russh::{Channel, ChannelMsg, Pty};
use tokio::io::AsyncWrite;

use super::terminal::TermSize;
use crate::error::ChannelRequestError;

/// Output of the remote shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellEvent {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
    /// Remote process exit status.
    Exit(u32),
}

/// Session channel operations the relay needs.
pub trait ShellChannel: Send {
    /// Request a pseudo-terminal.
    fn allocate_pty(
        &mut self,
        term: &str,
        size: TermSize,
        modes: &[(Pty, u32)],
    ) -> impl Future<Output = Result<(), ChannelRequestError>> + Send;

    /// Start the login shell.
    fn start_shell(&mut self) -> impl Future<Output = Result<(), ChannelRequestError>> + Send;

    /// Writable handle to the remote standard input.
    fn input_writer(&self) -> Pin<Box<dyn AsyncWrite + Send>>;

    /// Notify the remote side of new terminal dimensions.
    fn resize(
        &mut self,
        size: TermSize,
    ) -> impl Future<Output = Result<(), ChannelRequestError>> + Send;

    /// Next output event; `None` once the channel is closed.
    fn recv_event(&mut self) -> impl Future<Output = Option<ShellEvent>> + Send;

    /// Send EOF and close the channel.
    fn shutdown(&mut self) -> impl Future<Output = ()> + Send;
}

/// Transport liveness check.
pub trait KeepaliveSink: Send + Sync + 'static {
    fn ping(&self) -> impl Future<Output = Result<(), russh::Error>> + Send;
}

impl<H> KeepaliveSink for Handle<H>
where
    H: client::Handler + 'static,
{
    async fn ping(&self) -> Result<(), russh::Error> {
        // keepalive@openssh.com, no reply requested
        self.send_keepalive(false).await
    }
}

/// A russh session channel driven as an interactive shell.
pub struct RemoteShell {
    channel: Channel<Msg>,
    /// Messages received while waiting for a request reply.
    pending: VecDeque<ChannelMsg>,
}

impl RemoteShell {
    pub fn new(channel: Channel<Msg>) -> Self {
        Self {
            channel,
            pending: VecDeque::new(),
        }
    }

    async fn await_reply(&mut self) -> Result<(), ChannelRequestError> {
        loop {
            match self.channel.wait().await {
                Some(ChannelMsg::Success) => return Ok(()),
                Some(ChannelMsg::Failure) => return Err(ChannelRequestError::Rejected),
                Some(ChannelMsg::Close) | None => return Err(ChannelRequestError::Closed),
                Some(other) => self.pending.push_back(other),
            }
        }
    }

    async fn next_msg(&mut self) -> Option<ChannelMsg> {
        match self.pending.pop_front() {
            Some(msg) => Some(msg),
            None => self.channel.wait().await,
        }
    }
}

impl ShellChannel for RemoteShell {
    async fn allocate_pty(
        &mut self,
        term: &str,
        size: TermSize,
        modes: &[(Pty, u32)],
    ) -> Result<(), ChannelRequestError> {
        self.channel
            .request_pty(true, term, size.cols, size.rows, 0, 0, modes)
            .await?;
        self.await_reply().await
    }

    async fn start_shell(&mut self) -> Result<(), ChannelRequestError> {
        self.channel.request_shell(true).await?;
        self.await_reply().await
    }

    fn input_writer(&self) -> Pin<Box<dyn AsyncWrite + Send>> {
        Box::pin(self.channel.make_writer())
    }

    async fn resize(&mut self, size: TermSize) -> Result<(), ChannelRequestError> {
        self.channel
            .window_change(size.cols, size.rows, 0, 0)
            .await
            .map_err(ChannelRequestError::from)
    }

    async fn recv_event(&mut self) -> Option<ShellEvent> {
        loop {
            match self.next_msg().await? {
                ChannelMsg::Data { data } => return Some(ShellEvent::Stdout(data.to_vec())),
                ChannelMsg::ExtendedData { data, ext: 1 } => {
                    return Some(ShellEvent::Stderr(data.to_vec()));
                }
                ChannelMsg::ExitStatus { exit_status } => {
                    return Some(ShellEvent::Exit(exit_status));
                }
                ChannelMsg::Close => return None,
                ChannelMsg::Eof => debug!("Remote sent EOF"),
                other => debug!("Ignoring channel message {:?}", other),
            }
        }
    }

    async fn shutdown(&mut self) {
        if let Err(e) = self.channel.eof().await {
            debug!("Channel EOF failed: {}", e);
        }
        if let Err(e) = self.channel.close().await {
            debug!("Channel close failed: {}", e);
        }
    }
}
