//! Interactive terminal relay.
//!
//! Bridges the local terminal and a remote shell:
//!
//! - remote stdout/stderr are copied to the local streams as they arrive
//! - callback commands are typed before any local keystroke is forwarded
//! - local size changes are polled and sent as window-change requests
//! - keepalives run on the transport while the shell is up
//!
//! The background tasks share a [`CancellationToken`] with the relay loop
//! and are joined before [`TerminalRelay::run`] returns.

mod channel;
mod tasks;
mod terminal;

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use russh::Pty;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub use channel::{KeepaliveSink, RemoteShell, ShellChannel, ShellEvent};
pub use tasks::write_callbacks;
pub use terminal::{ControllingTerminal, LocalTerminal, RawModeGuard, TermSize};

use crate::error::RelayError;
use crate::profile::CallbackCommand;
use crate::session::SessionState;

/// Terminal modes sent with the PTY request.
pub const PTY_MODES: [(Pty, u32); 3] = [
    (Pty::ECHO, 1),
    (Pty::TTY_OP_ISPEED, 14400),
    (Pty::TTY_OP_OSPEED, 14400),
];

/// Relay tuning.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Terminal type for the PTY request.
    pub term: String,

    /// How often the local terminal size is polled.
    pub resize_poll: Duration,

    /// How often a keepalive is sent.
    pub keepalive_interval: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            term: "xterm".to_string(),
            resize_poll: Duration::from_secs(1),
            keepalive_interval: Duration::from_secs(10),
        }
    }
}

/// How a relay run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayOutcome {
    /// Exit status reported by the remote shell, if any.
    pub exit_status: Option<u32>,

    /// Last terminal size the remote side was told about.
    pub last_size: TermSize,
}

/// Runs one interactive shell against a local terminal.
pub struct TerminalRelay<T: LocalTerminal> {
    terminal: Arc<T>,
    config: RelayConfig,
}

impl<T: LocalTerminal> TerminalRelay<T> {
    pub fn new(terminal: Arc<T>, config: RelayConfig) -> Self {
        Self { terminal, config }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Relay until the remote shell ends, local input ends, or output fails.
    ///
    /// Raw mode is entered first and restored exactly once on every path.
    /// `state` advances through `PtyRequested`, `ShellRunning` and `Closing`;
    /// failures stop it where they happened.
    #[allow(clippy::too_many_arguments)]
    pub async fn run<C, K, I, O, E>(
        &self,
        mut channel: C,
        keepalive: Arc<K>,
        callbacks: &[CallbackCommand],
        stdin: I,
        stdout: &mut O,
        stderr: &mut E,
        state: &mut SessionState,
    ) -> Result<RelayOutcome, RelayError>
    where
        C: ShellChannel,
        K: KeepaliveSink,
        I: AsyncRead + Unpin + Send + 'static,
        O: AsyncWrite + Unpin,
        E: AsyncWrite + Unpin,
    {
        let mut guard =
            RawModeGuard::engage(Arc::clone(&self.terminal)).map_err(RelayError::Terminal)?;

        let result = match self.open_shell(&mut channel, state).await {
            Ok((size, writer)) => {
                self.pump(
                    &mut channel, size, writer, keepalive, callbacks, stdin, stdout, stderr, state,
                )
                .await
            }
            Err(e) => {
                channel.shutdown().await;
                Err(e)
            }
        };

        guard.restore();
        result
    }

    /// Allocate the PTY and start the shell, returning the initial size
    /// and the remote input writer.
    async fn open_shell<C>(
        &self,
        channel: &mut C,
        state: &mut SessionState,
    ) -> Result<(TermSize, Pin<Box<dyn AsyncWrite + Send>>), RelayError>
    where
        C: ShellChannel,
    {
        let size = self.terminal.size().map_err(RelayError::Terminal)?;

        state.advance(SessionState::PtyRequested);
        channel
            .allocate_pty(&self.config.term, size, &PTY_MODES)
            .await
            .map_err(RelayError::PtyAllocationFailed)?;
        debug!("PTY {} {} allocated", self.config.term, size);

        let writer = channel.input_writer();
        channel
            .start_shell()
            .await
            .map_err(RelayError::ShellStartFailed)?;
        state.advance(SessionState::ShellRunning);
        info!("Shell started");

        Ok((size, writer))
    }

    #[allow(clippy::too_many_arguments)]
    async fn pump<C, K, I, O, E>(
        &self,
        channel: &mut C,
        size: TermSize,
        writer: Pin<Box<dyn AsyncWrite + Send>>,
        keepalive: Arc<K>,
        callbacks: &[CallbackCommand],
        stdin: I,
        stdout: &mut O,
        stderr: &mut E,
        state: &mut SessionState,
    ) -> Result<RelayOutcome, RelayError>
    where
        C: ShellChannel,
        K: KeepaliveSink,
        I: AsyncRead + Unpin + Send + 'static,
        O: AsyncWrite + Unpin,
        E: AsyncWrite + Unpin,
    {
        let shutdown = CancellationToken::new();
        let (resize_tx, mut resize_rx) = mpsc::unbounded_channel();

        let handles = [
            tokio::spawn(tasks::forward_input(
                callbacks.to_vec(),
                stdin,
                writer,
                shutdown.clone(),
            )),
            tokio::spawn(tasks::watch_resize(
                Arc::clone(&self.terminal),
                size,
                self.config.resize_poll,
                resize_tx,
                shutdown.clone(),
            )),
            tokio::spawn(tasks::keepalive(
                keepalive,
                self.config.keepalive_interval,
                shutdown.clone(),
            )),
        ];

        let mut outcome = RelayOutcome {
            exit_status: None,
            last_size: size,
        };
        let mut failure = None;

        loop {
            tokio::select! {
                event = channel.recv_event() => match event {
                    Some(ShellEvent::Stdout(data)) => {
                        if let Err(e) = copy_out(stdout, &data).await {
                            failure = Some(e);
                            break;
                        }
                    }
                    Some(ShellEvent::Stderr(data)) => {
                        if let Err(e) = copy_out(stderr, &data).await {
                            failure = Some(e);
                            break;
                        }
                    }
                    Some(ShellEvent::Exit(status)) => {
                        debug!("Remote shell exited with status {}", status);
                        outcome.exit_status = Some(status);
                    }
                    None => {
                        debug!("Remote channel closed");
                        break;
                    }
                },
                Some(size) = resize_rx.recv() => {
                    match channel.resize(size).await {
                        Ok(()) => outcome.last_size = size,
                        Err(e) => warn!("Window change to {} failed: {}", size, e),
                    }
                }
                _ = shutdown.cancelled() => {
                    debug!("Local input finished, closing session");
                    break;
                }
            }
        }

        state.advance(SessionState::Closing);
        shutdown.cancel();
        channel.shutdown().await;

        // The input forwarder may be parked on a read that never returns.
        handles[0].abort();
        for task in handles {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!("Relay task failed: {}", e);
                }
            }
        }

        match failure {
            Some(e) => Err(RelayError::Io(e)),
            None => Ok(outcome),
        }
    }
}

async fn copy_out<W>(out: &mut W, data: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    out.write_all(data).await?;
    out.flush().await
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::pin::Pin;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::task::{Context, Poll};

    use tokio::time::Instant;

    use super::terminal::testing::FakeTerminal;
    use super::*;
    use crate::error::ChannelRequestError;

    /// Cloneable in-memory sink standing in for the remote stdin.
    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl SharedBuf {
        fn contents(&self) -> Vec<u8> {
            self.0.lock().unwrap().clone()
        }
    }

    impl AsyncWrite for SharedBuf {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[derive(Default)]
    struct Record {
        pty: Mutex<Option<(String, TermSize, Vec<u32>)>>,
        shell_started: AtomicBool,
        resizes: Mutex<Vec<TermSize>>,
        closed: AtomicBool,
    }

    struct FakeChannel {
        events: mpsc::UnboundedReceiver<ShellEvent>,
        input: SharedBuf,
        record: Arc<Record>,
        reject_pty: bool,
    }

    impl ShellChannel for FakeChannel {
        async fn allocate_pty(
            &mut self,
            term: &str,
            size: TermSize,
            modes: &[(Pty, u32)],
        ) -> Result<(), ChannelRequestError> {
            if self.reject_pty {
                return Err(ChannelRequestError::Rejected);
            }
            let values = modes.iter().map(|(_, v)| *v).collect();
            *self.record.pty.lock().unwrap() = Some((term.to_string(), size, values));
            Ok(())
        }

        async fn start_shell(&mut self) -> Result<(), ChannelRequestError> {
            self.record.shell_started.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn input_writer(&self) -> Pin<Box<dyn AsyncWrite + Send>> {
            Box::pin(self.input.clone())
        }

        async fn resize(&mut self, size: TermSize) -> Result<(), ChannelRequestError> {
            self.record.resizes.lock().unwrap().push(size);
            Ok(())
        }

        async fn recv_event(&mut self) -> Option<ShellEvent> {
            self.events.recv().await
        }

        async fn shutdown(&mut self) {
            self.record.closed.store(true, Ordering::SeqCst);
        }
    }

    /// Local input whose first read fails.
    struct FailingReader;

    impl AsyncRead for FailingReader {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut tokio::io::ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::Error::other("stdin broke")))
        }
    }

    #[derive(Default)]
    struct NullSink(AtomicUsize);

    impl KeepaliveSink for NullSink {
        async fn ping(&self) -> Result<(), russh::Error> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Harness {
        terminal: Arc<FakeTerminal>,
        events: mpsc::UnboundedSender<ShellEvent>,
        input: SharedBuf,
        record: Arc<Record>,
        channel: Option<FakeChannel>,
    }

    impl Harness {
        fn new(terminal: FakeTerminal) -> Self {
            let (events, rx) = mpsc::unbounded_channel();
            let input = SharedBuf::default();
            let record = Arc::new(Record::default());
            let channel = FakeChannel {
                events: rx,
                input: input.clone(),
                record: record.clone(),
                reject_pty: false,
            };
            Self {
                terminal: Arc::new(terminal),
                events,
                input,
                record,
                channel: Some(channel),
            }
        }

        fn relay(&self) -> TerminalRelay<FakeTerminal> {
            TerminalRelay::new(self.terminal.clone(), RelayConfig::default())
        }

        fn take_channel(&mut self) -> FakeChannel {
            self.channel.take().unwrap()
        }
    }

    #[tokio::test]
    async fn test_remote_output_round_trips_unmodified() {
        let mut harness = Harness::new(FakeTerminal::fixed(TermSize::new(80, 24)));
        let payload: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
        for chunk in payload.chunks(777) {
            harness.events.send(ShellEvent::Stdout(chunk.to_vec())).unwrap();
        }
        harness.events.send(ShellEvent::Stderr(b"warn\n".to_vec())).unwrap();
        harness.events.send(ShellEvent::Exit(3)).unwrap();
        let channel = harness.take_channel();
        let relay = harness.relay();
        drop(harness.events);

        // Local input that never ends
        let (_keyboard, stdin) = tokio::io::duplex(64);
        let (mut stdout, mut stderr) = (Vec::new(), Vec::new());
        let mut state = SessionState::Authenticating;

        let outcome = relay
            .run(
                channel,
                Arc::new(NullSink::default()),
                &[],
                stdin,
                &mut stdout,
                &mut stderr,
                &mut state,
            )
            .await
            .unwrap();

        assert_eq!(stdout, payload);
        assert_eq!(stderr, b"warn\n");
        assert_eq!(outcome.exit_status, Some(3));
        assert_eq!(state, SessionState::Closing);
        assert_eq!(harness.terminal.entered(), 1);
        assert_eq!(harness.terminal.restored(), 1);
        assert!(harness.record.closed.load(Ordering::SeqCst));

        let pty = harness.record.pty.lock().unwrap().clone().unwrap();
        assert_eq!(pty.0, "xterm");
        assert_eq!(pty.1, TermSize::new(80, 24));
        assert_eq!(pty.2, vec![1, 14400, 14400]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_callbacks_precede_typed_input() {
        let mut harness = Harness::new(FakeTerminal::fixed(TermSize::new(80, 24)));
        let channel = harness.take_channel();
        let callbacks = vec![
            CallbackCommand::new("echo hi", 0),
            CallbackCommand::new("pwd", 100),
        ];

        // Keystrokes are already waiting before the shell starts
        let (mut keyboard, stdin) = tokio::io::duplex(64);
        keyboard.write_all(b"ls\r").await.unwrap();
        drop(keyboard);

        let (mut stdout, mut stderr) = (Vec::new(), Vec::new());
        let mut state = SessionState::Authenticating;
        let start = Instant::now();

        let outcome = harness
            .relay()
            .run(
                channel,
                Arc::new(NullSink::default()),
                &callbacks,
                stdin,
                &mut stdout,
                &mut stderr,
                &mut state,
            )
            .await
            .unwrap();

        assert!(start.elapsed() >= Duration::from_millis(100));
        assert_eq!(harness.input.contents(), b"echo hi\rpwd\rls\r");
        assert_eq!(outcome.exit_status, None);
        assert_eq!(harness.terminal.restored(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resize_sent_once_per_distinct_size() {
        let mut harness = Harness::new(FakeTerminal::with_sizes(vec![
            Ok(TermSize::new(80, 24)),
            Ok(TermSize::new(80, 24)),
            Ok(TermSize::new(120, 40)),
            Ok(TermSize::new(120, 40)),
        ]));
        let channel = harness.take_channel();
        let relay = harness.relay();
        let events = harness.events;

        let (_keyboard, stdin) = tokio::io::duplex(64);
        let (mut stdout, mut stderr) = (Vec::new(), Vec::new());
        let mut state = SessionState::Authenticating;

        let (outcome, ()) = tokio::join!(
            relay.run(
                channel,
                Arc::new(NullSink::default()),
                &[],
                stdin,
                &mut stdout,
                &mut stderr,
                &mut state,
            ),
            async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                drop(events);
            }
        );

        assert_eq!(
            *harness.record.resizes.lock().unwrap(),
            vec![TermSize::new(120, 40)]
        );
        assert_eq!(outcome.unwrap().last_size, TermSize::new(120, 40));
    }

    #[tokio::test]
    async fn test_restored_once_when_input_fails() {
        let mut harness = Harness::new(FakeTerminal::fixed(TermSize::new(80, 24)));
        let channel = harness.take_channel();

        let stdin = FailingReader;
        let (mut stdout, mut stderr) = (Vec::new(), Vec::new());
        let mut state = SessionState::Authenticating;

        let outcome = harness
            .relay()
            .run(
                channel,
                Arc::new(NullSink::default()),
                &[],
                stdin,
                &mut stdout,
                &mut stderr,
                &mut state,
            )
            .await;

        assert!(outcome.is_ok());
        assert_eq!(state, SessionState::Closing);
        assert_eq!(harness.terminal.restored(), 1);
        assert!(harness.record.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_pty_rejection_restores_terminal() {
        let mut harness = Harness::new(FakeTerminal::fixed(TermSize::new(80, 24)));
        let mut channel = harness.take_channel();
        channel.reject_pty = true;

        let (_keyboard, stdin) = tokio::io::duplex(64);
        let (mut stdout, mut stderr) = (Vec::new(), Vec::new());
        let mut state = SessionState::Authenticating;

        let err = harness
            .relay()
            .run(
                channel,
                Arc::new(NullSink::default()),
                &[],
                stdin,
                &mut stdout,
                &mut stderr,
                &mut state,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, RelayError::PtyAllocationFailed(_)));
        assert_eq!(state, SessionState::PtyRequested);
        assert!(!harness.record.shell_started.load(Ordering::SeqCst));
        assert_eq!(harness.terminal.entered(), 1);
        assert_eq!(harness.terminal.restored(), 1);
    }

    #[tokio::test]
    async fn test_terminal_size_failure_aborts_before_pty() {
        let mut harness = Harness::new(FakeTerminal::with_sizes(vec![Err(io::Error::other(
            "not a tty",
        ))]));
        let channel = harness.take_channel();

        let (_keyboard, stdin) = tokio::io::duplex(64);
        let (mut stdout, mut stderr) = (Vec::new(), Vec::new());
        let mut state = SessionState::Authenticating;

        let err = harness
            .relay()
            .run(
                channel,
                Arc::new(NullSink::default()),
                &[],
                stdin,
                &mut stdout,
                &mut stderr,
                &mut state,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, RelayError::Terminal(_)));
        assert_eq!(state, SessionState::Authenticating);
        assert!(harness.record.pty.lock().unwrap().is_none());
        assert_eq!(harness.terminal.restored(), 1);
    }
}
