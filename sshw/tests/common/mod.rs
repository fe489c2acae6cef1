//! In-process SSH server and scripted collaborators for integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use russh::keys::ssh_key::rand_core::OsRng;
use russh::keys::{Algorithm, PrivateKey, PublicKey};
use russh::server::{self, Auth, Msg, Server as _, Session};
use russh::{Channel, ChannelId, Pty};

use sshw::error::PromptError;
use sshw::relay::{LocalTerminal, TermSize};
use sshw::{ConnectionProfile, HostKeyVerification, LoginContext, Prompter};

/// Shared, ordered log of what the servers saw.
pub type Events = Arc<Mutex<Vec<String>>>;

pub fn events() -> Events {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn snapshot(events: &Events) -> Vec<String> {
    events.lock().unwrap().clone()
}

/// What a test server accepts.
#[derive(Clone, Default)]
pub struct Accepts {
    pub password: String,
    /// Enables keyboard-interactive: `Code: ` (echoed) then `Password: `.
    pub code: Option<String>,
    /// Public key accepted for publickey auth.
    pub key: Option<PublicKey>,
}

impl Accepts {
    pub fn password(password: &str) -> Self {
        Self {
            password: password.to_string(),
            ..Default::default()
        }
    }
}

/// Server that runs a canned shell and forwards `direct-tcpip`.
pub struct TestServer {
    name: &'static str,
    accepts: Accepts,
    events: Events,
}

/// Per-connection handler.
pub struct TestHandler {
    name: &'static str,
    accepts: Accepts,
    events: Events,
    channels: HashMap<ChannelId, Channel<Msg>>,
}

impl TestHandler {
    fn record(&self, event: String) {
        self.events
            .lock()
            .unwrap()
            .push(format!("{}: {}", self.name, event));
    }
}

impl server::Server for TestServer {
    type Handler = TestHandler;

    fn new_client(&mut self, _: Option<std::net::SocketAddr>) -> Self::Handler {
        TestHandler {
            name: self.name,
            accepts: self.accepts.clone(),
            events: Arc::clone(&self.events),
            channels: HashMap::new(),
        }
    }
}

impl server::Handler for TestHandler {
    type Error = russh::Error;

    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth, Self::Error> {
        let accepted = password == self.accepts.password;
        self.record(format!("password {} {}", user, accepted));
        if accepted {
            Ok(Auth::Accept)
        } else {
            Ok(Auth::reject())
        }
    }

    async fn auth_publickey(&mut self, user: &str, key: &PublicKey) -> Result<Auth, Self::Error> {
        let accepted = self
            .accepts
            .key
            .as_ref()
            .is_some_and(|accepted| accepted.key_data() == key.key_data());
        self.record(format!("publickey {} {}", user, accepted));
        if accepted {
            Ok(Auth::Accept)
        } else {
            Ok(Auth::reject())
        }
    }

    async fn auth_keyboard_interactive(
        &mut self,
        user: &str,
        _submethods: &str,
        response: Option<server::Response<'_>>,
    ) -> Result<Auth, Self::Error> {
        let Some(code) = self.accepts.code.clone() else {
            return Ok(Auth::reject());
        };

        match response {
            None => Ok(Auth::Partial {
                name: "verification".into(),
                instructions: "".into(),
                prompts: vec![("Code: ".into(), true), ("Password: ".into(), false)].into(),
            }),
            Some(response) => {
                let answers: Vec<String> = response
                    .into_iter()
                    .map(|r| String::from_utf8_lossy(&r).to_string())
                    .collect();
                let accepted = answers == [code, self.accepts.password.clone()];
                self.record(format!("keyboard-interactive {} {}", user, accepted));
                if accepted {
                    Ok(Auth::Accept)
                } else {
                    Ok(Auth::reject())
                }
            }
        }
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        self.record("session".to_string());
        self.channels.insert(channel.id(), channel);
        Ok(true)
    }

    async fn channel_open_direct_tcpip(
        &mut self,
        channel: Channel<Msg>,
        host_to_connect: &str,
        port_to_connect: u32,
        _originator_address: &str,
        _originator_port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        self.record(format!("direct-tcpip {}:{}", host_to_connect, port_to_connect));

        let addr = format!("{}:{}", host_to_connect, port_to_connect);
        tokio::spawn(async move {
            if let Ok(mut upstream) = tokio::net::TcpStream::connect(addr).await {
                let mut stream = channel.into_stream();
                let _ = tokio::io::copy_bidirectional(&mut stream, &mut upstream).await;
            }
        });
        Ok(true)
    }

    #[allow(clippy::too_many_arguments)]
    async fn pty_request(
        &mut self,
        channel: ChannelId,
        term: &str,
        col_width: u32,
        row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        modes: &[(Pty, u32)],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let values: Vec<u32> = modes.iter().map(|(_, v)| *v).collect();
        self.record(format!("pty {} {}x{} {:?}", term, col_width, row_height, values));
        let _ = session.channel_success(channel);
        Ok(())
    }

    async fn shell_request(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.record("shell".to_string());
        let _ = session.channel_success(channel);

        let handle = session.handle();
        if let Some(channel) = self.channels.remove(&channel) {
            tokio::spawn(async move {
                let id = channel.id();
                let _ = channel.data(&b"hello from the shell\r\n"[..]).await;
                let _ = handle.exit_status_request(id, 7).await;
                let _ = channel.eof().await;
                let _ = channel.close().await;
            });
        }
        Ok(())
    }

    async fn data(
        &mut self,
        _channel: ChannelId,
        data: &[u8],
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.record(format!("stdin {:?}", String::from_utf8_lossy(data)));
        Ok(())
    }
}

/// Start a password-only server on an ephemeral loopback port; returns the port.
pub async fn start_server(name: &'static str, password: &str, events: Events) -> u16 {
    start_server_accepting(name, Accepts::password(password), events).await
}

/// Start a server with the given credentials; returns the port.
pub async fn start_server_accepting(name: &'static str, accepts: Accepts, events: Events) -> u16 {
    let config = Arc::new(server::Config {
        auth_rejection_time: Duration::from_millis(0),
        auth_rejection_time_initial: Some(Duration::from_millis(0)),
        inactivity_timeout: Some(Duration::from_secs(30)),
        keys: vec![PrivateKey::random(&mut OsRng, Algorithm::Ed25519).unwrap()],
        ..Default::default()
    });

    let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let mut server = TestServer {
        name,
        accepts,
        events,
    };
    tokio::spawn(async move {
        let _ = server.run_on_socket(config, &listener).await;
    });

    port
}

/// Serve an in-memory agent holding `key` on a socket in `dir`; returns the socket path.
#[cfg(unix)]
pub async fn start_agent(dir: &std::path::Path, key: &PrivateKey) -> std::path::PathBuf {
    use russh::keys::agent::client::AgentClient;
    use russh::keys::agent::server;

    #[derive(Clone)]
    struct TestAgent;

    impl server::Agent for TestAgent {}

    let path = dir.join("agent.sock");
    let listener = tokio::net::UnixListener::bind(&path).unwrap();
    tokio::spawn(server::serve(
        tokio_stream::wrappers::UnixListenerStream::new(listener),
        TestAgent,
    ));

    let mut client = AgentClient::connect_uds(&path).await.unwrap();
    client.add_identity(key, &[]).await.unwrap();
    path
}

/// Replays canned answers and records every question.
#[derive(Default)]
pub struct Scripted {
    answers: Mutex<VecDeque<String>>,
    asked: Mutex<Vec<(String, bool)>>,
}

impl Scripted {
    pub fn new(answers: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            answers: Mutex::new(answers.iter().map(|a| a.to_string()).collect()),
            asked: Mutex::new(Vec::new()),
        })
    }

    pub fn asked(&self) -> Vec<(String, bool)> {
        self.asked.lock().unwrap().clone()
    }
}

impl Prompter for Scripted {
    fn ask(&self, question: &str, echo: bool) -> Result<String, PromptError> {
        self.asked.lock().unwrap().push((question.to_string(), echo));
        self.answers
            .lock()
            .unwrap()
            .pop_front()
            .ok_or(PromptError::Closed)
    }
}

/// A terminal that never resizes and counts mode switches.
#[derive(Default)]
pub struct StillTerminal {
    pub entered: AtomicUsize,
    pub restored: AtomicUsize,
}

impl LocalTerminal for StillTerminal {
    fn enter_raw_mode(&self) -> io::Result<()> {
        self.entered.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn restore_mode(&self) -> io::Result<()> {
        self.restored.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn size(&self) -> io::Result<TermSize> {
        Ok(TermSize::new(80, 24))
    }
}

/// Loopback profile for `port`.
pub fn profile(port: u16, user: &str, password: &str) -> ConnectionProfile {
    ConnectionProfile {
        user: user.to_string(),
        password: password.to_string(),
        port: i64::from(port),
        ..ConnectionProfile::new(format!("test-{port}"), "127.0.0.1")
    }
}

/// Context that never touches the user's keys, known_hosts or terminal.
pub fn context(prompter: Arc<Scripted>) -> LoginContext {
    LoginContext::new()
        .with_host_key_verification(HostKeyVerification::Disabled)
        .with_default_key_path(None)
        .with_connect_timeout(Duration::from_secs(5))
        .with_prompter(prompter)
}
