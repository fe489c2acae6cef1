//! Error types for sshw.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Main error type for sshw operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Profile tree could not be loaded
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Credential or authentication errors
    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),

    /// SSH transport-level errors
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Terminal relay errors
    #[error("Relay error: {0}")]
    Relay(#[from] RelayError),
}

/// Profile tree loading errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// No profile file was found in any of the searched locations.
    #[error("No profile tree found (searched: {})", display_paths(.searched))]
    Unavailable { searched: Vec<PathBuf> },

    /// The user's home directory could not be determined.
    #[error("Home directory is unavailable")]
    NoHomeDir,

    /// Profile file could not be read.
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Profile file is not valid YAML for the profile schema.
    #[error("Invalid profile tree: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// Profile tree could not be rendered as YAML.
    #[error("Failed to render profile tree: {0}")]
    Render(#[source] serde_yaml::Error),

    /// Export target already exists and is left untouched.
    #[error("{path} already exists")]
    Exists { path: PathBuf },

    /// Export target could not be written.
    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Credential resolution and authentication errors.
#[derive(Error, Debug)]
pub enum AuthError {
    /// A single credential provider failed; the chain continues without it.
    #[error("Credential '{provider}' unavailable: {reason}")]
    CredentialUnavailable { provider: String, reason: String },

    /// Private key file could not be read.
    #[error("Failed to read key {path}: {source}")]
    KeyLoad {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Private key material is malformed or the passphrase is wrong.
    #[error("Failed to parse key {path}: {reason}")]
    KeyParse { path: PathBuf, reason: String },

    /// Agent bridge connection or signing failure.
    #[error("Agent at '{address}' failed: {reason}")]
    Agent { address: String, reason: String },

    /// Agent bridge did not answer within the connect timeout.
    #[error("Agent at '{address}' timed out after {timeout:?}")]
    AgentTimeout { address: String, timeout: Duration },

    /// Reading an answer from the terminal failed.
    #[error("Prompt failed: {0}")]
    Prompt(#[from] PromptError),

    /// Every credential in the chain was rejected by the server.
    #[error("No supported authentication methods remain for user '{user}'")]
    Exhausted { user: String, password_tried: bool },

    /// SSH protocol error during an authentication exchange.
    #[error("SSH error during authentication: {0}")]
    Ssh(#[from] russh::Error),
}

/// Interactive prompt errors.
#[derive(Error, Debug)]
pub enum PromptError {
    /// Input stream closed before an answer was read.
    #[error("Input closed while reading an answer")]
    Closed,

    /// Terminal read failed.
    #[error("Failed to read from terminal: {0}")]
    Io(#[from] io::Error),
}

/// Transport layer errors (dialing, handshake, host keys).
#[derive(Error, Debug)]
pub enum TransportError {
    /// Remote end refused the TCP connection
    #[error("Connection refused by {host}:{port}")]
    DialRefused { host: String, port: u16 },

    /// Failed to connect to host
    #[error("Connection failed to {host}:{port}: {source}")]
    ConnectionFailed {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    /// Dial or handshake did not complete in time
    #[error("Connecting to {host}:{port} timed out after {timeout:?}")]
    DialTimeout {
        host: String,
        port: u16,
        timeout: Duration,
    },

    /// Jump host refused to open the proxied stream
    #[error("Jump host could not open a tunnel to {host}:{port}: {source}")]
    Tunnel {
        host: String,
        port: u16,
        #[source]
        source: russh::Error,
    },

    /// Host key is not in known_hosts and strict checking is enabled
    #[error("Host key for {host}:{port} is not known")]
    HostKeyUnknown { host: String, port: u16 },

    /// Host key differs from the one recorded in known_hosts
    #[error("Host key for {host}:{port} changed (known_hosts line {line})")]
    HostKeyChanged { host: String, port: u16, line: usize },

    /// Host key does not match the pinned fingerprint
    #[error("Host key for {host}:{port} has fingerprint {actual}, expected {expected}")]
    HostKeyMismatch {
        host: String,
        port: u16,
        expected: String,
        actual: String,
    },

    /// known_hosts could not be read or written
    #[error("known_hosts error: {0}")]
    KnownHosts(String),

    /// SSH handshake or protocol error
    #[error("SSH error: {0}")]
    Ssh(#[from] russh::Error),
}

/// Terminal relay errors.
#[derive(Error, Debug)]
pub enum RelayError {
    /// Failed to open the remote session channel
    #[error("Failed to open session channel: {0}")]
    ChannelOpen(#[source] russh::Error),

    /// Local terminal could not be switched to raw mode or queried
    #[error("Local terminal error: {0}")]
    Terminal(#[source] io::Error),

    /// Remote end refused the pseudo-terminal request
    #[error("PTY allocation failed: {0}")]
    PtyAllocationFailed(#[source] ChannelRequestError),

    /// Remote end refused to start the shell
    #[error("Shell start failed: {0}")]
    ShellStartFailed(#[source] ChannelRequestError),

    /// Copying between local streams and the channel failed
    #[error("Relay I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Failure of a single request on an open channel.
#[derive(Error, Debug)]
pub enum ChannelRequestError {
    /// Server answered the request with a failure
    #[error("request rejected by the server")]
    Rejected,

    /// Channel ended before the server replied
    #[error("channel closed before the server replied")]
    Closed,

    /// SSH protocol error
    #[error(transparent)]
    Ssh(#[from] russh::Error),
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Result type alias using sshw's Error.
pub type Result<T> = std::result::Result<T, Error>;
