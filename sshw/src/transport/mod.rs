//! SSH transport layer wrapping russh.
//!
//! This module provides connection setup for one target, optionally
//! tunneled through a single jump host, with pluggable host key checking.

pub mod config;
mod dialer;
mod handler;

pub use config::{DEFAULT_CONNECT_TIMEOUT, DialConfig, HostKeyVerification};
pub use dialer::{Connection, SessionDialer};
pub use handler::ClientHandler;
