//! russh client handler with pluggable host key verification.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use log::{debug, info, warn};
use russh::client;
use russh::keys::{HashAlg, PublicKey};

use super::config::{DialConfig, HostKeyVerification};
use crate::error::TransportError;

/// Where `check_server_key` leaves the reason a host key was refused;
/// russh itself only reports `UnknownKey`.
pub(crate) type HostKeyErrorSlot = Arc<Mutex<Option<TransportError>>>;

/// What known_hosts says about a presented key.
enum KnownHost {
    Trusted,
    Unseen,
    Refused(TransportError),
}

/// russh client handler applying one [`HostKeyVerification`] policy.
pub struct ClientHandler {
    host: String,
    port: u16,
    policy: HostKeyVerification,
    known_hosts_path: Option<PathBuf>,
    refusal: HostKeyErrorSlot,
}

impl ClientHandler {
    pub(crate) fn new(config: &DialConfig, refusal: HostKeyErrorSlot) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            policy: config.host_key_verification.clone(),
            known_hosts_path: config.known_hosts_path.clone(),
            refusal,
        }
    }

    fn lookup(&self, key: &PublicKey) -> KnownHost {
        let found = match &self.known_hosts_path {
            Some(path) => russh::keys::check_known_hosts_path(&self.host, self.port, key, path),
            None => russh::keys::check_known_hosts(&self.host, self.port, key),
        };

        match found {
            Ok(true) => KnownHost::Trusted,
            Ok(false) => KnownHost::Unseen,
            Err(russh::keys::Error::KeyChanged { line }) => {
                KnownHost::Refused(TransportError::HostKeyChanged {
                    host: self.host.clone(),
                    port: self.port,
                    line,
                })
            }
            Err(e) => KnownHost::Refused(TransportError::KnownHosts(e.to_string())),
        }
    }

    /// Append `key` to known_hosts. Write failures are logged only.
    fn remember(&self, key: &PublicKey) {
        let saved = match &self.known_hosts_path {
            Some(path) => {
                russh::keys::known_hosts::learn_known_hosts_path(&self.host, self.port, key, path)
            }
            None => russh::keys::known_hosts::learn_known_hosts(&self.host, self.port, key),
        };

        match saved {
            Ok(()) => info!("Recorded new host key for {}:{}", self.host, self.port),
            Err(e) => warn!(
                "Could not record host key for {}:{}: {}",
                self.host, self.port, e
            ),
        }
    }

    fn refuse(&self, error: TransportError) -> bool {
        warn!("{}", error);
        if let Ok(mut slot) = self.refusal.lock() {
            *slot = Some(error);
        }
        false
    }

    fn verify(&self, key: &PublicKey) -> bool {
        match &self.policy {
            HostKeyVerification::Disabled => {
                debug!("Host key for {}:{} accepted unchecked", self.host, self.port);
                true
            }

            HostKeyVerification::Fingerprint(expected) => {
                let actual = key.fingerprint(HashAlg::Sha256).to_string();
                if actual == *expected {
                    return true;
                }
                self.refuse(TransportError::HostKeyMismatch {
                    host: self.host.clone(),
                    port: self.port,
                    expected: expected.clone(),
                    actual,
                })
            }

            HostKeyVerification::Strict | HostKeyVerification::AcceptNew => {
                match self.lookup(key) {
                    KnownHost::Trusted => true,
                    KnownHost::Refused(error) => self.refuse(error),
                    KnownHost::Unseen if self.policy == HostKeyVerification::Strict => {
                        self.refuse(TransportError::HostKeyUnknown {
                            host: self.host.clone(),
                            port: self.port,
                        })
                    }
                    KnownHost::Unseen => {
                        self.remember(key);
                        true
                    }
                }
            }
        }
    }
}

impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(&mut self, server_public_key: &PublicKey) -> Result<bool, Self::Error> {
        Ok(self.verify(server_public_key))
    }
}
