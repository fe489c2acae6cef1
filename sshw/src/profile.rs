//! Connection profiles as supplied by the profile tree.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Port used when a profile leaves it unset or non-positive.
pub const DEFAULT_PORT: u16 = 22;

/// User used when a profile leaves it empty.
pub const DEFAULT_USER: &str = "root";

/// One named host entry, possibly grouping children or routed through a jump host.
///
/// Empty strings mean "unset" for every optional text field, matching the
/// YAML files this is loaded from.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ConnectionProfile {
    /// Display name.
    pub name: String,

    /// Short alias usable as a lookup key.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub alias: String,

    /// Hostname or IP address.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub host: String,

    /// Login user (defaults to `root`).
    #[serde(skip_serializing_if = "String::is_empty")]
    pub user: String,

    /// Port (defaults to 22 when unset or out of range).
    #[serde(skip_serializing_if = "is_unset")]
    pub port: i64,

    /// Path to a private key file; `~` is expanded.
    #[serde(rename = "keypath", skip_serializing_if = "String::is_empty")]
    pub key_path: String,

    /// Passphrase for `key_path`.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub passphrase: String,

    /// Static password.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub password: String,

    /// Agent address: a socket path or `host:port`.
    #[serde(rename = "agentpath", alias = "agent", skip_serializing_if = "String::is_empty")]
    pub agent_path: String,

    /// Commands typed into the shell once it starts.
    #[serde(rename = "callback-shells", skip_serializing_if = "Vec::is_empty")]
    pub callback_commands: Vec<CallbackCommand>,

    /// Nested profiles (menu grouping only).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ConnectionProfile>,

    /// Intermediate hops; only the first entry is used.
    #[serde(rename = "jump", skip_serializing_if = "Vec::is_empty")]
    pub jump_profiles: Vec<ConnectionProfile>,
}

impl ConnectionProfile {
    /// Create a profile for `host` with every other field unset.
    pub fn new(name: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            ..Default::default()
        }
    }

    /// The user to log in as.
    pub fn effective_user(&self) -> &str {
        if self.user.is_empty() {
            DEFAULT_USER
        } else {
            &self.user
        }
    }

    /// The port to dial.
    pub fn effective_port(&self) -> u16 {
        u16::try_from(self.port)
            .ok()
            .filter(|port| *port > 0)
            .unwrap_or(DEFAULT_PORT)
    }

    /// `user@host:port`, used as log context.
    pub fn destination(&self) -> String {
        format!(
            "{}@{}:{}",
            self.effective_user(),
            self.host,
            self.effective_port()
        )
    }

    /// The jump hop to tunnel through, if any.
    pub fn jump(&self) -> Option<&ConnectionProfile> {
        self.jump_profiles.first()
    }

    /// Whether this entry only groups children and cannot be dialed.
    pub fn is_group(&self) -> bool {
        !self.children.is_empty()
    }
}

/// A command typed into the remote shell after `delay` milliseconds.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct CallbackCommand {
    /// Text to type; a carriage return is appended.
    #[serde(rename = "cmd")]
    pub text: String,

    /// Wait before typing, in milliseconds.
    #[serde(rename = "delay")]
    pub delay_milliseconds: u64,
}

impl CallbackCommand {
    pub fn new(text: impl Into<String>, delay_milliseconds: u64) -> Self {
        Self {
            text: text.into(),
            delay_milliseconds,
        }
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_milliseconds)
    }
}

fn is_unset(port: &i64) -> bool {
    *port == 0
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    } else if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    Path::new(path).to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_defaults_to_22_when_not_positive() {
        for port in [0, -1, -22, i64::MIN] {
            let profile = ConnectionProfile {
                port,
                ..ConnectionProfile::new("p", "example.com")
            };
            assert_eq!(profile.effective_port(), 22);
        }
    }

    #[test]
    fn test_port_kept_when_valid() {
        let profile = ConnectionProfile {
            port: 2222,
            ..ConnectionProfile::new("p", "example.com")
        };
        assert_eq!(profile.effective_port(), 2222);
    }

    #[test]
    fn test_port_out_of_range_falls_back() {
        let profile = ConnectionProfile {
            port: 70_000,
            ..ConnectionProfile::new("p", "example.com")
        };
        assert_eq!(profile.effective_port(), 22);
    }

    #[test]
    fn test_user_defaults_to_root() {
        let profile = ConnectionProfile::new("p", "example.com");
        assert_eq!(profile.effective_user(), "root");

        let profile = ConnectionProfile {
            user: "deploy".into(),
            ..profile
        };
        assert_eq!(profile.effective_user(), "deploy");
        assert_eq!(profile.destination(), "deploy@example.com:22");
    }

    #[test]
    fn test_only_first_jump_is_used() {
        let profile = ConnectionProfile {
            jump_profiles: vec![
                ConnectionProfile::new("bastion", "10.0.0.1"),
                ConnectionProfile::new("second", "10.0.0.2"),
            ],
            ..ConnectionProfile::new("p", "10.0.1.5")
        };
        assert_eq!(profile.jump().map(|j| j.host.as_str()), Some("10.0.0.1"));
    }

    #[test]
    fn test_expand_tilde() {
        let home = dirs::home_dir().unwrap();
        assert_eq!(expand_tilde("~/.ssh/id_rsa"), home.join(".ssh/id_rsa"));
        assert_eq!(expand_tilde("~"), home);
        assert_eq!(expand_tilde("/tmp/agent.sock"), PathBuf::from("/tmp/agent.sock"));
        assert_eq!(expand_tilde("127.0.0.1:7000"), PathBuf::from("127.0.0.1:7000"));
    }

    #[test]
    fn test_callback_delay() {
        let cmd = CallbackCommand::new("pwd", 100);
        assert_eq!(cmd.delay(), Duration::from_millis(100));
    }
}
