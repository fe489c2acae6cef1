//! Profile tree loading.
//!
//! The tree is read from a YAML file (`~/.sshw.yml` and friends) or
//! imported from the user's `~/.ssh/config`.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use log::debug;

use crate::error::ConfigError;
use crate::profile::{ConnectionProfile, DEFAULT_PORT, expand_tilde};

/// File names tried, in order, in the home directory and then the working directory.
pub const PROFILE_FILE_NAMES: [&str; 3] = [".sshw", ".sshw.yml", ".sshw.yaml"];

/// Group the `ssh_config` import is wrapped in when exported.
pub const SSH_CONFIG_GROUP: &str = "default server group";

/// File the `ssh_config` export writes by default.
pub const SSH_CONFIG_EXPORT_FILE: &str = "sshconfig.yaml";

/// Ordered, possibly nested list of connection profiles.
#[derive(Debug, Clone, Default)]
pub struct ProfileTree {
    profiles: Vec<ConnectionProfile>,
}

impl ProfileTree {
    pub fn new(profiles: Vec<ConnectionProfile>) -> Self {
        Self { profiles }
    }

    /// Load from the first profile file found in `~` and then `.`.
    pub fn load() -> Result<Self, ConfigError> {
        let home = dirs::home_dir().ok_or(ConfigError::NoHomeDir)?;
        let candidates: Vec<PathBuf> = PROFILE_FILE_NAMES
            .iter()
            .map(|name| home.join(name))
            .chain(PROFILE_FILE_NAMES.iter().map(PathBuf::from))
            .collect();

        for path in &candidates {
            if path.is_file() {
                return Self::from_path(path);
            }
        }

        Err(ConfigError::Unavailable {
            searched: candidates,
        })
    }

    /// Load from an explicit YAML file.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        debug!("Loading profile tree from {}", path.display());
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    /// Parse a YAML document whose root is a list of profiles.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let profiles: Option<Vec<ConnectionProfile>> = serde_yaml::from_str(content)?;
        Ok(Self::new(profiles.unwrap_or_default()))
    }

    /// Import `~/.ssh/config`; a missing file yields an empty tree.
    pub fn from_ssh_config() -> Result<Self, ConfigError> {
        let path = dirs::home_dir()
            .map(|home| home.join(".ssh").join("config"))
            .ok_or(ConfigError::NoHomeDir)?;

        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
            Err(source) => return Err(ConfigError::Read { path, source }),
        };

        Ok(Self::new(import_ssh_config(&content)))
    }

    /// Render as a YAML document loadable by [`ProfileTree::from_yaml`].
    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(&self.profiles).map_err(ConfigError::Render)
    }

    /// Nest every top-level profile under one group named `name`.
    pub fn into_group(self, name: &str) -> Self {
        Self::new(vec![ConnectionProfile {
            name: name.to_string(),
            children: self.profiles,
            ..Default::default()
        }])
    }

    /// Write the tree as YAML to a new file; an existing file is never replaced.
    pub fn write_new(&self, path: &Path) -> Result<(), ConfigError> {
        let yaml = self.to_yaml()?;
        let write_error = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };

        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| match e.kind() {
                io::ErrorKind::AlreadyExists => ConfigError::Exists {
                    path: path.to_path_buf(),
                },
                _ => write_error(e),
            })?;
        file.write_all(yaml.as_bytes()).map_err(write_error)?;
        debug!("Wrote {} profiles to {}", self.flatten().len(), path.display());
        Ok(())
    }

    /// Top-level profiles.
    pub fn profiles(&self) -> &[ConnectionProfile] {
        &self.profiles
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// Depth-first search for a dialable profile by alias, then by name.
    pub fn find(&self, target: &str) -> Option<&ConnectionProfile> {
        let flat = self.flatten();
        let dialable = || flat.iter().map(|(_, p)| *p).filter(|p| !p.is_group());

        dialable()
            .find(|p| !p.alias.is_empty() && p.alias == target)
            .or_else(|| dialable().find(|p| p.name == target))
    }

    /// Every profile paired with its nesting depth, in display order.
    pub fn flatten(&self) -> Vec<(usize, &ConnectionProfile)> {
        fn walk<'a>(
            profiles: &'a [ConnectionProfile],
            depth: usize,
            out: &mut Vec<(usize, &'a ConnectionProfile)>,
        ) {
            for profile in profiles {
                out.push((depth, profile));
                walk(&profile.children, depth + 1, out);
            }
        }

        let mut out = Vec::new();
        walk(&self.profiles, 0, &mut out);
        out
    }
}

/// One `Host` (or `Match`) section and its options, in file order.
#[derive(Debug, Default)]
struct HostBlock {
    /// Empty for `Match` sections, which never match an alias here.
    patterns: Vec<String>,
    /// Lowercased keyword and raw value.
    options: Vec<(String, String)>,
}

impl HostBlock {
    fn matches(&self, alias: &str) -> bool {
        let mut matched = false;
        for pattern in &self.patterns {
            if let Some(negated) = pattern.strip_prefix('!') {
                if glob_match(negated, alias) {
                    return false;
                }
            } else if glob_match(pattern, alias) {
                matched = true;
            }
        }
        matched
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.options
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// First pattern that names a single host.
    fn alias(&self) -> Option<&str> {
        self.patterns
            .iter()
            .map(String::as_str)
            .find(|p| !p.starts_with('!') && !p.contains('*') && !p.contains('?'))
    }
}

/// `*` and `?` globbing as used in `Host` patterns.
fn glob_match(pattern: &str, text: &str) -> bool {
    fn walk(p: &[u8], t: &[u8]) -> bool {
        match (p.first(), t.first()) {
            (None, None) => true,
            (Some(b'*'), _) => walk(&p[1..], t) || (!t.is_empty() && walk(p, &t[1..])),
            (Some(b'?'), Some(_)) => walk(&p[1..], &t[1..]),
            (Some(a), Some(b)) if a == b => walk(&p[1..], &t[1..]),
            _ => false,
        }
    }
    walk(pattern.as_bytes(), text.as_bytes())
}

/// Split `ssh_config` text into sections. Options before the first
/// `Host` line apply to every host.
fn parse_blocks(content: &str) -> Vec<HostBlock> {
    let mut blocks = vec![HostBlock {
        patterns: vec!["*".to_string()],
        options: Vec::new(),
    }];

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        // "Key Value" or "Key=Value"
        let (key, value) = match line.split_once('=') {
            Some((key, value)) => (key.trim(), value.trim()),
            None => match line.split_once(char::is_whitespace) {
                Some((key, value)) => (key, value.trim()),
                None => continue,
            },
        };
        let value = value.trim_matches('"');

        match key.to_ascii_lowercase().as_str() {
            "host" => blocks.push(HostBlock {
                patterns: value.split_whitespace().map(str::to_string).collect(),
                options: Vec::new(),
            }),
            "match" => blocks.push(HostBlock::default()),
            keyword => {
                if let Some(block) = blocks.last_mut() {
                    block.options.push((keyword.to_string(), value.to_string()));
                }
            }
        }
    }

    blocks
}

/// First value of `key` across every section matching `alias`.
fn lookup<'a>(blocks: &'a [HostBlock], alias: &str, key: &str) -> Option<&'a str> {
    blocks
        .iter()
        .filter(|block| block.matches(alias))
        .find_map(|block| block.get(key))
}

/// Convert `ssh_config` host sections into flat profiles.
///
/// Each section's first concrete pattern becomes a profile when a
/// `HostName` resolves for it. Options are looked up the way ssh does:
/// every section matching the alias is consulted in file order and the
/// first value wins, so `Host *` defaults fill in what a host leaves out.
pub fn import_ssh_config(content: &str) -> Vec<ConnectionProfile> {
    let blocks = parse_blocks(content);
    let mut profiles: Vec<ConnectionProfile> = Vec::new();

    for alias in blocks.iter().filter_map(HostBlock::alias) {
        if profiles.iter().any(|p| p.alias == alias) {
            continue;
        }
        let Some(host) = lookup(&blocks, alias, "hostname") else {
            continue;
        };

        profiles.push(ConnectionProfile {
            name: alias.to_string(),
            alias: alias.to_string(),
            host: host.to_string(),
            user: lookup(&blocks, alias, "user").unwrap_or_default().to_string(),
            port: lookup(&blocks, alias, "port")
                .map(|port| port.parse().unwrap_or(0))
                .unwrap_or(i64::from(DEFAULT_PORT)),
            key_path: lookup(&blocks, alias, "identityfile")
                .map(|path| expand_tilde(path).to_string_lossy().into_owned())
                .unwrap_or_default(),
            ..Default::default()
        });
    }

    profiles
}
