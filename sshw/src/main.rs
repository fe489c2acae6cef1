//! `sshw`: pick a profile from `~/.sshw.yml` (or `~/.ssh/config`) and log in.
//!
//! # Usage
//!
//! ```bash
//! sshw --list
//! sshw dev
//! sshw --ssh-config web
//! sshw --export-ssh-config sshconfig.yaml
//! RUST_LOG=debug sshw --verify-host-keys "dev server with key path"
//! ```

use std::path::{Path, PathBuf};

use clap::Parser;
use log::{error, info};

use sshw::config::{SSH_CONFIG_EXPORT_FILE, SSH_CONFIG_GROUP};
use sshw::{ConnectionProfile, HostKeyVerification, LoginContext, ProfileTree};

#[derive(Parser, Debug)]
#[command(version, about = "SSH login launcher", long_about = None)]
struct Args {
    /// Profile alias or name to connect to; lists profiles when omitted
    target: Option<String>,

    /// Profile tree file (default: first of ~/.sshw, ~/.sshw.yml, ~/.sshw.yaml, ./.sshw*)
    #[arg(long, value_name = "PATH", conflicts_with = "ssh_config")]
    config: Option<PathBuf>,

    /// Import hosts from ~/.ssh/config instead of the profile tree
    #[arg(short, long)]
    ssh_config: bool,

    /// Print the profile tree and exit
    #[arg(long)]
    list: bool,

    /// Check host keys against known_hosts, learning unknown hosts
    #[arg(long)]
    verify_host_keys: bool,

    /// Reject hosts that are not already in known_hosts
    #[arg(long, conflicts_with = "verify_host_keys")]
    strict_host_keys: bool,

    /// known_hosts file to use (default: ~/.ssh/known_hosts)
    #[arg(long, value_name = "PATH")]
    known_hosts: Option<PathBuf>,

    /// Accept only a host key with this SHA-256 fingerprint (SHA256:...)
    #[arg(long, value_name = "FINGERPRINT", conflicts_with_all = ["verify_host_keys", "strict_host_keys"])]
    fingerprint: Option<String>,

    /// Write ~/.ssh/config hosts as a profile group to PATH (never overwrites)
    #[arg(
        long,
        value_name = "PATH",
        num_args = 0..=1,
        default_missing_value = SSH_CONFIG_EXPORT_FILE,
        conflicts_with = "config"
    )]
    export_ssh_config: Option<PathBuf>,
}

impl Args {
    fn host_key_verification(&self) -> HostKeyVerification {
        if let Some(fingerprint) = &self.fingerprint {
            HostKeyVerification::Fingerprint(fingerprint.clone())
        } else if self.strict_host_keys {
            HostKeyVerification::Strict
        } else if self.verify_host_keys {
            HostKeyVerification::AcceptNew
        } else {
            // Convenience default; opt into checking with the flags above
            HostKeyVerification::Disabled
        }
    }

    fn load_tree(&self) -> sshw::Result<ProfileTree> {
        let tree = if self.ssh_config {
            ProfileTree::from_ssh_config()?
        } else if let Some(path) = &self.config {
            ProfileTree::from_path(path)?
        } else {
            ProfileTree::load()?
        };
        Ok(tree)
    }
}

fn export_ssh_config(path: &Path) -> sshw::Result<()> {
    let tree = ProfileTree::from_ssh_config()?.into_group(SSH_CONFIG_GROUP);
    tree.write_new(path)?;
    info!("Exported ssh config to {}", path.display());
    Ok(())
}

fn print_tree(tree: &ProfileTree) {
    for (depth, profile) in tree.flatten() {
        let indent = "  ".repeat(depth);
        if profile.is_group() {
            println!("{}{}/", indent, profile.name);
        } else {
            println!("{}{}  {}", indent, label(profile), profile.destination());
        }
    }
}

fn label(profile: &ConnectionProfile) -> String {
    if profile.alias.is_empty() {
        profile.name.clone()
    } else {
        format!("{} [{}]", profile.name, profile.alias)
    }
}

#[tokio::main]
async fn main() {
    // Initialize logging (set RUST_LOG=debug for verbose output)
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    if let Some(path) = &args.export_ssh_config {
        match export_ssh_config(path) {
            Ok(()) => std::process::exit(0),
            Err(e) => {
                error!("{}", e);
                std::process::exit(1);
            }
        }
    }

    let tree = match args.load_tree() {
        Ok(tree) => tree,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    let target = match (&args.target, args.list) {
        (Some(target), false) => target,
        _ => {
            print_tree(&tree);
            std::process::exit(0);
        }
    };

    let Some(profile) = tree.find(target) else {
        error!("No profile named '{}'", target);
        std::process::exit(1);
    };

    let ctx = LoginContext::new()
        .with_host_key_verification(args.host_key_verification())
        .with_known_hosts_path(args.known_hosts.clone());

    // Exit explicitly: the stdin reader may still be parked on a blocking read
    match sshw::login(&ctx, profile).await {
        Ok(outcome) => {
            let code = outcome
                .exit_status
                .and_then(|status| i32::try_from(status).ok())
                .unwrap_or(0);
            std::process::exit(code);
        }
        Err(_) => std::process::exit(1),
    }
}
