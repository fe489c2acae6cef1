//! Private key loading.

use std::path::{Path, PathBuf};

use log::debug;
use russh::keys::{PrivateKey, decode_secret_key};

use crate::error::AuthError;
use crate::profile::expand_tilde;

/// Location tried when a profile names no key file.
pub fn default_key_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".ssh").join("id_rsa"))
}

/// Read and parse the private key at `path` (tilde-expanded).
///
/// An empty `passphrase` means the key is expected to be unencrypted.
pub async fn load_key(path: &str, passphrase: &str) -> Result<PrivateKey, AuthError> {
    load_key_at(&expand_tilde(path), passphrase).await
}

pub(crate) async fn load_key_at(path: &Path, passphrase: &str) -> Result<PrivateKey, AuthError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|source| AuthError::KeyLoad {
            path: path.to_path_buf(),
            source,
        })?;

    let parse_error = |reason: String| AuthError::KeyParse {
        path: path.to_path_buf(),
        reason,
    };

    let text = std::str::from_utf8(&bytes)
        .map_err(|_| parse_error("key file is not valid text".to_string()))?;

    let passphrase = (!passphrase.is_empty()).then_some(passphrase);
    let key = decode_secret_key(text, passphrase).map_err(|e| parse_error(e.to_string()))?;

    debug!("Loaded {} key from {}", key.algorithm(), path.display());
    Ok(key)
}
