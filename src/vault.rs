//! Credential vault - the encrypted local token store.
//!
//! Holds the REDCap API URL and one or more access tokens. The file on disk
//! is `[24-byte nonce][secretbox]` and the plaintext is the JSON map
//! `{"REDCapURL": [url], "accessTokens": [token, ...]}`.

use crate::crypto::{derive_key, Encryptor};
use crate::error::VaultError;
use crate::storage::{write_atomic, PRIVATE_MODE};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Service location and access tokens.
///
/// Several tokens mean several accounts on the same project, each seeing
/// a disjoint subset of participants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub base_url: String,
    pub access_tokens: Vec<String>,
}

impl Credentials {
    /// Credentials for a fresh store: the given URL and no tokens.
    pub fn empty(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            access_tokens: Vec::new(),
        }
    }

    /// Token used for project-level (metadata) requests.
    pub fn first_token(&self) -> Option<&str> {
        self.access_tokens.first().map(String::as_str)
    }

    pub fn has_base_url(&self) -> bool {
        !self.base_url.trim().is_empty()
    }
}

/// On-disk plaintext layout.
#[derive(Debug, Serialize, Deserialize)]
struct StoredCredentials {
    #[serde(rename = "REDCapURL", default)]
    redcap_url: Vec<String>,
    #[serde(rename = "accessTokens", default)]
    access_tokens: Vec<String>,
}

/// Encrypted token store at a fixed path.
#[derive(Debug, Clone)]
pub struct CredentialVault {
    path: PathBuf,
    default_base_url: String,
}

impl CredentialVault {
    pub fn new(path: impl Into<PathBuf>, default_base_url: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            default_base_url: default_base_url.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Open the store.
    ///
    /// A missing file is a first run and yields empty credentials with the
    /// default URL. A file that fails authentication is an error; callers
    /// must not continue with a guessed key.
    pub fn load(&self, passphrase: &str) -> Result<Credentials, VaultError> {
        let encrypted = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!(
                    "No token store at {}, starting with empty credentials",
                    self.path.display()
                );
                return Ok(Credentials::empty(self.default_base_url.clone()));
            }
            Err(e) => return Err(e.into()),
        };

        let encryptor = Encryptor::new(&derive_key(passphrase));
        let plaintext = encryptor.decrypt(&encrypted)?;

        let stored: StoredCredentials = serde_json::from_slice(&plaintext)
            .map_err(|e| VaultError::Corrupt(format!("token store is not valid JSON: {}", e)))?;

        let base_url = stored
            .redcap_url
            .into_iter()
            .next()
            .unwrap_or_else(|| self.default_base_url.clone());

        debug!(
            "Loaded {} token(s) from {}",
            stored.access_tokens.len(),
            self.path.display()
        );

        Ok(Credentials {
            base_url,
            access_tokens: stored.access_tokens,
        })
    }

    /// Encrypt and atomically replace the store. Every save uses a new nonce.
    pub fn save(&self, passphrase: &str, credentials: &Credentials) -> Result<(), VaultError> {
        let stored = StoredCredentials {
            redcap_url: vec![credentials.base_url.clone()],
            access_tokens: credentials.access_tokens.clone(),
        };
        let plaintext = serde_json::to_vec(&stored)?;

        let encryptor = Encryptor::new(&derive_key(passphrase));
        let encrypted = encryptor.encrypt(&plaintext)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        write_atomic(&self.path, &encrypted, PRIVATE_MODE)?;

        debug!(
            "Saved {} token(s) to {}",
            credentials.access_tokens.len(),
            self.path.display()
        );
        Ok(())
    }

    /// Delete the store. The passphrase must open it first.
    ///
    /// Returns `false` when there was nothing to delete.
    pub fn remove(&self, passphrase: &str) -> Result<bool, VaultError> {
        if !self.exists() {
            return Ok(false);
        }
        self.load(passphrase)?;

        match fs::remove_file(&self.path) {
            Ok(()) => {
                info!("Removed token store {}", self.path.display());
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
