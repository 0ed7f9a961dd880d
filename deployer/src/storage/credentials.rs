//! Credential store
//!
//! Maps a string key (a device type or a registry) to login credentials.
//! Mappings are kept in insertion order and `set` only ever appends, so a
//! stale or duplicated key is reported on lookup instead of being silently
//! replaced.

use std::collections::BTreeMap;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use colored::Colorize;
use serde::Deserialize;
use tracing::{debug, info};

use crate::errors::DeployError;
use crate::filesys::file::File;
use crate::remote::device::Credentials;

/// Asks the operator for credentials that are not in the store
pub trait CredentialPrompt: Send + Sync {
    fn prompt(&self, key: &str) -> Result<Credentials, DeployError>;
}

/// Prompts on the controlling terminal; the password is read without echo.
#[derive(Debug, Default)]
pub struct TerminalPrompt;

impl CredentialPrompt for TerminalPrompt {
    fn prompt(&self, key: &str) -> Result<Credentials, DeployError> {
        println!("{} {}", "Credentials required for".bold(), key.cyan());

        print!("  username: ");
        io::stdout().flush()?;
        let mut username = String::new();
        io::stdin().lock().read_line(&mut username)?;
        let username = username.trim().to_string();
        if username.is_empty() {
            return Err(DeployError::ConfigError(format!(
                "Empty username entered for {}",
                key
            )));
        }

        let password = rpassword::prompt_password("  password: ")?;
        Ok(Credentials::new(username, password))
    }
}

/// Where the store's mappings came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialSource {
    /// Loaded from a persisted JSON file; missing keys are errors
    File(PathBuf),
    /// Resolved by prompting on first use; never persisted
    Interactive,
}

#[derive(Debug, Deserialize)]
struct StoredCredentials {
    username: String,
    password: String,
}

/// Mapping from credential key to [`Credentials`]
pub struct CredentialStore {
    mappings: RwLock<Vec<(String, Credentials)>>,
    source: CredentialSource,
    prompt: Box<dyn CredentialPrompt>,
}

impl CredentialStore {
    /// An empty store that prompts through `prompt` for unknown keys
    pub fn interactive(prompt: Box<dyn CredentialPrompt>) -> Self {
        Self {
            mappings: RwLock::new(Vec::new()),
            source: CredentialSource::Interactive,
            prompt,
        }
    }

    /// Load a store from a persisted credential file.
    ///
    /// The file is a JSON array of single-key objects, each mapping a key to
    /// `{ "username": ..., "password": ... }`. Any failure is a
    /// [`DeployError::ConfigError`]; no partially loaded store is returned.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, DeployError> {
        let path = path.as_ref();
        let file = File::new(path);
        let raw = file.read_string().await.map_err(|e| {
            DeployError::ConfigError(format!(
                "Unable to read credential file {}: {}",
                path.display(),
                e
            ))
        })?;
        let mappings = parse_credentials(&raw).map_err(|e| match e {
            DeployError::ConfigError(msg) => {
                DeployError::ConfigError(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })?;

        info!(
            "Loaded {} credential mappings from {}",
            mappings.len(),
            path.display()
        );

        Ok(Self {
            mappings: RwLock::new(mappings),
            source: CredentialSource::File(path.to_path_buf()),
            prompt: Box::new(TerminalPrompt),
        })
    }

    pub fn source(&self) -> &CredentialSource {
        &self.source
    }

    /// Keys in insertion order
    pub fn keys(&self) -> Vec<String> {
        let mappings = self.mappings.read().unwrap_or_else(|e| e.into_inner());
        mappings.iter().map(|(key, _)| key.clone()).collect()
    }

    /// Append a mapping for `key`. Existing mappings are left in place.
    pub fn set(&self, key: impl Into<String>, credentials: Credentials) {
        let key = key.into();
        debug!("Storing credentials for {}", key);
        let mut mappings = self.mappings.write().unwrap_or_else(|e| e.into_inner());
        mappings.push((key, credentials));
    }

    /// Resolve the credentials for `key`.
    ///
    /// Exactly one mapping must match. With an interactive store an unknown
    /// key is prompted for and remembered for the rest of the process.
    pub fn resolve(&self, key: &str) -> Result<Credentials, DeployError> {
        let found = {
            let mappings = self.mappings.read().unwrap_or_else(|e| e.into_inner());
            let matches: Vec<&Credentials> = mappings
                .iter()
                .filter(|(k, _)| k == key)
                .map(|(_, c)| c)
                .collect();
            match matches.as_slice() {
                [credentials] => Some((*credentials).clone()),
                [] => None,
                many => {
                    return Err(DeployError::ConfigError(format!(
                        "{} credential mappings found for key {}, expected exactly one",
                        many.len(),
                        key
                    )))
                }
            }
        };

        match (found, &self.source) {
            (Some(credentials), _) => Ok(credentials),
            (None, CredentialSource::Interactive) => {
                let credentials = self.prompt.prompt(key)?;
                self.set(key, credentials.clone());
                Ok(credentials)
            }
            (None, CredentialSource::File(path)) => Err(DeployError::ConfigError(format!(
                "No credentials for key {} in {}",
                key,
                path.display()
            ))),
        }
    }

    /// Resolve several keys, failing on the first bad one.
    pub fn resolve_all<'a>(
        &self,
        keys: impl IntoIterator<Item = &'a str>,
    ) -> Result<(), DeployError> {
        for key in keys {
            self.resolve(key)?;
        }
        Ok(())
    }
}

fn parse_credentials(raw: &str) -> Result<Vec<(String, Credentials)>, DeployError> {
    let entries: Vec<BTreeMap<String, StoredCredentials>> = serde_json::from_str(raw)
        .map_err(|e| DeployError::ConfigError(format!("malformed credential file: {}", e)))?;

    let mut mappings = Vec::with_capacity(entries.len());
    for (index, entry) in entries.into_iter().enumerate() {
        if entry.len() != 1 {
            return Err(DeployError::ConfigError(format!(
                "entry {} has {} keys, expected exactly one",
                index,
                entry.len()
            )));
        }
        for (key, stored) in entry {
            if stored.username.is_empty() {
                return Err(DeployError::ConfigError(format!(
                    "entry {} ({}) has an empty username",
                    index, key
                )));
            }
            mappings.push((key, Credentials::new(stored.username, stored.password)));
        }
    }
    Ok(mappings)
}
