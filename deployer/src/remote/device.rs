//! Discovered devices and their login credentials

use std::fmt;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::errors::DeployError;

/// A username/password pair.
///
/// The password is kept in a [`SecretString`] so it never shows up in
/// `Debug` output or logs.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: SecretString,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: SecretString::from(password.into()),
        }
    }

    pub fn password(&self) -> &str {
        self.password.expose_secret()
    }
}

impl PartialEq for Credentials {
    fn eq(&self, other: &Self) -> bool {
        self.username == other.username
            && self.password.expose_secret() == other.password.expose_secret()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// A discovered remote host
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    /// Identity the device was discovered under
    pub identifier: String,

    /// Host name as advertised
    pub hostname: String,

    /// Network address; required before any remote operation
    pub address: Option<String>,

    /// Device type key the device was discovered as
    #[serde(default)]
    pub device_type: String,

    /// Login user name
    pub username: String,

    /// Login password, once resolved
    #[serde(skip)]
    pub password: Option<SecretString>,
}

impl Device {
    /// Create a device reachable at `address`
    pub fn new(identifier: impl Into<String>, address: impl Into<String>, username: impl Into<String>) -> Self {
        let address = address.into();
        Self {
            identifier: identifier.into(),
            hostname: address.clone(),
            address: Some(address),
            device_type: String::new(),
            username: username.into(),
            password: None,
        }
    }

    /// Tag the device with the type it was discovered as
    pub fn with_type(mut self, device_type: impl Into<String>) -> Self {
        self.device_type = device_type.into();
        self
    }

    /// The resolved network address
    pub fn address(&self) -> Result<&str, DeployError> {
        self.address
            .as_deref()
            .filter(|a| !a.is_empty())
            .ok_or_else(|| {
                DeployError::TransportError(format!(
                    "Unable to resolve the address of device {}",
                    self.identifier
                ))
            })
    }

    /// Attach login credentials resolved from the credential store.
    ///
    /// A non-empty stored username replaces the discovered one.
    pub fn authenticate(&mut self, credentials: &Credentials) {
        if !credentials.username.is_empty() {
            self.username = credentials.username.clone();
        }
        self.password = Some(credentials.password.clone());
    }

    /// Login credentials, if resolved
    pub fn credentials(&self) -> Option<Credentials> {
        self.password.as_ref().map(|password| Credentials {
            username: self.username.clone(),
            password: password.clone(),
        })
    }
}
