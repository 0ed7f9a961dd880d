//! Post-discovery actions
//!
//! An action inspects a freshly discovered device and reports how many
//! matches it found (attached cameras, open service ports, ...). Actions with
//! a positive count contribute their key to the structure export so the
//! remote service can pick the endpoints that device should serve.

use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::errors::DeployError;
use crate::remote::client::RemoteClient;
use crate::remote::device::Device;
use crate::scanner::probe_port;
use crate::storage::credentials::CredentialStore;

/// Options bound together with an action
pub type ActionOptions = BTreeMap<String, String>;

/// Which device types a binding applies to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionScope {
    All,
    Some(Vec<String>),
    One(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ScopeKey {
    All,
    Type(String),
}

/// An action run against every discovered device of its scope
#[async_trait]
pub trait PostDiscoveryAction: Send + Sync {
    /// Key reported to the remote service when the action matches
    fn key(&self) -> &str;

    /// Number of matches found on `device`
    async fn run(&self, device: &Device, options: &ActionOptions) -> Result<usize, DeployError>;
}

/// An action together with its options
#[derive(Clone)]
pub struct ActionBinding {
    pub options: ActionOptions,
    pub action: Arc<dyn PostDiscoveryAction>,
}

/// The outcome of one action on one device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionMatch {
    pub key: String,
    pub count: usize,
}

/// Append-only mapping from device type to its action bindings
#[derive(Default, Clone)]
pub struct ActionRegistry {
    bindings: HashMap<ScopeKey, Vec<ActionBinding>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `action` to `scope`. Registering an action twice binds it twice.
    pub fn register(
        &mut self,
        scope: ActionScope,
        options: ActionOptions,
        action: Arc<dyn PostDiscoveryAction>,
    ) {
        let keys = match scope {
            ActionScope::All => vec![ScopeKey::All],
            ActionScope::One(device_type) => vec![ScopeKey::Type(device_type)],
            ActionScope::Some(device_types) => {
                device_types.into_iter().map(ScopeKey::Type).collect()
            }
        };
        for key in keys {
            self.bindings.entry(key).or_default().push(ActionBinding {
                options: options.clone(),
                action: action.clone(),
            });
        }
    }

    /// Bindings that apply to `device_type`: `All` bindings first, then the
    /// type's own, each in registration order.
    pub fn bindings_for(&self, device_type: &str) -> Vec<&ActionBinding> {
        let all = self.bindings.get(&ScopeKey::All).into_iter().flatten();
        let own = self
            .bindings
            .get(&ScopeKey::Type(device_type.to_string()))
            .into_iter()
            .flatten();
        all.chain(own).collect()
    }
}

/// Run every binding against `device`.
///
/// Discovery is best effort: an action that errors is logged and counted as
/// zero matches.
pub async fn run_actions(device: &Device, bindings: &[&ActionBinding]) -> Vec<ActionMatch> {
    let mut matches = Vec::with_capacity(bindings.len());
    for binding in bindings {
        let key = binding.action.key().to_string();
        let count = match binding.action.run(device, &binding.options).await {
            Ok(count) => count,
            Err(e) => {
                warn!("Action {} failed on {}: {}", key, device.identifier, e);
                0
            }
        };
        debug!("Action {} on {}: {} found", key, device.identifier, count);
        matches.push(ActionMatch { key, count });
    }
    matches
}

/// Runs a command on the device and counts its non-empty output lines.
/// A non-zero exit counts as no match.
///
/// Logs in with the credentials of the device's type.
pub struct RemoteProbeAction {
    key: String,
    command: String,
    client: RemoteClient,
    credentials: Arc<CredentialStore>,
}

impl RemoteProbeAction {
    pub fn new(
        key: impl Into<String>,
        command: impl Into<String>,
        client: RemoteClient,
        credentials: Arc<CredentialStore>,
    ) -> Self {
        Self {
            key: key.into(),
            command: command.into(),
            client,
            credentials,
        }
    }
}

#[async_trait]
impl PostDiscoveryAction for RemoteProbeAction {
    fn key(&self) -> &str {
        &self.key
    }

    async fn run(&self, device: &Device, options: &ActionOptions) -> Result<usize, DeployError> {
        let mut device = device.clone();
        device.authenticate(&self.credentials.resolve(&device.device_type)?);

        let working_dir = options.get("working_dir").map(String::as_str);
        match self.client.execute(self.command.as_str(), working_dir, &device).await {
            Ok(output) => Ok(output.lines().filter(|l| !l.trim().is_empty()).count()),
            Err(DeployError::RemoteCommandError { .. }) => Ok(0),
            Err(e) => Err(e),
        }
    }
}

/// Counts how many of `ports` accept a TCP connection on the device.
pub struct PortProbeAction {
    key: String,
    ports: Vec<u16>,
    timeout: Duration,
}

impl PortProbeAction {
    pub fn new(key: impl Into<String>, ports: Vec<u16>) -> Self {
        Self {
            key: key.into(),
            ports,
            timeout: Duration::from_millis(crate::scanner::PROBE_TIMEOUT_MS),
        }
    }
}

#[async_trait]
impl PostDiscoveryAction for PortProbeAction {
    fn key(&self) -> &str {
        &self.key
    }

    async fn run(&self, device: &Device, _options: &ActionOptions) -> Result<usize, DeployError> {
        let ip: IpAddr = device.address()?.parse().map_err(|e| {
            DeployError::TransportError(format!("Invalid address {:?}: {}", device.address, e))
        })?;
        let mut open = 0;
        for &port in &self.ports {
            if probe_port(ip, port, self.timeout).await {
                open += 1;
            }
        }
        Ok(open)
    }
}
