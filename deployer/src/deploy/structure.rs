//! Structure exchange with the deployed service.
//!
//! The service decides for itself which placement node a device runs. The
//! deployer asks it to export its structure for a given address, reads the
//! resulting JSON descriptor back from the device and picks the node whose id
//! is that address.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::errors::DeployError;
use crate::remote::client::RemoteClient;
use crate::remote::device::Device;
use crate::scanner::actions::ActionMatch;
use crate::utils::{sanitize_identifier, shell_quote};

/// Fallback action key; always last in the exported key list
pub const DEFAULT_ACTION_KEY: &str = "default";

/// The service's declared mapping of itself onto network locations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServicePlacement {
    pub nodes: Vec<PlacementNode>,
}

/// One network location and the endpoints it serves
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacementNode {
    /// Network address of the node
    pub id: String,

    #[serde(default)]
    pub exported_endpoints: Vec<EndpointDescriptor>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PlacementNode {
    /// Handler ids of the node's endpoints, comma-joined
    pub fn endpoint_ids(&self) -> String {
        self.exported_endpoints
            .iter()
            .map(|e| e.handler_id.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// An endpoint exposed by a placement node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointDescriptor {
    pub handler_id: String,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ServicePlacement {
    /// Decode a descriptor as printed by the service.
    pub fn decode(raw: &str) -> Result<Self, DeployError> {
        serde_json::from_str(raw.trim())
            .map_err(|e| DeployError::DecodeError(format!("Invalid service placement: {}", e)))
    }
}

/// Comma-join the keys of every action that matched, then `default`.
pub fn compose_action_keys(found: &[ActionMatch]) -> String {
    found
        .iter()
        .filter(|m| m.count > 0)
        .map(|m| m.key.as_str())
        .chain(std::iter::once(DEFAULT_ACTION_KEY))
        .collect::<Vec<_>>()
        .join(",")
}

/// Pick the node whose id equals `address`.
///
/// `Ok(None)` means the device has no part in the placement. Two matching
/// nodes mean the descriptor is broken and is reported as an
/// [`DeployError::IntegrityError`].
pub fn select_node<'a>(
    placement: &'a ServicePlacement,
    address: &str,
) -> Result<Option<&'a PlacementNode>, DeployError> {
    let mut matching = placement.nodes.iter().filter(|n| n.id == address);
    let first = matching.next();
    let extra = matching.count();
    if extra > 0 {
        return Err(DeployError::IntegrityError(format!(
            "{} placement nodes claim address {}",
            extra + 1,
            address
        )));
    }
    Ok(first)
}

/// Parameters of one structure export
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructureRequest {
    /// Where the service writes the descriptor, as seen by the service
    pub output_path: String,
    pub address: String,
    pub action_keys: String,
    pub port: u16,
}

impl StructureRequest {
    /// A request for `device`, writing into `deployment_dir`.
    ///
    /// The descriptor file name is derived from the device identifier so
    /// devices never share one.
    pub fn new(device: &Device, deployment_dir: &str, found: &[ActionMatch], port: u16) -> Result<Self, DeployError> {
        Ok(Self {
            output_path: format!(
                "{}/structure-{}.json",
                deployment_dir.trim_end_matches('/'),
                sanitize_identifier(&device.identifier)
            ),
            address: device.address()?.to_string(),
            action_keys: compose_action_keys(found),
            port,
        })
    }

    /// Arguments of the service's `export-structure` command
    pub fn export_args(&self) -> String {
        format!(
            "export-structure {} --ip-address {} --action-keys {} --port {}",
            shell_quote(&self.output_path),
            shell_quote(&self.address),
            shell_quote(&self.action_keys),
            self.port
        )
    }
}

/// Arguments of the service's `startup` command for `node`
pub fn startup_args(structure_path: &str, node: &PlacementNode) -> String {
    format!(
        "startup {} --node-id {} --endpoint-ids {}",
        shell_quote(structure_path),
        shell_quote(&node.id),
        shell_quote(&node.endpoint_ids())
    )
}

/// Read the descriptor the service wrote to `path` on `device` and decode it.
pub async fn read_structure(
    client: &RemoteClient,
    device: &Device,
    path: &str,
) -> Result<ServicePlacement, DeployError> {
    let raw = client
        .execute(format!("cat {}", shell_quote(path)), None, device)
        .await?;
    let placement = ServicePlacement::decode(&raw)?;
    debug!(
        "Structure for {} has {} nodes",
        device.identifier,
        placement.nodes.len()
    );
    Ok(placement)
}
