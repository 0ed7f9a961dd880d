//! Device discovery.
//!
//! The orchestrator only sees the [`Discovery`] trait. The default
//! implementation scans a subnet with plain async TCP probes; no external
//! binaries (nmap, ping) are required. Hosts are probed as a bounded stream
//! so at most [`MAX_CONCURRENT`] connections are in flight.

pub mod actions;

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use ipnet::Ipv4Net;
use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::errors::DeployError;
use crate::remote::device::Device;
use crate::scanner::actions::{run_actions, ActionMatch, ActionRegistry};
use crate::storage::settings::DeviceTypeSettings;

/// Max concurrent TCP probes to avoid overwhelming the local network.
pub const MAX_CONCURRENT: usize = 64;

/// Shortest accepted prefix; a /16 is already 65534 hosts.
pub const MIN_PREFIX: u8 = 16;

/// Per-probe timeout.
pub(crate) const PROBE_TIMEOUT_MS: u64 = 500;

/// A kind of device to discover
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceType {
    /// Type identifier, also the credential key for its devices
    pub key: String,
    pub cidr: String,
    pub probe_port: u16,
    pub username: String,
}

impl From<&DeviceTypeSettings> for DeviceType {
    fn from(settings: &DeviceTypeSettings) -> Self {
        Self {
            key: settings.key.clone(),
            cidr: settings.cidr.clone(),
            probe_port: settings.probe_port,
            username: settings.username.clone(),
        }
    }
}

/// One device found by a discovery pass
#[derive(Debug, Clone)]
pub struct DiscoveryResult {
    pub device: Device,

    /// Per-action match counts, in binding order
    pub found: Vec<ActionMatch>,
}

/// Produces the devices of one type present on the network
#[async_trait]
pub trait Discovery: Send + Sync {
    async fn discover(
        &self,
        device_type: &DeviceType,
        actions: &ActionRegistry,
    ) -> Result<Vec<DiscoveryResult>, DeployError>;
}

/// Scans the device type's subnet for hosts accepting connections on its
/// probe port.
#[derive(Debug, Clone)]
pub struct SubnetDiscovery {
    probe_timeout: Duration,
}

impl SubnetDiscovery {
    pub fn new() -> Self {
        Self {
            probe_timeout: Duration::from_millis(PROBE_TIMEOUT_MS),
        }
    }
}

impl Default for SubnetDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Discovery for SubnetDiscovery {
    async fn discover(
        &self,
        device_type: &DeviceType,
        actions: &ActionRegistry,
    ) -> Result<Vec<DiscoveryResult>, DeployError> {
        let hosts = scan_subnet(&device_type.cidr, device_type.probe_port, self.probe_timeout).await?;
        let bindings = actions.bindings_for(&device_type.key);

        let mut results = Vec::with_capacity(hosts.len());
        for ip in hosts {
            let device = Device::new(ip.to_string(), ip.to_string(), device_type.username.clone())
                .with_type(&device_type.key);
            let found = run_actions(&device, &bindings).await;
            results.push(DiscoveryResult { device, found });
        }
        Ok(results)
    }
}

/// Scan all hosts in `cidr` (e.g. `"192.168.1.0/24"`) and return those that
/// accept a TCP connection on `port`, in address order.
///
/// Hosts that do not respond within the timeout are silently skipped.
pub async fn scan_subnet(cidr: &str, port: u16, timeout: Duration) -> Result<Vec<IpAddr>, DeployError> {
    let net: Ipv4Net = cidr
        .parse()
        .map_err(|e| DeployError::ConfigError(format!("Invalid CIDR {}: {}", cidr, e)))?;

    if net.prefix_len() < MIN_PREFIX {
        return Err(DeployError::ConfigError(format!(
            "Subnet {} is too large to scan, use a /{} or longer prefix",
            cidr, MIN_PREFIX
        )));
    }

    info!("Scanning {} on port {}", cidr, port);
    let mut found: Vec<IpAddr> = stream::iter(net.hosts().map(IpAddr::V4))
        .map(|ip| async move { probe_port(ip, port, timeout).await.then_some(ip) })
        .buffer_unordered(MAX_CONCURRENT)
        .filter_map(|ip| async move { ip })
        .collect()
        .await;
    found.sort();
    for ip in &found {
        debug!("Found device: {}", ip);
    }

    info!("Scan complete: {} devices found", found.len());
    Ok(found)
}

/// Whether `ip` accepts a TCP connection on `port` within `timeout`.
pub async fn probe_port(ip: IpAddr, port: u16, timeout: Duration) -> bool {
    let addr = SocketAddr::new(ip, port);
    matches!(
        tokio::time::timeout(timeout, TcpStream::connect(addr)).await,
        Ok(Ok(_))
    )
}
