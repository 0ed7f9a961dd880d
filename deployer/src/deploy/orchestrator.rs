//! Deployment orchestrator
//!
//! Walks every discovered device of every configured type through the
//! per-device pipeline, one device at a time:
//! credentials, inputs, structure export, node selection, launch.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::app::context::DeployContext;
use crate::deploy::fsm::{DeviceEvent, DeviceFsm, DeviceState};
use crate::deploy::input::{DeployTarget, InputSource};
use crate::deploy::structure::{select_node, StructureRequest};
use crate::errors::DeployError;
use crate::scanner::actions::ActionRegistry;
use crate::scanner::{DeviceType, Discovery, DiscoveryResult};
use crate::storage::credentials::CredentialStore;

/// Outcome of one device
#[derive(Debug, Clone, Serialize)]
pub struct DeviceReport {
    pub device_type: String,
    pub identifier: String,
    pub address: Option<String>,
    pub state: DeviceState,
    pub node_id: Option<String>,
    pub error: Option<String>,
}

/// Outcome of one pass over all device types
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeploymentReport {
    pub devices: Vec<DeviceReport>,
    pub elapsed: Duration,
}

impl DeploymentReport {
    fn count(&self, state: DeviceState) -> usize {
        self.devices.iter().filter(|d| d.state == state).count()
    }

    pub fn done(&self) -> usize {
        self.count(DeviceState::Done)
    }

    pub fn skipped(&self) -> usize {
        self.count(DeviceState::Skipped)
    }

    pub fn failed(&self) -> usize {
        self.count(DeviceState::Failed)
    }
}

/// Drives deployments for a fixed set of device types
pub struct Orchestrator {
    input: InputSource,
    target: DeployTarget,
    credentials: Arc<CredentialStore>,
    discovery: Arc<dyn Discovery>,
    actions: ActionRegistry,
    device_types: Vec<DeviceType>,
    continue_on_failure: bool,
}

impl Orchestrator {
    pub fn new(
        input: InputSource,
        target: DeployTarget,
        credentials: Arc<CredentialStore>,
        discovery: Arc<dyn Discovery>,
    ) -> Self {
        Self {
            input,
            target,
            credentials,
            discovery,
            actions: ActionRegistry::new(),
            device_types: Vec::new(),
            continue_on_failure: false,
        }
    }

    /// Add a device type; types are deployed in the order they are added
    pub fn with_device_type(mut self, device_type: DeviceType) -> Self {
        self.device_types.push(device_type);
        self
    }

    pub fn with_actions(mut self, actions: ActionRegistry) -> Self {
        self.actions = actions;
        self
    }

    /// Keep going with the next device after a failed remote command
    pub fn continue_on_failure(mut self, continue_on_failure: bool) -> Self {
        self.continue_on_failure = continue_on_failure;
        self
    }

    pub fn input(&self) -> &InputSource {
        &self.input
    }

    /// Every credential key a pass may need, in lookup order
    pub fn credential_keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.device_types.iter().map(|t| t.key.as_str()).collect();
        keys.extend(self.input.registry_key());
        keys
    }

    /// Run one full pass: discover and deploy every device type in order.
    ///
    /// Returns early only on run-aborting errors; device-scoped failures are
    /// recorded in the report.
    pub async fn run_pass(&self, ctx: &DeployContext) -> Result<DeploymentReport, DeployError> {
        let mut report = DeploymentReport::default();

        for device_type in &self.device_types {
            let results = async {
                info!("Discovering devices of type {}", device_type.key);
                self.discovery.discover(device_type, &self.actions).await
            }
            .instrument(ctx.span().clone())
            .await;

            let results = match results {
                Ok(results) => results,
                Err(e) if e.aborts_run(self.continue_on_failure) => return Err(e),
                Err(e) => {
                    warn!("Discovery for {} failed: {}", device_type.key, e);
                    continue;
                }
            };
            if results.is_empty() {
                warn!("No devices of type {} found", device_type.key);
                continue;
            }

            for result in results {
                let span = info_span!(
                    parent: ctx.span(),
                    "device",
                    id = %result.device.identifier,
                    kind = %device_type.key
                );
                let device_report = self.deploy_device(device_type, result).instrument(span).await?;
                report.devices.push(device_report);
            }
        }

        report.elapsed = ctx.elapsed();
        info!(
            milestone = true,
            "Deployment pass finished: {} launched, {} skipped, {} failed",
            report.done(),
            report.skipped(),
            report.failed()
        );
        Ok(report)
    }

    /// Deploy one discovered device.
    ///
    /// Errors that only concern this device end up in the returned report;
    /// run-aborting errors are propagated.
    pub async fn deploy_device(
        &self,
        device_type: &DeviceType,
        result: DiscoveryResult,
    ) -> Result<DeviceReport, DeployError> {
        let mut fsm = DeviceFsm::new();
        let mut report = DeviceReport {
            device_type: device_type.key.clone(),
            identifier: result.device.identifier.clone(),
            address: result.device.address.clone(),
            state: DeviceState::Discovered,
            node_id: None,
            error: None,
        };

        let outcome = self.run_pipeline(&mut fsm, device_type, result).await;
        if let Err(e) = outcome {
            error!("Deployment of {} failed: {}", report.identifier, e);
            if let Err(transition) = fsm.process(DeviceEvent::Failed(e.to_string())) {
                debug!("Failure not recorded for {}: {}", report.identifier, transition);
            }
            if e.aborts_run(self.continue_on_failure) {
                return Err(e);
            }
        }

        report.state = fsm.state().clone();
        report.node_id = fsm.node_id().map(str::to_string);
        report.error = fsm.error().map(str::to_string);
        Ok(report)
    }

    async fn run_pipeline(
        &self,
        fsm: &mut DeviceFsm,
        device_type: &DeviceType,
        result: DiscoveryResult,
    ) -> Result<(), DeployError> {
        let DiscoveryResult { mut device, found } = result;
        let address = device.address()?.to_string();

        // Discovered -> CredentialsResolved
        let credentials = self.credentials.resolve(&device_type.key)?;
        device.authenticate(&credentials);
        let registry_credentials = self
            .input
            .registry_key()
            .map(|key| self.credentials.resolve(key))
            .transpose()?;
        step(fsm, DeviceEvent::CredentialsResolved)?;
        info!("Deploying to {} as {}", address, device.username);

        // CredentialsResolved -> InputsPrepared
        self.input
            .prepare_inputs(&self.target, &device, registry_credentials.as_ref())
            .await?;
        step(fsm, DeviceEvent::InputsPrepared)?;

        // InputsPrepared -> StructureRetrieved
        let request = StructureRequest::new(&device, &self.target.deployment_dir, &found, self.target.port)?;
        let placement = self
            .input
            .export_structure(&self.target, &device, &request)
            .await?;
        step(fsm, DeviceEvent::StructureRetrieved)?;

        // StructureRetrieved -> NodeSelected | Skipped
        let node = match select_node(&placement, &address)? {
            Some(node) => node,
            None => {
                warn!("No placement node for {}, skipping device", address);
                return step(fsm, DeviceEvent::NoMatchingNode);
            }
        };
        step(fsm, DeviceEvent::NodeSelected(node.id.clone()))?;

        // NodeSelected -> Launched -> Done
        self.input
            .launch(&self.target, &device, &request.output_path, node)
            .await?;
        step(fsm, DeviceEvent::Launched)?;
        info!(
            milestone = true,
            "Launched node {} with endpoints [{}]",
            node.id,
            node.endpoint_ids()
        );
        step(fsm, DeviceEvent::Finished)
    }
}

fn step(fsm: &mut DeviceFsm, event: DeviceEvent) -> Result<(), DeployError> {
    fsm.process(event).map_err(DeployError::Internal)
}
