//! Test doubles shared by the unit test targets

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use ajideploy::errors::DeployError;
use ajideploy::remote::command::{CommandOutput, CommandRunner, Invocation};
use ajideploy::remote::device::Device;
use ajideploy::scanner::actions::{run_actions, ActionRegistry};
use ajideploy::scanner::{DeviceType, Discovery, DiscoveryResult};
use async_trait::async_trait;

/// Records every invocation and answers from a scripted list.
///
/// A response applies when its pattern is a substring of the full command
/// line; unmatched invocations succeed with empty output.
#[derive(Default)]
pub struct MockRunner {
    calls: Mutex<Vec<Invocation>>,
    responses: Mutex<Vec<(String, CommandOutput)>>,
}

impl MockRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Answer invocations containing `pattern` with `output`. Earlier
    /// responses win.
    pub fn respond(&self, pattern: &str, output: CommandOutput) {
        self.responses
            .lock()
            .unwrap()
            .push((pattern.to_string(), output));
    }

    /// Full command lines of every invocation so far, in order
    pub fn commands(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(command_line).collect()
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().unwrap().clone()
    }

    /// Index of the first command containing `pattern`
    pub fn position(&self, pattern: &str) -> Option<usize> {
        self.commands().iter().position(|c| c.contains(pattern))
    }
}

fn command_line(invocation: &Invocation) -> String {
    std::iter::once(invocation.program.as_str())
        .chain(invocation.args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ")
}

#[async_trait]
impl CommandRunner for MockRunner {
    async fn run(&self, invocation: &Invocation) -> Result<CommandOutput, DeployError> {
        let line = command_line(invocation);
        self.calls.lock().unwrap().push(invocation.clone());
        let responses = self.responses.lock().unwrap();
        Ok(responses
            .iter()
            .find(|(pattern, _)| line.contains(pattern.as_str()))
            .map(|(_, output)| output.clone())
            .unwrap_or_default())
    }
}

/// Returns a fixed device list per device type
#[derive(Default)]
pub struct StaticDiscovery {
    devices: Vec<(String, Device)>,
}

impl StaticDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(mut self, device_type: &str, address: &str) -> Self {
        let device = Device::new(address, address, "pi").with_type(device_type);
        self.devices.push((device_type.to_string(), device));
        self
    }

    pub fn with_raw_device(mut self, device_type: &str, device: Device) -> Self {
        self.devices.push((device_type.to_string(), device));
        self
    }
}

#[async_trait]
impl Discovery for StaticDiscovery {
    async fn discover(
        &self,
        device_type: &DeviceType,
        actions: &ActionRegistry,
    ) -> Result<Vec<DiscoveryResult>, DeployError> {
        let bindings = actions.bindings_for(&device_type.key);
        let mut results = Vec::new();
        for (key, device) in &self.devices {
            if key == &device_type.key {
                let found = run_actions(device, &bindings).await;
                results.push(DiscoveryResult {
                    device: device.clone(),
                    found,
                });
            }
        }
        Ok(results)
    }
}

/// Placement descriptor with one node per `(address, handler ids)` pair
pub fn placement_json(nodes: &[(&str, &[&str])]) -> String {
    let nodes: Vec<serde_json::Value> = nodes
        .iter()
        .map(|(id, handlers)| {
            serde_json::json!({
                "id": id,
                "exportedEndpoints": handlers
                    .iter()
                    .map(|h| serde_json::json!({ "handlerId": h }))
                    .collect::<Vec<_>>(),
            })
        })
        .collect();
    serde_json::json!({ "nodes": nodes }).to_string()
}

pub fn device_type(key: &str) -> DeviceType {
    DeviceType {
        key: key.to_string(),
        cidr: "10.0.0.0/24".to_string(),
        probe_port: 22,
        username: "pi".to_string(),
    }
}
