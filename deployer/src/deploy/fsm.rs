//! Finite State Machine for a single device deployment

use std::fmt;

use serde::{Deserialize, Serialize};

/// Deployment state of one device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceState {
    /// Found by discovery, nothing done yet
    Discovered,

    /// Login and registry credentials attached
    CredentialsResolved,

    /// Artifact available on the device
    InputsPrepared,

    /// Placement descriptor fetched and decoded
    StructureRetrieved,

    /// A placement node matches the device address
    NodeSelected,

    /// Startup command issued
    Launched,

    /// Nothing left to do for this device
    Done,

    /// No placement node for this device
    Skipped,

    /// Aborted by an error
    Failed,
}

impl DeviceState {
    /// Whether the device pipeline has ended
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeviceState::Done | DeviceState::Skipped | DeviceState::Failed)
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceState::Discovered => "discovered",
            DeviceState::CredentialsResolved => "credentials_resolved",
            DeviceState::InputsPrepared => "inputs_prepared",
            DeviceState::StructureRetrieved => "structure_retrieved",
            DeviceState::NodeSelected => "node_selected",
            DeviceState::Launched => "launched",
            DeviceState::Done => "done",
            DeviceState::Skipped => "skipped",
            DeviceState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Device deployment event
#[derive(Debug, Clone)]
pub enum DeviceEvent {
    CredentialsResolved,
    InputsPrepared,
    StructureRetrieved,
    /// Carries the selected node id
    NodeSelected(String),
    NoMatchingNode,
    Launched,
    Finished,
    Failed(String),
}

/// Device deployment FSM
#[derive(Debug, Clone)]
pub struct DeviceFsm {
    state: DeviceState,
    node_id: Option<String>,
    error: Option<String>,
}

impl DeviceFsm {
    /// Create a new FSM in discovered state
    pub fn new() -> Self {
        Self {
            state: DeviceState::Discovered,
            node_id: None,
            error: None,
        }
    }

    /// Get current state
    pub fn state(&self) -> &DeviceState {
        &self.state
    }

    /// Node selected for the device, once known
    pub fn node_id(&self) -> Option<&str> {
        self.node_id.as_deref()
    }

    /// Get error message if any
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: DeviceEvent) -> Result<(), String> {
        let new_state = match (&self.state, &event) {
            (DeviceState::Discovered, DeviceEvent::CredentialsResolved) => {
                DeviceState::CredentialsResolved
            }
            (DeviceState::CredentialsResolved, DeviceEvent::InputsPrepared) => {
                DeviceState::InputsPrepared
            }
            (DeviceState::InputsPrepared, DeviceEvent::StructureRetrieved) => {
                DeviceState::StructureRetrieved
            }

            // From StructureRetrieved
            (DeviceState::StructureRetrieved, DeviceEvent::NodeSelected(node_id)) => {
                self.node_id = Some(node_id.clone());
                DeviceState::NodeSelected
            }
            (DeviceState::StructureRetrieved, DeviceEvent::NoMatchingNode) => DeviceState::Skipped,

            (DeviceState::NodeSelected, DeviceEvent::Launched) => DeviceState::Launched,
            (DeviceState::Launched, DeviceEvent::Finished) => DeviceState::Done,

            // Any live state can fail
            (state, DeviceEvent::Failed(err)) if !state.is_terminal() => {
                self.error = Some(err.clone());
                DeviceState::Failed
            }

            // Invalid transitions
            (state, event) => {
                return Err(format!("Invalid transition: {:?} -> {:?}", state, event));
            }
        };

        self.state = new_state;
        Ok(())
    }
}

impl Default for DeviceFsm {
    fn default() -> Self {
        Self::new()
    }
}
