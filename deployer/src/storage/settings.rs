//! Settings file management

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::logs::LogLevel;

/// Deployer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Directory for the structured deployment log
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    /// Emit JSON on stdout
    #[serde(default)]
    pub json_logs: bool,

    /// Persisted credential file; prompts interactively when absent
    #[serde(default)]
    pub credentials_file: Option<PathBuf>,

    /// Remote directory everything is deployed into
    #[serde(default = "default_deployment_dir")]
    pub deployment_dir: String,

    /// Port the deployed service listens on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Device types to discover, in deployment order
    #[serde(default)]
    pub device_types: Vec<DeviceTypeSettings>,

    /// Post-discovery actions applied to every device type
    #[serde(default)]
    pub global_actions: Vec<ActionSettings>,

    /// Where the deployable artifact comes from
    pub input: InputSettings,

    /// Container registry used by image and compose inputs
    #[serde(default)]
    pub registry: Option<RegistrySettings>,

    /// Keep going with the next device after a failed remote command
    #[serde(default)]
    pub continue_on_failure: bool,

    /// Redeploy on local changes
    #[serde(default)]
    pub watch: WatchSettings,
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_deployment_dir() -> String {
    "/usr/deployment".to_string()
}

fn default_port() -> u16 {
    8080
}

/// One kind of device to discover
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceTypeSettings {
    /// Device type identifier; also the credential key for its devices
    pub key: String,

    /// Subnet to scan, e.g. `192.168.2.0/24`
    pub cidr: String,

    /// Port that must accept connections for a host to count as found
    #[serde(default = "default_probe_port")]
    pub probe_port: u16,

    /// Login user reported for discovered devices
    #[serde(default = "default_username")]
    pub username: String,

    /// Post-discovery actions for this type only
    #[serde(default)]
    pub actions: Vec<ActionSettings>,
}

fn default_probe_port() -> u16 {
    22
}

fn default_username() -> String {
    "pi".to_string()
}

/// A configured post-discovery action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionSettings {
    /// Action key emitted when the action finds something
    pub key: String,

    #[serde(flatten)]
    pub kind: ActionKind,

    /// Free-form options handed to the action
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

/// What a post-discovery action does
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionKind {
    /// Run a command on the device, counting non-empty output lines
    RemoteProbe { command: String },
    /// Count open TCP ports on the device
    PortProbe { ports: Vec<u16> },
}

/// Artifact source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputSettings {
    ContainerImage {
        image: String,
    },
    SourcePackage {
        /// `file://` URL or local path of the package
        url: String,
        /// Executable product to build and launch
        product: String,
        #[serde(default = "default_fetch_command")]
        fetch_command: String,
        /// `{product}` is substituted
        #[serde(default = "default_build_command")]
        build_command: String,
        #[serde(default = "default_build_dir")]
        build_dir: String,
    },
    ComposeFile {
        /// `file://` URL or local path of the compose file
        url: String,
    },
}

fn default_fetch_command() -> String {
    "swift package update".to_string()
}

fn default_build_command() -> String {
    "swift build --product {product}".to_string()
}

fn default_build_dir() -> String {
    ".build".to_string()
}

/// Container registry settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistrySettings {
    /// Registry host; Docker Hub when empty
    #[serde(default)]
    pub server: Option<String>,

    /// Credential key used for the login
    #[serde(default)]
    pub credential_key: Option<String>,
}

/// Change-watching settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchSettings {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_debounce")]
    pub debounce_secs: u64,
}

fn default_poll_interval() -> u64 {
    2
}

fn default_debounce() -> u64 {
    5
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            poll_interval_secs: default_poll_interval(),
            debounce_secs: default_debounce(),
        }
    }
}
