//! Docker Compose deployment helpers

use tracing::{debug, info};

use crate::deploy::transfer::sync_file;
use crate::errors::DeployError;
use crate::filesys::dir::Dir;
use crate::remote::client::RemoteClient;
use crate::remote::command::RemoteCommand;
use crate::remote::device::Device;
use crate::utils::shell_quote;

/// Keys every generated env file carries, in file order
pub const ENV_KEYS: [&str; 3] = ["ENV_FILEPATH", "ENV_COMMAND", "ENV_DEPLOYPATH"];

/// Which service invocation an env file parameterises
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvFileMode {
    ExportStructure,
    Startup,
}

impl EnvFileMode {
    fn file_name(&self) -> &'static str {
        match self {
            EnvFileMode::ExportStructure => "structure.env",
            EnvFileMode::Startup => "startup.env",
        }
    }
}

/// Values substituted into the compose file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvValues {
    /// Structure descriptor path
    pub filepath: String,
    /// Service command line after the program name
    pub command: String,
    /// Deployment directory on the device
    pub deploy_path: String,
}

impl EnvValues {
    /// Render the three `KEY=value` lines
    pub fn render(&self) -> String {
        let values = [&self.filepath, &self.command, &self.deploy_path];
        ENV_KEYS
            .iter()
            .zip(values)
            .map(|(key, value)| format!("{}={}\n", key, value))
            .collect()
    }
}

/// The compose tool flavour installed on a device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComposeTool {
    /// `docker compose` plugin
    Integrated,
    /// `docker-compose` binary
    Standalone,
}

impl ComposeTool {
    fn program(&self) -> &'static str {
        match self {
            ComposeTool::Integrated => "docker compose",
            ComposeTool::Standalone => "docker-compose",
        }
    }
}

/// Build the `up` invocation for `tool`.
///
/// Foreground runs stop the stack once its service exits.
pub fn compose_command(tool: ComposeTool, config_path: &str, env_path: &str, detached: bool) -> RemoteCommand {
    let mut line = format!(
        "{} -f {} --env-file {} up",
        tool.program(),
        shell_quote(config_path),
        shell_quote(env_path)
    );
    if detached {
        line.push_str(" -d");
    } else {
        line.push_str(" --abort-on-container-exit");
    }
    RemoteCommand::new(line)
}

/// Detect the compose tool available on `device`.
pub async fn detect_compose_tool(client: &RemoteClient, device: &Device) -> ComposeTool {
    if client.probe("docker compose version", None, device).await {
        ComposeTool::Integrated
    } else {
        ComposeTool::Standalone
    }
}

/// Bring up the compose stack described by `config_path` on `device`.
pub async fn run_compose(
    client: &RemoteClient,
    config_path: &str,
    env_path: &str,
    device: &Device,
    detached: bool,
) -> Result<String, DeployError> {
    let tool = detect_compose_tool(client, device).await;
    debug!("Using {:?} compose on {}", tool, device.identifier);

    info!("Running compose stack {} on {}", config_path, device.identifier);
    client
        .execute(compose_command(tool, config_path, env_path, detached), None, device)
        .await
}

/// Write the env file for `mode` locally, copy it into `deploy_path` on the
/// device and return its remote path.
pub async fn materialize_env_file(
    client: &RemoteClient,
    device: &Device,
    mode: EnvFileMode,
    values: &EnvValues,
) -> Result<String, DeployError> {
    let temp_dir = Dir::create_temp_dir("ajideploy-env").await?;
    let local_file = temp_dir.file(mode.file_name());
    let remote_path = format!(
        "{}/{}",
        values.deploy_path.trim_end_matches('/'),
        mode.file_name()
    );

    let result = async {
        local_file.write_string(&values.render()).await?;
        sync_file(client.runner().as_ref(), local_file.path(), device, &remote_path).await
    }
    .await;

    temp_dir.delete().await?;
    result.map(|_| remote_path)
}
