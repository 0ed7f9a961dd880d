//! Docker command construction for image deployments

use tracing::{debug, info};

use crate::errors::DeployError;
use crate::remote::client::RemoteClient;
use crate::remote::command::RemoteCommand;
use crate::remote::device::{Credentials, Device};
use crate::utils::shell_quote;

/// Flags for a single `docker run`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerRunOptions {
    /// Run in the background (`-d`); foreground runs are removed on exit
    pub detached: bool,

    /// Full device access (`--privileged`)
    pub privileged: bool,

    /// Publish this port on the same host port
    pub port: Option<u16>,

    /// Container name
    pub name: Option<String>,

    /// Bind-mount the working directory at the same path and run in it
    pub mount_working_dir: bool,
}

/// Build the `docker run` command line for `image` running `command`.
pub fn container_run_command(
    image: &str,
    command: &str,
    working_dir: &str,
    options: &ContainerRunOptions,
) -> RemoteCommand {
    let mut parts = vec!["docker".to_string(), "run".to_string()];

    if options.detached {
        parts.push("-d".to_string());
    } else {
        parts.push("--rm".to_string());
    }
    if options.privileged {
        parts.push("--privileged".to_string());
    }
    if let Some(port) = options.port {
        parts.push("-p".to_string());
        parts.push(format!("{}:{}", port, port));
    }
    if let Some(name) = &options.name {
        parts.push("--name".to_string());
        parts.push(shell_quote(name));
    }
    if options.mount_working_dir {
        let dir = shell_quote(working_dir);
        parts.push("-v".to_string());
        parts.push(format!("{}:{}", dir, dir));
        parts.push("-w".to_string());
        parts.push(dir);
    }

    parts.push(shell_quote(image));
    if !command.is_empty() {
        parts.push(command.to_string());
    }
    RemoteCommand::new(parts.join(" "))
}

/// Issue a single `docker run` on `device` and return its output.
pub async fn run_container(
    client: &RemoteClient,
    device: &Device,
    image: &str,
    command: &str,
    working_dir: &str,
    options: &ContainerRunOptions,
) -> Result<String, DeployError> {
    let run = container_run_command(image, command, working_dir, options);
    info!("Running container {} on {}", image, device.identifier);
    client.execute(run, None, device).await
}

/// Build `docker login`; the password is written to the command's stdin.
pub fn login_command(server: Option<&str>, credentials: &Credentials) -> RemoteCommand {
    let mut line = String::from("docker login");
    if let Some(server) = server.filter(|s| !s.is_empty()) {
        line.push(' ');
        line.push_str(&shell_quote(server));
    }
    line.push_str(" --username ");
    line.push_str(&shell_quote(&credentials.username));
    line.push_str(" --password-stdin");
    RemoteCommand::new(line).with_stdin(credentials.password.clone())
}

/// Log `device` in to the container registry.
pub async fn registry_login(
    client: &RemoteClient,
    device: &Device,
    server: Option<&str>,
    credentials: &Credentials,
) -> Result<(), DeployError> {
    debug!(
        "Logging in to {} on {}",
        server.unwrap_or("Docker Hub"),
        device.identifier
    );
    client
        .execute(login_command(server, credentials), None, device)
        .await?;
    Ok(())
}

/// Remove a container by name if one exists.
pub async fn remove_container(client: &RemoteClient, device: &Device, name: &str) -> bool {
    client
        .probe(format!("docker rm -f {}", shell_quote(name)), None, device)
        .await
}
