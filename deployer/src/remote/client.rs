//! Remote execution client
//!
//! Every remote call is a single non-interactive `ssh` invocation. Password
//! logins go through `sshpass -e`, which reads the secret from `SSHPASS` so it
//! never lands on a command line; devices without a password fall back to key
//! authentication in batch mode.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::errors::DeployError;
use crate::remote::command::{CommandOutput, CommandRunner, Invocation, RemoteCommand};
use crate::remote::device::Device;

/// Exit status ssh reserves for its own connection failures
const SSH_CONNECTION_FAILURE: i32 = 255;

/// Options passed to every ssh connection.
const SSH_OPTIONS: &[&str] = &[
    "-o",
    "StrictHostKeyChecking=no",
    "-o",
    "UserKnownHostsFile=/dev/null",
    "-o",
    "LogLevel=ERROR",
];

/// Opens authenticated sessions to devices and runs commands on them
#[derive(Clone)]
pub struct RemoteClient {
    runner: Arc<dyn CommandRunner>,
}

impl RemoteClient {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// The underlying process runner, shared with the transfer helpers
    pub fn runner(&self) -> &Arc<dyn CommandRunner> {
        &self.runner
    }

    /// Run `command` in assert mode and return its standard output.
    ///
    /// A non-zero exit becomes [`DeployError::RemoteCommandError`].
    pub async fn execute(
        &self,
        command: impl Into<RemoteCommand>,
        working_dir: Option<&str>,
        device: &Device,
    ) -> Result<String, DeployError> {
        let command = command.into().in_dir(working_dir);
        let output = self.run(&command, device).await?;
        if output.is_success() {
            Ok(output.stdout)
        } else {
            Err(DeployError::RemoteCommandError {
                command: command.to_string(),
                status: output.status,
                stderr: output.stderr.trim().to_string(),
            })
        }
    }

    /// Run `command` in probe mode: the exit status becomes a boolean and no
    /// error ever reaches the caller.
    pub async fn probe(
        &self,
        command: impl Into<RemoteCommand>,
        working_dir: Option<&str>,
        device: &Device,
    ) -> bool {
        let command = command.into().in_dir(working_dir);
        match self.run(&command, device).await {
            Ok(output) => {
                debug!("Probe `{}` on {} -> {}", command, device.identifier, output.status);
                output.is_success()
            }
            Err(e) => {
                warn!("Probe `{}` on {} could not run: {}", command, device.identifier, e);
                false
            }
        }
    }

    async fn run(&self, command: &RemoteCommand, device: &Device) -> Result<CommandOutput, DeployError> {
        let invocation = ssh_invocation(device, command)?;
        debug!("[{}] $ {}", device.identifier, command);

        let output = self.runner.run(&invocation).await?;
        if output.status == SSH_CONNECTION_FAILURE {
            return Err(DeployError::TransportError(format!(
                "Unable to reach {} ({}): {}",
                device.identifier,
                device.address()?,
                output.stderr.trim()
            )));
        }
        Ok(output)
    }
}

/// The `ssh` program and arguments used to reach `device`, without the
/// destination. Used for `rsync -e`.
pub fn ssh_transport(device: &Device) -> (Vec<String>, Option<secrecy::SecretString>) {
    let mut parts = Vec::new();
    if device.password.is_some() {
        parts.extend(["sshpass".to_string(), "-e".to_string()]);
    }
    parts.push("ssh".to_string());
    parts.extend(SSH_OPTIONS.iter().map(|s| s.to_string()));
    if device.password.is_none() {
        parts.extend(["-o".to_string(), "BatchMode=yes".to_string()]);
    }
    (parts, device.password.clone())
}

/// `user@address` for `device`
pub fn destination(device: &Device) -> Result<String, DeployError> {
    Ok(format!("{}@{}", device.username, device.address()?))
}

/// Build the local invocation that runs `command` on `device`.
pub fn ssh_invocation(device: &Device, command: &RemoteCommand) -> Result<Invocation, DeployError> {
    let destination = destination(device)?;
    let (mut parts, password) = ssh_transport(device);
    let program = parts.remove(0);

    let mut invocation = Invocation::new(program)
        .args(parts)
        .arg(destination)
        .arg(command.line())
        .stdin(command.stdin().cloned());
    if let Some(password) = password {
        invocation = invocation.env("SSHPASS", password);
    }
    Ok(invocation)
}
