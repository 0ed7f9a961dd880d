//! File transfer to devices over rsync

use std::path::Path;

use tracing::{debug, info};

use crate::errors::DeployError;
use crate::remote::client::{destination, ssh_transport};
use crate::remote::command::{CommandRunner, Invocation};
use crate::remote::device::Device;

/// rsync exit codes that mean the connection itself failed
const RSYNC_CONNECTION_FAILURES: &[i32] = &[5, 10, 12, 35, 255];

/// Mirror the local directory `origin` into `destination_path` on `device`.
///
/// The sync is additive: files missing locally are left alone on the device.
/// Directories named in `excludes` are not transferred.
pub async fn sync_directory(
    runner: &dyn CommandRunner,
    origin: &Path,
    device: &Device,
    destination_path: &str,
    excludes: &[&str],
) -> Result<(), DeployError> {
    info!(
        "Syncing {} to {}:{}",
        origin.display(),
        device.identifier,
        destination_path
    );
    // Trailing slash: copy the contents of origin, not origin itself
    let source = format!("{}/", origin.display().to_string().trim_end_matches('/'));
    rsync(runner, &source, device, destination_path, excludes).await
}

/// Copy a single local file to `destination_path` on `device`.
pub async fn sync_file(
    runner: &dyn CommandRunner,
    origin: &Path,
    device: &Device,
    destination_path: &str,
) -> Result<(), DeployError> {
    debug!(
        "Copying {} to {}:{}",
        origin.display(),
        device.identifier,
        destination_path
    );
    rsync(runner, &origin.display().to_string(), device, destination_path, &[]).await
}

/// Build the rsync invocation used by both sync helpers.
pub fn rsync_invocation(
    source: &str,
    device: &Device,
    destination_path: &str,
    excludes: &[&str],
) -> Result<Invocation, DeployError> {
    let (transport, password) = ssh_transport(device);
    let target = format!("{}:{}", destination(device)?, destination_path);

    let mut invocation = Invocation::new("rsync").arg("-az");
    for exclude in excludes {
        invocation = invocation.arg("--exclude").arg(*exclude);
    }
    invocation = invocation
        .arg("-e")
        .arg(transport.join(" "))
        .arg(source)
        .arg(target);
    if let Some(password) = password {
        invocation = invocation.env("SSHPASS", password);
    }
    Ok(invocation)
}

async fn rsync(
    runner: &dyn CommandRunner,
    source: &str,
    device: &Device,
    destination_path: &str,
    excludes: &[&str],
) -> Result<(), DeployError> {
    let invocation = rsync_invocation(source, device, destination_path, excludes)?;
    let output = runner.run(&invocation).await?;

    if output.is_success() {
        Ok(())
    } else if RSYNC_CONNECTION_FAILURES.contains(&output.status) {
        Err(DeployError::TransportError(format!(
            "Unable to sync to {}: {}",
            device.identifier,
            output.stderr.trim()
        )))
    } else {
        Err(DeployError::RemoteCommandError {
            command: invocation.to_string(),
            status: output.status,
            stderr: output.stderr.trim().to_string(),
        })
    }
}
