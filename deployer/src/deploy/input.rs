//! Input sources: where the deployable artifact comes from.
//!
//! Each variant knows how to get the artifact onto a device, how to make the
//! service export its structure there and how to start it.

use std::path::{Path, PathBuf};

use tracing::{debug, info};
use url::Url;

use crate::deploy::compose::{materialize_env_file, run_compose, EnvFileMode, EnvValues};
use crate::deploy::docker::{registry_login, remove_container, run_container, ContainerRunOptions};
use crate::deploy::structure::{read_structure, startup_args, PlacementNode, ServicePlacement, StructureRequest};
use crate::deploy::transfer::{sync_directory, sync_file};
use crate::errors::DeployError;
use crate::filesys::dir::Dir;
use crate::remote::client::RemoteClient;
use crate::remote::device::{Credentials, Device};
use crate::storage::settings::{InputSettings, RegistrySettings};
use crate::utils::{sanitize_identifier, shell_quote};

/// Remote-side parameters shared by every input source
#[derive(Clone)]
pub struct DeployTarget {
    pub client: RemoteClient,
    /// Deployment directory on the device
    pub deployment_dir: String,
    /// Service port
    pub port: u16,
}

/// Container registry used for a login before images are pulled
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registry {
    pub server: Option<String>,
    pub credential_key: String,
}

/// A prebuilt container image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerImageInput {
    pub image: String,
    pub registry: Registry,
}

/// A source package built on the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePackageInput {
    pub package_dir: PathBuf,
    pub product: String,
    pub fetch_command: String,
    pub build_command: String,
    pub build_dir: String,
}

/// A multi-container compose file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposeFileInput {
    pub compose_file: PathBuf,
    pub registry: Registry,
}

/// The artifact origin; selects the whole downstream command set
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSource {
    ContainerImage(ContainerImageInput),
    SourcePackage(SourcePackageInput),
    ComposeFile(ComposeFileInput),
}

impl InputSource {
    /// Build the input source from settings.
    pub fn from_settings(
        input: &InputSettings,
        registry: Option<&RegistrySettings>,
    ) -> Result<Self, DeployError> {
        let registry_for = |default_key: &str| Registry {
            server: registry.and_then(|r| r.server.clone()),
            credential_key: registry
                .and_then(|r| r.credential_key.clone())
                .unwrap_or_else(|| default_key.to_string()),
        };

        match input {
            InputSettings::ContainerImage { image } => {
                if image.is_empty() {
                    return Err(DeployError::ConfigError("Container image name is empty".to_string()));
                }
                Ok(InputSource::ContainerImage(ContainerImageInput {
                    image: image.clone(),
                    registry: registry_for("docker"),
                }))
            }
            InputSettings::SourcePackage {
                url,
                product,
                fetch_command,
                build_command,
                build_dir,
            } => {
                if product.is_empty() {
                    return Err(DeployError::ConfigError("Source package product is empty".to_string()));
                }
                Ok(InputSource::SourcePackage(SourcePackageInput {
                    package_dir: parse_location(url)?,
                    product: product.clone(),
                    fetch_command: fetch_command.clone(),
                    build_command: build_command.replace("{product}", product),
                    build_dir: build_dir.clone(),
                }))
            }
            InputSettings::ComposeFile { url } => Ok(InputSource::ComposeFile(ComposeFileInput {
                compose_file: parse_location(url)?,
                registry: registry_for("docker-compose"),
            })),
        }
    }

    /// Registry credential key, for inputs that log in to a registry
    pub fn registry_key(&self) -> Option<&str> {
        match self {
            InputSource::ContainerImage(input) => Some(input.registry.credential_key.as_str()),
            InputSource::ComposeFile(input) => Some(input.registry.credential_key.as_str()),
            InputSource::SourcePackage(_) => None,
        }
    }

    /// Local path whose changes should trigger a redeploy
    pub fn watch_path(&self) -> Option<&Path> {
        match self {
            InputSource::SourcePackage(input) => Some(input.package_dir.as_path()),
            InputSource::ComposeFile(input) => Some(input.compose_file.as_path()),
            InputSource::ContainerImage(_) => None,
        }
    }

    /// Directory names the watcher and the source sync leave out
    pub fn ignored_dirs(&self) -> Vec<&str> {
        match self {
            InputSource::SourcePackage(input) => vec![input.build_dir.as_str()],
            _ => Vec::new(),
        }
    }

    /// Make the artifact available on `device`.
    pub async fn prepare_inputs(
        &self,
        target: &DeployTarget,
        device: &Device,
        registry_credentials: Option<&Credentials>,
    ) -> Result<(), DeployError> {
        ensure_deployment_dir(&target.client, device, &target.deployment_dir).await?;

        match self {
            InputSource::SourcePackage(input) => input.prepare(target, device).await,
            InputSource::ContainerImage(input) => {
                login(target, device, &input.registry, registry_credentials).await
            }
            InputSource::ComposeFile(input) => {
                login(target, device, &input.registry, registry_credentials).await?;
                sync_file(
                    target.client.runner().as_ref(),
                    &input.compose_file,
                    device,
                    &input.remote_path(&target.deployment_dir),
                )
                .await
            }
        }
    }

    /// Have the service export its structure for `request` and decode it.
    pub async fn export_structure(
        &self,
        target: &DeployTarget,
        device: &Device,
        request: &StructureRequest,
    ) -> Result<ServicePlacement, DeployError> {
        info!(
            "Exporting structure on {} (action keys: {})",
            device.identifier, request.action_keys
        );

        match self {
            InputSource::SourcePackage(input) => {
                let command = format!("{} {}", input.binary(), request.export_args());
                let remote_dir = input.remote_dir(&target.deployment_dir);
                target
                    .client
                    .execute(command, Some(remote_dir.as_str()), device)
                    .await?;
            }
            InputSource::ContainerImage(input) => {
                let options = ContainerRunOptions {
                    mount_working_dir: true,
                    ..Default::default()
                };
                run_container(
                    &target.client,
                    device,
                    &input.image,
                    &request.export_args(),
                    &target.deployment_dir,
                    &options,
                )
                .await?;
            }
            InputSource::ComposeFile(input) => {
                let values = EnvValues {
                    filepath: request.output_path.clone(),
                    command: request.export_args(),
                    deploy_path: target.deployment_dir.clone(),
                };
                let env_path =
                    materialize_env_file(&target.client, device, EnvFileMode::ExportStructure, &values).await?;
                run_compose(
                    &target.client,
                    &input.remote_path(&target.deployment_dir),
                    &env_path,
                    device,
                    false,
                )
                .await?;
            }
        }

        read_structure(&target.client, device, &request.output_path).await
    }

    /// Start the service for `node` on `device`; it keeps running after the
    /// session ends.
    pub async fn launch(
        &self,
        target: &DeployTarget,
        device: &Device,
        structure_path: &str,
        node: &PlacementNode,
    ) -> Result<(), DeployError> {
        let args = startup_args(structure_path, node);

        match self {
            InputSource::SourcePackage(input) => {
                let session = sanitize_identifier(&format!("{}-{}", input.product, node.id));
                let remote_dir = input.remote_dir(&target.deployment_dir);
                let service = format!(
                    "cd {} && {} {}",
                    shell_quote(&remote_dir),
                    input.binary(),
                    args
                );

                if target
                    .client
                    .probe(format!("tmux kill-session -t {}", session), None, device)
                    .await
                {
                    debug!("Stopped previous session {} on {}", session, device.identifier);
                }
                target
                    .client
                    .execute(
                        format!("tmux new-session -d -s {} {}", session, shell_quote(&service)),
                        None,
                        device,
                    )
                    .await?;
            }
            InputSource::ContainerImage(input) => {
                let name = container_name(&input.image);
                if remove_container(&target.client, device, &name).await {
                    debug!("Removed previous container {} on {}", name, device.identifier);
                }
                let options = ContainerRunOptions {
                    detached: true,
                    privileged: true,
                    port: Some(target.port),
                    name: Some(name),
                    mount_working_dir: true,
                };
                run_container(
                    &target.client,
                    device,
                    &input.image,
                    &args,
                    &target.deployment_dir,
                    &options,
                )
                .await?;
            }
            InputSource::ComposeFile(input) => {
                let values = EnvValues {
                    filepath: structure_path.to_string(),
                    command: args,
                    deploy_path: target.deployment_dir.clone(),
                };
                let env_path =
                    materialize_env_file(&target.client, device, EnvFileMode::Startup, &values).await?;
                run_compose(
                    &target.client,
                    &input.remote_path(&target.deployment_dir),
                    &env_path,
                    device,
                    true,
                )
                .await?;
            }
        }
        Ok(())
    }
}

impl SourcePackageInput {
    fn remote_dir(&self, deployment_dir: &str) -> String {
        format!("{}/{}", deployment_dir.trim_end_matches('/'), self.product)
    }

    fn binary(&self) -> String {
        shell_quote(&format!("./{}/debug/{}", self.build_dir, self.product))
    }

    async fn prepare(&self, target: &DeployTarget, device: &Device) -> Result<(), DeployError> {
        let stale = Dir::new(self.package_dir.join(&self.build_dir));
        if stale.exists().await {
            debug!("Removing stale build output {}", stale.path().display());
            stale.delete().await?;
        }

        let remote_dir = self.remote_dir(&target.deployment_dir);
        sync_directory(
            target.client.runner().as_ref(),
            &self.package_dir,
            device,
            &remote_dir,
            &[self.build_dir.as_str()],
        )
        .await?;

        info!("Fetching dependencies on {}", device.identifier);
        target
            .client
            .execute(self.fetch_command.as_str(), Some(remote_dir.as_str()), device)
            .await?;

        info!("Building {} on {}", self.product, device.identifier);
        target
            .client
            .execute(self.build_command.as_str(), Some(remote_dir.as_str()), device)
            .await?;
        Ok(())
    }
}

impl ComposeFileInput {
    fn remote_path(&self, deployment_dir: &str) -> String {
        let name = self
            .compose_file
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("docker-compose.yml");
        format!("{}/{}", deployment_dir.trim_end_matches('/'), name)
    }
}

async fn login(
    target: &DeployTarget,
    device: &Device,
    registry: &Registry,
    credentials: Option<&Credentials>,
) -> Result<(), DeployError> {
    let credentials = credentials.ok_or_else(|| {
        DeployError::ConfigError(format!(
            "No registry credentials resolved for {}",
            registry.credential_key
        ))
    })?;
    registry_login(&target.client, device, registry.server.as_deref(), credentials).await
}

/// Make sure `dir` exists and is writable by the login user on `device`.
pub async fn ensure_deployment_dir(
    client: &RemoteClient,
    device: &Device,
    dir: &str,
) -> Result<(), DeployError> {
    let writable = format!("test -w {}", shell_quote(dir));
    if client.probe(writable.as_str(), None, device).await {
        return Ok(());
    }

    debug!("Creating deployment directory {} on {}", dir, device.identifier);
    client
        .execute(format!("mkdir -p {}", shell_quote(dir)), None, device)
        .await?;
    if client.probe(writable.as_str(), None, device).await {
        Ok(())
    } else {
        Err(DeployError::RemoteCommandError {
            command: writable,
            status: 1,
            stderr: format!("{} is not writable by {}", dir, device.username),
        })
    }
}

/// Container name derived from an image reference: the last path segment
/// without its tag.
pub fn container_name(image: &str) -> String {
    let last = image.rsplit('/').next().unwrap_or(image);
    let name = last.split(':').next().unwrap_or(last);
    if name.is_empty() {
        "service".to_string()
    } else {
        sanitize_identifier(name)
    }
}

/// Resolve a `file://` URL or plain path to a local path.
pub fn parse_location(location: &str) -> Result<PathBuf, DeployError> {
    match Url::parse(location) {
        Ok(url) if url.scheme() == "file" => url
            .to_file_path()
            .map_err(|_| DeployError::ConfigError(format!("Invalid file URL {}", location))),
        Ok(url) => Err(DeployError::ConfigError(format!(
            "Unsupported URL scheme {} in {}",
            url.scheme(),
            location
        ))),
        Err(url::ParseError::RelativeUrlWithoutBase) => Ok(PathBuf::from(location)),
        Err(e) => Err(DeployError::ConfigError(format!("Invalid location {}: {}", location, e))),
    }
}
