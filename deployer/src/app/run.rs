//! Main application run loop

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::app::context::DeployContext;
use crate::app::options::AppOptions;
use crate::deploy::input::{DeployTarget, InputSource};
use crate::deploy::orchestrator::{DeploymentReport, Orchestrator};
use crate::errors::DeployError;
use crate::remote::client::RemoteClient;
use crate::remote::command::{CommandRunner, ProcessRunner};
use crate::scanner::actions::{
    ActionRegistry, ActionScope, PortProbeAction, PostDiscoveryAction, RemoteProbeAction,
};
use crate::scanner::{DeviceType, Discovery, SubnetDiscovery};
use crate::storage::credentials::{CredentialSource, CredentialStore, TerminalPrompt};
use crate::storage::settings::{ActionKind, ActionSettings, Settings};
use crate::workers::watcher;

/// Run the deployer: one pass over every device type, then optionally keep
/// redeploying on local changes until `shutdown_signal` fires.
pub async fn run(
    options: AppOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), DeployError> {
    let settings = &options.settings;
    info!("Initializing deployer...");

    let credentials = Arc::new(init_credentials(settings).await?);
    let orchestrator = build_orchestrator(
        settings,
        Arc::new(ProcessRunner),
        Arc::new(SubnetDiscovery::new()),
        credentials.clone(),
    )?;

    preflight(&credentials, &orchestrator)?;

    let mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>> = Box::pin(shutdown_signal);
    tokio::select! {
        _ = &mut shutdown_signal => {
            info!("Shutdown signal received, stopping deployment...");
            return Ok(());
        }
        result = deploy_pass(&orchestrator) => {
            result?;
        }
    }

    if !settings.watch.enabled {
        return Ok(());
    }

    let Some(path) = orchestrator.input().watch_path() else {
        warn!("Container image inputs have nothing local to watch");
        return Ok(());
    };
    let mut watch_options = watcher::Options::new(path, &settings.watch);
    watch_options.ignored_dirs = orchestrator
        .input()
        .ignored_dirs()
        .into_iter()
        .map(str::to_string)
        .collect();

    let orchestrator = &orchestrator;
    watcher::run(
        &watch_options,
        move || async move {
            if let Err(e) = deploy_pass(orchestrator).await {
                error!("Redeployment failed: {}", e);
            }
        },
        tokio::time::sleep,
        shutdown_signal,
    )
    .await;
    Ok(())
}

/// Surface ambiguous or missing persisted credentials before any device is
/// contacted. Interactive stores are left alone; they prompt on first use.
pub fn preflight(credentials: &CredentialStore, orchestrator: &Orchestrator) -> Result<(), DeployError> {
    if matches!(credentials.source(), CredentialSource::File(_)) {
        credentials.resolve_all(orchestrator.credential_keys())?;
    }
    Ok(())
}

/// One deployment pass with its own context
pub async fn deploy_pass(orchestrator: &Orchestrator) -> Result<DeploymentReport, DeployError> {
    let ctx = DeployContext::start();
    let report = orchestrator.run_pass(&ctx).await?;
    ctx.finish();
    for device in report.devices.iter().filter(|d| d.error.is_some()) {
        warn!(
            "{} ({}) ended {}: {}",
            device.identifier,
            device.device_type,
            device.state,
            device.error.as_deref().unwrap_or_default()
        );
    }
    Ok(report)
}

async fn init_credentials(settings: &Settings) -> Result<CredentialStore, DeployError> {
    match &settings.credentials_file {
        Some(path) => CredentialStore::from_file(path).await,
        None => {
            info!("No credential file configured, credentials will be prompted for");
            Ok(CredentialStore::interactive(Box::new(TerminalPrompt)))
        }
    }
}

/// Wire an orchestrator for `settings` on top of the given collaborators.
pub fn build_orchestrator(
    settings: &Settings,
    runner: Arc<dyn CommandRunner>,
    discovery: Arc<dyn Discovery>,
    credentials: Arc<CredentialStore>,
) -> Result<Orchestrator, DeployError> {
    let input = InputSource::from_settings(&settings.input, settings.registry.as_ref())?;
    let client = RemoteClient::new(runner);
    let actions = build_action_registry(settings, &client, &credentials);
    let target = DeployTarget {
        client,
        deployment_dir: settings.deployment_dir.clone(),
        port: settings.port,
    };

    if settings.device_types.is_empty() {
        warn!("No device types configured, nothing will be deployed");
    }

    let orchestrator = settings.device_types.iter().fold(
        Orchestrator::new(input, target, credentials, discovery)
            .with_actions(actions)
            .continue_on_failure(settings.continue_on_failure),
        |orchestrator, device_type| orchestrator.with_device_type(DeviceType::from(device_type)),
    );
    Ok(orchestrator)
}

/// Register the configured actions: global ones for every type first, then
/// each type's own.
pub fn build_action_registry(
    settings: &Settings,
    client: &RemoteClient,
    credentials: &Arc<CredentialStore>,
) -> ActionRegistry {
    let mut registry = ActionRegistry::new();
    for action in &settings.global_actions {
        registry.register(
            ActionScope::All,
            action.options.clone(),
            build_action(action, client, credentials),
        );
    }
    for device_type in &settings.device_types {
        for action in &device_type.actions {
            registry.register(
                ActionScope::One(device_type.key.clone()),
                action.options.clone(),
                build_action(action, client, credentials),
            );
        }
    }
    registry
}

fn build_action(
    action: &ActionSettings,
    client: &RemoteClient,
    credentials: &Arc<CredentialStore>,
) -> Arc<dyn PostDiscoveryAction> {
    match &action.kind {
        ActionKind::RemoteProbe { command } => Arc::new(RemoteProbeAction::new(
            action.key.clone(),
            command.clone(),
            client.clone(),
            credentials.clone(),
        )),
        ActionKind::PortProbe { ports } => {
            Arc::new(PortProbeAction::new(action.key.clone(), ports.clone()))
        }
    }
}
