//! Orchestrator unit tests

mod common;

use std::sync::Arc;

use ajideploy::app::context::DeployContext;
use ajideploy::app::run::{build_orchestrator, preflight};
use ajideploy::deploy::fsm::DeviceState;
use ajideploy::deploy::input::{
    ComposeFileInput, ContainerImageInput, DeployTarget, InputSource, Registry, SourcePackageInput,
};
use ajideploy::deploy::orchestrator::Orchestrator;
use ajideploy::errors::DeployError;
use ajideploy::remote::client::RemoteClient;
use ajideploy::remote::command::CommandOutput;
use ajideploy::remote::device::Credentials;
use ajideploy::storage::credentials::{CredentialPrompt, CredentialStore};
use ajideploy::storage::settings::Settings;
use secrecy::ExposeSecret;

use common::{device_type, placement_json, MockRunner, StaticDiscovery};

struct NoPrompt;

impl CredentialPrompt for NoPrompt {
    fn prompt(&self, key: &str) -> Result<Credentials, DeployError> {
        Err(DeployError::ConfigError(format!("unexpected prompt for {}", key)))
    }
}

fn credentials() -> Arc<CredentialStore> {
    let store = CredentialStore::interactive(Box::new(NoPrompt));
    store.set("pi", Credentials::new("pi", "raspberry"));
    store.set("docker", Credentials::new("ci-bot", "hunter2"));
    store.set("docker-compose", Credentials::new("ci-bot", "hunter2"));
    Arc::new(store)
}

fn image_input() -> InputSource {
    InputSource::ContainerImage(ContainerImageInput {
        image: "ghcr.io/ajime/svc:latest".to_string(),
        registry: Registry {
            server: Some("ghcr.io".to_string()),
            credential_key: "docker".to_string(),
        },
    })
}

fn orchestrator(runner: &Arc<MockRunner>, input: InputSource, discovery: StaticDiscovery) -> Orchestrator {
    let target = DeployTarget {
        client: RemoteClient::new(runner.clone()),
        deployment_dir: "/usr/deployment".to_string(),
        port: 8080,
    };
    Orchestrator::new(input, target, credentials(), Arc::new(discovery)).with_device_type(device_type("pi"))
}

fn structure(runner: &MockRunner, device: &str, nodes: &[(&str, &[&str])]) {
    runner.respond(
        &format!("cat /usr/deployment/structure-{}.json", device),
        CommandOutput::success(placement_json(nodes)),
    );
}

#[tokio::test]
async fn test_container_image_launches_selected_node() {
    let runner = MockRunner::new();
    structure(&runner, "10_0_0_5", &[("10.0.0.5", &["h1"]), ("10.0.0.9", &["h2"])]);
    let orchestrator = orchestrator(
        &runner,
        image_input(),
        StaticDiscovery::new().with_device("pi", "10.0.0.5"),
    );

    let report = orchestrator.run_pass(&DeployContext::start()).await.unwrap();
    assert_eq!(report.devices.len(), 1);
    assert_eq!(report.devices[0].state, DeviceState::Done);
    assert_eq!(report.devices[0].node_id.as_deref(), Some("10.0.0.5"));
    assert_eq!(report.done(), 1);

    let commands = runner.commands();
    let launch = commands
        .iter()
        .find(|c| c.contains("docker run -d"))
        .expect("no detached container run");
    assert!(launch.contains("--privileged"));
    assert!(launch.contains("-p 8080:8080"));
    assert!(launch.contains(
        "startup /usr/deployment/structure-10_0_0_5.json --node-id 10.0.0.5 --endpoint-ids h1"
    ));

    // Login, export, read back, launch
    let login = runner.position("docker login").unwrap();
    let export = runner.position("export-structure").unwrap();
    let read = runner.position("cat /usr/deployment/structure-10_0_0_5.json").unwrap();
    let run = runner.position("docker run -d").unwrap();
    assert!(login < export && export < read && read < run);
    assert!(commands[export].contains("--rm"));
    assert!(commands[export].contains("--ip-address 10.0.0.5 --action-keys default --port 8080"));
}

#[tokio::test]
async fn test_passwords_never_reach_process_arguments() {
    let runner = MockRunner::new();
    structure(&runner, "10_0_0_5", &[("10.0.0.5", &["h1"])]);
    orchestrator(&runner, image_input(), StaticDiscovery::new().with_device("pi", "10.0.0.5"))
        .run_pass(&DeployContext::start())
        .await
        .unwrap();

    for call in runner.calls() {
        assert_eq!(call.program, "sshpass");
        assert!(call.env.iter().any(|(key, _)| key == "SSHPASS"));
        assert!(!call
            .args
            .iter()
            .any(|a| a.contains("raspberry") || a.contains("hunter2")));
    }
    let login = runner
        .calls()
        .into_iter()
        .find(|c| c.last_arg().is_some_and(|a| a.contains("docker login")))
        .unwrap();
    assert!(login.last_arg().is_some_and(|a| a.ends_with("--password-stdin")));
    assert_eq!(
        login.stdin.as_ref().map(|s| s.expose_secret().to_string()),
        Some("hunter2".to_string())
    );
}

#[tokio::test]
async fn test_unmatched_device_is_skipped_and_next_continues() {
    let runner = MockRunner::new();
    structure(&runner, "10_0_0_7", &[("10.0.0.5", &["h1"])]);
    structure(&runner, "10_0_0_5", &[("10.0.0.5", &["h1"])]);
    let orchestrator = orchestrator(
        &runner,
        image_input(),
        StaticDiscovery::new()
            .with_device("pi", "10.0.0.7")
            .with_device("pi", "10.0.0.5"),
    );

    let report = orchestrator.run_pass(&DeployContext::start()).await.unwrap();
    assert_eq!(report.devices[0].state, DeviceState::Skipped);
    assert!(report.devices[0].error.is_none());
    assert_eq!(report.devices[1].state, DeviceState::Done);

    let commands = runner.commands();
    assert!(!commands
        .iter()
        .any(|c| c.contains("pi@10.0.0.7") && c.contains("docker run -d")));
    assert!(commands
        .iter()
        .any(|c| c.contains("pi@10.0.0.5") && c.contains("docker run -d")));
}

#[tokio::test]
async fn test_failed_remote_command_aborts_run() {
    let runner = MockRunner::new();
    runner.respond("docker login", CommandOutput::failure(1, "denied"));
    let orchestrator = orchestrator(
        &runner,
        image_input(),
        StaticDiscovery::new()
            .with_device("pi", "10.0.0.5")
            .with_device("pi", "10.0.0.6"),
    );

    let result = orchestrator.run_pass(&DeployContext::start()).await;
    assert!(matches!(result, Err(DeployError::RemoteCommandError { status: 1, .. })));

    // Nothing after the failing step runs, on any device
    assert_eq!(runner.position("export-structure"), None);
    assert_eq!(runner.position("pi@10.0.0.6"), None);
}

#[tokio::test]
async fn test_continue_on_failure_records_failed_device() {
    let runner = MockRunner::new();
    runner.respond("pi@10.0.0.5 docker login", CommandOutput::failure(1, "denied"));
    structure(&runner, "10_0_0_6", &[("10.0.0.6", &["h1"])]);
    let orchestrator = orchestrator(
        &runner,
        image_input(),
        StaticDiscovery::new()
            .with_device("pi", "10.0.0.5")
            .with_device("pi", "10.0.0.6"),
    )
    .continue_on_failure(true);

    let report = orchestrator.run_pass(&DeployContext::start()).await.unwrap();
    assert_eq!(report.devices[0].state, DeviceState::Failed);
    assert!(report.devices[0].error.is_some());
    assert_eq!(report.devices[1].state, DeviceState::Done);
    assert_eq!(report.failed(), 1);
}

#[tokio::test]
async fn test_unreachable_device_does_not_abort_run() {
    let runner = MockRunner::new();
    runner.respond("pi@10.0.0.5", CommandOutput::failure(255, "Connection refused"));
    structure(&runner, "10_0_0_6", &[("10.0.0.6", &["h1"])]);
    let orchestrator = orchestrator(
        &runner,
        image_input(),
        StaticDiscovery::new()
            .with_device("pi", "10.0.0.5")
            .with_device("pi", "10.0.0.6"),
    );

    let report = orchestrator.run_pass(&DeployContext::start()).await.unwrap();
    assert_eq!(report.devices[0].state, DeviceState::Failed);
    assert_eq!(report.devices[1].state, DeviceState::Done);
}

#[tokio::test]
async fn test_duplicate_node_is_integrity_failure() {
    let runner = MockRunner::new();
    structure(&runner, "10_0_0_5", &[("10.0.0.5", &["h1"]), ("10.0.0.5", &["h2"])]);
    let orchestrator = orchestrator(
        &runner,
        image_input(),
        StaticDiscovery::new().with_device("pi", "10.0.0.5"),
    );

    let report = orchestrator.run_pass(&DeployContext::start()).await.unwrap();
    assert_eq!(report.devices[0].state, DeviceState::Failed);
    assert!(report.devices[0]
        .error
        .as_deref()
        .is_some_and(|e| e.contains("Integrity")));
    assert_eq!(runner.position("docker run -d"), None);
}

#[tokio::test]
async fn test_no_devices_found_is_empty_report() {
    let runner = MockRunner::new();
    let report = orchestrator(&runner, image_input(), StaticDiscovery::new())
        .run_pass(&DeployContext::start())
        .await
        .unwrap();
    assert!(report.devices.is_empty());
    assert!(runner.commands().is_empty());
}

#[tokio::test]
async fn test_source_package_builds_and_launches_in_tmux() {
    let package = tempfile::tempdir().unwrap();
    std::fs::write(package.path().join("Package.swift"), "// swift-tools-version:5.9").unwrap();
    std::fs::create_dir_all(package.path().join(".build/debug")).unwrap();

    let runner = MockRunner::new();
    structure(&runner, "10_0_0_5", &[("10.0.0.5", &["h1", "h2"])]);
    let input = InputSource::SourcePackage(SourcePackageInput {
        package_dir: package.path().to_path_buf(),
        product: "App".to_string(),
        fetch_command: "swift package update".to_string(),
        build_command: "swift build --product App".to_string(),
        build_dir: ".build".to_string(),
    });
    let report = orchestrator(&runner, input, StaticDiscovery::new().with_device("pi", "10.0.0.5"))
        .run_pass(&DeployContext::start())
        .await
        .unwrap();
    assert_eq!(report.devices[0].state, DeviceState::Done);

    // Stale local build output is removed before the sync
    assert!(!package.path().join(".build").exists());

    let commands = runner.commands();
    let sync = runner.position("rsync -az").unwrap();
    assert!(commands[sync].contains("--exclude .build"));
    assert!(commands[sync].ends_with("pi@10.0.0.5:/usr/deployment/App"));
    assert!(!commands[sync].contains("--delete"));

    let fetch = runner.position("cd /usr/deployment/App && swift package update").unwrap();
    let build = runner.position("cd /usr/deployment/App && swift build --product App").unwrap();
    let export = runner.position("./.build/debug/App export-structure").unwrap();
    let launch = runner.position("tmux new-session -d -s App-10_0_0_5").unwrap();
    assert!(sync < fetch && fetch < build && build < export && export < launch);
    assert!(commands[launch].contains("--endpoint-ids h1,h2"));
}

#[tokio::test]
async fn test_compose_file_uses_env_files() {
    let dir = tempfile::tempdir().unwrap();
    let compose_file = dir.path().join("docker-compose.yml");
    std::fs::write(&compose_file, "services: {}\n").unwrap();

    let runner = MockRunner::new();
    runner.respond("docker compose version", CommandOutput::failure(127, "not found"));
    structure(&runner, "10_0_0_5", &[("10.0.0.5", &["h1"])]);
    let input = InputSource::ComposeFile(ComposeFileInput {
        compose_file,
        registry: Registry {
            server: None,
            credential_key: "docker-compose".to_string(),
        },
    });
    let report = orchestrator(&runner, input, StaticDiscovery::new().with_device("pi", "10.0.0.5"))
        .run_pass(&DeployContext::start())
        .await
        .unwrap();
    assert_eq!(report.devices[0].state, DeviceState::Done);

    let commands = runner.commands();
    assert!(commands
        .iter()
        .any(|c| c.starts_with("rsync") && c.ends_with("pi@10.0.0.5:/usr/deployment/docker-compose.yml")));
    let export = runner
        .position(
            "docker-compose -f /usr/deployment/docker-compose.yml --env-file /usr/deployment/structure.env up --abort-on-container-exit",
        )
        .unwrap();
    let launch = runner
        .position("docker-compose -f /usr/deployment/docker-compose.yml --env-file /usr/deployment/startup.env up -d")
        .unwrap();
    assert!(export < launch);
}

#[tokio::test]
async fn test_malformed_structure_fails_device_only() {
    let runner = MockRunner::new();
    runner.respond(
        "cat /usr/deployment/structure-10_0_0_5.json",
        CommandOutput::success("garbage"),
    );
    structure(&runner, "10_0_0_6", &[("10.0.0.6", &["h1"])]);
    let orchestrator = orchestrator(
        &runner,
        image_input(),
        StaticDiscovery::new()
            .with_device("pi", "10.0.0.5")
            .with_device("pi", "10.0.0.6"),
    );

    let report = orchestrator.run_pass(&DeployContext::start()).await.unwrap();
    assert_eq!(report.devices[0].state, DeviceState::Failed);
    assert!(report.devices[0]
        .error
        .as_deref()
        .is_some_and(|e| e.contains("Decode")));
    assert_eq!(report.devices[1].state, DeviceState::Done);
    assert!(!runner
        .commands()
        .iter()
        .any(|c| c.contains("pi@10.0.0.5") && c.contains("docker run -d")));
}

fn compose_settings(credentials_file: &std::path::Path, compose_file: &std::path::Path) -> Settings {
    serde_json::from_value(serde_json::json!({
        "credentials_file": credentials_file,
        "input": {"type": "compose_file", "url": compose_file},
        "device_types": [{"key": "pi", "cidr": "10.0.0.0/30"}]
    }))
    .unwrap()
}

#[tokio::test]
async fn test_preflight_rejects_ambiguous_key_before_contacting_devices() {
    let dir = tempfile::tempdir().unwrap();
    let compose_file = dir.path().join("docker-compose.yml");
    std::fs::write(&compose_file, "services: {}\n").unwrap();
    let credentials_file = dir.path().join("credentials.json");
    std::fs::write(
        &credentials_file,
        r#"[
            {"pi": {"username": "pi", "password": "raspberry"}},
            {"docker-compose": {"username": "a", "password": "1"}},
            {"docker-compose": {"username": "b", "password": "2"}}
        ]"#,
    )
    .unwrap();

    let settings = compose_settings(&credentials_file, &compose_file);
    let credentials = Arc::new(CredentialStore::from_file(&credentials_file).await.unwrap());
    let runner = MockRunner::new();
    let orchestrator = build_orchestrator(
        &settings,
        runner.clone(),
        Arc::new(StaticDiscovery::new().with_device("pi", "10.0.0.5")),
        credentials.clone(),
    )
    .unwrap();

    let result = preflight(&credentials, &orchestrator);
    assert!(matches!(result, Err(DeployError::ConfigError(_))));
    assert!(runner.commands().is_empty());
}

#[tokio::test]
async fn test_preflight_accepts_complete_credential_file() {
    let dir = tempfile::tempdir().unwrap();
    let compose_file = dir.path().join("docker-compose.yml");
    std::fs::write(&compose_file, "services: {}\n").unwrap();
    let credentials_file = dir.path().join("credentials.json");
    std::fs::write(
        &credentials_file,
        r#"[
            {"pi": {"username": "pi", "password": "raspberry"}},
            {"docker-compose": {"username": "a", "password": "1"}}
        ]"#,
    )
    .unwrap();

    let settings = compose_settings(&credentials_file, &compose_file);
    let credentials = Arc::new(CredentialStore::from_file(&credentials_file).await.unwrap());
    let orchestrator = build_orchestrator(
        &settings,
        MockRunner::new(),
        Arc::new(StaticDiscovery::new()),
        credentials.clone(),
    )
    .unwrap();

    assert!(preflight(&credentials, &orchestrator).is_ok());
}
