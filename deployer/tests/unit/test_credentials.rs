//! Credential store unit tests

use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ajideploy::errors::DeployError;
use ajideploy::remote::device::Credentials;
use ajideploy::storage::credentials::{CredentialPrompt, CredentialSource, CredentialStore};

struct CountingPrompt {
    calls: Arc<AtomicUsize>,
}

impl CredentialPrompt for CountingPrompt {
    fn prompt(&self, key: &str) -> Result<Credentials, DeployError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Credentials::new(format!("{}-user", key), "secret"))
    }
}

fn credential_file(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn test_set_then_resolve_returns_credentials() {
    let store = CredentialStore::interactive(Box::new(CountingPrompt {
        calls: Arc::new(AtomicUsize::new(0)),
    }));
    let credentials = Credentials::new("pi", "raspberry");

    store.set("_workstation._tcp", credentials.clone());
    assert_eq!(store.resolve("_workstation._tcp").unwrap(), credentials);
    assert_eq!(store.keys(), vec!["_workstation._tcp"]);
}

#[test]
fn test_set_twice_makes_key_ambiguous() {
    let store = CredentialStore::interactive(Box::new(CountingPrompt {
        calls: Arc::new(AtomicUsize::new(0)),
    }));
    store.set("docker", Credentials::new("a", "1"));
    store.set("docker", Credentials::new("b", "2"));

    assert!(matches!(store.resolve("docker"), Err(DeployError::ConfigError(_))));
}

#[test]
fn test_interactive_prompts_once_per_key() {
    let calls = Arc::new(AtomicUsize::new(0));
    let store = CredentialStore::interactive(Box::new(CountingPrompt { calls: calls.clone() }));

    let first = store.resolve("pi").unwrap();
    let second = store.resolve("pi").unwrap();
    assert_eq!(first.username, "pi-user");
    assert_eq!(first, second);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    store.resolve("docker").unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(store.source(), &CredentialSource::Interactive);
}

#[tokio::test]
async fn test_file_store_resolves_unique_keys() {
    let file = credential_file(
        r#"[
            {"pi": {"username": "pi", "password": "raspberry"}},
            {"docker": {"username": "bot", "password": "token"}}
        ]"#,
    );
    let store = CredentialStore::from_file(file.path()).await.unwrap();

    assert_eq!(store.resolve("docker").unwrap().password(), "token");
    tokio_test::assert_ok!(store.resolve_all(["pi", "docker"]));
    assert!(matches!(store.source(), CredentialSource::File(_)));
}

#[tokio::test]
async fn test_file_store_duplicate_key_fails_at_resolve() {
    let file = credential_file(
        r#"[
            {"docker-compose": {"username": "a", "password": "1"}},
            {"docker-compose": {"username": "b", "password": "2"}}
        ]"#,
    );
    let store = CredentialStore::from_file(file.path()).await.unwrap();

    assert!(matches!(
        store.resolve("docker-compose"),
        Err(DeployError::ConfigError(_))
    ));
}

#[tokio::test]
async fn test_file_store_missing_key_is_config_error() {
    let file = credential_file(r#"[{"pi": {"username": "pi", "password": "raspberry"}}]"#);
    let store = CredentialStore::from_file(file.path()).await.unwrap();

    assert!(matches!(store.resolve("jetson"), Err(DeployError::ConfigError(_))));
    tokio_test::assert_err!(store.resolve_all(["pi", "jetson"]));
}

#[tokio::test]
async fn test_unreadable_file_is_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = CredentialStore::from_file(dir.path().join("missing.json")).await;
    assert!(matches!(result, Err(DeployError::ConfigError(_))));
}
