//! Credential persistence integration tests
//!
//! Stores credential records through `open_store` into SQLite files in temp
//! directories and reads them back after reopening. Tests that set
//! environment variables run serially.

use std::sync::Arc;

use serial_test::serial;
use tempfile::TempDir;

use tollgate::config::{StoreBackend, StoreConfig};
use tollgate::credentials::{CredentialField, CredentialRecord, CredentialRepository};
use tollgate::provider::MemoryProviderAdmin;
use tollgate::registrar::{Registrar, RegistrarSettings};
use tollgate::retry::RetryPolicy;
use tollgate::secrets::{open_store, SecretStore};
use tollgate::TollgateError;

const KEY_ENV: &str = "TOLLGATE_STORE_TEST_KEY";

fn sqlite_config(dir: &TempDir) -> StoreConfig {
    StoreConfig {
        backend: StoreBackend::Sqlite,
        path: Some(dir.path().join("secrets.db")),
        key_env: KEY_ENV.to_string(),
        ..StoreConfig::default()
    }
}

#[tokio::test]
#[serial]
async fn test_record_survives_reopen_with_generated_key_file() {
    std::env::remove_var(KEY_ENV);
    let dir = TempDir::new().unwrap();
    let config = sqlite_config(&dir);

    let repo = CredentialRepository::new(open_store(&config).unwrap(), "app/tollgate");
    let record = CredentialRecord::machine(
        "cid-1",
        "s3cret",
        "https://idp.example.com/pool-1/.well-known/openid-configuration",
    )
    .with_pool("pool-1");
    repo.save("calc", &record).await.unwrap();
    drop(repo);

    assert!(dir.path().join("secrets.key").exists());

    let reopened = CredentialRepository::new(open_store(&config).unwrap(), "app/tollgate");
    let loaded = reopened.load("calc").await.unwrap().expect("record");
    assert_eq!(loaded, record);

    let machine = reopened.load_machine("calc").await.unwrap();
    assert_eq!(machine.client_secret, "s3cret");
}

#[tokio::test]
#[serial]
async fn test_key_from_environment_must_match() {
    let dir = TempDir::new().unwrap();
    let config = sqlite_config(&dir);

    std::env::set_var(KEY_ENV, "first passphrase");
    let store = open_store(&config).unwrap();
    store
        .put("app/tollgate/calc/client_secret", "s3cret", tollgate::secrets::PutOptions::secret())
        .await
        .unwrap();
    drop(store);

    std::env::set_var(KEY_ENV, "second passphrase");
    let store = open_store(&config).unwrap();
    let err = store.get("app/tollgate/calc/client_secret").await.unwrap_err();
    std::env::remove_var(KEY_ENV);

    assert!(matches!(
        TollgateError::classify(&err),
        Some(TollgateError::Encryption(_))
    ));
}

#[tokio::test]
#[serial]
async fn test_provision_into_sqlite_and_deprovision() {
    std::env::remove_var(KEY_ENV);
    let dir = TempDir::new().unwrap();
    let store: Arc<dyn SecretStore> = open_store(&sqlite_config(&dir)).unwrap();
    let repo = CredentialRepository::new(store, "app/tollgate");

    let settings = RegistrarSettings {
        pool_name: "AgentPool".to_string(),
        resource_server_identifier: "agent-rs".to_string(),
        resource_server_name: "Agent Resource Server".to_string(),
        scopes: ["read".to_string()].into_iter().collect(),
        client_name_prefix: "Machine-".to_string(),
        token_validity_minutes: 60,
    };
    let registrar = Registrar::new(
        Arc::new(MemoryProviderAdmin::new("https://idp.example.com")),
        repo.clone(),
        settings,
    )
    .with_retry(RetryPolicy::immediate(2));

    let first = registrar.provision("calc").await.unwrap();
    let second = registrar.provision("calc").await.unwrap();
    assert_eq!(first, second);
    assert_eq!(
        repo.get_field("calc", CredentialField::MachineClientId)
            .await
            .unwrap()
            .as_deref(),
        Some(first.client_id.as_str())
    );

    let report = registrar.deprovision("calc").await.unwrap();
    assert_eq!(report.deleted_client_id.as_deref(), Some(first.client_id.as_str()));
    assert!(repo.load("calc").await.unwrap().is_none());
}
