use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;
use tollgate::broker::TokenBroker;
use tollgate::config::BrokerConfig;
use tollgate::credentials::{CredentialRecord, CredentialRepository};
use tollgate::retry::RetryPolicy;
use tollgate::secrets::MemorySecretStore;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[allow(dead_code)]
pub const DISCOVERY_PATH: &str = "/pool-1/.well-known/openid-configuration";
#[allow(dead_code)]
pub const TOKEN_PATH: &str = "/oauth2/token";

#[allow(dead_code)]
pub fn temp_config_file(contents: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("failed to create tempdir");
    let config_path = temp_dir.path().join("tollgate.yaml");
    fs::write(&config_path, contents).expect("failed to write config file");
    (temp_dir, config_path)
}

/// Mounts a discovery document pointing at `TOKEN_PATH` on `server`.
#[allow(dead_code)]
pub async fn mount_discovery(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path(DISCOVERY_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "issuer": format!("{}/pool-1", server.uri()),
            "token_endpoint": format!("{}{}", server.uri(), TOKEN_PATH),
            "grant_types_supported": ["client_credentials"]
        })))
        .mount(server)
        .await;
}

/// A successful token endpoint body.
#[allow(dead_code)]
pub fn token_body(token: &str, expires_in: i64) -> serde_json::Value {
    json!({
        "access_token": token,
        "token_type": "Bearer",
        "expires_in": expires_in
    })
}

/// A repository over a fresh memory store holding machine credentials for
/// `service` whose discovery URL points at `server`.
#[allow(dead_code)]
pub async fn seeded_repository(
    server: &MockServer,
    service: &str,
) -> (CredentialRepository, Arc<MemorySecretStore>) {
    let store = Arc::new(MemorySecretStore::new());
    let repo = CredentialRepository::new(store.clone(), "app/tollgate");
    let record = CredentialRecord::machine(
        "client-1",
        "s3cret",
        format!("{}{}", server.uri(), DISCOVERY_PATH),
    );
    repo.save(service, &record)
        .await
        .expect("failed to seed credentials");
    (repo, store)
}

/// A broker over seeded credentials with immediate retries.
#[allow(dead_code)]
pub async fn seeded_broker(server: &MockServer, service: &str) -> TokenBroker {
    let (repo, _) = seeded_repository(server, service).await;
    let config = BrokerConfig {
        timeout_seconds: 5,
        ..BrokerConfig::default()
    };
    TokenBroker::new(repo, &config)
        .expect("failed to build broker")
        .with_retry(RetryPolicy::immediate(3))
}
