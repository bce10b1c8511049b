//! End-to-end tests of the `tollgate` binary
//!
//! Each test writes a config file into a temp directory. Tests that need an
//! identity provider or resource start a `wiremock` server on a
//! multi-threaded runtime and run the binary on a blocking thread so the
//! server keeps answering.

mod common;

use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use tollgate::credentials::{CredentialRecord, CredentialRepository};
use tollgate::secrets::{SecretCipher, SqliteSecretStore};

use common::{mount_discovery, temp_config_file, token_body, DISCOVERY_PATH, TOKEN_PATH};

const KEY_ENV: &str = "TOLLGATE_CLI_TEST_KEY";
const KEY_MATERIAL: &str = "cli-test-passphrase";

fn tollgate() -> Command {
    let mut cmd = Command::cargo_bin("tollgate").unwrap();
    for var in [
        "TOLLGATE_NAMESPACE",
        "TOLLGATE_STORE_BACKEND",
        "TOLLGATE_STORE_PATH",
        "TOLLGATE_ADMIN_URL",
        "TOLLGATE_REGION",
        "TOLLGATE_ENDPOINT_TEMPLATE",
        "RUST_LOG",
    ] {
        cmd.env_remove(var);
    }
    cmd.env(KEY_ENV, KEY_MATERIAL);
    cmd
}

fn sqlite_config(db_path: &Path, endpoint_template: &str) -> String {
    format!(
        r#"
namespace: app/tollgate
store:
  backend: sqlite
  path: {}
  key_env: {}
broker:
  timeout_seconds: 5
  max_attempts: 1
locator:
  endpoint_template: "{}"
logging:
  level: "tollgate=warn"
"#,
        db_path.display(),
        KEY_ENV,
        endpoint_template
    )
}

/// Stores machine credentials for `calc` pointing at `server`.
async fn seed_sqlite(db_path: &Path, server: &MockServer) {
    let store = SqliteSecretStore::new_with_path(
        db_path,
        SecretCipher::from_key_material(KEY_MATERIAL),
    )
    .expect("sqlite store");
    let repo = CredentialRepository::new(std::sync::Arc::new(store), "app/tollgate");
    let record = CredentialRecord::machine(
        "client-1",
        "s3cret",
        format!("{}{}", server.uri(), DISCOVERY_PATH),
    );
    repo.save("calc", &record).await.expect("seed credentials");
}

#[test]
fn test_version_flag() {
    tollgate()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("tollgate"));
}

#[test]
fn test_missing_service_argument_fails() {
    tollgate().arg("token").assert().failure();
}

#[test]
fn test_invalid_config_is_rejected() {
    let (_dir, config_path) = temp_config_file(
        r#"
provider:
  scopes: []
"#,
    );

    tollgate()
        .arg("--config")
        .arg(config_path)
        .arg("token")
        .arg("--service")
        .arg("calc")
        .assert()
        .failure()
        .stderr(predicate::str::contains("scope"));
}

#[test]
fn test_provision_requires_admin_url() {
    let (_dir, config_path) = temp_config_file(
        r#"
store:
  backend: memory
"#,
    );

    tollgate()
        .arg("--config")
        .arg(config_path)
        .arg("provision")
        .arg("--service")
        .arg("calc")
        .assert()
        .failure()
        .stderr(predicate::str::contains("admin_url"));
}

#[test]
fn test_token_without_credentials_fails() {
    let (_dir, config_path) = temp_config_file(
        r#"
store:
  backend: memory
"#,
    );

    tollgate()
        .arg("--config")
        .arg(config_path)
        .arg("token")
        .arg("--service")
        .arg("calc")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Credentials missing"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_token_prints_value_with_show() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("tok-cli", 3600)))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("secrets.db");
    seed_sqlite(&db_path, &server).await;
    let (_cfg_dir, config_path) =
        temp_config_file(&sqlite_config(&db_path, "https://unused.example.com/{resource}"));

    let output = tokio::task::spawn_blocking(move || {
        tollgate()
            .arg("--config")
            .arg(config_path)
            .arg("token")
            .arg("--service")
            .arg("calc")
            .arg("--show")
            .output()
            .unwrap()
    })
    .await
    .unwrap();

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "tok-cli");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_invoke_prints_result() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("tok-cli", 3600)))
        .mount(&server)
        .await;

    let resource = "/runtimes/calc/invocations";
    Mock::given(method("POST"))
        .and(path(resource))
        .and(body_partial_json(json!({"method": "initialize"})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({
                    "jsonrpc": "2.0",
                    "id": 1,
                    "result": {"protocolVersion": "2025-06-18", "capabilities": {}}
                }))
                .insert_header("Mcp-Session-Id", "sess-cli"),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(resource))
        .and(body_partial_json(json!({"method": "notifications/initialized"})))
        .respond_with(ResponseTemplate::new(202))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(resource))
        .and(body_partial_json(json!({"method": "tools/list"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 2,
            "result": {"tools": [{"name": "add", "inputSchema": {"type": "object"}}]}
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(resource))
        .and(body_partial_json(json!({
            "method": "tools/call",
            "params": {"name": "add", "arguments": {"a": 5, "b": 3}}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 3,
            "result": {"content": [{"type": "text", "text": "8"}]}
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path(resource))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("secrets.db");
    seed_sqlite(&db_path, &server).await;
    let template = format!(
        "{}/runtimes/{{resource}}/invocations?qualifier={{qualifier}}",
        server.uri()
    );
    let (_cfg_dir, config_path) = temp_config_file(&sqlite_config(&db_path, &template));

    let output = tokio::task::spawn_blocking(move || {
        tollgate()
            .arg("--config")
            .arg(config_path)
            .arg("invoke")
            .arg("--service")
            .arg("calc")
            .arg("--resource")
            .arg("calc")
            .arg("--tool")
            .arg("add")
            .arg("--args")
            .arg(r#"{"a":5,"b":3}"#)
            .output()
            .unwrap()
    })
    .await
    .unwrap();

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "8");
}

#[test]
fn test_invoke_rejects_non_object_args() {
    let (_dir, config_path) = temp_config_file(
        r#"
store:
  backend: memory
"#,
    );

    tollgate()
        .arg("--config")
        .arg(config_path)
        .arg("invoke")
        .arg("-s")
        .arg("calc")
        .arg("-r")
        .arg("calc")
        .arg("-t")
        .arg("add")
        .arg("-a")
        .arg("[1, 2]")
        .assert()
        .failure()
        .stderr(predicate::str::contains("JSON object"));
}
