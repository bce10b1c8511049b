//! REST client for the identity provider's administrative API
//!
//! Routes (relative to `admin_url`):
//!
//! | Method | Path | Purpose |
//! |--------|------|---------|
//! | GET/POST | `/pools` | list / create pools |
//! | GET/POST | `/pools/{pool}/resource-servers` | list / create resource servers |
//! | PATCH | `/pools/{pool}/resource-servers/{identifier}` | add scopes |
//! | GET/POST | `/pools/{pool}/clients` | list / create clients |
//! | GET/DELETE | `/pools/{pool}/clients/{client_id}` | describe / delete a client |
//!
//! List endpoints return `{"items": [...], "next_token": "..."}` and are
//! followed until `next_token` is absent.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::ProviderConfig;
use crate::error::{Result, TollgateError};
use crate::provider::types::{ClientSpec, M2mClient, ResourceServer, UserPool};
use crate::provider::{pool_discovery_url, IdentityProviderAdmin};

#[derive(Debug, Deserialize)]
struct ListPage<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
    #[serde(default)]
    next_token: Option<String>,
}

#[derive(Debug, Serialize)]
struct CreatePoolRequest<'a> {
    name: &'a str,
}

#[derive(Debug, Serialize)]
struct AddScopesRequest<'a> {
    add_scopes: &'a BTreeSet<String>,
}

/// HTTP implementation of [`IdentityProviderAdmin`].
///
/// # Examples
///
/// ```
/// use tollgate::provider::HttpProviderAdmin;
///
/// let admin = HttpProviderAdmin::new(
///     "https://idp-admin.example.com/v1",
///     "https://idp.example.com",
///     std::time::Duration::from_secs(10),
/// )
/// .unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct HttpProviderAdmin {
    http: Arc<reqwest::Client>,
    admin_url: Url,
    issuer_base: String,
}

impl HttpProviderAdmin {
    /// Creates a client for the admin API at `admin_url`.
    ///
    /// # Errors
    ///
    /// Returns [`TollgateError::Config`] for an unparseable URL or when the
    /// HTTP client cannot be built.
    pub fn new(admin_url: &str, issuer_base: &str, timeout: Duration) -> Result<Self> {
        let admin_url = Url::parse(admin_url)
            .map_err(|e| TollgateError::Config(format!("invalid admin URL '{}': {}", admin_url, e)))?;
        if admin_url.cannot_be_a_base() {
            return Err(TollgateError::Config(format!("admin URL '{}' cannot be a base", admin_url)).into());
        }
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TollgateError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http: Arc::new(http),
            admin_url,
            issuer_base: issuer_base.to_string(),
        })
    }

    /// Builds the client from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`TollgateError::Config`] when `admin_url` is not configured.
    pub fn from_config(config: &ProviderConfig) -> Result<Self> {
        let admin_url = config.admin_url.as_deref().ok_or_else(|| {
            TollgateError::Config(
                "provider.admin_url is not set (config file or TOLLGATE_ADMIN_URL)".to_string(),
            )
        })?;
        Self::new(
            admin_url,
            &config.issuer_base,
            Duration::from_secs(config.timeout_seconds),
        )
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.admin_url.clone();
        url.path_segments_mut()
            .map_err(|_| TollgateError::Config("admin URL cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send(&self, operation: &str, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        tracing::debug!(operation, "Calling identity provider admin API");
        let response = request
            .send()
            .await
            .map_err(|e| transport_error(operation, &e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(status_error(operation, status, &body).into())
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        operation: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<T> {
        let response = self.send(operation, request).await?;
        response.json::<T>().await.map_err(|e| {
            TollgateError::Protocol(format!("{}: unexpected response body: {}", operation, e)).into()
        })
    }

    async fn list_all<T: DeserializeOwned>(&self, operation: &str, segments: &[&str]) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut next_token: Option<String> = None;
        let mut seen = HashSet::new();
        loop {
            let mut url = self.url(segments)?;
            if let Some(token) = &next_token {
                url.query_pairs_mut().append_pair("next_token", token);
            }
            let page: ListPage<T> = self.send_json(operation, self.http.get(url)).await?;
            items.extend(page.items);
            match page.next_token {
                Some(token) if token.is_empty() => break,
                Some(token) if !seen.insert(token.clone()) => {
                    return Err(TollgateError::Protocol(format!(
                        "{}: pagination revisited next_token '{}'",
                        operation, token
                    ))
                    .into());
                }
                Some(token) => next_token = Some(token),
                None => break,
            }
        }
        Ok(items)
    }
}

/// Maps a reqwest transport failure onto the taxonomy.
fn transport_error(operation: &str, err: &reqwest::Error) -> TollgateError {
    if err.is_timeout() {
        TollgateError::timeout(operation)
    } else {
        TollgateError::ProviderUnreachable(format!("{}: {}", operation, err))
    }
}

/// Maps a non-success admin API status onto the taxonomy.
fn status_error(operation: &str, status: StatusCode, body: &str) -> TollgateError {
    let detail = format!("{} returned {}: {}", operation, status, body);
    match status {
        StatusCode::CONFLICT => TollgateError::AlreadyExists(detail),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => TollgateError::PermissionDenied(detail),
        StatusCode::NOT_FOUND => TollgateError::NotFound(detail),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => TollgateError::timeout(operation),
        StatusCode::TOO_MANY_REQUESTS => TollgateError::ProviderUnreachable(detail),
        s if s.is_server_error() => TollgateError::ProviderUnreachable(detail),
        _ => TollgateError::Protocol(detail),
    }
}

#[async_trait]
impl IdentityProviderAdmin for HttpProviderAdmin {
    async fn list_pools(&self) -> Result<Vec<UserPool>> {
        self.list_all("list_pools", &["pools"]).await
    }

    async fn create_pool(&self, name: &str) -> Result<UserPool> {
        let url = self.url(&["pools"])?;
        self.send_json("create_pool", self.http.post(url).json(&CreatePoolRequest { name }))
            .await
    }

    async fn list_resource_servers(&self, pool_id: &str) -> Result<Vec<ResourceServer>> {
        self.list_all("list_resource_servers", &["pools", pool_id, "resource-servers"])
            .await
    }

    async fn create_resource_server(
        &self,
        pool_id: &str,
        server: &ResourceServer,
    ) -> Result<ResourceServer> {
        let url = self.url(&["pools", pool_id, "resource-servers"])?;
        self.send_json("create_resource_server", self.http.post(url).json(server))
            .await
    }

    async fn add_scopes(
        &self,
        pool_id: &str,
        identifier: &str,
        scopes: &BTreeSet<String>,
    ) -> Result<ResourceServer> {
        let url = self.url(&["pools", pool_id, "resource-servers", identifier])?;
        self.send_json(
            "add_scopes",
            self.http
                .patch(url)
                .json(&AddScopesRequest { add_scopes: scopes }),
        )
        .await
    }

    async fn list_clients(&self, pool_id: &str) -> Result<Vec<M2mClient>> {
        self.list_all("list_clients", &["pools", pool_id, "clients"])
            .await
    }

    async fn create_client(&self, pool_id: &str, spec: &ClientSpec) -> Result<M2mClient> {
        let url = self.url(&["pools", pool_id, "clients"])?;
        self.send_json("create_client", self.http.post(url).json(spec))
            .await
    }

    async fn describe_client(&self, pool_id: &str, client_id: &str) -> Result<M2mClient> {
        let url = self.url(&["pools", pool_id, "clients", client_id])?;
        self.send_json("describe_client", self.http.get(url)).await
    }

    async fn delete_client(&self, pool_id: &str, client_id: &str) -> Result<()> {
        let url = self.url(&["pools", pool_id, "clients", client_id])?;
        match self.send("delete_client", self.http.delete(url)).await {
            Ok(_) => Ok(()),
            Err(e) if matches!(TollgateError::classify(&e), Some(TollgateError::NotFound(_))) => {
                tracing::debug!(client_id, "Client already absent");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn discovery_url(&self, pool_id: &str) -> String {
        pool_discovery_url(&self.issuer_base, pool_id)
    }
}
