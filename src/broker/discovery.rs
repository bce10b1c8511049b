//! OpenID Connect discovery for the token broker
//!
//! The broker resolves each service's token endpoint from the discovery URL
//! stored with its credentials. Documents change rarely, so each URL is
//! fetched once and kept for the lifetime of the [`DiscoveryCache`].

use std::collections::HashMap;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use url::Url;

use crate::error::{Result, TollgateError};

// ---------------------------------------------------------------------------
// Provider metadata
// ---------------------------------------------------------------------------

/// The subset of an OpenID Connect discovery document the broker needs.
///
/// # Examples
///
/// ```
/// use tollgate::broker::discovery::ProviderMetadata;
///
/// let json = r#"{
///     "issuer": "https://idp.example.com/pool-1",
///     "token_endpoint": "https://auth.example.com/oauth2/token",
///     "jwks_uri": "https://idp.example.com/pool-1/.well-known/jwks.json"
/// }"#;
///
/// let meta: ProviderMetadata = serde_json::from_str(json).unwrap();
/// assert_eq!(meta.token_endpoint, "https://auth.example.com/oauth2/token");
/// assert!(meta.extra.contains_key("jwks_uri"));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderMetadata {
    /// Issuer identifier, when advertised.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,

    /// The URL of the token endpoint (RFC 6749 section 3.2).
    pub token_endpoint: String,

    /// Grant types the provider supports, when advertised.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grant_types_supported: Option<Vec<String>>,

    /// Additional fields not modelled above.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl ProviderMetadata {
    /// Parses and returns the token endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`TollgateError::Protocol`] if the advertised value is not an
    /// absolute URL.
    pub fn token_endpoint_url(&self) -> Result<Url> {
        Url::parse(&self.token_endpoint).map_err(|e| {
            TollgateError::Protocol(format!(
                "discovery document has invalid token_endpoint '{}': {}",
                self.token_endpoint, e
            ))
            .into()
        })
    }
}

// ---------------------------------------------------------------------------
// Fetching
// ---------------------------------------------------------------------------

/// Fetches a discovery document.
///
/// # Errors
///
/// - [`TollgateError::Timeout`] when the request deadline passes
/// - [`TollgateError::ProviderUnreachable`] on transport failures, `429` and `5xx`
/// - [`TollgateError::Protocol`] on other statuses or an unparseable body
pub async fn fetch_provider_metadata(
    http: &reqwest::Client,
    discovery_url: &str,
) -> Result<ProviderMetadata> {
    let url = Url::parse(discovery_url).map_err(|e| {
        TollgateError::Config(format!("invalid discovery URL '{}': {}", discovery_url, e))
    })?;

    tracing::debug!(url = %url, "Fetching discovery document");
    let resp = http.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            TollgateError::timeout("discovery")
        } else {
            TollgateError::ProviderUnreachable(format!("discovery fetch failed: {}", e))
        }
    })?;

    let status = resp.status();
    if !status.is_success() {
        let detail = format!("discovery endpoint {} returned {}", discovery_url, status);
        return Err(match status {
            StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
                TollgateError::timeout("discovery")
            }
            StatusCode::TOO_MANY_REQUESTS => TollgateError::ProviderUnreachable(detail),
            s if s.is_server_error() => TollgateError::ProviderUnreachable(detail),
            _ => TollgateError::Protocol(detail),
        }
        .into());
    }

    let meta: ProviderMetadata = resp.json().await.map_err(|e| {
        TollgateError::Protocol(format!("failed to parse discovery document: {}", e))
    })?;
    meta.token_endpoint_url()?;
    Ok(meta)
}

/// Discovery documents keyed by discovery URL.
#[derive(Debug, Default)]
pub struct DiscoveryCache {
    entries: RwLock<HashMap<String, ProviderMetadata>>,
}

impl DiscoveryCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached document for `discovery_url`, if any.
    pub async fn get(&self, discovery_url: &str) -> Option<ProviderMetadata> {
        self.entries.read().await.get(discovery_url).cloned()
    }

    /// Stores `meta` for `discovery_url`.
    pub async fn insert(&self, discovery_url: &str, meta: ProviderMetadata) {
        self.entries
            .write()
            .await
            .insert(discovery_url.to_string(), meta);
    }

    /// Drops the document for `discovery_url` so the next lookup refetches it.
    pub async fn evict(&self, discovery_url: &str) {
        self.entries.write().await.remove(discovery_url);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_endpoint_must_be_absolute() {
        let meta: ProviderMetadata =
            serde_json::from_str(r#"{"token_endpoint": "/oauth2/token"}"#).unwrap();
        let err = meta.token_endpoint_url().unwrap_err();
        assert!(matches!(
            TollgateError::classify(&err),
            Some(TollgateError::Protocol(_))
        ));
    }

    #[test]
    fn test_missing_token_endpoint_fails_to_parse() {
        assert!(serde_json::from_str::<ProviderMetadata>(r#"{"issuer": "x"}"#).is_err());
    }

    #[tokio::test]
    async fn test_cache_insert_and_evict() {
        let cache = DiscoveryCache::new();
        let meta: ProviderMetadata =
            serde_json::from_str(r#"{"token_endpoint": "https://a/token"}"#).unwrap();
        cache.insert("https://a/.well-known/openid-configuration", meta).await;
        assert!(cache.get("https://a/.well-known/openid-configuration").await.is_some());

        cache.evict("https://a/.well-known/openid-configuration").await;
        assert!(cache.get("https://a/.well-known/openid-configuration").await.is_none());
    }

    #[tokio::test]
    async fn test_invalid_discovery_url_is_config_error() {
        let http = reqwest::Client::new();
        let err = fetch_provider_metadata(&http, "not a url").await.unwrap_err();
        assert!(matches!(
            TollgateError::classify(&err),
            Some(TollgateError::Config(_))
        ));
    }
}
