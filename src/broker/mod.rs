//! Token Broker
//!
//! Hands out bearer tokens for provisioned services. Tokens are cached per
//! service name and refreshed once `now >= expires_at - safety_margin`.
//!
//! Each service has its own slot guarded by an async mutex. A caller that
//! finds no live token performs the exchange while holding the slot, so
//! concurrent callers for the same service wait for that one exchange and
//! then read its result. Different services never share a slot.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::Mutex as AsyncMutex;

use crate::clock::{Clock, SystemClock};
use crate::config::BrokerConfig;
use crate::credentials::{CredentialRepository, MachineCredentials};
use crate::error::{Result, TollgateError};
use crate::retry::RetryPolicy;
use crate::telemetry;

pub mod cache;
pub mod discovery;
pub mod exchange;

pub use cache::{AccessToken, TokenCacheEntry};
pub use discovery::{DiscoveryCache, ProviderMetadata};

type Slot = Arc<AsyncMutex<Option<TokenCacheEntry>>>;

/// Caching, single-flight `client_credentials` broker.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use tollgate::broker::TokenBroker;
/// use tollgate::config::BrokerConfig;
/// use tollgate::credentials::CredentialRepository;
/// use tollgate::secrets::MemorySecretStore;
///
/// # async fn example() -> tollgate::Result<()> {
/// let repo = CredentialRepository::new(Arc::new(MemorySecretStore::new()), "app/tollgate");
/// let broker = TokenBroker::new(repo, &BrokerConfig::default())?;
/// let token = broker.get_token("calc").await?;
/// println!("expires at {}", token.expires_at());
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct TokenBroker {
    credentials: CredentialRepository,
    http: reqwest::Client,
    discovery: DiscoveryCache,
    clock: Arc<dyn Clock>,
    safety_margin: chrono::Duration,
    retry: RetryPolicy,
    scope: Option<String>,
    slots: Mutex<HashMap<String, Slot>>,
}

impl TokenBroker {
    /// Creates a broker reading credentials from `credentials`.
    ///
    /// # Errors
    ///
    /// Returns [`TollgateError::Config`] if the HTTP client cannot be built.
    pub fn new(credentials: CredentialRepository, config: &BrokerConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| TollgateError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            credentials,
            http,
            discovery: DiscoveryCache::new(),
            clock: Arc::new(SystemClock),
            safety_margin: chrono::Duration::seconds(config.safety_margin_seconds as i64),
            retry: RetryPolicy::from_config(config),
            scope: config.scope.clone(),
            slots: Mutex::new(HashMap::new()),
        })
    }

    /// Replaces the clock used for expiry decisions.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replaces the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// The credential repository this broker reads from.
    pub fn credentials(&self) -> &CredentialRepository {
        &self.credentials
    }

    fn slot(&self, service_name: &str) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
        slots
            .entry(service_name.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(None)))
            .clone()
    }

    /// Returns a token for `service_name`, exchanging credentials only when
    /// no live cached token exists.
    ///
    /// # Errors
    ///
    /// - [`TollgateError::CredentialsMissing`] when nothing usable is stored
    /// - [`TollgateError::AuthenticationFailed`] when the provider rejects the
    ///   stored secret
    /// - [`TollgateError::ProviderUnreachable`] / [`TollgateError::Timeout`]
    ///   once retries are exhausted
    pub async fn get_token(&self, service_name: &str) -> Result<AccessToken> {
        let slot = self.slot(service_name);
        let mut entry = slot.lock().await;

        let now = self.clock.now();
        if let Some(cached) = entry.as_ref().filter(|e| e.is_live(now, self.safety_margin)) {
            tracing::debug!(service = service_name, "Serving cached token");
            telemetry::record_cache_hit(service_name);
            return Ok(cached.to_access_token());
        }

        let fresh = self.exchange(service_name).await?;
        let token = fresh.to_access_token();
        *entry = Some(fresh);
        Ok(token)
    }

    /// Discards any cached token so the next [`get_token`](Self::get_token)
    /// exchanges again.
    pub async fn invalidate(&self, service_name: &str) {
        let slot = self.slot(service_name);
        let mut entry = slot.lock().await;
        if entry.take().is_some() {
            tracing::info!(service = service_name, "Invalidated cached token");
        }
    }

    /// Replaces `rejected` after a resource refused it while the cache still
    /// considered it live.
    ///
    /// Callers that raced on the same rejected token share one exchange: if
    /// the slot already holds a different live token, that token is returned.
    pub async fn force_refresh(
        &self,
        service_name: &str,
        rejected: &AccessToken,
    ) -> Result<AccessToken> {
        let slot = self.slot(service_name);
        let mut entry = slot.lock().await;

        let now = self.clock.now();
        if let Some(cached) = entry
            .as_ref()
            .filter(|e| e.access_token != rejected.secret() && e.is_live(now, self.safety_margin))
        {
            tracing::debug!(service = service_name, "Token already refreshed by another caller");
            return Ok(cached.to_access_token());
        }
        *entry = None;

        let fresh = self.exchange(service_name).await?;
        let token = fresh.to_access_token();
        *entry = Some(fresh);
        Ok(token)
    }

    /// Loads credentials, resolves the token endpoint and exchanges. Must be
    /// called with the service's slot held.
    async fn exchange(&self, service_name: &str) -> Result<TokenCacheEntry> {
        let credentials = self.credentials.load_machine(service_name).await?;
        let started = Instant::now();

        let result = self.exchange_with(service_name, &credentials).await;
        let outcome = if result.is_ok() { "success" } else { "failure" };
        telemetry::record_exchange(service_name, outcome, started.elapsed());
        result
    }

    async fn exchange_with(
        &self,
        service_name: &str,
        credentials: &MachineCredentials,
    ) -> Result<TokenCacheEntry> {
        let metadata = self.metadata(&credentials.discovery_url).await?;
        let token_endpoint = metadata.token_endpoint_url()?;

        let response = self
            .retry
            .run("token_exchange", || {
                exchange::exchange_client_credentials(
                    &self.http,
                    &token_endpoint,
                    credentials,
                    self.scope.as_deref(),
                )
            })
            .await
            .map_err(|e| {
                tracing::error!(service = service_name, error = %e, "Token exchange failed");
                e
            })?;

        let entry = chrono::Duration::try_seconds(response.expires_in)
            .and_then(|lifetime| {
                TokenCacheEntry::new(
                    response.access_token,
                    response.token_type,
                    self.clock.now(),
                    lifetime,
                )
            })
            .ok_or_else(|| {
                TollgateError::Protocol(format!(
                    "token response has unrepresentable expires_in {}",
                    response.expires_in
                ))
            })?;
        tracing::info!(
            service = service_name,
            expires_in = response.expires_in,
            expires_at = %entry.expires_at,
            "Obtained access token"
        );
        Ok(entry)
    }

    async fn metadata(&self, discovery_url: &str) -> Result<ProviderMetadata> {
        if let Some(meta) = self.discovery.get(discovery_url).await {
            return Ok(meta);
        }
        let meta = self
            .retry
            .run("discovery", || {
                discovery::fetch_provider_metadata(&self.http, discovery_url)
            })
            .await?;
        self.discovery.insert(discovery_url, meta.clone()).await;
        Ok(meta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{CredentialField, CredentialRecord};
    use crate::secrets::{MemorySecretStore, PutOptions, SecretStore};

    fn broker() -> (TokenBroker, Arc<MemorySecretStore>) {
        let store = Arc::new(MemorySecretStore::new());
        let repo = CredentialRepository::new(store.clone(), "ns");
        let broker = TokenBroker::new(repo, &BrokerConfig::default())
            .unwrap()
            .with_retry(RetryPolicy::immediate(3));
        (broker, store)
    }

    #[tokio::test]
    async fn test_missing_credentials_is_fatal() {
        let (broker, _) = broker();
        let err = broker.get_token("calc").await.unwrap_err();
        assert!(matches!(
            TollgateError::classify(&err),
            Some(TollgateError::CredentialsMissing(_))
        ));
    }

    #[tokio::test]
    async fn test_user_credentials_are_refused() {
        let (broker, store) = broker();
        let record = CredentialRecord::machine("id", "secret", "https://idp.test/.well-known/openid-configuration");
        broker.credentials().save("calc", &record).await.unwrap();
        store
            .put(
                &broker.credentials().key("calc", CredentialField::Username),
                "alice",
                PutOptions::plain(),
            )
            .await
            .unwrap();

        let err = broker.get_token("calc").await.unwrap_err();
        assert!(matches!(
            TollgateError::classify(&err),
            Some(TollgateError::CredentialsMissing(_))
        ));
    }

    #[tokio::test]
    async fn test_store_outage_propagates() {
        let (broker, store) = broker();
        store.set_unavailable(true);
        let err = broker.get_token("calc").await.unwrap_err();
        assert!(matches!(
            TollgateError::classify(&err),
            Some(TollgateError::StoreUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_invalidate_without_entry_is_noop() {
        let (broker, _) = broker();
        broker.invalidate("calc").await;
    }

    #[test]
    fn test_slots_are_per_service() {
        let (broker, _) = broker();
        let a = broker.slot("a");
        let a_again = broker.slot("a");
        let b = broker.slot("b");
        assert!(Arc::ptr_eq(&a, &a_again));
        assert!(!Arc::ptr_eq(&a, &b));
    }
}
