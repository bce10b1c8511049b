//! Provider Registrar
//!
//! Idempotently establishes the identity provider objects a service needs and
//! persists the resulting credentials.
//!
//! Every `ensure_*` call looks up by natural name before creating. When a
//! create loses a race (`AlreadyExists`), the lookup runs once more and the
//! winner's object is reused; if it still cannot be found the call fails with
//! [`TollgateError::NameConflict`]. Transient provider failures are retried
//! with bounded backoff; everything else propagates unchanged.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;

use crate::config::ProviderConfig;
use crate::credentials::{validate_service_name, CredentialField, CredentialRecord, CredentialRepository};
use crate::error::{Result, TollgateError};
use crate::provider::{ClientSpec, IdentityProviderAdmin, M2mClient, ResourceServer, UserPool};
use crate::retry::RetryPolicy;
use crate::telemetry;

/// Names and scopes shared by every service provisioned in one deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrarSettings {
    /// Shared user pool name
    pub pool_name: String,
    /// Shared resource server identifier
    pub resource_server_identifier: String,
    /// Shared resource server display name
    pub resource_server_name: String,
    /// Scopes granted to each service's client
    pub scopes: BTreeSet<String>,
    /// Client name prefix; the service name is appended
    pub client_name_prefix: String,
    /// Access token lifetime for new clients
    pub token_validity_minutes: u32,
}

impl From<&ProviderConfig> for RegistrarSettings {
    fn from(config: &ProviderConfig) -> Self {
        Self {
            pool_name: config.pool_name.clone(),
            resource_server_identifier: config.resource_server_identifier.clone(),
            resource_server_name: config.resource_server_name.clone(),
            scopes: config.scopes.iter().cloned().collect(),
            client_name_prefix: config.client_name_prefix.clone(),
            token_validity_minutes: config.token_validity_minutes,
        }
    }
}

impl RegistrarSettings {
    /// Client name used for `service_name`.
    pub fn client_name(&self, service_name: &str) -> String {
        format!("{}{}", self.client_name_prefix, service_name)
    }
}

/// What [`Registrar::deprovision`] removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeprovisionReport {
    /// Identifier of the deleted client, if one existed
    pub deleted_client_id: Option<String>,
    /// Whether stored credentials were removed
    pub credentials_removed: bool,
}

/// Creates or reuses provider objects and stores credentials.
#[derive(Debug, Clone)]
pub struct Registrar {
    admin: Arc<dyn IdentityProviderAdmin>,
    credentials: CredentialRepository,
    settings: RegistrarSettings,
    retry: RetryPolicy,
}

fn is_already_exists(err: &anyhow::Error) -> bool {
    matches!(
        TollgateError::classify(err),
        Some(TollgateError::AlreadyExists(_))
    )
}

impl Registrar {
    /// Creates a registrar.
    pub fn new(
        admin: Arc<dyn IdentityProviderAdmin>,
        credentials: CredentialRepository,
        settings: RegistrarSettings,
    ) -> Self {
        Self {
            admin,
            credentials,
            settings,
            retry: RetryPolicy::default(),
        }
    }

    /// Replaces the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// The deployment settings in use.
    pub fn settings(&self) -> &RegistrarSettings {
        &self.settings
    }

    async fn call<T, F, Fut>(&self, operation: &str, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.retry.run(operation, op).await
    }

    /// Returns the pool named `name`, creating it if absent.
    pub async fn ensure_pool(&self, name: &str) -> Result<UserPool> {
        if let Some(pool) = self.call("find_pool", || self.admin.find_pool(name)).await? {
            tracing::info!(pool = name, pool_id = %pool.id, "Reusing existing user pool");
            telemetry::record_provider_object("pool", false);
            return Ok(pool);
        }

        match self.call("create_pool", || self.admin.create_pool(name)).await {
            Ok(pool) => {
                tracing::info!(pool = name, pool_id = %pool.id, "Created user pool");
                telemetry::record_provider_object("pool", true);
                Ok(pool)
            }
            Err(e) if is_already_exists(&e) => {
                tracing::debug!(pool = name, "Pool created concurrently, looking up again");
                self.call("find_pool", || self.admin.find_pool(name))
                    .await?
                    .ok_or_else(|| {
                        TollgateError::NameConflict(format!(
                            "pool '{}' reported as existing but not found",
                            name
                        ))
                        .into()
                    })
            }
            Err(e) => Err(e),
        }
    }

    /// Returns the resource server `identifier` in `pool`, creating it if
    /// absent.
    ///
    /// An existing server is never modified except to add scopes from
    /// `scopes` it does not declare yet.
    pub async fn ensure_resource_server(
        &self,
        pool: &UserPool,
        identifier: &str,
        name: &str,
        scopes: &BTreeSet<String>,
    ) -> Result<ResourceServer> {
        let pool_id = pool.id.as_str();
        let lookup = || self.admin.find_resource_server(pool_id, identifier);

        if let Some(existing) = self.call("find_resource_server", lookup).await? {
            tracing::info!(identifier, "Reusing existing resource server");
            telemetry::record_provider_object("resource_server", false);
            return self.with_scopes(pool_id, existing, scopes).await;
        }

        let wanted = ResourceServer::new(identifier, name, scopes.iter().cloned());
        match self
            .call("create_resource_server", || {
                self.admin.create_resource_server(pool_id, &wanted)
            })
            .await
        {
            Ok(server) => {
                tracing::info!(identifier, "Created resource server");
                telemetry::record_provider_object("resource_server", true);
                Ok(server)
            }
            Err(e) if is_already_exists(&e) => {
                tracing::debug!(identifier, "Resource server created concurrently, looking up again");
                let existing = self
                    .call("find_resource_server", lookup)
                    .await?
                    .ok_or_else(|| {
                        TollgateError::NameConflict(format!(
                            "resource server '{}' reported as existing but not found",
                            identifier
                        ))
                    })?;
                self.with_scopes(pool_id, existing, scopes).await
            }
            Err(e) => Err(e),
        }
    }

    async fn with_scopes(
        &self,
        pool_id: &str,
        server: ResourceServer,
        scopes: &BTreeSet<String>,
    ) -> Result<ResourceServer> {
        let missing = server.missing_scopes(scopes);
        if missing.is_empty() {
            return Ok(server);
        }
        tracing::info!(
            identifier = %server.identifier,
            scopes = ?missing,
            "Adding missing scopes to resource server"
        );
        self.call("add_scopes", || {
            self.admin.add_scopes(pool_id, &server.identifier, &missing)
        })
        .await
    }

    /// Returns the M2M client `client_name` in `pool`, creating it if absent.
    ///
    /// New clients hold exactly the `client_credentials` grant and the
    /// qualified forms of `scopes`. A reused client is returned as listed,
    /// which usually means without its secret.
    pub async fn ensure_m2m_client(
        &self,
        pool: &UserPool,
        client_name: &str,
        server: &ResourceServer,
        scopes: &BTreeSet<String>,
    ) -> Result<M2mClient> {
        let pool_id = pool.id.as_str();
        let lookup = || self.admin.find_client(pool_id, client_name);

        if let Some(existing) = self.call("find_client", lookup).await? {
            if !existing.is_machine_only() {
                tracing::warn!(client = client_name, "Existing client allows grants other than client_credentials");
            }
            tracing::info!(client = client_name, client_id = %existing.client_id, "Reusing existing M2M client");
            telemetry::record_provider_object("client", false);
            return Ok(existing);
        }

        let spec = ClientSpec::machine(
            client_name,
            server,
            scopes,
            self.settings.token_validity_minutes,
        );
        match self
            .call("create_client", || self.admin.create_client(pool_id, &spec))
            .await
        {
            Ok(client) => {
                tracing::info!(client = client_name, client_id = %client.client_id, "Created M2M client");
                telemetry::record_provider_object("client", true);
                Ok(client)
            }
            Err(e) if is_already_exists(&e) => {
                tracing::debug!(client = client_name, "Client created concurrently, looking up again");
                self.call("find_client", lookup).await?.ok_or_else(|| {
                    TollgateError::NameConflict(format!(
                        "client '{}' reported as existing but not found",
                        client_name
                    ))
                    .into()
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Resolves the secret of `client`: from the client itself, from the
    /// provider, or from the previously stored record.
    async fn client_secret(&self, service_name: &str, client: &M2mClient) -> Result<String> {
        if let Some(secret) = &client.client_secret {
            return Ok(secret.clone());
        }

        let described = self
            .call("describe_client", || {
                self.admin.describe_client(&client.pool_id, &client.client_id)
            })
            .await?;
        if let Some(secret) = described.client_secret {
            return Ok(secret);
        }

        let stored_id = self
            .credentials
            .get_field(service_name, CredentialField::MachineClientId)
            .await?;
        if stored_id.as_deref() == Some(client.client_id.as_str()) {
            if let Some(secret) = self
                .credentials
                .get_field(service_name, CredentialField::ClientSecret)
                .await?
            {
                tracing::debug!(service = service_name, "Using previously stored client secret");
                return Ok(secret);
            }
        }

        Err(TollgateError::CredentialsMissing(format!(
            "secret for client '{}' is not available from the provider or the store",
            client.client_id
        ))
        .into())
    }

    /// Provisions `service_name` and stores its credentials.
    ///
    /// Re-running with the same settings creates nothing new and yields an
    /// identical record.
    ///
    /// # Errors
    ///
    /// - [`TollgateError::Config`] for an invalid service name
    /// - [`TollgateError::PermissionDenied`] if the provider refuses
    /// - [`TollgateError::ProviderUnreachable`] / [`TollgateError::Timeout`]
    ///   after retries are exhausted
    /// - [`TollgateError::NameConflict`] when a race cannot be resolved
    /// - [`TollgateError::CredentialsMissing`] when a reused client's secret
    ///   cannot be recovered
    pub async fn provision(&self, service_name: &str) -> Result<CredentialRecord> {
        validate_service_name(service_name)?;
        tracing::info!(service = service_name, "Provisioning service");

        let settings = &self.settings;
        let pool = self.ensure_pool(&settings.pool_name).await?;
        let server = self
            .ensure_resource_server(
                &pool,
                &settings.resource_server_identifier,
                &settings.resource_server_name,
                &settings.scopes,
            )
            .await?;
        let client = self
            .ensure_m2m_client(
                &pool,
                &settings.client_name(service_name),
                &server,
                &settings.scopes,
            )
            .await?;

        let secret = self.client_secret(service_name, &client).await?;
        let record = CredentialRecord::machine(
            client.client_id.clone(),
            secret,
            self.admin.discovery_url(&pool.id),
        )
        .with_pool(pool.id.clone());

        if self.credentials.load(service_name).await?.as_ref() == Some(&record) {
            tracing::info!(service = service_name, "Stored credentials already current");
        } else {
            self.credentials.save(service_name, &record).await?;
            tracing::info!(
                service = service_name,
                client_id = %record.client_id,
                "Stored credentials"
            );
        }

        Ok(record)
    }

    /// Removes the client and stored credentials of `service_name`.
    ///
    /// The shared pool and resource server are kept for other services.
    pub async fn deprovision(&self, service_name: &str) -> Result<DeprovisionReport> {
        validate_service_name(service_name)?;
        tracing::info!(service = service_name, "Deprovisioning service");

        let mut report = DeprovisionReport::default();
        let pool_name = self.settings.pool_name.as_str();

        if let Some(pool) = self.call("find_pool", || self.admin.find_pool(pool_name)).await? {
            let client_name = self.settings.client_name(service_name);
            let found = self
                .call("find_client", || self.admin.find_client(&pool.id, &client_name))
                .await?;
            if let Some(client) = found {
                self.call("delete_client", || {
                    self.admin.delete_client(&pool.id, &client.client_id)
                })
                .await?;
                tracing::info!(client_id = %client.client_id, "Deleted M2M client");
                report.deleted_client_id = Some(client.client_id);
            }
        } else {
            tracing::warn!(pool = pool_name, "Pool not found; nothing to delete at the provider");
        }

        self.credentials.delete(service_name).await?;
        report.credentials_removed = true;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{GrantType, MemoryProviderAdmin, ProviderOp};
    use crate::secrets::MemorySecretStore;

    fn settings() -> RegistrarSettings {
        RegistrarSettings {
            pool_name: "pool".into(),
            resource_server_identifier: "rs".into(),
            resource_server_name: "Resource".into(),
            scopes: ["read".to_string()].into(),
            client_name_prefix: "m2m-".into(),
            token_validity_minutes: 60,
        }
    }

    fn registrar() -> (Registrar, Arc<MemoryProviderAdmin>, Arc<MemorySecretStore>) {
        let idp = Arc::new(MemoryProviderAdmin::default());
        let store = Arc::new(MemorySecretStore::new());
        let repo = CredentialRepository::new(store.clone(), "ns");
        let registrar = Registrar::new(idp.clone(), repo, settings()).with_retry(RetryPolicy::immediate(3));
        (registrar, idp, store)
    }

    #[tokio::test]
    async fn test_ensure_resource_server_idempotent() {
        let (registrar, idp, _) = registrar();
        let pool = registrar.ensure_pool("pool").await.unwrap();
        let scopes: BTreeSet<String> = ["read".to_string()].into();

        let first = registrar.ensure_resource_server(&pool, "rs", "Resource", &scopes).await.unwrap();
        let second = registrar.ensure_resource_server(&pool, "rs", "Resource", &scopes).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(idp.created(ProviderOp::CreateResourceServer), 1);
        assert_eq!(idp.resource_server_count(), 1);
    }

    #[tokio::test]
    async fn test_existing_server_only_gains_scopes() {
        let (registrar, idp, _) = registrar();
        let pool = registrar.ensure_pool("pool").await.unwrap();
        registrar
            .ensure_resource_server(&pool, "rs", "Resource", &["read".to_string()].into())
            .await
            .unwrap();

        let wider: BTreeSet<String> = ["read".to_string(), "write".to_string()].into();
        let server = registrar.ensure_resource_server(&pool, "rs", "Renamed", &wider).await.unwrap();

        assert_eq!(server.scopes, wider);
        assert_eq!(server.name, "Resource");
        assert_eq!(idp.calls(ProviderOp::AddScopes), 1);
    }

    #[tokio::test]
    async fn test_lost_race_reuses_winner() {
        let (registrar, idp, _) = registrar();
        let pool = registrar.ensure_pool("pool").await.unwrap();
        idp.lose_next_race(ProviderOp::CreateClient, 1);

        let server = ResourceServer::new("rs", "Resource", ["read"]);
        let client = registrar
            .ensure_m2m_client(&pool, "m2m-calc", &server, &["read".to_string()].into())
            .await
            .unwrap();

        assert_eq!(client.client_name, "m2m-calc");
        assert_eq!(idp.client_count(), 1);
        assert_eq!(idp.calls(ProviderOp::ListClients), 2);
    }

    #[tokio::test]
    async fn test_unresolved_conflict_is_name_conflict() {
        let (registrar, idp, _) = registrar();
        let pool = registrar.ensure_pool("pool").await.unwrap();
        idp.fail_next(
            ProviderOp::CreateResourceServer,
            TollgateError::AlreadyExists("rs".into()),
        );

        let err = registrar
            .ensure_resource_server(&pool, "rs", "Resource", &["read".to_string()].into())
            .await
            .unwrap_err();
        assert!(matches!(
            TollgateError::classify(&err),
            Some(TollgateError::NameConflict(_))
        ));
    }

    #[tokio::test]
    async fn test_transient_failures_retried() {
        let (registrar, idp, _) = registrar();
        idp.fail_next(ProviderOp::ListPools, TollgateError::ProviderUnreachable("503".into()));
        idp.fail_next(ProviderOp::ListPools, TollgateError::timeout("list_pools"));

        registrar.ensure_pool("pool").await.unwrap();
        assert_eq!(idp.calls(ProviderOp::ListPools), 3);
    }

    #[tokio::test]
    async fn test_permission_denied_is_fatal() {
        let (registrar, idp, _) = registrar();
        idp.fail_next(ProviderOp::ListPools, TollgateError::PermissionDenied("no".into()));

        let err = registrar.provision("calc").await.unwrap_err();
        assert!(matches!(
            TollgateError::classify(&err),
            Some(TollgateError::PermissionDenied(_))
        ));
        assert_eq!(idp.calls(ProviderOp::ListPools), 1);
    }

    #[tokio::test]
    async fn test_provision_writes_record() {
        let (registrar, _idp, store) = registrar();
        let record = registrar.provision("calc").await.unwrap();

        assert!(record.client_secret.is_some());
        assert_eq!(
            store.raw("ns/calc/machine_client_id").await.as_deref(),
            Some(record.client_id.as_str())
        );
        assert_eq!(store.is_secret("ns/calc/client_secret").await, Some(true));
        assert_eq!(store.is_secret("ns/calc/discovery_url").await, Some(false));
        assert!(record.discovery_url.ends_with("/.well-known/openid-configuration"));
    }

    #[tokio::test]
    async fn test_provision_twice_creates_each_object_once() {
        let (registrar, idp, _) = registrar();

        let first = registrar.provision("calc").await.unwrap();
        let second = registrar.provision("calc").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(idp.created(ProviderOp::CreatePool), 1);
        assert_eq!(idp.created(ProviderOp::CreateResourceServer), 1);
        assert_eq!(idp.created(ProviderOp::CreateClient), 1);
        assert_eq!(idp.resource_server_count(), 1);
        assert_eq!(idp.client_count(), 1);
    }

    #[tokio::test]
    async fn test_provision_uses_stored_secret_when_provider_hides_it() {
        let (registrar, idp, _) = registrar();
        let first = registrar.provision("calc").await.unwrap();

        idp.set_reveal_secrets(false);
        let second = registrar.provision("calc").await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_provision_without_any_secret_fails() {
        let (registrar, idp, _) = registrar();
        let pool = idp.insert_pool("pool");
        let server = ResourceServer::new("rs", "Resource", ["read"]);
        idp.create_resource_server(&pool.id, &server).await.unwrap();
        idp.create_client(
            &pool.id,
            &ClientSpec::machine("m2m-calc", &server, &["read".to_string()].into(), 60),
        )
        .await
        .unwrap();
        idp.set_reveal_secrets(false);

        let err = registrar.provision("calc").await.unwrap_err();
        assert!(matches!(
            TollgateError::classify(&err),
            Some(TollgateError::CredentialsMissing(_))
        ));
    }

    #[tokio::test]
    async fn test_created_client_is_client_credentials_only() {
        let (registrar, idp, _) = registrar();
        registrar.provision("calc").await.unwrap();
        let pool = idp.find_pool("pool").await.unwrap().unwrap();
        let client = idp.find_client(&pool.id, "m2m-calc").await.unwrap().unwrap();
        assert_eq!(client.allowed_grants, vec![GrantType::ClientCredentials]);
        assert_eq!(client.allowed_scopes, ["rs/read".to_string()].into());
    }

    #[tokio::test]
    async fn test_deprovision_removes_client_and_credentials() {
        let (registrar, idp, store) = registrar();
        let record = registrar.provision("calc").await.unwrap();

        let report = registrar.deprovision("calc").await.unwrap();
        assert_eq!(report.deleted_client_id, Some(record.client_id));
        assert!(report.credentials_removed);
        assert_eq!(idp.client_count(), 0);
        assert_eq!(idp.resource_server_count(), 1);
        assert!(store.keys().await.is_empty());

        let again = registrar.deprovision("calc").await.unwrap();
        assert_eq!(again.deleted_client_id, None);
    }

    #[tokio::test]
    async fn test_invalid_service_name_rejected() {
        let (registrar, idp, _) = registrar();
        let err = registrar.provision("bad/name").await.unwrap_err();
        assert!(matches!(
            TollgateError::classify(&err),
            Some(TollgateError::Config(_))
        ));
        assert_eq!(idp.calls(ProviderOp::ListPools), 0);
    }
}
