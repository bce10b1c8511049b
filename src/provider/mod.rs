//! Identity provider administration
//!
//! The registrar talks to the provider only through
//! [`IdentityProviderAdmin`]. Lookups are by natural name; `find_*` helpers
//! list and filter so every adapter gets lookup-before-create for free.
//!
//! Adapters map provider responses onto the shared error taxonomy:
//! conflicts become [`TollgateError::AlreadyExists`], auth failures
//! [`TollgateError::PermissionDenied`], outages
//! [`TollgateError::ProviderUnreachable`] and deadlines
//! [`TollgateError::Timeout`].
//!
//! [`TollgateError::AlreadyExists`]: crate::error::TollgateError::AlreadyExists
//! [`TollgateError::PermissionDenied`]: crate::error::TollgateError::PermissionDenied
//! [`TollgateError::ProviderUnreachable`]: crate::error::TollgateError::ProviderUnreachable
//! [`TollgateError::Timeout`]: crate::error::TollgateError::Timeout

use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::error::Result;

pub mod http;
pub mod memory;
pub mod types;

pub use http::HttpProviderAdmin;
pub use memory::{MemoryProviderAdmin, ProviderOp};
pub use types::{ClientSpec, GrantType, M2mClient, ResourceServer, UserPool};

/// Administrative surface of an identity provider.
#[async_trait]
pub trait IdentityProviderAdmin: Send + Sync + std::fmt::Debug {
    /// Lists all user pools.
    async fn list_pools(&self) -> Result<Vec<UserPool>>;

    /// Creates a user pool named `name`.
    async fn create_pool(&self, name: &str) -> Result<UserPool>;

    /// Lists the resource servers of `pool_id`.
    async fn list_resource_servers(&self, pool_id: &str) -> Result<Vec<ResourceServer>>;

    /// Creates a resource server in `pool_id`.
    async fn create_resource_server(
        &self,
        pool_id: &str,
        server: &ResourceServer,
    ) -> Result<ResourceServer>;

    /// Adds `scopes` to an existing resource server, keeping its others.
    async fn add_scopes(
        &self,
        pool_id: &str,
        identifier: &str,
        scopes: &BTreeSet<String>,
    ) -> Result<ResourceServer>;

    /// Lists the app clients of `pool_id`. Secrets are usually omitted.
    async fn list_clients(&self, pool_id: &str) -> Result<Vec<M2mClient>>;

    /// Creates an app client in `pool_id`; the response carries the secret.
    async fn create_client(&self, pool_id: &str, spec: &ClientSpec) -> Result<M2mClient>;

    /// Fetches one client including its secret when the provider reveals it.
    async fn describe_client(&self, pool_id: &str, client_id: &str) -> Result<M2mClient>;

    /// Deletes a client. Deleting an absent client succeeds.
    async fn delete_client(&self, pool_id: &str, client_id: &str) -> Result<()>;

    /// Discovery document URL for tokens issued by `pool_id`.
    fn discovery_url(&self, pool_id: &str) -> String;

    /// Finds a pool by name.
    async fn find_pool(&self, name: &str) -> Result<Option<UserPool>> {
        Ok(self.list_pools().await?.into_iter().find(|p| p.name == name))
    }

    /// Finds a resource server by identifier.
    async fn find_resource_server(
        &self,
        pool_id: &str,
        identifier: &str,
    ) -> Result<Option<ResourceServer>> {
        Ok(self
            .list_resource_servers(pool_id)
            .await?
            .into_iter()
            .find(|s| s.identifier == identifier))
    }

    /// Finds a client by name.
    async fn find_client(&self, pool_id: &str, client_name: &str) -> Result<Option<M2mClient>> {
        Ok(self
            .list_clients(pool_id)
            .await?
            .into_iter()
            .find(|c| c.client_name == client_name))
    }
}

/// `{issuer_base}/{pool_id}/.well-known/openid-configuration`
pub fn pool_discovery_url(issuer_base: &str, pool_id: &str) -> String {
    format!(
        "{}/{}/.well-known/openid-configuration",
        issuer_base.trim_end_matches('/'),
        pool_id
    )
}
