/*!
Command handlers for the CLI

This module provides command handlers invoked by the CLI entrypoint.

- `provision`: create or reuse provider objects and store credentials
- `token`: obtain an access token through the broker
- `resource`: list and invoke capabilities of a protected resource

The handlers only wire library components together from [`Config`] and
print results.
*/

use std::sync::Arc;

use crate::broker::TokenBroker;
use crate::config::Config;
use crate::credentials::CredentialRepository;
use crate::error::{Result, TollgateError};
use crate::locator::{Locator, ResourceAddress};
use crate::provider::HttpProviderAdmin;
use crate::registrar::{Registrar, RegistrarSettings};
use crate::retry::RetryPolicy;
use crate::secrets::open_store;
use crate::session::SessionClient;

/// Opens the configured secret store and wraps it in a repository.
pub fn credential_repository(config: &Config) -> Result<CredentialRepository> {
    let store = open_store(&config.store)?;
    Ok(CredentialRepository::new(store, config.namespace.clone()))
}

/// Builds a registrar against the configured admin API.
pub fn build_registrar(config: &Config) -> Result<Registrar> {
    let admin = HttpProviderAdmin::from_config(&config.provider)?;
    Ok(Registrar::new(
        Arc::new(admin),
        credential_repository(config)?,
        RegistrarSettings::from(&config.provider),
    )
    .with_retry(RetryPolicy::from_config(&config.broker)))
}

/// Builds a token broker reading the configured store.
pub fn build_broker(config: &Config) -> Result<TokenBroker> {
    TokenBroker::new(credential_repository(config)?, &config.broker)
}

/// Resolves a CLI resource argument into an address.
///
/// ARN-style identifiers carry their own region; anything else uses the
/// configured default region.
pub fn resource_address(
    config: &Config,
    resource: &str,
    qualifier: Option<&str>,
) -> Result<ResourceAddress> {
    let address = if resource.starts_with("arn:") {
        ResourceAddress::from_arn(resource)?
    } else {
        ResourceAddress::new(resource, config.locator.default_region.clone())
    };
    Ok(address.with_qualifier(qualifier.unwrap_or(&config.locator.default_qualifier)))
}

// Provisioning command handlers
pub mod provision {
    //! `provision` and `deprovision` handlers.

    use super::*;

    /// Provisions `service` and prints where its credentials were stored.
    pub async fn run_provision(config: Config, service: String) -> Result<()> {
        let registrar = build_registrar(&config)?;
        let record = registrar.provision(&service).await?;

        println!("\nProvisioned service '{}'\n", service);
        println!("Client ID:      {}", record.client_id);
        println!("Discovery URL:  {}", record.discovery_url);
        println!("Namespace:      {}/{}", config.namespace.trim_matches('/'), service);
        println!();
        Ok(())
    }

    /// Deprovisions `service`.
    pub async fn run_deprovision(config: Config, service: String) -> Result<()> {
        let registrar = build_registrar(&config)?;
        let report = registrar.deprovision(&service).await?;

        match report.deleted_client_id {
            Some(id) => println!("Deleted client {} for '{}'", id, service),
            None => println!("No client found for '{}'", service),
        }
        println!("Removed stored credentials for '{}'", service);
        Ok(())
    }
}

// Token command handler
pub mod token {
    //! `token` handler.

    use super::*;

    /// Obtains a token for `service`; prints its value only when `show` is set.
    pub async fn run_token(config: Config, service: String, show: bool) -> Result<()> {
        let broker = build_broker(&config)?;
        let token = broker.get_token(&service).await?;

        if show {
            println!("{}", token.secret());
        } else {
            println!(
                "Obtained {} token for '{}', expires at {}",
                token.token_type(),
                service,
                token.expires_at().to_rfc3339()
            );
        }
        Ok(())
    }
}

// Resource command handlers
pub mod resource {
    //! `tools` and `invoke` handlers.

    use super::*;

    fn session_client(config: &Config) -> Result<SessionClient> {
        let broker = Arc::new(build_broker(config)?);
        let locator = Locator::new(&config.locator)?;
        Ok(SessionClient::new(broker, locator, config.session.clone()))
    }

    /// Lists the capabilities of `resource`.
    pub async fn list_tools(
        config: Config,
        service: String,
        resource: String,
        qualifier: Option<String>,
    ) -> Result<()> {
        let address = resource_address(&config, &resource, qualifier.as_deref())?;
        let session = session_client(&config)?.open(&address, &service).await?;

        let capabilities = session.list_capabilities().await?;
        println!("\nCapabilities of {}:\n", address);
        for capability in &capabilities {
            match &capability.description {
                Some(description) => println!("  {:<24} {}", capability.name, description),
                None => println!("  {}", capability.name),
            }
        }
        println!();

        session.close().await
    }

    /// Invokes `tool` on `resource` with JSON `args` and prints the result.
    pub async fn invoke(
        config: Config,
        service: String,
        resource: String,
        tool: String,
        args: String,
        qualifier: Option<String>,
    ) -> Result<()> {
        let arguments: serde_json::Value = serde_json::from_str(&args).map_err(|e| {
            TollgateError::Config(format!("--args is not valid JSON: {}", e))
        })?;
        if !arguments.is_object() {
            return Err(TollgateError::Config("--args must be a JSON object".to_string()).into());
        }

        let address = resource_address(&config, &resource, qualifier.as_deref())?;
        let session = session_client(&config)?.open(&address, &service).await?;

        let result = session.invoke(&tool, arguments).await;
        let closed = session.close().await;
        let result = result?;
        closed?;

        let rendered = serde_json::to_string_pretty(&result.value()).map_err(TollgateError::from)?;
        if result.is_error {
            eprintln!("{} reported an error:", tool);
            eprintln!("{}", rendered);
        } else {
            println!("{}", rendered);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_address_from_arn_keeps_arn_region() {
        let mut config = Config::default();
        config.locator.default_region = "eu-west-1".to_string();
        let address =
            resource_address(&config, "arn:aws:x:us-west-2:1:runtime/calc", None).unwrap();
        assert_eq!(address.region(), "us-west-2");
        assert_eq!(address.qualifier(), "DEFAULT");
    }

    #[test]
    fn test_resource_address_plain_id_uses_default_region() {
        let mut config = Config::default();
        config.locator.default_region = "eu-west-1".to_string();
        let address = resource_address(&config, "calc", Some("v2")).unwrap();
        assert_eq!(address.region(), "eu-west-1");
        assert_eq!(address.qualifier(), "v2");
    }

    #[test]
    fn test_build_registrar_requires_admin_url() {
        let config = Config::default();
        assert!(build_registrar(&config).is_err());
    }
}
