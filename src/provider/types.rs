//! Identity provider object model
//!
//! Wire shapes for the administrative API. Natural keys: pools by `name`,
//! resource servers by `identifier`, clients by `(pool, client_name)`.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// A user pool that owns resource servers and app clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPool {
    /// Provider-assigned identifier
    pub id: String,
    /// Natural key
    pub name: String,
}

/// A resource server registration and the scopes it accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceServer {
    /// Natural key, also the scope prefix
    pub identifier: String,
    /// Human-readable name
    pub name: String,
    /// Bare scope names (without the identifier prefix)
    #[serde(default)]
    pub scopes: BTreeSet<String>,
}

impl ResourceServer {
    /// Creates a resource server description.
    pub fn new<I, S>(identifier: impl Into<String>, name: impl Into<String>, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            identifier: identifier.into(),
            name: name.into(),
            scopes: scopes.into_iter().map(Into::into).collect(),
        }
    }

    /// Fully qualified scope string, `<identifier>/<scope>`.
    pub fn qualified_scope(&self, scope: &str) -> String {
        format!("{}/{}", self.identifier, scope)
    }

    /// Scopes from `wanted` this server does not declare yet.
    pub fn missing_scopes(&self, wanted: &BTreeSet<String>) -> BTreeSet<String> {
        wanted.difference(&self.scopes).cloned().collect()
    }
}

/// OAuth2 grant types a machine client may hold.
///
/// Only `client_credentials` exists here; interactive grants belong to a
/// separate human-testing path and deserialize as an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    /// RFC 6749 section 4.4
    ClientCredentials,
}

/// A machine-to-machine app client.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct M2mClient {
    /// Owning pool
    pub pool_id: String,
    /// Provider-assigned client identifier
    pub client_id: String,
    /// Natural key within the pool
    pub client_name: String,
    /// Client secret; list responses usually omit it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    /// Allowed grants; always exactly `client_credentials` for clients we create
    pub allowed_grants: Vec<GrantType>,
    /// Qualified scopes (`<server>/<scope>`)
    #[serde(default)]
    pub allowed_scopes: BTreeSet<String>,
}

impl std::fmt::Debug for M2mClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("M2mClient")
            .field("pool_id", &self.pool_id)
            .field("client_id", &self.client_id)
            .field("client_name", &self.client_name)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .field("allowed_grants", &self.allowed_grants)
            .field("allowed_scopes", &self.allowed_scopes)
            .finish()
    }
}

impl M2mClient {
    /// Whether the client is limited to the client credentials grant.
    pub fn is_machine_only(&self) -> bool {
        self.allowed_grants == [GrantType::ClientCredentials]
    }
}

/// Request body for creating an M2M client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSpec {
    /// Natural key within the pool
    pub client_name: String,
    /// Whether the provider should generate a secret
    pub generate_secret: bool,
    /// Grants to allow
    pub allowed_grants: Vec<GrantType>,
    /// Qualified scopes to allow
    pub allowed_scopes: BTreeSet<String>,
    /// Access token lifetime in minutes
    pub access_token_validity_minutes: u32,
}

impl ClientSpec {
    /// A secret-bearing client limited to `client_credentials` and the given
    /// scopes of `server`.
    pub fn machine(
        client_name: impl Into<String>,
        server: &ResourceServer,
        scopes: &BTreeSet<String>,
        access_token_validity_minutes: u32,
    ) -> Self {
        Self {
            client_name: client_name.into(),
            generate_secret: true,
            allowed_grants: vec![GrantType::ClientCredentials],
            allowed_scopes: scopes.iter().map(|s| server.qualified_scope(s)).collect(),
            access_token_validity_minutes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_machine_spec_is_client_credentials_only() {
        let server = ResourceServer::new("rs", "Resource", ["read", "write"]);
        let scopes: BTreeSet<String> = ["read".to_string()].into();
        let spec = ClientSpec::machine("client-calc", &server, &scopes, 60);

        assert_eq!(spec.allowed_grants, vec![GrantType::ClientCredentials]);
        assert_eq!(spec.allowed_scopes, ["rs/read".to_string()].into());
        assert!(spec.generate_secret);
    }

    #[test]
    fn test_interactive_grant_does_not_deserialize() {
        let json = r#"{
            "pool_id": "p", "client_id": "c", "client_name": "n",
            "allowed_grants": ["password"], "allowed_scopes": []
        }"#;
        assert!(serde_json::from_str::<M2mClient>(json).is_err());
    }

    #[test]
    fn test_missing_scopes() {
        let server = ResourceServer::new("rs", "Resource", ["read"]);
        let wanted: BTreeSet<String> = ["read".to_string(), "write".to_string()].into();
        assert_eq!(server.missing_scopes(&wanted), ["write".to_string()].into());
    }
}
