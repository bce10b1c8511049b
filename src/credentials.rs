//! Credential records and their persisted layout
//!
//! Every value lives under `<namespace>/<service_name>/<field>`. The field
//! names are an at-rest contract other tooling may read, so they never
//! change between provisioning runs.
//!
//! Machine (client credentials) and user (username/password) bundles are
//! separate types. The token broker only ever sees [`MachineCredentials`].

use std::fmt;
use std::sync::Arc;

use crate::error::{Result, TollgateError};
use crate::secrets::{PutOptions, SecretStore};

/// One persisted credential field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialField {
    /// OAuth2 client identifier
    MachineClientId,
    /// OAuth2 client secret (encrypted)
    ClientSecret,
    /// OpenID discovery document URL
    DiscoveryUrl,
    /// Identity provider pool that owns the client
    PoolId,
    /// Username for the human-testing path
    Username,
    /// Password for the human-testing path (encrypted)
    Password,
}

impl CredentialField {
    /// Every field, in the order they are written.
    pub const ALL: [CredentialField; 6] = [
        CredentialField::MachineClientId,
        CredentialField::ClientSecret,
        CredentialField::DiscoveryUrl,
        CredentialField::PoolId,
        CredentialField::Username,
        CredentialField::Password,
    ];

    /// The stable key segment for this field.
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialField::MachineClientId => "machine_client_id",
            CredentialField::ClientSecret => "client_secret",
            CredentialField::DiscoveryUrl => "discovery_url",
            CredentialField::PoolId => "pool_id",
            CredentialField::Username => "username",
            CredentialField::Password => "password",
        }
    }

    /// Whether the field must be encrypted at rest.
    pub fn is_secret(&self) -> bool {
        matches!(self, CredentialField::ClientSecret | CredentialField::Password)
    }
}

impl fmt::Display for CredentialField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Checks that `service_name` is usable as a key path component.
///
/// Allowed characters are ASCII letters, digits, `-` and `_`.
///
/// # Errors
///
/// Returns [`TollgateError::Config`] otherwise.
pub fn validate_service_name(service_name: &str) -> Result<()> {
    if service_name.is_empty()
        || !service_name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(TollgateError::Config(format!(
            "Invalid service name '{}': use only letters, digits, '-' and '_'",
            service_name
        ))
        .into());
    }
    Ok(())
}

/// Builds the key for one field: `<namespace>/<service_name>/<field>`.
///
/// Leading and trailing slashes on the namespace are ignored.
///
/// # Examples
///
/// ```
/// use tollgate::credentials::{credential_key, CredentialField};
///
/// assert_eq!(
///     credential_key("/app/tollgate/", "calc", CredentialField::ClientSecret),
///     "app/tollgate/calc/client_secret"
/// );
/// ```
pub fn credential_key(namespace: &str, service_name: &str, field: CredentialField) -> String {
    let namespace = namespace.trim_matches('/');
    if namespace.is_empty() {
        format!("{}/{}", service_name, field)
    } else {
        format!("{}/{}/{}", namespace, service_name, field)
    }
}

/// The full credential bundle as persisted.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialRecord {
    /// OAuth2 client identifier
    pub client_id: String,
    /// OAuth2 client secret, present for machine clients
    pub client_secret: Option<String>,
    /// Discovery document URL
    pub discovery_url: String,
    /// Owning pool identifier
    pub pool_id: Option<String>,
    /// Username for the human-testing path
    pub username: Option<String>,
    /// Password for the human-testing path
    pub password: Option<String>,
}

impl fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .field("discovery_url", &self.discovery_url)
            .field("pool_id", &self.pool_id)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl CredentialRecord {
    /// A machine-client record.
    pub fn machine(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        discovery_url: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: Some(client_secret.into()),
            discovery_url: discovery_url.into(),
            pool_id: None,
            username: None,
            password: None,
        }
    }

    /// Sets the owning pool.
    pub fn with_pool(mut self, pool_id: impl Into<String>) -> Self {
        self.pool_id = Some(pool_id.into());
        self
    }

    /// Whether this record carries user (interactive) credentials.
    pub fn has_user_credentials(&self) -> bool {
        self.username.is_some() || self.password.is_some()
    }

    fn value(&self, field: CredentialField) -> Option<&str> {
        match field {
            CredentialField::MachineClientId => Some(&self.client_id),
            CredentialField::ClientSecret => self.client_secret.as_deref(),
            CredentialField::DiscoveryUrl => Some(&self.discovery_url),
            CredentialField::PoolId => self.pool_id.as_deref(),
            CredentialField::Username => self.username.as_deref(),
            CredentialField::Password => self.password.as_deref(),
        }
    }
}

/// Client-credentials bundle accepted by the token broker.
#[derive(Clone, PartialEq, Eq)]
pub struct MachineCredentials {
    /// OAuth2 client identifier
    pub client_id: String,
    /// OAuth2 client secret
    pub client_secret: String,
    /// Discovery document URL
    pub discovery_url: String,
}

impl fmt::Debug for MachineCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MachineCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("discovery_url", &self.discovery_url)
            .finish()
    }
}

impl TryFrom<CredentialRecord> for MachineCredentials {
    type Error = TollgateError;

    fn try_from(record: CredentialRecord) -> std::result::Result<Self, Self::Error> {
        if record.has_user_credentials() {
            return Err(TollgateError::CredentialsMissing(format!(
                "record for client '{}' holds user credentials; machine credentials required",
                record.client_id
            )));
        }
        let client_secret = record.client_secret.ok_or_else(|| {
            TollgateError::CredentialsMissing(format!(
                "client '{}' has no client secret",
                record.client_id
            ))
        })?;
        Ok(Self {
            client_id: record.client_id,
            client_secret,
            discovery_url: record.discovery_url,
        })
    }
}

/// Username/password bundle for the separate human-testing path.
#[derive(Clone, PartialEq, Eq)]
pub struct UserCredentials {
    /// App client the user authenticates through
    pub client_id: String,
    /// Username
    pub username: String,
    /// Password
    pub password: String,
    /// Discovery document URL
    pub discovery_url: String,
}

impl fmt::Debug for UserCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserCredentials")
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl TryFrom<CredentialRecord> for UserCredentials {
    type Error = TollgateError;

    fn try_from(record: CredentialRecord) -> std::result::Result<Self, Self::Error> {
        match (record.username, record.password) {
            (Some(username), Some(password)) => Ok(Self {
                client_id: record.client_id,
                username,
                password,
                discovery_url: record.discovery_url,
            }),
            _ => Err(TollgateError::CredentialsMissing(format!(
                "client '{}' has no username/password",
                record.client_id
            ))),
        }
    }
}

/// Reads and writes [`CredentialRecord`]s through a [`SecretStore`].
#[derive(Debug, Clone)]
pub struct CredentialRepository {
    store: Arc<dyn SecretStore>,
    namespace: String,
}

impl CredentialRepository {
    /// Creates a repository rooted at `namespace`.
    pub fn new(store: Arc<dyn SecretStore>, namespace: impl Into<String>) -> Self {
        Self {
            store,
            namespace: namespace.into(),
        }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<dyn SecretStore> {
        &self.store
    }

    /// The namespace prefix.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Key for `field` of `service_name`.
    pub fn key(&self, service_name: &str, field: CredentialField) -> String {
        credential_key(&self.namespace, service_name, field)
    }

    /// Reads a single field.
    pub async fn get_field(
        &self,
        service_name: &str,
        field: CredentialField,
    ) -> Result<Option<String>> {
        self.store.get(&self.key(service_name, field)).await
    }

    /// Loads the record for `service_name`.
    ///
    /// Returns `Ok(None)` when the client id or discovery URL is absent.
    /// Store outages propagate as [`TollgateError::StoreUnavailable`].
    pub async fn load(&self, service_name: &str) -> Result<Option<CredentialRecord>> {
        validate_service_name(service_name)?;

        let Some(client_id) = self
            .get_field(service_name, CredentialField::MachineClientId)
            .await?
        else {
            return Ok(None);
        };
        let Some(discovery_url) = self
            .get_field(service_name, CredentialField::DiscoveryUrl)
            .await?
        else {
            return Ok(None);
        };

        Ok(Some(CredentialRecord {
            client_id,
            client_secret: self
                .get_field(service_name, CredentialField::ClientSecret)
                .await?,
            discovery_url,
            pool_id: self.get_field(service_name, CredentialField::PoolId).await?,
            username: self.get_field(service_name, CredentialField::Username).await?,
            password: self.get_field(service_name, CredentialField::Password).await?,
        }))
    }

    /// Loads machine credentials for `service_name`.
    ///
    /// # Errors
    ///
    /// Returns [`TollgateError::CredentialsMissing`] when nothing usable is
    /// stored, including when the record holds user credentials.
    pub async fn load_machine(&self, service_name: &str) -> Result<MachineCredentials> {
        let record = self.load(service_name).await?.ok_or_else(|| {
            TollgateError::CredentialsMissing(format!(
                "no credentials stored for '{}' under '{}'",
                service_name, self.namespace
            ))
        })?;
        Ok(MachineCredentials::try_from(record)?)
    }

    /// Writes every present field of `record`; secret fields are encrypted.
    pub async fn save(&self, service_name: &str, record: &CredentialRecord) -> Result<()> {
        validate_service_name(service_name)?;

        for field in CredentialField::ALL {
            if let Some(value) = record.value(field) {
                let options = if field.is_secret() {
                    PutOptions::secret()
                } else {
                    PutOptions::plain()
                };
                self.store
                    .put(&self.key(service_name, field), value, options)
                    .await?;
            }
        }
        tracing::debug!(service = service_name, namespace = %self.namespace, "Stored credential record");
        Ok(())
    }

    /// Removes every field of `service_name`.
    pub async fn delete(&self, service_name: &str) -> Result<()> {
        validate_service_name(service_name)?;
        for field in CredentialField::ALL {
            self.store.delete(&self.key(service_name, field)).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::MemorySecretStore;

    fn repo() -> (CredentialRepository, Arc<MemorySecretStore>) {
        let store = Arc::new(MemorySecretStore::new());
        (CredentialRepository::new(store.clone(), "app/tollgate"), store)
    }

    #[test]
    fn test_service_name_validation() {
        assert!(validate_service_name("calc").is_ok());
        assert!(validate_service_name("calc_v2-beta").is_ok());
        assert!(validate_service_name("").is_err());
        assert!(validate_service_name("calc/../x").is_err());
        assert!(validate_service_name("has space").is_err());
    }

    #[test]
    fn test_credential_key_layout() {
        assert_eq!(
            credential_key("app/tollgate", "calc", CredentialField::MachineClientId),
            "app/tollgate/calc/machine_client_id"
        );
        assert_eq!(
            credential_key("", "calc", CredentialField::DiscoveryUrl),
            "calc/discovery_url"
        );
    }

    #[tokio::test]
    async fn test_save_encrypts_only_secret_fields() {
        let (repo, store) = repo();
        let record = CredentialRecord::machine("cid", "csecret", "https://idp/x").with_pool("pool-1");
        repo.save("calc", &record).await.unwrap();

        assert_eq!(
            store.is_secret("app/tollgate/calc/client_secret").await,
            Some(true)
        );
        assert_eq!(
            store.is_secret("app/tollgate/calc/machine_client_id").await,
            Some(false)
        );
        assert_eq!(
            store.is_secret("app/tollgate/calc/discovery_url").await,
            Some(false)
        );
        assert_eq!(repo.load("calc").await.unwrap(), Some(record));
    }

    #[tokio::test]
    async fn test_load_absent_is_none() {
        let (repo, _store) = repo();
        assert!(repo.load("calc").await.unwrap().is_none());
        let err = repo.load_machine("calc").await.unwrap_err();
        assert!(matches!(
            TollgateError::classify(&err),
            Some(TollgateError::CredentialsMissing(_))
        ));
    }

    #[tokio::test]
    async fn test_store_outage_is_not_missing_credentials() {
        let (repo, store) = repo();
        store.set_unavailable(true);
        let err = repo.load_machine("calc").await.unwrap_err();
        assert!(matches!(
            TollgateError::classify(&err),
            Some(TollgateError::StoreUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_user_bundle_rejected_as_machine_credentials() {
        let (repo, _store) = repo();
        let mut record = CredentialRecord::machine("cid", "csecret", "https://idp/x");
        record.username = Some("tester".into());
        record.password = Some("pw".into());
        repo.save("human", &record).await.unwrap();

        let err = repo.load_machine("human").await.unwrap_err();
        assert!(matches!(
            TollgateError::classify(&err),
            Some(TollgateError::CredentialsMissing(_))
        ));

        let loaded = repo.load("human").await.unwrap().unwrap();
        let user = UserCredentials::try_from(loaded).unwrap();
        assert_eq!(user.username, "tester");
    }

    #[tokio::test]
    async fn test_delete_removes_all_fields() {
        let (repo, store) = repo();
        repo.save("calc", &CredentialRecord::machine("a", "b", "c"))
            .await
            .unwrap();
        repo.delete("calc").await.unwrap();
        assert!(store.keys().await.is_empty());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let record = CredentialRecord::machine("cid", "supersecret", "u");
        assert!(!format!("{:?}", record).contains("supersecret"));
        let machine = MachineCredentials::try_from(record).unwrap();
        assert!(!format!("{:?}", machine).contains("supersecret"));
    }
}
