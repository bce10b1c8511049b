//! Configuration management for Tollgate
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from files, environment variables, and CLI overrides.
//! Secrets are never read from the configuration file; the store
//! encryption key comes from the environment or a generated key file.

use crate::error::{Result, TollgateError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure for Tollgate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Namespace prefix for every credential key (`<namespace>/<service>/<field>`)
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Secret store backend settings
    #[serde(default)]
    pub store: StoreConfig,

    /// Identity provider settings used by the registrar and broker
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Token broker settings
    #[serde(default)]
    pub broker: BrokerConfig,

    /// Resource locator settings
    #[serde(default)]
    pub locator: LocatorConfig,

    /// Session client settings
    #[serde(default)]
    pub session: SessionConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_namespace() -> String {
    "app/tollgate".to_string()
}

/// Which secret store implementation to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// SQLite file in the user's data directory (default)
    #[default]
    Sqlite,
    /// Operating system keyring
    Keyring,
    /// Process memory; lost on exit
    Memory,
}

impl std::str::FromStr for StoreBackend {
    type Err = TollgateError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sqlite" => Ok(StoreBackend::Sqlite),
            "keyring" => Ok(StoreBackend::Keyring),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(TollgateError::Config(format!(
                "Unknown store backend '{}'. Must be one of: sqlite, keyring, memory",
                other
            ))),
        }
    }
}

/// Secret store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Backend selection
    #[serde(default)]
    pub backend: StoreBackend,

    /// Database path for the SQLite backend; defaults to the data directory
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Environment variable holding the encryption key (base64 32 bytes or passphrase)
    #[serde(default = "default_key_env")]
    pub key_env: String,

    /// Keyring service prefix for the keyring backend
    #[serde(default = "default_keyring_service")]
    pub keyring_service: String,
}

fn default_key_env() -> String {
    "TOLLGATE_STORE_KEY".to_string()
}

fn default_keyring_service() -> String {
    "tollgate".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            path: None,
            key_env: default_key_env(),
            keyring_service: default_keyring_service(),
        }
    }
}

/// Identity provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Base URL of the provider's administrative REST API
    #[serde(default)]
    pub admin_url: Option<String>,

    /// Issuer base URL; a pool's discovery document lives at
    /// `{issuer_base}/{pool_id}/.well-known/openid-configuration`
    #[serde(default = "default_issuer_base")]
    pub issuer_base: String,

    /// Name of the shared user pool
    #[serde(default = "default_pool_name")]
    pub pool_name: String,

    /// Identifier of the shared resource server
    #[serde(default = "default_resource_server_id")]
    pub resource_server_identifier: String,

    /// Human-readable resource server name
    #[serde(default = "default_resource_server_name")]
    pub resource_server_name: String,

    /// Scopes each M2M client is granted
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,

    /// Prefix for M2M client names; the service name is appended
    #[serde(default = "default_client_name_prefix")]
    pub client_name_prefix: String,

    /// Access token validity requested for new clients, in minutes
    #[serde(default = "default_token_validity_minutes")]
    pub token_validity_minutes: u32,

    /// Per-request timeout for administrative calls (seconds)
    #[serde(default = "default_provider_timeout")]
    pub timeout_seconds: u64,
}

fn default_issuer_base() -> String {
    "https://cognito-idp.us-east-1.amazonaws.com".to_string()
}

fn default_pool_name() -> String {
    "TollgateAgentPool".to_string()
}

fn default_resource_server_id() -> String {
    "tollgate-m2m-resource-server".to_string()
}

fn default_resource_server_name() -> String {
    "Tollgate M2M Resource Server".to_string()
}

fn default_scopes() -> Vec<String> {
    vec!["read".to_string()]
}

fn default_client_name_prefix() -> String {
    "TollgateMachineClient-".to_string()
}

fn default_token_validity_minutes() -> u32 {
    60
}

fn default_provider_timeout() -> u64 {
    30
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            admin_url: None,
            issuer_base: default_issuer_base(),
            pool_name: default_pool_name(),
            resource_server_identifier: default_resource_server_id(),
            resource_server_name: default_resource_server_name(),
            scopes: default_scopes(),
            client_name_prefix: default_client_name_prefix(),
            token_validity_minutes: default_token_validity_minutes(),
            timeout_seconds: default_provider_timeout(),
        }
    }
}

/// Token broker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// A cached token is refreshed once `now >= expires_at - safety_margin`
    #[serde(default = "default_safety_margin")]
    pub safety_margin_seconds: u64,

    /// Per-request timeout for discovery and token calls (seconds)
    #[serde(default = "default_broker_timeout")]
    pub timeout_seconds: u64,

    /// Maximum attempts for transient failures
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry (milliseconds); doubles per attempt
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Optional `scope` parameter sent with the exchange
    #[serde(default)]
    pub scope: Option<String>,
}

fn default_safety_margin() -> u64 {
    60
}

fn default_broker_timeout() -> u64 {
    15
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    200
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            safety_margin_seconds: default_safety_margin(),
            timeout_seconds: default_broker_timeout(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            scope: None,
        }
    }
}

/// Resource locator configuration
///
/// The encoding alphabet is deployment-specific, so both the reserved
/// delimiter set and the allowed identifier pattern are configurable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocatorConfig {
    /// Structural delimiters that must be percent-encoded (`%` is always encoded)
    #[serde(default = "default_reserved")]
    pub reserved: String,

    /// Regular expression every identifier must match
    #[serde(default = "default_identifier_pattern")]
    pub identifier_pattern: String,

    /// Invocation URL template with `{region}`, `{resource}` and `{qualifier}`
    #[serde(default = "default_endpoint_template")]
    pub endpoint_template: String,

    /// Region used when the identifier does not carry one
    #[serde(default = "default_region")]
    pub default_region: String,

    /// Qualifier used when none is given
    #[serde(default = "default_qualifier")]
    pub default_qualifier: String,
}

fn default_reserved() -> String {
    ":/".to_string()
}

fn default_identifier_pattern() -> String {
    r"^[A-Za-z0-9:/_.\-]+$".to_string()
}

fn default_endpoint_template() -> String {
    "https://bedrock-agentcore.{region}.amazonaws.com/runtimes/{resource}/invocations?qualifier={qualifier}"
        .to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_qualifier() -> String {
    "DEFAULT".to_string()
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            reserved: default_reserved(),
            identifier_pattern: default_identifier_pattern(),
            endpoint_template: default_endpoint_template(),
            default_region: default_region(),
            default_qualifier: default_qualifier(),
        }
    }
}

/// Session client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Per-request timeout for resource calls (seconds)
    #[serde(default = "default_session_timeout")]
    pub timeout_seconds: u64,

    /// Client name announced during `initialize`
    #[serde(default = "default_client_name")]
    pub client_name: String,
}

fn default_session_timeout() -> u64 {
    60
}

fn default_client_name() -> String {
    "tollgate".to_string()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_session_timeout(),
            client_name: default_client_name(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json_format: bool,

    /// Optional file receiving a copy of every event
    #[serde(default)]
    pub file_path: Option<PathBuf>,
}

fn default_log_level() -> String {
    "tollgate=info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
            file_path: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            store: StoreConfig::default(),
            provider: ProviderConfig::default(),
            broker: BrokerConfig::default(),
            locator: LocatorConfig::default(),
            session: SessionConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file, environment, and CLI overrides
    ///
    /// A missing file is not an error; defaults are used and a warning is
    /// logged. Environment variables (`TOLLGATE_*`) override file values and
    /// CLI flags override both.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the YAML configuration file
    /// * `cli` - Parsed command line, used for overrides
    ///
    /// # Errors
    ///
    /// Returns [`TollgateError::Config`] if the file exists but cannot be
    /// read or parsed.
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    /// Parse configuration from a YAML file without applying overrides
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| TollgateError::Config(format!("Failed to read config file: {}", e)))?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml(contents: &str) -> Result<Self> {
        serde_yaml::from_str(contents)
            .map_err(|e| TollgateError::Config(format!("Failed to parse config: {}", e)).into())
    }

    fn apply_env_vars(&mut self) {
        if let Ok(namespace) = std::env::var("TOLLGATE_NAMESPACE") {
            self.namespace = namespace;
        }

        if let Ok(backend) = std::env::var("TOLLGATE_STORE_BACKEND") {
            match backend.parse() {
                Ok(value) => self.store.backend = value,
                Err(_) => tracing::warn!("Invalid TOLLGATE_STORE_BACKEND: {}", backend),
            }
        }

        if let Ok(path) = std::env::var("TOLLGATE_STORE_PATH") {
            self.store.path = Some(PathBuf::from(path));
        }

        if let Ok(admin_url) = std::env::var("TOLLGATE_ADMIN_URL") {
            self.provider.admin_url = Some(admin_url);
        }

        if let Ok(issuer_base) = std::env::var("TOLLGATE_ISSUER_BASE") {
            self.provider.issuer_base = issuer_base;
        }

        if let Ok(pool_name) = std::env::var("TOLLGATE_POOL_NAME") {
            self.provider.pool_name = pool_name;
        }

        if let Ok(margin) = std::env::var("TOLLGATE_SAFETY_MARGIN_SECONDS") {
            if let Ok(value) = margin.parse() {
                self.broker.safety_margin_seconds = value;
            } else {
                tracing::warn!("Invalid TOLLGATE_SAFETY_MARGIN_SECONDS: {}", margin);
            }
        }

        if let Ok(region) = std::env::var("TOLLGATE_REGION") {
            self.locator.default_region = region;
        }

        if let Ok(template) = std::env::var("TOLLGATE_ENDPOINT_TEMPLATE") {
            self.locator.endpoint_template = template;
        }

        if let Ok(level) = std::env::var("TOLLGATE_LOG_LEVEL") {
            self.logging.level = level;
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if cli.verbose {
            self.logging.level = "tollgate=debug".to_string();
        }
        if cli.json_logs {
            self.logging.json_format = true;
        }
        if let Some(region) = &cli.region {
            self.locator.default_region = region.clone();
        }
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns [`TollgateError::Config`] describing the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.namespace.trim().is_empty() {
            return Err(TollgateError::Config("namespace must not be empty".to_string()).into());
        }

        if self.provider.scopes.is_empty() {
            return Err(
                TollgateError::Config("provider.scopes must name at least one scope".into())
                    .into(),
            );
        }

        if self.provider.scopes.iter().any(|s| s.trim().is_empty()) {
            return Err(TollgateError::Config("provider.scopes contains an empty scope".into()).into());
        }

        if let Some(admin_url) = &self.provider.admin_url {
            url::Url::parse(admin_url).map_err(|e| {
                TollgateError::Config(format!("provider.admin_url is not a valid URL: {}", e))
            })?;
        }

        url::Url::parse(&self.provider.issuer_base).map_err(|e| {
            TollgateError::Config(format!("provider.issuer_base is not a valid URL: {}", e))
        })?;

        if self.broker.max_attempts == 0 {
            return Err(TollgateError::Config("broker.max_attempts must be at least 1".into()).into());
        }

        if self.broker.timeout_seconds == 0 || self.session.timeout_seconds == 0 {
            return Err(TollgateError::Config("timeouts must be greater than zero".into()).into());
        }

        if self.locator.reserved.contains('%') {
            return Err(TollgateError::Config(
                "locator.reserved must not list '%'; it is always encoded".into(),
            )
            .into());
        }

        regex::Regex::new(&self.locator.identifier_pattern).map_err(|e| {
            TollgateError::Config(format!("locator.identifier_pattern is invalid: {}", e))
        })?;

        if !self.locator.endpoint_template.contains("{resource}") {
            return Err(TollgateError::Config(
                "locator.endpoint_template must contain {resource}".into(),
            )
            .into());
        }

        Ok(())
    }
}
