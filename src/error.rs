//! Error types for Tollgate
//!
//! This module defines the error taxonomy shared by every component of the
//! broker, using `thiserror` for ergonomic error handling. Each failure path
//! surfaces a distinguishable variant so callers can decide between retrying,
//! refreshing a token, or reporting to an operator.

use thiserror::Error;

/// Main error type for Tollgate operations
///
/// Variants are grouped by the component that usually raises them, but any
/// component may propagate any variant unchanged to its caller.
#[derive(Error, Debug)]
pub enum TollgateError {
    /// Configuration-related errors (bad YAML, invalid names, missing fields)
    #[error("Configuration error: {0}")]
    Config(String),

    /// A resource identifier could not be encoded or decoded
    #[error("Invalid resource address: {0}")]
    InvalidAddress(String),

    /// The secret store could not be reached or failed mid-operation
    ///
    /// This never means "the key does not exist"; see [`TollgateError::NotFound`].
    #[error("Secret store unavailable: {0}")]
    StoreUnavailable(String),

    /// A secret store key has no value
    #[error("Key not found: {0}")]
    NotFound(String),

    /// The identity provider could not be reached (transient)
    #[error("Identity provider unreachable: {0}")]
    ProviderUnreachable(String),

    /// The identity provider refused an administrative call (fatal)
    #[error("Permission denied by identity provider: {0}")]
    PermissionDenied(String),

    /// The identity provider reported that an object already exists
    ///
    /// Raised by provider adapters and consumed by the registrar, which turns
    /// an unresolved conflict into [`TollgateError::NameConflict`].
    #[error("Object already exists: {0}")]
    AlreadyExists(String),

    /// An object name conflict could not be resolved by re-lookup
    #[error("Name conflict: {0}")]
    NameConflict(String),

    /// No usable machine credentials are stored for a service
    #[error("Credentials missing for service: {0}")]
    CredentialsMissing(String),

    /// The token endpoint rejected the client credentials
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The resource endpoint does not expose the requested capability
    #[error("Capability not found: {0}")]
    CapabilityNotFound(String),

    /// The resource endpoint rejected the bearer token
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// A network call exceeded its deadline
    #[error("Operation timed out: {operation}")]
    Timeout {
        /// Name of the operation that timed out
        operation: String,
    },

    /// The resource endpoint no longer recognises the session identifier
    #[error("Session expired: {0}")]
    SessionExpired(String),

    /// A peer sent a response that violates the expected wire format
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Encrypting or decrypting a secret value failed
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Keyring/credential storage errors
    #[error("Keyring error: {0}")]
    Keyring(#[from] keyring::Error),
}

impl TollgateError {
    /// Returns `true` for conditions that a bounded local retry may clear.
    ///
    /// Only [`TollgateError::ProviderUnreachable`] and
    /// [`TollgateError::Timeout`] qualify. Everything else is either fatal or
    /// handled by a dedicated recovery path (for example `Unauthorized`).
    ///
    /// # Examples
    ///
    /// ```
    /// use tollgate::error::TollgateError;
    ///
    /// assert!(TollgateError::ProviderUnreachable("503".into()).is_retryable());
    /// assert!(!TollgateError::PermissionDenied("nope".into()).is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TollgateError::ProviderUnreachable(_) | TollgateError::Timeout { .. }
        )
    }

    /// Looks through an [`anyhow::Error`] for a [`TollgateError`].
    ///
    /// Returns `None` when the error was raised by something other than this
    /// crate (for example a bare `anyhow!` from a dependency).
    ///
    /// # Examples
    ///
    /// ```
    /// use tollgate::error::TollgateError;
    ///
    /// let err = anyhow::Error::new(TollgateError::NotFound("a/b/c".into()));
    /// assert!(matches!(
    ///     TollgateError::classify(&err),
    ///     Some(TollgateError::NotFound(_))
    /// ));
    /// ```
    pub fn classify(err: &anyhow::Error) -> Option<&TollgateError> {
        err.downcast_ref::<TollgateError>()
    }

    /// Convenience constructor for [`TollgateError::Timeout`].
    pub fn timeout(operation: impl Into<String>) -> Self {
        TollgateError::Timeout {
            operation: operation.into(),
        }
    }
}

/// Returns `true` when `err` wraps a retryable [`TollgateError`].
pub fn is_retryable(err: &anyhow::Error) -> bool {
    TollgateError::classify(err).is_some_and(TollgateError::is_retryable)
}

/// Result type alias for Tollgate operations
///
/// This is a convenience alias that uses `anyhow::Error` as the error type,
/// allowing for rich error context and easy error propagation.
pub type Result<T> = anyhow::Result<T>;
