//! Cached access tokens

use std::fmt;

use chrono::{DateTime, Duration, Utc};

/// A bearer token handed to callers.
///
/// `Debug` never prints the token value.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    value: String,
    token_type: String,
    expires_at: DateTime<Utc>,
}

impl AccessToken {
    /// Creates a token.
    pub fn new(
        value: impl Into<String>,
        token_type: impl Into<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            value: value.into(),
            token_type: token_type.into(),
            expires_at,
        }
    }

    /// The raw token value.
    pub fn secret(&self) -> &str {
        &self.value
    }

    /// Token type reported by the provider, usually `Bearer`.
    pub fn token_type(&self) -> &str {
        &self.token_type
    }

    /// When the provider stops accepting the token.
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Value for the `Authorization` header.
    pub fn authorization_header(&self) -> String {
        format!("Bearer {}", self.value)
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("value", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// One cached exchange result, keyed by service name in the broker.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenCacheEntry {
    /// Token value
    pub access_token: String,
    /// Token type from the exchange response
    pub token_type: String,
    /// When the exchange completed
    pub issued_at: DateTime<Utc>,
    /// `issued_at + expires_in`
    pub expires_at: DateTime<Utc>,
}

impl TokenCacheEntry {
    /// Builds an entry from an exchange completed at `issued_at`.
    ///
    /// Returns `None` when `issued_at + expires_in` is not representable.
    pub fn new(
        access_token: impl Into<String>,
        token_type: impl Into<String>,
        issued_at: DateTime<Utc>,
        expires_in: Duration,
    ) -> Option<Self> {
        Some(Self {
            access_token: access_token.into(),
            token_type: token_type.into(),
            issued_at,
            expires_at: issued_at.checked_add_signed(expires_in)?,
        })
    }

    /// Whether the entry may still be served: `now < expires_at - margin`.
    pub fn is_live(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        self.expires_at
            .checked_sub_signed(margin)
            .is_some_and(|deadline| now < deadline)
    }

    /// The token handed to callers.
    pub fn to_access_token(&self) -> AccessToken {
        AccessToken::new(&self.access_token, &self.token_type, self.expires_at)
    }
}

impl fmt::Debug for TokenCacheEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCacheEntry")
            .field("access_token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}
