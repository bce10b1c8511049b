//! OAuth2 `client_credentials` exchange
//!
//! Posts `grant_type`, `client_id`, `client_secret` and an optional `scope`
//! form-encoded to the token endpoint and classifies failures:
//!
//! | Response | Error |
//! |----------|-------|
//! | `401`, or `error` is `invalid_client` / `unauthorized_client` / `invalid_grant` | `AuthenticationFailed` |
//! | `429`, `5xx`, transport failure | `ProviderUnreachable` |
//! | `408`, `504`, request deadline | `Timeout` |
//! | anything else | `Protocol` |

use std::collections::HashMap;

use reqwest::StatusCode;
use serde::Deserialize;
use url::Url;

use crate::credentials::MachineCredentials;
use crate::error::{Result, TollgateError};

/// OAuth2 error codes that mean the stored client credentials are bad.
const CREDENTIAL_ERRORS: &[&str] = &["invalid_client", "unauthorized_client", "invalid_grant"];

/// Successful token endpoint response.
#[derive(Clone, Deserialize)]
pub struct TokenResponse {
    /// The access token
    pub access_token: String,
    /// Lifetime in seconds
    pub expires_in: i64,
    /// Usually `Bearer`
    #[serde(default = "default_token_type")]
    pub token_type: String,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl std::fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"<redacted>")
            .field("expires_in", &self.expires_in)
            .field("token_type", &self.token_type)
            .finish()
    }
}

/// RFC 6749 section 5.2 error body.
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Maps a non-success token endpoint response onto the error taxonomy.
pub(crate) fn classify_failure(status: StatusCode, body: &str) -> TollgateError {
    let parsed = serde_json::from_str::<ErrorResponse>(body).ok();
    let detail = match &parsed {
        Some(e) => format!(
            "token endpoint returned {} ({}{})",
            status,
            e.error,
            e.error_description
                .as_deref()
                .map(|d| format!(": {}", d))
                .unwrap_or_default()
        ),
        None => format!("token endpoint returned {}", status),
    };

    let credential_error = parsed
        .as_ref()
        .is_some_and(|e| CREDENTIAL_ERRORS.contains(&e.error.as_str()));

    match status {
        _ if credential_error => TollgateError::AuthenticationFailed(detail),
        StatusCode::UNAUTHORIZED => TollgateError::AuthenticationFailed(detail),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
            TollgateError::timeout("token_exchange")
        }
        StatusCode::TOO_MANY_REQUESTS => TollgateError::ProviderUnreachable(detail),
        s if s.is_server_error() => TollgateError::ProviderUnreachable(detail),
        _ => TollgateError::Protocol(detail),
    }
}

/// Performs one `client_credentials` exchange.
///
/// The response body is never logged; it carries the token.
///
/// # Errors
///
/// See the module table. A success response without `access_token` or
/// `expires_in` is a [`TollgateError::Protocol`] error.
pub async fn exchange_client_credentials(
    http: &reqwest::Client,
    token_endpoint: &Url,
    credentials: &MachineCredentials,
    scope: Option<&str>,
) -> Result<TokenResponse> {
    let mut params: HashMap<&str, &str> = HashMap::new();
    params.insert("grant_type", "client_credentials");
    params.insert("client_id", &credentials.client_id);
    params.insert("client_secret", &credentials.client_secret);
    if let Some(s) = scope {
        params.insert("scope", s);
    }

    let resp = http
        .post(token_endpoint.clone())
        .form(&params)
        .send()
        .await
        .map_err(|e| {
            if e.is_timeout() {
                TollgateError::timeout("token_exchange")
            } else {
                TollgateError::ProviderUnreachable(format!("token request failed: {}", e))
            }
        })?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(classify_failure(status, &body).into());
    }

    let token: TokenResponse = resp.json().await.map_err(|e| {
        TollgateError::Protocol(format!("failed to parse token response: {}", e))
    })?;
    if token.expires_in <= 0 {
        return Err(TollgateError::Protocol(format!(
            "token response has non-positive expires_in {}",
            token.expires_in
        ))
        .into());
    }
    Ok(token)
}
