//! Streamable HTTP transport for resource sessions
//!
//! Every JSON-RPC message is sent as an HTTP POST carrying the bearer token.
//! The resource may reply with:
//!
//! - `application/json`: a single JSON-RPC response body
//! - `text/event-stream`: an SSE stream; it is read until the response
//!   matching the request id arrives
//! - `202 Accepted`: acknowledgement with no body (notifications)
//!
//! # Session management
//!
//! The `Mcp-Session-Id` header returned by the first successful response
//! (normally `initialize`) is stored and echoed on every later request. A
//! `404` while a session is active clears it and fails with
//! [`TollgateError::SessionExpired`]. [`HttpTransport::terminate`] ends the
//! session with an HTTP DELETE.

use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::StatusCode;
use tokio::sync::RwLock;
use url::Url;

use crate::broker::AccessToken;
use crate::error::{Result, TollgateError};
use crate::session::types::{JsonRpcRequest, JsonRpcResponse, PROTOCOL_VERSION};

/// Session identifier header.
pub const SESSION_HEADER: &str = "Mcp-Session-Id";

/// Protocol revision header sent on every request.
pub const PROTOCOL_HEADER: &str = "MCP-Protocol-Version";

/// Request/response transport bound to one resource endpoint.
#[derive(Debug)]
pub struct HttpTransport {
    http: reqwest::Client,
    endpoint: Url,
    session_id: RwLock<Option<String>>,
}

impl HttpTransport {
    /// Creates a transport for `endpoint`. No network I/O happens here.
    ///
    /// # Errors
    ///
    /// Returns [`TollgateError::Config`] if the HTTP client cannot be built.
    pub fn new(endpoint: Url, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TollgateError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            endpoint,
            session_id: RwLock::new(None),
        })
    }

    /// The endpoint requests are posted to.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// The server-issued session identifier, once known.
    pub async fn session_id(&self) -> Option<String> {
        self.session_id.read().await.clone()
    }

    fn transport_error(e: reqwest::Error) -> TollgateError {
        if e.is_timeout() {
            TollgateError::timeout("resource_request")
        } else {
            TollgateError::Http(e)
        }
    }

    /// Sends `request` and returns its response.
    ///
    /// Notifications (no `id`) return `Ok(None)`.
    ///
    /// # Errors
    ///
    /// - [`TollgateError::Unauthorized`] on `401` or `403`
    /// - [`TollgateError::SessionExpired`] on `404` with an active session
    /// - [`TollgateError::Timeout`] when the request deadline passes
    /// - [`TollgateError::Protocol`] on other failures or malformed bodies
    pub async fn request(
        &self,
        request: &JsonRpcRequest,
        token: &AccessToken,
    ) -> Result<Option<JsonRpcResponse>> {
        let body = serde_json::to_string(request).map_err(TollgateError::from)?;
        let mut req = self
            .http
            .post(self.endpoint.clone())
            .header("Content-Type", "application/json")
            .header("Accept", "application/json, text/event-stream")
            .header(PROTOCOL_HEADER, PROTOCOL_VERSION)
            .header("Authorization", token.authorization_header())
            .body(body);

        if let Some(id) = self.session_id().await {
            req = req.header(SESSION_HEADER, id);
        }

        tracing::debug!(method = %request.method, id = ?request.id, "Sending resource request");
        let response = req.send().await.map_err(Self::transport_error)?;
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            let challenge = response
                .headers()
                .get("WWW-Authenticate")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string();
            return Err(TollgateError::Unauthorized(format!(
                "resource returned {} {}",
                status, challenge
            ))
            .into());
        }

        if status == StatusCode::NOT_FOUND {
            let mut sid = self.session_id.write().await;
            if let Some(expired) = sid.take() {
                return Err(TollgateError::SessionExpired(expired).into());
            }
            return Err(TollgateError::Protocol(format!(
                "resource endpoint {} not found",
                self.endpoint
            ))
            .into());
        }

        if status == StatusCode::ACCEPTED {
            return Ok(None);
        }

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(TollgateError::Protocol(format!(
                "resource endpoint returned {}: {}",
                status, text
            ))
            .into());
        }

        if let Some(new_id) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
        {
            let mut sid = self.session_id.write().await;
            if sid.is_none() {
                tracing::debug!(session_id = %new_id, "Resource assigned session");
                *sid = Some(new_id);
            }
        }

        let Some(id) = request.id else {
            return Ok(None);
        };

        let content_type = response
            .headers()
            .get("Content-Type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if content_type.contains("text/event-stream") {
            return read_sse_response(response.bytes_stream(), id).await.map(Some);
        }

        let text = response.text().await.map_err(Self::transport_error)?;
        let parsed: JsonRpcResponse = serde_json::from_str(&text).map_err(|e| {
            TollgateError::Protocol(format!("invalid JSON-RPC response: {}", e))
        })?;
        if !parsed.answers(id) {
            return Err(TollgateError::Protocol(format!(
                "response id {:?} does not match request id {}",
                parsed.id, id
            ))
            .into());
        }
        Ok(Some(parsed))
    }

    /// Ends the session with an HTTP DELETE.
    ///
    /// Does nothing without a session. `404` and `405` from the resource are
    /// treated as already terminated.
    pub async fn terminate(&self, token: &AccessToken) -> Result<()> {
        let Some(id) = self.session_id.write().await.take() else {
            return Ok(());
        };

        let response = self
            .http
            .delete(self.endpoint.clone())
            .header(SESSION_HEADER, id.as_str())
            .header(PROTOCOL_HEADER, PROTOCOL_VERSION)
            .header("Authorization", token.authorization_header())
            .send()
            .await
            .map_err(Self::transport_error)?;

        let status = response.status();
        if status.is_success()
            || status == StatusCode::NOT_FOUND
            || status == StatusCode::METHOD_NOT_ALLOWED
        {
            tracing::debug!(session_id = %id, %status, "Session terminated");
            return Ok(());
        }
        Err(TollgateError::Protocol(format!(
            "session termination returned {}",
            status
        ))
        .into())
    }
}

// ---------------------------------------------------------------------------
// SSE parser
// ---------------------------------------------------------------------------

/// Reads an SSE body until the JSON-RPC response for `id` arrives.
///
/// Other messages on the stream (server notifications or requests) are
/// skipped.
///
/// # Errors
///
/// Returns [`TollgateError::Protocol`] if the stream ends first.
pub async fn read_sse_response(
    byte_stream: impl Stream<Item = reqwest::Result<Bytes>>,
    id: u64,
) -> Result<JsonRpcResponse> {
    let mut buffer: Vec<u8> = Vec::new();
    tokio::pin!(byte_stream);

    while let Some(chunk) = byte_stream.next().await {
        let chunk = chunk.map_err(|e| {
            TollgateError::Protocol(format!("event stream interrupted: {}", e))
        })?;
        buffer.extend_from_slice(&chunk);

        while let Some((block, rest)) = split_event(&buffer) {
            let matched = parse_sse_event(&block).and_then(|data| match_response(&data, id));
            buffer = rest;
            if let Some(response) = matched {
                return Ok(response);
            }
        }
    }

    if !buffer.is_empty() {
        let block = String::from_utf8_lossy(&buffer).into_owned();
        if let Some(response) = parse_sse_event(&block).and_then(|data| match_response(&data, id)) {
            return Ok(response);
        }
    }

    Err(TollgateError::Protocol(format!(
        "event stream ended before response to request {}",
        id
    ))
    .into())
}

/// Splits the first complete event (terminated by a blank line) off `buffer`.
fn split_event(buffer: &[u8]) -> Option<(String, Vec<u8>)> {
    let (pos, sep_len) = buffer
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|p| (p, 4))
        .into_iter()
        .chain(buffer.windows(2).position(|w| w == b"\n\n").map(|p| (p, 2)))
        .min_by_key(|(p, _)| *p)?;
    let block = String::from_utf8_lossy(&buffer[..pos]).into_owned();
    Some((block, buffer[pos + sep_len..].to_vec()))
}

fn match_response(data: &str, id: u64) -> Option<JsonRpcResponse> {
    match serde_json::from_str::<JsonRpcResponse>(data) {
        Ok(response) if response.answers(id) => Some(response),
        Ok(_) => {
            tracing::debug!("Skipping unrelated message on event stream");
            None
        }
        Err(_) => {
            tracing::debug!("Skipping non-response event");
            None
        }
    }
}

/// Extracts the `data:` payload of one SSE event block.
///
/// Returns `None` for ping events and events without data.
pub fn parse_sse_event(event_block: &str) -> Option<String> {
    let mut data_lines: Vec<&str> = Vec::new();
    let mut event_type: Option<&str> = None;

    for line in event_block.lines() {
        let line = line.trim_end_matches('\r');
        if let Some(value) = line.strip_prefix("data:") {
            data_lines.push(value.trim());
        } else if let Some(value) = line.strip_prefix("event:") {
            event_type = Some(value.trim());
        }
        // `id:`, `retry:` and `:` comments are not used here.
    }

    if event_type.is_some_and(|et| et.eq_ignore_ascii_case("ping")) {
        return None;
    }

    let data = data_lines.join("\n");
    if data.is_empty() || data.eq_ignore_ascii_case("[ping]") {
        return None;
    }
    Some(data)
}
