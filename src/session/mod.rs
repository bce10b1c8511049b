//! Session Client
//!
//! Opens authenticated sessions against resource endpoints and invokes
//! their capabilities over MCP JSON-RPC.
//!
//! A session takes its bearer token from the [`TokenBroker`] before every
//! request, so tokens nearing expiry are replaced transparently. If the
//! resource still rejects a token, the session forces one refresh and
//! retries the request once; a second rejection is returned to the caller
//! as [`TollgateError::Unauthorized`].

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tokio::sync::RwLock;

use crate::broker::TokenBroker;
use crate::config::SessionConfig;
use crate::error::{Result, TollgateError};
use crate::locator::{Locator, ResourceAddress};
use crate::telemetry;

pub mod transport;
pub mod types;

pub use transport::HttpTransport;
pub use types::{CapabilityDescriptor, ContentItem, InvocationResult};

use types::{
    CallToolParams, Implementation, InitializeParams, InitializeResult, JsonRpcRequest,
    ListToolsResult, METHOD_INITIALIZE, METHOD_INITIALIZED, METHOD_TOOLS_CALL, METHOD_TOOLS_LIST,
    PROTOCOL_VERSION,
};

/// Opens [`Session`]s.
#[derive(Debug, Clone)]
pub struct SessionClient {
    broker: Arc<TokenBroker>,
    locator: Locator,
    config: SessionConfig,
}

impl SessionClient {
    /// Creates a client.
    pub fn new(broker: Arc<TokenBroker>, locator: Locator, config: SessionConfig) -> Self {
        Self {
            broker,
            locator,
            config,
        }
    }

    /// Opens a session with the resource at `address` as `service_name`.
    ///
    /// Obtains a token, builds the invocation URL, and performs the
    /// `initialize` handshake, which also establishes the session id.
    ///
    /// # Errors
    ///
    /// - [`TollgateError::InvalidAddress`] if the address cannot be encoded
    /// - any broker error while obtaining the token
    /// - [`TollgateError::Unauthorized`] if the resource rejects the token
    ///   after one forced refresh
    pub async fn open(&self, address: &ResourceAddress, service_name: &str) -> Result<Session> {
        let endpoint = self.locator.invocation_url(address)?;
        tracing::info!(resource = %address, service = service_name, endpoint = %endpoint, "Opening session");

        let transport =
            HttpTransport::new(endpoint, Duration::from_secs(self.config.timeout_seconds))?;
        let session = Session {
            broker: Arc::clone(&self.broker),
            service_name: service_name.to_string(),
            address: address.clone(),
            transport,
            next_id: AtomicU64::new(1),
            server: RwLock::new(None),
            capabilities: RwLock::new(None),
        };
        session.initialize(&self.config.client_name).await?;
        Ok(session)
    }
}

/// An open session with one resource.
#[derive(Debug)]
pub struct Session {
    broker: Arc<TokenBroker>,
    service_name: String,
    address: ResourceAddress,
    transport: HttpTransport,
    next_id: AtomicU64,
    server: RwLock<Option<InitializeResult>>,
    capabilities: RwLock<Option<Vec<CapabilityDescriptor>>>,
}

impl Session {
    /// The resource this session talks to.
    pub fn address(&self) -> &ResourceAddress {
        &self.address
    }

    /// The server-issued session identifier.
    pub async fn session_id(&self) -> Option<String> {
        self.transport.session_id().await
    }

    /// What the resource reported during `initialize`.
    pub async fn server_info(&self) -> Option<InitializeResult> {
        self.server.read().await.clone()
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Sends `request`, refreshing the token and retrying once on
    /// `Unauthorized`.
    async fn send(&self, request: &JsonRpcRequest) -> Result<Option<types::JsonRpcResponse>> {
        let token = self.broker.get_token(&self.service_name).await?;
        match self.transport.request(request, &token).await {
            Err(e) if matches!(TollgateError::classify(&e), Some(TollgateError::Unauthorized(_))) => {
                tracing::warn!(
                    service = %self.service_name,
                    method = %request.method,
                    "Resource rejected token, refreshing and retrying once"
                );
                let token = self.broker.force_refresh(&self.service_name, &token).await?;
                self.transport.request(request, &token).await
            }
            other => other,
        }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<T> {
        let request = JsonRpcRequest::new(self.next_id(), method, params);
        let response = self.send(&request).await?.ok_or_else(|| {
            TollgateError::Protocol(format!("no response to {}", method))
        })?;

        if let Some(error) = response.error {
            return Err(TollgateError::Protocol(format!("{} failed: {}", method, error)).into());
        }
        let result = response
            .result
            .ok_or_else(|| TollgateError::Protocol(format!("{} returned no result", method)))?;
        serde_json::from_value(result).map_err(|e| {
            TollgateError::Protocol(format!("unexpected {} result: {}", method, e)).into()
        })
    }

    async fn initialize(&self, client_name: &str) -> Result<()> {
        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: serde_json::json!({}),
            client_info: Implementation {
                name: client_name.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };
        let params = serde_json::to_value(&params).map_err(TollgateError::from)?;
        let result: InitializeResult = self.call(METHOD_INITIALIZE, Some(params)).await?;
        tracing::info!(
            resource = %self.address,
            protocol_version = %result.protocol_version,
            session_id = ?self.session_id().await,
            "Session initialized"
        );
        *self.server.write().await = Some(result);

        self.send(&JsonRpcRequest::notification(METHOD_INITIALIZED, None))
            .await?;
        Ok(())
    }

    /// Lists the resource's capabilities, following pagination.
    ///
    /// The result is remembered and used by [`invoke`](Self::invoke) to
    /// reject unknown names without a round trip.
    pub async fn list_capabilities(&self) -> Result<Vec<CapabilityDescriptor>> {
        let mut capabilities = Vec::new();
        let mut cursor: Option<String> = None;
        let mut seen = HashSet::new();

        loop {
            let params = cursor
                .as_ref()
                .map(|c| serde_json::json!({ "cursor": c }));
            let page: ListToolsResult = self.call(METHOD_TOOLS_LIST, params).await?;
            capabilities.extend(page.tools);

            match page.next_cursor {
                Some(next) if !seen.insert(next.clone()) => {
                    return Err(TollgateError::Protocol(format!(
                        "tools/list revisited cursor '{}'",
                        next
                    ))
                    .into());
                }
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        tracing::debug!(count = capabilities.len(), "Listed capabilities");
        *self.capabilities.write().await = Some(capabilities.clone());
        Ok(capabilities)
    }

    async fn is_listed(&self, name: &str) -> Result<bool> {
        if let Some(known) = self.capabilities.read().await.as_ref() {
            return Ok(known.iter().any(|c| c.name == name));
        }
        Ok(self.list_capabilities().await?.iter().any(|c| c.name == name))
    }

    /// Invokes capability `name` with `arguments`.
    ///
    /// A result with `is_error` set is returned as `Ok`; it is the
    /// capability's own failure, not a transport failure.
    ///
    /// # Errors
    ///
    /// - [`TollgateError::CapabilityNotFound`] if `name` is not listed
    /// - [`TollgateError::Unauthorized`] if the token is rejected twice
    pub async fn invoke(&self, name: &str, arguments: serde_json::Value) -> Result<InvocationResult> {
        if !self.is_listed(name).await? {
            telemetry::record_invocation(name, "not_found");
            return Err(TollgateError::CapabilityNotFound(format!(
                "'{}' is not offered by {}",
                name, self.address
            ))
            .into());
        }

        let params = CallToolParams {
            name: name.to_string(),
            arguments: Some(arguments),
        };
        let params = serde_json::to_value(&params).map_err(TollgateError::from)?;
        let result: Result<InvocationResult> = self.call(METHOD_TOOLS_CALL, Some(params)).await;

        match &result {
            Ok(r) if r.is_error => {
                tracing::warn!(capability = name, "Capability reported an error");
                telemetry::record_invocation(name, "tool_error");
            }
            Ok(_) => telemetry::record_invocation(name, "success"),
            Err(_) => telemetry::record_invocation(name, "failure"),
        }
        result
    }

    /// Terminates the session on the resource.
    pub async fn close(self) -> Result<()> {
        let token = self.broker.get_token(&self.service_name).await?;
        self.transport.terminate(&token).await?;
        tracing::info!(resource = %self.address, "Session closed");
        Ok(())
    }
}
