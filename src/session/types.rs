//! JSON-RPC 2.0 and MCP wire types used by the session client
//!
//! Struct fields are `camelCase` on the wire via
//! `#[serde(rename_all = "camelCase")]`. `Option<>` fields are omitted from
//! JSON when `None`.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Protocol constants
// ---------------------------------------------------------------------------

/// Protocol revision announced during `initialize`.
pub const PROTOCOL_VERSION: &str = "2025-06-18";

/// Session handshake.
pub const METHOD_INITIALIZE: &str = "initialize";
/// Handshake completion notification.
pub const METHOD_INITIALIZED: &str = "notifications/initialized";
/// Capability listing.
pub const METHOD_TOOLS_LIST: &str = "tools/list";
/// Capability invocation.
pub const METHOD_TOOLS_CALL: &str = "tools/call";

// ---------------------------------------------------------------------------
// JSON-RPC 2.0
// ---------------------------------------------------------------------------

/// A JSON-RPC 2.0 request, or a notification when `id` is `None`.
///
/// # Examples
///
/// ```
/// use tollgate::session::types::JsonRpcRequest;
///
/// let req = JsonRpcRequest::new(1, "tools/list", None);
/// let json = serde_json::to_value(&req).unwrap();
/// assert_eq!(json["jsonrpc"], "2.0");
/// assert_eq!(json["id"], 1);
///
/// let note = JsonRpcRequest::notification("notifications/initialized", None);
/// assert!(serde_json::to_value(&note).unwrap().get("id").is_none());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Always `"2.0"`.
    pub jsonrpc: String,
    /// Correlation identifier; absent for notifications.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    /// Method name.
    pub method: String,
    /// Method parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcRequest {
    /// A request expecting a response.
    pub fn new(id: u64, method: &str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: Some(id),
            method: method.to_string(),
            params,
        }
    }

    /// A notification; the peer sends no response.
    pub fn notification(method: &str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: None,
            method: method.to_string(),
            params,
        }
    }
}

/// A JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Always `"2.0"`.
    pub jsonrpc: String,
    /// Mirrors the request `id`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<serde_json::Value>,
    /// Success value; mutually exclusive with `error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Failure; mutually exclusive with `result`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Whether this response answers request `id`.
    pub fn answers(&self, id: u64) -> bool {
        self.id.as_ref().and_then(serde_json::Value::as_u64) == Some(id)
    }
}

/// A JSON-RPC 2.0 error object.
///
/// # Examples
///
/// ```
/// use tollgate::session::types::JsonRpcError;
///
/// let e = JsonRpcError { code: -32602, message: "Unknown tool".to_string(), data: None };
/// assert_eq!(e.to_string(), "JSON-RPC error -32602: Unknown tool");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Numeric error code.
    pub code: i64,
    /// Description.
    pub message: String,
    /// Extra context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

// ---------------------------------------------------------------------------
// Initialize
// ---------------------------------------------------------------------------

/// Client or server identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Implementation {
    /// Implementation name.
    pub name: String,
    /// Implementation version.
    pub version: String,
}

/// `initialize` parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// Requested protocol revision.
    pub protocol_version: String,
    /// Client capabilities; this client advertises none.
    pub capabilities: serde_json::Value,
    /// Client identity.
    pub client_info: Implementation,
}

/// `initialize` result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    /// Revision selected by the server.
    pub protocol_version: String,
    /// Server capabilities.
    #[serde(default)]
    pub capabilities: serde_json::Value,
    /// Server identity.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_info: Option<Implementation>,
}

// ---------------------------------------------------------------------------
// Capabilities (tools)
// ---------------------------------------------------------------------------

/// A capability advertised by a resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityDescriptor {
    /// Name used with `invoke`.
    pub name: String,
    /// What it does.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema of the arguments.
    #[serde(default)]
    pub input_schema: serde_json::Value,
}

/// One page of `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListToolsResult {
    /// Capabilities on this page.
    pub tools: Vec<CapabilityDescriptor>,
    /// Cursor for the next page; `None` on the last page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// `tools/call` parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolParams {
    /// Capability name.
    pub name: String,
    /// Arguments object.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<serde_json::Value>,
}

/// One content item of an invocation result, discriminated by `"type"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentItem {
    /// Plain text.
    Text {
        /// The text.
        text: String,
    },
    /// Base64 image.
    Image {
        /// Encoded bytes.
        data: String,
        /// MIME type.
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    /// Embedded resource, kept as raw JSON.
    Resource {
        /// Resource contents.
        resource: serde_json::Value,
    },
    /// Any content type this client does not model.
    #[serde(other)]
    Unsupported,
}

/// Result of `tools/call`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationResult {
    /// Content items produced by the capability.
    #[serde(default)]
    pub content: Vec<ContentItem>,
    /// Structured output, when the capability declares one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<serde_json::Value>,
    /// Whether the capability reported a failure in its content.
    #[serde(default)]
    pub is_error: bool,
}

impl InvocationResult {
    /// The result as a JSON value.
    ///
    /// Prefers `structuredContent`; otherwise parses the first text item as
    /// JSON, falling back to the text as a string. `Null` when there is
    /// neither.
    ///
    /// # Examples
    ///
    /// ```
    /// use tollgate::session::types::{ContentItem, InvocationResult};
    ///
    /// let result = InvocationResult {
    ///     content: vec![ContentItem::Text { text: "8".to_string() }],
    ///     structured_content: None,
    ///     is_error: false,
    /// };
    /// assert_eq!(result.value(), serde_json::json!(8));
    /// ```
    pub fn value(&self) -> serde_json::Value {
        if let Some(structured) = &self.structured_content {
            return match structured.get("result") {
                Some(inner) if structured.as_object().is_some_and(|o| o.len() == 1) => {
                    inner.clone()
                }
                _ => structured.clone(),
            };
        }
        self.first_text()
            .map(|text| {
                serde_json::from_str(text)
                    .unwrap_or_else(|_| serde_json::Value::String(text.to_string()))
            })
            .unwrap_or(serde_json::Value::Null)
    }

    /// The first text content item, if any.
    pub fn first_text(&self) -> Option<&str> {
        self.content.iter().find_map(|c| match c {
            ContentItem::Text { text } => Some(text.as_str()),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_value_prefers_structured_content() {
        let result: InvocationResult = serde_json::from_value(json!({
            "content": [{"type": "text", "text": "8"}],
            "structuredContent": {"result": 8}
        }))
        .unwrap();
        assert_eq!(result.value(), json!(8));
    }

    #[test]
    fn test_value_keeps_multi_field_structured_content() {
        let result: InvocationResult = serde_json::from_value(json!({
            "structuredContent": {"result": 8, "unit": "none"}
        }))
        .unwrap();
        assert_eq!(result.value(), json!({"result": 8, "unit": "none"}));
    }

    #[test]
    fn test_value_falls_back_to_raw_text() {
        let result: InvocationResult = serde_json::from_value(json!({
            "content": [{"type": "text", "text": "hello"}]
        }))
        .unwrap();
        assert_eq!(result.value(), json!("hello"));
    }

    #[test]
    fn test_unknown_content_type_is_tolerated() {
        let result: InvocationResult = serde_json::from_value(json!({
            "content": [{"type": "resource_link", "uri": "x"}, {"type": "text", "text": "{\"a\":1}"}]
        }))
        .unwrap();
        assert_eq!(result.content[0], ContentItem::Unsupported);
        assert_eq!(result.value(), json!({"a": 1}));
    }

    #[test]
    fn test_response_answers_matching_id() {
        let resp: JsonRpcResponse =
            serde_json::from_value(json!({"jsonrpc": "2.0", "id": 3, "result": {}})).unwrap();
        assert!(resp.answers(3));
        assert!(!resp.answers(4));
    }

    #[test]
    fn test_list_tools_result_parses_cursor() {
        let page: ListToolsResult = serde_json::from_value(json!({
            "tools": [{"name": "add", "inputSchema": {"type": "object"}}],
            "nextCursor": "abc"
        }))
        .unwrap();
        assert_eq!(page.tools[0].name, "add");
        assert_eq!(page.next_cursor.as_deref(), Some("abc"));
    }
}
