//! MCP protocol types and JSON-RPC 2.0 primitives
//!
//! This module defines the wire types used by the stdio client: the JSON-RPC
//! envelopes, the `initialize` handshake, and the `tools/*` methods. Struct
//! fields are `camelCase` on the wire via `#[serde(rename_all = "camelCase")]`.
//! All `Option<>` fields omit their key from JSON when `None`.

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Protocol constants
// ---------------------------------------------------------------------------

/// Protocol revision sent in the `initialize` request.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// JSON-RPC version tag carried by every message.
pub const JSONRPC_VERSION: &str = "2.0";

/// Lifecycle: client sends `initialize` to open a session.
pub const METHOD_INITIALIZE: &str = "initialize";
/// Lifecycle: client sends `notifications/initialized` after the server ACKs.
pub const METHOD_INITIALIZED: &str = "notifications/initialized";
/// Server-initiated liveness probe.
pub const METHOD_PING: &str = "ping";
/// Client acknowledgement of a liveness probe.
pub const METHOD_PONG: &str = "pong";
/// Request a page of available tools.
pub const METHOD_TOOLS_LIST: &str = "tools/list";
/// Invoke a named tool.
pub const METHOD_TOOLS_CALL: &str = "tools/call";

/// JSON-RPC `Method not found`.
pub const ERROR_METHOD_NOT_FOUND: i64 = -32601;

// ---------------------------------------------------------------------------
// JSON-RPC envelopes
// ---------------------------------------------------------------------------

/// A JSON-RPC 2.0 request or notification.
///
/// `id` is `None` only for notifications.
///
/// # Examples
///
/// ```
/// use toolmux::mcp::types::JsonRpcRequest;
///
/// let req = JsonRpcRequest::new(Some(serde_json::json!(1)), "tools/list", None);
/// assert_eq!(req.jsonrpc, "2.0");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Protocol version identifier; always `"2.0"`.
    pub jsonrpc: String,
    /// Request correlation identifier. Absent for notifications.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<serde_json::Value>,
    /// The method name to invoke.
    pub method: String,
    /// Optional method parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcRequest {
    /// Build a request with the `"2.0"` version tag filled in.
    pub fn new(
        id: Option<serde_json::Value>,
        method: impl Into<String>,
        params: Option<serde_json::Value>,
    ) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params,
        }
    }
}

/// A JSON-RPC 2.0 response object.
///
/// Exactly one of `result` or `error` is present in a valid response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Protocol version identifier; always `"2.0"`.
    pub jsonrpc: String,
    /// Mirrors the `id` from the corresponding request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<serde_json::Value>,
    /// Successful result value; mutually exclusive with `error`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Error object; mutually exclusive with `result`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// A JSON-RPC 2.0 error object.
///
/// # Examples
///
/// ```
/// use toolmux::mcp::types::JsonRpcError;
///
/// let e = JsonRpcError { code: -32600, message: "Invalid Request".to_string(), data: None };
/// assert_eq!(e.to_string(), "JSON-RPC error -32600: Invalid Request");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcError {
    /// Numeric error code.
    pub code: i64,
    /// Human-readable error description.
    pub message: String,
    /// Optional additional error context.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

/// Acknowledgement written in reply to a server `ping`.
///
/// Carries the probe's `id` verbatim and, unlike a response, a `method`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PongMessage {
    /// Protocol version identifier; always `"2.0"`.
    pub jsonrpc: String,
    /// Always [`METHOD_PONG`].
    pub method: String,
    /// The id of the `ping` being answered.
    pub id: serde_json::Value,
}

impl PongMessage {
    /// Build the acknowledgement for a probe carrying `id`.
    pub fn for_probe(id: serde_json::Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: METHOD_PONG.to_string(),
            id,
        }
    }
}

// ---------------------------------------------------------------------------
// Handshake types
// ---------------------------------------------------------------------------

/// Identifies a client or server implementation by name and version.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Implementation {
    /// Short name of the implementation.
    pub name: String,
    /// Version string.
    pub version: String,
}

impl Implementation {
    /// The identity reported before a handshake has supplied a real one.
    pub fn unknown() -> Self {
        Self {
            name: "Unknown".to_string(),
            version: "0.0.0".to_string(),
        }
    }

    /// The identity this crate presents to servers.
    pub fn toolmux() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Capabilities this client advertises during `initialize`.
///
/// Only the `tools` namespace is declared.
///
/// # Examples
///
/// ```
/// use toolmux::mcp::types::ClientCapabilities;
///
/// let json = serde_json::to_value(ClientCapabilities::tools()).unwrap();
/// assert_eq!(json, serde_json::json!({ "tools": {} }));
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientCapabilities {
    /// Tool-use support.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<serde_json::Value>,
}

impl ClientCapabilities {
    /// Capabilities declaring tool-use support.
    pub fn tools() -> Self {
        Self {
            tools: Some(serde_json::json!({})),
        }
    }
}

/// Parameters sent by the client in the `initialize` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// The protocol version the client wishes to use.
    pub protocol_version: String,
    /// Information identifying this client implementation.
    pub client_info: Implementation,
    /// Capabilities advertised by this client.
    pub capabilities: ClientCapabilities,
}

/// Response returned by the server to an `initialize` request.
///
/// `protocol_version` is optional here so that a missing field surfaces as
/// a handshake protocol error rather than a deserialization failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResponse {
    /// The protocol version the server has selected for this session.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol_version: Option<String>,
    /// Capabilities advertised by this server.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<serde_json::Value>,
    /// Information identifying this server implementation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_info: Option<Implementation>,
    /// Optional human-readable instructions for the client.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

// ---------------------------------------------------------------------------
// Tool types
// ---------------------------------------------------------------------------

/// A tool definition as returned by `tools/list`.
///
/// # Examples
///
/// ```
/// use toolmux::mcp::types::McpTool;
///
/// let tool: McpTool = serde_json::from_value(serde_json::json!({
///     "name": "search",
///     "inputSchema": { "type": "object" }
/// })).unwrap();
/// assert_eq!(tool.name, "search");
/// assert!(tool.description.is_none());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct McpTool {
    /// Unique name of the tool within the server.
    pub name: String,
    /// Optional display title.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Human-readable description of the tool's purpose.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema describing the tool's input parameters.
    #[serde(default = "empty_object_schema")]
    pub input_schema: serde_json::Value,
}

fn empty_object_schema() -> serde_json::Value {
    serde_json::json!({ "type": "object" })
}

/// Response to a `tools/list` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListToolsResponse {
    /// Tools in this page of results.
    #[serde(default)]
    pub tools: Vec<McpTool>,
    /// Opaque cursor for the next page; `None` means this is the last page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Parameters for a paginated list request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginatedParams {
    /// Cursor returned by the previous page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

/// Parameters for a `tools/call` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolParams {
    /// Name of the tool to invoke.
    pub name: String,
    /// Arguments to pass to the tool.
    pub arguments: serde_json::Value,
}

/// The MCP-shaped result of a `tools/call` request.
///
/// Servers are not forced into this shape; the client returns the raw
/// `result` value and callers try this type when they want structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResponse {
    /// The content items produced by the tool.
    pub content: Vec<ToolResponseContent>,
    /// When `true`, the tool signalled an error condition within its content.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

impl CallToolResponse {
    /// Concatenate all text items, one per line.
    ///
    /// Returns `None` when the response contains non-text content.
    pub fn text(&self) -> Option<String> {
        let mut parts = Vec::with_capacity(self.content.len());
        for item in &self.content {
            match item {
                ToolResponseContent::Text { text } => parts.push(text.as_str()),
                _ => return None,
            }
        }
        Some(parts.join("\n"))
    }
}

/// A single content item in a tool response.
///
/// Discriminated by the `"type"` field on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolResponseContent {
    /// Plain text output.
    Text {
        /// The text content.
        text: String,
    },
    /// A base64-encoded image.
    Image {
        /// Base64-encoded image bytes.
        data: String,
        /// MIME type of the image.
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    /// An embedded resource.
    Resource {
        /// The resource contents, kept opaque.
        resource: serde_json::Value,
    },
}
