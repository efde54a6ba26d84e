//! Tools module for Toolmux
//!
//! This module presents tools from many MCP servers as one flat list of
//! LLM-facing tool definitions, and turns tool invocations back into calls
//! on the server that owns each tool.

pub mod multiplexer;
pub mod naming;

pub use multiplexer::{ToolMapping, ToolMultiplexer};

use crate::error::Result;
use crate::mcp::client::McpClient;
use crate::mcp::types::{CallToolResponse, McpTool};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Tool definition structure
///
/// Represents a tool that can be called by the AI provider, in the
/// `name` / `description` / `input_schema` shape of tool-calling APIs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDefinition {
    /// External (API-safe, unique) name of the tool
    pub name: String,
    /// Description of what the tool does
    pub description: String,
    /// JSON schema for the tool's input
    pub input_schema: serde_json::Value,
}

impl ToolDefinition {
    /// Create a new tool definition
    ///
    /// # Arguments
    ///
    /// * `name` - External tool name
    /// * `description` - Tool description
    /// * `input_schema` - JSON schema for the input object
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}

/// Tool result structure
///
/// The uniform envelope for a dispatched tool call. Failures of any kind
/// (unknown arguments, server errors, timeouts, a dead process) are carried
/// as data so the caller can hand them back to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    /// Whether the tool execution succeeded
    pub success: bool,
    /// Output from the tool
    pub output: String,
    /// Error message if execution failed
    pub error: Option<String>,
    /// Additional metadata about the execution
    pub metadata: HashMap<String, String>,
}

impl ToolResult {
    /// Create a successful tool result
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
            metadata: HashMap::new(),
        }
    }

    /// Create a failed tool result
    pub fn error(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(error.into()),
            metadata: HashMap::new(),
        }
    }

    /// Interpret a raw `tools/call` result
    ///
    /// MCP-shaped results contribute their text content (and their
    /// `isError` flag); anything else is rendered as JSON.
    ///
    /// # Examples
    ///
    /// ```
    /// use toolmux::tools::ToolResult;
    ///
    /// let result = ToolResult::from_call_result(serde_json::json!({
    ///     "content": [{ "type": "text", "text": "hello" }]
    /// }));
    /// assert!(result.success);
    /// assert_eq!(result.output, "hello");
    /// ```
    pub fn from_call_result(value: serde_json::Value) -> Self {
        match serde_json::from_value::<CallToolResponse>(value.clone()) {
            Ok(response) => {
                let text = response.text().unwrap_or_else(|| value.to_string());
                if response.is_error == Some(true) {
                    Self::error(text)
                } else {
                    Self::success(text)
                }
            }
            Err(_) => Self::success(value.to_string()),
        }
    }

    /// Add metadata to the result
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Convert to a message string for the conversation
    pub fn to_message(&self) -> String {
        if self.success {
            self.output.clone()
        } else {
            format!(
                "Error: {}",
                self.error.as_deref().unwrap_or("Unknown error")
            )
        }
    }

    /// Render the `tool_result` content block answering `tool_use_id`
    ///
    /// # Examples
    ///
    /// ```
    /// use toolmux::tools::ToolResult;
    ///
    /// let block = ToolResult::error("not found").to_tool_result_block("toolu_1");
    /// assert_eq!(block["type"], "tool_result");
    /// assert_eq!(block["content"], "Error: not found");
    /// assert_eq!(block["is_error"], true);
    /// ```
    pub fn to_tool_result_block(&self, tool_use_id: &str) -> serde_json::Value {
        let mut block = serde_json::json!({
            "type": "tool_result",
            "tool_use_id": tool_use_id,
            "content": self.to_message(),
        });
        if !self.success {
            block["is_error"] = serde_json::Value::Bool(true);
        }
        block
    }
}

/// A source of tools: anything that can list and invoke them.
///
/// [`McpClient`] is the production implementation. Tests use in-memory
/// origins.
#[async_trait]
pub trait ToolOrigin: Send + Sync {
    /// List every tool this origin exposes.
    async fn list_tools(&self) -> Result<Vec<McpTool>>;

    /// Invoke `name` with `arguments` and return the raw result.
    async fn call_tool(&self, name: &str, arguments: serde_json::Value)
        -> Result<serde_json::Value>;
}

#[async_trait]
impl ToolOrigin for McpClient {
    async fn list_tools(&self) -> Result<Vec<McpTool>> {
        self.list_all_tools().await
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value> {
        McpClient::call_tool(self, name, arguments).await
    }
}
