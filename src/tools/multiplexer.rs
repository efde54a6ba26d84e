//! Tool multiplexer
//!
//! [`ToolMultiplexer`] aggregates the tools of several origins (normally one
//! [`McpClient`](crate::mcp::McpClient) per configured server) into one table
//! keyed by external name, and routes each dispatched call back to the
//! owning origin under the tool's original name.
//!
//! The table is immutable once built. [`ToolMultiplexer::refresh_tools`]
//! builds a new one and swaps it in whole, so a concurrent lookup observes
//! either the old table or the new one, never a mix.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::RwLock;

use crate::error::{Result, ToolmuxError};
use crate::mcp::types::McpTool;
use crate::tools::naming::{
    external_name, restore_argument_keys, sanitize_input_schema, uniquify,
};
use crate::tools::{ToolDefinition, ToolOrigin, ToolResult};

/// Where an external tool name leads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolMapping {
    /// The API-facing name.
    pub external_name: String,
    /// Key of the origin that owns the tool.
    pub origin: String,
    /// The tool's name on its origin.
    pub tool_name: String,
}

#[derive(Debug)]
struct ToolEntry {
    mapping: ToolMapping,
    definition: ToolDefinition,
    /// Sanitized argument key to the key the origin declared.
    key_map: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
struct ToolTable {
    entries: BTreeMap<String, ToolEntry>,
}

impl ToolTable {
    fn insert(&mut self, origin: &str, tool: McpTool, taken: &mut HashSet<String>) {
        let name = uniquify(&external_name(origin, &tool.name), taken);
        taken.insert(name.clone());

        let sanitized = sanitize_input_schema(&tool.input_schema);
        let description = tool
            .description
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| format!("Execute {} tool", tool.name));

        tracing::debug!(origin, tool = %tool.name, external = %name, "registered tool");
        self.entries.insert(
            name.clone(),
            ToolEntry {
                mapping: ToolMapping {
                    external_name: name.clone(),
                    origin: origin.to_string(),
                    tool_name: tool.name,
                },
                definition: ToolDefinition::new(name, description, sanitized.schema),
                key_map: sanitized.key_map,
            },
        );
    }

    fn definitions(&self) -> Vec<ToolDefinition> {
        self.entries.values().map(|e| e.definition.clone()).collect()
    }
}

/// Aggregates tools from many origins behind unique external names.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use std::time::Duration;
/// use toolmux::config::ServerConfig;
/// use toolmux::mcp::{ClientOptions, McpClient};
/// use toolmux::tools::ToolMultiplexer;
///
/// # #[tokio::main]
/// # async fn main() -> anyhow::Result<()> {
/// let files = McpClient::spawn(
///     "files",
///     &ServerConfig::new("npx").with_args(["-y", "@modelcontextprotocol/server-filesystem", "/tmp"]),
///     ClientOptions::default(),
/// )?;
/// files.wait_for_session(Duration::from_secs(30)).await?;
///
/// let mux = ToolMultiplexer::new();
/// mux.add_origin("files", Arc::new(files)).await?;
/// for def in mux.refresh_tools().await {
///     println!("{}: {}", def.name, def.description);
/// }
///
/// let result = mux
///     .dispatch("files__read_file", serde_json::json!({ "path": "/tmp/a.txt" }))
///     .await?;
/// println!("{}", result.to_tool_result_block("toolu_01"));
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct ToolMultiplexer {
    origins: RwLock<BTreeMap<String, Arc<dyn ToolOrigin>>>,
    table: RwLock<Arc<ToolTable>>,
}

impl std::fmt::Debug for ToolMultiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolMultiplexer").finish_non_exhaustive()
    }
}

impl ToolMultiplexer {
    /// Create an empty multiplexer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `origin` under `key`.
    ///
    /// Its tools appear after the next [`refresh_tools`](Self::refresh_tools).
    ///
    /// # Errors
    ///
    /// Returns [`ToolmuxError::DuplicateOrigin`] if `key` is already in use.
    pub async fn add_origin(
        &self,
        key: impl Into<String>,
        origin: Arc<dyn ToolOrigin>,
    ) -> Result<()> {
        let key = key.into();
        let mut origins = self.origins.write().await;
        if origins.contains_key(&key) {
            return Err(ToolmuxError::DuplicateOrigin(key).into());
        }
        tracing::debug!(origin = %key, "added tool origin");
        origins.insert(key, origin);
        Ok(())
    }

    /// Unregister the origin under `key` and return it.
    ///
    /// Its tools stay in the table until the next refresh; dispatching one
    /// meanwhile fails with [`ToolmuxError::OriginUnavailable`].
    pub async fn remove_origin(&self, key: &str) -> Option<Arc<dyn ToolOrigin>> {
        let removed = self.origins.write().await.remove(key);
        if removed.is_some() {
            tracing::debug!(origin = %key, "removed tool origin");
        }
        removed
    }

    /// Keys of the registered origins, sorted.
    pub async fn origin_keys(&self) -> Vec<String> {
        self.origins.read().await.keys().cloned().collect()
    }

    /// List every origin concurrently and replace the tool table.
    ///
    /// Origins that fail to list are logged and contribute no tools.
    /// Returns the definitions of the new table.
    pub async fn refresh_tools(&self) -> Vec<ToolDefinition> {
        let origins: Vec<(String, Arc<dyn ToolOrigin>)> = self
            .origins
            .read()
            .await
            .iter()
            .map(|(key, origin)| (key.clone(), Arc::clone(origin)))
            .collect();

        let listings = join_all(origins.iter().map(|(key, origin)| async move {
            (key.as_str(), origin.list_tools().await)
        }))
        .await;

        let mut table = ToolTable::default();
        let mut taken = HashSet::new();
        for (key, listing) in listings {
            match listing {
                Ok(tools) => {
                    tracing::debug!(origin = %key, count = tools.len(), "listed tools");
                    for tool in tools {
                        table.insert(key, tool, &mut taken);
                    }
                }
                Err(e) => {
                    tracing::warn!(origin = %key, "failed to list tools: {e:#}");
                }
            }
        }

        let definitions = table.definitions();
        *self.table.write().await = Arc::new(table);
        tracing::info!(
            origins = origins.len(),
            tools = definitions.len(),
            "tool table refreshed"
        );
        definitions
    }

    /// Definitions from the current table.
    pub async fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.snapshot().await.definitions()
    }

    /// Every external-name mapping in the current table.
    pub async fn mappings(&self) -> Vec<ToolMapping> {
        self.snapshot()
            .await
            .entries
            .values()
            .map(|e| e.mapping.clone())
            .collect()
    }

    /// Look up where `external_name` leads.
    pub async fn resolve(&self, external_name: &str) -> Option<ToolMapping> {
        self.snapshot()
            .await
            .entries
            .get(external_name)
            .map(|e| e.mapping.clone())
    }

    /// Invoke the tool behind `external_name`.
    ///
    /// Argument keys renamed by sanitization are restored before the call.
    /// Whatever the origin returns, success or failure, comes back as a
    /// [`ToolResult`].
    ///
    /// # Errors
    ///
    /// Returns [`ToolmuxError::UnknownTool`] if no tool has that name and
    /// [`ToolmuxError::OriginUnavailable`] if its origin has been removed.
    pub async fn dispatch(
        &self,
        external_name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolResult> {
        let table = self.snapshot().await;
        let entry = table
            .entries
            .get(external_name)
            .ok_or_else(|| ToolmuxError::UnknownTool(external_name.to_string()))?;
        let mapping = &entry.mapping;

        let origin = self
            .origins
            .read()
            .await
            .get(&mapping.origin)
            .cloned()
            .ok_or_else(|| ToolmuxError::OriginUnavailable(mapping.origin.clone()))?;

        let arguments = restore_argument_keys(arguments, &entry.key_map);
        tracing::debug!(
            origin = %mapping.origin,
            tool = %mapping.tool_name,
            "dispatching {external_name}"
        );

        let result = match origin.call_tool(&mapping.tool_name, arguments).await {
            Ok(value) => ToolResult::from_call_result(value),
            Err(e) => {
                tracing::warn!(
                    origin = %mapping.origin,
                    tool = %mapping.tool_name,
                    "tool call failed: {e}"
                );
                ToolResult::error(e.to_string())
            }
        };

        Ok(result
            .with_metadata("origin", mapping.origin.clone())
            .with_metadata("tool", mapping.tool_name.clone()))
    }

    async fn snapshot(&self) -> Arc<ToolTable> {
        Arc::clone(&*self.table.read().await)
    }
}
