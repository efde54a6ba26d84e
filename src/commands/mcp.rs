//! MCP subcommand handlers
//!
//! This module implements the `servers`, `tools`, and `call` CLI commands.
//! The latter two start every configured server, wait for their sessions,
//! and register each ready client with a [`ToolMultiplexer`].

use std::sync::Arc;

use anyhow::Context;
use colored::Colorize;
use futures::future::join_all;
use prettytable::{format, Table};

use crate::config::Config;
use crate::error::Result;
use crate::mcp::client::{ClientOptions, McpClient};
use crate::tools::ToolMultiplexer;

/// Longest description shown in the tools table.
const DESCRIPTION_WIDTH: usize = 60;

/// Running servers behind one multiplexer.
pub struct ServerFleet {
    /// The multiplexer every ready client is registered with.
    pub mux: ToolMultiplexer,
    clients: Vec<Arc<McpClient>>,
}

impl ServerFleet {
    /// Spawn every configured server and wait for its handshake.
    ///
    /// Servers that fail to spawn or to complete the handshake are logged
    /// and left out.
    ///
    /// # Errors
    ///
    /// Returns an error only if registering a client fails.
    pub async fn start(config: &Config) -> Result<Self> {
        let options = ClientOptions::from(&config.client);
        let deadline = config.client.startup_delay() + config.client.init_timeout();

        let mut spawned = Vec::new();
        for (name, server) in &config.servers {
            match McpClient::spawn(name.clone(), server, options.clone()) {
                Ok(client) => spawned.push(Arc::new(client)),
                Err(e) => tracing::warn!(server = %name, "failed to start MCP server: {e:#}"),
            }
        }

        let sessions = join_all(spawned.iter().map(|c| c.wait_for_session(deadline))).await;

        let mux = ToolMultiplexer::new();
        let mut clients = Vec::new();
        for (client, session) in spawned.into_iter().zip(sessions) {
            match session {
                Ok(()) => {
                    tracing::info!(
                        server = %client.origin(),
                        "connected to {}",
                        client.server_name()
                    );
                    mux.add_origin(client.origin().to_string(), client.clone())
                        .await?;
                    clients.push(client);
                }
                Err(e) => {
                    tracing::warn!(server = %client.origin(), "MCP session failed: {e}");
                    client.close().await;
                }
            }
        }

        Ok(Self { mux, clients })
    }

    /// Number of servers with a ready session.
    pub fn ready_count(&self) -> usize {
        self.clients.len()
    }

    /// Close every client.
    pub async fn shutdown(&self) {
        join_all(self.clients.iter().map(|c| c.close())).await;
    }
}

/// Handle `toolmux servers`
///
/// Prints the configured servers without starting them.
pub fn handle_servers(config: &Config) -> Result<()> {
    if config.servers.is_empty() {
        println!("{}", "No MCP servers configured.".yellow());
        return Ok(());
    }

    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);
    table.add_row(prettytable::row![
        "Name".bold(),
        "Command".bold(),
        "Args".bold(),
        "Env".bold()
    ]);

    for (name, server) in &config.servers {
        let env = server.env.keys().cloned().collect::<Vec<_>>().join(", ");
        table.add_row(prettytable::row![
            name.cyan(),
            server.command,
            server.args.join(" "),
            env
        ]);
    }

    println!("\nConfigured MCP servers:");
    table.printstd();
    println!();
    Ok(())
}

/// Handle `toolmux tools`
///
/// Starts every server, refreshes the tool table, and prints it.
pub async fn handle_tools(config: &Config, json: bool) -> Result<()> {
    let fleet = ServerFleet::start(config).await?;
    let definitions = fleet.mux.refresh_tools().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&definitions)?);
    } else if definitions.is_empty() {
        println!("{}", "No tools available.".yellow());
    } else {
        let mut table = Table::new();
        table.set_format(*format::consts::FORMAT_BORDERS_ONLY);
        table.add_row(prettytable::row![
            "Tool".bold(),
            "Server".bold(),
            "Original Name".bold(),
            "Description".bold()
        ]);
        for def in &definitions {
            let Some(mapping) = fleet.mux.resolve(&def.name).await else {
                continue;
            };
            table.add_row(prettytable::row![
                def.name.cyan(),
                mapping.origin,
                mapping.tool_name,
                truncate_description(&def.description, DESCRIPTION_WIDTH)
            ]);
        }

        println!(
            "\n{} tools from {} server(s):",
            definitions.len(),
            fleet.ready_count()
        );
        table.printstd();
        println!();
    }

    fleet.shutdown().await;
    Ok(())
}

/// Handle `toolmux call`
///
/// Starts every server, dispatches one tool call, and prints the resulting
/// `tool_result` block.
///
/// # Errors
///
/// Returns an error if `args` is not valid JSON or the tool name is unknown.
/// Failures of the tool itself are printed as an error block, not returned.
pub async fn handle_call(config: &Config, name: &str, args: &str, tool_use_id: &str) -> Result<()> {
    let arguments: serde_json::Value =
        serde_json::from_str(args).context("--args must be valid JSON")?;

    let fleet = ServerFleet::start(config).await?;
    fleet.mux.refresh_tools().await;
    let dispatched = fleet.mux.dispatch(name, arguments).await;
    fleet.shutdown().await;

    let result = dispatched?;
    println!(
        "{}",
        serde_json::to_string_pretty(&result.to_tool_result_block(tool_use_id))?
    );
    Ok(())
}

fn truncate_description(description: &str, width: usize) -> String {
    let first_line = description.lines().next().unwrap_or_default();
    if first_line.chars().count() <= width {
        return first_line.to_string();
    }
    let kept: String = first_line.chars().take(width.saturating_sub(3)).collect();
    format!("{kept}...")
}
