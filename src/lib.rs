//! Toolmux - MCP stdio client and tool multiplexer library
//!
//! This library connects to MCP (Model Context Protocol) servers over the
//! stdio transport and presents their tools to LLM tool-calling APIs under
//! unique, API-safe names.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `mcp`: Protocol client (framing, correlation, handshake, process lifecycle)
//! - `tools`: Tool naming, schema sanitization, and the multiplexer
//! - `config`: Configuration management and validation
//! - `error`: Error types and result aliases
//! - `cli`: Command-line interface definition
//! - `commands`: CLI command handlers
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use toolmux::{ClientOptions, Config, McpClient, ToolMultiplexer};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config/config.yaml")?;
//!     config.validate()?;
//!
//!     let mux = ToolMultiplexer::new();
//!     for (name, server) in &config.servers {
//!         let client = McpClient::spawn(name.clone(), server, ClientOptions::from(&config.client))?;
//!         client.wait_for_session(Duration::from_secs(30)).await?;
//!         mux.add_origin(name.clone(), Arc::new(client)).await?;
//!     }
//!     let tools = mux.refresh_tools().await;
//!     println!("{} tools available", tools.len());
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod mcp;
pub mod tools;

// Re-export commonly used types
pub use config::Config;
pub use error::{Result, ToolmuxError};
pub use mcp::{ClientOptions, McpClient, SessionState};
pub use tools::{ToolDefinition, ToolMultiplexer, ToolResult};
