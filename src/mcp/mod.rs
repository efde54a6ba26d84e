//! MCP (Model Context Protocol) client support for Toolmux
//!
//! This module implements the client side of the MCP stdio transport:
//! newline-delimited JSON-RPC 2.0 over a child process's stdin and stdout.
//! It targets protocol revision **2024-11-05** and covers the tool surface
//! only (`tools/list`, `tools/call`).
//!
//! # Module Layout
//!
//! - `types`      -- Protocol constants, JSON-RPC envelopes, handshake and tool types
//! - `correlator` -- Request id to pending-call table with single delivery
//! - `framer`     -- Incremental line framer and inbound message dispatch
//! - `transport`  -- Raw peer streams: stdio child process, in-process fake
//! - `client`     -- `McpClient`, the per-server channel façade

pub mod client;
pub mod correlator;
pub mod framer;
pub mod transport;
pub mod types;

pub use client::{ClientOptions, McpClient, SessionState};
pub use types::*;
