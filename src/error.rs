//! Error types for Toolmux
//!
//! This module defines all error types used throughout the crate, using
//! `thiserror` for ergonomic error handling.
//!
//! [`ToolmuxError`] is `Clone` because channel-level failures (process exit,
//! framing errors, explicit close) are broadcast to every pending call on a
//! channel, and each waiter receives its own copy.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Main error type for Toolmux operations
///
/// Covers the stdio protocol client (handshake, correlation, framing,
/// process lifecycle), the tool multiplexer, and configuration loading.
#[derive(Error, Debug, Clone)]
pub enum ToolmuxError {
    /// An operation was attempted before the handshake completed
    #[error("MCP session not ready: the initialize handshake has not completed")]
    NotReady,

    /// The handshake did not complete within the allotted time
    #[error("MCP initialization timeout after {0:?}")]
    InitTimeout(Duration),

    /// The peer's `initialize` response lacked required fields
    #[error("MCP handshake protocol error: {0}")]
    HandshakeProtocolError(String),

    /// A single request received no matching response in time
    #[error("MCP timeout: no response to `{method}` within {timeout:?}")]
    CallTimeout {
        /// The JSON-RPC method that timed out
        method: String,
        /// The timeout window that elapsed
        timeout: Duration,
    },

    /// The peer answered with a JSON-RPC error object
    #[error("{message}")]
    PeerError {
        /// JSON-RPC error code, verbatim
        code: i64,
        /// JSON-RPC error message, verbatim
        message: String,
    },

    /// The server subprocess terminated
    #[error("Server process exited with code {}", exit_code_display(.0))]
    ProcessExited(Option<i32>),

    /// A line from the peer could not be parsed as JSON
    #[error("MCP framing error: {0}")]
    FramingError(String),

    /// A response carried neither `result` nor `error`
    #[error("MCP malformed response for id {0}: missing both result and error")]
    MalformedResponse(String),

    /// The channel was closed explicitly by the caller
    #[error("MCP channel closed")]
    ChannelClosed,

    /// A request id collided with one that is still pending
    #[error("Duplicate pending request id: {0}")]
    DuplicateRequestId(String),

    /// The multiplexer has no tool under this external name
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// The origin that advertised a tool can no longer be located
    #[error("Tool origin unavailable: {0}")]
    OriginUnavailable(String),

    /// An origin key was registered twice
    #[error("Duplicate tool origin: {0}")]
    DuplicateOrigin(String),

    /// Transport-level failure (spawn, pipes, writer task)
    #[error("MCP transport error: {0}")]
    Transport(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(Arc<serde_json::Error>),
}

fn exit_code_display(code: &Option<i32>) -> String {
    match code {
        Some(c) => c.to_string(),
        None => "unknown (terminated by signal)".to_string(),
    }
}

impl From<std::io::Error> for ToolmuxError {
    fn from(e: std::io::Error) -> Self {
        ToolmuxError::Io(Arc::new(e))
    }
}

impl From<serde_json::Error> for ToolmuxError {
    fn from(e: serde_json::Error) -> Self {
        ToolmuxError::Serialization(Arc::new(e))
    }
}

impl ToolmuxError {
    /// Returns `true` for failures that affect the whole channel rather
    /// than a single call.
    pub fn is_channel_level(&self) -> bool {
        matches!(
            self,
            ToolmuxError::ProcessExited(_) | ToolmuxError::FramingError(_) | ToolmuxError::ChannelClosed
        )
    }
}

/// Result type alias for Toolmux operations
///
/// Uses `anyhow::Error` as the error type. Callers that need to branch on
/// the error kind use `err.downcast_ref::<ToolmuxError>()`.
pub type Result<T> = anyhow::Result<T>;
