//! Newline framing and inbound message dispatch
//!
//! The server's stdout is an unbounded byte stream. [`LineFramer`] buffers
//! partial data across reads and yields only complete `\n`-terminated lines,
//! so a message split over any number of reads, or several messages packed
//! into one read, frame identically.
//!
//! [`Dispatcher`] takes each complete line and routes it:
//!
//! - **Probe** (`"method": "ping"`): answered with a `pong` carrying the same
//!   id. Never reaches the correlation table.
//! - **Response** (no `method`): resolves or rejects the matching pending
//!   call.
//! - **Server request** (any other `method` with an `id`): answered with
//!   `-32601 Method not found` so the server never blocks on us.
//! - **Notification** (`method` without `id`): logged and dropped.
//!
//! A line that is not valid JSON is a [`ToolmuxError::FramingError`]. The
//! caller treats it as fatal for the channel since alignment with the stream
//! can no longer be trusted.

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;

use crate::error::ToolmuxError;
use crate::mcp::correlator::{request_key, PendingCalls};
use crate::mcp::types::{
    JsonRpcError, JsonRpcResponse, PongMessage, ERROR_METHOD_NOT_FOUND, JSONRPC_VERSION,
    METHOD_PING,
};

/// Size of each read from the server's stdout.
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Incremental newline-delimited framer.
///
/// # Examples
///
/// ```
/// use toolmux::mcp::framer::LineFramer;
///
/// let mut framer = LineFramer::new();
/// assert!(framer.push(b"{\"id\":").is_empty());
/// let lines = framer.push(b"1}\n{\"id\":2}\n");
/// assert_eq!(lines.len(), 2);
/// assert_eq!(&lines[0][..], b"{\"id\":1}");
/// ```
#[derive(Debug, Default)]
pub struct LineFramer {
    buffer: BytesMut,
    /// Bytes at the front of `buffer` already known to contain no newline.
    scanned: usize,
}

impl LineFramer {
    /// Create an empty framer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completes.
    ///
    /// Lines are returned without the terminating `\n` (and without a
    /// trailing `\r`). Blank lines are skipped.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        self.buffer.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(offset) = self.buffer[self.scanned..].iter().position(|b| *b == b'\n') {
            let end = self.scanned + offset;
            let mut line = self.buffer.split_to(end + 1);
            self.scanned = 0;

            line.truncate(end);
            if line.last() == Some(&b'\r') {
                line.truncate(end - 1);
            }
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            lines.push(line.freeze());
        }
        self.scanned = self.buffer.len();
        lines
    }

    /// Take whatever unterminated data remains at end of stream.
    pub fn finish(&mut self) -> Option<Bytes> {
        self.scanned = 0;
        let rest = self.buffer.split().freeze();
        if rest.iter().all(u8::is_ascii_whitespace) {
            None
        } else {
            Some(rest)
        }
    }

    /// Number of bytes buffered while waiting for a newline.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

/// A classified inbound message.
#[derive(Debug, Clone)]
pub enum Inbound {
    /// Server liveness probe carrying the id to echo back.
    Probe(serde_json::Value),
    /// Response to one of our requests.
    Response {
        /// Correlation key of the request being answered.
        key: String,
        /// The result, or the error to deliver.
        outcome: std::result::Result<serde_json::Value, ToolmuxError>,
    },
    /// Server-initiated request other than a probe.
    ServerRequest {
        /// The request id to answer.
        id: serde_json::Value,
        /// The method the server asked for.
        method: String,
    },
    /// Server notification.
    Notification(String),
    /// Valid JSON that fits none of the shapes above.
    Anomaly(String),
}

/// Parse one complete line and classify it.
///
/// # Errors
///
/// Returns [`ToolmuxError::FramingError`] when the line is not valid JSON.
pub fn classify(line: &[u8]) -> Result<Inbound, ToolmuxError> {
    let value: serde_json::Value = serde_json::from_slice(line).map_err(|e| {
        ToolmuxError::FramingError(format!(
            "{e}; raw line: {}",
            String::from_utf8_lossy(line)
        ))
    })?;

    let Some(object) = value.as_object() else {
        return Ok(Inbound::Anomaly(format!("non-object message: {value}")));
    };

    let id = object.get("id").filter(|id| !id.is_null()).cloned();

    if let Some(method) = object.get("method").and_then(|m| m.as_str()) {
        if method == METHOD_PING {
            return Ok(Inbound::Probe(id.unwrap_or(serde_json::Value::Null)));
        }
        return Ok(match id {
            Some(id) => Inbound::ServerRequest {
                id,
                method: method.to_string(),
            },
            None => Inbound::Notification(method.to_string()),
        });
    }

    let Some(key) = id.as_ref().and_then(request_key) else {
        return Ok(Inbound::Anomaly(format!("response without usable id: {value}")));
    };

    let outcome = if let Some(error_val) = object.get("error") {
        match serde_json::from_value::<JsonRpcError>(error_val.clone()) {
            Ok(e) => Err(ToolmuxError::PeerError {
                code: e.code,
                message: e.message,
            }),
            Err(_) => Err(ToolmuxError::PeerError {
                code: -32603,
                message: format!("malformed error object: {error_val}"),
            }),
        }
    } else if let Some(result) = object.get("result") {
        Ok(result.clone())
    } else {
        Err(ToolmuxError::MalformedResponse(key.clone()))
    };

    Ok(Inbound::Response { key, outcome })
}

/// Routes classified messages to the correlation table or back to the
/// server.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    origin: String,
    pending: PendingCalls,
    outbound_tx: mpsc::UnboundedSender<String>,
}

impl Dispatcher {
    /// Create a dispatcher for one channel.
    ///
    /// # Arguments
    ///
    /// * `origin` - Channel label used in log output.
    /// * `pending` - The channel's correlation table.
    /// * `outbound_tx` - Writer queue for replies (pongs, method-not-found).
    pub fn new(
        origin: impl Into<String>,
        pending: PendingCalls,
        outbound_tx: mpsc::UnboundedSender<String>,
    ) -> Self {
        Self {
            origin: origin.into(),
            pending,
            outbound_tx,
        }
    }

    /// Classify and route a single complete line.
    ///
    /// # Errors
    ///
    /// Returns [`ToolmuxError::FramingError`] when the line is not valid JSON.
    pub async fn dispatch_line(&self, line: &[u8]) -> Result<(), ToolmuxError> {
        let inbound = classify(line)?;
        tracing::debug!(origin = %self.origin, "inbound: {}", String::from_utf8_lossy(line));

        match inbound {
            Inbound::Probe(id) => {
                let pong = serde_json::to_string(&PongMessage::for_probe(id))?;
                tracing::debug!(origin = %self.origin, "answering ping: {pong}");
                self.write(pong);
            }
            Inbound::Response { key, outcome } => {
                let delivered = match outcome {
                    Ok(result) => self.pending.resolve(&key, result).await,
                    Err(error) => self.pending.reject(&key, error).await,
                };
                if !delivered {
                    tracing::debug!(
                        origin = %self.origin,
                        "response for unknown or completed id {key}; ignoring"
                    );
                }
            }
            Inbound::ServerRequest { id, method } => {
                tracing::debug!(
                    origin = %self.origin,
                    "unsupported server request `{method}`; replying method-not-found"
                );
                let response = JsonRpcResponse {
                    jsonrpc: JSONRPC_VERSION.to_string(),
                    id: Some(id),
                    result: None,
                    error: Some(JsonRpcError {
                        code: ERROR_METHOD_NOT_FOUND,
                        message: format!("Method not found: {method}"),
                        data: None,
                    }),
                };
                self.write(serde_json::to_string(&response)?);
            }
            Inbound::Notification(method) => {
                tracing::debug!(origin = %self.origin, "ignoring notification `{method}`");
            }
            Inbound::Anomaly(detail) => {
                tracing::warn!(origin = %self.origin, "protocol anomaly: {detail}");
            }
        }
        Ok(())
    }

    fn write(&self, message: String) {
        if self.outbound_tx.send(message).is_err() {
            tracing::debug!(origin = %self.origin, "writer closed; reply dropped");
        }
    }
}

/// Why [`read_loop`] stopped.
#[derive(Debug)]
pub enum ReadLoopEnd {
    /// The stream reached end of file.
    Eof,
    /// A line could not be parsed; the channel is unusable.
    Framing(ToolmuxError),
    /// Reading from the stream failed.
    Io(std::io::Error),
}

/// Read `reader` to completion, framing and dispatching every line.
///
/// An unterminated trailing line at end of stream is dispatched as well.
pub async fn read_loop<R>(mut reader: R, dispatcher: &Dispatcher) -> ReadLoopEnd
where
    R: AsyncRead + Unpin,
{
    let mut framer = LineFramer::new();
    let mut chunk = vec![0u8; READ_CHUNK_SIZE];

    loop {
        let n = match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => return ReadLoopEnd::Io(e),
        };
        for line in framer.push(&chunk[..n]) {
            if let Err(e) = dispatcher.dispatch_line(&line).await {
                return ReadLoopEnd::Framing(e);
            }
        }
    }

    if let Some(rest) = framer.finish() {
        if let Err(e) = dispatcher.dispatch_line(&rest).await {
            return ReadLoopEnd::Framing(e);
        }
    }
    ReadLoopEnd::Eof
}
