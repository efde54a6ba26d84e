//! Byte-level plumbing between an MCP client and its server
//!
//! A transport hands the client a [`PeerIo`]: the server's raw stdout and
//! stdin, its optional diagnostic stream, a one-shot signal carrying the
//! process exit code, and a [`CancellationToken`] that terminates the
//! server when cancelled.
//!
//! Framing is deliberately *not* done here. The client runs its own
//! incremental line framer over the raw stdout bytes (see
//! [`crate::mcp::framer`]), so any transport that can produce byte streams
//! works unchanged.
//!
//! - [`stdio::spawn`] launches a child process and wires its pipes.
//! - `fake::FakePeer` (tests only) is an in-process peer over
//!   [`tokio::io::duplex`].

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// Boxed, `Send`-safe byte source.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Boxed, `Send`-safe byte sink.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// The raw streams and lifecycle handles of one server peer.
pub struct PeerIo {
    /// Bytes written by the server (its stdout).
    pub stdout: BoxedReader,
    /// Bytes sent to the server (its stdin).
    pub stdin: BoxedWriter,
    /// Diagnostic output (its stderr). Never parsed as protocol.
    pub stderr: Option<BoxedReader>,
    /// Fires once with the exit code when the server terminates. `None`
    /// means the exit code is unknown (killed by a signal).
    pub exited: oneshot::Receiver<Option<i32>>,
    /// Cancelling terminates the server.
    pub shutdown: CancellationToken,
}

impl std::fmt::Debug for PeerIo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerIo")
            .field("stderr", &self.stderr.is_some())
            .field("shutdown", &self.shutdown.is_cancelled())
            .finish_non_exhaustive()
    }
}

pub mod stdio;

#[cfg(test)]
pub mod fake;
