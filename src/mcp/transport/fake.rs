//! In-process fake server peer for MCP unit tests
//!
//! [`fake_peer`] returns a [`PeerIo`] for the client under test and a
//! [`FakePeer`] that plays the server: it reads the lines the client wrote,
//! writes raw bytes (optionally split at arbitrary points) back, and can
//! simulate process exit.
//!
//! ```text
//! client stdin  -----> duplex -----> FakePeer::next_message()
//! FakePeer::send_*() -> duplex -----> client stdout
//! FakePeer::exit()   -> oneshot ----> client exit watcher
//! ```

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::mcp::transport::PeerIo;

const DUPLEX_CAPACITY: usize = 64 * 1024;

/// How long [`FakePeer::next_message`] waits before failing the test.
const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// The server side of an in-process peer.
#[derive(Debug)]
pub struct FakePeer {
    from_client: Lines<BufReader<DuplexStream>>,
    to_client: Option<DuplexStream>,
    stderr: Option<DuplexStream>,
    exit_tx: Option<oneshot::Sender<Option<i32>>>,
    /// Cancelled when the client shuts the peer down.
    pub shutdown: CancellationToken,
}

/// Create a connected `(PeerIo, FakePeer)` pair.
pub fn fake_peer() -> (PeerIo, FakePeer) {
    let (client_stdin, server_stdin) = tokio::io::duplex(DUPLEX_CAPACITY);
    let (server_stdout, client_stdout) = tokio::io::duplex(DUPLEX_CAPACITY);
    let (server_stderr, client_stderr) = tokio::io::duplex(DUPLEX_CAPACITY);
    let (exit_tx, exited) = oneshot::channel();
    let shutdown = CancellationToken::new();

    let io = PeerIo {
        stdout: Box::new(client_stdout),
        stdin: Box::new(client_stdin),
        stderr: Some(Box::new(client_stderr)),
        exited,
        shutdown: shutdown.clone(),
    };
    let peer = FakePeer {
        from_client: BufReader::new(server_stdin).lines(),
        to_client: Some(server_stdout),
        stderr: Some(server_stderr),
        exit_tx: Some(exit_tx),
        shutdown,
    };
    (io, peer)
}

impl FakePeer {
    /// Read and parse the next line the client wrote.
    ///
    /// Panics if nothing arrives within five seconds.
    pub async fn next_message(&mut self) -> serde_json::Value {
        let line = tokio::time::timeout(READ_TIMEOUT, self.from_client.next_line())
            .await
            .expect("timed out waiting for client message")
            .expect("client stream failed")
            .expect("client closed its stdin");
        serde_json::from_str(&line).expect("client wrote invalid JSON")
    }

    /// Read messages until one with `method` arrives.
    pub async fn expect_method(&mut self, method: &str) -> serde_json::Value {
        loop {
            let msg = self.next_message().await;
            if msg["method"] == method {
                return msg;
            }
        }
    }

    /// Write raw bytes to the client's stdout.
    pub async fn send_raw(&mut self, bytes: &[u8]) {
        let stream = self.to_client.as_mut().expect("stdout already closed");
        stream.write_all(bytes).await.expect("client stdout closed");
        stream.flush().await.expect("client stdout closed");
    }

    /// Write one JSON message followed by a newline.
    pub async fn send_json(&mut self, value: serde_json::Value) {
        let mut line = serde_json::to_vec(&value).expect("serializable");
        line.push(b'\n');
        self.send_raw(&line).await;
    }

    /// Answer request `id` with `result`.
    pub async fn respond(&mut self, id: &serde_json::Value, result: serde_json::Value) {
        self.send_json(serde_json::json!({ "jsonrpc": "2.0", "id": id, "result": result }))
            .await;
    }

    /// Answer request `id` with a JSON-RPC error.
    pub async fn respond_error(&mut self, id: &serde_json::Value, code: i64, message: &str) {
        self.send_json(serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": { "code": code, "message": message }
        }))
        .await;
    }

    /// Answer the client's `initialize` as server `name`/`version`.
    ///
    /// Returns the `initialize` request the client sent.
    pub async fn complete_handshake(&mut self, name: &str, version: &str) -> serde_json::Value {
        let init = self.expect_method("initialize").await;
        self.respond(
            &init["id"],
            serde_json::json!({
                "protocolVersion": "2024-11-05",
                "capabilities": { "tools": {} },
                "serverInfo": { "name": name, "version": version }
            }),
        )
        .await;
        self.expect_method("notifications/initialized").await;
        init
    }

    /// Write a line to the client's diagnostic stream.
    pub async fn send_stderr(&mut self, line: &str) {
        let stream = self.stderr.as_mut().expect("stderr already closed");
        stream
            .write_all(format!("{line}\n").as_bytes())
            .await
            .expect("client stderr closed");
    }

    /// Simulate process termination: close stdout and report `code`.
    pub fn exit(&mut self, code: Option<i32>) {
        self.to_client = None;
        self.stderr = None;
        if let Some(tx) = self.exit_tx.take() {
            let _ = tx.send(code);
        }
    }
}
