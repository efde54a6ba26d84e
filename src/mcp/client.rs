//! Stdio MCP protocol client
//!
//! [`McpClient`] owns one channel to one MCP server: a single request/response
//! conversation over the server's stdin and stdout. Constructing a client
//! starts four background tasks:
//!
//! - **writer**: serializes every outbound line (requests, notifications,
//!   pongs) so lines never interleave.
//! - **reader**: frames stdout into lines and dispatches them in arrival
//!   order (see [`crate::mcp::framer`]). It also watches for process exit and
//!   turns exit or a framing error into a channel-level failure.
//! - **stderr**: forwards diagnostic lines to `tracing` and to an optional
//!   sink.
//! - **handshake**: after the startup delay, performs `initialize` followed by
//!   `notifications/initialized`.
//!
//! Session state is published on a [`tokio::sync::watch`] channel, so callers
//! can await readiness with [`McpClient::wait_for_session`] instead of
//! polling.
//!
//! # State machine
//!
//! ```text
//! Uninitialized -> Handshaking -> Ready
//!                       |           |
//!                       v           v
//!                    Failed -----> Closed
//! ```
//!
//! `Closed` is terminal and records why the channel ended: `None` for an
//! explicit [`McpClient::close`], otherwise the broadcast error
//! ([`ToolmuxError::ProcessExited`] or [`ToolmuxError::FramingError`]).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use crate::config::{ClientConfig, ServerConfig};
use crate::error::{Result, ToolmuxError};
use crate::mcp::correlator::PendingCalls;
use crate::mcp::framer::{read_loop, Dispatcher, ReadLoopEnd};
use crate::mcp::transport::{stdio, BoxedReader, BoxedWriter, PeerIo};
use crate::mcp::types::{
    CallToolParams, ClientCapabilities, Implementation, InitializeParams, InitializeResponse,
    JsonRpcRequest, ListToolsResponse, McpTool, PaginatedParams, METHOD_INITIALIZE,
    METHOD_INITIALIZED, METHOD_TOOLS_CALL, METHOD_TOOLS_LIST, PROTOCOL_VERSION,
};

/// How long the reader keeps draining stdout after the process has exited.
const EXIT_DRAIN_TIMEOUT: Duration = Duration::from_millis(100);

/// Upper bound on `tools/list` pages followed by [`McpClient::list_all_tools`].
const MAX_LIST_PAGES: usize = 1000;

/// Lifecycle of a channel's session.
#[derive(Debug, Clone, Default)]
pub enum SessionState {
    /// Created; the startup delay has not elapsed yet.
    #[default]
    Uninitialized,
    /// `initialize` has been sent and not yet answered.
    Handshaking,
    /// Handshake complete; tool operations are allowed.
    Ready,
    /// The handshake failed. The process may still be running.
    Failed(ToolmuxError),
    /// The channel is finished. `None` means it was closed explicitly.
    Closed(Option<ToolmuxError>),
}

impl SessionState {
    /// Whether the state is terminal or failed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Failed(_) | SessionState::Closed(_))
    }

    fn accepts(&self, next: &SessionState) -> bool {
        match self {
            SessionState::Closed(_) => false,
            SessionState::Failed(_) => matches!(next, SessionState::Closed(_)),
            _ => true,
        }
    }
}

/// Settings for one client.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use toolmux::mcp::client::ClientOptions;
///
/// let options = ClientOptions::default()
///     .with_request_timeout(Duration::from_secs(10))
///     .with_startup_delay(Duration::ZERO);
/// assert_eq!(options.request_timeout, Duration::from_secs(10));
/// ```
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Timeout for each request after the handshake.
    pub request_timeout: Duration,
    /// Timeout for the `initialize` round trip.
    pub init_timeout: Duration,
    /// Delay between connecting and sending `initialize`.
    pub startup_delay: Duration,
    /// Identity sent as `clientInfo`.
    pub client_info: Implementation,
    /// Receives every stderr line from the server.
    pub diagnostics: Option<mpsc::UnboundedSender<String>>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self::from(&ClientConfig::default())
    }
}

impl From<&ClientConfig> for ClientOptions {
    fn from(config: &ClientConfig) -> Self {
        Self {
            request_timeout: config.request_timeout(),
            init_timeout: config.init_timeout(),
            startup_delay: config.startup_delay(),
            client_info: Implementation::toolmux(),
            diagnostics: None,
        }
    }
}

impl ClientOptions {
    /// Set the per-request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the handshake timeout.
    pub fn with_init_timeout(mut self, timeout: Duration) -> Self {
        self.init_timeout = timeout;
        self
    }

    /// Set the delay before `initialize` is sent.
    pub fn with_startup_delay(mut self, delay: Duration) -> Self {
        self.startup_delay = delay;
        self
    }

    /// Set the identity sent as `clientInfo`.
    pub fn with_client_info(mut self, info: Implementation) -> Self {
        self.client_info = info;
        self
    }

    /// Forward server stderr lines to `sink`.
    pub fn with_diagnostics(mut self, sink: mpsc::UnboundedSender<String>) -> Self {
        self.diagnostics = Some(sink);
        self
    }
}

/// Which states admit a request.
#[derive(Debug, Clone, Copy)]
enum Gate {
    /// Only `Ready`.
    Session,
    /// Anything but `Failed` or `Closed`; used for `initialize` itself.
    Handshake,
}

/// State shared between the client handle and its background tasks.
struct Channel {
    origin: String,
    next_id: AtomicU64,
    pending: PendingCalls,
    outbound_tx: mpsc::UnboundedSender<String>,
    state: watch::Sender<SessionState>,
    identity: OnceLock<Implementation>,
    shutdown: CancellationToken,
}

impl Channel {
    /// Move to `next` if the transition is allowed. Returns whether it was.
    fn advance(&self, next: SessionState) -> bool {
        self.state.send_if_modified(|current| {
            if current.accepts(&next) {
                *current = next;
                true
            } else {
                false
            }
        })
    }

    fn check(&self, gate: Gate) -> std::result::Result<(), ToolmuxError> {
        match (&*self.state.borrow(), gate) {
            (SessionState::Closed(Some(e)), _) => Err(e.clone()),
            (SessionState::Closed(None), _) => Err(ToolmuxError::ChannelClosed),
            (SessionState::Ready, Gate::Session) => Ok(()),
            (_, Gate::Session) => Err(ToolmuxError::NotReady),
            (SessionState::Failed(e), Gate::Handshake) => Err(e.clone()),
            (_, Gate::Handshake) => Ok(()),
        }
    }

    /// The error reported once the channel can no longer carry messages.
    fn closed_error(&self) -> ToolmuxError {
        match &*self.state.borrow() {
            SessionState::Closed(Some(e)) => e.clone(),
            _ => ToolmuxError::ChannelClosed,
        }
    }

    /// Send a request and await its outcome.
    async fn exchange(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        timeout: Duration,
        gate: Gate,
    ) -> std::result::Result<serde_json::Value, ToolmuxError> {
        self.check(gate)?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let key = id.to_string();
        let mut rx = self.pending.register(key.clone()).await?;
        let guard = self.pending.guard(key.clone());

        // A failure broadcast between the first check and registration
        // would have missed this entry.
        if let Err(e) = self.check(gate) {
            self.pending.cancel(&key).await;
            guard.disarm();
            return Err(e);
        }

        let request = JsonRpcRequest::new(Some(serde_json::json!(id)), method, params);
        let line = match serde_json::to_string(&request) {
            Ok(line) => line,
            Err(e) => {
                self.pending.cancel(&key).await;
                guard.disarm();
                return Err(e.into());
            }
        };
        tracing::debug!(origin = %self.origin, "outbound: {line}");
        if self.outbound_tx.send(line).is_err() {
            // The writer is gone; the reader's broadcast or the timeout
            // settles this entry with the channel's real error.
            tracing::debug!(origin = %self.origin, "request {id} not written: writer stopped");
        }

        let outcome = match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(self.closed_error()),
            Err(_) => {
                if self.pending.cancel(&key).await {
                    tracing::warn!(
                        origin = %self.origin,
                        "request {id} (`{method}`) timed out after {timeout:?}"
                    );
                    Err(ToolmuxError::CallTimeout {
                        method: method.to_string(),
                        timeout,
                    })
                } else {
                    // The outcome was delivered just as the timer fired.
                    rx.try_recv().unwrap_or_else(|_| Err(self.closed_error()))
                }
            }
        };
        guard.disarm();
        outcome
    }

    fn notify(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> std::result::Result<(), ToolmuxError> {
        let line = serde_json::to_string(&JsonRpcRequest::new(None, method, params))?;
        tracing::debug!(origin = %self.origin, "outbound: {line}");
        self.outbound_tx
            .send(line)
            .map_err(|_| self.closed_error())
    }

    async fn initialize(
        &self,
        client_info: Implementation,
        timeout: Duration,
    ) -> std::result::Result<Implementation, ToolmuxError> {
        let params = serde_json::to_value(InitializeParams {
            protocol_version: PROTOCOL_VERSION.to_string(),
            client_info,
            capabilities: ClientCapabilities::tools(),
        })?;

        let result = self
            .exchange(METHOD_INITIALIZE, Some(params), timeout, Gate::Handshake)
            .await
            .map_err(|e| match e {
                ToolmuxError::CallTimeout { .. } => ToolmuxError::InitTimeout(timeout),
                other => other,
            })?;

        let response: InitializeResponse = serde_json::from_value(result).map_err(|e| {
            ToolmuxError::HandshakeProtocolError(format!("invalid initialize result: {e}"))
        })?;
        let Some(version) = response.protocol_version else {
            return Err(ToolmuxError::HandshakeProtocolError(
                "initialize result is missing protocolVersion".to_string(),
            ));
        };
        if version != PROTOCOL_VERSION {
            tracing::debug!(
                origin = %self.origin,
                "server selected protocol {version}, requested {PROTOCOL_VERSION}"
            );
        }

        let identity = response.server_info.unwrap_or_else(Implementation::unknown);
        let _ = self.identity.set(identity.clone());

        self.notify(METHOD_INITIALIZED, None)?;
        Ok(identity)
    }

    /// Broadcast a channel-level failure and stop everything.
    async fn fail(&self, error: ToolmuxError) {
        self.advance(SessionState::Closed(Some(error.clone())));
        self.shutdown.cancel();
        let rejected = self.pending.reject_all(error.clone()).await;
        tracing::warn!(
            origin = %self.origin,
            rejected,
            "MCP channel failed: {error}"
        );
    }
}

/// A client for one stdio MCP server.
///
/// Not `Clone`; share it behind an `Arc`. Dropping the last handle stops
/// the background tasks and terminates the server.
///
/// # Examples
///
/// ```no_run
/// use std::time::Duration;
/// use toolmux::config::ServerConfig;
/// use toolmux::mcp::client::{ClientOptions, McpClient};
///
/// # #[tokio::main]
/// # async fn main() -> anyhow::Result<()> {
/// let server = ServerConfig::new("npx")
///     .with_args(["-y", "@modelcontextprotocol/server-filesystem", "/tmp"]);
/// let client = McpClient::spawn("files", &server, ClientOptions::default())?;
/// client.wait_for_session(Duration::from_secs(30)).await?;
///
/// for tool in client.list_all_tools().await? {
///     println!("{}", tool.name);
/// }
/// let result = client
///     .call_tool("read_file", serde_json::json!({ "path": "/tmp/a.txt" }))
///     .await?;
/// println!("{result}");
/// client.close().await;
/// # Ok(())
/// # }
/// ```
pub struct McpClient {
    channel: Arc<Channel>,
    request_timeout: Duration,
}

impl std::fmt::Debug for McpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpClient")
            .field("origin", &self.channel.origin)
            .field("state", &*self.channel.state.borrow())
            .finish_non_exhaustive()
    }
}

impl McpClient {
    /// Launch the server described by `server` and connect to it.
    ///
    /// # Errors
    ///
    /// Returns [`ToolmuxError::Transport`] if the process cannot be spawned.
    pub fn spawn(
        origin: impl Into<String>,
        server: &ServerConfig,
        options: ClientOptions,
    ) -> Result<Self> {
        let io = stdio::spawn(server)?;
        Ok(Self::connect(origin, io, options))
    }

    /// Connect to a peer over arbitrary byte streams.
    ///
    /// Starts the background tasks and the handshake. Must be called from
    /// within a Tokio runtime.
    pub fn connect(origin: impl Into<String>, io: PeerIo, options: ClientOptions) -> Self {
        let origin = origin.into();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(SessionState::Uninitialized);

        let channel = Arc::new(Channel {
            origin: origin.clone(),
            next_id: AtomicU64::new(1),
            pending: PendingCalls::new(),
            outbound_tx,
            state,
            identity: OnceLock::new(),
            shutdown: io.shutdown.clone(),
        });

        tokio::spawn(write_outbound(
            origin.clone(),
            io.stdin,
            outbound_rx,
            io.shutdown.clone(),
        ));
        tokio::spawn(read_inbound(Arc::clone(&channel), io.stdout, io.exited));
        if let Some(stderr) = io.stderr {
            tokio::spawn(forward_stderr(
                origin,
                stderr,
                options.diagnostics.clone(),
                io.shutdown.clone(),
            ));
        }
        tokio::spawn(handshake(
            Arc::clone(&channel),
            options.client_info,
            options.startup_delay,
            options.init_timeout,
        ));

        Self {
            channel,
            request_timeout: options.request_timeout,
        }
    }

    /// The registry key this client was created under.
    pub fn origin(&self) -> &str {
        &self.channel.origin
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        self.channel.state.borrow().clone()
    }

    /// Whether the handshake has completed and the channel is open.
    pub fn is_ready(&self) -> bool {
        matches!(*self.channel.state.borrow(), SessionState::Ready)
    }

    /// Whether the channel is still open.
    pub fn is_connected(&self) -> bool {
        !matches!(*self.channel.state.borrow(), SessionState::Closed(_))
    }

    /// The server's identity from the handshake, or `Unknown`/`0.0.0`.
    pub fn server_identity(&self) -> Implementation {
        self.channel
            .identity
            .get()
            .cloned()
            .unwrap_or_else(Implementation::unknown)
    }

    /// The server's name from the handshake, or `Unknown`.
    pub fn server_name(&self) -> String {
        self.server_identity().name
    }

    /// Number of requests awaiting a response.
    pub async fn pending_requests(&self) -> usize {
        self.channel.pending.len().await
    }

    /// Wait until the handshake settles.
    ///
    /// # Errors
    ///
    /// Returns the handshake's error if it failed, the channel's error if it
    /// closed, or [`ToolmuxError::InitTimeout`] if `deadline` elapses first.
    pub async fn wait_for_session(&self, deadline: Duration) -> Result<()> {
        let mut rx = self.channel.state.subscribe();
        let settled = tokio::time::timeout(
            deadline,
            rx.wait_for(|s| !matches!(s, SessionState::Uninitialized | SessionState::Handshaking)),
        )
        .await;

        let state = match settled {
            Err(_) => return Err(ToolmuxError::InitTimeout(deadline).into()),
            Ok(Err(_)) => return Err(ToolmuxError::ChannelClosed.into()),
            Ok(Ok(state)) => state.clone(),
        };
        match state {
            SessionState::Ready => Ok(()),
            SessionState::Failed(e) | SessionState::Closed(Some(e)) => Err(e.into()),
            SessionState::Closed(None) => Err(ToolmuxError::ChannelClosed.into()),
            SessionState::Uninitialized | SessionState::Handshaking => {
                Err(ToolmuxError::NotReady.into())
            }
        }
    }

    /// Send a correlated request and return the raw `result`.
    ///
    /// `timeout` defaults to the client's request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`ToolmuxError::NotReady`] before the handshake completes,
    /// [`ToolmuxError::PeerError`] when the server answers with an error,
    /// [`ToolmuxError::CallTimeout`] when no answer arrives in time, and the
    /// channel's error once it has closed.
    pub async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        timeout: Option<Duration>,
    ) -> Result<serde_json::Value> {
        let timeout = timeout.unwrap_or(self.request_timeout);
        Ok(self
            .channel
            .exchange(method, params, timeout, Gate::Session)
            .await?)
    }

    /// Request one page of tools.
    ///
    /// `params` is passed through verbatim (for example `{"cursor": "..."}`).
    pub async fn list_tools(&self, params: Option<serde_json::Value>) -> Result<Vec<McpTool>> {
        Ok(self.list_tools_page(params).await?.tools)
    }

    /// Request every page of tools, following `nextCursor`.
    pub async fn list_all_tools(&self) -> Result<Vec<McpTool>> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_LIST_PAGES {
            let params = match cursor.take() {
                Some(c) => Some(serde_json::to_value(PaginatedParams { cursor: Some(c) })?),
                None => None,
            };
            let page = self.list_tools_page(params).await?;
            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => return Ok(tools),
            }
        }

        tracing::warn!(
            origin = %self.channel.origin,
            "tools/list pagination exceeded {MAX_LIST_PAGES} pages; truncating"
        );
        Ok(tools)
    }

    async fn list_tools_page(&self, params: Option<serde_json::Value>) -> Result<ListToolsResponse> {
        let result = self.request(METHOD_TOOLS_LIST, params, None).await?;
        serde_json::from_value(result).map_err(|e| {
            ToolmuxError::MalformedResponse(format!("tools/list result: {e}")).into()
        })
    }

    /// Invoke tool `name` with `arguments` and return the raw `result`.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value> {
        let params = serde_json::to_value(CallToolParams {
            name: name.to_string(),
            arguments,
        })?;
        self.request(METHOD_TOOLS_CALL, Some(params), None).await
    }

    /// Close the channel and terminate the server.
    ///
    /// Pending calls fail with [`ToolmuxError::ChannelClosed`]. Idempotent.
    pub async fn close(&self) {
        if self.channel.advance(SessionState::Closed(None)) {
            tracing::info!(origin = %self.channel.origin, "closing MCP channel");
        }
        self.channel.shutdown.cancel();
        self.channel
            .pending
            .reject_all(ToolmuxError::ChannelClosed)
            .await;
    }
}

impl Drop for McpClient {
    fn drop(&mut self) {
        self.channel.shutdown.cancel();
    }
}

async fn write_outbound(
    origin: String,
    mut stdin: BoxedWriter,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
    shutdown: CancellationToken,
) {
    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => break,
            line = outbound_rx.recv() => match line {
                Some(line) => line,
                None => break,
            },
        };
        let written = async {
            stdin.write_all(line.as_bytes()).await?;
            stdin.write_all(b"\n").await?;
            stdin.flush().await
        };
        if let Err(e) = written.await {
            tracing::warn!(origin = %origin, "failed to write to MCP server stdin: {e}");
            break;
        }
    }
    let _ = stdin.shutdown().await;
}

/// What ended the reader's first wait.
enum ReaderEvent {
    Shutdown,
    Ended(ReadLoopEnd),
    Exited(Option<i32>),
}

async fn read_inbound(
    channel: Arc<Channel>,
    stdout: BoxedReader,
    mut exited: oneshot::Receiver<Option<i32>>,
) {
    let dispatcher = Dispatcher::new(
        channel.origin.clone(),
        channel.pending.clone(),
        channel.outbound_tx.clone(),
    );
    let shutdown = channel.shutdown.clone();
    let reading = read_loop(stdout, &dispatcher);
    tokio::pin!(reading);

    let event = tokio::select! {
        biased;
        _ = shutdown.cancelled() => ReaderEvent::Shutdown,
        end = &mut reading => ReaderEvent::Ended(end),
        code = &mut exited => ReaderEvent::Exited(code.ok().flatten()),
    };

    let error = match event {
        ReaderEvent::Shutdown => return,
        ReaderEvent::Ended(ReadLoopEnd::Framing(e)) => e,
        ReaderEvent::Ended(end) => {
            if let ReadLoopEnd::Io(e) = end {
                tracing::warn!(origin = %channel.origin, "failed to read MCP server stdout: {e}");
            }
            tokio::select! {
                _ = shutdown.cancelled() => return,
                code = exited => ToolmuxError::ProcessExited(code.ok().flatten()),
            }
        }
        ReaderEvent::Exited(code) => {
            // Deliver responses the server wrote before it exited.
            if let Ok(ReadLoopEnd::Framing(e)) =
                tokio::time::timeout(EXIT_DRAIN_TIMEOUT, &mut reading).await
            {
                e
            } else {
                ToolmuxError::ProcessExited(code)
            }
        }
    };

    channel.fail(error).await;
}

async fn forward_stderr(
    origin: String,
    stderr: BoxedReader,
    sink: Option<mpsc::UnboundedSender<String>>,
    shutdown: CancellationToken,
) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => break,
            line = lines.next_line() => line,
        };
        match line {
            Ok(Some(line)) => {
                tracing::debug!(target: "toolmux::mcp::stderr", origin = %origin, "{line}");
                if let Some(sink) = &sink {
                    let _ = sink.send(line);
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(origin = %origin, "stopped reading MCP server stderr: {e}");
                break;
            }
        }
    }
}

async fn handshake(
    channel: Arc<Channel>,
    client_info: Implementation,
    startup_delay: Duration,
    init_timeout: Duration,
) {
    tokio::select! {
        _ = channel.shutdown.cancelled() => return,
        _ = tokio::time::sleep(startup_delay) => {}
    }
    if !channel.advance(SessionState::Handshaking) {
        return;
    }

    match channel.initialize(client_info, init_timeout).await {
        Ok(identity) => {
            if channel.advance(SessionState::Ready) {
                tracing::info!(
                    origin = %channel.origin,
                    "MCP session ready with {} {}",
                    identity.name,
                    identity.version
                );
            }
        }
        Err(e) => {
            tracing::warn!(origin = %channel.origin, "MCP handshake failed: {e}");
            channel.advance(SessionState::Failed(e));
        }
    }
}
