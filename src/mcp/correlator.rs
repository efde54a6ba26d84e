//! Request correlation table
//!
//! [`PendingCalls`] maps an outgoing request id to the one-shot sender that
//! completes the caller's future. Every operation takes the table lock once
//! and removes the entry before delivering, so a pending call observes
//! exactly one outcome no matter how a response, a timeout, and a
//! channel-level failure race each other.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{oneshot, Mutex};

use crate::error::ToolmuxError;

/// Outcome delivered to a pending caller.
pub type CallOutcome = std::result::Result<serde_json::Value, ToolmuxError>;

/// Receiving half held by the caller awaiting a response.
pub type PendingReceiver = oneshot::Receiver<CallOutcome>;

/// Normalize a JSON-RPC `id` value into the table key.
///
/// Numbers and strings share one key space so a server that echoes `1` as
/// `"1"` still correlates.
///
/// # Examples
///
/// ```
/// use toolmux::mcp::correlator::request_key;
///
/// assert_eq!(request_key(&serde_json::json!(7)).as_deref(), Some("7"));
/// assert_eq!(request_key(&serde_json::json!("7")).as_deref(), Some("7"));
/// assert_eq!(request_key(&serde_json::Value::Null), None);
/// ```
pub fn request_key(id: &serde_json::Value) -> Option<String> {
    match id {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// In-flight requests for one channel, keyed by request id.
///
/// Cloning is cheap and shares the same table.
#[derive(Debug, Clone, Default)]
pub struct PendingCalls {
    table: Arc<Mutex<HashMap<String, oneshot::Sender<CallOutcome>>>>,
}

impl PendingCalls {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending call and return the receiver its caller awaits.
    ///
    /// # Errors
    ///
    /// Returns [`ToolmuxError::DuplicateRequestId`] if `id` is still pending.
    /// Id generation is per-channel monotonic, so this indicates a bug.
    pub async fn register(&self, id: impl Into<String>) -> Result<PendingReceiver, ToolmuxError> {
        let id = id.into();
        let mut table = self.table.lock().await;
        if table.contains_key(&id) {
            tracing::error!("request id {id} registered while still pending");
            return Err(ToolmuxError::DuplicateRequestId(id));
        }
        let (tx, rx) = oneshot::channel();
        table.insert(id, tx);
        Ok(rx)
    }

    /// Deliver a successful result. Unknown ids are ignored.
    ///
    /// Returns `true` if a pending call was completed.
    pub async fn resolve(&self, id: &str, result: serde_json::Value) -> bool {
        self.deliver(id, Ok(result)).await
    }

    /// Deliver a failure. Unknown ids are ignored.
    ///
    /// Returns `true` if a pending call was completed.
    pub async fn reject(&self, id: &str, error: ToolmuxError) -> bool {
        self.deliver(id, Err(error)).await
    }

    /// Remove an entry without delivering anything.
    ///
    /// Used by a caller whose own timeout fired; it reports the timeout
    /// itself. Returns `true` if the entry was still pending.
    pub async fn cancel(&self, id: &str) -> bool {
        self.table.lock().await.remove(id).is_some()
    }

    /// Deliver `error` to every pending call and clear the table.
    ///
    /// Returns the number of calls rejected.
    pub async fn reject_all(&self, error: ToolmuxError) -> usize {
        let drained: Vec<_> = {
            let mut table = self.table.lock().await;
            table.drain().collect()
        };
        let count = drained.len();
        for (id, tx) in drained {
            if tx.send(Err(error.clone())).is_err() {
                tracing::debug!("pending call {id} was abandoned before rejection");
            }
        }
        count
    }

    /// Number of calls currently pending.
    pub async fn len(&self) -> usize {
        self.table.lock().await.len()
    }

    /// Whether no calls are pending.
    pub async fn is_empty(&self) -> bool {
        self.table.lock().await.is_empty()
    }

    /// Whether `id` is currently pending.
    pub async fn contains(&self, id: &str) -> bool {
        self.table.lock().await.contains_key(id)
    }

    async fn deliver(&self, id: &str, outcome: CallOutcome) -> bool {
        let Some(tx) = self.table.lock().await.remove(id) else {
            tracing::debug!("no pending call for id {id}; ignoring");
            return false;
        };
        // The receiver may already be gone if the caller stopped waiting.
        let _ = tx.send(outcome);
        true
    }

    /// Guard that removes `id` from the table if dropped while armed.
    pub fn guard(&self, id: impl Into<String>) -> PendingGuard {
        PendingGuard {
            pending: self.clone(),
            id: Some(id.into()),
        }
    }
}

/// Frees a pending slot when its caller stops waiting.
///
/// A caller whose future is dropped mid-call never reaches its own timeout
/// path, so the guard removes the entry instead. Call
/// [`PendingGuard::disarm`] once the call has settled.
#[derive(Debug)]
pub struct PendingGuard {
    pending: PendingCalls,
    id: Option<String>,
}

impl PendingGuard {
    /// Keep the entry; the call has already settled.
    pub fn disarm(mut self) {
        self.id = None;
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        let Some(id) = self.id.take() else {
            return;
        };
        if let Ok(mut table) = self.pending.table.try_lock() {
            if table.remove(&id).is_some() {
                tracing::debug!("pending call {id} abandoned by its caller");
            }
            return;
        }
        // The table is busy; finish the removal on the runtime.
        let pending = self.pending.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if pending.cancel(&id).await {
                        tracing::debug!("pending call {id} abandoned by its caller");
                    }
                });
            }
            Err(_) => tracing::warn!("pending call {id} abandoned outside a runtime"),
        }
    }
}
