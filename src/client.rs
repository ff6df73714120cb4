//! Transport-agnostic async JSON-RPC 2.0 client
//!
//! [`JsonRpcClient`] correlates outbound requests with inbound responses over
//! any [`Transport`]. It does not read from the transport itself; the
//! session's read loop parses each inbound message and hands responses to
//! [`JsonRpcClient::resolve`].
//!
//! # Design
//!
//! - Request ids come from one `AtomicU64` that starts at 1 and is never
//!   reset, so ids stay unique for the lifetime of the client, across
//!   reconnects.
//! - In-flight calls live in a `pending` map keyed by id. Removing an entry
//!   is the single claim on its outcome: whichever of response, timeout or
//!   connection loss removes it first settles the call, and the others find
//!   nothing to do. Every call therefore completes exactly once.
//! - Each call is bounded by the per-request timeout. A response that
//!   arrives after its call timed out finds no entry and is dropped with a
//!   debug log.
//! - A caller that stops polling a call (an outer timeout, a losing
//!   `select!` branch) removes its entry through `PendingGuard`.
//! - Timing uses `tokio::time::Instant`, so paused-clock tests see exact
//!   elapsed times.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{oneshot, Mutex};
use tokio::time::Instant;

use crate::error::{McpError, Result};
use crate::transport::Transport;
use crate::types::{error_codes, Envelope};

/// Default timeout applied to every request when the config does not set one.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// One outstanding call.
struct PendingCall {
    method: String,
    started: Instant,
    tx: oneshot::Sender<Result<Value>>,
}

type PendingMap = HashMap<u64, PendingCall>;

/// Removes a call's pending entry if the call future is dropped before it
/// settles.
struct PendingGuard {
    pending: Arc<Mutex<PendingMap>>,
    id: u64,
    armed: bool,
}

impl PendingGuard {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let id = self.id;
        if let Ok(mut pending) = self.pending.try_lock() {
            if pending.remove(&id).is_some() {
                tracing::debug!(id, "call dropped by caller; entry removed");
            }
            return;
        }
        // Contended: finish the removal on the runtime.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let pending = Arc::clone(&self.pending);
            handle.spawn(async move {
                pending.lock().await.remove(&id);
            });
        }
    }
}

/// Request/response correlator bound to one transport.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use std::time::Duration;
/// use mcplink::client::JsonRpcClient;
/// use mcplink::transport::fake::FakeTransport;
///
/// let (transport, _handle) = FakeTransport::new();
/// let client = JsonRpcClient::new(Arc::new(transport), Duration::from_secs(5));
/// assert_eq!(client.next_request_id(), 1);
/// ```
pub struct JsonRpcClient {
    transport: Arc<dyn Transport>,
    next_id: AtomicU64,
    pending: Arc<Mutex<PendingMap>>,
    request_timeout: Duration,
}

impl std::fmt::Debug for JsonRpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonRpcClient")
            .field("transport", &self.transport.kind())
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

impl JsonRpcClient {
    /// Create a client that writes through `transport` and bounds every call
    /// by `request_timeout`.
    pub fn new(transport: Arc<dyn Transport>, request_timeout: Duration) -> Self {
        Self {
            transport,
            next_id: AtomicU64::new(1),
            pending: Arc::new(Mutex::new(HashMap::new())),
            request_timeout,
        }
    }

    /// The transport this client writes to.
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// The per-request timeout.
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// The id the next call will use.
    pub fn next_request_id(&self) -> u64 {
        self.next_id.load(Ordering::SeqCst)
    }

    /// Number of calls still waiting for an outcome.
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Send a request and wait for its outcome.
    ///
    /// # Arguments
    ///
    /// * `method` - JSON-RPC method name
    /// * `params` - Optional `params` value
    ///
    /// # Errors
    ///
    /// - [`McpError::CallTimeout`] when no response arrives within the
    ///   request timeout; the error names the method and the elapsed time
    /// - [`McpError::Remote`] when the server answers with an error object
    /// - [`McpError::ConnectionClosed`] when the connection is lost or the
    ///   session disconnects while the call is outstanding
    /// - [`McpError::Transport`] when the message cannot be written
    pub async fn call(&self, method: &str, params: Option<Value>) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let started = Instant::now();

        // Register before sending so a fast response always finds its entry.
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(
            id,
            PendingCall {
                method: method.to_string(),
                started,
                tx,
            },
        );
        let guard = PendingGuard {
            pending: Arc::clone(&self.pending),
            id,
            armed: true,
        };

        let outcome = self.send_and_wait(id, method, params, rx).await;
        guard.disarm();
        outcome
    }

    /// Write request `id` and wait for whichever outcome claims its entry.
    async fn send_and_wait(
        &self,
        id: u64,
        method: &str,
        params: Option<Value>,
        mut rx: oneshot::Receiver<Result<Value>>,
    ) -> Result<Value> {
        let message = match serde_json::to_string(&Envelope::request(id, method, params)) {
            Ok(m) => m,
            Err(e) => {
                self.pending.lock().await.remove(&id);
                return Err(e.into());
            }
        };

        tracing::debug!(id, method, "sending request");

        let exchange = async {
            self.transport.send(message).await?;
            (&mut rx)
                .await
                .unwrap_or_else(|_| Err(McpError::ConnectionClosed("call abandoned".into())))
        };

        match tokio::time::timeout(self.request_timeout, exchange).await {
            Ok(Err(e)) if !matches!(e, McpError::Remote { .. } | McpError::ConnectionClosed(_)) => {
                // The write failed; nobody else can have claimed the entry yet
                // unless the connection was torn down concurrently.
                if self.pending.lock().await.remove(&id).is_none() {
                    if let Ok(outcome) = rx.try_recv() {
                        return outcome;
                    }
                }
                Err(e)
            }
            Ok(outcome) => outcome,
            Err(_) => {
                let claimed = self.pending.lock().await.remove(&id);
                match claimed {
                    Some(call) => {
                        let elapsed = call.started.elapsed();
                        tracing::warn!(
                            id,
                            method,
                            elapsed_ms = elapsed.as_millis() as u64,
                            "request timed out"
                        );
                        Err(McpError::CallTimeout {
                            method: call.method,
                            elapsed,
                        })
                    }
                    // Settled between the deadline and our claim.
                    None => rx.try_recv().unwrap_or_else(|_| {
                        Err(McpError::ConnectionClosed("call abandoned".into()))
                    }),
                }
            }
        }
    }

    /// Typed wrapper over [`JsonRpcClient::call`].
    ///
    /// # Errors
    ///
    /// Everything [`JsonRpcClient::call`] returns, plus
    /// [`McpError::Serialization`] when the params cannot be encoded or the
    /// result does not match `R`.
    pub async fn request<P, R>(&self, method: &str, params: Option<P>) -> Result<R>
    where
        P: serde::Serialize + Send,
        R: serde::de::DeserializeOwned,
    {
        let params = params.map(serde_json::to_value).transpose()?;
        let value = self.call(method, params).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Send a notification. Delivery is best effort: failures are logged
    /// and never surface to the caller.
    pub async fn notify(&self, method: &str, params: Option<Value>) {
        let message = match serde_json::to_string(&Envelope::notification(method, params)) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(method, "failed to encode notification: {}", e);
                return;
            }
        };
        if let Err(e) = self.transport.send(message).await {
            tracing::warn!(method, "failed to send notification: {}", e);
        }
    }

    /// Settle the pending call matching a response envelope.
    ///
    /// Responses with an unknown id (including responses to calls that
    /// already timed out) are logged at debug and ignored.
    pub async fn resolve(&self, envelope: Envelope) {
        let Some(id) = envelope.numeric_id() else {
            tracing::warn!("response has non-integer id: {:?}", envelope.id);
            return;
        };

        let Some(call) = self.pending.lock().await.remove(&id) else {
            tracing::debug!(id, "received response for unknown id; ignoring");
            return;
        };

        let outcome = match envelope.error {
            Some(e) => Err(McpError::from(e)),
            None => Ok(envelope.result.unwrap_or(Value::Null)),
        };

        tracing::debug!(
            id,
            method = %call.method,
            elapsed_ms = call.started.elapsed().as_millis() as u64,
            ok = outcome.is_ok(),
            "request settled"
        );

        // The caller may have stopped waiting; nothing to do then.
        let _ = call.tx.send(outcome);
    }

    /// Fail every outstanding call with [`McpError::ConnectionClosed`].
    ///
    /// Returns the number of calls rejected.
    pub async fn reject_all(&self, reason: &str) -> usize {
        let drained: Vec<(u64, PendingCall)> = self.pending.lock().await.drain().collect();
        let count = drained.len();
        for (id, call) in drained {
            tracing::debug!(id, method = %call.method, "rejecting pending request: {}", reason);
            let _ = call
                .tx
                .send(Err(McpError::ConnectionClosed(reason.to_string())));
        }
        count
    }

    /// Answer a server-initiated request with `-32601 Method not found`.
    pub async fn reject_server_request(&self, id: Value, method: &str) {
        tracing::debug!(method, "rejecting unsupported server request");
        let reply = Envelope::error_response(
            id,
            error_codes::METHOD_NOT_FOUND,
            format!("Method not found: {}", method),
        );
        match serde_json::to_string(&reply) {
            Ok(message) => {
                if let Err(e) = self.transport.send(message).await {
                    tracing::debug!(method, "failed to reject server request: {}", e);
                }
            }
            Err(e) => tracing::debug!("failed to encode error response: {}", e),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
