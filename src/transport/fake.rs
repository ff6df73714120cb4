//! In-process fake transport for unit and integration tests
//!
//! [`FakeTransport::new`] returns a `(FakeTransport, FakeTransportHandle)`
//! pair. Wire the transport into the code under test and drive it from the
//! handle:
//!
//! - Read what the client sent: `handle.outbound_rx.recv().await`
//! - Push a server message onto the current connection: [`FakeControl::inject`]
//! - Simulate a channel loss: [`FakeControl::drop_connection`]
//! - Make the next connects fail: [`FakeControl::fail_next_connects`]
//!
//! [`FakeControl`] is cloneable, so a scripted server task can own the
//! outbound receiver while the test keeps a control of its own.
//!
//! ```text
//! client send() -----> outbound_tx ------> outbound_rx (handle reads)
//! handle inject() ---> current inbound --> Inbound    (client read loop)
//! ```
//!
//! # Example
//!
//! ```
//! use mcplink::transport::fake::FakeTransport;
//! use mcplink::transport::{Transport, TransportEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let (transport, mut handle) = FakeTransport::new();
//! let mut inbound = transport.connect().await.unwrap();
//!
//! transport.send(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#.to_string()).await.unwrap();
//! assert!(handle.outbound_rx.recv().await.unwrap().contains("ping"));
//!
//! handle.control.inject(serde_json::json!({"jsonrpc": "2.0", "id": 1, "result": {}}));
//! assert!(matches!(inbound.recv().await, Some(TransportEvent::Message(_))));
//! # }
//! ```

use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::{McpError, Result};
use crate::transport::{Inbound, Transport, TransportEvent, TransportKind};

#[derive(Debug, Default)]
struct FakeState {
    /// Sender of the live connection, `None` while disconnected.
    inbound: Option<mpsc::UnboundedSender<TransportEvent>>,
    connects: usize,
    closes: usize,
    fail_next_connects: usize,
    sent: usize,
}

/// In-memory [`Transport`] with a test-side handle.
#[derive(Debug)]
pub struct FakeTransport {
    outbound_tx: mpsc::UnboundedSender<String>,
    state: Arc<Mutex<FakeState>>,
    kind: TransportKind,
    notifications: bool,
}

/// Test side of a [`FakeTransport`].
#[derive(Debug)]
pub struct FakeTransportHandle {
    /// Every message passed to [`Transport::send`], in order.
    pub outbound_rx: mpsc::UnboundedReceiver<String>,
    /// Injection and inspection of the transport.
    pub control: FakeControl,
}

/// Cloneable control over a [`FakeTransport`].
#[derive(Debug, Clone)]
pub struct FakeControl {
    state: Arc<Mutex<FakeState>>,
}

impl FakeTransport {
    /// Create a new `(FakeTransport, FakeTransportHandle)` pair.
    ///
    /// The fake reports itself as a stdio transport that supports server
    /// notifications.
    pub fn new() -> (Self, FakeTransportHandle) {
        Self::with_kind(TransportKind::Stdio, true)
    }

    /// Like [`FakeTransport::new`] with an explicit kind and notification
    /// support, e.g. to imitate the request/response HTTP transport.
    pub fn with_kind(kind: TransportKind, notifications: bool) -> (Self, FakeTransportHandle) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let state = Arc::new(Mutex::new(FakeState::default()));
        let transport = Self {
            outbound_tx,
            state: Arc::clone(&state),
            kind,
            notifications,
        };
        let control = FakeControl { state };
        (transport, FakeTransportHandle { outbound_rx, control })
    }
}

impl FakeControl {
    /// Serialize `message` and deliver it on the live connection.
    ///
    /// Returns `false` when no connection is open.
    pub fn inject(&self, message: Value) -> bool {
        self.inject_event(TransportEvent::Message(message.to_string()))
    }

    /// Deliver a raw line, e.g. invalid JSON.
    pub fn inject_raw(&self, line: &str) -> bool {
        self.inject_event(TransportEvent::Message(line.to_string()))
    }

    /// Deliver a diagnostic line as a stdio server's stderr would.
    pub fn inject_diagnostic(&self, line: &str) -> bool {
        self.inject_event(TransportEvent::Diagnostic(line.to_string()))
    }

    fn inject_event(&self, event: TransportEvent) -> bool {
        let state = lock(&self.state);
        match &state.inbound {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    /// Report an unexpected loss of the live connection.
    ///
    /// Returns `false` when no connection is open.
    pub fn drop_connection(&self, reason: &str) -> bool {
        let mut state = lock(&self.state);
        match state.inbound.take() {
            Some(tx) => tx.send(TransportEvent::Closed(reason.to_string())).is_ok(),
            None => false,
        }
    }

    /// Make the next `n` calls to `connect` fail with a transport error.
    pub fn fail_next_connects(&self, n: usize) {
        lock(&self.state).fail_next_connects = n;
    }

    /// Number of `connect` calls, failed ones included.
    pub fn connect_count(&self) -> usize {
        lock(&self.state).connects
    }

    /// Number of `close` calls.
    pub fn close_count(&self) -> usize {
        lock(&self.state).closes
    }

    /// Number of messages passed to `send`.
    pub fn sent_count(&self) -> usize {
        lock(&self.state).sent
    }

    /// Whether a connection is currently open.
    pub fn is_connected(&self) -> bool {
        lock(&self.state).inbound.is_some()
    }
}

fn lock(state: &Mutex<FakeState>) -> std::sync::MutexGuard<'_, FakeState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait::async_trait]
impl Transport for FakeTransport {
    async fn connect(&self) -> Result<Inbound> {
        let mut state = lock(&self.state);
        state.connects += 1;
        if state.fail_next_connects > 0 {
            state.fail_next_connects -= 1;
            return Err(McpError::Transport("fake connect refused".into()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        state.inbound = Some(tx);
        Ok(rx)
    }

    async fn send(&self, message: String) -> Result<()> {
        {
            let mut state = lock(&self.state);
            if state.inbound.is_none() {
                return Err(McpError::Transport("fake transport is not connected".into()));
            }
            state.sent += 1;
        }
        self.outbound_tx
            .send(message)
            .map_err(|_| McpError::Transport("fake transport handle dropped".into()))
    }

    async fn close(&self) -> Result<()> {
        let mut state = lock(&self.state);
        state.closes += 1;
        state.inbound = None;
        Ok(())
    }

    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn supports_notifications(&self) -> bool {
        self.notifications
    }
}
