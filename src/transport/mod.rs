//! Transport abstraction and implementations
//!
//! This module defines the [`Transport`] trait that every wire transport
//! implements. Concrete implementations live in submodules:
//!
//! - [`stdio::StdioTransport`] -- spawns a child process and exchanges
//!   newline-delimited JSON over its stdin/stdout.
//! - [`sse::SseTransport`] -- HTTP POST per outbound message plus a
//!   long-lived server-sent-events stream for inbound notifications.
//! - [`websocket::WebSocketTransport`] -- full-duplex WebSocket connection.
//! - [`http::HttpTransport`] -- stateless request/response over HTTP POST.
//! - [`fake::FakeTransport`] -- in-process fake used by tests.
//!
//! # Design
//!
//! [`Transport::connect`] returns a fresh [`Inbound`] receiver for every
//! connection. That receiver is the single inbound delivery path: each
//! complete message arrives as one [`TransportEvent::Message`]. Framing,
//! process management and HTTP session headers stay inside each
//! implementation. Reconnection is driven from above by the session, which
//! calls `connect` again on the same transport value.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::config::{ServerConnectionConfig, TransportConfig};
use crate::error::Result;

pub mod fake;
pub mod http;
pub mod sse;
pub mod stdio;
pub mod websocket;

/// One item on a connection's inbound channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One complete serialized JSON-RPC message.
    Message(String),
    /// Diagnostic output from the server, e.g. a child process stderr line.
    /// Never treated as an error condition.
    Diagnostic(String),
    /// The channel was lost without a deliberate `close`.
    Closed(String),
}

/// Receiver half of a connection's inbound channel.
pub type Inbound = mpsc::UnboundedReceiver<TransportEvent>;

/// Which wire transport a server is reached through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Child process over stdin/stdout.
    Stdio,
    /// HTTP POST plus server-sent-events stream.
    Sse,
    /// WebSocket.
    #[serde(alias = "ws")]
    WebSocket,
    /// Plain HTTP request/response.
    Http,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TransportKind::Stdio => "stdio",
            TransportKind::Sse => "sse",
            TransportKind::WebSocket => "websocket",
            TransportKind::Http => "http",
        };
        f.write_str(name)
    }
}

/// Abstraction over the four wire transports.
///
/// The session depends only on this trait; it is used polymorphically
/// through `Arc<dyn Transport>`.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Establish the underlying channel and return its inbound receiver.
    ///
    /// Calling `connect` again after a loss or a `close` opens a new
    /// channel; any receiver from an earlier connection stops receiving.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::McpError::Transport`] when the channel cannot
    /// be opened (spawn failure, refused socket, invalid endpoint).
    async fn connect(&self) -> Result<Inbound>;

    /// Write one complete serialized JSON-RPC message.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::McpError::Transport`] when the channel is not
    /// open or the write fails.
    async fn send(&self, message: String) -> Result<()>;

    /// Hook run once the handshake succeeded.
    ///
    /// The SSE transport opens its notification stream here. Other
    /// transports have nothing to do.
    async fn after_handshake(&self) -> Result<()> {
        Ok(())
    }

    /// Tear down the channel. Calling it more than once is harmless.
    async fn close(&self) -> Result<()>;

    /// The transport variant.
    fn kind(&self) -> TransportKind;

    /// Whether the server can push notifications over this transport.
    fn supports_notifications(&self) -> bool {
        true
    }
}

/// Build the transport described by `config`.
///
/// No I/O happens here; the channel is opened by [`Transport::connect`].
pub fn build(config: &ServerConnectionConfig) -> Result<Arc<dyn Transport>> {
    let transport: Arc<dyn Transport> = match &config.transport {
        TransportConfig::Stdio {
            command,
            args,
            env,
            working_dir,
        } => Arc::new(stdio::StdioTransport::new(
            config.name.clone(),
            command.into(),
            args.clone(),
            env.clone(),
            working_dir.clone(),
        )),
        TransportConfig::Sse {
            url,
            stream_url,
            headers,
        } => Arc::new(sse::SseTransport::new(
            url.clone(),
            stream_url.clone(),
            headers.clone(),
            config.request_timeout,
        )?),
        TransportConfig::WebSocket { url, headers } => Arc::new(
            websocket::WebSocketTransport::new(url.clone(), headers.clone()),
        ),
        TransportConfig::Http { url, headers } => Arc::new(http::HttpTransport::new(
            url.clone(),
            headers.clone(),
            config.request_timeout,
        )?),
    };
    Ok(transport)
}
