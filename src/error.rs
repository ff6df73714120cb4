//! Error types for mcplink
//!
//! Every fallible operation in the library returns [`Result`], whose error
//! side is [`McpError`]. The variants follow the client's error taxonomy:
//! connection setup failures, handshake failures, per-call timeouts, remote
//! JSON-RPC errors, transport failures and capability violations. The CLI
//! binary wraps these in `anyhow` at the top level.

use std::time::Duration;

use thiserror::Error;

/// Main error type for mcplink operations
#[derive(Error, Debug)]
pub enum McpError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// The transport plus handshake did not complete within the connect window
    #[error("Connect timeout: server '{server}' did not complete setup within {}ms", .timeout.as_millis())]
    ConnectTimeout {
        /// Server name from the connection config
        server: String,
        /// Configured connect timeout
        timeout: Duration,
    },

    /// The server rejected `initialize` or answered with a malformed result
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// A single in-flight call exceeded the per-request timeout
    #[error("Call timeout: '{method}' received no response after {}ms", .elapsed.as_millis())]
    CallTimeout {
        /// Method of the timed out call
        method: String,
        /// Time spent waiting before the call was abandoned
        elapsed: Duration,
    },

    /// The server answered a call with a JSON-RPC error object
    #[error("Remote error {code}: {message}")]
    Remote {
        /// JSON-RPC error code
        code: i64,
        /// Human-readable message from the server
        message: String,
    },

    /// The underlying channel failed
    #[error("Transport error: {0}")]
    Transport(String),

    /// The connection closed while a call was outstanding
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    /// A method was invoked that the server did not advertise support for
    #[error("Capability violation: '{method}' requires server capability '{capability}'")]
    CapabilityViolation {
        /// Capability flag that gates the method
        capability: String,
        /// Method that was refused
        method: String,
    },

    /// An operation needed an established session
    #[error("Not connected: server '{0}' has no active session")]
    NotConnected(String),

    /// No server with the given name is registered
    #[error("Unknown server: {0}")]
    UnknownServer(String),

    /// A namespaced tool name could not be resolved
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// WebSocket protocol errors
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

impl McpError {
    /// Returns `true` for failures of the underlying channel rather than of
    /// the protocol exchange running over it.
    ///
    /// Reconnection treats these as another transport loss and keeps
    /// retrying; every other failure ends the reconnect cycle.
    pub fn is_transport_failure(&self) -> bool {
        matches!(
            self,
            McpError::Transport(_)
                | McpError::ConnectionClosed(_)
                | McpError::ConnectTimeout { .. }
                | McpError::Io(_)
                | McpError::Http(_)
                | McpError::WebSocket(_)
        )
    }
}

/// Result type alias for mcplink operations
pub type Result<T> = std::result::Result<T, McpError>;
