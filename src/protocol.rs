//! Handshake and capability gating
//!
//! [`initialize`] runs the `initialize` / `notifications/initialized`
//! exchange over a [`JsonRpcClient`] and validates the negotiated protocol
//! version. [`ServerCapabilityFlag`] names the capabilities that gate
//! discovery and subscription calls; [`ServerCapabilities::require`] turns a
//! missing capability into [`McpError::CapabilityViolation`] before any I/O
//! happens.

use crate::client::JsonRpcClient;
use crate::error::{McpError, Result};
use crate::types::{
    ClientCapabilities, Implementation, InitializeParams, InitializeResult, ServerCapabilities,
    LATEST_PROTOCOL_VERSION, METHOD_INITIALIZE, METHOD_INITIALIZED, SUPPORTED_PROTOCOL_VERSIONS,
};

// ---------------------------------------------------------------------------
// Capability flag enum
// ---------------------------------------------------------------------------

/// Identifies a capability a server may advertise in its `initialize` result.
///
/// # Examples
///
/// ```
/// use mcplink::protocol::ServerCapabilityFlag;
/// use mcplink::types::{ServerCapabilities, ToolsCapability};
///
/// let caps = ServerCapabilities {
///     tools: Some(ToolsCapability::default()),
///     ..Default::default()
/// };
/// assert!(caps.capable(ServerCapabilityFlag::Tools));
/// assert!(!caps.capable(ServerCapabilityFlag::Prompts));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerCapabilityFlag {
    /// `capabilities.tools`
    Tools,
    /// `capabilities.resources`
    Resources,
    /// `capabilities.resources.subscribe == true`
    ResourceSubscribe,
    /// `capabilities.prompts`
    Prompts,
    /// `capabilities.logging`
    Logging,
}

impl ServerCapabilityFlag {
    /// Name used in capability violation errors.
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerCapabilityFlag::Tools => "tools",
            ServerCapabilityFlag::Resources => "resources",
            ServerCapabilityFlag::ResourceSubscribe => "resources.subscribe",
            ServerCapabilityFlag::Prompts => "prompts",
            ServerCapabilityFlag::Logging => "logging",
        }
    }
}

impl std::fmt::Display for ServerCapabilityFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ServerCapabilities {
    /// Whether the server advertised `flag`.
    ///
    /// A capability counts as advertised when its key is present, even as
    /// an empty object. `ResourceSubscribe` additionally needs
    /// `resources.subscribe` to be `true`.
    pub fn capable(&self, flag: ServerCapabilityFlag) -> bool {
        match flag {
            ServerCapabilityFlag::Tools => self.tools.is_some(),
            ServerCapabilityFlag::Resources => self.resources.is_some(),
            ServerCapabilityFlag::ResourceSubscribe => self.supports_subscribe(),
            ServerCapabilityFlag::Prompts => self.prompts.is_some(),
            ServerCapabilityFlag::Logging => self.logging.is_some(),
        }
    }

    /// `resources.subscribe == true`.
    pub fn supports_subscribe(&self) -> bool {
        self.resources
            .as_ref()
            .and_then(|r| r.subscribe)
            .unwrap_or(false)
    }

    /// Fail with [`McpError::CapabilityViolation`] unless `flag` is advertised.
    pub fn require(&self, flag: ServerCapabilityFlag, method: &str) -> Result<()> {
        if self.capable(flag) {
            Ok(())
        } else {
            Err(McpError::CapabilityViolation {
                capability: flag.as_str().to_string(),
                method: method.to_string(),
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Handshake
// ---------------------------------------------------------------------------

/// Perform the `initialize` handshake.
///
/// Sends `initialize` with the latest protocol version, default client
/// capabilities and `client_info`. On success, sends the
/// `notifications/initialized` notification and returns the server's result.
///
/// # Errors
///
/// - [`McpError::Handshake`] if the result is malformed or names a protocol
///   version outside [`SUPPORTED_PROTOCOL_VERSIONS`]
/// - Any error of [`JsonRpcClient::call`], e.g. [`McpError::Remote`] when
///   the server rejects `initialize`
pub async fn initialize(rpc: &JsonRpcClient, client_info: &Implementation) -> Result<InitializeResult> {
    let params = InitializeParams {
        protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
        capabilities: ClientCapabilities::default(),
        client_info: client_info.clone(),
    };

    let raw = rpc
        .call(METHOD_INITIALIZE, Some(serde_json::to_value(&params)?))
        .await?;

    let result: InitializeResult = serde_json::from_value(raw)
        .map_err(|e| McpError::Handshake(format!("malformed initialize result: {}", e)))?;

    if !SUPPORTED_PROTOCOL_VERSIONS.contains(&result.protocol_version.as_str()) {
        return Err(McpError::Handshake(format!(
            "server selected unsupported protocol version '{}' (supported: {})",
            result.protocol_version,
            SUPPORTED_PROTOCOL_VERSIONS.join(", ")
        )));
    }

    tracing::debug!(
        server = %result.server_info.name,
        version = %result.server_info.version,
        protocol = %result.protocol_version,
        "handshake complete"
    );

    rpc.notify(METHOD_INITIALIZED, None).await;

    Ok(result)
}
