//! Session lifecycle for one server
//!
//! [`McpClient`] owns the transport, the request dispatcher, the capability
//! cache and the subscription registry of one server connection, and drives
//! the connection state machine:
//!
//! ```text
//! disconnected --connect()--> connecting --handshake ok--> connected
//! connecting --handshake failure / timeout--> error
//! connected --loss, no retries left--> disconnected
//! connected --loss, retries left--> reconnecting --backoff--> connecting
//! any --disconnect()--> disconnected
//! ```
//!
//! # Design
//!
//! - A lifecycle mutex serializes `connect`, `disconnect` and reconnect
//!   attempts. Two concurrent `connect` calls perform one handshake.
//! - Every connection gets a new epoch number. A read loop reports a loss
//!   together with its epoch, and reports from an earlier connection are
//!   ignored.
//! - Background tasks (read loop, reconnect timer, list refreshes) hold a
//!   `Weak` reference, so dropping the last [`McpClient`] handle tears the
//!   connection down.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{broadcast, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cache::CapabilityCache;
use crate::client::JsonRpcClient;
use crate::config::ServerConnectionConfig;
use crate::error::{McpError, Result};
use crate::events::{CacheRefresh, ClientEvent, NotificationRouter, DEFAULT_EVENT_CAPACITY};
use crate::protocol::{self, ServerCapabilityFlag};
use crate::subscriptions::SubscriptionRegistry;
use crate::transport::{self, Inbound, Transport, TransportEvent, TransportKind};
use crate::types::{
    CallToolParams, CallToolResult, Envelope, EnvelopeKind, GetPromptParams, GetPromptResult,
    Implementation, InitializeResult, LoggingLevel, Prompt, ReadResourceResult, Resource,
    ResourceTemplate, ServerCapabilities, SetLevelParams, Tool, METHOD_LOGGING_SET_LEVEL,
    METHOD_PING, METHOD_PROMPTS_GET, METHOD_RESOURCES_READ, METHOD_TOOLS_CALL,
};

// ---------------------------------------------------------------------------
// Connection state and reconnect policy
// ---------------------------------------------------------------------------

/// Connection state of one client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Setup failed; stays here until the caller connects again.
    Error,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Error => "error",
        };
        f.write_str(s)
    }
}

/// Exponential backoff for reconnection.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use mcplink::session::ReconnectPolicy;
///
/// let policy = ReconnectPolicy {
///     base: Duration::from_millis(100),
///     max: Duration::from_millis(500),
///     max_attempts: 5,
/// };
/// assert_eq!(policy.delay_for(0), Duration::from_millis(100));
/// assert_eq!(policy.delay_for(2), Duration::from_millis(400));
/// assert_eq!(policy.delay_for(3), Duration::from_millis(500));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base: Duration,
    pub max: Duration,
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    pub fn from_config(config: &ServerConnectionConfig) -> Self {
        Self {
            base: config.reconnect_base_delay,
            max: config.reconnect_max_delay,
            max_attempts: config.max_reconnect_attempts,
        }
    }

    /// `min(base * 2^attempt, max)` without overflow.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }
}

/// Snapshot of one client for status displays.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerStatus {
    pub name: String,
    pub transport: TransportKind,
    pub state: ConnectionState,
    pub server_info: Option<Implementation>,
    pub tool_count: usize,
    pub resource_count: usize,
    pub prompt_count: usize,
}

// ---------------------------------------------------------------------------
// Client internals
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Lifecycle {
    epoch: u64,
    attempts: u32,
    reconnect_task: Option<JoinHandle<()>>,
    read_loop: Option<CancellationToken>,
}

#[derive(Debug)]
struct ClientInner {
    config: ServerConnectionConfig,
    policy: ReconnectPolicy,
    transport: Arc<dyn Transport>,
    rpc: JsonRpcClient,
    router: NotificationRouter,
    cache: CapabilityCache,
    subscriptions: SubscriptionRegistry,
    state_tx: watch::Sender<ConnectionState>,
    session: RwLock<Option<InitializeResult>>,
    lifecycle: Mutex<Lifecycle>,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        let lifecycle = self.lifecycle.get_mut();
        if let Some(task) = lifecycle.reconnect_task.take() {
            task.abort();
        }
        if let Some(token) = lifecycle.read_loop.take() {
            token.cancel();
        }
    }
}

impl ClientInner {
    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn set_state(&self, to: ConnectionState) {
        let from = self.state_tx.send_replace(to);
        if from != to {
            tracing::info!(server = %self.config.name, %from, %to, "connection state changed");
            self.router.emit(ClientEvent::StateChanged { from, to });
        }
    }

    async fn capabilities(&self) -> ServerCapabilities {
        self.session
            .read()
            .await
            .as_ref()
            .map(|s| s.capabilities.clone())
            .unwrap_or_default()
    }

    /// Open the transport, start the read loop and run the handshake, all
    /// within the connect timeout. On success the client is `Connected`
    /// and discovery has run. On failure everything opened is closed again
    /// and the state is left for the caller to set.
    async fn establish(self: &Arc<Self>, lifecycle: &mut Lifecycle) -> Result<()> {
        self.set_state(ConnectionState::Connecting);

        if let Some(previous) = lifecycle.read_loop.take() {
            previous.cancel();
        }
        lifecycle.epoch += 1;
        let epoch = lifecycle.epoch;
        let token = CancellationToken::new();

        let setup = async {
            let inbound = self.transport.connect().await?;
            spawn_read_loop(Arc::downgrade(self), inbound, token.clone(), epoch);
            let result = protocol::initialize(&self.rpc, &self.config.client_info).await?;
            self.transport.after_handshake().await?;
            Ok::<_, McpError>(result)
        };

        let outcome = match tokio::time::timeout(self.config.connect_timeout, setup).await {
            Ok(outcome) => outcome,
            Err(_) => Err(McpError::ConnectTimeout {
                server: self.config.name.clone(),
                timeout: self.config.connect_timeout,
            }),
        };

        let result = match outcome {
            Ok(result) => result,
            Err(e) => {
                token.cancel();
                self.rpc.reject_all("connection setup failed").await;
                if let Err(close_err) = self.transport.close().await {
                    tracing::debug!(server = %self.config.name, "close after failed setup: {}", close_err);
                }
                return Err(e);
            }
        };

        tracing::info!(
            server = %self.config.name,
            transport = %self.transport.kind(),
            remote = %result.server_info.name,
            protocol = %result.protocol_version,
            "connected"
        );
        if !self.transport.supports_notifications() {
            tracing::debug!(
                server = %self.config.name,
                "transport cannot carry server notifications; list changes will not be seen"
            );
        }

        let caps = result.capabilities.clone();
        *self.session.write().await = Some(result);
        lifecycle.read_loop = Some(token);
        lifecycle.attempts = 0;
        self.set_state(ConnectionState::Connected);

        self.cache.discover(&self.rpc, &caps).await;
        Ok(())
    }

    /// Close the transport and forget everything learned on the connection.
    async fn teardown(&self) {
        if let Err(e) = self.transport.close().await {
            tracing::debug!(server = %self.config.name, "transport close failed: {}", e);
        }
        self.cache.clear().await;
        self.subscriptions.clear().await;
        *self.session.write().await = None;
    }

    /// Unexpected loss reported by the read loop of connection `epoch`.
    async fn handle_loss(self: &Arc<Self>, epoch: u64, reason: String) {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.epoch != epoch || self.state() != ConnectionState::Connected {
            tracing::debug!(server = %self.config.name, "ignoring stale loss report: {}", reason);
            return;
        }

        tracing::warn!(server = %self.config.name, "connection lost: {}", reason);
        if let Some(token) = lifecycle.read_loop.take() {
            token.cancel();
        }
        self.teardown().await;
        self.rpc.reject_all(&reason).await;
        self.schedule_reconnect(&mut lifecycle);
    }

    /// Schedule the next reconnect attempt, or give up.
    fn schedule_reconnect(self: &Arc<Self>, lifecycle: &mut Lifecycle) {
        if !self.config.auto_reconnect || lifecycle.attempts >= self.policy.max_attempts {
            if self.config.auto_reconnect {
                tracing::warn!(
                    server = %self.config.name,
                    attempts = lifecycle.attempts,
                    "giving up on reconnection"
                );
            }
            self.set_state(ConnectionState::Disconnected);
            return;
        }

        let delay = self.policy.delay_for(lifecycle.attempts);
        lifecycle.attempts += 1;
        let attempt = lifecycle.attempts;
        let epoch = lifecycle.epoch;

        self.set_state(ConnectionState::Reconnecting);
        self.router
            .emit(ClientEvent::Reconnecting { attempt, delay });
        tracing::info!(
            server = %self.config.name,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "scheduling reconnect"
        );

        let weak = Arc::downgrade(self);
        lifecycle.reconnect_task = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                inner.reconnect(epoch).await;
            }
        }));
    }

    /// One reconnect attempt, run when the backoff timer fires.
    async fn reconnect(self: &Arc<Self>, epoch: u64) {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.epoch != epoch || self.state() != ConnectionState::Reconnecting {
            return;
        }
        // This task is the one stored there; dropping the handle detaches it.
        lifecycle.reconnect_task = None;

        match self.establish(&mut lifecycle).await {
            Ok(()) => tracing::info!(server = %self.config.name, "reconnected"),
            Err(e) if e.is_transport_failure() => {
                tracing::warn!(server = %self.config.name, "reconnect attempt failed: {}", e);
                self.schedule_reconnect(&mut lifecycle);
            }
            Err(e) => {
                tracing::error!(server = %self.config.name, "reconnect rejected: {}", e);
                self.set_state(ConnectionState::Error);
            }
        }
    }

    /// Handle one inbound message.
    async fn dispatch(self: &Arc<Self>, raw: &str) {
        let envelope: Envelope = match serde_json::from_str(raw) {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(server = %self.config.name, "dropping unparseable message: {}", e);
                return;
            }
        };

        match envelope.kind() {
            EnvelopeKind::Response => self.rpc.resolve(envelope).await,
            EnvelopeKind::Notification => {
                let method = envelope.method.unwrap_or_default();
                if let Some(refresh) = self.router.route(&method, envelope.params) {
                    self.spawn_refresh(refresh);
                }
            }
            EnvelopeKind::Request => {
                let method = envelope.method.unwrap_or_default();
                let id = envelope.id.unwrap_or(Value::Null);
                self.rpc.reject_server_request(id, &method).await;
            }
            EnvelopeKind::Invalid => {
                tracing::debug!(server = %self.config.name, "dropping message with neither id nor method");
            }
        }
    }

    /// Refresh a list in the background; failures are only logged.
    fn spawn_refresh(self: &Arc<Self>, refresh: CacheRefresh) {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let caps = inner.capabilities().await;
            let outcome = match refresh {
                CacheRefresh::Tools => inner.cache.refresh_tools(&inner.rpc, &caps).await.map(drop),
                CacheRefresh::Resources => {
                    let (resources, templates) = tokio::join!(
                        inner.cache.refresh_resources(&inner.rpc, &caps),
                        inner.cache.refresh_resource_templates(&inner.rpc, &caps)
                    );
                    resources.and(templates).map(drop)
                }
                CacheRefresh::Prompts => {
                    inner.cache.refresh_prompts(&inner.rpc, &caps).await.map(drop)
                }
            };
            if let Err(e) = outcome {
                tracing::warn!(server = %inner.config.name, ?refresh, "list refresh failed: {}", e);
            }
        });
    }
}

/// Consume one connection's inbound channel until it ends or is cancelled.
fn spawn_read_loop(
    weak: Weak<ClientInner>,
    mut inbound: Inbound,
    token: CancellationToken,
    epoch: u64,
) {
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                biased;
                _ = token.cancelled() => return,
                event = inbound.recv() => event,
            };
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let reason = match event {
                Some(TransportEvent::Message(raw)) => {
                    inner.dispatch(&raw).await;
                    continue;
                }
                Some(TransportEvent::Diagnostic(line)) => {
                    tracing::debug!(server = %inner.config.name, "server diagnostic: {}", line);
                    inner.router.diagnostic(line);
                    continue;
                }
                Some(TransportEvent::Closed(reason)) => reason,
                None => "transport channel closed".to_string(),
            };
            if token.is_cancelled() {
                return;
            }
            inner.rpc.reject_all(&reason).await;
            inner.handle_loss(epoch, reason).await;
            return;
        }
    });
}

// ---------------------------------------------------------------------------
// Public client
// ---------------------------------------------------------------------------

/// Client for one server.
///
/// Cloning is cheap; clones share the same connection.
///
/// # Examples
///
/// ```no_run
/// use mcplink::config::{ServerConnectionConfig, TransportConfig};
/// use mcplink::session::McpClient;
///
/// #[tokio::main]
/// async fn main() -> mcplink::error::Result<()> {
///     let config = ServerConnectionConfig::new(
///         "files",
///         TransportConfig::Stdio {
///             command: "npx".into(),
///             args: vec!["-y".into(), "@modelcontextprotocol/server-filesystem".into(), "/tmp".into()],
///             env: Default::default(),
///             working_dir: None,
///         },
///     );
///     let client = McpClient::new(config)?;
///     client.connect().await?;
///     for tool in client.tools().await {
///         println!("{}", tool.name);
///     }
///     client.disconnect().await;
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct McpClient {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for McpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpClient")
            .field("name", &self.inner.config.name)
            .field("transport", &self.inner.transport.kind())
            .field("state", &self.inner.state())
            .finish_non_exhaustive()
    }
}

impl McpClient {
    /// Create a disconnected client for `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport cannot be constructed, e.g. the
    /// HTTP client fails to build.
    pub fn new(config: ServerConnectionConfig) -> Result<Self> {
        let transport = transport::build(&config)?;
        Ok(Self::with_transport(config, transport))
    }

    /// Create a disconnected client over an existing transport.
    pub fn with_transport(config: ServerConnectionConfig, transport: Arc<dyn Transport>) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let inner = ClientInner {
            policy: ReconnectPolicy::from_config(&config),
            rpc: JsonRpcClient::new(Arc::clone(&transport), config.request_timeout),
            router: NotificationRouter::new(config.name.clone(), DEFAULT_EVENT_CAPACITY),
            cache: CapabilityCache::new(),
            subscriptions: SubscriptionRegistry::new(),
            state_tx,
            session: RwLock::new(None),
            lifecycle: Mutex::new(Lifecycle::default()),
            transport,
            config,
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Server name from the config.
    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    pub fn config(&self) -> &ServerConnectionConfig {
        &self.inner.config
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    /// Receiver that observes every state change.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Receiver for every [`ClientEvent`] published from now on.
    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.inner.router.subscribe()
    }

    /// Connect, handshake and discover.
    ///
    /// A no-op when already connected. While a reconnect is pending, the
    /// backoff timer is cancelled and the connection is made immediately.
    ///
    /// # Errors
    ///
    /// - [`McpError::ConnectTimeout`] if setup exceeds the connect timeout
    /// - [`McpError::Handshake`] or [`McpError::Remote`] if `initialize` is
    ///   rejected
    /// - [`McpError::Transport`] if the transport cannot be opened
    ///
    /// The state is `Error` after any failure.
    pub async fn connect(&self) -> Result<()> {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        match self.inner.state() {
            ConnectionState::Connected => return Ok(()),
            ConnectionState::Reconnecting => {
                if let Some(task) = lifecycle.reconnect_task.take() {
                    task.abort();
                }
            }
            _ => {}
        }

        match self.inner.establish(&mut lifecycle).await {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::error!(server = %self.name(), "connect failed: {}", e);
                self.inner.set_state(ConnectionState::Error);
                Err(e)
            }
        }
    }

    /// Tear the connection down. Always succeeds.
    ///
    /// Outstanding calls fail with [`McpError::ConnectionClosed`], a pending
    /// reconnect is cancelled, and the cache and subscriptions are cleared.
    pub async fn disconnect(&self) {
        let inner = &self.inner;
        // Fail in-flight calls first so a connect holding the lock returns.
        inner.rpc.reject_all("client disconnected").await;

        let mut lifecycle = inner.lifecycle.lock().await;
        if let Some(task) = lifecycle.reconnect_task.take() {
            task.abort();
        }
        if let Some(token) = lifecycle.read_loop.take() {
            token.cancel();
        }
        lifecycle.epoch += 1;
        lifecycle.attempts = 0;

        inner.teardown().await;
        inner.rpc.reject_all("client disconnected").await;
        inner.set_state(ConnectionState::Disconnected);
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.inner.state() == ConnectionState::Connected {
            Ok(())
        } else {
            Err(McpError::NotConnected(self.name().to_string()))
        }
    }

    /// Invoke a tool. `arguments` defaults to an empty object.
    pub async fn call_tool(&self, name: &str, arguments: Option<Value>) -> Result<CallToolResult> {
        self.ensure_connected()?;
        let params = CallToolParams {
            name: name.to_string(),
            arguments: arguments.unwrap_or_else(|| json!({})),
        };
        self.inner.rpc.request(METHOD_TOOLS_CALL, Some(params)).await
    }

    /// Read a resource by URI.
    pub async fn read_resource(&self, uri: &str) -> Result<ReadResourceResult> {
        self.ensure_connected()?;
        self.inner
            .rpc
            .request(METHOD_RESOURCES_READ, Some(json!({ "uri": uri })))
            .await
    }

    /// Render a prompt.
    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: HashMap<String, String>,
    ) -> Result<GetPromptResult> {
        self.ensure_connected()?;
        let params = GetPromptParams {
            name: name.to_string(),
            arguments,
        };
        self.inner.rpc.request(METHOD_PROMPTS_GET, Some(params)).await
    }

    /// Set the server's log level. Requires the `logging` capability.
    pub async fn set_log_level(&self, level: LoggingLevel) -> Result<()> {
        self.ensure_connected()?;
        self.inner
            .capabilities()
            .await
            .require(ServerCapabilityFlag::Logging, METHOD_LOGGING_SET_LEVEL)?;
        self.inner
            .rpc
            .call(
                METHOD_LOGGING_SET_LEVEL,
                Some(serde_json::to_value(SetLevelParams { level })?),
            )
            .await
            .map(drop)
    }

    /// Round-trip a `ping`.
    pub async fn ping(&self) -> Result<()> {
        self.ensure_connected()?;
        self.inner.rpc.call(METHOD_PING, None).await.map(drop)
    }

    /// Send an arbitrary request and return the raw result.
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        self.ensure_connected()?;
        self.inner.rpc.call(method, params).await
    }

    /// Subscribe to update notifications for a resource.
    ///
    /// # Errors
    ///
    /// [`McpError::CapabilityViolation`] unless the server advertised
    /// `resources.subscribe`; nothing is sent in that case.
    pub async fn subscribe(&self, uri: &str) -> Result<()> {
        self.ensure_connected()?;
        let caps = self.inner.capabilities().await;
        self.inner
            .subscriptions
            .subscribe(&self.inner.rpc, &caps, uri)
            .await
    }

    /// Drop a resource subscription. A no-op for unknown URIs.
    pub async fn unsubscribe(&self, uri: &str) -> Result<()> {
        self.ensure_connected()?;
        self.inner
            .subscriptions
            .unsubscribe(&self.inner.rpc, uri)
            .await
    }

    /// Currently subscribed resource URIs.
    pub async fn subscriptions(&self) -> Vec<String> {
        self.inner.subscriptions.list().await
    }

    pub async fn tools(&self) -> Vec<Tool> {
        self.inner.cache.tools().await.as_ref().clone()
    }

    pub async fn resources(&self) -> Vec<Resource> {
        self.inner.cache.resources().await.as_ref().clone()
    }

    pub async fn resource_templates(&self) -> Vec<ResourceTemplate> {
        self.inner.cache.resource_templates().await.as_ref().clone()
    }

    pub async fn prompts(&self) -> Vec<Prompt> {
        self.inner.cache.prompts().await.as_ref().clone()
    }

    /// Capabilities from the current session, `None` when not connected.
    pub async fn server_capabilities(&self) -> Option<ServerCapabilities> {
        self.inner
            .session
            .read()
            .await
            .as_ref()
            .map(|s| s.capabilities.clone())
    }

    /// Server identity from the current session.
    pub async fn server_info(&self) -> Option<Implementation> {
        self.inner
            .session
            .read()
            .await
            .as_ref()
            .map(|s| s.server_info.clone())
    }

    /// Negotiated protocol version of the current session.
    pub async fn protocol_version(&self) -> Option<String> {
        self.inner
            .session
            .read()
            .await
            .as_ref()
            .map(|s| s.protocol_version.clone())
    }

    /// Usage instructions the server sent in `initialize`.
    pub async fn instructions(&self) -> Option<String> {
        self.inner
            .session
            .read()
            .await
            .as_ref()
            .and_then(|s| s.instructions.clone())
    }

    /// Number of calls waiting for a response.
    pub async fn pending_calls(&self) -> usize {
        self.inner.rpc.pending_count().await
    }

    pub async fn status(&self) -> ServerStatus {
        ServerStatus {
            name: self.name().to_string(),
            transport: self.inner.transport.kind(),
            state: self.state(),
            server_info: self.server_info().await,
            tool_count: self.inner.cache.tools().await.len(),
            resource_count: self.inner.cache.resources().await.len(),
            prompt_count: self.inner.cache.prompts().await.len(),
        }
    }
}
