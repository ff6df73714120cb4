//! Multi-server manager
//!
//! [`McpManager`] owns one [`McpClient`] per configured server and exposes
//! their tools under namespaced names of the form `mcp__{server}__{tool}`,
//! so a tool-execution layer can treat every server's tools as one list and
//! route calls back to the right connection.

use std::collections::{BTreeMap, HashMap};

use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::config::{Config, ServerConnectionConfig};
use crate::error::{McpError, Result};
use crate::session::{ConnectionState, McpClient, ServerStatus};
use crate::types::{CallToolResult, GetPromptResult, ReadResourceResult, Tool};

/// Prefix of every namespaced tool name.
pub const QUALIFIED_PREFIX: &str = "mcp__";

const SEPARATOR: &str = "__";

/// Build the namespaced name of `tool` on `server`.
///
/// # Examples
///
/// ```
/// use mcplink::manager::qualified_tool_name;
///
/// assert_eq!(qualified_tool_name("files", "read_file"), "mcp__files__read_file");
/// ```
pub fn qualified_tool_name(server: &str, tool: &str) -> String {
    format!("{QUALIFIED_PREFIX}{server}{SEPARATOR}{tool}")
}

/// A tool together with the server that provides it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualifiedTool {
    /// `mcp__{server}__{tool}`
    pub qualified_name: String,
    pub server: String,
    pub tool: Tool,
}

/// Aggregate counts over all managed servers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ManagerStats {
    pub servers: usize,
    pub connected_servers: usize,
    pub tools: usize,
    pub resources: usize,
    pub prompts: usize,
}

/// Owns one client per server.
#[derive(Debug, Default)]
pub struct McpManager {
    clients: RwLock<BTreeMap<String, McpClient>>,
}

impl McpManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a client for every enabled server in `config`.
    ///
    /// Nothing is connected yet; call [`McpManager::connect_all`].
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut clients = BTreeMap::new();
        for server in config.server_configs()? {
            let name = server.name.clone();
            clients.insert(name, McpClient::new(server)?);
        }
        Ok(Self {
            clients: RwLock::new(clients),
        })
    }

    /// Register a server without connecting it.
    ///
    /// # Errors
    ///
    /// [`McpError::Config`] if a server with the same name exists.
    pub async fn add_server(&self, config: ServerConnectionConfig) -> Result<McpClient> {
        let client = McpClient::new(config)?;
        self.add_client(client.clone()).await?;
        Ok(client)
    }

    /// Register an already constructed client, e.g. one over a custom
    /// transport.
    pub async fn add_client(&self, client: McpClient) -> Result<()> {
        let mut clients = self.clients.write().await;
        if clients.contains_key(client.name()) {
            return Err(McpError::Config(format!(
                "server '{}' is already registered",
                client.name()
            )));
        }
        tracing::debug!(server = client.name(), "server registered");
        clients.insert(client.name().to_string(), client);
        Ok(())
    }

    /// Disconnect and forget a server. Returns `false` if it was unknown.
    pub async fn remove_server(&self, name: &str) -> bool {
        let removed = self.clients.write().await.remove(name);
        match removed {
            Some(client) => {
                client.disconnect().await;
                tracing::info!(server = name, "server removed");
                true
            }
            None => false,
        }
    }

    /// Client for `name`.
    pub async fn client(&self, name: &str) -> Option<McpClient> {
        self.clients.read().await.get(name).cloned()
    }

    /// Registered server names in sorted order.
    pub async fn server_names(&self) -> Vec<String> {
        self.clients.read().await.keys().cloned().collect()
    }

    async fn require_client(&self, name: &str) -> Result<McpClient> {
        self.client(name)
            .await
            .ok_or_else(|| McpError::UnknownServer(name.to_string()))
    }

    async fn snapshot(&self) -> Vec<McpClient> {
        self.clients.read().await.values().cloned().collect()
    }

    /// Connect every registered server concurrently.
    ///
    /// Failures are logged and returned; they never abort the other
    /// connections.
    pub async fn connect_all(&self) -> Vec<(String, McpError)> {
        let clients = self.snapshot().await;
        let outcomes = join_all(clients.iter().map(|client| async move {
            (client.name().to_string(), client.connect().await)
        }))
        .await;

        let mut failures = Vec::new();
        for (name, outcome) in outcomes {
            if let Err(e) = outcome {
                tracing::warn!(server = %name, "failed to connect: {}", e);
                failures.push((name, e));
            }
        }
        tracing::info!(
            servers = clients.len(),
            failed = failures.len(),
            "connected servers"
        );
        failures
    }

    /// Tools of every connected server, namespaced.
    pub async fn all_tools(&self) -> Vec<QualifiedTool> {
        let mut all = Vec::new();
        for client in self.snapshot().await {
            if client.state() != ConnectionState::Connected {
                continue;
            }
            for tool in client.tools().await {
                all.push(QualifiedTool {
                    qualified_name: qualified_tool_name(client.name(), &tool.name),
                    server: client.name().to_string(),
                    tool,
                });
            }
        }
        all
    }

    /// Split a qualified name into the owning client and the bare tool name.
    ///
    /// Server names may contain `__`, so the longest registered server name
    /// that prefixes the remainder wins.
    async fn resolve_tool(&self, qualified: &str) -> Result<(McpClient, String)> {
        let rest = qualified
            .strip_prefix(QUALIFIED_PREFIX)
            .ok_or_else(|| McpError::UnknownTool(qualified.to_string()))?;

        let clients = self.clients.read().await;
        let owner = clients
            .iter()
            .filter_map(|(name, client)| {
                rest.strip_prefix(name.as_str())
                    .and_then(|r| r.strip_prefix(SEPARATOR))
                    .filter(|tool| !tool.is_empty())
                    .map(|tool| (name.len(), client, tool))
            })
            .max_by_key(|(len, _, _)| *len);

        match owner {
            Some((_, client, tool)) => Ok((client.clone(), tool.to_string())),
            None => Err(McpError::UnknownTool(qualified.to_string())),
        }
    }

    /// Invoke a tool by its qualified name.
    ///
    /// # Errors
    ///
    /// [`McpError::UnknownTool`] if the name does not resolve to a tool the
    /// owning server currently lists, otherwise the error of the call.
    pub async fn call_tool(&self, qualified: &str, arguments: Option<Value>) -> Result<CallToolResult> {
        let (client, tool) = self.resolve_tool(qualified).await?;
        if !client.tools().await.iter().any(|t| t.name == tool) {
            return Err(McpError::UnknownTool(qualified.to_string()));
        }
        tracing::debug!(server = client.name(), tool = %tool, "routing tool call");
        client.call_tool(&tool, arguments).await
    }

    /// Read a resource.
    ///
    /// With `server` given, that server is asked. Otherwise the server
    /// listing `uri` is asked, and failing that every connected server in
    /// turn until one succeeds.
    pub async fn read_resource(&self, uri: &str, server: Option<&str>) -> Result<ReadResourceResult> {
        if let Some(name) = server {
            return self.require_client(name).await?.read_resource(uri).await;
        }

        let connected: Vec<McpClient> = self
            .snapshot()
            .await
            .into_iter()
            .filter(|c| c.state() == ConnectionState::Connected)
            .collect();

        for client in &connected {
            if client.resources().await.iter().any(|r| r.uri == uri) {
                return client.read_resource(uri).await;
            }
        }

        let mut last_error = None;
        for client in &connected {
            match client.read_resource(uri).await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    tracing::debug!(server = client.name(), uri, "read failed: {}", e);
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| McpError::NotConnected("no connected servers".to_string())))
    }

    /// Render a prompt, from `server` or from the first server listing it.
    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: HashMap<String, String>,
        server: Option<&str>,
    ) -> Result<GetPromptResult> {
        if let Some(server) = server {
            return self
                .require_client(server)
                .await?
                .get_prompt(name, arguments)
                .await;
        }
        for client in self.snapshot().await {
            if client.prompts().await.iter().any(|p| p.name == name) {
                return client.get_prompt(name, arguments).await;
            }
        }
        Err(McpError::Remote {
            code: crate::types::error_codes::PROMPT_NOT_FOUND,
            message: format!("no server provides prompt '{name}'"),
        })
    }

    /// Subscribe to a resource on `server`.
    pub async fn subscribe_resource(&self, server: &str, uri: &str) -> Result<()> {
        self.require_client(server).await?.subscribe(uri).await
    }

    /// Status of every server, sorted by name.
    pub async fn list_servers(&self) -> Vec<ServerStatus> {
        let mut statuses = Vec::new();
        for client in self.snapshot().await {
            statuses.push(client.status().await);
        }
        statuses
    }

    pub async fn has_connected_servers(&self) -> bool {
        self.snapshot()
            .await
            .iter()
            .any(|c| c.state() == ConnectionState::Connected)
    }

    pub async fn stats(&self) -> ManagerStats {
        let statuses = self.list_servers().await;
        ManagerStats {
            servers: statuses.len(),
            connected_servers: statuses
                .iter()
                .filter(|s| s.state == ConnectionState::Connected)
                .count(),
            tools: statuses.iter().map(|s| s.tool_count).sum(),
            resources: statuses.iter().map(|s| s.resource_count).sum(),
            prompts: statuses.iter().map(|s| s.prompt_count).sum(),
        }
    }

    /// Disconnect every server concurrently and forget them all.
    pub async fn disconnect_all(&self) {
        let clients: Vec<McpClient> = {
            let mut map = self.clients.write().await;
            std::mem::take(&mut *map).into_values().collect()
        };
        join_all(clients.iter().map(|c| c.disconnect())).await;
        tracing::info!(servers = clients.len(), "disconnected all servers");
    }
}
