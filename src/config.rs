//! Configuration management for mcplink
//!
//! This module handles loading and validating the server table from YAML
//! (or JSON, which `serde_yaml` also accepts), environment variables and CLI
//! overrides. Two shapes are understood:
//!
//! ```yaml
//! defaults:
//!   request_timeout_ms: 10000
//! servers:
//!   files:
//!     command: npx
//!     args: ["-y", "@modelcontextprotocol/server-filesystem", "/tmp"]
//! ```
//!
//! ```json
//! { "mcpServers": { "search": { "url": "http://localhost:3000/mcp", "requestTimeout": 5000 } } }
//! ```
//!
//! A server entry is turned into an immutable [`ServerConnectionConfig`] by
//! [`ServerEntry::resolve`], which fills unset values from [`Defaults`].

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{McpError, Result};
use crate::transport::TransportKind;
use crate::types::Implementation;

/// File names searched by [`Config::discover`], in order.
pub const CONFIG_FILE_NAMES: &[&str] = &["mcplink.yaml", ".mcp.json", "mcp.json", ".mcplink/config.yaml"];

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Values applied to servers that do not set their own
    #[serde(default)]
    pub defaults: Defaults,

    /// Identity sent in `initialize`
    #[serde(default)]
    pub client: Implementation,

    /// Server table keyed by server name
    #[serde(default, alias = "mcpServers")]
    pub servers: BTreeMap<String, ServerEntry>,
}

/// Connection defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Defaults {
    #[serde(default = "default_timeout_ms", alias = "connectTimeout")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_timeout_ms", alias = "requestTimeout")]
    pub request_timeout_ms: u64,

    #[serde(default = "default_auto_reconnect", alias = "autoReconnect")]
    pub auto_reconnect: bool,

    #[serde(default = "default_max_reconnect_attempts", alias = "maxReconnectAttempts")]
    pub max_reconnect_attempts: u32,

    #[serde(default = "default_reconnect_base_delay_ms", alias = "reconnectBaseDelay")]
    pub reconnect_base_delay_ms: u64,

    #[serde(default = "default_reconnect_max_delay_ms", alias = "reconnectMaxDelay")]
    pub reconnect_max_delay_ms: u64,
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_auto_reconnect() -> bool {
    true
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_reconnect_base_delay_ms() -> u64 {
    1_000
}

fn default_reconnect_max_delay_ms() -> u64 {
    30_000
}

fn default_enabled() -> bool {
    true
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_timeout_ms(),
            request_timeout_ms: default_timeout_ms(),
            auto_reconnect: default_auto_reconnect(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            reconnect_base_delay_ms: default_reconnect_base_delay_ms(),
            reconnect_max_delay_ms: default_reconnect_max_delay_ms(),
        }
    }
}

/// One entry of the server table as written in the config file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerEntry {
    /// Wire transport; inferred from `command` / `url` when absent
    #[serde(default, alias = "type")]
    pub transport: Option<TransportKind>,

    /// Executable for stdio servers
    #[serde(default)]
    pub command: Option<String>,

    #[serde(default)]
    pub args: Vec<String>,

    /// Added to the inherited environment of a stdio server
    #[serde(default)]
    pub env: HashMap<String, String>,

    #[serde(default, alias = "cwd", alias = "workingDir")]
    pub working_dir: Option<PathBuf>,

    /// Endpoint for sse, websocket and http servers
    #[serde(default)]
    pub url: Option<String>,

    /// Event stream URL for sse servers; `{url}/sse` when absent
    #[serde(default, alias = "streamUrl")]
    pub stream_url: Option<String>,

    #[serde(default)]
    pub headers: HashMap<String, String>,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default, alias = "connectTimeout")]
    pub connect_timeout_ms: Option<u64>,

    #[serde(default, alias = "requestTimeout")]
    pub request_timeout_ms: Option<u64>,

    #[serde(default, alias = "autoReconnect")]
    pub auto_reconnect: Option<bool>,

    #[serde(default, alias = "maxReconnectAttempts")]
    pub max_reconnect_attempts: Option<u32>,

    #[serde(default, alias = "reconnectBaseDelay")]
    pub reconnect_base_delay_ms: Option<u64>,

    #[serde(default, alias = "reconnectMaxDelay")]
    pub reconnect_max_delay_ms: Option<u64>,
}

impl Default for ServerEntry {
    fn default() -> Self {
        Self {
            transport: None,
            command: None,
            args: Vec::new(),
            env: HashMap::new(),
            working_dir: None,
            url: None,
            stream_url: None,
            headers: HashMap::new(),
            enabled: default_enabled(),
            connect_timeout_ms: None,
            request_timeout_ms: None,
            auto_reconnect: None,
            max_reconnect_attempts: None,
            reconnect_base_delay_ms: None,
            reconnect_max_delay_ms: None,
        }
    }
}

/// How to reach one server
#[derive(Debug, Clone, PartialEq)]
pub enum TransportConfig {
    Stdio {
        command: String,
        args: Vec<String>,
        env: HashMap<String, String>,
        working_dir: Option<PathBuf>,
    },
    Sse {
        url: url::Url,
        stream_url: Option<url::Url>,
        headers: HashMap<String, String>,
    },
    WebSocket {
        url: url::Url,
        headers: HashMap<String, String>,
    },
    Http {
        url: url::Url,
        headers: HashMap<String, String>,
    },
}

impl TransportConfig {
    /// The transport variant.
    pub fn kind(&self) -> TransportKind {
        match self {
            TransportConfig::Stdio { .. } => TransportKind::Stdio,
            TransportConfig::Sse { .. } => TransportKind::Sse,
            TransportConfig::WebSocket { .. } => TransportKind::WebSocket,
            TransportConfig::Http { .. } => TransportKind::Http,
        }
    }
}

/// Fully resolved, immutable connection settings for one server
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConnectionConfig {
    pub name: String,
    pub transport: TransportConfig,
    /// Bounds transport setup plus handshake
    pub connect_timeout: Duration,
    /// Bounds every individual call
    pub request_timeout: Duration,
    pub auto_reconnect: bool,
    pub max_reconnect_attempts: u32,
    pub reconnect_base_delay: Duration,
    pub reconnect_max_delay: Duration,
    pub client_info: Implementation,
}

impl ServerConnectionConfig {
    /// Settings with default timeouts and reconnection for `transport`.
    ///
    /// # Examples
    ///
    /// ```
    /// use mcplink::config::{ServerConnectionConfig, TransportConfig};
    ///
    /// let cfg = ServerConnectionConfig::new(
    ///     "echo",
    ///     TransportConfig::Stdio {
    ///         command: "cat".into(),
    ///         args: vec![],
    ///         env: Default::default(),
    ///         working_dir: None,
    ///     },
    /// );
    /// assert_eq!(cfg.max_reconnect_attempts, 5);
    /// ```
    pub fn new(name: impl Into<String>, transport: TransportConfig) -> Self {
        let defaults = Defaults::default();
        Self {
            name: name.into(),
            transport,
            connect_timeout: Duration::from_millis(defaults.connect_timeout_ms),
            request_timeout: Duration::from_millis(defaults.request_timeout_ms),
            auto_reconnect: defaults.auto_reconnect,
            max_reconnect_attempts: defaults.max_reconnect_attempts,
            reconnect_base_delay: Duration::from_millis(defaults.reconnect_base_delay_ms),
            reconnect_max_delay: Duration::from_millis(defaults.reconnect_max_delay_ms),
            client_info: Implementation::default(),
        }
    }
}

impl ServerEntry {
    /// Transport named explicitly or inferred: `command` means stdio, `url`
    /// means http (or websocket for a `ws://` / `wss://` scheme).
    pub fn transport_kind(&self) -> Option<TransportKind> {
        if let Some(kind) = self.transport {
            return Some(kind);
        }
        if self.command.is_some() {
            return Some(TransportKind::Stdio);
        }
        let url = self.url.as_deref()?;
        if url.starts_with("ws://") || url.starts_with("wss://") {
            Some(TransportKind::WebSocket)
        } else {
            Some(TransportKind::Http)
        }
    }

    /// Resolve this entry into connection settings.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::Config`] when the transport cannot be determined,
    /// a stdio entry has no command, a network entry has no valid URL, or a
    /// timeout is zero.
    pub fn resolve(
        &self,
        name: &str,
        defaults: &Defaults,
        client: &Implementation,
    ) -> Result<ServerConnectionConfig> {
        let kind = self.transport_kind().ok_or_else(|| {
            McpError::Config(format!(
                "server '{}' needs either `command` or `url`",
                name
            ))
        })?;

        let transport = match kind {
            TransportKind::Stdio => {
                let command = self
                    .command
                    .clone()
                    .filter(|c| !c.trim().is_empty())
                    .ok_or_else(|| {
                        McpError::Config(format!("stdio server '{}' has no command", name))
                    })?;
                TransportConfig::Stdio {
                    command,
                    args: self.args.clone(),
                    env: self.env.clone(),
                    working_dir: self.working_dir.clone(),
                }
            }
            TransportKind::Sse => TransportConfig::Sse {
                url: parse_url(name, self.url.as_deref())?,
                stream_url: self
                    .stream_url
                    .as_deref()
                    .map(|u| parse_url(name, Some(u)))
                    .transpose()?,
                headers: self.headers.clone(),
            },
            TransportKind::WebSocket => TransportConfig::WebSocket {
                url: parse_url(name, self.url.as_deref())?,
                headers: self.headers.clone(),
            },
            TransportKind::Http => TransportConfig::Http {
                url: parse_url(name, self.url.as_deref())?,
                headers: self.headers.clone(),
            },
        };

        let connect_timeout_ms = self.connect_timeout_ms.unwrap_or(defaults.connect_timeout_ms);
        let request_timeout_ms = self.request_timeout_ms.unwrap_or(defaults.request_timeout_ms);
        if connect_timeout_ms == 0 || request_timeout_ms == 0 {
            return Err(McpError::Config(format!(
                "server '{}' timeouts must be greater than 0",
                name
            )));
        }

        let base = self
            .reconnect_base_delay_ms
            .unwrap_or(defaults.reconnect_base_delay_ms);
        let max = self
            .reconnect_max_delay_ms
            .unwrap_or(defaults.reconnect_max_delay_ms);
        if base > max {
            return Err(McpError::Config(format!(
                "server '{}' reconnect base delay {}ms exceeds max delay {}ms",
                name, base, max
            )));
        }

        Ok(ServerConnectionConfig {
            name: name.to_string(),
            transport,
            connect_timeout: Duration::from_millis(connect_timeout_ms),
            request_timeout: Duration::from_millis(request_timeout_ms),
            auto_reconnect: self.auto_reconnect.unwrap_or(defaults.auto_reconnect),
            max_reconnect_attempts: self
                .max_reconnect_attempts
                .unwrap_or(defaults.max_reconnect_attempts),
            reconnect_base_delay: Duration::from_millis(base),
            reconnect_max_delay: Duration::from_millis(max),
            client_info: client.clone(),
        })
    }
}

fn parse_url(name: &str, raw: Option<&str>) -> Result<url::Url> {
    let raw = raw.ok_or_else(|| McpError::Config(format!("server '{}' has no url", name)))?;
    url::Url::parse(raw)
        .map_err(|e| McpError::Config(format!("server '{}' has invalid url '{}': {}", name, raw, e)))
}

impl Config {
    /// Load configuration from file, environment variables and CLI overrides
    ///
    /// A missing file is not an error: a warning is logged and defaults are
    /// used, so env and CLI overrides still apply.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::Config`] if the file exists but cannot be read or
    /// parsed.
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    /// Parse a config file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| McpError::Config(format!("Failed to read config file: {}", e)))?;
        Self::from_str(&contents)
            .map_err(|e| McpError::Config(format!("Failed to parse {}: {}", path.display(), e)))
    }

    /// Parse config text (YAML or JSON)
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(contents: &str) -> Result<Self> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(contents)?)
    }

    /// Find a config file for `dir`
    ///
    /// Checks [`CONFIG_FILE_NAMES`] under `dir` in order, then
    /// `config.yaml` in the user config directory.
    pub fn discover(dir: &Path) -> Option<PathBuf> {
        for name in CONFIG_FILE_NAMES {
            let candidate = dir.join(name);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
        let project = directories::ProjectDirs::from("", "", "mcplink")?;
        let candidate = project.config_dir().join("config.yaml");
        candidate.is_file().then_some(candidate)
    }

    fn apply_env_vars(&mut self) {
        if let Ok(v) = std::env::var("MCPLINK_CONNECT_TIMEOUT_MS") {
            match v.parse::<u64>() {
                Ok(ms) => {
                    self.defaults.connect_timeout_ms = ms;
                    tracing::debug!(ms, "Env override: MCPLINK_CONNECT_TIMEOUT_MS");
                }
                Err(_) => tracing::warn!("Invalid MCPLINK_CONNECT_TIMEOUT_MS: {}", v),
            }
        }

        if let Ok(v) = std::env::var("MCPLINK_REQUEST_TIMEOUT_MS") {
            match v.parse::<u64>() {
                Ok(ms) => {
                    self.defaults.request_timeout_ms = ms;
                    tracing::debug!(ms, "Env override: MCPLINK_REQUEST_TIMEOUT_MS");
                }
                Err(_) => tracing::warn!("Invalid MCPLINK_REQUEST_TIMEOUT_MS: {}", v),
            }
        }

        if let Ok(v) = std::env::var("MCPLINK_AUTO_RECONNECT") {
            match v.parse::<bool>() {
                Ok(enabled) => {
                    self.defaults.auto_reconnect = enabled;
                    tracing::debug!(enabled, "Env override: MCPLINK_AUTO_RECONNECT");
                }
                Err(_) => tracing::warn!("Invalid MCPLINK_AUTO_RECONNECT: {}", v),
            }
        }

        if let Ok(v) = std::env::var("MCPLINK_MAX_RECONNECT_ATTEMPTS") {
            match v.parse::<u32>() {
                Ok(n) => {
                    self.defaults.max_reconnect_attempts = n;
                    tracing::debug!(n, "Env override: MCPLINK_MAX_RECONNECT_ATTEMPTS");
                }
                Err(_) => tracing::warn!("Invalid MCPLINK_MAX_RECONNECT_ATTEMPTS: {}", v),
            }
        }

        if let Ok(name) = std::env::var("MCPLINK_CLIENT_NAME") {
            if name.trim().is_empty() {
                tracing::warn!("Invalid MCPLINK_CLIENT_NAME: empty");
            } else {
                tracing::debug!(name = %name, "Env override: MCPLINK_CLIENT_NAME");
                self.client.name = name;
            }
        }
    }

    /// CLI flags win over the file and the environment. They are applied to
    /// the defaults and to every server that set its own value.
    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if let Some(ms) = cli.request_timeout_ms {
            self.defaults.request_timeout_ms = ms;
            for entry in self.servers.values_mut() {
                entry.request_timeout_ms = None;
            }
        }
        if let Some(ms) = cli.connect_timeout_ms {
            self.defaults.connect_timeout_ms = ms;
            for entry in self.servers.values_mut() {
                entry.connect_timeout_ms = None;
            }
        }
        if cli.no_reconnect {
            self.defaults.auto_reconnect = false;
            for entry in self.servers.values_mut() {
                entry.auto_reconnect = None;
            }
        }
        if cli.verbose {
            tracing::debug!("Verbose mode enabled");
        }
    }

    /// Resolve every enabled server
    ///
    /// # Errors
    ///
    /// Returns the first [`ServerEntry::resolve`] failure.
    pub fn server_configs(&self) -> Result<Vec<ServerConnectionConfig>> {
        self.servers
            .iter()
            .filter(|(_, entry)| entry.enabled)
            .map(|(name, entry)| entry.resolve(name, &self.defaults, &self.client))
            .collect()
    }

    /// Resolve one server by name
    ///
    /// # Errors
    ///
    /// [`McpError::UnknownServer`] when `name` is not in the table.
    pub fn server_config(&self, name: &str) -> Result<ServerConnectionConfig> {
        let entry = self
            .servers
            .get(name)
            .ok_or_else(|| McpError::UnknownServer(name.to_string()))?;
        entry.resolve(name, &self.defaults, &self.client)
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns [`McpError::Config`] for zero timeouts, a base delay above
    /// the max delay, an empty client name, or any server entry that does
    /// not resolve. Disabled servers are validated too.
    pub fn validate(&self) -> Result<()> {
        if self.defaults.connect_timeout_ms == 0 || self.defaults.request_timeout_ms == 0 {
            return Err(McpError::Config(
                "default timeouts must be greater than 0".to_string(),
            ));
        }

        if self.defaults.reconnect_base_delay_ms > self.defaults.reconnect_max_delay_ms {
            return Err(McpError::Config(
                "reconnect_base_delay_ms must not exceed reconnect_max_delay_ms".to_string(),
            ));
        }

        if self.client.name.trim().is_empty() {
            return Err(McpError::Config("client name cannot be empty".to_string()));
        }

        for (name, entry) in &self.servers {
            entry.resolve(name, &self.defaults, &self.client)?;
        }

        Ok(())
    }
}
