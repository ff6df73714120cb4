//! mcplink - Model Context Protocol client library
//!
//! This library connects an application to Model Context Protocol servers
//! over stdio, SSE, WebSocket or HTTP, negotiates capabilities, discovers
//! tools, resources and prompts, and keeps the connection alive with
//! exponential-backoff reconnection.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `transport`: the [`transport::Transport`] trait and its four wire
//!   implementations, plus an in-process fake for tests
//! - `client`: JSON-RPC request dispatcher with per-call timeouts
//! - `protocol`: the `initialize` handshake and capability gating
//! - `events`: typed client events and server notification routing
//! - `cache`: discovered tool, resource and prompt lists
//! - `subscriptions`: resource subscription bookkeeping
//! - `session`: per-server connection state machine ([`McpClient`])
//! - `manager`: several servers behind one namespaced tool list
//! - `config`: configuration loading and validation
//! - `error`: error types and result aliases
//! - `cli` and `commands`: the `mcplink` binary
//!
//! # Example
//!
//! ```no_run
//! use mcplink::{Config, McpManager};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("mcplink.yaml", &Default::default())?;
//!     config.validate()?;
//!
//!     let manager = McpManager::from_config(&config)?;
//!     manager.connect_all().await;
//!     for tool in manager.all_tools().await {
//!         println!("{}", tool.qualified_name);
//!     }
//!     manager.disconnect_all().await;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod cli;
pub mod client;
pub mod commands;
pub mod config;
pub mod error;
pub mod events;
pub mod manager;
pub mod protocol;
pub mod session;
pub mod subscriptions;
pub mod transport;
pub mod types;

// Re-export commonly used types
pub use config::{Config, ServerConnectionConfig};
pub use error::{McpError, Result};
pub use events::ClientEvent;
pub use manager::McpManager;
pub use session::{ConnectionState, McpClient};
