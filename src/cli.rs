//! Command-line interface definition for mcplink
//!
//! This module defines the CLI structure using clap's derive API. Every
//! subcommand exercises one public operation of the client library.

use clap::{Parser, Subcommand};

/// mcplink - connect to and inspect Model Context Protocol servers
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "mcplink")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (searched for when omitted)
    #[arg(short, long, env = "MCPLINK_CONFIG")]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub log_json: bool,

    /// Override the per-request timeout for every server (milliseconds)
    #[arg(long)]
    pub request_timeout_ms: Option<u64>,

    /// Override the connect timeout for every server (milliseconds)
    #[arg(long)]
    pub connect_timeout_ms: Option<u64>,

    /// Disable automatic reconnection
    #[arg(long)]
    pub no_reconnect: bool,

    /// Command to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available commands for mcplink
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// List configured servers
    Servers,

    /// Connect to a server and print its capabilities and discovered lists
    Inspect {
        /// Server name from the config file
        server: String,
    },

    /// Invoke a tool
    Call {
        /// Server name from the config file
        server: String,

        /// Tool name
        tool: String,

        /// Tool arguments as a JSON object
        #[arg(short, long)]
        args: Option<String>,
    },

    /// Read a resource
    Read {
        /// Server name from the config file
        server: String,

        /// Resource URI
        uri: String,
    },

    /// Render a prompt
    Prompt {
        /// Server name from the config file
        server: String,

        /// Prompt name
        name: String,

        /// Prompt arguments as a JSON object of strings
        #[arg(short, long)]
        args: Option<String>,
    },

    /// Stream client events until Ctrl-C
    Watch {
        /// Server name from the config file
        server: String,

        /// Resource URIs to subscribe to
        #[arg(short, long)]
        subscribe: Vec<String>,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
