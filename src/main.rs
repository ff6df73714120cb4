//! mcplink - Model Context Protocol client CLI
//!
#![doc = "mcplink - Model Context Protocol client CLI"]
#![doc = "Main entry point for the mcplink binary."]

use anyhow::Result;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mcplink::cli::{Cli, Commands};
use mcplink::commands;
use mcplink::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    // Initialize tracing
    init_tracing(cli.verbose, cli.log_json);

    // Load configuration, searching the working directory when no path is given
    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => {
            let cwd = std::env::current_dir()?;
            match Config::discover(&cwd) {
                Some(found) => {
                    tracing::debug!("Discovered config file: {}", found.display());
                    found.to_string_lossy().into_owned()
                }
                None => "mcplink.yaml".to_string(),
            }
        }
    };
    let config = Config::load(&config_path, &cli)?;

    // Validate configuration
    config.validate()?;

    // Execute command
    match cli.command.unwrap_or(Commands::Servers) {
        Commands::Servers => {
            commands::servers::list_servers(&config)?;
        }
        Commands::Inspect { server } => {
            tracing::info!("Inspecting server: {}", server);
            commands::servers::inspect(&config, &server).await?;
        }
        Commands::Call { server, tool, args } => {
            tracing::info!("Calling tool {} on {}", tool, server);
            commands::invoke::call_tool(&config, &server, &tool, args.as_deref()).await?;
        }
        Commands::Read { server, uri } => {
            tracing::info!("Reading {} from {}", uri, server);
            commands::invoke::read_resource(&config, &server, &uri).await?;
        }
        Commands::Prompt { server, name, args } => {
            tracing::info!("Rendering prompt {} from {}", name, server);
            commands::invoke::get_prompt(&config, &server, &name, args.as_deref()).await?;
        }
        Commands::Watch { server, subscribe } => {
            tracing::info!("Watching server: {}", server);
            commands::watch::run_watch(&config, &server, &subscribe).await?;
        }
    }
    Ok(())
}

/// Initialize tracing subscriber with environment filter
///
/// `RUST_LOG` wins when set. Logs go to stderr so command output on stdout
/// stays clean.
fn init_tracing(verbose: bool, json: bool) {
    let default_directive = if verbose { "mcplink=debug" } else { "mcplink=info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
