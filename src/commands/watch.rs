//! `watch` command: stream client events until Ctrl-C

use chrono::Local;
use colored::Colorize;
use tokio::sync::broadcast::error::RecvError;

use crate::config::Config;
use crate::error::Result;
use crate::events::ClientEvent;
use crate::session::McpClient;
use crate::types::LoggingLevel;

/// Connect to `server`, subscribe to `uris` and print every event.
pub async fn run_watch(config: &Config, server: &str, uris: &[String]) -> Result<()> {
    let client = McpClient::new(config.server_config(server)?)?;
    // Subscribe before connecting so the initial transitions are printed.
    let mut events = client.subscribe_events();
    client.connect().await?;

    for uri in uris {
        match client.subscribe(uri).await {
            Ok(()) => println!("{} {}", "subscribed".green(), uri),
            Err(e) => println!("{} {}: {}", "subscribe failed".red(), uri, e),
        }
    }
    println!("{}", "Watching for events, Ctrl-C to stop.".dimmed());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                break;
            }
            event = events.recv() => match event {
                Ok(event) => println!("{} {}", Local::now().format("%H:%M:%S").to_string().dimmed(), format_event(&event)),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event stream lagged");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    client.disconnect().await;
    Ok(())
}

/// One-line rendering of an event.
pub fn format_event(event: &ClientEvent) -> String {
    match event {
        ClientEvent::StateChanged { from, to } => {
            format!("{} {} -> {}", "state".bold(), from, to.to_string().cyan())
        }
        ClientEvent::Reconnecting { attempt, delay } => format!(
            "{} attempt {} in {}ms",
            "reconnecting".yellow(),
            attempt,
            delay.as_millis()
        ),
        ClientEvent::ToolsListChanged => "tools list changed".to_string(),
        ClientEvent::ResourcesListChanged => "resources list changed".to_string(),
        ClientEvent::PromptsListChanged => "prompts list changed".to_string(),
        ClientEvent::ResourceUpdated { uri } => format!("{} {}", "updated".green(), uri),
        ClientEvent::Log(message) => {
            let level = message.level.to_string();
            let level = if message.level >= LoggingLevel::Error {
                level.red()
            } else if message.level >= LoggingLevel::Warning {
                level.yellow()
            } else {
                level.normal()
            };
            let data = match &message.data {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            match &message.logger {
                Some(logger) => format!("[{level}] {logger}: {data}"),
                None => format!("[{level}] {data}"),
            }
        }
        ClientEvent::Progress(progress) => match progress.total {
            Some(total) => format!("progress {}/{}", progress.progress, total),
            None => format!("progress {}", progress.progress),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ConnectionState;
    use crate::types::LogMessage;

    #[test]
    fn test_format_event() {
        colored::control::set_override(false);
        let text = format_event(&ClientEvent::StateChanged {
            from: ConnectionState::Connecting,
            to: ConnectionState::Connected,
        });
        assert_eq!(text, "state connecting -> connected");

        let log = ClientEvent::Log(LogMessage {
            level: LoggingLevel::Warning,
            logger: Some("db".into()),
            data: serde_json::json!("slow query"),
        });
        assert_eq!(format_event(&log), "[warning] db: slow query");
    }
}
