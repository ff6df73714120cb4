//! `servers` and `inspect` commands

use colored::Colorize;
use prettytable::{format, row, Table};

use crate::config::{Config, TransportConfig};
use crate::error::Result;
use crate::protocol::ServerCapabilityFlag;
use crate::types::ServerCapabilities;

use super::{connect, truncate};

/// List configured servers without connecting to them.
pub fn list_servers(config: &Config) -> Result<()> {
    if config.servers.is_empty() {
        println!("{}", "No servers configured.".yellow());
        return Ok(());
    }

    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);
    table.add_row(row![
        "Name".bold(),
        "Transport".bold(),
        "Target".bold(),
        "Enabled".bold()
    ]);

    for (name, entry) in &config.servers {
        let (transport, target) = match entry.resolve(name, &config.defaults, &config.client) {
            Ok(resolved) => (
                resolved.transport.kind().to_string(),
                describe_target(&resolved.transport),
            ),
            Err(e) => ("?".to_string(), format!("invalid: {e}").red().to_string()),
        };
        let enabled = if entry.enabled {
            "yes".green()
        } else {
            "no".dimmed()
        };
        table.add_row(row![name.cyan(), transport, truncate(&target, 60), enabled]);
    }

    println!("\nConfigured servers:");
    table.printstd();
    println!();
    Ok(())
}

fn describe_target(transport: &TransportConfig) -> String {
    match transport {
        TransportConfig::Stdio { command, args, .. } => {
            std::iter::once(command.as_str())
                .chain(args.iter().map(String::as_str))
                .collect::<Vec<_>>()
                .join(" ")
        }
        TransportConfig::Sse { url, .. }
        | TransportConfig::WebSocket { url, .. }
        | TransportConfig::Http { url, .. } => url.to_string(),
    }
}

/// Connect to `server` and print what it offers.
pub async fn inspect(config: &Config, server: &str) -> Result<()> {
    let client = connect(config, server).await?;

    if let Some(info) = client.server_info().await {
        println!(
            "\n{} {} {}",
            info.name.bold(),
            info.version,
            format!("(protocol {})", client.protocol_version().await.unwrap_or_default()).dimmed()
        );
    }
    if let Some(instructions) = client.instructions().await {
        println!("{}", instructions.italic());
    }

    let caps = client.server_capabilities().await.unwrap_or_default();
    println!("\nCapabilities: {}", describe_capabilities(&caps));

    let tools = client.tools().await;
    if !tools.is_empty() {
        let mut table = Table::new();
        table.add_row(row!["Tool".bold(), "Description".bold()]);
        for tool in &tools {
            table.add_row(row![
                tool.name.cyan(),
                truncate(tool.description.as_deref().unwrap_or(""), 70)
            ]);
        }
        println!("\nTools ({}):", tools.len());
        table.printstd();
    }

    let resources = client.resources().await;
    if !resources.is_empty() {
        let mut table = Table::new();
        table.add_row(row!["URI".bold(), "Name".bold(), "MIME type".bold()]);
        for resource in &resources {
            table.add_row(row![
                resource.uri.cyan(),
                resource.name,
                resource.mime_type.as_deref().unwrap_or("-")
            ]);
        }
        println!("\nResources ({}):", resources.len());
        table.printstd();
    }

    let templates = client.resource_templates().await;
    if !templates.is_empty() {
        println!("\nResource templates ({}):", templates.len());
        for template in &templates {
            println!("  {} {}", template.uri_template.cyan(), template.name.dimmed());
        }
    }

    let prompts = client.prompts().await;
    if !prompts.is_empty() {
        let mut table = Table::new();
        table.add_row(row!["Prompt".bold(), "Arguments".bold(), "Description".bold()]);
        for prompt in &prompts {
            let args = prompt
                .arguments
                .iter()
                .map(|a| {
                    if a.required {
                        format!("{}*", a.name)
                    } else {
                        a.name.clone()
                    }
                })
                .collect::<Vec<_>>()
                .join(", ");
            table.add_row(row![
                prompt.name.cyan(),
                args,
                truncate(prompt.description.as_deref().unwrap_or(""), 50)
            ]);
        }
        println!("\nPrompts ({}):", prompts.len());
        table.printstd();
    }
    println!();

    client.disconnect().await;
    Ok(())
}

fn describe_capabilities(caps: &ServerCapabilities) -> String {
    let flags = [
        ServerCapabilityFlag::Tools,
        ServerCapabilityFlag::Resources,
        ServerCapabilityFlag::ResourceSubscribe,
        ServerCapabilityFlag::Prompts,
        ServerCapabilityFlag::Logging,
    ];
    let supported: Vec<&str> = flags
        .into_iter()
        .filter(|flag| caps.capable(*flag))
        .map(|flag| flag.as_str())
        .collect();
    if supported.is_empty() {
        "none".to_string()
    } else {
        supported.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_describe_target_stdio() {
        let transport = TransportConfig::Stdio {
            command: "npx".into(),
            args: vec!["-y".into(), "server".into()],
            env: HashMap::new(),
            working_dir: None,
        };
        assert_eq!(describe_target(&transport), "npx -y server");
    }

    #[test]
    fn test_describe_capabilities() {
        let caps: ServerCapabilities = serde_json::from_value(serde_json::json!({
            "tools": {},
            "resources": {"subscribe": true}
        }))
        .unwrap();
        let text = describe_capabilities(&caps);
        assert!(text.contains("tools"));
        assert!(!text.contains("prompts"));
        assert_eq!(describe_capabilities(&ServerCapabilities::default()), "none");
    }
}
