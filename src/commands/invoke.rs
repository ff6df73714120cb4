//! `call`, `read` and `prompt` commands

use colored::Colorize;

use crate::config::Config;
use crate::error::{McpError, Result};
use crate::types::{Content, ResourceContents};

use super::{connect, parse_json_object, parse_prompt_args};

/// Invoke `tool` on `server` and print its rendered result.
///
/// # Errors
///
/// Returns [`McpError::Remote`] when the tool reports `isError`, after the
/// error text has been printed.
pub async fn call_tool(config: &Config, server: &str, tool: &str, args: Option<&str>) -> Result<()> {
    let arguments = parse_json_object(args)?;
    let client = connect(config, server).await?;
    let outcome = client.call_tool(tool, arguments).await;
    client.disconnect().await;
    let result = outcome?;

    let text = result.to_text();
    if result.is_error {
        eprintln!("{}", text.red());
        return Err(McpError::Remote {
            code: crate::types::error_codes::SERVER_ERROR,
            message: format!("tool '{tool}' reported an error"),
        });
    }
    println!("{text}");
    if let Some(structured) = &result.structured_content {
        println!("{}", serde_json::to_string_pretty(structured)?.dimmed());
    }
    Ok(())
}

/// Read `uri` from `server` and print its contents.
pub async fn read_resource(config: &Config, server: &str, uri: &str) -> Result<()> {
    let client = connect(config, server).await?;
    let outcome = client.read_resource(uri).await;
    client.disconnect().await;

    for contents in outcome?.contents {
        print_contents(&contents);
    }
    Ok(())
}

fn print_contents(contents: &ResourceContents) {
    let mime = contents.mime_type.as_deref().unwrap_or("unknown");
    println!("{}", format!("--- {} ({})", contents.uri, mime).dimmed());
    match (&contents.text, &contents.blob) {
        (Some(text), _) => println!("{text}"),
        (None, Some(blob)) => println!("[binary: {} base64 chars]", blob.len()),
        (None, None) => println!("[empty]"),
    }
}

/// Render prompt `name` from `server` and print its messages.
pub async fn get_prompt(config: &Config, server: &str, name: &str, args: Option<&str>) -> Result<()> {
    let arguments = parse_prompt_args(args)?;
    let client = connect(config, server).await?;
    let outcome = client.get_prompt(name, arguments).await;
    client.disconnect().await;
    let result = outcome?;

    if let Some(description) = &result.description {
        println!("{}", description.italic());
    }
    for message in &result.messages {
        let role = match message.role.as_str() {
            "user" => message.role.cyan(),
            "assistant" => message.role.green(),
            _ => message.role.normal(),
        };
        let body = match &message.content {
            Content::Text { text } => text.clone(),
            other => other.to_text(),
        };
        println!("{}: {}", role.bold(), body);
    }
    Ok(())
}
