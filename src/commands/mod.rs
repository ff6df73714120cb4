//! Command handlers for the mcplink binary
//!
//! Each subcommand of [`crate::cli::Commands`] maps to one handler here.
//! Handlers print to stdout and return the library error type; `main`
//! converts failures into a non-zero exit.

pub mod invoke;
pub mod servers;
pub mod watch;

use std::collections::HashMap;

use serde_json::Value;

use crate::config::Config;
use crate::error::{McpError, Result};
use crate::session::McpClient;

/// Build and connect the client for `server`.
pub(crate) async fn connect(config: &Config, server: &str) -> Result<McpClient> {
    let client = McpClient::new(config.server_config(server)?)?;
    tracing::debug!(server, "connecting");
    client.connect().await?;
    Ok(client)
}

/// Parse a `--args` value into a JSON object.
pub(crate) fn parse_json_object(raw: Option<&str>) -> Result<Option<Value>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let value: Value = serde_json::from_str(raw)?;
    if !value.is_object() {
        return Err(McpError::Config(format!(
            "arguments must be a JSON object, got: {raw}"
        )));
    }
    Ok(Some(value))
}

/// Parse a `--args` value into string prompt arguments.
///
/// Non-string values are rendered as JSON text.
pub(crate) fn parse_prompt_args(raw: Option<&str>) -> Result<HashMap<String, String>> {
    let Some(Value::Object(map)) = parse_json_object(raw)? else {
        return Ok(HashMap::new());
    };
    Ok(map
        .into_iter()
        .map(|(k, v)| {
            let v = match v {
                Value::String(s) => s,
                other => other.to_string(),
            };
            (k, v)
        })
        .collect())
}

/// Shorten `text` to at most `max` characters for table cells.
pub(crate) fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let kept: String = text.chars().take(max.saturating_sub(3)).collect();
    format!("{kept}...")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_json_object() {
        assert_eq!(parse_json_object(None).unwrap(), None);
        let v = parse_json_object(Some(r#"{"a": 1}"#)).unwrap().unwrap();
        assert_eq!(v["a"], 1);
        assert!(matches!(
            parse_json_object(Some("[1, 2]")).unwrap_err(),
            McpError::Config(_)
        ));
        assert!(matches!(
            parse_json_object(Some("{not json")).unwrap_err(),
            McpError::Serialization(_)
        ));
    }

    #[test]
    fn test_parse_prompt_args_stringifies_values() {
        let args = parse_prompt_args(Some(r#"{"lang": "rust", "depth": 2}"#)).unwrap();
        assert_eq!(args["lang"], "rust");
        assert_eq!(args["depth"], "2");
        assert!(parse_prompt_args(None).unwrap().is_empty());
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghijkl", 8), "abcde...");
    }
}
