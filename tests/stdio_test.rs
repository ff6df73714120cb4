//! Stdio transport end-to-end tests
//!
//! Runs the full client stack against the `mcp_test_server` helper binary:
//! process spawn, handshake, gated discovery, tool calls, notifications,
//! stderr diagnostics and process exit.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use mcplink::config::{ServerConnectionConfig, TransportConfig};
use mcplink::error::McpError;
use mcplink::events::ClientEvent;
use mcplink::session::{ConnectionState, McpClient};
use serde_json::{json, Value};

/// Path of the `mcp_test_server` binary.
///
/// Cargo sets `CARGO_BIN_EXE_mcp_test_server` for integration tests of the
/// same package; the `target/debug` fallback helps manual runs.
fn test_server_exe() -> PathBuf {
    if let Ok(p) = std::env::var("CARGO_BIN_EXE_mcp_test_server") {
        return PathBuf::from(p);
    }
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("target")
        .join("debug")
        .join("mcp_test_server")
}

fn stdio_client() -> McpClient {
    let mut config = ServerConnectionConfig::new(
        "test-server",
        TransportConfig::Stdio {
            command: test_server_exe().to_string_lossy().into_owned(),
            args: vec![],
            env: HashMap::new(),
            working_dir: None,
        },
    );
    config.connect_timeout = Duration::from_secs(10);
    config.request_timeout = Duration::from_secs(10);
    config.auto_reconnect = false;
    McpClient::new(config).unwrap()
}

async fn stats(client: &McpClient) -> Value {
    let result = client.call_tool("stats", None).await.unwrap();
    serde_json::from_str(&result.to_text()).unwrap()
}

#[tokio::test]
async fn test_handshake_and_discovery_over_stdio() {
    let client = stdio_client();
    client.connect().await.unwrap();

    assert_eq!(client.state(), ConnectionState::Connected);
    let info = client.server_info().await.unwrap();
    assert_eq!(info.name, "mcp-test-server");
    assert_eq!(client.protocol_version().await.as_deref(), Some("2025-06-18"));

    let mut names: Vec<String> = client.tools().await.into_iter().map(|t| t.name).collect();
    names.sort();
    assert_eq!(names, vec!["echo", "exit", "notify", "stats"]);

    // Only tools were advertised: exactly one tools/list, nothing else listed.
    let counts = stats(&client).await;
    assert_eq!(counts["initialize"], json!(1));
    assert_eq!(counts["notifications/initialized"], json!(1));
    assert_eq!(counts["tools/list"], json!(1));
    assert!(counts.get("resources/list").is_none());
    assert!(counts.get("resources/templates/list").is_none());
    assert!(counts.get("prompts/list").is_none());

    client.disconnect().await;
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_echo_tool_call() {
    let client = stdio_client();
    client.connect().await.unwrap();

    let result = client
        .call_tool("echo", Some(json!({"message": "hello over stdio"})))
        .await
        .unwrap();
    assert!(!result.is_error);
    assert_eq!(result.to_text(), "hello over stdio");

    client.ping().await.unwrap();
    client.disconnect().await;
}

#[tokio::test]
async fn test_unknown_method_is_remote_error() {
    let client = stdio_client();
    client.connect().await.unwrap();

    match client.request("completion/complete", None).await.unwrap_err() {
        McpError::Remote { code, .. } => assert_eq!(code, -32601),
        other => panic!("unexpected {other:?}"),
    }
    client.disconnect().await;
}

#[tokio::test]
async fn test_list_changed_notification_triggers_refresh() {
    let client = stdio_client();
    let mut events = client.subscribe_events();
    client.connect().await.unwrap();

    client.call_tool("notify", None).await.unwrap();

    let mut saw_change = false;
    let mut saw_stderr = false;
    while !(saw_change && saw_stderr) {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("missing events")
            .unwrap();
        match event {
            ClientEvent::ToolsListChanged => saw_change = true,
            ClientEvent::Log(message) => {
                if message.data.as_str().unwrap_or_default().contains("listening on stdio") {
                    saw_stderr = true;
                }
            }
            _ => {}
        }
    }

    let mut refreshed = false;
    for _ in 0..100 {
        if stats(&client).await["tools/list"] == json!(2) {
            refreshed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(refreshed, "tools/list was not re-requested");
    client.disconnect().await;
}

#[tokio::test]
async fn test_process_exit_rejects_call_and_disconnects() {
    let client = stdio_client();
    client.connect().await.unwrap();

    let err = client.call_tool("exit", None).await.unwrap_err();
    assert!(
        matches!(err, McpError::ConnectionClosed(_)),
        "expected connection loss, got {err:?}"
    );

    let mut state = client.watch_state();
    tokio::time::timeout(
        Duration::from_secs(5),
        state.wait_for(|s| *s == ConnectionState::Disconnected),
    )
    .await
    .unwrap()
    .unwrap();
    assert!(client.tools().await.is_empty());
}

#[tokio::test]
async fn test_missing_executable_fails_connect() {
    let mut config = ServerConnectionConfig::new(
        "missing",
        TransportConfig::Stdio {
            command: "/nonexistent/mcp-server-binary".into(),
            args: vec![],
            env: HashMap::new(),
            working_dir: None,
        },
    );
    config.auto_reconnect = false;
    let client = McpClient::new(config).unwrap();

    let err = client.connect().await.unwrap_err();
    assert!(err.is_transport_failure(), "{err:?}");
    assert_eq!(client.state(), ConnectionState::Error);
}
