//! MCP test server binary for integration tests
//!
//! A minimal server speaking newline-delimited JSON-RPC over stdin/stdout,
//! used to exercise the stdio transport end to end.
//!
//! # Behavior
//!
//! - Prints a non-JSON banner on stdout and a line on stderr at startup, as
//!   real launchers often do.
//! - `initialize` advertises `capabilities: {tools: {}}` only.
//! - `tools/list` returns `echo`, `stats`, `notify` and `exit`.
//! - `tools/call`:
//!   - `echo` returns `arguments.message`
//!   - `stats` returns a JSON object counting every method received so far
//!   - `notify` sends `notifications/tools/list_changed` before answering
//!   - `exit` terminates the process without answering
//! - `ping` returns `{}`.
//! - Any other request gets `-32601 Method not found`.

use std::collections::BTreeMap;
use std::io::{self, BufRead, Write};

use serde_json::{json, Value};

fn main() {
    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut out = stdout.lock();

    let _ = writeln!(out, "mcp_test_server ready");
    let _ = out.flush();
    eprintln!("mcp_test_server: listening on stdio");

    let mut counts: BTreeMap<String, u64> = BTreeMap::new();

    for line in stdin.lock().lines() {
        let Ok(line) = line else {
            break;
        };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let request: Value = match serde_json::from_str(trimmed) {
            Ok(v) => v,
            Err(_) => {
                write_message(&mut out, &make_error(&Value::Null, -32700, "Parse error"));
                continue;
            }
        };

        let method = request
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        *counts.entry(method.clone()).or_default() += 1;

        // Notifications get no response.
        let Some(id) = request.get("id").cloned() else {
            continue;
        };

        let response = match method.as_str() {
            "initialize" => handle_initialize(&id),
            "tools/list" => handle_tools_list(&id),
            "tools/call" => {
                let params = request.get("params").cloned().unwrap_or(Value::Null);
                match params.get("name").and_then(Value::as_str).unwrap_or("") {
                    "echo" => {
                        let message = params
                            .get("arguments")
                            .and_then(|a| a.get("message"))
                            .and_then(Value::as_str)
                            .unwrap_or("");
                        text_result(&id, message)
                    }
                    "stats" => text_result(&id, &json!(counts).to_string()),
                    "notify" => {
                        write_message(
                            &mut out,
                            &json!({"jsonrpc": "2.0", "method": "notifications/tools/list_changed"}),
                        );
                        text_result(&id, "notified")
                    }
                    "exit" => {
                        eprintln!("mcp_test_server: exiting on request");
                        std::process::exit(0);
                    }
                    other => make_error(&id, -32602, &format!("Unknown tool: {other}")),
                }
            }
            "ping" => json!({"jsonrpc": "2.0", "id": id, "result": {}}),
            _ => make_error(&id, -32601, &format!("Method not found: {method}")),
        };

        if !write_message(&mut out, &response) {
            break;
        }
    }
}

fn write_message(out: &mut impl Write, message: &Value) -> bool {
    writeln!(out, "{message}").is_ok() && out.flush().is_ok()
}

fn handle_initialize(id: &Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": {
            "protocolVersion": "2025-06-18",
            "capabilities": {
                "tools": {}
            },
            "serverInfo": {
                "name": "mcp-test-server",
                "version": "0.1.0"
            }
        }
    })
}

fn handle_tools_list(id: &Value) -> Value {
    let object = json!({"type": "object"});
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": {
            "tools": [
                {
                    "name": "echo",
                    "description": "Echoes input",
                    "inputSchema": {
                        "type": "object",
                        "properties": {"message": {"type": "string"}}
                    }
                },
                {"name": "stats", "description": "Counts received methods", "inputSchema": object},
                {"name": "notify", "description": "Sends tools/list_changed", "inputSchema": object},
                {"name": "exit", "description": "Terminates the server", "inputSchema": object}
            ]
        }
    })
}

fn text_result(id: &Value, text: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": {
            "content": [{"type": "text", "text": text}],
            "isError": false
        }
    })
}

fn make_error(id: &Value, code: i32, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {"code": code, "message": message}
    })
}
