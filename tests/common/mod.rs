use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mcplink::config::{ServerConnectionConfig, TransportConfig};
use mcplink::transport::fake::{FakeControl, FakeTransportHandle};
use serde_json::{json, Value};
use tempfile::TempDir;

#[allow(dead_code)]
pub fn temp_config_file(contents: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("failed to create tempdir");
    let config_path = temp_dir.path().join("mcplink.yaml");
    fs::write(&config_path, contents).expect("failed to write config file");
    (temp_dir, config_path)
}

/// Connection config with short timers for tests.
#[allow(dead_code)]
pub fn fast_config(name: &str) -> ServerConnectionConfig {
    let mut config = ServerConnectionConfig::new(
        name,
        TransportConfig::Stdio {
            command: "unused".into(),
            args: vec![],
            env: Default::default(),
            working_dir: None,
        },
    );
    config.connect_timeout = Duration::from_secs(2);
    config.request_timeout = Duration::from_secs(2);
    config.reconnect_base_delay = Duration::from_millis(20);
    config.reconnect_max_delay = Duration::from_millis(200);
    config.max_reconnect_attempts = 5;
    config
}

/// Scripted server on the far side of a fake transport.
///
/// Answers `initialize` with the given capabilities, list requests with the
/// configured lists, and every other request with `{}`. Every method seen,
/// notifications included, is recorded in order.
#[allow(dead_code)]
#[derive(Clone)]
pub struct ScriptedServer {
    pub control: FakeControl,
    methods: Arc<Mutex<Vec<String>>>,
    replies: Arc<Mutex<Vec<Value>>>,
}

#[allow(dead_code)]
impl ScriptedServer {
    pub fn spawn(handle: FakeTransportHandle, capabilities: Value) -> Self {
        Self::spawn_with(handle, capabilities, |_, _| None)
    }

    /// Like [`ScriptedServer::spawn`]; `answer(method, params)` may
    /// override a result. Returning `Some(Value::Null)` leaves the request
    /// unanswered.
    pub fn spawn_with<F>(mut handle: FakeTransportHandle, capabilities: Value, answer: F) -> Self
    where
        F: Fn(&str, &Value) -> Option<Value> + Send + 'static,
    {
        let methods = Arc::new(Mutex::new(Vec::new()));
        let replies = Arc::new(Mutex::new(Vec::new()));
        let server = Self {
            control: handle.control.clone(),
            methods: Arc::clone(&methods),
            replies: Arc::clone(&replies),
        };
        let control = handle.control.clone();
        tokio::spawn(async move {
            while let Some(raw) = handle.outbound_rx.recv().await {
                let msg: Value = serde_json::from_str(&raw).expect("client sent invalid JSON");
                if msg.get("method").is_none() {
                    replies.lock().unwrap().push(msg);
                    continue;
                }
                let method = msg["method"].as_str().unwrap_or_default().to_string();
                methods.lock().unwrap().push(method.clone());
                let Some(id) = msg.get("id").cloned() else {
                    continue;
                };
                let params = msg.get("params").cloned().unwrap_or(Value::Null);
                let result = match answer(&method, &params) {
                    Some(Value::Null) => continue,
                    Some(result) => result,
                    None => default_result(&method, &capabilities),
                };
                control.inject(json!({"jsonrpc": "2.0", "id": id, "result": result}));
            }
        });
        server
    }

    /// Every method received so far.
    pub fn methods(&self) -> Vec<String> {
        self.methods.lock().unwrap().clone()
    }

    /// Responses the client sent to server-initiated requests.
    pub fn replies(&self) -> Vec<Value> {
        self.replies.lock().unwrap().clone()
    }

    pub fn count(&self, method: &str) -> usize {
        self.methods().iter().filter(|m| *m == method).count()
    }

    pub fn clear(&self) {
        self.methods.lock().unwrap().clear();
    }
}

fn default_result(method: &str, capabilities: &Value) -> Value {
    match method {
        "initialize" => json!({
            "protocolVersion": "2025-06-18",
            "capabilities": capabilities,
            "serverInfo": {"name": "scripted", "version": "1.0.0"}
        }),
        "tools/list" => json!({"tools": [{"name": "echo", "inputSchema": {"type": "object"}}]}),
        "resources/list" => json!({"resources": [{"uri": "file:///a.txt", "name": "a"}]}),
        "resources/templates/list" => json!({"resourceTemplates": []}),
        "prompts/list" => json!({"prompts": [{"name": "greet"}]}),
        _ => json!({}),
    }
}

/// Wait until `cond` holds, polling every 5ms for up to 2s.
#[allow(dead_code)]
pub async fn eventually<F: FnMut() -> bool>(mut cond: F) -> bool {
    for _ in 0..400 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}

/// Reply of a minimal tools-only server to one JSON-RPC message, `None` for
/// notifications. Shared by the network transport tests.
#[allow(dead_code)]
pub fn answer(request: &Value) -> Option<Value> {
    let id = request.get("id")?.clone();
    let method = request["method"].as_str().unwrap_or_default();
    let result = match method {
        "initialize" => json!({
            "protocolVersion": "2025-06-18",
            "capabilities": {"tools": {"listChanged": true}},
            "serverInfo": {"name": "net-server", "version": "2.0.0"}
        }),
        "tools/list" => json!({
            "tools": [{"name": "echo", "inputSchema": {"type": "object"}}]
        }),
        "tools/call" => json!({
            "content": [{
                "type": "text",
                "text": request["params"]["arguments"]["message"].as_str().unwrap_or_default()
            }]
        }),
        "ping" => json!({}),
        _ => {
            return Some(json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {"code": -32601, "message": format!("Method not found: {method}")}
            }))
        }
    };
    Some(json!({"jsonrpc": "2.0", "id": id, "result": result}))
}
