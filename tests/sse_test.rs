//! SSE transport tests against a `wiremock` server
//!
//! Requests go out as POSTs to `/mcp`; server notifications arrive on the
//! GET stream at `/mcp/sse`. wiremock returns the stream body in one piece
//! and then ends it, which doubles as a loss of the event stream.

mod common;

use std::collections::HashMap;
use std::time::Duration;

use mcplink::config::{ServerConnectionConfig, TransportConfig};
use mcplink::events::ClientEvent;
use mcplink::session::{ConnectionState, McpClient};
use serde_json::Value;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

struct RpcResponder;

impl Respond for RpcResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let message: Value = serde_json::from_slice(&request.body).unwrap();
        match common::answer(&message) {
            Some(reply) => ResponseTemplate::new(200).set_body_json(reply),
            None => ResponseTemplate::new(202),
        }
    }
}

fn sse_config(server: &MockServer) -> ServerConnectionConfig {
    let mut config = ServerConnectionConfig::new(
        "sse",
        TransportConfig::Sse {
            url: format!("{}/mcp", server.uri()).parse().unwrap(),
            stream_url: None,
            headers: HashMap::new(),
        },
    );
    config.connect_timeout = Duration::from_secs(5);
    config.request_timeout = Duration::from_secs(5);
    config.auto_reconnect = false;
    config
}

#[tokio::test]
async fn test_stream_notifications_are_delivered_then_loss_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/mcp"))
        .respond_with(RpcResponder)
        .mount(&server)
        .await;
    let stream = concat!(
        ": keep-alive\n\n",
        "event: ping\ndata: [PING]\n\n",
        "id: 1\ndata: {\"jsonrpc\":\"2.0\",\"method\":\"notifications/tools/list_changed\"}\n\n",
        "id: 2\ndata: {\"jsonrpc\":\"2.0\",\"method\":\"notifications/message\",",
        "\"params\":{\"level\":\"info\",\"data\":\"hello\"}}\n\n",
    );
    Mock::given(method("GET"))
        .and(path("/mcp/sse"))
        .and(header("Accept", "text/event-stream"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(stream.as_bytes().to_vec(), "text/event-stream"))
        .mount(&server)
        .await;

    let client = McpClient::new(sse_config(&server)).unwrap();
    let mut events = client.subscribe_events();
    let mut state = client.watch_state();
    client.connect().await.unwrap();

    let mut saw_change = false;
    let mut saw_log = false;
    while !(saw_change && saw_log) {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("stream notifications not delivered")
            .unwrap();
        match event {
            ClientEvent::ToolsListChanged => saw_change = true,
            ClientEvent::Log(message) if message.data == Value::from("hello") => saw_log = true,
            _ => {}
        }
    }

    // The stream ended; without auto-reconnect the client disconnects.
    tokio::time::timeout(
        Duration::from_secs(5),
        state.wait_for(|s| *s == ConnectionState::Disconnected),
    )
    .await
    .unwrap()
    .unwrap();
}

#[tokio::test]
async fn test_stream_open_failure_fails_connect() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(RpcResponder)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(405))
        .mount(&server)
        .await;

    let client = McpClient::new(sse_config(&server)).unwrap();
    let err = client.connect().await.unwrap_err();
    assert!(err.to_string().contains("405"), "{err}");
    assert_eq!(client.state(), ConnectionState::Error);
}

#[tokio::test]
async fn test_explicit_stream_url_is_used() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(RpcResponder)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/events"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(b": idle\n\n".to_vec(), "text/event-stream"))
        .expect(1..)
        .mount(&server)
        .await;

    let mut config = sse_config(&server);
    if let TransportConfig::Sse { stream_url, .. } = &mut config.transport {
        *stream_url = Some(format!("{}/events", server.uri()).parse().unwrap());
    }
    let client = McpClient::new(config).unwrap();
    client.connect().await.unwrap();
    client.disconnect().await;
}
