//! WebSocket transport
//!
//! [`WebSocketTransport`] keeps one full-duplex WebSocket per connection.
//! Each text frame (or UTF-8 binary frame) carries one JSON-RPC message.
//! Frames that are not valid JSON are logged and dropped. A close frame, a
//! read error or the end of the stream is reported as
//! [`TransportEvent::Closed`] unless [`Transport::close`] was called first.

use std::collections::HashMap;

use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;

use crate::error::{McpError, Result};
use crate::transport::{Inbound, Transport, TransportEvent, TransportKind};

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Full-duplex WebSocket transport.
#[derive(Debug)]
pub struct WebSocketTransport {
    url: url::Url,
    /// Extra headers sent with the upgrade request.
    headers: HashMap<String, String>,
    connection: Mutex<Option<WsConnection>>,
}

#[derive(Debug)]
struct WsConnection {
    outbound_tx: mpsc::UnboundedSender<String>,
    shutdown: CancellationToken,
}

impl WebSocketTransport {
    /// Describe a WebSocket transport. The socket is opened by
    /// [`Transport::connect`].
    pub fn new(url: url::Url, headers: HashMap<String, String>) -> Self {
        Self {
            url,
            headers,
            connection: Mutex::new(None),
        }
    }

    fn upgrade_request(
        &self,
    ) -> Result<tokio_tungstenite::tungstenite::handshake::client::Request> {
        let mut request = self.url.as_str().into_client_request()?;
        for (k, v) in &self.headers {
            let name = HeaderName::from_bytes(k.as_bytes())
                .map_err(|e| McpError::Config(format!("invalid header name `{}`: {}", k, e)))?;
            let value = HeaderValue::from_str(v)
                .map_err(|e| McpError::Config(format!("invalid header value for `{}`: {}", k, e)))?;
            request.headers_mut().insert(name, value);
        }
        Ok(request)
    }
}

#[async_trait::async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self) -> Result<Inbound> {
        self.close().await?;

        let request = self.upgrade_request()?;
        let (ws_stream, _) = connect_async(request).await.map_err(|e| {
            McpError::Transport(format!("WebSocket connect to {} failed: {}", self.url, e))
        })?;
        tracing::debug!("WebSocket connected to {}", self.url);

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        tokio::spawn(run_connection(
            ws_stream,
            outbound_rx,
            event_tx,
            shutdown.clone(),
        ));

        *self.connection.lock().await = Some(WsConnection {
            outbound_tx,
            shutdown,
        });
        Ok(event_rx)
    }

    async fn send(&self, message: String) -> Result<()> {
        let guard = self.connection.lock().await;
        let connection = guard
            .as_ref()
            .ok_or_else(|| McpError::Transport("websocket transport is not connected".into()))?;
        connection
            .outbound_tx
            .send(message)
            .map_err(|_| McpError::Transport("websocket writer has exited".into()))
    }

    async fn close(&self) -> Result<()> {
        if let Some(connection) = self.connection.lock().await.take() {
            connection.shutdown.cancel();
        }
        Ok(())
    }

    fn kind(&self) -> TransportKind {
        TransportKind::WebSocket
    }
}

/// Pump frames in both directions until shutdown or loss.
async fn run_connection(
    ws_stream: WsStream,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
    event_tx: mpsc::UnboundedSender<TransportEvent>,
    shutdown: CancellationToken,
) {
    let (mut ws_sink, mut ws_source) = ws_stream.split();

    let reason = loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                let _ = ws_sink.send(Message::Close(None)).await;
                return;
            }

            Some(msg) = outbound_rx.recv() => {
                if let Err(e) = ws_sink.send(Message::Text(msg.into())).await {
                    break format!("websocket send failed: {}", e);
                }
            }

            frame = ws_source.next() => {
                let text = match frame {
                    Some(Ok(Message::Text(text))) => text.as_str().to_string(),
                    Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                        Ok(text) => text,
                        Err(_) => {
                            tracing::debug!("dropping non-UTF-8 binary frame");
                            continue;
                        }
                    },
                    Some(Ok(Message::Ping(data))) => {
                        let _ = ws_sink.send(Message::Pong(data)).await;
                        continue;
                    }
                    Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => continue,
                    Some(Ok(Message::Close(frame))) => {
                        break match frame {
                            Some(f) => format!("server closed websocket: {} {}", f.code, f.reason.as_str()),
                            None => "server closed websocket".to_string(),
                        };
                    }
                    Some(Err(e)) => break format!("websocket read failed: {}", e),
                    None => break "websocket stream ended".to_string(),
                };

                if serde_json::from_str::<serde_json::Value>(&text).is_err() {
                    tracing::debug!("dropping non-JSON websocket frame: {}", text);
                    continue;
                }
                if event_tx.send(TransportEvent::Message(text)).is_err() {
                    return;
                }
            }
        }
    };

    if !shutdown.is_cancelled() {
        tracing::info!("WebSocket disconnected: {}", reason);
        let _ = event_tx.send(TransportEvent::Closed(reason));
    }
}
