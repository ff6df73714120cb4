//! Server-sent-events transport
//!
//! [`SseTransport`] sends every outbound message as an HTTP POST (through
//! the same machinery as [`crate::transport::http::HttpTransport`]) and
//! receives server-initiated notifications over a long-lived GET stream.
//!
//! The stream is opened by [`Transport::after_handshake`], i.e. only once
//! `initialize` completed over plain request/response. If the stream ends or
//! fails while the transport is still open, the loss is reported as
//! [`TransportEvent::Closed`]; a deliberate [`Transport::close`] is silent.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::Stream;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::error::{McpError, Result};
use crate::transport::http::HttpPoster;
use crate::transport::{Inbound, Transport, TransportEvent, TransportKind};

/// HTTP POST plus event-stream transport.
#[derive(Debug)]
pub struct SseTransport {
    poster: HttpPoster,
    /// GET target for the notification stream.
    stream_url: url::Url,
    /// Sender for the current connection's inbound channel.
    inbound: Mutex<Option<mpsc::UnboundedSender<TransportEvent>>>,
    /// Cancels the stream reader on deliberate close.
    stream_token: Mutex<Option<CancellationToken>>,
}

impl SseTransport {
    /// Construct a transport posting to `endpoint`.
    ///
    /// When `stream_url` is `None` the event stream is read from
    /// `{endpoint}/sse`.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::Config`] if the derived stream URL is invalid and
    /// [`McpError::Http`] if the HTTP client cannot be built.
    pub fn new(
        endpoint: url::Url,
        stream_url: Option<url::Url>,
        headers: HashMap<String, String>,
        timeout: Duration,
    ) -> Result<Self> {
        let stream_url = match stream_url {
            Some(url) => url,
            None => default_stream_url(&endpoint)?,
        };
        Ok(Self {
            poster: HttpPoster::new(endpoint, headers, timeout)?,
            stream_url,
            inbound: Mutex::new(None),
            stream_token: Mutex::new(None),
        })
    }

    /// URL the notification stream is read from.
    pub fn stream_url(&self) -> &url::Url {
        &self.stream_url
    }
}

/// `{endpoint}/sse`, keeping the endpoint's path.
pub fn default_stream_url(endpoint: &url::Url) -> Result<url::Url> {
    let base = endpoint.as_str().trim_end_matches('/');
    url::Url::parse(&format!("{}/sse", base))
        .map_err(|e| McpError::Config(format!("invalid stream url for {}: {}", endpoint, e)))
}

#[async_trait::async_trait]
impl Transport for SseTransport {
    async fn connect(&self) -> Result<Inbound> {
        self.close().await?;
        let (tx, rx) = mpsc::unbounded_channel();
        *self.inbound.lock().await = Some(tx);
        Ok(rx)
    }

    async fn send(&self, message: String) -> Result<()> {
        let tx = self
            .inbound
            .lock()
            .await
            .clone()
            .ok_or_else(|| McpError::Transport("sse transport is not connected".into()))?;
        self.poster.post(message, &tx).await
    }

    /// Open the GET event stream and start forwarding its events.
    async fn after_handshake(&self) -> Result<()> {
        let tx = self
            .inbound
            .lock()
            .await
            .clone()
            .ok_or_else(|| McpError::Transport("sse transport is not connected".into()))?;

        let response = self.poster.get_stream(&self.stream_url).await?;
        tracing::debug!("opened event stream {}", self.stream_url);

        let token = CancellationToken::new();
        if let Some(previous) = self.stream_token.lock().await.replace(token.clone()) {
            previous.cancel();
        }

        let last_event_id = self.poster.last_event_id();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = pump_event_stream(response.bytes_stream(), tx.clone(), last_event_id) => {
                    if !token.is_cancelled() {
                        let _ = tx.send(TransportEvent::Closed("event stream ended".into()));
                    }
                }
            }
        });

        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if let Some(token) = self.stream_token.lock().await.take() {
            token.cancel();
        }
        if self.inbound.lock().await.take().is_some() {
            self.poster.terminate_session().await;
        }
        Ok(())
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Sse
    }
}

// ---------------------------------------------------------------------------
// Event stream decoding
// ---------------------------------------------------------------------------

/// One dispatched event: the fields between two blank lines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub id: Option<String>,
    pub event: Option<String>,
    /// `data:` lines joined with `\n`
    pub data: String,
}

impl SseEvent {
    /// Parse one event block. Comment lines (`:`) and `retry:` are skipped.
    pub fn parse(block: &str) -> Self {
        let mut parsed = SseEvent::default();
        let mut data = Vec::new();
        for line in block.lines() {
            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            match field {
                "data" => data.push(value),
                "id" => parsed.id = Some(value.trim().to_string()),
                "event" => parsed.event = Some(value.trim().to_string()),
                _ => {}
            }
        }
        parsed.data = data.join("\n");
        parsed
    }

    /// The JSON-RPC payload, or `None` for keep-alives and empty events.
    pub fn payload(&self) -> Option<&str> {
        let is_ping = self
            .event
            .as_deref()
            .is_some_and(|e| e.eq_ignore_ascii_case("ping"));
        let data = self.data.trim();
        if is_ping || data.is_empty() || data.eq_ignore_ascii_case("[ping]") {
            None
        } else {
            Some(data)
        }
    }
}

/// Splits raw body bytes into [`SseEvent`]s.
///
/// Bytes are buffered until a blank line ends the block, so a multi-byte
/// character or a CRLF pair cut by a chunk boundary is reassembled before
/// anything is decoded.
#[derive(Debug, Default)]
struct EventSplitter {
    buffer: BytesMut,
}

impl EventSplitter {
    fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(end) = block_end(&self.buffer) {
            let block = self.buffer.split_to(end);
            events.push(SseEvent::parse(&String::from_utf8_lossy(&block)));
        }
        events
    }

    /// Whatever is left once the stream ends without a final blank line.
    fn finish(self) -> Option<SseEvent> {
        let rest = String::from_utf8_lossy(&self.buffer);
        (!rest.trim().is_empty()).then(|| SseEvent::parse(&rest))
    }
}

/// Index just past the first blank line in `buf`: a `\n` followed by
/// `\n` or `\r\n`. Covers both `\n\n` and `\r\n\r\n` framing.
fn block_end(buf: &[u8]) -> Option<usize> {
    buf.iter().enumerate().find_map(|(i, &b)| {
        if b != b'\n' {
            return None;
        }
        match &buf[i + 1..] {
            [b'\n', ..] => Some(i + 2),
            [b'\r', b'\n', ..] => Some(i + 3),
            _ => None,
        }
    })
}

/// Read an event stream to its end, forwarding each payload as a
/// [`TransportEvent::Message`] and remembering the latest event id.
///
/// Returns when the body ends or a chunk fails to arrive.
pub async fn pump_event_stream(
    body: impl Stream<Item = reqwest::Result<Bytes>>,
    inbound: mpsc::UnboundedSender<TransportEvent>,
    last_event_id: Arc<RwLock<Option<String>>>,
) {
    use futures::StreamExt;

    tokio::pin!(body);
    let mut splitter = EventSplitter::default();

    while let Some(chunk) = body.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::debug!("event stream read failed: {}", e);
                break;
            }
        };
        for event in splitter.push(&chunk) {
            deliver(event, &inbound, &last_event_id).await;
        }
    }
    if let Some(event) = splitter.finish() {
        deliver(event, &inbound, &last_event_id).await;
    }
}

async fn deliver(
    event: SseEvent,
    inbound: &mpsc::UnboundedSender<TransportEvent>,
    last_event_id: &Arc<RwLock<Option<String>>>,
) {
    if let Some(id) = &event.id {
        *last_event_id.write().await = Some(id.clone());
    }
    if let Some(payload) = event.payload() {
        let _ = inbound.send(TransportEvent::Message(payload.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn run(body: &'static [u8]) -> (Vec<TransportEvent>, Option<String>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let last_event_id = Arc::new(RwLock::new(None::<String>));
        let byte_stream = futures::stream::iter(vec![Ok(Bytes::from_static(body))]);
        pump_event_stream(byte_stream, tx, Arc::clone(&last_event_id)).await;
        let mut events = Vec::new();
        while let Ok(e) = rx.try_recv() {
            events.push(e);
        }
        let stored = last_event_id.read().await.clone();
        (events, stored)
    }

    fn message(s: &str) -> TransportEvent {
        TransportEvent::Message(s.to_string())
    }

    #[tokio::test]
    async fn test_single_data_event_forwarded() {
        let (events, _) = run(b"data: {\"jsonrpc\":\"2.0\"}\n\n").await;
        assert_eq!(events, vec![message(r#"{"jsonrpc":"2.0"}"#)]);
    }

    #[tokio::test]
    async fn test_two_events_both_forwarded() {
        let (events, _) = run(b"data: first\n\ndata: second\n\n").await;
        assert_eq!(events, vec![message("first"), message("second")]);
    }

    #[tokio::test]
    async fn test_crlf_framing_is_accepted() {
        let (events, _) = run(b"data: one\r\n\r\ndata: two\r\n\r\n").await;
        assert_eq!(events, vec![message("one"), message("two")]);
    }

    #[tokio::test]
    async fn test_ping_events_dropped() {
        let (events, _) =
            run(b"event: ping\ndata: ignored\n\ndata: [PING]\n\ndata: real\n\n").await;
        assert_eq!(events, vec![message("real")]);
    }

    #[tokio::test]
    async fn test_comment_only_event_dropped() {
        let (events, _) = run(b": keepalive\n\ndata: real\n\n").await;
        assert_eq!(events, vec![message("real")]);
    }

    #[tokio::test]
    async fn test_multiline_data_joined() {
        let (events, _) = run(b"data: {\"a\":\ndata: 1}\n\n").await;
        assert_eq!(events, vec![message("{\"a\":\n1}")]);
    }

    #[tokio::test]
    async fn test_trailing_event_without_blank_line() {
        let (events, _) = run(b"data: tail").await;
        assert_eq!(events, vec![message("tail")]);
    }

    #[test]
    fn test_parse_keeps_unspaced_values() {
        let event = SseEvent::parse("event:message\nid:7\ndata:{}\nretry: 100\n");
        assert_eq!(event.event.as_deref(), Some("message"));
        assert_eq!(event.id.as_deref(), Some("7"));
        assert_eq!(event.payload(), Some("{}"));
    }

    #[tokio::test]
    async fn test_event_split_across_chunks() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let chunks = vec![Ok(Bytes::from_static(b"data: spl")), Ok(Bytes::from_static(b"it\n\n"))];
        pump_event_stream(futures::stream::iter(chunks), tx, Arc::new(RwLock::new(None))).await;
        assert_eq!(rx.try_recv().unwrap(), message("split"));
    }

    async fn run_chunks(chunks: Vec<Vec<u8>>) -> Vec<TransportEvent> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let body = futures::stream::iter(chunks.into_iter().map(|c| Ok(Bytes::from(c))));
        pump_event_stream(body, tx, Arc::new(RwLock::new(None))).await;
        let mut events = Vec::new();
        while let Ok(e) = rx.try_recv() {
            events.push(e);
        }
        events
    }

    #[tokio::test]
    async fn test_multibyte_character_split_across_chunks() {
        let body = "data: {\"jsonrpc\":\"2.0\",\"method\":\"notifications/message\",\"params\":{\"level\":\"info\",\"data\":\"连接成功\"}}\n\n";
        let bytes = body.as_bytes();
        let cut = body.find('连').unwrap() + 1;
        assert!(!body.is_char_boundary(cut));

        let events = run_chunks(vec![bytes[..cut].to_vec(), bytes[cut..].to_vec()]).await;

        let expected = body.trim_start_matches("data: ").trim_end();
        assert_eq!(events, vec![message(expected)]);
    }

    #[tokio::test]
    async fn test_crlf_separator_split_across_chunks() {
        let events = run_chunks(vec![
            b"data: one\r\n\r".to_vec(),
            b"\ndata: two\r\n".to_vec(),
            b"\r\n".to_vec(),
        ])
        .await;
        assert_eq!(events, vec![message("one"), message("two")]);
    }

    #[test]
    fn test_block_end_finds_both_framings() {
        assert_eq!(block_end(b"data: a\n\nrest"), Some(9));
        assert_eq!(block_end(b"data: a\r\n\r\nrest"), Some(11));
        assert_eq!(block_end(b"data: a\r\n\r"), None);
        assert_eq!(block_end(b"data: a\n"), None);
    }

    #[tokio::test]
    async fn test_id_field_stored() {
        let (_, stored) = run(b"id: evt-42\ndata: payload\n\n").await;
        assert_eq!(stored, Some("evt-42".to_string()));
    }

    #[test]
    fn test_default_stream_url_appends_sse() {
        let url = url::Url::parse("http://localhost:3000/mcp/").unwrap();
        assert_eq!(
            default_stream_url(&url).unwrap().as_str(),
            "http://localhost:3000/mcp/sse"
        );
    }
}
