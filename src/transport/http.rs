//! Request/response HTTP transport
//!
//! [`HttpTransport`] sends every outbound JSON-RPC message as an HTTP POST
//! and delivers the reply inline: by the time [`Transport::send`] returns,
//! the response body (if any) is already on the inbound channel. There is
//! no persistent stream, so servers cannot push notifications over this
//! transport.
//!
//! The POST machinery lives in [`HttpPoster`], which the SSE transport
//! reuses for its outbound side. The server may reply with:
//!
//! - `application/json` -- the body is one inbound message
//! - `text/event-stream` -- each `data:` event is one inbound message
//! - `202 Accepted` -- no body (notification acknowledgement)
//!
//! # Session header
//!
//! A server may return an `Mcp-Session-Id` response header. It is stored and
//! replayed on every later request, and `close` issues a best-effort DELETE
//! for it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex, RwLock};

use crate::error::{McpError, Result};
use crate::transport::sse::pump_event_stream;
use crate::transport::{Inbound, Transport, TransportEvent, TransportKind};
use crate::types::LATEST_PROTOCOL_VERSION;

const SESSION_HEADER: &str = "Mcp-Session-Id";

/// Shared HTTP POST client used by the request/response and SSE transports.
#[derive(Debug)]
pub(crate) struct HttpPoster {
    http_client: reqwest::Client,
    /// POST target.
    endpoint: url::Url,
    /// Static extra headers merged into every request (e.g. Authorization).
    headers: HashMap<String, String>,
    /// Server-assigned session, captured from a response header.
    session_id: RwLock<Option<String>>,
    /// Last SSE event id seen, replayed as `Last-Event-ID`.
    last_event_id: Arc<RwLock<Option<String>>>,
    /// Bounds each POST; the long-lived GET stream is not bounded.
    timeout: Duration,
}

impl HttpPoster {
    pub(crate) fn new(
        endpoint: url::Url,
        headers: HashMap<String, String>,
        timeout: Duration,
    ) -> Result<Self> {
        let http_client = reqwest::Client::builder().build()?;
        Ok(Self {
            http_client,
            endpoint,
            headers,
            session_id: RwLock::new(None),
            last_event_id: Arc::new(RwLock::new(None)),
            timeout,
        })
    }

    pub(crate) fn endpoint(&self) -> &url::Url {
        &self.endpoint
    }

    pub(crate) fn last_event_id(&self) -> Arc<RwLock<Option<String>>> {
        Arc::clone(&self.last_event_id)
    }

    async fn with_headers(&self, mut req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(id) = self.session_id.read().await.as_deref() {
            req = req.header(SESSION_HEADER, id);
        }
        if let Some(id) = self.last_event_id.read().await.as_deref() {
            req = req.header("Last-Event-ID", id);
        }
        for (k, v) in &self.headers {
            req = req.header(k.as_str(), v.as_str());
        }
        req
    }

    /// POST one message and push whatever the server answers onto `inbound`.
    pub(crate) async fn post(
        &self,
        message: String,
        inbound: &mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<()> {
        let req = self
            .http_client
            .post(self.endpoint.as_str())
            .timeout(self.timeout)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json, text/event-stream")
            .header("MCP-Protocol-Version", LATEST_PROTOCOL_VERSION)
            .body(message);
        let req = self.with_headers(req).await;

        let response = req
            .send()
            .await
            .map_err(|e| McpError::Transport(format!("HTTP POST failed: {}", e)))?;

        let status = response.status();

        if status == reqwest::StatusCode::UNAUTHORIZED {
            let challenge = response
                .headers()
                .get("WWW-Authenticate")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string();
            return Err(McpError::Transport(format!(
                "HTTP 401 Unauthorized {}",
                challenge
            )));
        }

        if status == reqwest::StatusCode::NOT_FOUND && self.session_id.write().await.take().is_some()
        {
            return Err(McpError::Transport("server session expired".into()));
        }

        if status == reqwest::StatusCode::ACCEPTED {
            return Ok(());
        }

        if !status.is_success() {
            return Err(McpError::Transport(format!(
                "HTTP POST returned status {}",
                status
            )));
        }

        if let Some(new_session_id) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
        {
            let mut sid = self.session_id.write().await;
            if sid.is_none() {
                tracing::debug!("server assigned session {}", new_session_id);
                *sid = Some(new_session_id);
            }
        }

        let content_type = response
            .headers()
            .get("Content-Type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if content_type.contains("text/event-stream") {
            // Read the whole event stream so replies land before send returns.
            pump_event_stream(response.bytes_stream(), inbound.clone(), self.last_event_id()).await;
        } else {
            let body = response
                .text()
                .await
                .map_err(|e| McpError::Transport(format!("failed to read response body: {}", e)))?;
            let body = body.trim();
            if !body.is_empty() {
                let _ = inbound.send(TransportEvent::Message(body.to_string()));
            }
        }

        Ok(())
    }

    /// Open a GET request expecting an event stream.
    pub(crate) async fn get_stream(&self, url: &url::Url) -> Result<reqwest::Response> {
        let req = self
            .http_client
            .get(url.as_str())
            .header("Accept", "text/event-stream");
        let response = self
            .with_headers(req)
            .await
            .send()
            .await
            .map_err(|e| McpError::Transport(format!("GET stream request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(McpError::Transport(format!(
                "GET stream returned HTTP {}",
                status
            )));
        }
        Ok(response)
    }

    /// Best-effort DELETE of the server session, if one was assigned.
    pub(crate) async fn terminate_session(&self) {
        let Some(sid) = self.session_id.write().await.take() else {
            return;
        };
        let mut req = self
            .http_client
            .delete(self.endpoint.as_str())
            .timeout(self.timeout)
            .header(SESSION_HEADER, sid.as_str());
        for (k, v) in &self.headers {
            req = req.header(k.as_str(), v.as_str());
        }
        if let Err(e) = req.send().await {
            tracing::debug!("session DELETE failed: {}", e);
        }
    }
}

/// Stateless request/response transport over HTTP POST.
///
/// # Examples
///
/// ```no_run
/// use std::collections::HashMap;
/// use std::time::Duration;
/// use url::Url;
/// use mcplink::transport::http::HttpTransport;
///
/// let transport = HttpTransport::new(
///     Url::parse("http://localhost:3000/mcp").unwrap(),
///     HashMap::new(),
///     Duration::from_secs(30),
/// )
/// .unwrap();
/// ```
#[derive(Debug)]
pub struct HttpTransport {
    poster: HttpPoster,
    /// Sender for the current connection's inbound channel.
    inbound: Mutex<Option<mpsc::UnboundedSender<TransportEvent>>>,
}

impl HttpTransport {
    /// Construct a transport targeting `endpoint`.
    ///
    /// `timeout` bounds each individual POST. No network I/O happens
    /// at construction time.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::Http`] if the HTTP client cannot be built.
    pub fn new(
        endpoint: url::Url,
        headers: HashMap<String, String>,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            poster: HttpPoster::new(endpoint, headers, timeout)?,
            inbound: Mutex::new(None),
        })
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn connect(&self) -> Result<Inbound> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.inbound.lock().await = Some(tx);
        tracing::debug!("http transport ready for {}", self.poster.endpoint());
        Ok(rx)
    }

    /// POST the message; the reply is on the inbound channel when this
    /// returns.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::Transport`] if the transport is not connected, the
    /// request fails, or the server answers with a non-success status.
    async fn send(&self, message: String) -> Result<()> {
        let tx = self
            .inbound
            .lock()
            .await
            .clone()
            .ok_or_else(|| McpError::Transport("http transport is not connected".into()))?;
        self.poster.post(message, &tx).await
    }

    async fn close(&self) -> Result<()> {
        if self.inbound.lock().await.take().is_some() {
            self.poster.terminate_session().await;
        }
        Ok(())
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Http
    }

    fn supports_notifications(&self) -> bool {
        false
    }
}
