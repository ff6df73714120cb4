//! Typed client events and notification routing
//!
//! Everything observable about a client that is not the result of a call
//! is published as a [`ClientEvent`] on a `tokio::sync::broadcast` channel:
//! state transitions, reconnect scheduling and server notifications.
//! Publishing never blocks. A subscriber that falls behind sees
//! `RecvError::Lagged`; a client with no subscribers drops events silently.
//!
//! [`NotificationRouter`] maps inbound notification methods to events and
//! tells the session which cache refresh, if any, to run.

use std::time::Duration;

use serde_json::Value;
use tokio::sync::broadcast;

use crate::session::ConnectionState;
use crate::types::{
    LogMessage, LoggingLevel, ProgressNotification, ResourceUriParams, NOTIF_MESSAGE,
    NOTIF_PROGRESS, NOTIF_PROMPTS_LIST_CHANGED, NOTIF_RESOURCES_LIST_CHANGED,
    NOTIF_RESOURCES_UPDATED, NOTIF_TOOLS_LIST_CHANGED,
};

/// Default capacity of the event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// An event published by a client.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// The connection state changed.
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
    },
    /// A reconnect attempt was scheduled after `delay`.
    Reconnecting { attempt: u32, delay: Duration },
    /// The server's tool list changed; a refresh is under way.
    ToolsListChanged,
    /// The server's resource list changed; a refresh is under way.
    ResourcesListChanged,
    /// The server's prompt list changed; a refresh is under way.
    PromptsListChanged,
    /// A subscribed resource changed.
    ResourceUpdated { uri: String },
    /// A server log record, or a stdio server's stderr line.
    Log(LogMessage),
    /// Progress report for a long-running request.
    Progress(ProgressNotification),
}

/// Cache refresh requested by a list-changed notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheRefresh {
    Tools,
    /// Resources plus resource templates.
    Resources,
    Prompts,
}

/// Maps notification methods to [`ClientEvent`]s.
#[derive(Debug, Clone)]
pub struct NotificationRouter {
    server: String,
    events: broadcast::Sender<ClientEvent>,
}

impl NotificationRouter {
    /// Create a router for the server called `server`.
    pub fn new(server: impl Into<String>, capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            server: server.into(),
            events,
        }
    }

    /// A new receiver for every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// Publish one event. Never blocks and never fails.
    pub fn emit(&self, event: ClientEvent) {
        // Err only means nobody is listening.
        let _ = self.events.send(event);
    }

    /// Route one server notification.
    ///
    /// Emits the matching event and returns the cache refresh to run, if
    /// any. Unknown methods and malformed params are logged at debug and
    /// dropped.
    pub fn route(&self, method: &str, params: Option<Value>) -> Option<CacheRefresh> {
        let params = params.unwrap_or(Value::Null);
        match canonical(method) {
            NOTIF_TOOLS_LIST_CHANGED => {
                self.emit(ClientEvent::ToolsListChanged);
                Some(CacheRefresh::Tools)
            }
            NOTIF_RESOURCES_LIST_CHANGED => {
                self.emit(ClientEvent::ResourcesListChanged);
                Some(CacheRefresh::Resources)
            }
            NOTIF_PROMPTS_LIST_CHANGED => {
                self.emit(ClientEvent::PromptsListChanged);
                Some(CacheRefresh::Prompts)
            }
            NOTIF_RESOURCES_UPDATED => {
                match serde_json::from_value::<ResourceUriParams>(params) {
                    Ok(p) => self.emit(ClientEvent::ResourceUpdated { uri: p.uri }),
                    Err(e) => tracing::debug!(server = %self.server, "bad {} params: {}", method, e),
                }
                None
            }
            NOTIF_MESSAGE => {
                match serde_json::from_value::<LogMessage>(params) {
                    Ok(m) => self.emit(ClientEvent::Log(m)),
                    Err(e) => tracing::debug!(server = %self.server, "bad {} params: {}", method, e),
                }
                None
            }
            NOTIF_PROGRESS => {
                match serde_json::from_value::<ProgressNotification>(params) {
                    Ok(p) => self.emit(ClientEvent::Progress(p)),
                    Err(e) => tracing::debug!(server = %self.server, "bad {} params: {}", method, e),
                }
                None
            }
            _ => {
                tracing::debug!(server = %self.server, method, "ignoring unrecognized notification");
                None
            }
        }
    }

    /// Publish a diagnostic line (stdio stderr) as a warning-level log event.
    pub fn diagnostic(&self, line: String) {
        self.emit(ClientEvent::Log(LogMessage {
            level: LoggingLevel::Warning,
            logger: Some(self.server.clone()),
            data: Value::String(line),
        }));
    }
}

/// Map the camelCase `listChanged` spellings onto the canonical names.
fn canonical(method: &str) -> &str {
    match method {
        "notifications/tools/listChanged" => NOTIF_TOOLS_LIST_CHANGED,
        "notifications/resources/listChanged" => NOTIF_RESOURCES_LIST_CHANGED,
        "notifications/prompts/listChanged" => NOTIF_PROMPTS_LIST_CHANGED,
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn router() -> (NotificationRouter, broadcast::Receiver<ClientEvent>) {
        let r = NotificationRouter::new("files", 16);
        let rx = r.subscribe();
        (r, rx)
    }

    #[test]
    fn test_list_changed_requests_refresh() {
        let (r, mut rx) = router();
        assert_eq!(
            r.route("notifications/tools/list_changed", None),
            Some(CacheRefresh::Tools)
        );
        assert_eq!(
            r.route("notifications/resources/list_changed", None),
            Some(CacheRefresh::Resources)
        );
        assert_eq!(
            r.route("notifications/prompts/list_changed", None),
            Some(CacheRefresh::Prompts)
        );
        assert_eq!(rx.try_recv().unwrap(), ClientEvent::ToolsListChanged);
        assert_eq!(rx.try_recv().unwrap(), ClientEvent::ResourcesListChanged);
        assert_eq!(rx.try_recv().unwrap(), ClientEvent::PromptsListChanged);
    }

    #[test]
    fn test_camel_case_alias_accepted() {
        let (r, mut rx) = router();
        assert_eq!(
            r.route("notifications/tools/listChanged", None),
            Some(CacheRefresh::Tools)
        );
        assert_eq!(rx.try_recv().unwrap(), ClientEvent::ToolsListChanged);
    }

    #[test]
    fn test_resource_updated_carries_uri() {
        let (r, mut rx) = router();
        assert_eq!(
            r.route(
                "notifications/resources/updated",
                Some(json!({"uri": "file:///a.txt"}))
            ),
            None
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            ClientEvent::ResourceUpdated {
                uri: "file:///a.txt".into()
            }
        );
    }

    #[test]
    fn test_log_and_progress_events() {
        let (r, mut rx) = router();
        r.route(
            "notifications/message",
            Some(json!({"level": "error", "logger": "db", "data": {"msg": "down"}})),
        );
        r.route(
            "notifications/progress",
            Some(json!({"progressToken": 7, "progress": 0.5})),
        );
        match rx.try_recv().unwrap() {
            ClientEvent::Log(m) => {
                assert_eq!(m.level, LoggingLevel::Error);
                assert_eq!(m.logger.as_deref(), Some("db"));
            }
            other => panic!("unexpected {other:?}"),
        }
        match rx.try_recv().unwrap() {
            ClientEvent::Progress(p) => assert_eq!(p.progress, 0.5),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_unknown_and_malformed_are_dropped() {
        let (r, mut rx) = router();
        assert_eq!(r.route("notifications/unheard_of", None), None);
        assert_eq!(r.route("notifications/resources/updated", Some(json!({}))), None);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_diagnostic_becomes_warning_log() {
        let (r, mut rx) = router();
        r.diagnostic("disk almost full".into());
        assert_eq!(
            rx.try_recv().unwrap(),
            ClientEvent::Log(LogMessage {
                level: LoggingLevel::Warning,
                logger: Some("files".into()),
                data: json!("disk almost full"),
            })
        );
    }

    #[test]
    fn test_emit_without_subscribers_is_harmless() {
        let r = NotificationRouter::new("x", 1);
        r.emit(ClientEvent::ToolsListChanged);
        r.emit(ClientEvent::ToolsListChanged);
    }
}
