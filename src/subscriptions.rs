//! Resource subscription registry
//!
//! Tracks the resource URIs this client subscribed to during the current
//! connection. The set is cleared on every disconnect and is never restored
//! automatically after a reconnect.
//!
//! A subscribe or unsubscribe call that was in flight when the set was
//! cleared does not touch the set afterwards; the generation counter bumped
//! by [`SubscriptionRegistry::clear`] tells the two apart.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::json;
use tokio::sync::Mutex;

use crate::client::JsonRpcClient;
use crate::error::{McpError, Result};
use crate::protocol::ServerCapabilityFlag;
use crate::types::{ServerCapabilities, METHOD_RESOURCES_SUBSCRIBE, METHOD_RESOURCES_UNSUBSCRIBE};

/// Set of subscribed resource URIs.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    uris: Mutex<BTreeSet<String>>,
    /// Bumped by every `clear`, under the `uris` lock.
    generation: AtomicU64,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to update notifications for `uri`.
    ///
    /// # Errors
    ///
    /// [`crate::error::McpError::CapabilityViolation`] unless the server
    /// advertised `resources.subscribe: true`; nothing is written to the
    /// transport in that case. Otherwise the error of the
    /// `resources/subscribe` call, after which `uri` is not recorded.
    /// [`McpError::ConnectionClosed`] when the set was cleared while the
    /// call was in flight.
    pub async fn subscribe(
        &self,
        rpc: &JsonRpcClient,
        caps: &ServerCapabilities,
        uri: &str,
    ) -> Result<()> {
        caps.require(
            ServerCapabilityFlag::ResourceSubscribe,
            METHOD_RESOURCES_SUBSCRIBE,
        )?;
        let generation = self.generation.load(Ordering::SeqCst);
        rpc.call(METHOD_RESOURCES_SUBSCRIBE, Some(json!({ "uri": uri })))
            .await?;

        let mut uris = self.uris.lock().await;
        if self.generation.load(Ordering::SeqCst) != generation {
            tracing::debug!(uri, "subscriptions cleared during subscribe; not recording");
            return Err(McpError::ConnectionClosed(format!(
                "disconnected while subscribing to {uri}"
            )));
        }
        uris.insert(uri.to_string());
        tracing::debug!(uri, "subscribed");
        Ok(())
    }

    /// Drop the subscription for `uri`. A no-op when `uri` is not
    /// subscribed.
    pub async fn unsubscribe(&self, rpc: &JsonRpcClient, uri: &str) -> Result<()> {
        if !self.uris.lock().await.contains(uri) {
            return Ok(());
        }
        let generation = self.generation.load(Ordering::SeqCst);
        rpc.call(METHOD_RESOURCES_UNSUBSCRIBE, Some(json!({ "uri": uri })))
            .await?;

        let mut uris = self.uris.lock().await;
        if self.generation.load(Ordering::SeqCst) != generation {
            // The old subscription is already gone; an entry present now
            // belongs to a newer connection.
            tracing::debug!(uri, "subscriptions cleared during unsubscribe");
            return Ok(());
        }
        uris.remove(uri);
        tracing::debug!(uri, "unsubscribed");
        Ok(())
    }

    /// Whether `uri` is subscribed.
    pub async fn contains(&self, uri: &str) -> bool {
        self.uris.lock().await.contains(uri)
    }

    /// Subscribed URIs in sorted order.
    pub async fn list(&self) -> Vec<String> {
        self.uris.lock().await.iter().cloned().collect()
    }

    /// Forget every subscription.
    pub async fn clear(&self) {
        let mut uris = self.uris.lock().await;
        self.generation.fetch_add(1, Ordering::SeqCst);
        uris.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::Value;

    use crate::error::McpError;
    use crate::transport::fake::{FakeTransport, FakeTransportHandle};
    use crate::transport::Transport;
    use crate::types::Envelope;

    async fn wired() -> (Arc<JsonRpcClient>, FakeTransportHandle) {
        let (transport, handle) = FakeTransport::new();
        let transport: Arc<dyn Transport> = Arc::new(transport);
        let _ = transport.connect().await.unwrap();
        (
            Arc::new(JsonRpcClient::new(transport, Duration::from_secs(2))),
            handle,
        )
    }

    /// Answer every request with an empty result.
    fn ack_all(rpc: Arc<JsonRpcClient>, mut handle: FakeTransportHandle) {
        tokio::spawn(async move {
            while let Some(raw) = handle.outbound_rx.recv().await {
                let req: Value = serde_json::from_str(&raw).unwrap();
                let env: Envelope =
                    serde_json::from_value(json!({"jsonrpc": "2.0", "id": req["id"], "result": {}}))
                        .unwrap();
                rpc.resolve(env).await;
            }
        });
    }

    fn subscribable() -> ServerCapabilities {
        serde_json::from_value(json!({"resources": {"subscribe": true}})).unwrap()
    }

    #[tokio::test]
    async fn test_subscribe_without_capability_writes_nothing() {
        let (rpc, handle) = wired().await;
        let registry = SubscriptionRegistry::new();
        let caps: ServerCapabilities =
            serde_json::from_value(json!({"resources": {"subscribe": false}})).unwrap();

        let err = registry.subscribe(&rpc, &caps, "file:///a").await.unwrap_err();

        assert!(matches!(err, McpError::CapabilityViolation { .. }));
        assert_eq!(handle.control.sent_count(), 0);
        assert!(registry.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_subscribe_then_unsubscribe() {
        let (rpc, handle) = wired().await;
        ack_all(Arc::clone(&rpc), handle);
        let registry = SubscriptionRegistry::new();

        registry.subscribe(&rpc, &subscribable(), "file:///b").await.unwrap();
        registry.subscribe(&rpc, &subscribable(), "file:///a").await.unwrap();
        assert_eq!(registry.list().await, vec!["file:///a", "file:///b"]);

        registry.unsubscribe(&rpc, "file:///a").await.unwrap();
        assert!(!registry.contains("file:///a").await);
        assert!(registry.contains("file:///b").await);
    }

    #[tokio::test]
    async fn test_unsubscribe_unknown_uri_is_noop() {
        let (rpc, handle) = wired().await;
        let registry = SubscriptionRegistry::new();
        registry.unsubscribe(&rpc, "file:///never").await.unwrap();
        assert_eq!(handle.control.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_subscribe_is_not_recorded() {
        let (rpc, _handle) = wired().await;
        let rpc = Arc::new(JsonRpcClient::new(
            Arc::clone(rpc.transport()),
            Duration::from_millis(30),
        ));
        let registry = SubscriptionRegistry::new();
        let err = registry
            .subscribe(&rpc, &subscribable(), "file:///slow")
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::CallTimeout { .. }));
        assert!(registry.list().await.is_empty());
    }

    /// Clear the registry (as a disconnect would) before answering, then run
    /// `after_clear` and resolve the request.
    fn ack_after_clear<F>(
        rpc: Arc<JsonRpcClient>,
        mut handle: FakeTransportHandle,
        registry: Arc<SubscriptionRegistry>,
        after_clear: F,
    ) where
        F: Fn(&mut BTreeSet<String>) + Send + Sync + 'static,
    {
        tokio::spawn(async move {
            while let Some(raw) = handle.outbound_rx.recv().await {
                let req: Value = serde_json::from_str(&raw).unwrap();
                registry.clear().await;
                after_clear(&mut *registry.uris.lock().await);
                let env: Envelope =
                    serde_json::from_value(json!({"jsonrpc": "2.0", "id": req["id"], "result": {}}))
                        .unwrap();
                rpc.resolve(env).await;
            }
        });
    }

    #[tokio::test]
    async fn test_subscribe_racing_clear_is_not_recorded() {
        let (rpc, handle) = wired().await;
        let registry = Arc::new(SubscriptionRegistry::new());
        ack_after_clear(Arc::clone(&rpc), handle, Arc::clone(&registry), |_| {});

        let err = registry
            .subscribe(&rpc, &subscribable(), "file:///raced")
            .await
            .unwrap_err();

        assert!(matches!(err, McpError::ConnectionClosed(_)), "{err:?}");
        assert!(registry.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_unsubscribe_racing_clear_keeps_newer_entry() {
        let (rpc, handle) = wired().await;
        let registry = Arc::new(SubscriptionRegistry::new());
        registry.uris.lock().await.insert("file:///a".to_string());
        // Clear, then re-subscribe as a fresh connection would.
        ack_after_clear(Arc::clone(&rpc), handle, Arc::clone(&registry), |uris| {
            uris.insert("file:///a".to_string());
        });

        registry.unsubscribe(&rpc, "file:///a").await.unwrap();

        assert!(registry.contains("file:///a").await);
    }

    #[tokio::test]
    async fn test_clear() {
        let (rpc, handle) = wired().await;
        ack_all(Arc::clone(&rpc), handle);
        let registry = SubscriptionRegistry::new();
        registry.subscribe(&rpc, &subscribable(), "file:///a").await.unwrap();
        registry.clear().await;
        assert!(registry.list().await.is_empty());
    }
}
