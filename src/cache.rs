//! Capability cache
//!
//! [`CapabilityCache`] holds the most recently discovered tool, resource,
//! resource template and prompt lists of one server. Each list is an
//! `Arc<Vec<_>>` snapshot swapped in whole, so readers never observe a
//! partially updated list and a failed refresh leaves the previous snapshot
//! in place.
//!
//! Every refresh checks its capability gate before touching the transport.
//! A refresh issues exactly one list call; `nextCursor` is not followed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::client::JsonRpcClient;
use crate::error::Result;
use crate::protocol::ServerCapabilityFlag;
use crate::types::{
    ListPromptsResult, ListResourceTemplatesResult, ListResourcesResult, ListToolsResult, Prompt,
    Resource, ResourceTemplate, ServerCapabilities, Tool, METHOD_PROMPTS_LIST,
    METHOD_RESOURCES_LIST, METHOD_RESOURCES_TEMPLATES_LIST, METHOD_TOOLS_LIST,
};

/// Discovered lists of one server.
#[derive(Debug, Default)]
pub struct CapabilityCache {
    tools: RwLock<Arc<Vec<Tool>>>,
    resources: RwLock<Arc<Vec<Resource>>>,
    resource_templates: RwLock<Arc<Vec<ResourceTemplate>>>,
    prompts: RwLock<Arc<Vec<Prompt>>>,
    /// Bumped by `clear`; a refresh started before a clear does not store.
    generation: AtomicU64,
}

impl CapabilityCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current tool snapshot.
    pub async fn tools(&self) -> Arc<Vec<Tool>> {
        Arc::clone(&*self.tools.read().await)
    }

    /// Current resource snapshot.
    pub async fn resources(&self) -> Arc<Vec<Resource>> {
        Arc::clone(&*self.resources.read().await)
    }

    /// Current resource template snapshot.
    pub async fn resource_templates(&self) -> Arc<Vec<ResourceTemplate>> {
        Arc::clone(&*self.resource_templates.read().await)
    }

    /// Current prompt snapshot.
    pub async fn prompts(&self) -> Arc<Vec<Prompt>> {
        Arc::clone(&*self.prompts.read().await)
    }

    /// Re-fetch the tool list.
    ///
    /// # Errors
    ///
    /// [`crate::error::McpError::CapabilityViolation`] without the `tools`
    /// capability, or the error of the `tools/list` call.
    pub async fn refresh_tools(
        &self,
        rpc: &JsonRpcClient,
        caps: &ServerCapabilities,
    ) -> Result<usize> {
        caps.require(ServerCapabilityFlag::Tools, METHOD_TOOLS_LIST)?;
        let generation = self.generation.load(Ordering::SeqCst);
        let result: ListToolsResult = rpc.request::<(), _>(METHOD_TOOLS_LIST, None).await?;
        log_unfollowed_cursor(METHOD_TOOLS_LIST, result.next_cursor.as_deref());
        Ok(self.store(&self.tools, result.tools, generation).await)
    }

    /// Re-fetch the resource list.
    pub async fn refresh_resources(
        &self,
        rpc: &JsonRpcClient,
        caps: &ServerCapabilities,
    ) -> Result<usize> {
        caps.require(ServerCapabilityFlag::Resources, METHOD_RESOURCES_LIST)?;
        let generation = self.generation.load(Ordering::SeqCst);
        let result: ListResourcesResult =
            rpc.request::<(), _>(METHOD_RESOURCES_LIST, None).await?;
        log_unfollowed_cursor(METHOD_RESOURCES_LIST, result.next_cursor.as_deref());
        Ok(self.store(&self.resources, result.resources, generation).await)
    }

    /// Re-fetch the resource template list. Gated on the `resources`
    /// capability.
    pub async fn refresh_resource_templates(
        &self,
        rpc: &JsonRpcClient,
        caps: &ServerCapabilities,
    ) -> Result<usize> {
        caps.require(
            ServerCapabilityFlag::Resources,
            METHOD_RESOURCES_TEMPLATES_LIST,
        )?;
        let generation = self.generation.load(Ordering::SeqCst);
        let result: ListResourceTemplatesResult = rpc
            .request::<(), _>(METHOD_RESOURCES_TEMPLATES_LIST, None)
            .await?;
        log_unfollowed_cursor(
            METHOD_RESOURCES_TEMPLATES_LIST,
            result.next_cursor.as_deref(),
        );
        Ok(self
            .store(&self.resource_templates, result.resource_templates, generation)
            .await)
    }

    /// Re-fetch the prompt list.
    pub async fn refresh_prompts(
        &self,
        rpc: &JsonRpcClient,
        caps: &ServerCapabilities,
    ) -> Result<usize> {
        caps.require(ServerCapabilityFlag::Prompts, METHOD_PROMPTS_LIST)?;
        let generation = self.generation.load(Ordering::SeqCst);
        let result: ListPromptsResult = rpc.request::<(), _>(METHOD_PROMPTS_LIST, None).await?;
        log_unfollowed_cursor(METHOD_PROMPTS_LIST, result.next_cursor.as_deref());
        Ok(self.store(&self.prompts, result.prompts, generation).await)
    }

    /// Run every refresh the server's capabilities permit, concurrently.
    ///
    /// Failures are logged and never propagate; lists the server does not
    /// advertise stay empty without any call being made.
    pub async fn discover(&self, rpc: &JsonRpcClient, caps: &ServerCapabilities) {
        let tools = async {
            if caps.capable(ServerCapabilityFlag::Tools) {
                report(METHOD_TOOLS_LIST, self.refresh_tools(rpc, caps).await);
            }
        };
        let resources = async {
            if caps.capable(ServerCapabilityFlag::Resources) {
                report(METHOD_RESOURCES_LIST, self.refresh_resources(rpc, caps).await);
            }
        };
        let templates = async {
            if caps.capable(ServerCapabilityFlag::Resources) {
                report(
                    METHOD_RESOURCES_TEMPLATES_LIST,
                    self.refresh_resource_templates(rpc, caps).await,
                );
            }
        };
        let prompts = async {
            if caps.capable(ServerCapabilityFlag::Prompts) {
                report(METHOD_PROMPTS_LIST, self.refresh_prompts(rpc, caps).await);
            }
        };
        tokio::join!(tools, resources, templates, prompts);
    }

    /// Empty every list.
    pub async fn clear(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        *self.tools.write().await = Arc::default();
        *self.resources.write().await = Arc::default();
        *self.resource_templates.write().await = Arc::default();
        *self.prompts.write().await = Arc::default();
    }

    async fn store<T>(&self, slot: &RwLock<Arc<Vec<T>>>, items: Vec<T>, generation: u64) -> usize {
        let count = items.len();
        let mut guard = slot.write().await;
        if self.generation.load(Ordering::SeqCst) == generation {
            *guard = Arc::new(items);
        } else {
            tracing::debug!("discarding list fetched before the cache was cleared");
        }
        count
    }
}

fn log_unfollowed_cursor(method: &str, cursor: Option<&str>) {
    if let Some(cursor) = cursor {
        tracing::debug!(method, cursor, "result has more pages; not following nextCursor");
    }
}

fn report(method: &str, outcome: Result<usize>) {
    match outcome {
        Ok(count) => tracing::debug!(method, count, "discovery complete"),
        Err(e) => tracing::warn!(method, "discovery failed: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use serde_json::{json, Value};

    use crate::error::McpError;
    use crate::transport::fake::{FakeTransport, FakeTransportHandle};
    use crate::transport::Transport;
    use crate::types::Envelope;

    /// Client whose outbound requests are answered by `reply(method)`.
    /// Returns the client plus a receiver of every method sent.
    async fn responder(
        reply: fn(&str) -> Value,
    ) -> (Arc<JsonRpcClient>, tokio::sync::mpsc::UnboundedReceiver<String>) {
        let (transport, mut handle): (FakeTransport, FakeTransportHandle) = FakeTransport::new();
        let transport: Arc<dyn Transport> = Arc::new(transport);
        let _ = transport.connect().await.unwrap();
        let rpc = Arc::new(JsonRpcClient::new(transport, Duration::from_secs(2)));
        let (seen_tx, seen_rx) = tokio::sync::mpsc::unbounded_channel();
        let r = Arc::clone(&rpc);
        tokio::spawn(async move {
            while let Some(raw) = handle.outbound_rx.recv().await {
                let req: Value = serde_json::from_str(&raw).unwrap();
                let method = req["method"].as_str().unwrap().to_string();
                let _ = seen_tx.send(method.clone());
                let env: Envelope = serde_json::from_value(
                    json!({"jsonrpc": "2.0", "id": req["id"], "result": reply(&method)}),
                )
                .unwrap();
                r.resolve(env).await;
            }
        });
        (rpc, seen_rx)
    }

    fn lists(method: &str) -> Value {
        match method {
            "tools/list" => json!({"tools": [{"name": "echo", "inputSchema": {}}], "nextCursor": "p2"}),
            "resources/list" => json!({"resources": [{"uri": "file:///a", "name": "a"}]}),
            "resources/templates/list" => {
                json!({"resourceTemplates": [{"uriTemplate": "file:///{p}", "name": "t"}]})
            }
            "prompts/list" => json!({"prompts": [{"name": "greet"}]}),
            _ => json!({}),
        }
    }

    fn drain(rx: &mut tokio::sync::mpsc::UnboundedReceiver<String>) -> Vec<String> {
        let mut v = Vec::new();
        while let Ok(m) = rx.try_recv() {
            v.push(m);
        }
        v.sort();
        v
    }

    #[tokio::test]
    async fn test_discover_only_calls_advertised_capabilities() {
        let (rpc, mut seen) = responder(lists).await;
        let cache = CapabilityCache::new();
        let caps: ServerCapabilities = serde_json::from_value(json!({"tools": {}})).unwrap();

        cache.discover(&rpc, &caps).await;

        assert_eq!(drain(&mut seen), vec!["tools/list".to_string()]);
        assert_eq!(cache.tools().await.len(), 1);
        assert!(cache.resources().await.is_empty());
        assert!(cache.prompts().await.is_empty());
    }

    #[tokio::test]
    async fn test_resources_capability_gates_templates_too() {
        let (rpc, mut seen) = responder(lists).await;
        let cache = CapabilityCache::new();
        let caps: ServerCapabilities =
            serde_json::from_value(json!({"resources": {}, "prompts": {}})).unwrap();

        cache.discover(&rpc, &caps).await;

        assert_eq!(
            drain(&mut seen),
            vec![
                "prompts/list".to_string(),
                "resources/list".to_string(),
                "resources/templates/list".to_string()
            ]
        );
        assert_eq!(cache.resource_templates().await[0].uri_template, "file:///{p}");
    }

    #[tokio::test]
    async fn test_refresh_without_capability_makes_no_call() {
        let (rpc, mut seen) = responder(lists).await;
        let cache = CapabilityCache::new();
        let err = cache
            .refresh_prompts(&rpc, &ServerCapabilities::default())
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::CapabilityViolation { .. }));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(drain(&mut seen).is_empty());
    }

    #[tokio::test]
    async fn test_refresh_makes_exactly_one_call_despite_cursor() {
        let (rpc, mut seen) = responder(lists).await;
        let cache = CapabilityCache::new();
        let caps: ServerCapabilities = serde_json::from_value(json!({"tools": {}})).unwrap();
        assert_eq!(cache.refresh_tools(&rpc, &caps).await.unwrap(), 1);
        assert_eq!(drain(&mut seen).len(), 1);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_snapshot() {
        let (rpc, _seen) = responder(lists).await;
        let cache = CapabilityCache::new();
        let caps: ServerCapabilities = serde_json::from_value(json!({"tools": {}})).unwrap();
        cache.refresh_tools(&rpc, &caps).await.unwrap();

        let (bad, _seen) = responder(|_| json!({"tools": "not a list"})).await;
        assert!(cache.refresh_tools(&bad, &caps).await.is_err());
        assert_eq!(cache.tools().await[0].name, "echo");
    }

    #[tokio::test]
    async fn test_clear_empties_everything() {
        let (rpc, _seen) = responder(lists).await;
        let cache = CapabilityCache::new();
        let caps: ServerCapabilities =
            serde_json::from_value(json!({"tools": {}, "resources": {}, "prompts": {}})).unwrap();
        cache.discover(&rpc, &caps).await;
        assert!(!cache.tools().await.is_empty());
        cache.clear().await;
        assert!(cache.tools().await.is_empty());
        assert!(cache.resources().await.is_empty());
        assert!(cache.resource_templates().await.is_empty());
        assert!(cache.prompts().await.is_empty());
    }
}
