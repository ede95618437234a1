//! MCP Client: high-level interface for tool execution.
//!
//! Owns the bridges to every configured server and the aggregated catalog
//! built from them. The conversation engine only ever sees the shared
//! [`ToolRegistry`] handle.

use std::collections::HashMap;
use std::sync::Arc;

use super::errors::McpError;
use super::lifecycle::{self, BridgeSettings};
use super::registry::ToolRegistry;
use super::transport::Bridge;
use super::types::ServerConfig;

// ─── McpClient ───────────────────────────────────────────────────────────────

/// Manages multiple tool servers and routes tool calls.
pub struct McpClient {
    configs: HashMap<String, ServerConfig>,
    settings: BridgeSettings,
    /// Aggregated catalog, rebuilt by `start_all`.
    registry: Arc<ToolRegistry>,
}

impl McpClient {
    /// Create a client with no running servers.
    pub fn new(configs: HashMap<String, ServerConfig>, settings: BridgeSettings) -> Self {
        Self {
            configs,
            settings,
            registry: Arc::new(ToolRegistry::new()),
        }
    }

    /// Wrap already-connected bridges (used when the caller owns the streams).
    pub async fn from_bridges(bridges: Vec<Arc<Bridge>>) -> (Self, Vec<(String, McpError)>) {
        let discovery = ToolRegistry::discover(bridges).await;
        let client = Self {
            configs: HashMap::new(),
            settings: BridgeSettings::default(),
            registry: Arc::new(discovery.registry),
        };
        (client, discovery.failures)
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────

    /// Start all configured servers and build the tool registry.
    ///
    /// Returns every server that failed to start or to list its tools
    /// (partial startup is OK).
    pub async fn start_all(&mut self) -> Vec<(String, McpError)> {
        let (bridges, mut errors) = lifecycle::spawn_all_servers(&self.configs, self.settings).await;
        let discovery = ToolRegistry::discover(bridges).await;
        if let Some(err) = discovery.error() {
            tracing::warn!(error = %err, "catalog is partial");
        }
        errors.extend(discovery.failures);

        tracing::info!(
            tools = discovery.registry.len(),
            servers = discovery.registry.server_names().len(),
            "tool catalog ready"
        );
        self.registry = Arc::new(discovery.registry);
        errors
    }

    /// Shut down all servers gracefully.
    pub async fn shutdown_all(&mut self) {
        lifecycle::shutdown_all(&self.registry.bridges()).await;
        self.registry = Arc::new(ToolRegistry::new());
    }

    // ─── Tool Execution ──────────────────────────────────────────────────

    /// Shared handle to the current catalog.
    pub fn registry(&self) -> Arc<ToolRegistry> {
        Arc::clone(&self.registry)
    }

    /// Names of servers that contributed tools.
    pub fn server_names(&self) -> Vec<String> {
        self.registry.server_names()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp_client::testing::{browser_tools, FakeServer};
    use serde_json::json;

    #[tokio::test]
    async fn test_from_bridges_builds_registry() {
        let bridge = FakeServer::new("playwright", browser_tools()).spawn();
        let (client, failures) = McpClient::from_bridges(vec![bridge]).await;
        assert!(failures.is_empty());
        assert_eq!(client.server_names(), vec!["playwright"]);

        let result = client
            .registry()
            .call("playwright.browser_snapshot", json!({}))
            .await
            .unwrap();
        assert_eq!(result.text(), "ok: browser_snapshot");
    }

    #[tokio::test]
    async fn test_shutdown_all_empties_catalog() {
        let bridge = FakeServer::new("playwright", browser_tools()).spawn();
        let (mut client, _) = McpClient::from_bridges(vec![Arc::clone(&bridge)]).await;
        client.shutdown_all().await;
        assert!(client.registry().is_empty());
        assert!(bridge.is_closed());
    }

    #[tokio::test]
    async fn test_start_all_reports_failed_servers() {
        let mut configs = HashMap::new();
        configs.insert(
            "ghost".to_string(),
            ServerConfig {
                command: "/definitely/not/a/real/binary".into(),
                args: vec![],
                env: HashMap::new(),
                cwd: None,
            },
        );
        let mut client = McpClient::new(configs, BridgeSettings::default());
        let failures = client.start_all().await;
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, "ghost");
        assert!(client.registry().is_empty());
    }
}
