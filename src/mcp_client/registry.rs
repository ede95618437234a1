//! Tool registry: aggregates tool descriptors across all bridges.
//!
//! Provides:
//! - Concurrent discovery over every bridge (`tools/list`)
//! - Lookup by namespaced name (`server.tool`), with unique un-prefixed fallback
//! - Call-time routing back to the owning bridge
//! - Validation of required arguments against the input schema
//! - Serialization of the catalog for the model and the system directive

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use serde_json::Value;

use crate::inference::types::{FunctionDefinition, ToolDefinition};

use super::errors::McpError;
use super::transport::Bridge;
use super::types::{ToolDescriptor, ToolResult};

// ─── Discovery ───────────────────────────────────────────────────────────────

/// Outcome of discovery: the catalog built from healthy bridges, plus the
/// bridges whose `tools/list` failed.
pub struct Discovery {
    pub registry: ToolRegistry,
    pub failures: Vec<(String, McpError)>,
}

impl Discovery {
    /// `PartialDiscoveryError` naming the failed bridges, if any failed.
    pub fn error(&self) -> Option<McpError> {
        if self.failures.is_empty() {
            None
        } else {
            Some(McpError::PartialDiscoveryError {
                failed: self.failures.iter().map(|(name, _)| name.clone()).collect(),
            })
        }
    }
}

// ─── ToolRegistry ────────────────────────────────────────────────────────────

/// Aggregated, immutable tool catalog across all bridges.
///
/// Tool names are stored as `"server_name.tool_name"` (e.g., `"playwright.browser_click"`).
#[derive(Clone, Default)]
pub struct ToolRegistry {
    /// `namespaced name → descriptor`.
    tools: HashMap<String, ToolDescriptor>,
    /// `server name → bridge`.
    bridges: HashMap<String, Arc<Bridge>>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tool_names())
            .field("servers", &self.server_names())
            .finish()
    }
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Query `tools/list` on every bridge concurrently and build the catalog.
    ///
    /// A bridge contributes all of its tools or none of them. A failing
    /// bridge does not block the others; it is reported in `failures`.
    pub async fn discover(bridges: Vec<Arc<Bridge>>) -> Discovery {
        let listings = futures::future::join_all(bridges.iter().map(|bridge| async move {
            (Arc::clone(bridge), bridge.list_tools().await)
        }))
        .await;

        let mut registry = ToolRegistry::new();
        let mut failures = Vec::new();

        for (bridge, listing) in listings {
            let server = bridge.name().to_string();
            match listing {
                Ok(tools) => {
                    tracing::info!(server = %server, count = tools.len(), "discovered tools");
                    registry.register_bridge(bridge, tools);
                }
                Err(e) => {
                    tracing::warn!(server = %server, error = %e, "tool discovery failed");
                    failures.push((server, e));
                }
            }
        }

        Discovery { registry, failures }
    }

    /// Add one bridge and its descriptors. Duplicate names keep the first.
    pub fn register_bridge(&mut self, bridge: Arc<Bridge>, tools: Vec<ToolDescriptor>) {
        let server = bridge.name().to_string();
        for tool in tools {
            if self.tools.contains_key(&tool.name) {
                tracing::warn!(tool = %tool.name, "duplicate tool name, keeping first");
                continue;
            }
            self.tools.insert(tool.name.clone(), tool);
        }
        self.bridges.insert(server, bridge);
    }

    /// Look up a tool by its namespaced name.
    pub fn get_tool(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.get(name)
    }

    /// Resolve a tool name the model produced.
    ///
    /// Exact namespaced match first; otherwise an un-prefixed name that
    /// matches exactly one tool's original name.
    pub fn resolve(&self, name: &str) -> Option<&ToolDescriptor> {
        if let Some(desc) = self.tools.get(name) {
            return Some(desc);
        }
        let mut candidates = self.tools.values().filter(|d| d.original_name == name);
        match (candidates.next(), candidates.next()) {
            (Some(only), None) => Some(only),
            _ => None,
        }
    }

    /// Route a call to the owning bridge under the tool's original name.
    pub async fn call(&self, name: &str, arguments: Value) -> Result<ToolResult, McpError> {
        let desc = self.resolve(name).ok_or_else(|| McpError::UnknownTool {
            name: name.to_string(),
        })?;
        let bridge = self
            .bridges
            .get(&desc.server)
            .ok_or_else(|| McpError::BridgeClosed {
                server: desc.server.clone(),
            })?;

        self.validate_tool_call(&desc.name, &arguments)?;
        bridge.call_tool(&desc.original_name, arguments).await
    }

    /// Validate a tool call: tool exists and required fields are present.
    ///
    /// Full JSON Schema validation is left to the server itself.
    pub fn validate_tool_call(&self, tool_name: &str, arguments: &Value) -> Result<(), McpError> {
        let def = self.resolve(tool_name).ok_or_else(|| McpError::UnknownTool {
            name: tool_name.to_string(),
        })?;

        if let Some(required) = def.input_schema.get("required").and_then(Value::as_array) {
            let args_obj = arguments.as_object();
            for field_name in required.iter().filter_map(Value::as_str) {
                let has_field = args_obj
                    .map(|obj| obj.contains_key(field_name))
                    .unwrap_or(false);
                if !has_field {
                    return Err(McpError::InvalidArguments {
                        tool: def.name.clone(),
                        reason: format!("missing required field: '{field_name}'"),
                    });
                }
            }
        }

        Ok(())
    }

    /// All descriptors, sorted by namespaced name.
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        let mut all: Vec<ToolDescriptor> = self.tools.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// All namespaced tool names, sorted.
    pub fn tool_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|k| k.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Every bridge held by the registry.
    pub fn bridges(&self) -> Vec<Arc<Bridge>> {
        self.bridges.values().cloned().collect()
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Count tools belonging to a specific server.
    pub fn tools_for_server(&self, server_name: &str) -> usize {
        self.tools.values().filter(|d| d.server == server_name).count()
    }

    /// All unique server names that contributed tools, sorted.
    pub fn server_names(&self) -> Vec<String> {
        self.tools
            .values()
            .map(|d| d.server.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// One-paragraph capability summary for the system directive.
    pub fn capability_summary(&self) -> String {
        if self.is_empty() {
            return "No tools are currently available.".to_string();
        }

        let server_parts: Vec<String> = self
            .server_names()
            .iter()
            .map(|name| format!("{name} ({})", self.tools_for_server(name)))
            .collect();

        format!(
            "Available capabilities ({} tools across {} servers): {}.",
            self.len(),
            server_parts.len(),
            server_parts.join(", "),
        )
    }

    /// Serialize the catalog into the model's function-calling format.
    pub fn to_model_tools(&self) -> Vec<ToolDefinition> {
        self.descriptors()
            .into_iter()
            .map(|desc| ToolDefinition {
                r#type: "function".to_string(),
                function: FunctionDefinition {
                    name: desc.name,
                    description: desc.description,
                    parameters: if desc.input_schema.is_null() {
                        serde_json::json!({ "type": "object", "properties": {} })
                    } else {
                        desc.input_schema
                    },
                },
            })
            .collect()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
