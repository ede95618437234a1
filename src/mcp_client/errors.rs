//! MCP Client error types.

use thiserror::Error;

/// Errors that can occur during tool-server bridge and registry operations.
#[derive(Debug, Clone, Error)]
pub enum McpError {
    /// A server process failed to start.
    #[error("failed to spawn server '{name}': {reason}")]
    SpawnFailed {
        name: String,
        reason: String,
    },

    /// The initialization handshake failed or the peer never answered.
    #[error("server '{name}' handshake failed: {reason}")]
    HandshakeError {
        name: String,
        reason: String,
    },

    /// A single inbound record could not be parsed. Never fatal to the stream.
    #[error("malformed record from server '{server}': {reason}")]
    FrameDecodeError {
        server: String,
        reason: String,
    },

    /// A pending request got no response before the bridge deadline.
    #[error("request '{method}' to server '{server}' timed out after {timeout_ms}ms")]
    RequestTimeout {
        server: String,
        method: String,
        timeout_ms: u64,
    },

    /// The bridge was torn down while the request was outstanding.
    #[error("bridge to server '{server}' is closed")]
    BridgeClosed {
        server: String,
    },

    /// I/O or serialization failure on the byte stream.
    #[error("transport error for server '{server}': {reason}")]
    TransportError {
        server: String,
        reason: String,
    },

    /// The peer reported a JSON-RPC error for a request.
    #[error("server '{server}' returned error [{code}]: {message}")]
    ToolExecutionError {
        server: String,
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// Tool not found in the aggregated registry.
    #[error("unknown tool: '{name}'")]
    UnknownTool {
        name: String,
    },

    /// Tool call arguments failed schema validation.
    #[error("invalid arguments for '{tool}': {reason}")]
    InvalidArguments {
        tool: String,
        reason: String,
    },

    /// Tool discovery failed on some bridges; the catalog holds the rest.
    #[error("tool discovery failed for: {}", failed.join(", "))]
    PartialDiscoveryError {
        failed: Vec<String>,
    },

    /// Configuration error (missing servers, bad config file).
    #[error("config error: {reason}")]
    ConfigError {
        reason: String,
    },
}

impl McpError {
    /// Whether the error leaves the bridge unusable for further requests.
    pub fn is_bridge_fatal(&self) -> bool {
        matches!(
            self,
            McpError::BridgeClosed { .. } | McpError::HandshakeError { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_discovery_lists_servers() {
        let err = McpError::PartialDiscoveryError {
            failed: vec!["browser".into(), "files".into()],
        };
        assert_eq!(err.to_string(), "tool discovery failed for: browser, files");
    }

    #[test]
    fn test_bridge_fatal_classification() {
        assert!(McpError::BridgeClosed { server: "a".into() }.is_bridge_fatal());
        assert!(!McpError::RequestTimeout {
            server: "a".into(),
            method: "tools/call".into(),
            timeout_ms: 10,
        }
        .is_bridge_fatal());
    }
}
