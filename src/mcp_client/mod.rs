//! MCP Client: JSON-RPC over stdio bridges to tool-server processes.
//!
//! This module handles:
//! - Framing and decoding newline-delimited JSON-RPC 2.0
//! - Request/response correlation with per-request deadlines
//! - Spawning server processes and the initialization handshake
//! - Tool discovery and aggregation across all servers
//! - Tool call routing and argument validation

pub mod client;
pub mod codec;
pub mod errors;
pub mod lifecycle;
pub mod registry;
pub mod transport;
pub mod types;

#[cfg(test)]
pub mod testing;

// Re-exports for convenience
pub use client::McpClient;
pub use errors::McpError;
pub use lifecycle::BridgeSettings;
pub use registry::{Discovery, ToolRegistry};
pub use transport::Bridge;
pub use types::{ServerConfig, ToolDescriptor, ToolResult};
