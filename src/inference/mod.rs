//! Inference Client: OpenAI-compatible model service.
//!
//! This module handles all communication with the model endpoint:
//! - The [`ModelService`] contract the conversation engine depends on
//! - Non-streaming chat completions with tool calling
//! - Overload / transient failure classification for the retry policy
//! - Model configuration and config-file env interpolation
//!
//! The client speaks the OpenAI Chat Completions API, so switching models
//! is a config change, not a code change.

pub mod client;
pub mod config;
pub mod errors;
pub mod repair;
pub mod types;

#[cfg(test)]
pub mod testing;

// Re-exports for convenience
pub use client::{InferenceClient, ModelService};
pub use config::ModelConfig;
pub use errors::InferenceError;
pub use types::{ChatMessage, ModelReply, ModelRequest, Role, ToolCall, ToolDefinition};
