//! Agent Core error types.

use thiserror::Error;

use crate::inference::InferenceError;

/// Errors that can occur during agent core operations.
///
/// Tool-level failures never appear here: they are folded into the
/// conversation as tool-result entries so the model can adapt.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Session not found (never existed, deleted, or expired).
    #[error("session not found: '{session_id}'")]
    SessionNotFound { session_id: String },

    /// Another turn is already running on this session.
    #[error("session '{session_id}' is busy with another prompt")]
    SessionBusy { session_id: String },

    /// The model service kept failing until the retry budget ran out.
    #[error("model service failed after {attempts} attempts: {source}")]
    ModelServiceError {
        attempts: u32,
        #[source]
        source: InferenceError,
    },
}

impl AgentError {
    /// Whether the caller should treat this as "not found" (HTTP 404 style).
    pub fn is_not_found(&self) -> bool {
        matches!(self, AgentError::SessionNotFound { .. })
    }
}
