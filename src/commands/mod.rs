//! Inbound command surface.
//!
//! Plain async functions over [`AppState`](crate::AppState), one per
//! operation an outer transport (HTTP, IPC, the stdin REPL) exposes. They
//! return serializable values and a [`CommandError`] carrying a stable kind.

pub mod chat;
pub mod session;

use serde::Serialize;

use crate::agent_core::AgentError;

/// Failure kinds a caller can branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Busy,
    InvalidRequest,
    /// The model service or a tool server failed beyond recovery.
    Upstream,
}

/// Error returned by every command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandError {
    pub kind: ErrorKind,
    pub message: String,
}

impl CommandError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::InvalidRequest,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for CommandError {}

impl From<AgentError> for CommandError {
    fn from(err: AgentError) -> Self {
        let kind = match &err {
            AgentError::SessionNotFound { .. } => ErrorKind::NotFound,
            AgentError::SessionBusy { .. } => ErrorKind::Busy,
            AgentError::ModelServiceError { .. } => ErrorKind::Upstream,
        };
        Self {
            kind,
            message: err.to_string(),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_errors_map_to_kinds() {
        let err: CommandError = AgentError::SessionNotFound {
            session_id: "x".into(),
        }
        .into();
        assert_eq!(err.kind, ErrorKind::NotFound);
        assert!(err.message.contains("'x'"));

        let err: CommandError = AgentError::SessionBusy {
            session_id: "x".into(),
        }
        .into();
        assert_eq!(err.kind, ErrorKind::Busy);

        let json = serde_json::to_value(CommandError::invalid("empty prompt")).unwrap();
        assert_eq!(json["kind"], "invalid_request");
    }
}
