//! Session management commands.
//!
//! Create, inspect, list and delete sessions, and read back a session's full
//! conversation with its locator trail.

use crate::agent_core::{SessionHistory, SessionSummary};
use crate::AppState;

use super::CommandError;

/// Create an empty session and return its id.
pub fn create_session(state: &AppState) -> String {
    state.store().create().id
}

pub fn get_session(state: &AppState, session_id: &str) -> Result<SessionSummary, CommandError> {
    Ok(state.store().get(session_id)?.summary())
}

/// All live sessions, most recently active first.
pub fn list_sessions(state: &AppState) -> Vec<SessionSummary> {
    state.store().list_summaries()
}

/// Delete a session. Returns `false` if it did not exist.
pub fn delete_session(state: &AppState, session_id: &str) -> bool {
    let removed = state.store().delete(session_id);
    tracing::info!(session_id, removed, "session delete requested");
    removed
}

pub fn get_history(state: &AppState, session_id: &str) -> Result<SessionHistory, CommandError> {
    Ok(state.store().history(session_id)?)
}
