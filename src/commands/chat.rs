//! Prompt processing and tool catalog commands.

use serde::Deserialize;

use crate::agent_core::TurnOutcome;
use crate::mcp_client::ToolDescriptor;
use crate::AppState;

use super::CommandError;

/// Inbound prompt: which session, whether to continue it, and the text.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptRequest {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default, rename = "continue")]
    pub continue_session: bool,
    pub text: String,
}

/// Run one prompt through the agent loop.
///
/// Returns the turn outcome, or a failure with nothing committed to the
/// session.
pub async fn process_prompt(
    state: &AppState,
    request: PromptRequest,
) -> Result<TurnOutcome, CommandError> {
    let text = request.text.trim();
    if text.is_empty() {
        return Err(CommandError::invalid("prompt text is empty"));
    }

    state
        .engine()
        .process_prompt(request.session_id.as_deref(), request.continue_session, text)
        .await
        .map_err(|e| {
            tracing::error!(
                session_id = ?request.session_id,
                error = %e,
                "prompt processing failed"
            );
            CommandError::from(e)
        })
}

/// The aggregated tool catalog, sorted by namespaced name.
pub fn list_tools(state: &AppState) -> Vec<ToolDescriptor> {
    state.engine().registry().descriptors()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::session::{create_session, get_history, list_sessions};
    use crate::commands::test_support::{app_state, browser_server};
    use crate::commands::ErrorKind;
    use crate::inference::testing::ScriptedModel;
    use crate::inference::{InferenceError, ModelReply, ToolCall};
    use serde_json::json;

    fn prompt(session_id: Option<&str>, continue_session: bool, text: &str) -> PromptRequest {
        PromptRequest {
            session_id: session_id.map(str::to_string),
            continue_session,
            text: text.into(),
        }
    }

    #[test]
    fn test_prompt_request_wire_shape() {
        let req: PromptRequest =
            serde_json::from_value(json!({"sessionId": "s1", "continue": true, "text": "go"})).unwrap();
        assert_eq!(req.session_id.as_deref(), Some("s1"));
        assert!(req.continue_session);

        let req: PromptRequest = serde_json::from_value(json!({"text": "go"})).unwrap();
        assert!(req.session_id.is_none());
        assert!(!req.continue_session);
    }

    #[tokio::test]
    async fn test_process_prompt_end_to_end() {
        let model = ScriptedModel::new(vec![
            Ok(ModelReply::tool_calls(
                Some("Opening the page.".into()),
                vec![ToolCall::new(
                    "c1",
                    "playwright.browser_navigate",
                    json!({"url": "https://example.com"}),
                )],
            )),
            Ok(ModelReply::text("The page is open.")),
        ]);
        let state = app_state(model, browser_server()).await;
        let id = create_session(&state);

        let outcome = process_prompt(&state, prompt(Some(&id), true, "navigate to example.com"))
            .await
            .unwrap();
        assert_eq!(outcome.session_id, id);
        assert_eq!(outcome.total_steps, 1);
        assert_eq!(outcome.response_text, "Opening the page.\n\nThe page is open.");
        assert_eq!(outcome.context_updates.current_url.as_deref(), Some("https://example.com"));

        let history = get_history(&state, &id).unwrap();
        assert_eq!(history.locator_history.len(), 1);
        assert_eq!(history.locator_history[0].action, "navigate");
        assert_eq!(history.context.current_url.as_deref(), Some("https://example.com"));
    }

    #[tokio::test]
    async fn test_process_prompt_errors() {
        let model = ScriptedModel::new(vec![Err(InferenceError::HttpError {
            status: 401,
            body: "unauthorized".into(),
        })]);
        let state = app_state(model, browser_server()).await;

        let err = process_prompt(&state, prompt(None, false, "   ")).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidRequest);

        let err = process_prompt(&state, prompt(Some("gone"), true, "hi")).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);

        let err = process_prompt(&state, prompt(None, false, "hi")).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Upstream);
        assert!(list_sessions(&state).is_empty(), "failed fresh turn must not leave a session");

        let kept = create_session(&state);
        let err = process_prompt(&state, prompt(Some(&kept), true, "hi")).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Upstream);
        let ids: Vec<String> = list_sessions(&state).into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![kept]);
    }

    #[tokio::test]
    async fn test_list_tools_is_sorted_and_namespaced() {
        let state = app_state(ScriptedModel::new(vec![Ok(ModelReply::text("hi"))]), browser_server()).await;
        let names: Vec<String> = list_tools(&state).into_iter().map(|t| t.name).collect();
        assert!(names.contains(&"playwright.browser_navigate".to_string()));
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
    }
}
