//! System directive for each model call.
//!
//! Rebuilt on every `AwaitingModel` step from the committed session with the
//! running turn layered on top: a new session gets the plain introduction, a
//! continuing one also gets a short recap of what already happened.

use super::types::{BrowserState, ContextPatch, LocatorRecord, Session};
use crate::mcp_client::ToolRegistry;

/// How many trailing locator records the recap lists.
const RECENT_LOCATORS: usize = 5;

/// How many trailing completed actions the recap lists.
const RECENT_ACTIONS: usize = 5;

const DIRECTIVE_INTRO: &str = "You are an automation agent. You complete the user's task \
    by calling the available tools, one step at a time, and reading each result before \
    deciding the next step.";

const DIRECTIVE_RULES: &str = "Rules:\n\
    - Call tools by their exact names as listed.\n\
    - If a tool call fails, read the error and adapt instead of repeating the same call.\n\
    - When the task is done, answer with a short summary and no further tool calls.";

/// What the running turn has done so far, not yet committed.
#[derive(Debug, Default, Clone, Copy)]
pub struct TurnProgress<'a> {
    pub steps: u64,
    pub context: Option<&'a ContextPatch>,
    pub locators: &'a [LocatorRecord],
}

/// Build the directive for one model call.
pub fn build_directive(registry: &ToolRegistry, session: &Session, progress: TurnProgress<'_>) -> String {
    let capabilities = registry.capability_summary();
    let state = if session.is_continuing() {
        continuing_recap(session, progress)
    } else {
        "This is a new session. No previous actions have been taken.".to_string()
    };

    format!("{DIRECTIVE_INTRO}\n\n{capabilities}\n\n{state}\n\n{DIRECTIVE_RULES}")
}

fn continuing_recap(session: &Session, progress: TurnProgress<'_>) -> String {
    let mut lines = vec![format!(
        "This is a continuing session ({} steps taken so far).",
        session.step_count + progress.steps
    )];

    let mut ctx = session.context.clone();
    if let Some(patch) = progress.context {
        ctx.apply(patch);
    }
    if let Some(url) = &ctx.current_url {
        lines.push(format!("Last known location: {url}"));
    }
    match ctx.browser_state {
        BrowserState::Open => lines.push("The browser is open.".into()),
        BrowserState::Closed => lines.push("The browser was closed.".into()),
        BrowserState::Unknown => {}
    }
    if let Some(shot) = &ctx.last_screenshot {
        lines.push(format!("Last screenshot: {shot}"));
    }

    let recent_actions: Vec<&str> = ctx
        .completed_actions
        .iter()
        .rev()
        .take(RECENT_ACTIONS)
        .rev()
        .map(String::as_str)
        .collect();
    if !recent_actions.is_empty() {
        lines.push(format!("Recent actions: {}", recent_actions.join("; ")));
    }

    let trail: Vec<&LocatorRecord> = session.locators.iter().chain(progress.locators).collect();
    let recent_locators: Vec<String> = trail[trail.len().saturating_sub(RECENT_LOCATORS)..]
        .iter()
        .map(|rec| {
            let status = if rec.success { "ok" } else { "failed" };
            format!(
                "{} {} ({status})",
                rec.action,
                rec.locator.as_deref().unwrap_or("-")
            )
        })
        .collect();
    if !recent_locators.is_empty() {
        lines.push(format!("Recent locators:\n- {}", recent_locators.join("\n- ")));
    }

    lines.join("\n")
}
