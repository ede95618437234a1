//! Shared types for the agent core.
//!
//! Conversation messages, session records, interaction context, and the
//! locator trail used across the SessionStore and the ConversationEngine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::inference::types::Role;

// ─── Conversation Messages ──────────────────────────────────────────────────

/// One piece of a message's content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        text: String,
    },
    /// A tool invocation requested by the model.
    ToolCall {
        id: String,
        name: String,
        arguments: Value,
    },
    /// The outcome of one tool invocation, tagged with its call id.
    ToolResult {
        #[serde(rename = "callId")]
        call_id: String,
        name: String,
        content: String,
        #[serde(rename = "isError")]
        is_error: bool,
    },
}

/// A single message stored in conversation history.
///
/// Only `user` and `assistant` roles appear here; tool results travel in a
/// user turn and the system directive is rebuilt for every model call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentPart>,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// A user turn carrying plain text.
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentPart::Text { text: text.into() }],
            timestamp: Utc::now(),
        }
    }

    /// An assistant turn: optional text plus any requested tool calls.
    pub fn assistant(text: Option<String>, calls: Vec<ContentPart>) -> Self {
        let mut content = Vec::with_capacity(calls.len() + 1);
        if let Some(text) = text.filter(|t| !t.is_empty()) {
            content.push(ContentPart::Text { text });
        }
        content.extend(calls);
        Self {
            role: Role::Assistant,
            content,
            timestamp: Utc::now(),
        }
    }

    /// One combined user turn holding every tool result of an iteration.
    pub fn tool_results(results: Vec<ContentPart>) -> Self {
        Self {
            role: Role::User,
            content: results,
            timestamp: Utc::now(),
        }
    }

    /// Concatenated text parts.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Number of tool calls this message requests.
    pub fn tool_call_count(&self) -> usize {
        self.content
            .iter()
            .filter(|part| matches!(part, ContentPart::ToolCall { .. }))
            .count()
    }
}

// ─── Interaction Context ────────────────────────────────────────────────────

/// Coarse lifecycle of the external resource the tools drive (the browser).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrowserState {
    #[default]
    Unknown,
    Open,
    Closed,
}

/// What the session knows about the world the tools act on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionContext {
    pub current_url: Option<String>,
    pub last_screenshot: Option<String>,
    pub browser_state: BrowserState,
    pub completed_actions: Vec<String>,
}

/// Changes to fold into an [`InteractionContext`]. Returned to callers as
/// `contextUpdates`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_screenshot: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub browser_state: Option<BrowserState>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub completed_actions: Vec<String>,
}

impl ContextPatch {
    pub fn is_empty(&self) -> bool {
        self.current_url.is_none()
            && self.last_screenshot.is_none()
            && self.browser_state.is_none()
            && self.completed_actions.is_empty()
    }

    /// Layer `later` on top of `self`; later scalar values win, actions append.
    pub fn merge(&mut self, later: ContextPatch) {
        if later.current_url.is_some() {
            self.current_url = later.current_url;
        }
        if later.last_screenshot.is_some() {
            self.last_screenshot = later.last_screenshot;
        }
        if later.browser_state.is_some() {
            self.browser_state = later.browser_state;
        }
        self.completed_actions.extend(later.completed_actions);
    }
}

impl InteractionContext {
    pub fn apply(&mut self, patch: &ContextPatch) {
        if let Some(url) = &patch.current_url {
            self.current_url = Some(url.clone());
        }
        if let Some(shot) = &patch.last_screenshot {
            self.last_screenshot = Some(shot.clone());
        }
        if let Some(state) = patch.browser_state {
            self.browser_state = state;
        }
        self.completed_actions
            .extend(patch.completed_actions.iter().cloned());
    }
}

// ─── Locator Trail ──────────────────────────────────────────────────────────

/// Structured record of one tool invocation, for observability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocatorRecord {
    /// Namespaced tool name the model called.
    pub tool: String,
    pub timestamp: DateTime<Utc>,
    pub locator: Option<String>,
    /// Action label, e.g. `"click"` for `browser_click`.
    pub action: String,
    pub element: Option<String>,
    pub success: bool,
}

// ─── Sessions ───────────────────────────────────────────────────────────────

/// A conversation with durable identity across turns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub history: Vec<Message>,
    pub context: InteractionContext,
    pub locators: Vec<LocatorRecord>,
    /// Tool invocations folded into this session over its lifetime.
    pub step_count: u64,
}

impl Session {
    pub fn new(id: String, now: DateTime<Utc>) -> Self {
        Self {
            id,
            created_at: now,
            last_activity: now,
            history: Vec::new(),
            context: InteractionContext::default(),
            locators: Vec::new(),
            step_count: 0,
        }
    }

    /// Whether any turn has been recorded yet.
    pub fn is_continuing(&self) -> bool {
        !self.history.is_empty()
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id.clone(),
            created_at: self.created_at,
            last_activity: self.last_activity,
            message_count: self.history.len(),
            step_count: self.step_count,
            current_url: self.context.current_url.clone(),
        }
    }
}

/// Lightweight view of a session for listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub message_count: usize,
    pub step_count: u64,
    pub current_url: Option<String>,
}

/// Everything one committed turn adds to a session.
#[derive(Debug, Clone, Default)]
pub struct SessionPatch {
    pub messages: Vec<Message>,
    pub context: ContextPatch,
    pub locators: Vec<LocatorRecord>,
    pub steps: u64,
}

/// Full conversation view returned by `get_history`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionHistory {
    pub messages: Vec<Message>,
    pub locator_history: Vec<LocatorRecord>,
    pub context: InteractionContext,
}

// ─── Turn Outcome ───────────────────────────────────────────────────────────

/// How a conversation turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    Completed,
    /// Iteration cap reached; the accumulated text is returned.
    Aborted,
}

/// Result of one `process_prompt` turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnOutcome {
    pub session_id: String,
    pub response_text: String,
    /// Locator records produced during this turn.
    pub locators: Vec<LocatorRecord>,
    /// The session's cumulative step count after this turn.
    pub total_steps: u64,
    /// Tool invocations in this turn.
    pub tool_calls: u64,
    /// Model round-trips in this turn.
    pub iterations: u32,
    pub status: TurnStatus,
    pub context_updates: ContextPatch,
}

// ─── Tests ───────────────────────────────────────────────────────────────────
