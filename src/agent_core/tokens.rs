//! Size helpers for model-bound text.
//!
//! Character-based token heuristics (logged per model call) and UTF-8 safe
//! truncation for tool results and log fields.

use super::types::{ContentPart, Message};

// ─── Constants ──────────────────────────────────────────────────────────────

/// Average characters per token for English prose.
///
/// Conservative: most tokenizers produce ~3.5-4.0 chars/token for English.
const CHARS_PER_TOKEN: f64 = 3.2;

/// Average characters per token for JSON/structured content.
const JSON_CHARS_PER_TOKEN: f64 = 2.8;

/// Per-message overhead (role label, formatting tokens).
const MESSAGE_OVERHEAD_TOKENS: u32 = 4;

/// Overhead for tool call JSON structure (per call).
const TOOL_CALL_OVERHEAD_TOKENS: u32 = 10;

// ─── UTF-8 Safe Truncation ──────────────────────────────────────────────────

/// Truncate a string to at most `max_bytes` bytes on a valid UTF-8 char boundary.
pub(crate) fn truncate_utf8(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Cap a tool result before it is folded into history.
pub fn truncate_tool_result(result: &str, tool_name: &str, max_chars: usize) -> String {
    if result.len() <= max_chars {
        return result.to_string();
    }

    let truncated = truncate_utf8(result, max_chars);
    tracing::warn!(
        tool = %tool_name,
        original_len = result.len(),
        truncated_to = truncated.len(),
        "tool result truncated"
    );
    format!(
        "{truncated}\n\n[... truncated: showing first {} of {} chars]",
        truncated.len(),
        result.len()
    )
}

// ─── Estimation ─────────────────────────────────────────────────────────────

/// Estimate the token count for natural language text.
pub fn estimate_tokens(text: &str) -> u32 {
    (text.len() as f64 / CHARS_PER_TOKEN).ceil() as u32
}

/// Estimate the token count for JSON/structured content.
pub fn estimate_json_tokens(json_text: &str) -> u32 {
    (json_text.len() as f64 / JSON_CHARS_PER_TOKEN).ceil() as u32
}

/// Estimate the token count for one history message.
pub fn estimate_message_tokens(message: &Message) -> u32 {
    let mut total = MESSAGE_OVERHEAD_TOKENS;
    for part in &message.content {
        total += match part {
            ContentPart::Text { text } => estimate_tokens(text),
            ContentPart::ToolCall {
                name, arguments, ..
            } => {
                TOOL_CALL_OVERHEAD_TOKENS
                    + estimate_tokens(name)
                    + estimate_json_tokens(&arguments.to_string())
            }
            ContentPart::ToolResult { content, .. } => estimate_json_tokens(content),
        };
    }
    total
}

/// Estimate the token count for a whole history.
pub fn estimate_history_tokens(history: &[Message]) -> u32 {
    history.iter().map(estimate_message_tokens).sum()
}

// ─── Tests ──────────────────────────────────────────────────────────────────
