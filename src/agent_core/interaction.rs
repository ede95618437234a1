//! Interaction-context folding.
//!
//! Each tool outcome may teach the session something about the world the
//! tools drive: the page now shown, the last screenshot, whether the browser
//! is open. [`fold_tool_outcome`] turns one outcome into a [`ContextPatch`].

use serde_json::Value;

use super::locator::LocatorExtractor;
use super::types::{BrowserState, ContextPatch, LocatorRecord};
use crate::mcp_client::ToolResult;

/// Result-text line carrying the page address after an action.
const PAGE_URL_MARKER: &str = "Page URL:";

/// Longest screenshot reference kept when falling back to result text.
const MAX_SCREENSHOT_REF: usize = 200;

/// Fold one tool outcome into context changes.
///
/// `result` is `None` when the call failed at the transport or protocol level.
pub fn fold_tool_outcome(
    extractor: &LocatorExtractor,
    tool_name: &str,
    arguments: &Value,
    result: Option<&ToolResult>,
    record: Option<&LocatorRecord>,
) -> ContextPatch {
    let mut patch = ContextPatch::default();
    let Some(result) = result.filter(|r| !r.is_error) else {
        return patch;
    };

    let action = extractor.action_label(tool_name);
    let text = result.text();

    if let Some(url) = page_url(&text) {
        patch.current_url = Some(url);
    } else if action.contains("navigate") {
        patch.current_url = string_arg(arguments, "url");
    }

    if action.contains("screenshot") {
        patch.last_screenshot = string_arg(arguments, "filename")
            .or_else(|| string_arg(arguments, "path"))
            .or_else(|| {
                let first = text.lines().next().unwrap_or_default().trim();
                (!first.is_empty()).then(|| {
                    super::tokens::truncate_utf8(first, MAX_SCREENSHOT_REF).to_string()
                })
            });
    }

    if drives_browser(extractor, tool_name) {
        patch.browser_state = Some(if action == "close" {
            BrowserState::Closed
        } else {
            BrowserState::Open
        });
    }

    if record.map_or(true, |r| r.success) {
        let target = record.and_then(|r| r.locator.as_deref());
        patch.completed_actions.push(match target {
            Some(target) => format!("{action} {target}"),
            None => action,
        });
    }

    patch
}

/// Whether the tool belongs to the prefixed (browser) family.
fn drives_browser(extractor: &LocatorExtractor, tool_name: &str) -> bool {
    let original = tool_name.rsplit_once('.').map_or(tool_name, |(_, t)| t);
    extractor.action_label(tool_name) != original
}

/// The value of the last `Page URL:` line, if any.
fn page_url(text: &str) -> Option<String> {
    text.lines()
        .rev()
        .find_map(|line| {
            line.trim()
                .trim_start_matches(['-', '*', ' '])
                .strip_prefix(PAGE_URL_MARKER)
        })
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .map(str::to_string)
}

fn string_arg(args: &Value, key: &str) -> Option<String> {
    args.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
