//! Locator extraction.
//!
//! Derives a [`LocatorRecord`] from one tool invocation: which action ran,
//! against which target, and whether it looks like it worked. Pure; the
//! only input besides the call is the result (absent when the call failed).

use std::sync::LazyLock;

use chrono::Utc;
use regex::Regex;
use serde_json::Value;

use super::types::LocatorRecord;
use crate::mcp_client::ToolResult;

/// Substrings in result text that mark a failed action.
const FAILURE_KEYWORDS: [&str; 5] = ["error", "failed", "not found", "timeout", "exception"];

/// Actions whose `text` argument is the value being entered, not a target.
const VALUE_ENTRY_ACTIONS: [&str; 3] = ["type", "fill", "press"];

/// Element descriptions echoed back by browser tools, e.g. `Clicked "Submit button"`.
static ELEMENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(?:clicked|typed into|hovered over|hovered|selected|filled|element)\b[^"\n]*"([^"\n]+)""#)
        .expect("ELEMENT_RE should compile")
});

/// Stateless extractor configured with the tool-name prefixes to strip.
#[derive(Debug, Clone)]
pub struct LocatorExtractor {
    action_prefixes: Vec<String>,
}

impl Default for LocatorExtractor {
    fn default() -> Self {
        Self::new(vec!["browser_".to_string()])
    }
}

impl LocatorExtractor {
    pub fn new(action_prefixes: Vec<String>) -> Self {
        Self { action_prefixes }
    }

    /// Action label: the original tool name without its server namespace or
    /// a configured prefix (`playwright.browser_click` → `click`).
    pub fn action_label(&self, tool_name: &str) -> String {
        let original = tool_name.rsplit_once('.').map_or(tool_name, |(_, t)| t);
        self.action_prefixes
            .iter()
            .find_map(|prefix| original.strip_prefix(prefix.as_str()))
            .filter(|rest| !rest.is_empty())
            .unwrap_or(original)
            .to_string()
    }

    /// Build the record for one call, or `None` when the arguments carry no
    /// recognizable target.
    pub fn extract(
        &self,
        tool_name: &str,
        arguments: &Value,
        result: Option<&ToolResult>,
    ) -> Option<LocatorRecord> {
        let action = self.action_label(tool_name);
        let locator = derive_selector(&action, arguments)?;
        let text = result.map(ToolResult::text);

        Some(LocatorRecord {
            tool: tool_name.to_string(),
            timestamp: Utc::now(),
            locator: Some(locator),
            element: describe_element(text.as_deref(), arguments),
            success: is_success(result, text.as_deref()),
            action,
        })
    }
}

/// Target selector by argument priority:
/// `selector` > `locator` > quoted `text` > `role`+`name` > element `ref`.
/// Navigation actions use their `url`.
fn derive_selector(action: &str, args: &Value) -> Option<String> {
    let field = |key: &str| {
        args.get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    };

    if let Some(selector) = field("selector") {
        return Some(selector.to_string());
    }
    if let Some(locator) = field("locator") {
        return Some(locator.to_string());
    }
    if !VALUE_ENTRY_ACTIONS.iter().any(|a| action.contains(a)) {
        if let Some(text) = field("text") {
            return Some(format!("text=\"{text}\""));
        }
    }
    if let (Some(role), Some(name)) = (field("role"), field("name")) {
        return Some(format!("role={role}[name=\"{name}\"]"));
    }
    if let Some(element_ref) = field("ref") {
        return Some(format!("ref={element_ref}"));
    }
    if action.contains("navigate") {
        if let Some(url) = field("url") {
            return Some(url.to_string());
        }
    }
    None
}

fn describe_element(text: Option<&str>, args: &Value) -> Option<String> {
    text.and_then(|t| ELEMENT_RE.captures(t))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .or_else(|| {
            args.get("element")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        })
}

fn is_success(result: Option<&ToolResult>, text: Option<&str>) -> bool {
    let Some(result) = result else {
        return false;
    };
    if result.is_error {
        return false;
    }
    let lower = text.unwrap_or_default().to_lowercase();
    !FAILURE_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp_client::types::ContentBlock;
    use serde_json::json;

    fn text_result(text: &str, is_error: bool) -> ToolResult {
        ToolResult {
            content: vec![ContentBlock {
                kind: "text".into(),
                text: Some(text.into()),
                extra: Default::default(),
            }],
            is_error,
        }
    }

    #[test]
    fn test_action_label_strips_namespace_and_prefix() {
        let ex = LocatorExtractor::default();
        assert_eq!(ex.action_label("playwright.browser_click"), "click");
        assert_eq!(ex.action_label("browser_navigate"), "navigate");
        assert_eq!(ex.action_label("files.read_file"), "read_file");
        assert_eq!(ex.action_label("playwright.browser_"), "browser_");
    }

    #[test]
    fn test_selector_field_always_wins() {
        let ex = LocatorExtractor::default();
        let args = json!({"selector": "#submit", "locator": "css=.x", "text": "Go"});
        let rec = ex
            .extract("playwright.browser_click", &args, Some(&text_result("done", false)))
            .unwrap();
        assert_eq!(rec.locator.as_deref(), Some("#submit"));
        assert_eq!(rec.action, "click");
        assert!(rec.success);
    }

    #[test]
    fn test_priority_order() {
        let ex = LocatorExtractor::default();
        let rec = |args: Value| {
            ex.extract("p.browser_click", &args, None)
                .and_then(|r| r.locator)
        };
        assert_eq!(rec(json!({"locator": "css=.x", "text": "Go"})).as_deref(), Some("css=.x"));
        assert_eq!(rec(json!({"text": "Go", "role": "button"})).as_deref(), Some("text=\"Go\""));
        assert_eq!(
            rec(json!({"role": "button", "name": "Submit"})).as_deref(),
            Some("role=button[name=\"Submit\"]")
        );
        assert_eq!(rec(json!({"element": "Submit", "ref": "e12"})).as_deref(), Some("ref=e12"));
    }

    #[test]
    fn test_no_selector_fields_no_record() {
        let ex = LocatorExtractor::default();
        assert!(ex.extract("p.browser_snapshot", &json!({}), None).is_none());
        assert!(ex.extract("p.browser_click", &json!({"role": "button"}), None).is_none());
        // url only counts for navigation
        assert!(ex.extract("p.browser_click", &json!({"url": "https://x.test"}), None).is_none());
        assert!(ex.extract("p.browser_snapshot", &Value::Null, None).is_none());
    }

    #[test]
    fn test_typed_text_is_not_a_target() {
        let ex = LocatorExtractor::default();
        assert!(ex.extract("p.browser_type", &json!({"text": "hello"}), None).is_none());
        let rec = ex
            .extract("p.browser_type", &json!({"selector": "#q", "text": "hello"}), None)
            .unwrap();
        assert_eq!(rec.locator.as_deref(), Some("#q"));
    }

    #[test]
    fn test_navigate_uses_url() {
        let ex = LocatorExtractor::default();
        let rec = ex
            .extract(
                "playwright.browser_navigate",
                &json!({"url": "https://example.com"}),
                Some(&text_result("Page URL: https://example.com/", false)),
            )
            .unwrap();
        assert_eq!(rec.action, "navigate");
        assert_eq!(rec.locator.as_deref(), Some("https://example.com"));
        assert!(rec.success);
    }

    #[test]
    fn test_success_flag() {
        let ex = LocatorExtractor::default();
        let args = json!({"selector": "#a"});
        let fails = |r: Option<&ToolResult>| !ex.extract("p.browser_click", &args, r).unwrap().success;

        assert!(fails(None));
        assert!(fails(Some(&text_result("clicked", true))));
        assert!(fails(Some(&text_result("Element not found", false))));
        assert!(fails(Some(&text_result("TimeoutError: waiting for selector", false))));
        assert!(!fails(Some(&text_result("Clicked successfully", false))));
    }

    #[test]
    fn test_element_description() {
        let ex = LocatorExtractor::default();
        let rec = ex
            .extract(
                "p.browser_click",
                &json!({"ref": "e3", "element": "fallback"}),
                Some(&text_result("Clicked \"Sign in button\"\nPage URL: https://x.test", false)),
            )
            .unwrap();
        assert_eq!(rec.element.as_deref(), Some("Sign in button"));

        let rec = ex
            .extract("p.browser_click", &json!({"ref": "e3", "element": "Login link"}), None)
            .unwrap();
        assert_eq!(rec.element.as_deref(), Some("Login link"));
    }
}
