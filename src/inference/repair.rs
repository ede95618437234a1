//! Best-effort repair of malformed tool-call arguments.
//!
//! Models occasionally emit argument JSON that is almost right. Each repair
//! step is applied on top of the previous one and the result re-parsed, so
//! the cheapest fix that works wins:
//! 1. A doubled opening quote on a value: `"key":""value"`
//! 2. Trailing commas: `{"a":1,}`
//! 3. A truncated tail: unclosed string, object or array
//! 4. Raw control characters inside strings

use serde_json::Value;

/// Parse `raw`, repairing it if needed. `None` when nothing helps.
pub fn repair_tool_arguments(raw: &str) -> Option<Value> {
    if let Ok(v) = serde_json::from_str(raw) {
        return Some(v);
    }

    let steps: [fn(&str) -> String; 4] = [
        collapse_doubled_quotes,
        strip_trailing_commas,
        close_unbalanced,
        strip_control_characters,
    ];

    let mut repaired = raw.to_string();
    for step in steps {
        repaired = step(&repaired);
        if let Ok(v) = serde_json::from_str(&repaired) {
            tracing::debug!(original_len = raw.len(), "repaired malformed tool arguments");
            return Some(v);
        }
    }
    None
}

/// `:""x` → `:"x`. A real empty string (`:""` before `,` `}` or whitespace) is kept.
fn collapse_doubled_quotes(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        out.push(ch);
        if ch != ':' {
            continue;
        }
        let mut lookahead = chars.clone();
        if lookahead.next() == Some('"') && lookahead.next() == Some('"') {
            match lookahead.peek() {
                Some(&next) if next != ',' && next != '}' && !next.is_whitespace() => {
                    out.push('"');
                    chars.next();
                    chars.next();
                }
                _ => {}
            }
        }
    }
    out
}

/// Drop commas that directly precede `}` or `]`, outside of strings.
fn strip_trailing_commas(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());
    let mut scan = StringScan::default();

    for (i, &ch) in chars.iter().enumerate() {
        let in_string = scan.in_string;
        scan.step(ch);
        if !in_string && ch == ',' {
            let next = chars[i + 1..].iter().find(|c| !c.is_whitespace());
            if matches!(next, Some('}') | Some(']')) {
                continue;
            }
        }
        out.push(ch);
    }
    out
}

/// Close an unterminated string, then any open arrays and objects in order.
fn close_unbalanced(input: &str) -> String {
    let mut scan = StringScan::default();
    let mut open = Vec::new();

    for ch in input.chars() {
        let in_string = scan.in_string;
        scan.step(ch);
        if in_string {
            continue;
        }
        match ch {
            '{' => open.push('}'),
            '[' => open.push(']'),
            '}' | ']' => {
                open.pop();
            }
            _ => {}
        }
    }

    let mut out = input.trim_end().to_string();
    if scan.in_string {
        out.push('"');
    }
    while let Some(closer) = open.pop() {
        out.push(closer);
    }
    out
}

/// Remove control characters other than `\n`, `\r` and `\t`.
fn strip_control_characters(input: &str) -> String {
    input
        .chars()
        .filter(|&c| !c.is_control() || matches!(c, '\n' | '\r' | '\t'))
        .collect()
}

/// Tracks whether a character stream is inside a JSON string.
#[derive(Default)]
struct StringScan {
    in_string: bool,
    escaped: bool,
}

impl StringScan {
    fn step(&mut self, ch: char) {
        if self.escaped {
            self.escaped = false;
        } else if self.in_string && ch == '\\' {
            self.escaped = true;
        } else if ch == '"' {
            self.in_string = !self.in_string;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_valid_json_passes_through() {
        assert_eq!(repair_tool_arguments(r#"{"a":1}"#), Some(json!({"a": 1})));
    }

    #[test]
    fn test_missing_closing_brace() {
        assert_eq!(
            repair_tool_arguments(r##"{"selector":"#go""##),
            Some(json!({"selector": "#go"}))
        );
        assert_eq!(
            repair_tool_arguments(r#"{"values":["a","b"#),
            Some(json!({"values": ["a", "b"]}))
        );
    }

    #[test]
    fn test_trailing_comma_outside_strings_only() {
        assert_eq!(
            repair_tool_arguments(r#"{"text":"a,}","n":1,}"#),
            Some(json!({"text": "a,}", "n": 1}))
        );
    }

    #[test]
    fn test_doubled_quote_and_empty_string() {
        assert_eq!(
            repair_tool_arguments(r#"{"path":""/tmp/x","empty":"",}"#),
            Some(json!({"path": "/tmp/x", "empty": ""}))
        );
    }

    #[test]
    fn test_control_characters_removed() {
        assert_eq!(
            repair_tool_arguments("{\"text\":\"a\u{0007}b\"}"),
            Some(json!({"text": "ab"}))
        );
    }

    #[test]
    fn test_irreparable_input() {
        assert_eq!(repair_tool_arguments("click the button"), None);
        assert_eq!(repair_tool_arguments(r#"{"a": nope}"#), None);
    }
}
