//! The four extraction strategies, tried in priority order by [`crate::extract`].

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static FENCED_JSON: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)```json\s*\n(.*?)\n?```").expect("valid regex"));

/// Strategy 4: the whole trimmed output is a JSON *object* (arrays/primitives rejected).
pub fn direct_json(text: &str) -> Option<Value> {
    let value: Value = serde_json::from_str(text.trim()).ok()?;
    value.is_object().then_some(value)
}

/// Strategy 3: the first ```json fenced block, itself parsed as an object.
pub fn markdown_fenced_json(text: &str) -> Option<Value> {
    let captured = FENCED_JSON.captures(text)?;
    direct_json(captured.get(1)?.as_str())
}

/// Tries markdown, then direct JSON, on `text` — the fallback chain both the result-wrapper and
/// text-events strategies use once they've reduced the log to a single candidate string.
fn markdown_then_direct(text: &str) -> Option<Value> {
    markdown_fenced_json(text).or_else(|| direct_json(text))
}

/// Strategy 1: scan lines for a `{"type":"result", ...}` object.
pub fn result_wrapper(text: &str) -> Option<Value> {
    for line in text.lines() {
        let Ok(value) = serde_json::from_str::<Value>(line.trim()) else {
            continue;
        };
        let Some(obj) = value.as_object() else {
            continue;
        };
        if obj.get("type").and_then(Value::as_str) != Some("result") {
            continue;
        }
        if let Some(structured) = obj.get("structured_output") {
            if structured.is_object() {
                return Some(structured.clone());
            }
        }
        match obj.get("result") {
            Some(Value::Object(_)) => return obj.get("result").cloned(),
            Some(Value::String(s)) => return markdown_then_direct(s),
            _ => {}
        }
    }
    None
}

/// Strategy 2: every `{"type":"text", "text"|"content": "..."}` event line, concatenated, then
/// run through the markdown/direct fallback chain. A generic stand-in for a provider-specific
/// event parser, since the core does not know which provider produced the log.
pub fn text_events(text: &str) -> Option<Value> {
    let mut buffer = String::new();
    for line in text.lines() {
        let Ok(value) = serde_json::from_str::<Value>(line.trim()) else {
            continue;
        };
        let Some(obj) = value.as_object() else {
            continue;
        };
        if obj.get("type").and_then(Value::as_str) != Some("text") {
            continue;
        }
        if let Some(chunk) = obj.get("text").or_else(|| obj.get("content")).and_then(Value::as_str) {
            buffer.push_str(chunk);
        }
    }
    if buffer.is_empty() {
        return None;
    }
    markdown_then_direct(&buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_wrapper_prefers_structured_output() {
        let log = r#"noise
{"type":"result","structured_output":{"approved":true}}
more noise"#;
        let value = result_wrapper(log).unwrap();
        assert_eq!(value["approved"], true);
    }

    #[test]
    fn result_wrapper_falls_back_to_result_string_via_markdown() {
        let log = r#"{"type":"result","result":"```json\n{\"approved\":false}\n```"}"#;
        let value = result_wrapper(log).unwrap();
        assert_eq!(value["approved"], false);
    }

    #[test]
    fn text_events_concatenates_and_parses() {
        let log = r#"{"type":"text","text":"```json\n"}
{"type":"text","text":"{\"ok\":true}\n"}
{"type":"text","text":"```"}"#;
        let value = text_events(log).unwrap();
        assert_eq!(value["ok"], true);
    }

    #[test]
    fn markdown_rejects_non_object_fenced_blocks() {
        assert!(markdown_fenced_json("```json\n[1,2,3]\n```").is_none());
    }

    #[test]
    fn direct_json_rejects_arrays_and_primitives() {
        assert!(direct_json("[1,2,3]").is_none());
        assert!(direct_json("42").is_none());
        assert!(direct_json(r#"{"ok":true}"#).is_some());
    }
}
