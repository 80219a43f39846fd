//! `{{...}}` mustache-style substitution over a hook's `config` template tree.

use conclave_types::{ErrorKind, MessageTemplate, TemplateContent};
use serde_json::Value;

pub struct TemplateBindings<'a> {
    pub cluster_id: &'a str,
    pub iteration: u32,
    pub result: Option<&'a Value>,
}

fn lookup_result_path(result: &Value, path: &str) -> Option<Value> {
    let mut current = result;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current.clone())
}

/// Resolves one `{{var}}` placeholder. `Ok(None)` means "leave the placeholder verbatim" (an
/// unknown, user-authored pattern); `Ok(Some(None))` means a known `result.X` lookup that
/// legitimately resolved to absent — substitute `null` with a warning at the call site.
enum Resolution {
    Known(String),
    KnownButMissing,
    Unknown,
}

fn resolve(var: &str, bindings: &TemplateBindings) -> Resolution {
    let var = var.trim();
    if var == "cluster.id" {
        return Resolution::Known(bindings.cluster_id.to_string());
    }
    if var == "iteration" {
        return Resolution::Known(bindings.iteration.to_string());
    }
    if let Some(path) = var.strip_prefix("result.") {
        return match bindings.result.and_then(|r| lookup_result_path(r, path)) {
            Some(Value::String(s)) => Resolution::Known(s),
            Some(other) => Resolution::Known(other.to_string()),
            None => Resolution::KnownButMissing,
        };
    }
    Resolution::Unknown
}

/// Substitutes every `{{...}}` placeholder in `text`. Known variables are replaced (or become
/// `"null"` with a warning collected into `warnings` if a `result.X` field is absent); unknown
/// `{{...}}` patterns are passed through byte-for-byte.
pub fn substitute_text(text: &str, bindings: &TemplateBindings, warnings: &mut Vec<String>) -> Result<String, ErrorKind> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];
        let Some(end) = after_open.find("}}") else {
            out.push_str(&rest[start..]);
            rest = "";
            break;
        };
        let inner = &after_open[..end];
        match resolve(inner, bindings) {
            Resolution::Known(value) => out.push_str(&value),
            Resolution::KnownButMissing => {
                warnings.push(format!("{{{{{inner}}}}} resolved to null: field not present in result"));
                out.push_str("null");
            }
            Resolution::Unknown => {
                if is_known_prefix(inner) {
                    return Err(ErrorKind::TemplateMissingResult);
                }
                out.push_str("{{");
                out.push_str(inner);
                out.push_str("}}");
            }
        }
        rest = &after_open[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

/// `cluster.*` and bare `iteration` are always known variables; an unresolved one is a hard
/// error rather than passed through, unlike arbitrary user `{{...}}` content.
fn is_known_prefix(var: &str) -> bool {
    let var = var.trim();
    var.starts_with("cluster.") || var == "iteration"
}

fn substitute_value(value: &Value, bindings: &TemplateBindings, warnings: &mut Vec<String>) -> Result<Value, ErrorKind> {
    match value {
        Value::String(s) => Ok(Value::String(substitute_text(s, bindings, warnings)?)),
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(substitute_value(item, bindings, warnings)?);
            }
            Ok(Value::Array(out))
        }
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, child) in map {
                out.insert(key.clone(), substitute_value(child, bindings, warnings)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

/// Substitutes every string anywhere in `template.content`, returning the resolved
/// `(topic, text?, data?)` plus any non-fatal warnings collected along the way.
pub fn render(
    template: &MessageTemplate,
    bindings: &TemplateBindings,
) -> Result<(String, TemplateContent, Vec<String>), ErrorKind> {
    let mut warnings = Vec::new();
    let text = match &template.content.text {
        Some(text) => Some(substitute_text(text, bindings, &mut warnings)?),
        None => None,
    };
    let data = match &template.content.data {
        Some(data) => Some(substitute_value(data, bindings, &mut warnings)?),
        None => None,
    };
    Ok((template.topic.clone(), TemplateContent { text, data }, warnings))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bindings(result: Option<&Value>) -> TemplateBindings {
        TemplateBindings { cluster_id: "c1", iteration: 2, result }
    }

    #[test]
    fn substitutes_known_variables() {
        let mut warnings = Vec::new();
        let out = substitute_text("cluster={{cluster.id}} iter={{iteration}}", &bindings(None), &mut warnings).unwrap();
        assert_eq!(out, "cluster=c1 iter=2");
        assert!(warnings.is_empty());
    }

    #[test]
    fn passes_through_unknown_placeholders() {
        let mut warnings = Vec::new();
        let out = substitute_text("keep {{user.code}} as-is", &bindings(None), &mut warnings).unwrap();
        assert_eq!(out, "keep {{user.code}} as-is");
    }

    #[test]
    fn missing_result_field_becomes_null_with_a_warning() {
        let result = serde_json::json!({"approved": true});
        let mut warnings = Vec::new();
        let out = substitute_text("{{result.reason}}", &bindings(Some(&result)), &mut warnings).unwrap();
        assert_eq!(out, "null");
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn missing_known_cluster_variable_is_a_hard_error() {
        let mut warnings = Vec::new();
        let err = substitute_text("{{cluster.nonexistent}}", &bindings(None), &mut warnings).unwrap_err();
        assert_eq!(err, ErrorKind::TemplateMissingResult);
    }
}
