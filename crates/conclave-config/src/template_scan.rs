//! Hand-rolled scanners over hook/trigger text, used by the static checks that cannot afford a
//! full script parser. These look for textual patterns (`{{result.x}}`, `getAgentsByRole("x")`)
//! rather than evaluating anything.

/// Extracts the top-level field name out of every `{{result.<path>}}` placeholder in `text`.
pub fn result_fields_in_template(text: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find("{{") {
        let after_open = &rest[start + 2..];
        let Some(end) = after_open.find("}}") else {
            break;
        };
        let inner = after_open[..end].trim();
        if let Some(path) = inner.strip_prefix("result.") {
            if let Some(field) = path.split('.').next() {
                if !field.is_empty() {
                    fields.push(field.to_string());
                }
            }
        }
        rest = &after_open[end + 2..];
    }
    fields
}

/// Extracts the top-level field name out of every bare `result.<path>` occurrence in script
/// source (no `{{...}}` wrapping, since scripts are expressions, not templates).
pub fn result_fields_in_script(script: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut rest = script;
    while let Some(start) = rest.find("result.") {
        let after = &rest[start + "result.".len()..];
        let field: String = after
            .chars()
            .take_while(|c| c.is_alphanumeric() || *c == '_')
            .collect();
        let advance = field.len().max(1);
        if !field.is_empty() {
            fields.push(field);
        }
        rest = &after[advance.min(after.len())..];
    }
    fields
}

/// Every string quoted argument to `getAgentsByRole(...)` in `script`.
pub fn role_references(script: &str) -> Vec<String> {
    let mut roles = Vec::new();
    let marker = "getAgentsByRole(";
    let mut rest = script;
    while let Some(start) = rest.find(marker) {
        let after = &rest[start + marker.len()..];
        let trimmed = after.trim_start();
        let quote = trimmed.chars().next();
        if matches!(quote, Some('"') | Some('\'')) {
            let quote = quote.unwrap();
            if let Some(end) = trimmed[1..].find(quote) {
                roles.push(trimmed[1..1 + end].to_string());
            }
        }
        rest = after;
    }
    roles
}

/// Heuristic: does `script` guard a zero-match role lookup with an explicit length check?
pub fn has_zero_length_fallback(script: &str) -> bool {
    ["length===0", "length === 0", "length == 0", "length==0"]
        .iter()
        .any(|needle| script.contains(needle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_result_fields_from_templates() {
        let text = "{{result.approved}} and {{result.path.to.field}}";
        assert_eq!(result_fields_in_template(text), vec!["approved", "path"]);
    }

    #[test]
    fn extracts_result_fields_from_scripts() {
        let script = "return result.approved === true";
        assert_eq!(result_fields_in_script(script), vec!["approved"]);
    }

    #[test]
    fn extracts_role_references() {
        let script = "cluster.getAgentsByRole(\"validator\").length";
        assert_eq!(role_references(script), vec!["validator"]);
    }

    #[test]
    fn detects_zero_length_fallback() {
        assert!(has_zero_length_fallback("if (agents.length === 0) return null;"));
        assert!(!has_zero_length_fallback("agents.length > 0"));
    }
}
