//! Enum case-normalisation and shallow schema validation over an extracted object.
//!
//! Walks the schema tree the same way `validate_schema_node` in this workspace's tool-schema
//! validator does (recurse into `properties`/`items`), but mutates the *value* tree to fold
//! case-mismatched enum members back onto the schema's canonical casing instead of merely
//! reporting on the schema itself.

use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct SchemaIssue {
    pub path: String,
    pub message: String,
}

/// Case-normalises every enum-constrained string in `value` against `schema`, in place, and
/// collects one [`SchemaIssue`] per field that still does not satisfy its schema afterward.
pub fn normalize_and_validate(value: &mut Value, schema: &Value) -> Vec<SchemaIssue> {
    let mut issues = Vec::new();
    walk("$", value, schema, &mut issues);
    issues
}

fn walk(path: &str, value: &mut Value, schema: &Value, issues: &mut Vec<SchemaIssue>) {
    let Some(schema_obj) = schema.as_object() else {
        return;
    };

    if let Some(enum_values) = schema_obj.get("enum").and_then(Value::as_array) {
        normalize_enum(path, value, enum_values, issues);
        return;
    }

    if let (Some(properties), Value::Object(map)) = (schema_obj.get("properties").and_then(Value::as_object), &mut *value) {
        let required: Vec<String> = schema_obj
            .get("required")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default();
        for field in &required {
            if !map.contains_key(field) {
                issues.push(SchemaIssue {
                    path: format!("{path}.{field}"),
                    message: "required field is missing".to_string(),
                });
            }
        }
        for (key, child_schema) in properties {
            if let Some(child_value) = map.get_mut(key) {
                walk(&format!("{path}.{key}"), child_value, child_schema, issues);
            }
        }
    }

    if let (Some(items_schema), Value::Array(items)) = (schema_obj.get("items"), &mut *value) {
        for (index, item) in items.iter_mut().enumerate() {
            walk(&format!("{path}[{index}]"), item, items_schema, issues);
        }
    }
}

fn normalize_enum(path: &str, value: &mut Value, enum_values: &[Value], issues: &mut Vec<SchemaIssue>) {
    let Value::String(current) = value else {
        issues.push(SchemaIssue {
            path: path.to_string(),
            message: "enum field is not a string".to_string(),
        });
        return;
    };
    if enum_values.iter().any(|candidate| candidate.as_str() == Some(current.as_str())) {
        return;
    }
    let canonical = enum_values
        .iter()
        .filter_map(Value::as_str)
        .find(|candidate| candidate.eq_ignore_ascii_case(current));
    match canonical {
        Some(canonical) => *current = canonical.to_string(),
        None => issues.push(SchemaIssue {
            path: path.to_string(),
            message: format!("`{current}` is not one of the schema's enum values"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_enum_case_mismatch() {
        let schema = serde_json::json!({
            "properties": {"status": {"enum": ["APPROVED", "REJECTED"]}}
        });
        let mut value = serde_json::json!({"status": "approved"});
        let issues = normalize_and_validate(&mut value, &schema);
        assert!(issues.is_empty());
        assert_eq!(value["status"], "APPROVED");
    }

    #[test]
    fn flags_unknown_enum_value() {
        let schema = serde_json::json!({
            "properties": {"status": {"enum": ["APPROVED", "REJECTED"]}}
        });
        let mut value = serde_json::json!({"status": "MAYBE"});
        let issues = normalize_and_validate(&mut value, &schema);
        assert_eq!(issues.len(), 1);
    }

    #[test]
    fn flags_missing_required_field() {
        let schema = serde_json::json!({
            "required": ["approved"],
            "properties": {"approved": {"type": "boolean"}}
        });
        let mut value = serde_json::json!({});
        let issues = normalize_and_validate(&mut value, &schema);
        assert_eq!(issues.len(), 1);
        assert!(issues[0].message.contains("required"));
    }
}
