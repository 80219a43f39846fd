pub mod preprocess;
pub mod schema;
pub mod strategies;

use conclave_types::ErrorKind;
use serde_json::Value;

pub use schema::SchemaIssue;

/// Runs the four extraction strategies in priority order against raw provider output, returning
/// the first non-null structured object. `None` covers a fatal sentinel, a log with no parseable
/// structured content, and any strategy producing a non-object value.
pub fn extract(raw_output: &str) -> Option<Value> {
    if preprocess::has_fatal_sentinel(raw_output) {
        return None;
    }
    let cleaned = preprocess::clean_output(raw_output);
    strategies::result_wrapper(&cleaned)
        .or_else(|| strategies::text_events(&cleaned))
        .or_else(|| strategies::markdown_fenced_json(&cleaned))
        .or_else(|| strategies::direct_json(&cleaned))
}

/// Normalises enum casing in `value` against `schema` and validates it. For a `validator`-role
/// agent any surviving issue is fatal (`SchemaValidationFailed`); for every other role the
/// issues are returned as warnings and the best-effort object is still usable.
pub fn validate_against_schema(
    value: &mut Value,
    schema: &Value,
    is_validator_role: bool,
) -> Result<Vec<SchemaIssue>, ErrorKind> {
    let issues = schema::normalize_and_validate(value, schema);
    if is_validator_role && !issues.is_empty() {
        return Err(ErrorKind::SchemaValidationFailed);
    }
    Ok(issues)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_sentinel_short_circuits_to_none() {
        assert!(extract("line one\nTask not found\nline two").is_none());
    }

    #[test]
    fn extracts_through_result_wrapper_after_line_prefix_cleanup() {
        let raw = r#"[1700000000000] validator | {"type":"result","structured_output":{"approved":true}}"#;
        let value = extract(raw).unwrap();
        assert_eq!(value["approved"], true);
    }

    #[test]
    fn validator_role_treats_schema_issues_as_fatal() {
        let schema = serde_json::json!({"properties": {"status": {"enum": ["APPROVED"]}}});
        let mut value = serde_json::json!({"status": "MAYBE"});
        let err = validate_against_schema(&mut value, &schema, true).unwrap_err();
        assert_eq!(err, ErrorKind::SchemaValidationFailed);
    }

    #[test]
    fn non_validator_role_treats_schema_issues_as_warnings() {
        let schema = serde_json::json!({"properties": {"status": {"enum": ["APPROVED"]}}});
        let mut value = serde_json::json!({"status": "MAYBE"});
        let issues = validate_against_schema(&mut value, &schema, false).unwrap();
        assert_eq!(issues.len(), 1);
    }
}
