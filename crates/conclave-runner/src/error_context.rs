//! Produces a one-line human-readable failure reason from a failed run's accumulated output.
//! Tries five strategies in order and never truncates the underlying output — only the
//! *reason string* returned here is ever shortened.

use once_cell::sync::Lazy;
use regex::Regex;

use conclave_extractor::preprocess::has_fatal_sentinel;

static ERROR_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^.*(Error:|Exception:|panic:).*$").expect("valid regex")
});

/// Known, actionable CLI limitations worth surfacing verbatim rather than falling through to
/// the generic regex/full-output tiers.
const KNOWN_LIMITATIONS: &[(&str, &str)] = &[
    (
        "256KB",
        "output exceeded the 256 KB streaming limit; re-run with file-based output",
    ),
    (
        "stream truncated",
        "the provider truncated its streaming response before completion",
    ),
];

/// Five-tier fallback: explicit `Task not found`, known CLI limitations, the first valid JSON
/// block, a regex scan for error-shaped lines, then the full output untouched.
pub fn extract_reason(raw_output: &str) -> String {
    if has_fatal_sentinel(raw_output) {
        return "Task not found".to_string();
    }
    for (marker, explanation) in KNOWN_LIMITATIONS {
        if raw_output.contains(marker) {
            return explanation.to_string();
        }
    }
    if let Some(value) = conclave_extractor::strategies::markdown_fenced_json(raw_output)
        .or_else(|| conclave_extractor::strategies::direct_json(raw_output))
    {
        return value.to_string();
    }
    if let Some(found) = ERROR_LINE.find(raw_output) {
        return found.as_str().trim().to_string();
    }
    raw_output.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_sentinel_wins_first() {
        assert_eq!(extract_reason("noise\nTask not found\nmore"), "Task not found");
    }

    #[test]
    fn known_limitation_text_is_recognised() {
        let reason = extract_reason("output exceeded 256KB before finishing");
        assert!(reason.contains("256 KB"));
    }

    #[test]
    fn falls_back_to_first_json_block() {
        let raw = "some preamble\n```json\n{\"code\":\"E_BOOM\"}\n```\ntrailing";
        assert_eq!(extract_reason(raw), r#"{"code":"E_BOOM"}"#);
    }

    #[test]
    fn falls_back_to_regex_error_line() {
        let raw = "line one\nError: disk full\nline three";
        assert_eq!(extract_reason(raw), "Error: disk full");
    }

    #[test]
    fn falls_back_to_full_output_as_last_resort() {
        assert_eq!(extract_reason("  just some plain text  "), "just some plain text");
    }
}
