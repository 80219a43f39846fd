use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The error taxonomy from the design doc — kinds, not concrete Rust error types. Every
/// component maps its failures onto one of these before it crosses a component boundary.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Error)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    #[error("configuration is invalid")]
    ConfigInvalid,
    #[error("spawn timed out")]
    SpawnTimeout,
    #[error("task was never registered")]
    TaskNotFound,
    #[error("status polling exhausted its retry budget")]
    StatusPollingExhausted,
    #[error("provider rate limit")]
    RateLimit,
    #[error("no output arrived within the liveness window")]
    LivenessTimeout,
    #[error("structured output failed schema validation")]
    SchemaValidationFailed,
    #[error("a known template variable had no value")]
    TemplateMissingResult,
    #[error("a hook script raised an error")]
    HookScriptError,
    #[error("a cluster operation failed to apply")]
    OperationFailed,
    #[error("the ledger is closed")]
    LedgerClosed,
    #[error("the cluster is stopping")]
    ClusterStopping,
    #[error("persisted state could not be written")]
    PersistError,
}

/// A structured failure carrying both the taxonomy kind and a sanitised, user-facing reason.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{kind}: {reason}")]
pub struct ConclaveError {
    pub kind: ErrorKind,
    pub reason: String,
}

impl ConclaveError {
    pub fn new(kind: ErrorKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: sanitize_error_text(&reason.into()),
        }
    }
}

/// Patterns that look like a language runtime leaking its internals into an error message
/// (`SomeException: ...`, `<class 'foo.Bar'>`, Rust-style `SomeError { .. }`) rather than a
/// human-readable reason. Replaced with a generic message so callers never see type names.
const TYPE_ANNOTATION_MARKERS: &[&str] = &[
    "Exception:",
    "Traceback (most recent call last)",
    "<class '",
    "panicked at",
    "Error {",
    "at 0x",
];

/// Never returns raw type-annotation text to a user; falls back to a generic message instead.
pub fn sanitize_error_text(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return "an unspecified error occurred".to_string();
    }
    if TYPE_ANNOTATION_MARKERS
        .iter()
        .any(|marker| trimmed.contains(marker))
    {
        return "an internal error occurred".to_string();
    }
    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizer_passes_through_plain_text() {
        assert_eq!(sanitize_error_text("rate limited, retry in 5s"), "rate limited, retry in 5s");
    }

    #[test]
    fn sanitizer_replaces_type_annotation_noise() {
        let raw = "Traceback (most recent call last):\n  File \"x.py\"\nValueError: boom";
        assert_eq!(sanitize_error_text(raw), "an internal error occurred");
    }

    #[test]
    fn sanitizer_replaces_empty_text() {
        assert_eq!(sanitize_error_text("   "), "an unspecified error occurred");
    }
}
