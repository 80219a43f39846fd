//! Shared types for the Task Runner contract (spawn options, run outcome, status taxonomy).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use conclave_types::OutputFormat;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// Everything a [`crate::TaskRunner`] needs beyond the assembled prompt string.
#[derive(Clone)]
pub struct RunOptions {
    pub agent_id: String,
    pub model: String,
    pub output_format: OutputFormat,
    pub json_schema: Option<Value>,
    pub cwd: Option<PathBuf>,
    pub env: HashMap<String, String>,
    pub timeout: Duration,
    pub cancellation: CancellationToken,
    pub enable_liveness_check: bool,
    pub liveness_window: Duration,
    /// Called with every non-skipped follow-phase line, in order.
    pub on_output: Option<Arc<dyn Fn(&str) + Send + Sync>>,
}

impl RunOptions {
    pub fn new(agent_id: impl Into<String>, model: impl Into<String>, output_format: OutputFormat) -> Self {
        Self {
            agent_id: agent_id.into(),
            model: model.into(),
            output_format,
            json_schema: None,
            cwd: None,
            env: HashMap::new(),
            timeout: Duration::from_secs(30),
            cancellation: CancellationToken::new(),
            enable_liveness_check: false,
            liveness_window: Duration::from_secs(120),
            on_output: None,
        }
    }
}

/// Why a run failed, distinguishing the one error type with its own retry rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunErrorType {
    RateLimit,
    Other,
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
    pub error_type: Option<RunErrorType>,
    pub retry_after: Option<Duration>,
}

impl RunOutcome {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
            error_type: None,
            retry_after: None,
        }
    }

    pub fn failed(output: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
            error: Some(error.into()),
            error_type: None,
            retry_after: None,
        }
    }

    pub fn rate_limited(output: impl Into<String>, error: impl Into<String>, retry_after: Duration) -> Self {
        Self {
            success: false,
            output: output.into(),
            error: Some(error.into()),
            error_type: Some(RunErrorType::RateLimit),
            retry_after: Some(retry_after),
        }
    }
}

/// Terminal classification returned by a provider's out-of-band status call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Running,
    Completed,
    Failed,
    Stale,
}
