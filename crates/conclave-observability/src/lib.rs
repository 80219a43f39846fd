//! Structured logging setup (console + non-blocking JSON file, env-filter controlled) and a
//! single event-emission helper every component funnels its lifecycle events through.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone, Serialize)]
pub struct LoggingInitInfo {
    pub logs_dir: String,
    pub prefix: String,
    pub retention_days: u64,
    pub initialized_at: DateTime<Utc>,
}

/// One lifecycle event, named the way each component in this crate's README describes its own
/// transitions: Ledger appends, Bus dispatch, Scheduler state changes, Controller lifecycle, and
/// Task Runner phases all funnel through this same shape.
#[derive(Debug, Clone, Serialize)]
pub struct ObservabilityEvent<'a> {
    pub event: &'a str,
    pub component: &'a str,
    pub cluster_id: Option<&'a str>,
    pub agent_id: Option<&'a str>,
    pub message_id: Option<&'a str>,
    pub topic: Option<&'a str>,
    pub iteration: Option<u32>,
    pub status: Option<&'a str>,
    pub error_kind: Option<&'a str>,
    pub detail: Option<&'a str>,
}

impl<'a> ObservabilityEvent<'a> {
    pub fn new(event: &'a str, component: &'a str) -> Self {
        Self {
            event,
            component,
            cluster_id: None,
            agent_id: None,
            message_id: None,
            topic: None,
            iteration: None,
            status: None,
            error_kind: None,
            detail: None,
        }
    }
}

pub fn emit_event(level: Level, event: ObservabilityEvent<'_>) {
    match level {
        Level::ERROR => tracing::error!(
            target: "conclave.obs",
            component = event.component,
            event = event.event,
            cluster_id = event.cluster_id.unwrap_or(""),
            agent_id = event.agent_id.unwrap_or(""),
            message_id = event.message_id.unwrap_or(""),
            topic = event.topic.unwrap_or(""),
            iteration = event.iteration.unwrap_or(0),
            status = event.status.unwrap_or(""),
            error_kind = event.error_kind.unwrap_or(""),
            detail = event.detail.unwrap_or(""),
            "observability_event"
        ),
        Level::WARN => tracing::warn!(
            target: "conclave.obs",
            component = event.component,
            event = event.event,
            cluster_id = event.cluster_id.unwrap_or(""),
            agent_id = event.agent_id.unwrap_or(""),
            message_id = event.message_id.unwrap_or(""),
            topic = event.topic.unwrap_or(""),
            iteration = event.iteration.unwrap_or(0),
            status = event.status.unwrap_or(""),
            error_kind = event.error_kind.unwrap_or(""),
            detail = event.detail.unwrap_or(""),
            "observability_event"
        ),
        _ => tracing::info!(
            target: "conclave.obs",
            component = event.component,
            event = event.event,
            cluster_id = event.cluster_id.unwrap_or(""),
            agent_id = event.agent_id.unwrap_or(""),
            message_id = event.message_id.unwrap_or(""),
            topic = event.topic.unwrap_or(""),
            iteration = event.iteration.unwrap_or(0),
            status = event.status.unwrap_or(""),
            error_kind = event.error_kind.unwrap_or(""),
            detail = event.detail.unwrap_or(""),
            "observability_event"
        ),
    }
}

/// Sets up a console layer plus a daily-rotated, non-blocking JSON file layer under `logs_dir`
/// when `logs_dir` is `Some`; console-only otherwise. Verbosity comes from `RUST_LOG`, default
/// `info`.
pub fn init_logging(logs_dir: Option<&Path>, retention_days: u64) -> anyhow::Result<(Option<WorkerGuard>, LoggingInitInfo)> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console_layer = tracing_subscriber::fmt::layer().compact().with_target(true).with_ansi(true);

    let Some(logs_dir) = logs_dir else {
        tracing_subscriber::registry().with(filter).with(console_layer).try_init().ok();
        let info = LoggingInitInfo { logs_dir: String::new(), prefix: String::new(), retention_days, initialized_at: Utc::now() };
        return Ok((None, info));
    };

    fs::create_dir_all(logs_dir)?;
    cleanup_old_jsonl(logs_dir, retention_days)?;

    let file_appender = tracing_appender::rolling::Builder::new()
        .rotation(tracing_appender::rolling::Rotation::DAILY)
        .filename_prefix("conclave")
        .filename_suffix("jsonl")
        .build(logs_dir)?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_current_span(false)
        .with_span_list(false);

    tracing_subscriber::registry().with(filter).with(console_layer).with(file_layer).try_init().ok();

    let info = LoggingInitInfo {
        logs_dir: logs_dir.display().to_string(),
        prefix: "conclave".to_string(),
        retention_days,
        initialized_at: Utc::now(),
    };
    Ok((Some(guard), info))
}

fn cleanup_old_jsonl(logs_dir: &Path, retention_days: u64) -> anyhow::Result<()> {
    let cutoff = Utc::now() - chrono::Duration::days(retention_days as i64);
    let prefix = "conclave.";

    for entry in fs::read_dir(logs_dir)? {
        let Ok(entry) = entry else { continue };
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else { continue };
        if !name.starts_with(prefix) || !name.ends_with(".jsonl") {
            continue;
        }
        let date_part = name.trim_start_matches(prefix).trim_end_matches(".jsonl");
        let Ok(date) = chrono::NaiveDate::parse_from_str(date_part, "%Y-%m-%d") else { continue };
        let Some(dt) = date.and_hms_opt(0, 0, 0) else { continue };
        if DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc) < cutoff {
            let _ = fs::remove_file(path);
        }
    }
    Ok(())
}

pub fn canonical_logs_dir_from_root(root: &Path) -> PathBuf {
    root.join("logs")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_logs_dir_joins_logs_folder() {
        let root = PathBuf::from("/tmp/conclave");
        assert_eq!(canonical_logs_dir_from_root(&root), PathBuf::from("/tmp/conclave").join("logs"));
    }

    #[test]
    fn event_builder_defaults_every_optional_field_to_none() {
        let event = ObservabilityEvent::new("agent_started", "scheduler");
        assert!(event.cluster_id.is_none());
        assert!(event.iteration.is_none());
    }
}
