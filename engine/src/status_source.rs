//! Polls a provider CLI's own `status <taskId>` subcommand out-of-band, the concrete collaborator
//! behind `conclave_runner::StatusSource` that the core only ever sees through the trait.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use conclave_runner::{StatusSource, TaskStatus};
use conclave_types::ErrorKind;
use serde::Deserialize;
use tokio::process::Command;
use tokio::time::timeout;

const STATUS_CALL_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Deserialize)]
struct StatusReply {
    status: String,
    #[serde(rename = "logPath")]
    log_path: String,
}

pub struct CliStatusSource {
    program: String,
}

impl CliStatusSource {
    pub fn new(program: impl Into<String>) -> Self {
        Self { program: program.into() }
    }

    async fn query(&self, task_id: &str) -> Result<StatusReply, ErrorKind> {
        let call = Command::new(&self.program)
            .arg("status")
            .arg(task_id)
            .arg("--json")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .output();

        let output = match timeout(STATUS_CALL_TIMEOUT, call).await {
            Ok(Ok(output)) => output,
            _ => return Err(ErrorKind::StatusPollingExhausted),
        };
        if !output.status.success() {
            return Err(ErrorKind::TaskNotFound);
        }
        serde_json::from_slice(&output.stdout).map_err(|_| ErrorKind::StatusPollingExhausted)
    }
}

#[async_trait]
impl StatusSource for CliStatusSource {
    async fn poll(&self, task_id: &str) -> Result<TaskStatus, ErrorKind> {
        let reply = self.query(task_id).await?;
        match reply.status.as_str() {
            "running" => Ok(TaskStatus::Running),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "stale" => Ok(TaskStatus::Stale),
            _ => Err(ErrorKind::StatusPollingExhausted),
        }
    }

    async fn log_path(&self, task_id: &str) -> Result<PathBuf, ErrorKind> {
        Ok(PathBuf::from(self.query(task_id).await?.log_path))
    }
}
