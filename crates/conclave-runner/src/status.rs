//! Out-of-band task status polling, kept behind a trait because the concrete call (`status
//! <taskId>`) belongs to whichever provider CLI the runner was configured against.

use std::path::PathBuf;

use async_trait::async_trait;
use conclave_types::ErrorKind;

use crate::types::TaskStatus;

#[async_trait]
pub trait StatusSource: Send + Sync {
    /// Polls the provider for `task_id`'s current status. `Err(ErrorKind::TaskNotFound)` means
    /// the task never registered; any other error counts toward the 30-consecutive-failure
    /// resilience budget.
    async fn poll(&self, task_id: &str) -> Result<TaskStatus, ErrorKind>;

    /// Resolves the task's log file path, once it exists.
    async fn log_path(&self, task_id: &str) -> Result<PathBuf, ErrorKind>;
}
