//! The standard four-phase task runner: spawn the provider CLI, wait for it to register, follow
//! its log file to completion, and extract a reason on failure.

use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use conclave_types::{ErrorKind, OutputFormat};
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::time::timeout;

use crate::cancellation::{self, GRACE_PERIOD};
use crate::error_context::extract_reason;
use crate::follower::{tail_once, TailState, TAIL_CADENCE};
use crate::status::StatusSource;
use crate::types::{RunErrorType, RunOptions, RunOutcome, TaskStatus};

static SPAWN_BANNER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^Task spawned: (\S+)").expect("valid regex"));

const SPAWN_TIMEOUT: Duration = Duration::from_secs(30);
const READY_POLL_INTERVAL: Duration = Duration::from_secs(5);
const READY_MAX_ATTEMPTS: u32 = 6;
const STATUS_POLL_INTERVAL: Duration = Duration::from_secs(1);
const MAX_CONSECUTIVE_STATUS_FAILURES: u32 = 30;

#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn run(&self, context: &str, options: RunOptions) -> RunOutcome;
}

/// Spawns `program run --output-format <format> [extra_args]`, feeding `context` on stdin, and
/// drives it through the spawn/ready/follow phases against a pluggable [`StatusSource`].
pub struct ProcessTaskRunner<S> {
    program: String,
    extra_args: Vec<String>,
    status_source: Arc<S>,
}

impl<S: StatusSource> ProcessTaskRunner<S> {
    pub fn new(program: impl Into<String>, extra_args: Vec<String>, status_source: Arc<S>) -> Self {
        Self {
            program: program.into(),
            extra_args,
            status_source,
        }
    }

    fn format_flag(format: OutputFormat) -> &'static str {
        match format {
            OutputFormat::Text => "text",
            OutputFormat::Json => "json",
            OutputFormat::StreamJson => "stream-json",
        }
    }

    async fn spawn(&self, context: &str, options: &RunOptions) -> Result<(Child, String), RunOutcome> {
        let mut command = Command::new(&self.program);
        command
            .arg("run")
            .arg("--output-format")
            .arg(Self::format_flag(options.output_format))
            .args(&self.extra_args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = &options.cwd {
            command.current_dir(cwd);
        }
        for (key, value) in &options.env {
            command.env(key, value);
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(error) => return Err(RunOutcome::failed("", format!("failed to spawn task runner: {error}"))),
        };

        let mut stdin = child.stdin.take().expect("piped stdin");
        let write_result = stdin.write_all(context.as_bytes()).await;
        drop(stdin);
        if let Err(error) = write_result {
            let _ = child.kill().await;
            return Err(RunOutcome::failed("", format!("failed to write task context: {error}")));
        }

        let stdout = child.stdout.take().expect("piped stdout");
        let mut lines = BufReader::new(stdout).lines();

        let banner = timeout(SPAWN_TIMEOUT, lines.next_line()).await;
        let task_id = match banner {
            Ok(Ok(Some(line))) => SPAWN_BANNER.captures(&line).map(|c| c[1].to_string()),
            _ => None,
        };

        let Some(task_id) = task_id else {
            let _ = child.kill().await;
            let stderr = child
                .stderr
                .take()
                .expect("piped stderr");
            let mut stderr_lines = BufReader::new(stderr).lines();
            let mut collected = String::new();
            while let Ok(Some(line)) = stderr_lines.next_line().await {
                collected.push_str(&line);
                collected.push('\n');
            }
            return Err(RunOutcome {
                success: false,
                output: String::new(),
                error: Some(if collected.trim().is_empty() {
                    "spawn timed out waiting for the task banner".to_string()
                } else {
                    collected.trim().to_string()
                }),
                error_type: None,
                retry_after: None,
            });
        };

        Ok((child, task_id))
    }

    async fn wait_until_ready(&self, task_id: &str) -> Result<(), ErrorKind> {
        for attempt in 0..READY_MAX_ATTEMPTS {
            match self.status_source.poll(task_id).await {
                Ok(_) => return Ok(()),
                Err(ErrorKind::TaskNotFound) if attempt + 1 < READY_MAX_ATTEMPTS => {
                    tokio::time::sleep(READY_POLL_INTERVAL).await;
                }
                Err(_) => return Err(ErrorKind::TaskNotFound),
            }
        }
        Err(ErrorKind::TaskNotFound)
    }

    async fn follow(&self, task_id: &str, mut child: Child, options: &RunOptions) -> RunOutcome {
        let log_path = match self.status_source.log_path(task_id).await {
            Ok(path) => path,
            Err(_) => return RunOutcome::failed("", "Task not found"),
        };

        let mut tail_state = TailState::new();
        let mut buffer = String::new();
        let mut last_output = Instant::now();
        let mut last_status_poll = Instant::now() - STATUS_POLL_INTERVAL;
        let mut consecutive_status_failures = 0_u32;
        let mut ticker = tokio::time::interval(TAIL_CADENCE);

        loop {
            tokio::select! {
                _ = options.cancellation.cancelled() => {
                    cancellation::terminate(&mut child, GRACE_PERIOD).await;
                    return RunOutcome::failed(buffer, "Task killed");
                }
                _ = ticker.tick() => {
                    if let Ok(lines) = tail_once(&log_path, &mut tail_state).await {
                        if !lines.is_empty() {
                            last_output = Instant::now();
                        }
                        for line in lines {
                            if let Some(sink) = &options.on_output {
                                sink(&line);
                            }
                            buffer.push_str(&line);
                            buffer.push('\n');
                        }
                    }

                    if options.enable_liveness_check && last_output.elapsed() > options.liveness_window {
                        cancellation::terminate(&mut child, GRACE_PERIOD).await;
                        return RunOutcome::failed(buffer, "liveness window elapsed with no output");
                    }

                    if last_status_poll.elapsed() >= STATUS_POLL_INTERVAL {
                        last_status_poll = Instant::now();
                        match self.status_source.poll(task_id).await {
                            Ok(TaskStatus::Running) => {}
                            Ok(status) => {
                                let _ = tail_once(&log_path, &mut tail_state).await.map(|lines| {
                                    for line in &lines {
                                        buffer.push_str(line);
                                        buffer.push('\n');
                                    }
                                });
                                return self.resolve_terminal(status, buffer);
                            }
                            Err(_) => {
                                consecutive_status_failures += 1;
                                if consecutive_status_failures >= MAX_CONSECUTIVE_STATUS_FAILURES {
                                    return RunOutcome::failed(buffer, "status polling exhausted its retry budget");
                                }
                                continue;
                            }
                        }
                        consecutive_status_failures = 0;
                    }
                }
            }
        }
    }

    fn resolve_terminal(&self, status: TaskStatus, buffer: String) -> RunOutcome {
        match status {
            TaskStatus::Completed => RunOutcome::ok(buffer),
            TaskStatus::Failed => {
                let reason = extract_reason(&buffer);
                RunOutcome::failed(buffer, reason)
            }
            TaskStatus::Stale => {
                if conclave_extractor::extract(&buffer).is_some() {
                    RunOutcome::ok(buffer)
                } else {
                    RunOutcome::failed(buffer.clone(), extract_reason(&buffer))
                }
            }
            TaskStatus::Running => unreachable!("Running is filtered out before this point"),
        }
    }
}

#[async_trait]
impl<S: StatusSource> TaskRunner for ProcessTaskRunner<S> {
    async fn run(&self, context: &str, options: RunOptions) -> RunOutcome {
        let (child, task_id) = match self.spawn(context, &options).await {
            Ok(pair) => pair,
            Err(outcome) => return outcome,
        };

        if let Err(kind) = self.wait_until_ready(&task_id).await {
            let mut child = child;
            let _ = child.kill().await;
            return match kind {
                ErrorKind::TaskNotFound => RunOutcome::failed("", "task never registered"),
                _ => RunOutcome::failed("", "status polling failed during ready phase"),
            };
        }

        let mut outcome = self.follow(&task_id, child, &options).await;
        if !outcome.success && outcome.error.as_deref() == Some("Task killed") {
            outcome.error_type = Some(RunErrorType::Other);
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::Mutex;

    struct FakeStatusSource {
        log_path: PathBuf,
        responses: Mutex<Vec<Result<TaskStatus, ErrorKind>>>,
    }

    #[async_trait]
    impl StatusSource for FakeStatusSource {
        async fn poll(&self, _task_id: &str) -> Result<TaskStatus, ErrorKind> {
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                Ok(TaskStatus::Running)
            } else {
                responses.remove(0)
            }
        }

        async fn log_path(&self, _task_id: &str) -> Result<PathBuf, ErrorKind> {
            Ok(self.log_path.clone())
        }
    }

    #[tokio::test]
    async fn run_against_echo_extracts_output_on_completion() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("task.log");
        tokio::fs::write(&log_path, "{\"type\":\"result\",\"structured_output\":{\"ok\":true}}\n")
            .await
            .unwrap();

        let status_source = Arc::new(FakeStatusSource {
            log_path,
            responses: Mutex::new(vec![Ok(TaskStatus::Running), Ok(TaskStatus::Completed)]),
        });

        let script = dir.path().join("fake_cli.sh");
        tokio::fs::write(&script, "#!/bin/sh\necho 'Task spawned: abc123'\ncat >/dev/null\nsleep 1\n")
            .await
            .unwrap();
        use std::os::unix::fs::PermissionsExt;
        let mut perms = tokio::fs::metadata(&script).await.unwrap().permissions();
        perms.set_mode(0o755);
        tokio::fs::set_permissions(&script, perms).await.unwrap();

        let runner = ProcessTaskRunner::new(script.to_string_lossy().to_string(), Vec::new(), status_source);
        let mut options = RunOptions::new("agent-a", "level2", OutputFormat::Json);
        options.env = HashMap::new();
        let outcome = runner.run("do the thing", options).await;

        assert!(outcome.success, "expected success, got {outcome:?}");
        assert!(outcome.output.contains("structured_output"));
    }
}
