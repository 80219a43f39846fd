//! SIGTERM-then-grace-then-SIGKILL process teardown. `tokio::process::Child::kill` sends
//! SIGKILL unconditionally on Unix, which skips the grace period the contract requires, so the
//! initial signal is sent directly through `libc::kill`.

use std::time::Duration;

use tokio::process::Child;
use tokio::time::timeout;

pub const GRACE_PERIOD: Duration = Duration::from_secs(10);

#[cfg(unix)]
fn send_sigterm(pid: u32) {
    // SAFETY: `kill(2)` with a valid pid and SIGTERM only signals the process; it does not
    // touch memory the caller hands it.
    unsafe {
        libc::kill(pid as libc::pid_t, libc::SIGTERM);
    }
}

#[cfg(not(unix))]
fn send_sigterm(_pid: u32) {}

/// Sends SIGTERM to `child`, waits up to `grace` for it to exit on its own, then escalates to a
/// hard kill. Returns once the process is confirmed gone.
pub async fn terminate(child: &mut Child, grace: Duration) {
    if let Some(pid) = child.id() {
        send_sigterm(pid);
    } else {
        return;
    }
    if timeout(grace, child.wait()).await.is_err() {
        let _ = child.kill().await;
        let _ = child.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Stdio;
    use tokio::process::Command;

    #[tokio::test]
    async fn terminate_stops_a_long_running_child_promptly() {
        let mut child = Command::new("sleep")
            .arg("30")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn sleep");
        let start = tokio::time::Instant::now();
        terminate(&mut child, Duration::from_secs(2)).await;
        assert!(start.elapsed() < Duration::from_secs(2));
        assert!(child.try_wait().unwrap().is_some());
    }
}
