use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Return-code sentinel for a process that never started.
pub const RC_SPAWN_FAILED: i32 = -1;
/// Return-code sentinel for a process killed after the grace period expired.
pub const RC_KILLED: i32 = -2;
/// How long a signaled process gets to exit before escalating to SIGKILL.
pub const GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Immutable outcome of one monitored command run.
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub return_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub interrupted: bool,
}

/// Run one finalized command string under `bash -c` in its own process
/// group, streaming stdout and stderr concurrently.
///
/// When the interrupt channel flips to `true` the whole process group is
/// sent SIGTERM; if the child has not exited after [`GRACE_PERIOD`] it is
/// killed and the outcome carries [`RC_KILLED`]. A spawn failure is reported
/// as [`RC_SPAWN_FAILED`] with the error text in `stderr`. The runner writes
/// no files; everything it learns is in the returned outcome.
pub async fn run_command(
    command: &str,
    target: Option<&str>,
    mut interrupt: watch::Receiver<bool>,
) -> CommandOutcome {
    let mut cmd = Command::new("bash");
    cmd.arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(target) = target {
        cmd.env("TARGET", target);
    }
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            log::error!("Failed to spawn command '{}': {}", command, e);
            return CommandOutcome {
                return_code: RC_SPAWN_FAILED,
                stdout: String::new(),
                stderr: format!("Failed to spawn command: {}", e),
                interrupted: false,
            };
        }
    };

    let stdout_task = collect_lines(child.stdout.take());
    let stderr_task = collect_lines(child.stderr.take());
    let pid = child.id();

    let mut interrupted = false;
    let mut forced_kill = false;
    // A raise that happened before this subscription is not delivered as a
    // change notification, so the current value has to be inspected first.
    let wait_result = if *interrupt.borrow() {
        interrupted = true;
        log::debug!("Interrupt already raised, signaling process group of pid {:?}", pid);
        let (status, killed) = terminate(&mut child, pid).await;
        forced_kill = killed;
        status
    } else {
        loop {
            tokio::select! {
                status = child.wait() => break status,
                changed = interrupt.changed() => {
                    if changed.is_err() {
                        // Interrupt source is gone; nothing left to observe.
                        break child.wait().await;
                    }
                    if !*interrupt.borrow() {
                        continue;
                    }
                    interrupted = true;
                    log::debug!("Interrupt observed, signaling process group of pid {:?}", pid);
                    let (status, killed) = terminate(&mut child, pid).await;
                    forced_kill = killed;
                    break status;
                }
            }
        }
    };

    let return_code = if forced_kill {
        RC_KILLED
    } else {
        match wait_result {
            Ok(status) => exit_code_of(status),
            Err(e) => {
                log::error!("Failed to wait for child process: {}", e);
                RC_SPAWN_FAILED
            }
        }
    };

    let stdout = stdout_task.await.unwrap_or_default();
    let stderr = stderr_task.await.unwrap_or_default();

    CommandOutcome {
        return_code,
        stdout: stdout.trim().to_string(),
        stderr: stderr.trim().to_string(),
        interrupted,
    }
}

/// SIGTERM the child, wait out the grace period, and escalate to SIGKILL
/// if it is still running. Returns the wait result and whether the kill
/// was forced.
async fn terminate(child: &mut Child, pid: Option<u32>) -> (std::io::Result<ExitStatus>, bool) {
    signal_child(pid, libc::SIGTERM);
    match tokio::time::timeout(GRACE_PERIOD, child.wait()).await {
        Ok(status) => (status, false),
        Err(_) => {
            log::warn!("Process did not exit within grace period, killing");
            signal_child(pid, libc::SIGKILL);
            (child.wait().await, true)
        }
    }
}

/// Signal the child's process group so shell pipelines die with their
/// parent, falling back to the child itself if group signaling fails.
fn signal_child(pid: Option<u32>, signal: libc::c_int) {
    let Some(pid) = pid else { return };
    let group_rc = unsafe { libc::kill(-(pid as libc::pid_t), signal) };
    if group_rc != 0 {
        unsafe {
            libc::kill(pid as libc::pid_t, signal);
        }
    }
}

fn exit_code_of(status: ExitStatus) -> i32 {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        // Signal-terminated children report the negated signal number,
        // matching subprocess return-code conventions.
        status
            .code()
            .or_else(|| status.signal().map(|sig| -sig))
            .unwrap_or(RC_KILLED)
    }
    #[cfg(not(unix))]
    status.code().unwrap_or(RC_KILLED)
}

fn collect_lines<R>(reader: Option<R>) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut collected = String::new();
        if let Some(reader) = reader {
            let mut lines = BufReader::new(reader).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                collected.push_str(&line);
                collected.push('\n');
            }
        }
        collected
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::Interrupt;

    #[tokio::test]
    async fn captures_stdout_and_zero_exit() {
        let interrupt = Interrupt::new();
        let outcome = run_command("echo hi", None, interrupt.subscribe()).await;
        assert_eq!(outcome.return_code, 0);
        assert_eq!(outcome.stdout, "hi");
        assert!(outcome.stderr.is_empty());
        assert!(!outcome.interrupted);
    }

    #[tokio::test]
    async fn reports_nonzero_exit_codes() {
        let interrupt = Interrupt::new();
        let outcome = run_command("exit 3", None, interrupt.subscribe()).await;
        assert_eq!(outcome.return_code, 3);
    }

    #[tokio::test]
    async fn exports_target_environment_variable() {
        let interrupt = Interrupt::new();
        let outcome = run_command("echo \"$TARGET\"", Some("10.0.0.5"), interrupt.subscribe()).await;
        assert_eq!(outcome.stdout, "10.0.0.5");
    }

    #[tokio::test]
    async fn captures_stderr_separately() {
        let interrupt = Interrupt::new();
        let outcome = run_command("echo oops >&2", None, interrupt.subscribe()).await;
        assert!(outcome.stdout.is_empty());
        assert_eq!(outcome.stderr, "oops");
    }

    #[tokio::test]
    async fn interrupt_terminates_long_running_command() {
        let interrupt = Interrupt::new();
        let rx = interrupt.subscribe();
        let raiser = {
            let interrupt = interrupt.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                interrupt.raise();
            })
        };
        let start = std::time::Instant::now();
        let outcome = run_command("sleep 30", None, rx).await;
        raiser.await.unwrap();
        assert!(outcome.interrupted);
        assert_ne!(outcome.return_code, 0);
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn interrupt_raised_before_dispatch_terminates_immediately() {
        let interrupt = Interrupt::new();
        interrupt.raise();
        let start = std::time::Instant::now();
        let outcome = run_command("sleep 30", None, interrupt.subscribe()).await;
        assert!(outcome.interrupted);
        assert_ne!(outcome.return_code, 0);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn grace_period_expiry_escalates_to_kill() {
        let interrupt = Interrupt::new();
        let rx = interrupt.subscribe();
        let raiser = {
            let interrupt = interrupt.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                interrupt.raise();
            })
        };
        // Ignores SIGTERM, so only the forced kill can end it.
        let outcome = run_command("trap '' TERM; sleep 60", None, rx).await;
        raiser.await.unwrap();
        assert!(outcome.interrupted);
        assert_eq!(outcome.return_code, RC_KILLED);
    }
}
