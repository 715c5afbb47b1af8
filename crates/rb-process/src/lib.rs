//! Child-process execution: spawning, output capture, soft and hard
//! deadlines, cancellation, and process-group cleanup.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, warn};

pub mod timing;

pub use timing::{IntegrationTiming, TimingSummary, aggregate, extract_timings};

const READ_BUF_SIZE: usize = 4096;
/// Grace between SIGTERM and SIGKILL when a run is cancelled.
const CANCEL_GRACE: Duration = Duration::from_secs(3);

/// Controls whether captured output is also forwarded to the host streams.
///
/// Forwarding is the default so the operator can distinguish "thinking"
/// from "hung"; `BufferOnly` suppresses it for quiet runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamMode {
    BufferOnly,
    #[default]
    Forward,
}

/// A fully-resolved command, ready to spawn. Template rendering and preset
/// layering happen upstream; the runner only executes.
#[derive(Debug, Clone)]
pub struct CommandRequest {
    /// The rendered command line.
    pub command: String,
    pub cwd: PathBuf,
    /// The complete child environment (process env already merged in).
    pub env: BTreeMap<String, String>,
    /// Pass the whole line to `sh -c` instead of splitting into argv.
    pub shell: bool,
    pub timeout_ms: Option<u64>,
    /// Soft deadline: warn (and mark the record) without killing.
    pub warn_after_ms: Option<u64>,
    pub stream_mode: StreamMode,
}

impl CommandRequest {
    pub fn new(command: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            cwd: cwd.into(),
            env: BTreeMap::new(),
            shell: false,
            timeout_ms: None,
            warn_after_ms: None,
            stream_mode: StreamMode::default(),
        }
    }
}

/// What happened when a command ran (or was simulated).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandOutcome {
    pub success: bool,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    pub timed_out: bool,
    pub long_running: bool,
    /// The run's cancellation signal fired while this command was live.
    pub cancelled: bool,
    /// Spawn-level failure (command not found, permission denied).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Whether this record was synthesised by a dry run.
    pub dry_run: bool,
}

impl CommandOutcome {
    /// Timing markers extracted from the captured stdout.
    pub fn timings(&self) -> Vec<IntegrationTiming> {
        extract_timings(&self.stdout)
    }
}

/// Synthesise a successful outcome without spawning. Used by dry runs with
/// the default `skip` strategy.
pub fn synthesize_dry_run(request: &CommandRequest) -> CommandOutcome {
    debug!(command = %request.command, "dry-run: skipping spawn");
    CommandOutcome {
        success: true,
        exit_code: 0,
        stdout: String::new(),
        stderr: String::new(),
        duration_ms: 0,
        timed_out: false,
        long_running: false,
        cancelled: false,
        error: None,
        dry_run: true,
    }
}

/// Run a resolved command to completion. See [`run_with_cancel`].
pub async fn run(request: &CommandRequest) -> CommandOutcome {
    run_with_cancel(request, None).await
}

/// Run a resolved command to completion, observing a cancellation signal.
///
/// stdout and stderr are read concurrently, accumulated, and (unless the
/// request is `BufferOnly`) forwarded to the host streams. A `warn_after_ms`
/// expiry emits a long-running warning to stderr but lets the child
/// continue; a `timeout_ms` expiry kills the child's process group and marks
/// the outcome `timed_out`. When the cancel signal flips, the child receives
/// SIGTERM and, after a short grace, SIGKILL. Spawn failures are reported as
/// a failed outcome rather than an `Err`, so every attempt produces a
/// history record.
pub async fn run_with_cancel(
    request: &CommandRequest,
    mut cancel: Option<watch::Receiver<bool>>,
) -> CommandOutcome {
    let started = Instant::now();

    let mut cmd = build_command(request);
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());
    cmd.stdin(std::process::Stdio::null());
    cmd.kill_on_drop(true);

    // Isolate the child in its own process group so a kill reaps
    // grandchildren too.
    // SAFETY: setsid() is async-signal-safe and runs before exec.
    #[cfg(unix)]
    unsafe {
        cmd.pre_exec(|| {
            libc::setsid();
            Ok(())
        });
    }

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            return CommandOutcome {
                success: false,
                exit_code: 127,
                stdout: String::new(),
                stderr: String::new(),
                duration_ms: started.elapsed().as_millis() as u64,
                timed_out: false,
                long_running: false,
                cancelled: false,
                error: Some(format!("failed to spawn '{}': {e}", request.command)),
                dry_run: false,
            };
        }
    };

    let mut stdout_pipe = child.stdout.take();
    let mut stderr_pipe = child.stderr.take();
    let mut stdout = String::new();
    let mut stderr = String::new();
    let mut stdout_buf = [0u8; READ_BUF_SIZE];
    let mut stderr_buf = [0u8; READ_BUF_SIZE];
    let mut stdout_done = stdout_pipe.is_none();
    let mut stderr_done = stderr_pipe.is_none();

    let warn_deadline = request
        .warn_after_ms
        .map(|ms| started + Duration::from_millis(ms));
    let mut kill_deadline = request
        .timeout_ms
        .map(|ms| started + Duration::from_millis(ms));
    let far_future = || Instant::now() + Duration::from_secs(86_400);

    let mut long_running = false;
    let mut timed_out = false;
    let mut cancelled = false;

    while !(stdout_done && stderr_done) {
        let warn_at = if long_running {
            far_future()
        } else {
            warn_deadline.unwrap_or_else(far_future)
        };
        let kill_at = kill_deadline.unwrap_or_else(far_future);

        tokio::select! {
            result = read_some(&mut stdout_pipe, &mut stdout_buf), if !stdout_done => {
                match result {
                    Some(chunk) => {
                        if request.stream_mode == StreamMode::Forward {
                            print!("{chunk}");
                        }
                        stdout.push_str(&chunk);
                    }
                    None => stdout_done = true,
                }
            }
            result = read_some(&mut stderr_pipe, &mut stderr_buf), if !stderr_done => {
                match result {
                    Some(chunk) => {
                        if request.stream_mode == StreamMode::Forward {
                            eprint!("{chunk}");
                        }
                        stderr.push_str(&chunk);
                    }
                    None => stderr_done = true,
                }
            }
            _ = tokio::time::sleep_until(warn_at.into()), if !long_running && warn_deadline.is_some() => {
                long_running = true;
                eprintln!(
                    "warning: command still running after {}ms: {}",
                    request.warn_after_ms.unwrap_or(0),
                    request.command
                );
            }
            _ = tokio::time::sleep_until(kill_at.into()), if kill_deadline.is_some() => {
                if cancelled {
                    // The SIGTERM grace expired.
                    warn!(command = %request.command, "grace expired after cancellation, sending SIGKILL");
                } else {
                    timed_out = true;
                    warn!(command = %request.command, timeout_ms = request.timeout_ms, "killing child on timeout");
                }
                kill_process_group(&mut child, Signal::Kill);
                break;
            }
            _ = wait_cancelled(&mut cancel), if cancel.is_some() && !cancelled => {
                cancelled = true;
                debug!(command = %request.command, "cancellation observed, sending SIGTERM");
                kill_process_group(&mut child, Signal::Term);
                let grace_at = Instant::now() + CANCEL_GRACE;
                kill_deadline = Some(kill_deadline.map_or(grace_at, |at| at.min(grace_at)));
            }
        }
    }

    // A zero warn threshold always marks, even when the child exits before
    // the select loop observes the deadline.
    if let Some(deadline) = warn_deadline {
        if !long_running && Instant::now() >= deadline {
            long_running = true;
            eprintln!(
                "warning: command still running after {}ms: {}",
                request.warn_after_ms.unwrap_or(0),
                request.command
            );
        }
    }

    let status = child.wait().await;
    let raw_code = match status {
        Ok(status) => status.code().unwrap_or(1),
        Err(_) => 1,
    };
    let exit_code = if timed_out { 124 } else { raw_code };

    CommandOutcome {
        success: exit_code == 0 && !timed_out && !cancelled,
        exit_code,
        stdout,
        stderr,
        duration_ms: started.elapsed().as_millis() as u64,
        timed_out,
        long_running,
        cancelled,
        error: None,
        dry_run: false,
    }
}

async fn read_some(
    pipe: &mut Option<impl AsyncReadExt + Unpin>,
    buf: &mut [u8],
) -> Option<String> {
    let reader = pipe.as_mut()?;
    match reader.read(buf).await {
        Ok(0) | Err(_) => None,
        Ok(n) => Some(String::from_utf8_lossy(&buf[..n]).into_owned()),
    }
}

/// Resolve once the watched cancellation flag becomes true; pend forever
/// otherwise (including when the sender side is gone without cancelling).
async fn wait_cancelled(rx: &mut Option<watch::Receiver<bool>>) {
    match rx {
        Some(rx) => loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        },
        None => std::future::pending().await,
    }
}

fn build_command(request: &CommandRequest) -> Command {
    let mut cmd = if request.shell {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(&request.command);
        cmd
    } else {
        let argv = split_command_line(&request.command);
        let program = argv.first().cloned().unwrap_or_default();
        let mut cmd = Command::new(program);
        if argv.len() > 1 {
            cmd.args(&argv[1..]);
        }
        cmd
    };
    cmd.current_dir(&request.cwd);
    cmd.env_clear();
    cmd.envs(&request.env);
    cmd
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Signal {
    Term,
    Kill,
}

/// Signal the child's whole process group.
fn kill_process_group(child: &mut tokio::process::Child, signal: Signal) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            let signum = match signal {
                Signal::Term => libc::SIGTERM,
                Signal::Kill => libc::SIGKILL,
            };
            // SAFETY: kill() is async-signal-safe; the negative PID targets
            // the process group created by setsid in pre_exec.
            unsafe {
                libc::kill(-(pid as i32), signum);
            }
            return;
        }
    }
    let _ = (child.start_kill(), signal);
}

/// Split a command line into argv, honouring single/double quotes and
/// backslash escapes. Used only when `shell` is false.
pub fn split_command_line(line: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_single = false;
    let mut in_double = false;
    let mut has_token = false;
    let mut chars = line.chars();

    while let Some(ch) = chars.next() {
        match ch {
            '\'' if !in_double => {
                in_single = !in_single;
                has_token = true;
            }
            '"' if !in_single => {
                in_double = !in_double;
                has_token = true;
            }
            '\\' if !in_single => {
                if let Some(next) = chars.next() {
                    current.push(next);
                    has_token = true;
                }
            }
            c if c.is_whitespace() && !in_single && !in_double => {
                if has_token {
                    args.push(std::mem::take(&mut current));
                    has_token = false;
                }
            }
            other => {
                current.push(other);
                has_token = true;
            }
        }
    }
    if has_token {
        args.push(current);
    }
    args
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
