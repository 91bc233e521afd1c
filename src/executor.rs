//! Single-command execution with timeout and output capture.
//!
//! One invocation produces one record; there are no retries here. On Unix the
//! shell is spawned as its own process-group leader so a timeout can take down
//! everything the command started, not just the shell. Whatever is still
//! running in that group when the shell exits is killed too, and the pipe
//! drain shares the command's deadline.
use crate::config::PipelineStep;
use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

/// Return code recorded when a command did not exit on its own.
pub const TIMEOUT_RETURNCODE: i32 = -1;

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// How long to wait for pipes to close after a timeout kill.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Inputs for one rendered command.
pub struct CommandRequest<'a> {
    pub command: &'a str,
    pub cwd: &'a Path,
    pub version: &'a str,
    pub step: PipelineStep,
    pub env: &'a BTreeMap<String, String>,
    pub timeout: Option<Duration>,
}

/// Immutable record of one executed command.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CommandRecord {
    pub version: String,
    pub step: PipelineStep,
    pub command: String,
    pub succeeded: bool,
    pub returncode: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub duration_ms: u128,
}

fn shell_command(command: &str) -> Command {
    if cfg!(windows) {
        let mut cmd = Command::new("cmd");
        cmd.args(["/C", command]);
        cmd
    } else {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", command]);
        cmd
    }
}

/// Bytes read from one output pipe, plus the read error that ended it early.
struct Captured {
    bytes: Vec<u8>,
    error: Option<String>,
}

impl Captured {
    fn abandoned() -> Self {
        Self {
            bytes: Vec::new(),
            error: Some("pipe still open after the process group was killed".to_string()),
        }
    }
}

fn spawn_reader<R: Read + Send + 'static>(source: Option<R>) -> mpsc::Receiver<Captured> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut bytes = Vec::new();
        let error = match source {
            Some(mut source) => source.read_to_end(&mut bytes).err().map(|err| err.to_string()),
            None => None,
        };
        let _ = tx.send(Captured { bytes, error });
    });
    rx
}

/// Wait for a reader, giving up at `deadline` when there is one.
fn receive(rx: &mpsc::Receiver<Captured>, deadline: Option<Instant>) -> Result<Captured, RecvTimeoutError> {
    match deadline {
        Some(deadline) => rx.recv_timeout(deadline.saturating_duration_since(Instant::now())),
        None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
    }
}

#[cfg(unix)]
fn kill_process_tree(child: &mut Child) {
    let Ok(pgid) = libc::pid_t::try_from(child.id()) else {
        let _ = child.kill();
        return;
    };
    // SAFETY: kill(2) with a negative pid signals the process group we created
    // at spawn; it has no memory-safety preconditions.
    let rc = unsafe { libc::kill(-pgid, libc::SIGKILL) };
    if rc != 0 {
        let _ = child.kill();
    }
}

#[cfg(not(unix))]
fn kill_process_tree(child: &mut Child) {
    let _ = child.kill();
}

fn captured_text(captured: &Captured, stream: &str) -> String {
    let mut text = String::from_utf8_lossy(&captured.bytes).trim_end().to_string();
    if let Some(error) = &captured.error {
        if !text.is_empty() {
            text.push('\n');
        }
        text.push_str(&format!("[{stream} capture incomplete: {error}]"));
    }
    text
}

/// Run `request.command` through the shell and capture the outcome.
///
/// `Err` is reserved for infrastructure problems (the shell could not be
/// spawned or waited on); a failing or timed-out command is an `Ok` record.
pub fn execute(request: &CommandRequest<'_>) -> Result<CommandRecord> {
    let mut cmd = shell_command(request.command);
    cmd.current_dir(request.cwd)
        .envs(request.env)
        .env("REGX_VERSION", request.version)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    let start = Instant::now();
    let mut child = cmd.spawn().with_context(|| {
        format!(
            "spawn {} command for version {} in {}",
            request.step,
            request.version,
            request.cwd.display()
        )
    })?;
    let stdout_reader = spawn_reader(child.stdout.take());
    let stderr_reader = spawn_reader(child.stderr.take());

    let deadline = request.timeout.map(|timeout| start + timeout);
    let mut timed_out = false;
    let status = loop {
        if let Some(status) = child.try_wait().context("check command status")? {
            break status;
        }
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            timed_out = true;
            kill_process_tree(&mut child);
            break child.wait().context("reap timed-out command")?;
        }
        thread::sleep(POLL_INTERVAL);
    };
    // Background jobs left in the group would otherwise keep the pipes open.
    kill_process_tree(&mut child);

    let mut captured = Vec::with_capacity(2);
    for rx in [&stdout_reader, &stderr_reader] {
        let output = match receive(rx, deadline) {
            Ok(output) => output,
            Err(RecvTimeoutError::Timeout) => {
                timed_out = true;
                kill_process_tree(&mut child);
                rx.recv_timeout(DRAIN_GRACE)
                    .unwrap_or_else(|_| Captured::abandoned())
            }
            Err(RecvTimeoutError::Disconnected) => Captured::abandoned(),
        };
        captured.push(output);
    }
    let stdout = captured_text(&captured[0], "stdout");
    let mut stderr = captured_text(&captured[1], "stderr");
    let duration_ms = start.elapsed().as_millis();

    let returncode = if timed_out {
        TIMEOUT_RETURNCODE
    } else {
        status.code().unwrap_or(TIMEOUT_RETURNCODE)
    };
    if let (true, Some(timeout)) = (timed_out, request.timeout) {
        if !stderr.is_empty() {
            stderr.push('\n');
        }
        stderr.push_str(&format!("Timed out after {}s", timeout.as_secs_f64()));
    }
    let succeeded = !timed_out && status.success();

    tracing::info!(
        step = %request.step,
        version = request.version,
        returncode,
        timed_out,
        duration_ms,
        "command complete"
    );

    Ok(CommandRecord {
        version: request.version.to_string(),
        step: request.step,
        command: request.command.to_string(),
        succeeded,
        returncode,
        stdout,
        stderr,
        timed_out,
        duration_ms,
    })
}
