use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::errors::RunTaskError;

pub const DEFAULT_RUN_TASK_TIMEOUT_SECS: u64 = 3600;

const POLL_INTERVAL: Duration = Duration::from_millis(200);

pub fn tail_string(input: &str, max_len: usize) -> String {
    let trimmed = input.trim();
    if trimmed.len() <= max_len {
        return trimmed.to_string();
    }
    let mut start = trimmed.len().saturating_sub(max_len);
    while start < trimmed.len() && !trimmed.is_char_boundary(start) {
        start += 1;
    }
    trimmed[start..].to_string()
}

pub fn run_task_timeout() -> Duration {
    let timeout_secs = std::env::var("RUN_TASK_TIMEOUT_SECS")
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(DEFAULT_RUN_TASK_TIMEOUT_SECS);
    Duration::from_secs(timeout_secs)
}

pub(super) struct CapturedRun {
    pub(super) status: Option<ExitStatus>,
    pub(super) stdout: String,
    pub(super) stderr: String,
    pub(super) elapsed: Duration,
    pub(super) timed_out: bool,
}

/// Runs `cmd` until it exits or `timeout` elapses, killing it in the latter case.
///
/// Output pipes are drained on helper threads so a chatty child cannot block
/// on a full pipe while we poll.
pub(super) fn run_command_with_timeout(
    mut cmd: Command,
    timeout: Duration,
) -> Result<CapturedRun, RunTaskError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let mut child = cmd.spawn()?;
    let stdout_reader = spawn_reader(child.stdout.take());
    let stderr_reader = spawn_reader(child.stderr.take());
    let start = Instant::now();

    let (status, timed_out) = wait_or_kill(&mut child, start, timeout)?;

    Ok(CapturedRun {
        status,
        stdout: join_reader(stdout_reader),
        stderr: join_reader(stderr_reader),
        elapsed: start.elapsed(),
        timed_out,
    })
}

fn wait_or_kill(
    child: &mut Child,
    start: Instant,
    timeout: Duration,
) -> Result<(Option<ExitStatus>, bool), RunTaskError> {
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok((Some(status), false));
        }
        if start.elapsed() >= timeout {
            let _ = child.kill();
            let status = child.wait()?;
            return Ok((Some(status), true));
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn spawn_reader<R>(pipe: Option<R>) -> Option<JoinHandle<String>>
where
    R: Read + Send + 'static,
{
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            String::from_utf8_lossy(&buf).into_owned()
        })
    })
}

fn join_reader(handle: Option<JoinHandle<String>>) -> String {
    handle
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}
