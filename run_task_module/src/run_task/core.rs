use std::io;
use std::process::Command;
use tracing::{info, warn};

use super::errors::RunTaskError;
use super::log::append_run_log;
use super::types::{RunJobOutput, RunJobParams};
use super::utils::{run_command_with_timeout, tail_string};

const OUTPUT_TAIL_LEN: usize = 2000;

pub fn run_job(params: &RunJobParams) -> Result<RunJobOutput, RunTaskError> {
    if params.program.as_os_str().is_empty() {
        return Err(RunTaskError::EmptyCommand);
    }

    let mut cmd = Command::new(&params.program);
    cmd.args(&params.args);
    if let Some(dir) = params.working_dir.as_ref() {
        cmd.current_dir(dir);
    }
    for (key, value) in &params.envs {
        cmd.env(key, value);
    }

    info!(
        "starting {} ({} {}) with timeout {}s",
        params.label,
        params.program.display(),
        params.args.join(" "),
        params.timeout.as_secs()
    );

    let run = match run_command_with_timeout(cmd, params.timeout) {
        Ok(run) => run,
        Err(RunTaskError::Io(err)) if err.kind() == io::ErrorKind::NotFound => {
            return Err(RunTaskError::CommandNotFound {
                program: params.program.clone(),
            });
        }
        Err(err) => return Err(err),
    };

    let code = run.status.and_then(|status| status.code());
    let status_line = if run.timed_out {
        format!("killed after {}s timeout", params.timeout.as_secs())
    } else {
        format!("exit {:?} in {:.1}s", code, run.elapsed.as_secs_f64())
    };
    if let Some(log_path) = params.log_path.as_ref() {
        if let Err(err) = append_run_log(
            log_path,
            &params.label,
            &status_line,
            &run.stdout,
            &run.stderr,
        ) {
            warn!("{}", err);
        }
    }

    let combined = format!("{}{}", run.stdout, run.stderr);
    if run.timed_out {
        return Err(RunTaskError::CommandTimeout {
            command: params.label.clone(),
            timeout_secs: params.timeout.as_secs(),
            output: tail_string(&combined, OUTPUT_TAIL_LEN),
        });
    }
    if code != Some(0) {
        return Err(RunTaskError::CommandFailed {
            command: params.label.clone(),
            status: code,
            output: tail_string(&combined, OUTPUT_TAIL_LEN),
        });
    }

    info!("{} finished: {}", params.label, status_line);
    Ok(RunJobOutput {
        status: code,
        stdout: run.stdout,
        stderr: run.stderr,
        elapsed: run.elapsed,
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    fn shell(script: &str, timeout: Duration) -> RunJobParams {
        RunJobParams::new("test-job", "/bin/sh", timeout).with_args(["-c", script])
    }

    #[test]
    fn run_job_captures_stdout() {
        let output = run_job(&shell("echo hello", Duration::from_secs(10))).expect("run");
        assert_eq!(output.status, Some(0));
        assert_eq!(output.stdout.trim(), "hello");
    }

    #[test]
    fn run_job_reports_non_zero_exit() {
        let err = run_job(&shell("echo boom >&2; exit 3", Duration::from_secs(10)))
            .expect_err("should fail");
        assert_eq!(err.exit_status(), Some(3));
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn run_job_kills_on_timeout() {
        let err = run_job(&shell("sleep 5", Duration::from_millis(300))).expect_err("timeout");
        assert!(err.is_timeout());
    }

    #[test]
    fn run_job_appends_to_log_file() {
        let temp = TempDir::new().expect("tempdir");
        let log_path = temp.path().join("logs").join("job.log");
        let params = shell("echo first; echo second >&2", Duration::from_secs(10))
            .with_log_path(&log_path);
        run_job(&params).expect("first run");
        run_job(&params).expect("second run");

        let log = fs::read_to_string(&log_path).expect("log");
        assert_eq!(log.matches("test-job").count(), 2);
        assert!(log.contains("--- stdout ---"));
        assert!(log.contains("second"));
    }

    #[test]
    fn run_job_missing_program_is_not_found() {
        let params = RunJobParams::new(
            "missing",
            "/definitely/not/a/real/binary",
            Duration::from_secs(1),
        );
        let err = run_job(&params).expect_err("missing binary");
        assert!(matches!(err, RunTaskError::CommandNotFound { .. }));
    }
}
