use chrono::Local;
use run_task_module::{run_job, RunJobParams, RunTaskError};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use super::types::{JobExecution, SchedulerError};

const JOB_LABEL: &str = "inactive-monitor";

pub trait JobExecutor {
    fn execute(&self) -> Result<JobExecution, SchedulerError>;
}

/// Runs the monitor as a child process with a bounded timeout. Output goes to
/// `<log_dir>/monitor_YYYYMMDD.log`, one file per day.
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
    log_dir: PathBuf,
    working_dir: Option<PathBuf>,
}

impl ProcessExecutor {
    pub fn new(
        program: impl Into<PathBuf>,
        timeout: Duration,
        log_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            program: program.into(),
            args: vec!["run".to_string()],
            timeout,
            log_dir: log_dir.into(),
            working_dir: None,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// The monitor binary installed next to the running executable.
    pub fn sibling_monitor_binary() -> Result<PathBuf, SchedulerError> {
        let current = std::env::current_exe()?;
        let dir = current.parent().unwrap_or_else(|| Path::new("."));
        Ok(dir.join(format!("{JOB_LABEL}{}", std::env::consts::EXE_SUFFIX)))
    }

    pub fn log_path_for_today(&self) -> PathBuf {
        self.log_dir
            .join(format!("monitor_{}.log", Local::now().format("%Y%m%d")))
    }
}

impl JobExecutor for ProcessExecutor {
    fn execute(&self) -> Result<JobExecution, SchedulerError> {
        let mut params = RunJobParams::new(JOB_LABEL, &self.program, self.timeout)
            .with_args(self.args.clone())
            .with_log_path(self.log_path_for_today());
        if let Some(dir) = &self.working_dir {
            params = params.with_working_dir(dir);
        }

        match run_job(&params) {
            Ok(output) => {
                info!(
                    "{} completed in {:.1}s",
                    JOB_LABEL,
                    output.elapsed.as_secs_f64()
                );
                Ok(JobExecution {
                    exit_code: output.status,
                    elapsed: output.elapsed,
                })
            }
            Err(err @ RunTaskError::CommandTimeout { .. }) => {
                warn!("{}", err);
                Err(SchedulerError::JobTimedOut(err.to_string()))
            }
            Err(err) => {
                warn!("{} failed: {}", JOB_LABEL, err);
                Err(SchedulerError::TaskFailed(err.to_string()))
            }
        }
    }
}
