use chrono::{DateTime, Local};
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cron parse error: {0}")]
    Cron(#[from] cron::error::Error),
    #[error("invalid cron expression (expected 6 fields, got {0})")]
    InvalidCron(usize),
    #[error("invalid schedule time '{0}' (expected HH:MM)")]
    InvalidTime(String),
    #[error("no next run available for cron expression")]
    NoNextRun,
    #[error("snapshot json error: {0}")]
    Snapshot(#[from] serde_json::Error),
    #[error("job timed out: {0}")]
    JobTimedOut(String),
    #[error("task execution failed: {0}")]
    TaskFailed(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobExecution {
    pub exit_code: Option<i32>,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobOutcome {
    Succeeded {
        exit_code: Option<i32>,
        elapsed_secs: u64,
    },
    Failed { message: String },
    TimedOut { message: String },
}

impl JobOutcome {
    pub(crate) fn from_result(result: &Result<JobExecution, SchedulerError>) -> Self {
        match result {
            Ok(execution) => JobOutcome::Succeeded {
                exit_code: execution.exit_code,
                elapsed_secs: execution.elapsed.as_secs(),
            },
            Err(SchedulerError::JobTimedOut(message)) => JobOutcome::TimedOut {
                message: message.clone(),
            },
            Err(err) => JobOutcome::Failed {
                message: err.to_string(),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Succeeded { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobRun {
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
    pub outcome: JobOutcome,
}
