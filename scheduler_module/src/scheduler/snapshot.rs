use chrono::{DateTime, Local};
use serde::Serialize;
use std::fs;
use std::path::Path;

use super::types::{JobRun, SchedulerError};

pub(crate) const SCHEDULER_STATUS_FILENAME: &str = "scheduler_status.json";

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub generated_at: DateTime<Local>,
    pub schedule_time: String,
    pub next_run: DateTime<Local>,
    pub last_run: Option<JobRun>,
    pub total_runs: u64,
    pub consecutive_failures: u32,
}

pub(crate) fn write_status_snapshot(
    path: &Path,
    status: &SchedulerStatus,
) -> Result<(), SchedulerError> {
    let payload = serde_json::to_string_pretty(status)?;
    let parent = path.parent().filter(|dir| !dir.as_os_str().is_empty());
    if let Some(parent) = parent {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, payload)?;
    Ok(())
}
