use chrono::{DateTime, Local};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use super::executor::JobExecutor;
use super::schedule::DailySchedule;
use super::snapshot::{write_status_snapshot, SchedulerStatus, SCHEDULER_STATUS_FILENAME};
use super::types::{JobOutcome, JobRun, SchedulerError};

pub struct DailyScheduler<E: JobExecutor> {
    schedule: DailySchedule,
    executor: E,
    next_run: DateTime<Local>,
    last_run: Option<JobRun>,
    total_runs: u64,
    consecutive_failures: u32,
    status_path: Option<PathBuf>,
}

impl<E: JobExecutor> DailyScheduler<E> {
    pub fn new(
        schedule: DailySchedule,
        executor: E,
        now: DateTime<Local>,
    ) -> Result<Self, SchedulerError> {
        let next_run = schedule.next_after(now)?;
        info!(
            "daily job scheduled at {} local; next run {}",
            schedule.time_label(),
            next_run
        );
        Ok(Self {
            schedule,
            executor,
            next_run,
            last_run: None,
            total_runs: 0,
            consecutive_failures: 0,
            status_path: None,
        })
    }

    /// Writes `scheduler_status.json` into `dir` after every run.
    pub fn with_status_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.status_path = Some(dir.into().join(SCHEDULER_STATUS_FILENAME));
        self
    }

    pub fn with_next_run(mut self, at: DateTime<Local>) -> Self {
        self.next_run = at;
        self
    }

    pub fn next_run(&self) -> DateTime<Local> {
        self.next_run
    }

    pub fn last_run(&self) -> Option<&JobRun> {
        self.last_run.as_ref()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn status(&self, now: DateTime<Local>) -> SchedulerStatus {
        SchedulerStatus {
            generated_at: now,
            schedule_time: self.schedule.time_label(),
            next_run: self.next_run,
            last_run: self.last_run.clone(),
            total_runs: self.total_runs,
            consecutive_failures: self.consecutive_failures,
        }
    }

    /// Runs the job if `now` has reached the next trigger, then advances the
    /// trigger to the first slot after the run finished. Job failures do not
    /// stop the schedule.
    pub fn tick(&mut self, now: DateTime<Local>) -> Result<Option<JobRun>, SchedulerError> {
        if now < self.next_run {
            return Ok(None);
        }
        let run = self.execute_now(now);
        self.next_run = self.schedule.next_after(run.finished_at)?;
        info!("next run {}", self.next_run);
        self.write_status(run.finished_at);
        Ok(Some(run))
    }

    /// Runs the job immediately without touching the next trigger.
    pub fn run_once(&mut self, now: DateTime<Local>) -> JobRun {
        let run = self.execute_now(now);
        self.write_status(run.finished_at);
        run
    }

    pub fn run_until(
        &mut self,
        poll_interval: Duration,
        stop: &AtomicBool,
    ) -> Result<(), SchedulerError> {
        while !stop.load(Ordering::SeqCst) {
            self.tick(Local::now())?;
            if stop.load(Ordering::SeqCst) {
                break;
            }
            thread::sleep(poll_interval);
        }
        Ok(())
    }

    pub fn run_forever(&mut self, poll_interval: Duration) -> Result<(), SchedulerError> {
        let never = AtomicBool::new(false);
        self.run_until(poll_interval, &never)
    }

    fn execute_now(&mut self, started_at: DateTime<Local>) -> JobRun {
        info!("starting scheduled job (run {})", self.total_runs + 1);
        let clock = Instant::now();
        let result = self.executor.execute();
        let finished_at = chrono::Duration::from_std(clock.elapsed())
            .ok()
            .map_or(started_at, |elapsed| started_at + elapsed);
        let outcome = JobOutcome::from_result(&result);
        self.total_runs += 1;
        match &outcome {
            JobOutcome::Succeeded { .. } => {
                self.consecutive_failures = 0;
                info!("scheduled job succeeded");
            }
            JobOutcome::Failed { message } | JobOutcome::TimedOut { message } => {
                self.consecutive_failures += 1;
                error!(
                    "scheduled job failed ({} in a row): {}",
                    self.consecutive_failures, message
                );
            }
        }
        let run = JobRun {
            started_at,
            finished_at,
            outcome,
        };
        self.last_run = Some(run.clone());
        run
    }

    fn write_status(&self, now: DateTime<Local>) {
        let Some(path) = &self.status_path else {
            return;
        };
        if let Err(err) = write_status_snapshot(path, &self.status(now)) {
            warn!(
                "failed to write scheduler status {}: {}",
                path.display(),
                err
            );
        }
    }
}
