mod core;
mod executor;
mod schedule;
mod snapshot;
mod types;

pub use core::DailyScheduler;
pub use executor::{JobExecutor, ProcessExecutor};
pub use schedule::{DailySchedule, DEFAULT_SCHEDULE_TIME};
pub use snapshot::SchedulerStatus;
pub use types::{JobExecution, JobOutcome, JobRun, SchedulerError};
