mod scheduler;

pub use scheduler::{
    DailySchedule, DailyScheduler, JobExecution, JobExecutor, JobOutcome, JobRun, ProcessExecutor,
    SchedulerError, SchedulerStatus, DEFAULT_SCHEDULE_TIME,
};
