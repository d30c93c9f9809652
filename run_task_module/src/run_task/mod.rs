mod core;
mod errors;
mod log;
mod types;
mod utils;

pub use core::run_job;
pub use errors::RunTaskError;
pub use types::{RunJobOutput, RunJobParams};
pub use utils::{run_task_timeout, tail_string, DEFAULT_RUN_TASK_TIMEOUT_SECS};
