use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use chrono::Local;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use scheduler_module::{
    DailySchedule, DailyScheduler, ProcessExecutor, SchedulerError, DEFAULT_SCHEDULE_TIME,
};

#[derive(Debug, Parser)]
#[command(
    name = "daily-scheduler",
    about = "Runs the inactive-account monitor once a day at a fixed local time"
)]
struct Args {
    /// Run the job once immediately and exit with its status.
    #[arg(long)]
    test: bool,
    #[arg(long, env = "SCHEDULE_TIME", default_value = DEFAULT_SCHEDULE_TIME)]
    time: String,
    #[arg(long, env = "SCHEDULER_LOG_DIR", default_value = "logs")]
    log_dir: PathBuf,
    /// Defaults to RUN_TASK_TIMEOUT_SECS, or one hour.
    #[arg(long)]
    timeout_secs: Option<u64>,
    #[arg(long, default_value_t = 30)]
    poll_secs: u64,
    /// Defaults to the inactive-monitor binary next to this one.
    #[arg(long, env = "MONITOR_BIN")]
    monitor_bin: Option<PathBuf>,
    /// Arguments passed to the monitor.
    #[arg(last = true, default_values_t = vec!["run".to_string()])]
    monitor_args: Vec<String>,
}

fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let file_appender = tracing_appender::rolling::daily(&args.log_dir, "scheduler.log");
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_target(false))
        .with(fmt::layer().with_target(false).with_ansi(false).with_writer(file_writer))
        .init();

    match run(args) {
        Ok(code) => code,
        Err(err) => {
            error!("scheduler stopped: {}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<ExitCode, SchedulerError> {
    let schedule = DailySchedule::parse(&args.time)?;
    let timeout = args
        .timeout_secs
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
        .unwrap_or_else(run_task_module::run_task_timeout);
    let program = match args.monitor_bin {
        Some(path) => path,
        None => ProcessExecutor::sibling_monitor_binary()?,
    };
    info!(
        "monitor {} {} (timeout {}s, logs in {})",
        program.display(),
        args.monitor_args.join(" "),
        timeout.as_secs(),
        args.log_dir.display()
    );
    let executor =
        ProcessExecutor::new(program, timeout, &args.log_dir).with_args(args.monitor_args);
    let mut scheduler = DailyScheduler::new(schedule, executor, Local::now())?
        .with_status_dir(&args.log_dir);

    if args.test {
        let run = scheduler.run_once(Local::now());
        return Ok(if run.outcome.is_success() {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        });
    }

    scheduler.run_forever(Duration::from_secs(args.poll_secs.max(1)))?;
    Ok(ExitCode::SUCCESS)
}
