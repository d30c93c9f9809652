use std::path::{Path, PathBuf};
use std::process::ExitCode;

use chrono::{Duration, Local, Utc};
use clap::{Args, Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use monitor_module::alerts::FanoutOptions;
use monitor_module::checkpoint::parse_last_check;
use monitor_module::operations::{
    attribute_alerts, audit_inactive, bulk_enable, inspect_projects, read_account_ids,
    reset_accounts, revert_recent,
};
use monitor_module::{
    ChangeWindow, CheckpointStore, DailyMonitor, EmailConfig, MonitorConfig, MonitorError,
    MySqlAccountDirectory, Notifier, ReconcileReport, Reconciler, ReconcilerOptions, ScanClient,
    ScanMode,
};
use send_emails_module::SmtpMailer;

#[derive(Debug, Parser)]
#[command(
    name = "inactive-monitor",
    about = "Keeps scan projects of inactive accounts in manual mode"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Daily reconciliation: detect newly inactive accounts and reset their projects.
    Run {
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        no_email: bool,
    },
    /// Seed the checkpoint with an already-processed account list.
    InitState {
        #[arg(long)]
        accounts_file: PathBuf,
        /// RFC 3339 or YYYY-MM-DDTHH:MM:SS; defaults to now.
        #[arg(long)]
        last_check: Option<String>,
    },
    /// Reset every project of the listed inactive accounts.
    Reset {
        #[command(flatten)]
        accounts: AccountSelection,
        #[arg(long)]
        dry_run: bool,
    },
    /// Enable auto mode (1,72) on recent projects of live accounts.
    Enable {
        #[arg(long)]
        days: u32,
        /// Comma-separated location codes, e.g. IT,FR,DE,ES.
        #[arg(long, value_delimiter = ',')]
        locations: Vec<String>,
        #[arg(long)]
        dry_run: bool,
    },
    /// Return projects created in the last N days to manual mode.
    Revert {
        #[arg(long)]
        days: u32,
        #[arg(long)]
        dry_run: bool,
    },
    /// Audit that projects of inactive accounts are in manual mode.
    Verify {
        #[arg(long)]
        repair: bool,
    },
    /// Show, and optionally change, individual projects.
    Project {
        #[arg(required = true)]
        ids: Vec<String>,
        #[arg(long, value_parser = clap::value_parser!(u8).range(0..=1))]
        auto: Option<u8>,
        /// Only used with --auto 1; the service requires 72.
        #[arg(long)]
        times: Option<u32>,
    },
    /// Fetch alert history in parallel windows and attribute alerts to accounts.
    Alerts {
        #[arg(long, default_value_t = 30)]
        days: u32,
        #[arg(long, default_value_t = 7)]
        window_days: u32,
        #[arg(long, default_value_t = 4)]
        workers: usize,
    },
}

#[derive(Debug, Args)]
#[group(required = true, multiple = false)]
struct AccountSelection {
    #[arg(long)]
    accounts_file: Option<PathBuf>,
    #[arg(long = "account")]
    account: Vec<i64>,
}

fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    match run(cli.command) {
        Ok(code) => code,
        Err(err) => {
            error!("{}", err);
            ExitCode::FAILURE
        }
    }
}

fn exit_for(report: &ReconcileReport) -> ExitCode {
    info!("{}", report.summary_line());
    if report.has_failures() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn reconciler(
    config: &MonitorConfig,
    dry_run: bool,
) -> Result<Reconciler<ScanClient>, MonitorError> {
    let client = ScanClient::new(&config.scan_api)?;
    Ok(Reconciler::new(
        client,
        ReconcilerOptions::from_config(&config.scan_api, dry_run),
    ))
}

fn run(command: Command) -> Result<ExitCode, MonitorError> {
    if let Command::InitState {
        accounts_file,
        last_check,
    } = &command
    {
        return init_state(accounts_file, last_check.as_deref());
    }

    let config = MonitorConfig::from_env()?;
    match command {
        Command::Run { dry_run, no_email } => run_daily(&config, dry_run, no_email),
        Command::InitState { .. } => Ok(ExitCode::SUCCESS),
        Command::Reset { accounts, dry_run } => {
            let ids = match accounts.accounts_file {
                Some(path) => read_account_ids(&path)?,
                None => accounts.account,
            };
            let directory = MySqlAccountDirectory::connect(&config.db)?;
            let outcome = reset_accounts(&directory, &reconciler(&config, dry_run)?, &ids)?;
            info!(
                "{} requested, {} inactive, {} live skipped, {} unknown",
                outcome.requested,
                outcome.inactive.len(),
                outcome.skipped_live.len(),
                outcome.unknown.len()
            );
            Ok(exit_for(&outcome.report))
        }
        Command::Enable {
            days,
            locations,
            dry_run,
        } => {
            let locations: Vec<String> = locations
                .iter()
                .map(|code| code.trim().to_ascii_uppercase())
                .filter(|code| !code.is_empty())
                .collect();
            let directory = MySqlAccountDirectory::connect(&config.db)?;
            let report = bulk_enable(&directory, &reconciler(&config, dry_run)?, days, &locations)?;
            Ok(exit_for(&report))
        }
        Command::Revert { days, dry_run } => {
            let directory = MySqlAccountDirectory::connect(&config.db)?;
            let report = revert_recent(&directory, &reconciler(&config, dry_run)?, days)?;
            Ok(exit_for(&report))
        }
        Command::Verify { repair } => {
            let directory = MySqlAccountDirectory::connect(&config.db)?;
            let audit = audit_inactive(&directory, &reconciler(&config, false)?, repair)?;
            for (row, observed) in &audit.violations {
                println!(
                    "{}\taccount {}\t{}",
                    row.project_id, row.account_id, observed
                );
            }
            let clean = match &audit.repair {
                Some(report) => {
                    info!("repair: {}", report.summary_line());
                    !report.has_failures()
                }
                None => audit.violations.is_empty(),
            };
            Ok(if clean && audit.fetch_errors.is_empty() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Project { ids, auto, times } => {
            let reconciler = reconciler(&config, false)?;
            match auto {
                Some(1) => {
                    if times.is_some_and(|value| value != 72) {
                        warn!("auto mode is always applied as (1,72); --times ignored");
                    }
                    Ok(exit_for(&reconciler.reconcile_ids(&ids, ScanMode::Auto)))
                }
                Some(_) => Ok(exit_for(&reconciler.reconcile_ids(&ids, ScanMode::Manual))),
                None => {
                    let mut failed = false;
                    for (id, result) in inspect_projects(reconciler.service(), &ids) {
                        match result {
                            Ok(project) => println!(
                                "{}\t{}\t{}",
                                id,
                                project.config,
                                project.name.unwrap_or_default()
                            ),
                            Err(err) => {
                                failed = true;
                                println!("{}\terror: {}", id, err);
                            }
                        }
                    }
                    Ok(if failed {
                        ExitCode::FAILURE
                    } else {
                        ExitCode::SUCCESS
                    })
                }
            }
        }
        Command::Alerts {
            days,
            window_days,
            workers,
        } => {
            let directory = MySqlAccountDirectory::connect(&config.db)?;
            let client = ScanClient::new(&config.scan_api)?;
            let end = Local::now().naive_local();
            let start = end - Duration::days(i64::from(days));
            let attribution = attribute_alerts(
                &directory,
                &client,
                start,
                end,
                FanoutOptions {
                    window_days,
                    workers,
                    ..FanoutOptions::default()
                },
            )?;
            for (account, count) in &attribution.by_account {
                match account {
                    Some(id) => println!("{}\t{}", id, count),
                    None => println!("unattributed\t{}", count),
                }
            }
            info!(
                "{} alerts from {} windows, {} windows failed",
                attribution.collection.alerts.len(),
                attribution.collection.windows_fetched,
                attribution.collection.failed_windows.len()
            );
            Ok(if attribution.collection.failed_windows.is_empty() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}

fn run_daily(
    config: &MonitorConfig,
    dry_run: bool,
    no_email: bool,
) -> Result<ExitCode, MonitorError> {
    let started_at = Local::now();
    let notifier = if no_email {
        None
    } else {
        let email = EmailConfig::from_env()?;
        Some(Notifier::from_config(SmtpMailer::new(email.smtp.clone()), &email))
    };

    let directory = match MySqlAccountDirectory::connect(&config.db) {
        Ok(directory) => directory,
        Err(err) => {
            let err = MonitorError::from(err);
            if let Some(notifier) = &notifier {
                notifier.send_error_report(&config.subsystem, &err.to_string(), started_at);
            }
            return Err(err);
        }
    };

    let mut monitor = DailyMonitor::new(
        directory,
        reconciler(config, dry_run)?,
        CheckpointStore::new(config.state_path.clone()),
    )
    .with_subsystem(config.subsystem.clone())
    .with_change_window(config.change_window_hours.map(ChangeWindow::hours));
    if let Some(notifier) = notifier {
        monitor = monitor.with_notifier(notifier);
    }

    let summary = monitor.run_and_notify(started_at)?;
    Ok(if summary.has_failures() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn init_state(accounts_file: &Path, last_check: Option<&str>) -> Result<ExitCode, MonitorError> {
    dotenvy::dotenv().ok();
    let last_check = match last_check {
        Some(raw) => parse_last_check(raw).ok_or_else(|| {
            MonitorError::InvalidInput(format!("unrecognized --last-check '{raw}'"))
        })?,
        None => Utc::now(),
    };
    let ids = read_account_ids(accounts_file)?;
    let store = CheckpointStore::new(MonitorConfig::state_path_from_env());
    let checkpoint = store.seed(&ids, last_check)?;
    info!(
        "seeded {} with {} accounts (last_check {})",
        store.path().display(),
        checkpoint.inactive_accounts.len(),
        checkpoint.last_check.to_rfc3339()
    );
    Ok(ExitCode::SUCCESS)
}
