use chrono::{DateTime, Local, Utc};
use send_emails_module::EmailSender;
use std::collections::BTreeSet;
use tracing::{error, info, warn};

use crate::checkpoint::{Checkpoint, CheckpointError, CheckpointStore, RunStats};
use crate::config::ConfigError;
use crate::db::{AccountDirectory, DbError};
use crate::detector::{detect_newly_inactive, detect_reactivated, ChangeWindow};
use crate::model::{snapshot_of, Account, AccountId, ProjectRow, ScanMode};
use crate::reconciler::{ReconcileReport, Reconciler};
use crate::report::Notifier;
use crate::scan_api::{ScanApiError, ScanService};

#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Db(#[from] DbError),
    #[error(transparent)]
    ScanApi(#[from] ScanApiError),
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
    #[error("failed to read {path}: {source}")]
    ReadInput {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub started_at: DateTime<Local>,
    pub dry_run: bool,
    pub newly_inactive: Vec<Account>,
    pub reactivated: Vec<AccountId>,
    pub projects: Vec<ProjectRow>,
    pub report: ReconcileReport,
    pub stats: RunStats,
}

impl RunSummary {
    pub fn has_failures(&self) -> bool {
        self.report.has_failures()
    }
}

/// Detect -> resolve -> reconcile -> checkpoint, with an optional report email.
pub struct DailyMonitor<D, S, M> {
    directory: D,
    reconciler: Reconciler<S>,
    store: CheckpointStore,
    notifier: Option<Notifier<M>>,
    subsystem: String,
    change_window: Option<ChangeWindow>,
}

impl<D, S, M> DailyMonitor<D, S, M>
where
    D: AccountDirectory,
    S: ScanService,
    M: EmailSender,
{
    pub fn new(directory: D, reconciler: Reconciler<S>, store: CheckpointStore) -> Self {
        Self {
            directory,
            reconciler,
            store,
            notifier: None,
            subsystem: crate::config::DEFAULT_SUBSYSTEM.to_string(),
            change_window: None,
        }
    }

    pub fn with_notifier(mut self, notifier: Notifier<M>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_subsystem(mut self, subsystem: impl Into<String>) -> Self {
        self.subsystem = subsystem.into();
        self
    }

    pub fn with_change_window(mut self, window: Option<ChangeWindow>) -> Self {
        self.change_window = window;
        self
    }

    pub fn run(&self, started_at: DateTime<Local>) -> Result<RunSummary, MonitorError> {
        let dry_run = self.reconciler.options().dry_run;
        let accounts = self.directory.fetch_accounts()?;
        let current = snapshot_of(&accounts);

        let checkpoint = self.store.load_or_default();
        let previous = checkpoint.as_ref().map(Checkpoint::previous_snapshot);
        let mut newly = detect_newly_inactive(previous.as_ref(), &current);
        if let Some(window) = &self.change_window {
            let before = newly.len();
            // held-back accounts are retried however old their status change is
            let pending: BTreeSet<AccountId> = match &checkpoint {
                Some(checkpoint) => newly
                    .intersection(&checkpoint.pending_retry)
                    .copied()
                    .collect(),
                None => BTreeSet::new(),
            };
            newly = window.filter(&newly, &accounts, started_at.naive_local());
            newly.extend(pending);
            if newly.len() != before {
                info!(
                    "change window kept {} of {} newly inactive accounts",
                    newly.len(),
                    before
                );
            }
        }
        let reactivated = detect_reactivated(previous.as_ref(), &current);
        info!(
            "{} accounts, {} inactive, {} newly inactive, {} reactivated",
            current.len(),
            current
                .values()
                .filter(|status| status.is_inactive())
                .count(),
            newly.len(),
            reactivated.len()
        );

        let ids: Vec<AccountId> = newly.iter().copied().collect();
        let projects = self.directory.fetch_projects_for_accounts(&ids)?;
        let report = self.reconciler.reconcile(&projects, ScanMode::Manual);

        let stats = RunStats {
            total_accounts: current.len(),
            total_inactive_accounts: current
                .values()
                .filter(|status| status.is_inactive())
                .count(),
            new_inactive_accounts: newly.len(),
            reactivated_accounts: reactivated.len(),
            projects_found: projects.len(),
            projects_processed: report.processed(),
            projects_updated: report.updated(),
            projects_already_manual: report.already_compliant(),
            projects_failed: report.failed(),
            projects_verification_failed: report.verification_failed(),
            projects_dry_run: report.dry_run(),
        };

        if dry_run {
            info!("dry-run: checkpoint left unchanged");
        } else {
            let retry: BTreeSet<AccountId> = report.accounts_needing_retry();
            if !retry.is_empty() {
                warn!("{} accounts will be retried on the next run", retry.len());
            }
            let checkpoint = Checkpoint::from_run(
                &current,
                &retry,
                stats.clone(),
                started_at.with_timezone(&Utc),
            );
            self.store.save(&checkpoint)?;
        }

        let newly_inactive = accounts
            .into_iter()
            .filter(|account| newly.contains(&account.id))
            .collect();
        Ok(RunSummary {
            started_at,
            dry_run,
            newly_inactive,
            reactivated: reactivated.into_iter().collect(),
            projects,
            report,
            stats,
        })
    }

    /// Runs once and emails the outcome. A fatal error triggers the error
    /// report and is returned to the caller.
    pub fn run_and_notify(&self, started_at: DateTime<Local>) -> Result<RunSummary, MonitorError> {
        match self.run(started_at) {
            Ok(summary) => {
                info!("{}", summary.report.summary_line());
                if let Some(notifier) = &self.notifier {
                    notifier.send_run_report(&summary, &self.subsystem);
                }
                Ok(summary)
            }
            Err(err) => {
                error!("daily run failed: {}", err);
                if let Some(notifier) = &self.notifier {
                    notifier.send_error_report(&self.subsystem, &err.to_string(), started_at);
                }
                Err(err)
            }
        }
    }
}
