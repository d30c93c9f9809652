use std::collections::{BTreeSet, HashSet};
use std::thread;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::ScanApiConfig;
use crate::model::{AccountId, ProjectRow, ScanConfig, ScanMode};
use crate::retry::RetryPolicy;
use crate::scan_api::{ConfigUpdate, ScanApiError, ScanService};

#[derive(Debug, Clone)]
pub struct ReconcilerOptions {
    pub dry_run: bool,
    pub throttle: Duration,
    pub retry: RetryPolicy,
    pub verify_recheck: Option<Duration>,
}

impl ReconcilerOptions {
    pub fn from_config(config: &ScanApiConfig, dry_run: bool) -> Self {
        Self {
            dry_run,
            throttle: config.throttle,
            retry: config.retry,
            verify_recheck: config.verify_recheck,
        }
    }
}

impl Default for ReconcilerOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            throttle: Duration::ZERO,
            retry: RetryPolicy::default(),
            verify_recheck: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectOutcome {
    Updated {
        previous: ScanConfig,
        observed: ScanConfig,
    },
    AlreadyCompliant {
        observed: ScanConfig,
    },
    DryRun {
        previous: ScanConfig,
    },
    FetchFailed {
        error: String,
    },
    UpdateFailed {
        previous: ScanConfig,
        error: String,
    },
    VerifyFetchFailed {
        error: String,
    },
    /// The update was acknowledged but the re-fetched value did not change.
    VerificationFailed {
        observed: ScanConfig,
    },
}

impl ProjectOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ProjectOutcome::Updated { .. } => "updated",
            ProjectOutcome::AlreadyCompliant { .. } => "already_compliant",
            ProjectOutcome::DryRun { .. } => "dry_run",
            ProjectOutcome::FetchFailed { .. } => "fetch_failed",
            ProjectOutcome::UpdateFailed { .. } => "update_failed",
            ProjectOutcome::VerifyFetchFailed { .. } => "verify_fetch_failed",
            ProjectOutcome::VerificationFailed { .. } => "verification_failed",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            ProjectOutcome::FetchFailed { .. }
                | ProjectOutcome::UpdateFailed { .. }
                | ProjectOutcome::VerifyFetchFailed { .. }
        )
    }

    pub fn is_verification_failure(&self) -> bool {
        matches!(self, ProjectOutcome::VerificationFailed { .. })
    }

    pub fn detail(&self) -> String {
        match self {
            ProjectOutcome::Updated { previous, observed } => format!("{previous} -> {observed}"),
            ProjectOutcome::AlreadyCompliant { observed } => observed.to_string(),
            ProjectOutcome::DryRun { previous } => format!("would change {previous}"),
            ProjectOutcome::FetchFailed { error }
            | ProjectOutcome::UpdateFailed { error, .. }
            | ProjectOutcome::VerifyFetchFailed { error } => error.clone(),
            ProjectOutcome::VerificationFailed { observed } => format!("still {observed}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectResult {
    pub project_id: String,
    pub account_id: Option<AccountId>,
    pub outcome: ProjectOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub mode: ScanMode,
    pub results: Vec<ProjectResult>,
    pub skipped_duplicates: usize,
}

impl ReconcileReport {
    pub fn empty(mode: ScanMode) -> Self {
        Self {
            mode,
            results: Vec::new(),
            skipped_duplicates: 0,
        }
    }

    pub fn processed(&self) -> usize {
        self.results.len()
    }

    pub fn updated(&self) -> usize {
        self.count(|outcome| matches!(outcome, ProjectOutcome::Updated { .. }))
    }

    pub fn already_compliant(&self) -> usize {
        self.count(|outcome| matches!(outcome, ProjectOutcome::AlreadyCompliant { .. }))
    }

    pub fn dry_run(&self) -> usize {
        self.count(|outcome| matches!(outcome, ProjectOutcome::DryRun { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(ProjectOutcome::is_failure)
    }

    pub fn verification_failed(&self) -> usize {
        self.count(ProjectOutcome::is_verification_failure)
    }

    pub fn has_failures(&self) -> bool {
        self.failed() > 0 || self.verification_failed() > 0
    }

    /// Accounts with at least one failed or unverified project.
    pub fn accounts_needing_retry(&self) -> BTreeSet<AccountId> {
        self.results
            .iter()
            .filter(|result| {
                result.outcome.is_failure() || result.outcome.is_verification_failure()
            })
            .filter_map(|result| result.account_id)
            .collect()
    }

    pub fn failures(&self) -> impl Iterator<Item = &ProjectResult> {
        self.results
            .iter()
            .filter(|result| result.outcome.is_failure())
    }

    pub fn verification_failures(&self) -> impl Iterator<Item = &ProjectResult> {
        self.results
            .iter()
            .filter(|result| result.outcome.is_verification_failure())
    }

    pub fn summary_line(&self) -> String {
        format!(
            "{} processed, {} updated, {} already {}, {} failed, {} verification failed, {} dry-run",
            self.processed(),
            self.updated(),
            self.already_compliant(),
            self.mode.label(),
            self.failed(),
            self.verification_failed(),
            self.dry_run()
        )
    }

    fn count(&self, predicate: impl Fn(&ProjectOutcome) -> bool) -> usize {
        self.results
            .iter()
            .filter(|result| predicate(&result.outcome))
            .count()
    }
}

/// Drives projects towards a target scan mode: GET, PUT when needed, then re-GET.
pub struct Reconciler<S> {
    service: S,
    options: ReconcilerOptions,
}

impl<S: ScanService> Reconciler<S> {
    pub fn new(service: S, options: ReconcilerOptions) -> Self {
        Self { service, options }
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    pub fn options(&self) -> &ReconcilerOptions {
        &self.options
    }

    pub fn set_manual(&self, project_id: &str) -> ProjectOutcome {
        self.apply(project_id, ScanMode::Manual)
    }

    pub fn set_auto(&self, project_id: &str) -> ProjectOutcome {
        self.apply(project_id, ScanMode::Auto)
    }

    pub fn apply(&self, project_id: &str, mode: ScanMode) -> ProjectOutcome {
        let previous = match self.service.get_project(project_id) {
            Ok(project) => project.config,
            Err(err) => {
                warn!("fetch failed for project {}: {}", project_id, err);
                return ProjectOutcome::FetchFailed {
                    error: err.to_string(),
                };
            }
        };
        if mode.is_satisfied_by(&previous) {
            return ProjectOutcome::AlreadyCompliant { observed: previous };
        }
        if self.options.dry_run {
            info!(
                "dry-run: project {} would change {} -> {}",
                project_id,
                previous,
                mode.target()
            );
            return ProjectOutcome::DryRun { previous };
        }

        let update = match mode {
            ScanMode::Manual => ConfigUpdate::manual(),
            ScanMode::Auto => ConfigUpdate::auto(),
        };
        let label = format!("update project {project_id}");
        if let Err(err) = self.options.retry.run(
            &label,
            || self.service.update_project(project_id, &update),
            ScanApiError::is_retryable,
        ) {
            warn!("update failed for project {}: {}", project_id, err);
            return ProjectOutcome::UpdateFailed {
                previous,
                error: err.to_string(),
            };
        }

        let observed = match self.verify(project_id, mode) {
            Ok(observed) => observed,
            Err(err) => {
                warn!(
                    "verification fetch failed for project {}: {}",
                    project_id, err
                );
                return ProjectOutcome::VerifyFetchFailed {
                    error: err.to_string(),
                };
            }
        };
        if mode.is_satisfied_by(&observed) {
            info!(
                "project {} set to {} ({} -> {})",
                project_id,
                mode.label(),
                previous,
                observed
            );
            ProjectOutcome::Updated { previous, observed }
        } else {
            warn!(
                "project {} acknowledged update to {} but still reports {}",
                project_id,
                mode.label(),
                observed
            );
            ProjectOutcome::VerificationFailed { observed }
        }
    }

    /// Re-fetches once, and once more after `verify_recheck` if the first read
    /// does not show the target yet.
    fn verify(&self, project_id: &str, mode: ScanMode) -> Result<ScanConfig, ScanApiError> {
        let observed = self.service.get_project(project_id)?.config;
        if mode.is_satisfied_by(&observed) {
            return Ok(observed);
        }
        match self.options.verify_recheck {
            Some(delay) => {
                thread::sleep(delay);
                Ok(self.service.get_project(project_id)?.config)
            }
            None => Ok(observed),
        }
    }

    pub fn reconcile(&self, projects: &[ProjectRow], mode: ScanMode) -> ReconcileReport {
        let items: Vec<(&str, Option<AccountId>)> = projects
            .iter()
            .map(|row| (row.project_id.as_str(), Some(row.account_id)))
            .collect();
        self.reconcile_items(&items, mode)
    }

    pub fn reconcile_ids(&self, project_ids: &[String], mode: ScanMode) -> ReconcileReport {
        let items: Vec<(&str, Option<AccountId>)> =
            project_ids.iter().map(|id| (id.as_str(), None)).collect();
        self.reconcile_items(&items, mode)
    }

    fn reconcile_items(
        &self,
        items: &[(&str, Option<AccountId>)],
        mode: ScanMode,
    ) -> ReconcileReport {
        let mut report = ReconcileReport::empty(mode);
        let mut seen: HashSet<&str> = HashSet::new();
        let total = items.len();

        for &(project_id, account_id) in items {
            let project_id = project_id.trim();
            if project_id.is_empty() || !seen.insert(project_id) {
                report.skipped_duplicates += 1;
                continue;
            }
            if !report.results.is_empty() && !self.options.throttle.is_zero() {
                thread::sleep(self.options.throttle);
            }
            let outcome = self.apply(project_id, mode);
            report.results.push(ProjectResult {
                project_id: project_id.to_string(),
                account_id,
                outcome,
            });
            if report.results.len() % 50 == 0 {
                info!("progress: {}/{} projects", report.results.len(), total);
            }
        }

        info!("reconcile to {}: {}", mode, report.summary_line());
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{project, FakeScanService};

    fn fast_options() -> ReconcilerOptions {
        ReconcilerOptions {
            dry_run: false,
            throttle: Duration::ZERO,
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
            },
            verify_recheck: None,
        }
    }

    #[test]
    fn set_manual_sends_only_auto_scan() {
        let service = FakeScanService::with_projects(&[("p1", ScanConfig::AUTO)]);
        let reconciler = Reconciler::new(&service, fast_options());

        let outcome = reconciler.set_manual("p1");
        assert_eq!(
            outcome,
            ProjectOutcome::Updated {
                previous: ScanConfig::AUTO,
                observed: ScanConfig::MANUAL
            }
        );
        let updates = service.update_calls();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].1.times_per_day, None);
        assert_eq!(service.config("p1").map(|c| c.auto_scan), Some(0));
    }

    #[test]
    fn set_auto_reaches_one_seventy_two() {
        let service = FakeScanService::with_projects(&[("p1", ScanConfig::MANUAL)]);
        let reconciler = Reconciler::new(&service, fast_options());
        assert!(matches!(
            reconciler.set_auto("p1"),
            ProjectOutcome::Updated { .. }
        ));
        assert_eq!(service.config("p1"), Some(ScanConfig::AUTO));
        assert_eq!(service.update_calls()[0].1, ConfigUpdate::auto());
    }

    #[test]
    fn compliant_project_is_not_updated() {
        let service = FakeScanService::with_projects(&[("p1", ScanConfig::new(0, 72))]);
        let reconciler = Reconciler::new(&service, fast_options());
        assert_eq!(
            reconciler.set_manual("p1"),
            ProjectOutcome::AlreadyCompliant {
                observed: ScanConfig::new(0, 72)
            }
        );
        assert!(service.update_calls().is_empty());
    }

    #[test]
    fn acknowledged_but_unapplied_update_is_a_verification_failure() {
        let mut service = FakeScanService::with_projects(&[("p1", ScanConfig::AUTO)]);
        service.sticky.insert("p1".to_string());
        let mut options = fast_options();
        options.verify_recheck = Some(Duration::from_millis(1));
        let reconciler = Reconciler::new(&service, options);

        let report = reconciler.reconcile(&[project("p1", 5, "inactive")], ScanMode::Manual);
        assert_eq!(report.failed(), 0);
        assert_eq!(report.verification_failed(), 1);
        assert_eq!(
            report.results[0].outcome,
            ProjectOutcome::VerificationFailed {
                observed: ScanConfig::AUTO
            }
        );
        // initial read, verification read, one re-check
        assert_eq!(service.get_calls(), 3);
        assert_eq!(report.accounts_needing_retry().into_iter().collect::<Vec<_>>(), vec![5]);
    }

    #[test]
    fn transient_update_errors_are_retried() {
        let service = FakeScanService::with_projects(&[("p1", ScanConfig::AUTO)]);
        service
            .flaky
            .lock()
            .expect("flaky lock")
            .insert("p1".to_string(), 2);
        let reconciler = Reconciler::new(&service, fast_options());
        assert!(matches!(
            reconciler.set_manual("p1"),
            ProjectOutcome::Updated { .. }
        ));
        assert_eq!(service.update_calls().len(), 3);
    }

    #[test]
    fn rejections_are_not_retried() {
        let mut service = FakeScanService::with_projects(&[("p1", ScanConfig::AUTO)]);
        service.rejected.insert("p1".to_string());
        let reconciler = Reconciler::new(&service, fast_options());
        assert!(matches!(
            reconciler.set_manual("p1"),
            ProjectOutcome::UpdateFailed { .. }
        ));
        assert_eq!(service.update_calls().len(), 1);
    }

    #[test]
    fn one_failure_does_not_abort_the_batch() {
        let service = FakeScanService::with_projects(&[
            ("p1", ScanConfig::AUTO),
            ("p3", ScanConfig::AUTO),
        ]);
        let reconciler = Reconciler::new(&service, fast_options());
        let rows = vec![
            project("p1", 1, "inactive"),
            project("missing", 1, "inactive"),
            project("p3", 2, "inactive"),
        ];
        let report = reconciler.reconcile(&rows, ScanMode::Manual);
        assert_eq!(report.processed(), 3);
        assert_eq!(report.updated(), 2);
        assert_eq!(report.failed(), 1);
        assert!(matches!(
            report.results[1].outcome,
            ProjectOutcome::FetchFailed { .. }
        ));
    }

    #[test]
    fn duplicate_projects_are_updated_once() {
        let service = FakeScanService::with_projects(&[("p1", ScanConfig::AUTO)]);
        let reconciler = Reconciler::new(&service, fast_options());
        let rows = vec![
            project("p1", 1, "inactive"),
            project("p1", 1, "inactive"),
            project(" p1 ", 1, "inactive"),
        ];
        let report = reconciler.reconcile(&rows, ScanMode::Manual);
        assert_eq!(report.processed(), 1);
        assert_eq!(report.skipped_duplicates, 2);
        assert_eq!(service.update_calls().len(), 1);
    }

    #[test]
    fn dry_run_reads_but_never_writes() {
        let service = FakeScanService::with_projects(&[
            ("p1", ScanConfig::AUTO),
            ("p2", ScanConfig::MANUAL),
        ]);
        let mut options = fast_options();
        options.dry_run = true;
        let reconciler = Reconciler::new(&service, options);
        let ids = vec!["p1".to_string(), "p2".to_string()];
        let report = reconciler.reconcile_ids(&ids, ScanMode::Manual);
        assert_eq!(report.dry_run(), 1);
        assert_eq!(report.already_compliant(), 1);
        assert!(service.update_calls().is_empty());
    }

    #[test]
    fn empty_input_makes_no_calls() {
        let service = FakeScanService::default();
        let reconciler = Reconciler::new(&service, fast_options());
        let report = reconciler.reconcile(&[], ScanMode::Manual);
        assert_eq!(report.processed(), 0);
        assert_eq!(report.failed(), 0);
        assert_eq!(service.get_calls(), 0);
    }
}
