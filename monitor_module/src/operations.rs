//! One-off maintenance operations around the daily run.

use regex::Regex;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::LazyLock;
use std::thread;
use tracing::{info, warn};

use crate::alerts::{fetch_alerts_parallel, group_by_account, AlertCollection, FanoutOptions};
use crate::db::AccountDirectory;
use crate::model::{AccountId, ProjectRow, ScanConfig, ScanMode};
use crate::monitor::MonitorError;
use crate::reconciler::{ReconcileReport, Reconciler};
use crate::scan_api::{Alert, RemoteProject, ScanApiError, ScanService};

/// First field of a line, split on a comma, semicolon or whitespace, when it is
/// all digits. Optionally quoted.
static ACCOUNT_ID_FIELD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^"?(\d{1,18})"?(?:[,;\s]|$)"#).expect("account id pattern")
});

/// Reads account ids from a text or CSV export, one per line in the first
/// column. Header, comment and blank lines are skipped.
pub fn read_account_ids(path: &Path) -> Result<Vec<AccountId>, MonitorError> {
    let raw = fs::read_to_string(path).map_err(|source| MonitorError::ReadInput {
        path: path.display().to_string(),
        source,
    })?;
    let ids = parse_account_ids(&raw);
    if ids.is_empty() {
        return Err(MonitorError::InvalidInput(format!(
            "no account ids found in {}",
            path.display()
        )));
    }
    Ok(ids)
}

pub fn parse_account_ids(raw: &str) -> Vec<AccountId> {
    let mut ids: Vec<AccountId> = raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.starts_with('#'))
        .filter_map(|line| ACCOUNT_ID_FIELD.captures(line))
        .filter_map(|captures| captures[1].parse::<AccountId>().ok())
        .collect();
    ids.sort_unstable();
    ids.dedup();
    ids
}

#[derive(Debug)]
pub struct ResetOutcome {
    pub requested: usize,
    pub inactive: Vec<AccountId>,
    pub skipped_live: Vec<AccountId>,
    pub unknown: Vec<AccountId>,
    pub report: ReconcileReport,
}

/// Resets every project of the listed accounts that are currently inactive,
/// regardless of project age.
pub fn reset_accounts<D, S>(
    directory: &D,
    reconciler: &Reconciler<S>,
    account_ids: &[AccountId],
) -> Result<ResetOutcome, MonitorError>
where
    D: AccountDirectory,
    S: ScanService,
{
    let accounts = directory.fetch_accounts_by_id(account_ids)?;
    let found: BTreeMap<AccountId, bool> = accounts
        .iter()
        .map(|account| (account.id, account.status.is_inactive()))
        .collect();
    let mut inactive = Vec::new();
    let mut skipped_live = Vec::new();
    let mut unknown = Vec::new();
    for id in account_ids {
        match found.get(id) {
            Some(true) => inactive.push(*id),
            Some(false) => skipped_live.push(*id),
            None => unknown.push(*id),
        }
    }
    if !skipped_live.is_empty() {
        warn!("skipping {} accounts that are not inactive", skipped_live.len());
    }
    if !unknown.is_empty() {
        warn!("{} accounts were not found: {:?}", unknown.len(), unknown);
    }

    let projects = directory.fetch_projects_for_accounts(&inactive)?;
    let report = reconciler.reconcile(&projects, ScanMode::Manual);
    Ok(ResetOutcome {
        requested: account_ids.len(),
        inactive,
        skipped_live,
        unknown,
        report,
    })
}

/// Moves recent projects of live accounts to auto mode, optionally only
/// those targeting one of `locations`.
pub fn bulk_enable<D, S>(
    directory: &D,
    reconciler: &Reconciler<S>,
    days: u32,
    locations: &[String],
) -> Result<ReconcileReport, MonitorError>
where
    D: AccountDirectory,
    S: ScanService,
{
    let projects = directory.fetch_projects_created_since(days)?;
    let total = projects.len();
    let eligible: Vec<ProjectRow> = projects
        .into_iter()
        .filter(|row| row.account_status.is_live())
        .filter(|row| row.targets_any(locations))
        .collect();
    info!(
        "{} of {} projects from the last {} days are eligible for auto mode",
        eligible.len(),
        total,
        days
    );
    Ok(reconciler.reconcile(&eligible, ScanMode::Auto))
}

/// Returns projects created within `days` to manual mode.
pub fn revert_recent<D, S>(
    directory: &D,
    reconciler: &Reconciler<S>,
    days: u32,
) -> Result<ReconcileReport, MonitorError>
where
    D: AccountDirectory,
    S: ScanService,
{
    let projects = directory.fetch_projects_created_since(days)?;
    info!(
        "reverting {} projects from the last {} days",
        projects.len(),
        days
    );
    Ok(reconciler.reconcile(&projects, ScanMode::Manual))
}

#[derive(Debug)]
pub struct AuditReport {
    pub inactive_accounts: usize,
    pub checked: usize,
    pub compliant: usize,
    pub violations: Vec<(ProjectRow, ScanConfig)>,
    pub fetch_errors: Vec<(String, String)>,
    pub repair: Option<ReconcileReport>,
}

/// Checks that every project of every inactive account is in manual mode.
/// With `repair`, violating projects are reset.
pub fn audit_inactive<D, S>(
    directory: &D,
    reconciler: &Reconciler<S>,
    repair: bool,
) -> Result<AuditReport, MonitorError>
where
    D: AccountDirectory,
    S: ScanService,
{
    let inactive: Vec<AccountId> = directory
        .fetch_accounts()?
        .into_iter()
        .filter(|account| account.status.is_inactive())
        .map(|account| account.id)
        .collect();
    let projects = directory.fetch_projects_for_accounts(&inactive)?;
    let throttle = reconciler.options().throttle;

    let mut report = AuditReport {
        inactive_accounts: inactive.len(),
        checked: 0,
        compliant: 0,
        violations: Vec::new(),
        fetch_errors: Vec::new(),
        repair: None,
    };
    for (index, row) in projects.into_iter().enumerate() {
        if index > 0 && !throttle.is_zero() {
            thread::sleep(throttle);
        }
        report.checked += 1;
        match reconciler.service().get_project(&row.project_id) {
            Ok(project) if ScanMode::Manual.is_satisfied_by(&project.config) => {
                report.compliant += 1;
            }
            Ok(project) => {
                warn!(
                    "project {} of inactive account {} is {}",
                    row.project_id, row.account_id, project.config
                );
                report.violations.push((row, project.config));
            }
            Err(err) => report.fetch_errors.push((row.project_id, err.to_string())),
        }
    }
    info!(
        "audit: {} projects checked, {} compliant, {} violations, {} fetch errors",
        report.checked,
        report.compliant,
        report.violations.len(),
        report.fetch_errors.len()
    );

    if repair && !report.violations.is_empty() {
        let rows: Vec<ProjectRow> = report
            .violations
            .iter()
            .map(|(row, _)| row.clone())
            .collect();
        report.repair = Some(reconciler.reconcile(&rows, ScanMode::Manual));
    }
    Ok(report)
}

pub fn inspect_projects<S: ScanService>(
    service: &S,
    project_ids: &[String],
) -> Vec<(String, Result<RemoteProject, ScanApiError>)> {
    project_ids
        .iter()
        .map(|id| (id.clone(), service.get_project(id)))
        .collect()
}

#[derive(Debug)]
pub struct AlertAttribution {
    pub collection: AlertCollection,
    pub by_account: BTreeMap<Option<AccountId>, usize>,
}

/// Fetches alert history in parallel and counts alerts per owning account.
pub fn attribute_alerts<D, S>(
    directory: &D,
    service: &S,
    start: chrono::NaiveDateTime,
    end: chrono::NaiveDateTime,
    options: FanoutOptions,
) -> Result<AlertAttribution, MonitorError>
where
    D: AccountDirectory,
    S: ScanService + Sync,
{
    let collection = fetch_alerts_parallel(service, start, end, options);
    let project_ids: Vec<String> = collection
        .alerts
        .iter()
        .flat_map(|alert: &Alert| alert.projects.keys().cloned())
        .collect();
    let owners = directory.fetch_accounts_for_projects(&project_ids)?;
    let by_account = group_by_account(&collection.alerts, &owners)
        .into_iter()
        .map(|(account, alerts)| (account, alerts.len()))
        .collect();
    Ok(AlertAttribution {
        collection,
        by_account,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconciler::ReconcilerOptions;
    use crate::retry::RetryPolicy;
    use crate::testing::{account, project, FakeDirectory, FakeScanService};
    use tempfile::TempDir;

    fn reconciler(service: &FakeScanService) -> Reconciler<&FakeScanService> {
        Reconciler::new(
            service,
            ReconcilerOptions {
                retry: RetryPolicy::none(),
                ..ReconcilerOptions::default()
            },
        )
    }

    #[test]
    fn parse_account_ids_skips_comments_and_dedupes() {
        let raw = "# exported accounts\n1798665\naccount_id,name\n42,Acme\n42, Acme again\n\n 7 \n";
        assert_eq!(parse_account_ids(raw), vec![7, 42, 1_798_665]);
    }

    #[test]
    fn parse_account_ids_reads_only_the_first_column() {
        let raw = "account_id,name,inactivity_date,projects\n\
                   42,Acme,2026-10-01,3\n\
                   \"77\",\"Beta 10\",2026-09-30,12\n\
                   2026-10-02,stray row,1,2\n\
                   88\tGamma\t2026-10-03\n\
                   99x,Delta\n";
        assert_eq!(parse_account_ids(raw), vec![42, 77, 88]);
    }

    #[test]
    fn read_account_ids_rejects_empty_file() {
        let temp = TempDir::new().expect("tempdir");
        let path = temp.path().join("accounts.txt");
        fs::write(&path, "# nothing here\n").expect("write");
        assert!(matches!(
            read_account_ids(&path),
            Err(MonitorError::InvalidInput(_))
        ));
        fs::write(&path, "11\n12\n").expect("write");
        assert_eq!(read_account_ids(&path).expect("ids"), vec![11, 12]);
    }

    #[test]
    fn reset_only_touches_inactive_accounts() {
        let directory = FakeDirectory {
            accounts: vec![account(1, "inactive"), account(2, "live")],
            projects: vec![project("p1", 1, "inactive"), project("p2", 2, "live")],
            ..FakeDirectory::default()
        };
        let service =
            FakeScanService::with_projects(&[("p1", ScanConfig::AUTO), ("p2", ScanConfig::AUTO)]);
        let outcome = reset_accounts(&directory, &reconciler(&service), &[1, 2, 3]).expect("reset");
        assert_eq!(outcome.inactive, vec![1]);
        assert_eq!(outcome.skipped_live, vec![2]);
        assert_eq!(outcome.unknown, vec![3]);
        assert_eq!(outcome.report.updated(), 1);
        assert_eq!(service.config("p2"), Some(ScanConfig::AUTO));
    }

    #[test]
    fn bulk_enable_targets_live_accounts_in_requested_locations() {
        let mut fr_project = project("p3", 3, "live");
        fr_project.locations = vec!["FR".to_string()];
        let directory = FakeDirectory {
            projects: vec![
                project("p1", 1, "live"),
                project("p2", 2, "inactive"),
                fr_project,
            ],
            ..FakeDirectory::default()
        };
        let service = FakeScanService::with_projects(&[
            ("p1", ScanConfig::MANUAL),
            ("p2", ScanConfig::MANUAL),
            ("p3", ScanConfig::MANUAL),
        ]);
        let report = bulk_enable(&directory, &reconciler(&service), 30, &["IT".to_string()])
            .expect("enable");
        assert_eq!(report.updated(), 1);
        assert_eq!(service.config("p1"), Some(ScanConfig::AUTO));
        assert_eq!(service.config("p2"), Some(ScanConfig::MANUAL));
        assert_eq!(service.config("p3"), Some(ScanConfig::MANUAL));
    }

    #[test]
    fn revert_returns_recent_projects_to_manual() {
        let directory = FakeDirectory {
            projects: vec![project("p1", 1, "live"), project("p2", 2, "live")],
            ..FakeDirectory::default()
        };
        let service = FakeScanService::with_projects(&[
            ("p1", ScanConfig::AUTO),
            ("p2", ScanConfig::MANUAL),
        ]);
        let report = revert_recent(&directory, &reconciler(&service), 7).expect("revert");
        assert_eq!(report.updated(), 1);
        assert_eq!(report.already_compliant(), 1);
        assert_eq!(service.config("p1").map(|c| c.auto_scan), Some(0));
    }

    #[test]
    fn audit_reports_and_repairs_violations() {
        let directory = FakeDirectory {
            accounts: vec![account(1, "inactive"), account(2, "live")],
            projects: vec![
                project("p1", 1, "inactive"),
                project("p2", 1, "inactive"),
                project("gone", 1, "inactive"),
                project("p3", 2, "live"),
            ],
            ..FakeDirectory::default()
        };
        let service = FakeScanService::with_projects(&[
            ("p1", ScanConfig::AUTO),
            ("p2", ScanConfig::MANUAL),
            ("p3", ScanConfig::AUTO),
        ]);
        let reconciler = reconciler(&service);

        let audit = audit_inactive(&directory, &reconciler, false).expect("audit");
        assert_eq!(audit.inactive_accounts, 1);
        assert_eq!(audit.checked, 3);
        assert_eq!(audit.compliant, 1);
        assert_eq!(audit.violations.len(), 1);
        assert_eq!(audit.fetch_errors.len(), 1);
        assert!(audit.repair.is_none());
        assert!(service.update_calls().is_empty());

        let repaired = audit_inactive(&directory, &reconciler, true).expect("repair");
        let repair = repaired.repair.expect("repair report");
        assert_eq!(repair.updated(), 1);
        assert_eq!(service.config("p1").map(|c| c.auto_scan), Some(0));
        assert_eq!(service.config("p3"), Some(ScanConfig::AUTO));
    }
}
