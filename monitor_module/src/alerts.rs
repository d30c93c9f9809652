//! Parallel alert history fetch over non-overlapping date windows.

use chrono::{Duration, NaiveDateTime};
use crossbeam_channel::unbounded;
use std::collections::{BTreeMap, HashSet};
use std::thread;
use tracing::{info, warn};

use crate::model::AccountId;
use crate::scan_api::{Alert, AlertQuery, ScanApiError, ScanService};

pub const DEFAULT_WINDOW_DAYS: u32 = 7;
pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_PAGE_LIMIT: u32 = 5_000;
const MAX_PAGES_PER_WINDOW: u32 = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlertWindow {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

#[derive(Debug, Clone, Copy)]
pub struct FanoutOptions {
    pub window_days: u32,
    pub workers: usize,
    pub page_limit: u32,
}

impl Default for FanoutOptions {
    fn default() -> Self {
        Self {
            window_days: DEFAULT_WINDOW_DAYS,
            workers: DEFAULT_WORKERS,
            page_limit: DEFAULT_PAGE_LIMIT,
        }
    }
}

#[derive(Debug, Default)]
pub struct AlertCollection {
    pub alerts: Vec<Alert>,
    pub windows_fetched: usize,
    pub failed_windows: Vec<(AlertWindow, String)>,
}

/// Splits `[start, end)` into consecutive windows of `window_days`; the last
/// window is clipped to `end`.
pub fn split_windows(
    start: NaiveDateTime,
    end: NaiveDateTime,
    window_days: u32,
) -> Vec<AlertWindow> {
    let step = Duration::days(i64::from(window_days.max(1)));
    let mut windows = Vec::new();
    let mut cursor = start;
    while cursor < end {
        let next = (cursor + step).min(end);
        windows.push(AlertWindow {
            start: cursor,
            end: next,
        });
        cursor = next;
    }
    windows
}

/// Pages through one window until the service reports no further page.
pub fn fetch_window<S: ScanService + ?Sized>(
    service: &S,
    window: AlertWindow,
    page_limit: u32,
) -> Result<Vec<Alert>, ScanApiError> {
    let mut alerts = Vec::new();
    let mut offset = 0u32;
    for _ in 0..MAX_PAGES_PER_WINDOW {
        let page = service.alerts_history(&AlertQuery {
            min_datetime: window.start,
            max_datetime: window.end,
            offset,
            limit: page_limit,
        })?;
        let count = page.alerts.len() as u32;
        alerts.extend(page.alerts);
        if !page.has_next || count == 0 {
            break;
        }
        offset += count;
    }
    Ok(alerts)
}

/// Fetches every window on a bounded pool of workers. Results are merged by a
/// single collector; alerts seen on a window boundary twice are kept once.
pub fn fetch_alerts_parallel<S: ScanService + Sync + ?Sized>(
    service: &S,
    start: NaiveDateTime,
    end: NaiveDateTime,
    options: FanoutOptions,
) -> AlertCollection {
    let windows = split_windows(start, end, options.window_days);
    let worker_count = options.workers.max(1).min(windows.len().max(1));
    info!(
        "fetching alerts {} .. {} in {} windows with {} workers",
        start,
        end,
        windows.len(),
        worker_count
    );

    let (job_tx, job_rx) = unbounded::<AlertWindow>();
    let (result_tx, result_rx) = unbounded::<(AlertWindow, Result<Vec<Alert>, ScanApiError>)>();
    for window in &windows {
        let _ = job_tx.send(*window);
    }
    drop(job_tx);

    let mut collection = AlertCollection::default();
    thread::scope(|scope| {
        for _ in 0..worker_count {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            scope.spawn(move || {
                for window in job_rx.iter() {
                    let result = fetch_window(service, window, options.page_limit);
                    if result_tx.send((window, result)).is_err() {
                        break;
                    }
                }
            });
        }
        drop(result_tx);

        let mut seen: HashSet<String> = HashSet::new();
        for (window, result) in result_rx.iter() {
            match result {
                Ok(alerts) => {
                    collection.windows_fetched += 1;
                    info!(
                        "window {} .. {}: {} alerts",
                        window.start,
                        window.end,
                        alerts.len()
                    );
                    for alert in alerts {
                        if seen.insert(alert.dedupe_key()) {
                            collection.alerts.push(alert);
                        }
                    }
                }
                Err(err) => {
                    warn!("window {} .. {} failed: {}", window.start, window.end, err);
                    collection.failed_windows.push((window, err.to_string()));
                }
            }
        }
    });

    collection
        .alerts
        .sort_by(|a, b| a.event_datetime.cmp(&b.event_datetime));
    collection
}

/// Groups alerts by owning account using the `project_id -> account` map.
/// Alerts on unknown projects are returned under `None`.
pub fn group_by_account<'a>(
    alerts: &'a [Alert],
    owners: &BTreeMap<String, AccountId>,
) -> BTreeMap<Option<AccountId>, Vec<&'a Alert>> {
    let mut grouped: BTreeMap<Option<AccountId>, Vec<&Alert>> = BTreeMap::new();
    for alert in alerts {
        let mut accounts: Vec<Option<AccountId>> = alert
            .projects
            .keys()
            .map(|project_id| owners.get(project_id).copied())
            .collect();
        if accounts.is_empty() {
            accounts.push(None);
        }
        accounts.sort();
        accounts.dedup();
        for account in accounts {
            grouped.entry(account).or_default().push(alert);
        }
    }
    grouped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan_api::{AlertPage, ConfigUpdate, RemoteProject, UpdateAck};
    use chrono::NaiveDate;
    use std::sync::Mutex;

    fn at(day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 9, day)
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .expect("valid timestamp")
    }

    fn alert(id: &str, project: &str, when: NaiveDateTime) -> Alert {
        Alert {
            alert_id: id.to_string(),
            history_id: format!("h-{id}"),
            alert_name: "Redirect".to_string(),
            event_datetime: Some(when.format("%Y-%m-%d %H:%M:%S").to_string()),
            trigger_type_id: None,
            projects: [(project.to_string(), "name".to_string())]
                .into_iter()
                .collect(),
            locations: Vec::new(),
        }
    }

    /// Serves two alerts per window as two single-alert pages; fails one window.
    struct PagedService {
        fail_start: Option<NaiveDateTime>,
        calls: Mutex<Vec<(NaiveDateTime, u32)>>,
    }

    impl ScanService for PagedService {
        fn get_project(&self, _project_id: &str) -> Result<RemoteProject, ScanApiError> {
            Err(ScanApiError::MalformedBody("unused".to_string()))
        }

        fn update_project(
            &self,
            _project_id: &str,
            _update: &ConfigUpdate,
        ) -> Result<UpdateAck, ScanApiError> {
            Err(ScanApiError::MalformedBody("unused".to_string()))
        }

        fn alerts_history(&self, query: &AlertQuery) -> Result<AlertPage, ScanApiError> {
            self.calls
                .lock()
                .expect("calls lock")
                .push((query.min_datetime, query.offset));
            if Some(query.min_datetime) == self.fail_start {
                return Err(ScanApiError::HttpStatus {
                    status: 500,
                    body: "boom".to_string(),
                });
            }
            let id = format!("{}-{}", query.min_datetime.format("%d"), query.offset);
            Ok(AlertPage {
                alerts: vec![alert(&id, "p1", query.min_datetime)],
                has_next: query.offset == 0,
            })
        }
    }

    #[test]
    fn split_windows_covers_range_without_overlap() {
        let windows = split_windows(at(1), at(16), 7);
        assert_eq!(windows.len(), 3);
        assert_eq!(windows[0].start, at(1));
        assert_eq!(windows[0].end, at(8));
        assert_eq!(windows[1].start, at(8));
        assert_eq!(windows[2].end, at(16));
        assert!(split_windows(at(5), at(5), 7).is_empty());
    }

    #[test]
    fn parallel_fetch_collects_every_page_of_every_window() {
        let service = PagedService {
            fail_start: None,
            calls: Mutex::new(Vec::new()),
        };
        let options = FanoutOptions {
            window_days: 7,
            workers: 4,
            page_limit: 1,
        };
        let collection = fetch_alerts_parallel(&service, at(1), at(29), options);
        assert_eq!(collection.windows_fetched, 4);
        assert_eq!(collection.alerts.len(), 8);
        assert!(collection.failed_windows.is_empty());
        assert_eq!(service.calls.lock().expect("calls lock").len(), 8);
        let times: Vec<_> = collection
            .alerts
            .iter()
            .map(|a| a.event_datetime.clone())
            .collect();
        let mut sorted = times.clone();
        sorted.sort();
        assert_eq!(times, sorted);
    }

    #[test]
    fn failed_window_is_reported_and_others_kept() {
        let service = PagedService {
            fail_start: Some(at(8)),
            calls: Mutex::new(Vec::new()),
        };
        let collection = fetch_alerts_parallel(&service, at(1), at(15), FanoutOptions::default());
        assert_eq!(collection.windows_fetched, 1);
        assert_eq!(collection.failed_windows.len(), 1);
        assert_eq!(collection.failed_windows[0].0.start, at(8));
        assert_eq!(collection.alerts.len(), 2);
    }

    #[test]
    fn group_by_account_maps_projects_to_owners() {
        let alerts = vec![
            alert("1", "p1", at(1)),
            alert("2", "p2", at(2)),
            alert("3", "unknown", at(3)),
        ];
        let owners: BTreeMap<String, AccountId> = [("p1".to_string(), 10), ("p2".to_string(), 10)]
            .into_iter()
            .collect();
        let grouped = group_by_account(&alerts, &owners);
        assert_eq!(grouped.get(&Some(10)).map(Vec::len), Some(2));
        assert_eq!(grouped.get(&None).map(Vec::len), Some(1));
    }
}
