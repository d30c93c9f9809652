//! Pure status-transition detection over two snapshots.

use chrono::{Duration, NaiveDateTime};
use std::collections::{BTreeMap, BTreeSet};

use crate::model::{Account, AccountId, StatusSnapshot};

/// Accounts that are inactive now and were absent or not inactive before.
///
/// Without a previous snapshot every currently inactive account is reported.
pub fn detect_newly_inactive(
    previous: Option<&StatusSnapshot>,
    current: &StatusSnapshot,
) -> BTreeSet<AccountId> {
    current
        .iter()
        .filter(|(_, status)| status.is_inactive())
        .filter(|(id, _)| match previous.and_then(|snapshot| snapshot.get(id)) {
            Some(before) => !before.is_inactive(),
            None => true,
        })
        .map(|(id, _)| *id)
        .collect()
}

/// Accounts that were inactive in `previous` and are live now.
pub fn detect_reactivated(
    previous: Option<&StatusSnapshot>,
    current: &StatusSnapshot,
) -> BTreeSet<AccountId> {
    let Some(previous) = previous else {
        return BTreeSet::new();
    };
    previous
        .iter()
        .filter(|(_, status)| status.is_inactive())
        .filter(|(id, _)| current.get(id).is_some_and(|status| status.is_live()))
        .map(|(id, _)| *id)
        .collect()
}

/// Best-effort "changed recently" filter on the account timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeWindow {
    span: Duration,
}

impl ChangeWindow {
    pub fn hours(hours: u32) -> Self {
        Self {
            span: Duration::hours(i64::from(hours)),
        }
    }

    /// Accounts without any timestamp are kept.
    pub fn contains(&self, account: &Account, now: NaiveDateTime) -> bool {
        match account.status_changed_at() {
            Some(changed_at) => changed_at >= now - self.span,
            None => true,
        }
    }

    pub fn filter(
        &self,
        ids: &BTreeSet<AccountId>,
        accounts: &[Account],
        now: NaiveDateTime,
    ) -> BTreeSet<AccountId> {
        let by_id: BTreeMap<AccountId, &Account> = accounts
            .iter()
            .map(|account| (account.id, account))
            .collect();
        ids.iter()
            .copied()
            .filter(|id| match by_id.get(id) {
                Some(account) => self.contains(account, now),
                None => true,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AccountStatus;
    use chrono::NaiveDate;

    fn snapshot(entries: &[(AccountId, &str)]) -> StatusSnapshot {
        entries
            .iter()
            .map(|(id, status)| (*id, AccountStatus::parse(status)))
            .collect()
    }

    fn at(day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, day)
            .and_then(|date| date.and_hms_opt(hour, 0, 0))
            .expect("valid timestamp")
    }

    fn account(
        id: AccountId,
        inactivity: Option<NaiveDateTime>,
        update: Option<NaiveDateTime>,
    ) -> Account {
        Account {
            id,
            name: None,
            status: AccountStatus::Inactive,
            inactivity_date: inactivity,
            update_time: update,
            change_reason: None,
        }
    }

    #[test]
    fn live_to_inactive_is_reported() {
        let previous = snapshot(&[(1, "live")]);
        let current = snapshot(&[(1, "inactive")]);
        let newly = detect_newly_inactive(Some(&previous), &current);
        assert_eq!(newly.into_iter().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn unchanged_inactive_accounts_are_not_reported_again() {
        let previous = snapshot(&[(1, "inactive"), (2, "paused"), (3, "live")]);
        let current = snapshot(&[(1, "inactive"), (2, "depleted"), (3, "live")]);
        assert!(detect_newly_inactive(Some(&previous), &current).is_empty());
    }

    #[test]
    fn accounts_absent_from_previous_count_as_new() {
        let previous = snapshot(&[(1, "live")]);
        let current = snapshot(&[(1, "live"), (2, "frozen")]);
        let newly = detect_newly_inactive(Some(&previous), &current);
        assert!(newly.contains(&2));
        assert_eq!(newly.len(), 1);
    }

    #[test]
    fn missing_previous_reports_every_inactive_account() {
        let current = snapshot(&[(1, "inactive"), (2, "live"), (3, "paused")]);
        let newly = detect_newly_inactive(None, &current);
        assert_eq!(newly.into_iter().collect::<Vec<_>>(), vec![1, 3]);
    }

    #[test]
    fn unknown_status_is_not_inactive() {
        let previous = snapshot(&[(1, "live")]);
        let current = snapshot(&[(1, "pending_review")]);
        assert!(detect_newly_inactive(Some(&previous), &current).is_empty());
    }

    #[test]
    fn reactivated_requires_previous_inactive_and_current_live() {
        let previous = snapshot(&[(1, "inactive"), (2, "inactive"), (3, "live")]);
        let current = snapshot(&[(1, "live"), (2, "paused"), (3, "live")]);
        let reactivated = detect_reactivated(Some(&previous), &current);
        assert_eq!(reactivated.into_iter().collect::<Vec<_>>(), vec![1]);
        assert!(detect_reactivated(None, &current).is_empty());
    }

    #[test]
    fn change_window_prefers_inactivity_date_and_keeps_unknown() {
        let now = at(14, 12);
        let window = ChangeWindow::hours(24);
        let accounts = vec![
            account(1, Some(at(14, 1)), None),
            account(2, Some(at(10, 1)), Some(at(14, 2))),
            account(3, None, Some(at(13, 13))),
            account(4, None, None),
        ];
        let ids: BTreeSet<AccountId> = [1, 2, 3, 4, 5].into_iter().collect();
        let kept = window.filter(&ids, &accounts, now);
        assert_eq!(kept.into_iter().collect::<Vec<_>>(), vec![1, 3, 4, 5]);
    }
}
