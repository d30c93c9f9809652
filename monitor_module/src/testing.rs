//! In-memory fakes for the database and scan-service seams.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use crate::db::{AccountDirectory, DbError};
use crate::model::{Account, AccountId, AccountStatus, ProjectRow, ScanConfig};
use crate::scan_api::{
    AlertPage, AlertQuery, ConfigUpdate, RemoteProject, ScanApiError, ScanService, UpdateAck,
};

#[derive(Default)]
pub(crate) struct FakeScanService {
    pub(crate) configs: Mutex<BTreeMap<String, ScanConfig>>,
    /// Projects whose updates are acknowledged but never applied.
    pub(crate) sticky: BTreeSet<String>,
    /// Projects whose updates fail this many times with a 503 before succeeding.
    pub(crate) flaky: Mutex<BTreeMap<String, u32>>,
    pub(crate) rejected: BTreeSet<String>,
    pub(crate) gets: Mutex<Vec<String>>,
    pub(crate) updates: Mutex<Vec<(String, ConfigUpdate)>>,
}

impl FakeScanService {
    pub(crate) fn with_projects(entries: &[(&str, ScanConfig)]) -> Self {
        let service = Self::default();
        {
            let mut configs = service.configs.lock().expect("configs lock");
            for (id, config) in entries {
                configs.insert((*id).to_string(), *config);
            }
        }
        service
    }

    pub(crate) fn config(&self, id: &str) -> Option<ScanConfig> {
        self.configs.lock().expect("configs lock").get(id).copied()
    }

    pub(crate) fn update_calls(&self) -> Vec<(String, ConfigUpdate)> {
        self.updates.lock().expect("updates lock").clone()
    }

    pub(crate) fn get_calls(&self) -> usize {
        self.gets.lock().expect("gets lock").len()
    }
}

impl ScanService for FakeScanService {
    fn get_project(&self, project_id: &str) -> Result<RemoteProject, ScanApiError> {
        self.gets
            .lock()
            .expect("gets lock")
            .push(project_id.to_string());
        match self.config(project_id) {
            Some(config) => Ok(RemoteProject {
                id: project_id.to_string(),
                name: None,
                config,
            }),
            None => Err(ScanApiError::HttpStatus {
                status: 404,
                body: "not found".to_string(),
            }),
        }
    }

    fn update_project(
        &self,
        project_id: &str,
        update: &ConfigUpdate,
    ) -> Result<UpdateAck, ScanApiError> {
        self.updates
            .lock()
            .expect("updates lock")
            .push((project_id.to_string(), *update));
        if let Some(remaining) = self.flaky.lock().expect("flaky lock").get_mut(project_id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ScanApiError::HttpStatus {
                    status: 503,
                    body: "busy".to_string(),
                });
            }
        }
        if self.rejected.contains(project_id) {
            return Err(ScanApiError::Rejected {
                code: "Invalid".to_string(),
                message: "rejected".to_string(),
            });
        }
        if !self.sticky.contains(project_id) {
            let mut configs = self.configs.lock().expect("configs lock");
            let entry = configs
                .entry(project_id.to_string())
                .or_insert(ScanConfig::MANUAL);
            entry.auto_scan = update.auto_scan;
            if let Some(times) = update.times_per_day {
                entry.times_per_day = times;
            } else if update.auto_scan == 0 {
                entry.times_per_day = 0;
            }
        }
        Ok(UpdateAck {
            code: "Success".to_string(),
            message: None,
        })
    }

    fn alerts_history(&self, _query: &AlertQuery) -> Result<AlertPage, ScanApiError> {
        Ok(AlertPage::default())
    }
}

#[derive(Default)]
pub(crate) struct FakeDirectory {
    pub(crate) accounts: Vec<Account>,
    pub(crate) projects: Vec<ProjectRow>,
    pub(crate) fail: bool,
    pub(crate) project_queries: Mutex<Vec<Vec<AccountId>>>,
}

impl FakeDirectory {
    fn check(&self) -> Result<(), DbError> {
        if self.fail {
            return Err(DbError::Query("connection refused".to_string()));
        }
        Ok(())
    }
}

impl AccountDirectory for FakeDirectory {
    fn fetch_accounts(&self) -> Result<Vec<Account>, DbError> {
        self.check()?;
        Ok(self.accounts.clone())
    }

    fn fetch_accounts_by_id(&self, ids: &[AccountId]) -> Result<Vec<Account>, DbError> {
        self.check()?;
        Ok(self
            .accounts
            .iter()
            .filter(|account| ids.contains(&account.id))
            .cloned()
            .collect())
    }

    fn fetch_projects_for_accounts(&self, ids: &[AccountId]) -> Result<Vec<ProjectRow>, DbError> {
        self.check()?;
        self.project_queries
            .lock()
            .expect("queries lock")
            .push(ids.to_vec());
        Ok(self
            .projects
            .iter()
            .filter(|row| ids.contains(&row.account_id))
            .cloned()
            .collect())
    }

    fn fetch_projects_created_since(&self, _days: u32) -> Result<Vec<ProjectRow>, DbError> {
        self.check()?;
        Ok(self.projects.clone())
    }

    fn fetch_accounts_for_projects(
        &self,
        project_ids: &[String],
    ) -> Result<BTreeMap<String, AccountId>, DbError> {
        self.check()?;
        Ok(self
            .projects
            .iter()
            .filter(|row| project_ids.contains(&row.project_id))
            .map(|row| (row.project_id.clone(), row.account_id))
            .collect())
    }
}

pub(crate) fn account(id: AccountId, status: &str) -> Account {
    Account {
        id,
        name: Some(format!("Account {id}")),
        status: AccountStatus::parse(status),
        inactivity_date: None,
        update_time: None,
        change_reason: None,
    }
}

pub(crate) fn project(id: &str, account_id: AccountId, status: &str) -> ProjectRow {
    ProjectRow {
        project_id: id.to_string(),
        campaign_id: account_id * 10,
        campaign_status: Some("RUNNING".to_string()),
        account_id,
        account_name: Some(format!("Account {account_id}")),
        account_status: AccountStatus::parse(status),
        locations: vec!["IT".to_string()],
        creation_date: None,
    }
}
