#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use monitor_module::{
    Account, AccountDirectory, AccountId, AccountStatus, DbError, ProjectRow, RetryPolicy,
    ScanApiConfig, ScanClient,
};
use send_emails_module::{EmailError, EmailSender, OutgoingEmail};

pub fn start_mockito_server(test_name: &str) -> Option<mockito::ServerGuard> {
    let server = std::panic::catch_unwind(|| mockito::Server::new());
    match server {
        Ok(server) => Some(server),
        Err(_) => {
            eprintln!(
                "Skipping {test_name}; unable to start mockito server in this environment."
            );
            None
        }
    }
}

pub const API_KEY: &str = "test-api-key";

/// Client config pointed at a mock server with fast retries and no recheck delay.
pub fn scan_config(server: &mockito::ServerGuard) -> ScanApiConfig {
    let mut config = ScanApiConfig::new(server.url(), API_KEY);
    config.timeout = Duration::from_secs(5);
    config.throttle = Duration::ZERO;
    config.retry = RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(2),
    };
    config.verify_recheck = None;
    config
}

pub fn scan_client(server: &mockito::ServerGuard) -> ScanClient {
    ScanClient::new(&scan_config(server)).expect("scan client")
}

pub fn project_body(id: &str, auto_scan: &str, times_per_day: &str) -> String {
    format!(
        r#"{{"response":{{"project":{{"id":"{id}","name":"Project {id}","auto_scan":"{auto_scan}","times_per_day":"{times_per_day}"}}}}}}"#
    )
}

pub const SUCCESS_BODY: &str = r#"{"status":{"code":"success","message":"Project updated"}}"#;

pub fn account(id: AccountId, status: &str) -> Account {
    Account {
        id,
        name: Some(format!("Account {id}")),
        status: AccountStatus::parse(status),
        inactivity_date: None,
        update_time: None,
        change_reason: None,
    }
}

pub fn project(project_id: &str, account_id: AccountId, status: &str) -> ProjectRow {
    ProjectRow {
        project_id: project_id.to_string(),
        campaign_id: 100,
        campaign_status: Some("RUNNING".to_string()),
        account_id,
        account_name: Some(format!("Account {account_id}")),
        account_status: AccountStatus::parse(status),
        locations: vec!["IT".to_string()],
        creation_date: None,
    }
}

/// Fixed account and project tables.
#[derive(Default)]
pub struct StaticDirectory {
    pub accounts: Vec<Account>,
    pub projects: Vec<ProjectRow>,
}

impl AccountDirectory for StaticDirectory {
    fn fetch_accounts(&self) -> Result<Vec<Account>, DbError> {
        Ok(self.accounts.clone())
    }

    fn fetch_accounts_by_id(&self, ids: &[AccountId]) -> Result<Vec<Account>, DbError> {
        Ok(self
            .accounts
            .iter()
            .filter(|account| ids.contains(&account.id))
            .cloned()
            .collect())
    }

    fn fetch_projects_for_accounts(&self, ids: &[AccountId]) -> Result<Vec<ProjectRow>, DbError> {
        Ok(self
            .projects
            .iter()
            .filter(|row| ids.contains(&row.account_id))
            .cloned()
            .collect())
    }

    fn fetch_projects_created_since(&self, _days: u32) -> Result<Vec<ProjectRow>, DbError> {
        Ok(self.projects.clone())
    }

    fn fetch_accounts_for_projects(
        &self,
        project_ids: &[String],
    ) -> Result<BTreeMap<String, AccountId>, DbError> {
        Ok(self
            .projects
            .iter()
            .filter(|row| project_ids.contains(&row.project_id))
            .map(|row| (row.project_id.clone(), row.account_id))
            .collect())
    }
}

/// Records every message and enforces the same recipient check as the SMTP path.
#[derive(Default)]
pub struct RecordingSender {
    pub sent: Mutex<Vec<OutgoingEmail>>,
    pub attempts: Mutex<usize>,
}

impl RecordingSender {
    pub fn subjects(&self) -> Vec<String> {
        self.sent
            .lock()
            .expect("sent lock")
            .iter()
            .map(|email| email.subject.clone())
            .collect()
    }
}

impl EmailSender for RecordingSender {
    fn send(&self, email: &OutgoingEmail) -> Result<(), EmailError> {
        *self.attempts.lock().expect("attempts lock") += 1;
        if email.to.is_empty() {
            return Err(EmailError::NoRecipients);
        }
        self.sent.lock().expect("sent lock").push(email.clone());
        Ok(())
    }
}
