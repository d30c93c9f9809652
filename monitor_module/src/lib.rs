pub mod alerts;
pub mod checkpoint;
pub mod config;
pub mod db;
pub mod detector;
pub mod model;
pub mod monitor;
pub mod operations;
pub mod reconciler;
pub mod report;
pub mod retry;
pub mod scan_api;

#[cfg(test)]
pub(crate) mod testing;

pub use checkpoint::{Checkpoint, CheckpointError, CheckpointStore, RunStats};
pub use config::{ConfigError, DbConfig, EmailConfig, MonitorConfig, ScanApiConfig};
pub use db::{AccountDirectory, DbError, MySqlAccountDirectory};
pub use detector::{detect_newly_inactive, detect_reactivated, ChangeWindow};
pub use model::{
    Account, AccountId, AccountStatus, ProjectRow, ScanConfig, ScanMode, StatusSnapshot,
};
pub use monitor::{DailyMonitor, MonitorError, RunSummary};
pub use reconciler::{ProjectOutcome, ProjectResult, ReconcileReport, Reconciler, ReconcilerOptions};
pub use report::Notifier;
pub use retry::RetryPolicy;
pub use scan_api::{
    Alert, AlertPage, AlertQuery, ConfigUpdate, RemoteProject, ScanApiError, ScanClient,
    ScanService, UpdateAck,
};
