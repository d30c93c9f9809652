use chrono::NaiveDateTime;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

pub type AccountId = i64;

/// Ordered `account -> status` view of the publisher table.
pub type StatusSnapshot = BTreeMap<AccountId, AccountStatus>;

/// Publisher lifecycle status as stored in the account database.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AccountStatus {
    Live,
    Inactive,
    Paused,
    Depleted,
    Other(String),
}

impl AccountStatus {
    pub fn parse(raw: &str) -> Self {
        let normalized = raw.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "live" | "active" => AccountStatus::Live,
            "inactive" | "frozen" | "suspended" => AccountStatus::Inactive,
            "paused" => AccountStatus::Paused,
            "depleted" => AccountStatus::Depleted,
            _ => AccountStatus::Other(normalized),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            AccountStatus::Live => "live",
            AccountStatus::Inactive => "inactive",
            AccountStatus::Paused => "paused",
            AccountStatus::Depleted => "depleted",
            AccountStatus::Other(value) => value.as_str(),
        }
    }

    /// True for every status of the frozen family.
    pub fn is_inactive(&self) -> bool {
        matches!(
            self,
            AccountStatus::Inactive | AccountStatus::Paused | AccountStatus::Depleted
        )
    }

    pub fn is_live(&self) -> bool {
        matches!(self, AccountStatus::Live)
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for AccountStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for AccountStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(AccountStatus::parse(&raw))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    pub id: AccountId,
    pub name: Option<String>,
    pub status: AccountStatus,
    pub inactivity_date: Option<NaiveDateTime>,
    pub update_time: Option<NaiveDateTime>,
    pub change_reason: Option<String>,
}

impl Account {
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or("(unnamed)")
    }

    /// Best available "status changed at" timestamp.
    pub fn status_changed_at(&self) -> Option<NaiveDateTime> {
        self.inactivity_date.or(self.update_time)
    }
}

pub fn snapshot_of(accounts: &[Account]) -> StatusSnapshot {
    accounts
        .iter()
        .map(|account| (account.id, account.status.clone()))
        .collect()
}

/// One row of the account -> campaign -> project join.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectRow {
    pub project_id: String,
    pub campaign_id: i64,
    pub campaign_status: Option<String>,
    pub account_id: AccountId,
    pub account_name: Option<String>,
    pub account_status: AccountStatus,
    pub locations: Vec<String>,
    pub creation_date: Option<NaiveDateTime>,
}

impl ProjectRow {
    pub fn targets_any(&self, locations: &[String]) -> bool {
        locations.is_empty()
            || self
                .locations
                .iter()
                .any(|code| locations.iter().any(|wanted| wanted == code))
    }
}

/// Parses the comma-separated `locations` column into upper-cased codes.
pub fn parse_locations(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|code| !code.is_empty())
        .map(str::to_ascii_uppercase)
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanConfig {
    pub auto_scan: u8,
    pub times_per_day: u32,
}

impl ScanConfig {
    pub const MANUAL: ScanConfig = ScanConfig {
        auto_scan: 0,
        times_per_day: 0,
    };
    pub const AUTO: ScanConfig = ScanConfig {
        auto_scan: 1,
        times_per_day: 72,
    };

    pub fn new(auto_scan: u8, times_per_day: u32) -> Self {
        Self {
            auto_scan,
            times_per_day,
        }
    }
}

impl fmt::Display for ScanConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.auto_scan, self.times_per_day)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    Manual,
    Auto,
}

impl ScanMode {
    pub fn target(self) -> ScanConfig {
        match self {
            ScanMode::Manual => ScanConfig::MANUAL,
            ScanMode::Auto => ScanConfig::AUTO,
        }
    }

    /// Manual only requires scanning to be off; the frequency field is left to the service.
    pub fn is_satisfied_by(self, config: &ScanConfig) -> bool {
        match self {
            ScanMode::Manual => config.auto_scan == 0,
            ScanMode::Auto => *config == ScanConfig::AUTO,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ScanMode::Manual => "manual",
            ScanMode::Auto => "auto",
        }
    }
}

impl fmt::Display for ScanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.label(), self.target())
    }
}
