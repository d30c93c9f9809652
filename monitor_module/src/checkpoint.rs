use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{info, warn};

use crate::model::{AccountId, AccountStatus, StatusSnapshot};

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
];

#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("checkpoint io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed checkpoint {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("checkpoint serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Counters written with every checkpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunStats {
    pub total_accounts: usize,
    pub total_inactive_accounts: usize,
    pub new_inactive_accounts: usize,
    pub reactivated_accounts: usize,
    pub projects_found: usize,
    pub projects_processed: usize,
    pub projects_updated: usize,
    pub projects_already_manual: usize,
    pub projects_failed: usize,
    pub projects_verification_failed: usize,
    pub projects_dry_run: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub inactive_accounts: Vec<AccountId>,
    #[serde(
        serialize_with = "serialize_last_check",
        deserialize_with = "deserialize_last_check"
    )]
    pub last_check: DateTime<Utc>,
    #[serde(default)]
    pub stats: RunStats,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statuses: Option<StatusSnapshot>,
    /// Inactive accounts held back after a failed or unverified update.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub pending_retry: BTreeSet<AccountId>,
}

impl Checkpoint {
    /// Builds the post-run checkpoint. Accounts in `retry` are left out so the
    /// next run treats them as newly inactive again, and the inactive ones are
    /// recorded in `pending_retry`.
    pub fn from_run(
        current: &StatusSnapshot,
        retry: &BTreeSet<AccountId>,
        stats: RunStats,
        last_check: DateTime<Utc>,
    ) -> Self {
        let statuses: StatusSnapshot = current
            .iter()
            .filter(|(id, _)| !retry.contains(id))
            .map(|(id, status)| (*id, status.clone()))
            .collect();
        let inactive_accounts = statuses
            .iter()
            .filter(|(_, status)| status.is_inactive())
            .map(|(id, _)| *id)
            .collect();
        let pending_retry = retry
            .iter()
            .filter(|id| current.get(id).is_some_and(|status| status.is_inactive()))
            .copied()
            .collect();
        Self {
            inactive_accounts,
            last_check,
            stats,
            statuses: Some(statuses),
            pending_retry,
        }
    }

    pub fn processed_set(&self) -> BTreeSet<AccountId> {
        self.inactive_accounts.iter().copied().collect()
    }

    /// The stored status map, or one derived from `inactive_accounts` for
    /// checkpoints written without statuses.
    pub fn previous_snapshot(&self) -> StatusSnapshot {
        match &self.statuses {
            Some(statuses) => statuses.clone(),
            None => self
                .inactive_accounts
                .iter()
                .map(|id| (*id, AccountStatus::Inactive))
                .collect(),
        }
    }
}

fn serialize_last_check<S: Serializer>(
    value: &DateTime<Utc>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&value.to_rfc3339())
}

fn deserialize_last_check<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<DateTime<Utc>, D::Error> {
    let raw = String::deserialize(deserializer)?;
    parse_last_check(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("unrecognized last_check '{raw}'")))
}

/// Accepts RFC 3339 or a naive local timestamp.
pub fn parse_last_check(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|naive| match Local.from_local_datetime(&naive).earliest() {
            Some(local) => local.with_timezone(&Utc),
            None => naive.and_utc(),
        })
}

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn prev_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_default();
        name.push(".prev");
        self.path.with_file_name(name)
    }

    pub fn load(&self) -> Result<Option<Checkpoint>, CheckpointError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&self.path).map_err(|source| CheckpointError::Io {
            path: self.path.clone(),
            source,
        })?;
        let checkpoint = serde_json::from_str(&raw).map_err(|source| CheckpointError::Parse {
            path: self.path.clone(),
            source,
        })?;
        Ok(Some(checkpoint))
    }

    /// Missing, unreadable or malformed checkpoints all read as "no previous state".
    pub fn load_or_default(&self) -> Option<Checkpoint> {
        match self.load() {
            Ok(Some(checkpoint)) => Some(checkpoint),
            Ok(None) => {
                info!(
                    "no checkpoint at {}; treating every inactive account as new",
                    self.path.display()
                );
                None
            }
            Err(err) => {
                warn!("{}; treating every inactive account as new", err);
                None
            }
        }
    }

    /// Writes through a temp file in the same directory and renames it into
    /// place. The file being replaced is kept as `<file>.prev`.
    pub fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let payload = serde_json::to_string_pretty(checkpoint)?;
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(|source| self.io_error(&dir, source))?;

        let mut temp = NamedTempFile::new_in(&dir).map_err(|source| self.io_error(&dir, source))?;
        temp.write_all(payload.as_bytes())
            .and_then(|_| temp.as_file().sync_all())
            .map_err(|source| self.io_error(temp.path(), source))?;

        if self.path.exists() {
            let prev = self.prev_path();
            fs::copy(&self.path, &prev).map_err(|source| self.io_error(&prev, source))?;
        }
        temp.persist(&self.path)
            .map_err(|err| self.io_error(&self.path, err.error))?;
        info!(
            "checkpoint saved to {} ({} inactive accounts)",
            self.path.display(),
            checkpoint.inactive_accounts.len()
        );
        Ok(())
    }

    /// Seeds the checkpoint with a known processed set so the next run only
    /// reacts to accounts outside of it.
    pub fn seed(
        &self,
        accounts: &[AccountId],
        last_check: DateTime<Utc>,
    ) -> Result<Checkpoint, CheckpointError> {
        let ids: BTreeSet<AccountId> = accounts.iter().copied().collect();
        let checkpoint = Checkpoint {
            inactive_accounts: ids.iter().copied().collect(),
            last_check,
            stats: RunStats {
                total_inactive_accounts: ids.len(),
                ..RunStats::default()
            },
            statuses: None,
            pending_retry: BTreeSet::new(),
        };
        self.save(&checkpoint)?;
        Ok(checkpoint)
    }

    fn io_error(&self, path: &Path, source: std::io::Error) -> CheckpointError {
        CheckpointError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}
