use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use send_emails_module::{recipients_from_env, EmailError, SmtpSettings};
use tracing::warn;

use crate::retry::{RetryPolicy, DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY_MS};

pub const DEFAULT_MYSQL_PORT: u16 = 3306;
pub const DEFAULT_IN_CHUNK: usize = 500;
pub const DEFAULT_SCAN_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_THROTTLE_MS: u64 = 500;
pub const DEFAULT_VERIFY_RECHECK_MS: u64 = 1_500;
pub const DEFAULT_STATE_PATH: &str = "daily_monitor_state.json";
pub const DEFAULT_SUBSYSTEM: &str = "Scan";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {key}")]
    MissingEnv { key: String },
    #[error("invalid value for {key}: '{value}'")]
    InvalidEnv { key: String, value: String },
}

impl From<EmailError> for ConfigError {
    fn from(err: EmailError) -> Self {
        match err {
            EmailError::MissingEnv { key } => ConfigError::MissingEnv {
                key: key.to_string(),
            },
            EmailError::InvalidEnv { key, value } => ConfigError::InvalidEnv {
                key: key.to_string(),
                value,
            },
            other => ConfigError::InvalidEnv {
                key: "SMTP".to_string(),
                value: other.to_string(),
            },
        }
    }
}

pub(crate) fn read_env_trimmed(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub(crate) fn require_env(key: &str) -> Result<String, ConfigError> {
    read_env_trimmed(key).ok_or_else(|| ConfigError::MissingEnv {
        key: key.to_string(),
    })
}

pub(crate) fn parse_env_or<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match read_env_trimmed(key) {
        Some(value) => value.parse::<T>().map_err(|_| ConfigError::InvalidEnv {
            key: key.to_string(),
            value,
        }),
        None => Ok(default),
    }
}

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub in_chunk: usize,
}

impl DbConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let in_chunk = parse_env_or("MYSQL_IN_CHUNK", DEFAULT_IN_CHUNK)?;
        if in_chunk == 0 {
            return Err(ConfigError::InvalidEnv {
                key: "MYSQL_IN_CHUNK".to_string(),
                value: "0".to_string(),
            });
        }
        Ok(Self {
            host: require_env("MYSQL_HOST")?,
            port: parse_env_or("MYSQL_PORT", DEFAULT_MYSQL_PORT)?,
            user: require_env("MYSQL_USER")?,
            password: require_env("MYSQL_PASSWORD")?,
            database: require_env("MYSQL_DB")?,
            in_chunk,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ScanApiConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
    pub throttle: Duration,
    pub retry: RetryPolicy,
    pub verify_recheck: Option<Duration>,
}

impl ScanApiConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            timeout: Duration::from_secs(DEFAULT_SCAN_TIMEOUT_SECS),
            throttle: Duration::from_millis(DEFAULT_THROTTLE_MS),
            retry: RetryPolicy::default(),
            verify_recheck: Some(Duration::from_millis(DEFAULT_VERIFY_RECHECK_MS)),
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::new(require_env("SCAN_API_BASE")?, require_env("SCAN_API_KEY")?);
        config.timeout = Duration::from_secs(parse_env_or(
            "SCAN_API_TIMEOUT_SECS",
            DEFAULT_SCAN_TIMEOUT_SECS,
        )?);
        config.throttle =
            Duration::from_millis(parse_env_or("SCAN_API_THROTTLE_MS", DEFAULT_THROTTLE_MS)?);
        config.retry = RetryPolicy {
            max_attempts: parse_env_or("SCAN_API_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS)?.max(1),
            base_delay: Duration::from_millis(parse_env_or(
                "SCAN_API_BACKOFF_BASE_MS",
                DEFAULT_BASE_DELAY_MS,
            )?),
            max_delay: Duration::from_millis(parse_env_or(
                "SCAN_API_BACKOFF_MAX_MS",
                DEFAULT_MAX_DELAY_MS,
            )?),
        };
        let recheck_ms = parse_env_or("SCAN_VERIFY_RECHECK_MS", DEFAULT_VERIFY_RECHECK_MS)?;
        config.verify_recheck = (recheck_ms > 0).then(|| Duration::from_millis(recheck_ms));
        Ok(config)
    }
}

#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub smtp: SmtpSettings,
    pub sender: String,
    pub recipients: Vec<String>,
}

impl EmailConfig {
    /// An empty `RECIPIENT_EMAILS` is accepted here and rejected at send time.
    pub fn from_env() -> Result<Self, ConfigError> {
        let smtp = SmtpSettings::from_env()?;
        let sender = require_env("SENDER_EMAIL")?;
        let recipients = recipients_from_env("RECIPIENT_EMAILS");
        if recipients.is_empty() {
            warn!("RECIPIENT_EMAILS is empty; report emails will not be delivered");
        }
        Ok(Self {
            smtp,
            sender,
            recipients,
        })
    }
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub db: DbConfig,
    pub scan_api: ScanApiConfig,
    pub state_path: PathBuf,
    pub subsystem: String,
    pub change_window_hours: Option<u32>,
}

impl MonitorConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let change_window_hours = match read_env_trimmed("MONITOR_CHANGE_WINDOW_HOURS") {
            Some(value) => Some(value.parse::<u32>().map_err(|_| ConfigError::InvalidEnv {
                key: "MONITOR_CHANGE_WINDOW_HOURS".to_string(),
                value,
            })?),
            None => None,
        };
        Ok(Self {
            db: DbConfig::from_env()?,
            scan_api: ScanApiConfig::from_env()?,
            state_path: Self::state_path_from_env(),
            subsystem: read_env_trimmed("MONITOR_SUBSYSTEM")
                .unwrap_or_else(|| DEFAULT_SUBSYSTEM.to_string()),
            change_window_hours,
        })
    }

    /// `MONITOR_STATE_PATH`, or the default file in the working directory.
    pub fn state_path_from_env() -> PathBuf {
        read_env_trimmed("MONITOR_STATE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_PATH))
    }
}
