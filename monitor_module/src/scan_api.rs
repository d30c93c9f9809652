use chrono::NaiveDateTime;
use reqwest::blocking::{Client, Response};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

use crate::config::ScanApiConfig;
use crate::model::ScanConfig;

const ALERT_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const ERROR_BODY_LIMIT: usize = 500;

#[derive(Debug, thiserror::Error)]
pub enum ScanApiError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("http status {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("malformed response body: {0}")]
    MalformedBody(String),
    #[error("update rejected with code '{code}': {message}")]
    Rejected { code: String, message: String },
}

impl ScanApiError {
    /// Timeouts, connection failures, 429 and 5xx are worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            ScanApiError::Transport(_) => true,
            ScanApiError::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            ScanApiError::MalformedBody(_) | ScanApiError::Rejected { .. } => false,
        }
    }
}

impl From<reqwest::Error> for ScanApiError {
    fn from(err: reqwest::Error) -> Self {
        ScanApiError::Transport(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteProject {
    pub id: String,
    pub name: Option<String>,
    pub config: ScanConfig,
}

/// Fields sent in a project update. `times_per_day` is omitted entirely when unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigUpdate {
    pub auto_scan: u8,
    pub times_per_day: Option<u32>,
}

impl ConfigUpdate {
    /// The service rejects `times_per_day` alongside `auto_scan=0`.
    pub fn manual() -> Self {
        Self {
            auto_scan: 0,
            times_per_day: None,
        }
    }

    pub fn auto() -> Self {
        Self {
            auto_scan: ScanConfig::AUTO.auto_scan,
            times_per_day: Some(ScanConfig::AUTO.times_per_day),
        }
    }

    pub fn form_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![("auto_scan", self.auto_scan.to_string())];
        if let Some(times) = self.times_per_day {
            pairs.push(("times_per_day", times.to_string()));
        }
        pairs
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateAck {
    pub code: String,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertQuery {
    pub min_datetime: NaiveDateTime,
    pub max_datetime: NaiveDateTime,
    pub offset: u32,
    pub limit: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub alert_id: String,
    pub history_id: String,
    pub alert_name: String,
    pub event_datetime: Option<String>,
    pub trigger_type_id: Option<String>,
    /// `project_id -> project name`.
    pub projects: BTreeMap<String, String>,
    pub locations: Vec<String>,
}

impl Alert {
    pub fn dedupe_key(&self) -> String {
        if self.history_id.is_empty() {
            self.alert_id.clone()
        } else {
            self.history_id.clone()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlertPage {
    pub alerts: Vec<Alert>,
    pub has_next: bool,
}

/// The remote project configuration service.
pub trait ScanService {
    fn get_project(&self, project_id: &str) -> Result<RemoteProject, ScanApiError>;
    fn update_project(
        &self,
        project_id: &str,
        update: &ConfigUpdate,
    ) -> Result<UpdateAck, ScanApiError>;
    fn alerts_history(&self, query: &AlertQuery) -> Result<AlertPage, ScanApiError>;
}

impl<T: ScanService + ?Sized> ScanService for &T {
    fn get_project(&self, project_id: &str) -> Result<RemoteProject, ScanApiError> {
        (**self).get_project(project_id)
    }

    fn update_project(
        &self,
        project_id: &str,
        update: &ConfigUpdate,
    ) -> Result<UpdateAck, ScanApiError> {
        (**self).update_project(project_id, update)
    }

    fn alerts_history(&self, query: &AlertQuery) -> Result<AlertPage, ScanApiError> {
        (**self).alerts_history(query)
    }
}

#[derive(Debug, Clone)]
pub struct ScanClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl ScanClient {
    pub fn new(config: &ScanApiConfig) -> Result<Self, ScanApiError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    fn project_url(&self, project_id: &str) -> String {
        format!(
            "{}/projects/{}",
            self.base_url,
            urlencoding::encode(project_id.trim())
        )
    }

    fn read_json(response: Response) -> Result<Value, ScanApiError> {
        let status = response.status();
        let body = response.text()?;
        if !status.is_success() {
            return Err(ScanApiError::HttpStatus {
                status: status.as_u16(),
                body: truncate(&body, ERROR_BODY_LIMIT),
            });
        }
        serde_json::from_str(&body).map_err(|err| ScanApiError::MalformedBody(err.to_string()))
    }
}

impl ScanService for ScanClient {
    fn get_project(&self, project_id: &str) -> Result<RemoteProject, ScanApiError> {
        let response = self
            .client
            .get(self.project_url(project_id))
            .header("Authorization", &self.api_key)
            .send()?;
        let body = Self::read_json(response)?;
        parse_project(project_id, &body)
    }

    fn update_project(
        &self,
        project_id: &str,
        update: &ConfigUpdate,
    ) -> Result<UpdateAck, ScanApiError> {
        debug!("PUT project {} with {:?}", project_id, update.form_pairs());
        let response = self
            .client
            .put(self.project_url(project_id))
            .header("Authorization", &self.api_key)
            .form(&update.form_pairs())
            .send()?;
        let body = Self::read_json(response)?;
        parse_update_ack(&body)
    }

    fn alerts_history(&self, query: &AlertQuery) -> Result<AlertPage, ScanApiError> {
        let params = [
            (
                "min_datetime",
                query.min_datetime.format(ALERT_DATETIME_FORMAT).to_string(),
            ),
            (
                "max_datetime",
                query.max_datetime.format(ALERT_DATETIME_FORMAT).to_string(),
            ),
            ("offset", query.offset.to_string()),
            ("limit", query.limit.to_string()),
            ("full_raw", "1".to_string()),
        ];
        let response = self
            .client
            .get(format!("{}/alerts/history", self.base_url))
            .header("Authorization", &self.api_key)
            .query(&params)
            .send()?;
        let body = Self::read_json(response)?;
        parse_alert_page(&body)
    }
}

pub(crate) fn parse_project(project_id: &str, body: &Value) -> Result<RemoteProject, ScanApiError> {
    let project = body
        .get("response")
        .and_then(|response| response.get("project"))
        .filter(|project| project.is_object())
        .ok_or_else(|| {
            ScanApiError::MalformedBody("missing response.project envelope".to_string())
        })?;
    let auto_scan = u8::try_from(normalize_int(project.get("auto_scan"))).unwrap_or(0);
    let times_per_day = u32::try_from(normalize_int(project.get("times_per_day"))).unwrap_or(0);
    Ok(RemoteProject {
        id: project
            .get("id")
            .and_then(value_to_string)
            .unwrap_or_else(|| project_id.to_string()),
        name: project.get("name").and_then(value_to_string),
        config: ScanConfig::new(auto_scan, times_per_day),
    })
}

pub(crate) fn parse_update_ack(body: &Value) -> Result<UpdateAck, ScanApiError> {
    let status = body
        .get("status")
        .ok_or_else(|| ScanApiError::MalformedBody("missing status object".to_string()))?;
    let code = status
        .get("code")
        .and_then(value_to_string)
        .ok_or_else(|| ScanApiError::MalformedBody("missing status.code".to_string()))?;
    let message = status.get("message").and_then(value_to_string);
    if !code.eq_ignore_ascii_case("success") {
        return Err(ScanApiError::Rejected {
            code,
            message: message.unwrap_or_default(),
        });
    }
    Ok(UpdateAck { code, message })
}

pub(crate) fn parse_alert_page(body: &Value) -> Result<AlertPage, ScanApiError> {
    let list = body
        .get("alerts")
        .or_else(|| body.get("response").and_then(|response| response.get("alerts")))
        .or_else(|| body.get("response").filter(|response| response.is_array()));
    let alerts = match list {
        Some(Value::Array(items)) => items.iter().filter_map(parse_alert).collect(),
        Some(Value::Null) | None => Vec::new(),
        Some(_) => {
            return Err(ScanApiError::MalformedBody(
                "alerts is not a list".to_string(),
            ))
        }
    };
    let has_next = match body.get("next_page") {
        None | Some(Value::Null) => false,
        Some(Value::String(value)) => !value.trim().is_empty(),
        Some(Value::Bool(value)) => *value,
        Some(_) => true,
    };
    Ok(AlertPage { alerts, has_next })
}

fn parse_alert(value: &Value) -> Option<Alert> {
    let alert_id = value.get("alert_id").and_then(value_to_string)?;
    let projects = match value.get("project_name") {
        Some(Value::Object(map)) => map
            .iter()
            .map(|(id, name)| (id.clone(), value_to_string(name).unwrap_or_default()))
            .collect(),
        _ => BTreeMap::new(),
    };
    let locations = match value.get("location") {
        Some(Value::Object(map)) => map.keys().map(|code| code.to_ascii_uppercase()).collect(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(value_to_string)
            .map(|code| code.to_ascii_uppercase())
            .collect(),
        Some(Value::String(raw)) => crate::model::parse_locations(raw),
        _ => Vec::new(),
    };
    Some(Alert {
        alert_id,
        history_id: value
            .get("history_id")
            .and_then(value_to_string)
            .unwrap_or_default(),
        alert_name: value
            .get("alert_name")
            .and_then(value_to_string)
            .unwrap_or_default(),
        event_datetime: value.get("event_datetime").and_then(value_to_string),
        trigger_type_id: value.get("trigger_type_id").and_then(value_to_string),
        projects,
        locations,
    })
}

/// Reads an integer that may arrive as a number, a numeric string or a bool.
/// Anything else reads as 0.
pub(crate) fn normalize_int(value: Option<&Value>) -> i64 {
    match value {
        Some(Value::Number(number)) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|float| float as i64))
            .unwrap_or(0),
        Some(Value::String(raw)) => {
            let raw = raw.trim();
            raw.parse::<i64>()
                .ok()
                .or_else(|| raw.parse::<f64>().ok().map(|float| float as i64))
                .unwrap_or(0)
        }
        Some(Value::Bool(flag)) => i64::from(*flag),
        _ => 0,
    }
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(raw) => Some(raw.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

fn truncate(value: &str, max_len: usize) -> String {
    if value.len() <= max_len {
        return value.to_string();
    }
    let mut end = max_len;
    while end > 0 && !value.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &value[..end])
}
