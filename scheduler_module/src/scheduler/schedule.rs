use chrono::{DateTime, Local, TimeZone};
use cron::Schedule as CronSchedule;
use std::str::FromStr;

use super::types::SchedulerError;

pub const DEFAULT_SCHEDULE_TIME: &str = "02:00";

pub(crate) fn validate_cron_expression(expression: &str) -> Result<(), SchedulerError> {
    let fields = expression.split_whitespace().count();
    if fields != 6 {
        return Err(SchedulerError::InvalidCron(fields));
    }
    Ok(())
}

pub(crate) fn next_run_after<Tz: TimeZone>(
    expression: &str,
    after: &DateTime<Tz>,
) -> Result<DateTime<Tz>, SchedulerError> {
    validate_cron_expression(expression)?;
    let schedule = CronSchedule::from_str(expression)?;
    schedule
        .after(after)
        .next()
        .ok_or(SchedulerError::NoNextRun)
}

/// A fixed daily wall-clock time, evaluated in the local timezone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailySchedule {
    hour: u32,
    minute: u32,
    expression: String,
}

impl DailySchedule {
    pub fn parse(raw: &str) -> Result<Self, SchedulerError> {
        let invalid = || SchedulerError::InvalidTime(raw.to_string());
        let (hour, minute) = raw.trim().split_once(':').ok_or_else(invalid)?;
        if hour.is_empty() || minute.len() != 2 {
            return Err(invalid());
        }
        let hour: u32 = hour.parse().map_err(|_| invalid())?;
        let minute: u32 = minute.parse().map_err(|_| invalid())?;
        if hour > 23 || minute > 59 {
            return Err(invalid());
        }
        let expression = format!("0 {minute} {hour} * * *");
        validate_cron_expression(&expression)?;
        CronSchedule::from_str(&expression)?;
        Ok(Self {
            hour,
            minute,
            expression,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn time_label(&self) -> String {
        format!("{:02}:{:02}", self.hour, self.minute)
    }

    /// The first trigger strictly after `after`.
    pub fn next_after(&self, after: DateTime<Local>) -> Result<DateTime<Local>, SchedulerError> {
        next_run_after(&self.expression, &after)
    }
}

impl Default for DailySchedule {
    fn default() -> Self {
        Self {
            hour: 2,
            minute: 0,
            expression: "0 0 2 * * *".to_string(),
        }
    }
}
