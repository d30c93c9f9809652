use chrono::{DateTime, Local, NaiveDate};
use send_emails_module::{EmailAttachment, EmailError, EmailSender, OutgoingEmail};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use tracing::{error, info};

use crate::config::EmailConfig;
use crate::model::AccountId;
use crate::monitor::RunSummary;
use crate::reconciler::{ProjectResult, ReconcileReport};

const CSV_FILENAME: &str = "project_outcomes.csv";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    Changes { inactive_accounts: usize },
    NoChanges,
    Error,
}

impl ReportKind {
    pub fn for_summary(summary: &RunSummary) -> Self {
        if summary.newly_inactive.is_empty() {
            ReportKind::NoChanges
        } else {
            ReportKind::Changes {
                inactive_accounts: summary.newly_inactive.len(),
            }
        }
    }
}

/// `"<emoji> Daily <Subsystem> Monitor - <date> - <summary>"`
pub fn subject_line(subsystem: &str, date: NaiveDate, kind: ReportKind) -> String {
    let (emoji, summary) = match kind {
        ReportKind::Changes { inactive_accounts } => (
            "⚠️",
            format!(
                "{} Inactive Account{}",
                inactive_accounts,
                if inactive_accounts == 1 { "" } else { "s" }
            ),
        ),
        ReportKind::NoChanges => ("✅", "No Changes".to_string()),
        ReportKind::Error => ("❌", "Error".to_string()),
    };
    format!(
        "{} Daily {} Monitor - {} - {}",
        emoji,
        subsystem,
        date.format("%Y-%m-%d"),
        summary
    )
}

pub fn render_run_report(summary: &RunSummary, subsystem: &str) -> String {
    let stats = &summary.stats;
    let report = &summary.report;
    let mut html = String::new();
    let _ = write!(
        html,
        "<html><body style=\"font-family: Arial, sans-serif; color: #333;\">\
         <h2>Daily {} Monitor</h2>\
         <p>Run started {}</p>",
        escape_html(subsystem),
        summary.started_at.format("%Y-%m-%d %H:%M:%S")
    );
    if summary.dry_run {
        html.push_str(
            "<p style=\"color: #b26a00;\"><strong>Dry run:</strong> no project was changed \
             and the checkpoint was not written.</p>",
        );
    }

    html.push_str("<table cellpadding=\"6\" style=\"border-collapse: collapse;\">");
    for (label, value) in [
        ("Accounts checked", stats.total_accounts),
        ("Inactive accounts", stats.total_inactive_accounts),
        ("Newly inactive accounts", stats.new_inactive_accounts),
        ("Reactivated accounts", stats.reactivated_accounts),
        ("Projects found", stats.projects_found),
        ("Projects reset to manual", stats.projects_updated),
        ("Projects already manual", stats.projects_already_manual),
        ("Projects failed", stats.projects_failed),
        (
            "Projects verification failed",
            stats.projects_verification_failed,
        ),
    ] {
        let _ = write!(
            html,
            "<tr><td style=\"border-bottom: 1px solid #eee;\">{}</td>\
             <td style=\"border-bottom: 1px solid #eee; text-align: right;\"><strong>{}</strong></td></tr>",
            label, value
        );
    }
    html.push_str("</table>");

    if !summary.newly_inactive.is_empty() {
        let mut per_account: BTreeMap<AccountId, usize> = BTreeMap::new();
        for row in &summary.projects {
            *per_account.entry(row.account_id).or_default() += 1;
        }
        html.push_str(
            "<h3>Newly inactive accounts</h3>\
             <table cellpadding=\"4\" border=\"1\" style=\"border-collapse: collapse;\">\
             <tr><th>Account</th><th>Name</th><th>Status</th><th>Reason</th><th>Projects</th></tr>",
        );
        for account in &summary.newly_inactive {
            let _ = write!(
                html,
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
                account.id,
                escape_html(account.display_name()),
                escape_html(account.status.as_str()),
                escape_html(account.change_reason.as_deref().unwrap_or("")),
                per_account.get(&account.id).copied().unwrap_or(0)
            );
        }
        html.push_str("</table>");
    }

    push_result_table(&mut html, "Failed projects", report.failures());
    push_result_table(
        &mut html,
        "Verification failed (update acknowledged, value unchanged)",
        report.verification_failures(),
    );

    if !summary.reactivated.is_empty() {
        let ids: Vec<String> = summary
            .reactivated
            .iter()
            .map(|id| id.to_string())
            .collect();
        let _ = write!(
            html,
            "<h3>Reactivated accounts (no action taken)</h3><p>{}</p>",
            ids.join(", ")
        );
    }

    let _ = write!(
        html,
        "<p style=\"color: #999; font-size: 12px;\">{}</p></body></html>",
        escape_html(&report.summary_line())
    );
    html
}

fn push_result_table<'a>(
    html: &mut String,
    title: &str,
    results: impl Iterator<Item = &'a ProjectResult>,
) {
    let rows: Vec<&ProjectResult> = results.collect();
    if rows.is_empty() {
        return;
    }
    let _ = write!(
        html,
        "<h3>{}</h3><table cellpadding=\"4\" border=\"1\" style=\"border-collapse: collapse;\">\
         <tr><th>Project</th><th>Account</th><th>Outcome</th><th>Detail</th></tr>",
        escape_html(title)
    );
    for result in rows {
        let _ = write!(
            html,
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
            escape_html(&result.project_id),
            result
                .account_id
                .map(|id| id.to_string())
                .unwrap_or_default(),
            result.outcome.label(),
            escape_html(&result.outcome.detail())
        );
    }
    html.push_str("</table>");
}

pub fn render_error_report(subsystem: &str, message: &str, at: DateTime<Local>) -> String {
    format!(
        "<html><body style=\"font-family: Arial, sans-serif;\">\
         <h2 style=\"color: #d32f2f;\">Daily {} Monitor failed</h2>\
         <p>The run started at {} did not complete. The checkpoint was left unchanged, \
         so the next run starts over from the previous state.</p>\
         <pre>{}</pre></body></html>",
        escape_html(subsystem),
        at.format("%Y-%m-%d %H:%M:%S"),
        escape_html(message)
    )
}

/// Per-project outcome table, one row per reconciled project.
pub fn outcomes_csv(report: &ReconcileReport) -> String {
    let mut csv = String::from("project_id,account_id,outcome,detail\n");
    for result in &report.results {
        let account = result
            .account_id
            .map(|id| id.to_string())
            .unwrap_or_default();
        let _ = writeln!(
            csv,
            "{},{},{},{}",
            csv_field(&result.project_id),
            account,
            result.outcome.label(),
            csv_field(&result.outcome.detail())
        );
    }
    csv
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Sends monitor reports. Delivery failures are logged and swallowed.
pub struct Notifier<M> {
    mailer: M,
    sender: String,
    recipients: Vec<String>,
}

impl<M: EmailSender> Notifier<M> {
    pub fn new(mailer: M, sender: impl Into<String>, recipients: Vec<String>) -> Self {
        Self {
            mailer,
            sender: sender.into(),
            recipients,
        }
    }

    pub fn from_config(mailer: M, config: &EmailConfig) -> Self {
        Self::new(mailer, config.sender.clone(), config.recipients.clone())
    }

    pub fn deliver(
        &self,
        subject: &str,
        html_body: String,
        attachments: Vec<EmailAttachment>,
    ) -> bool {
        let email = OutgoingEmail {
            from: self.sender.clone(),
            to: self.recipients.clone(),
            cc: Vec::new(),
            subject: subject.to_string(),
            html_body,
            attachments,
        };
        match self.mailer.send(&email) {
            Ok(()) => {
                info!("report '{}' sent to {}", subject, self.recipients.join(", "));
                true
            }
            Err(EmailError::NoRecipients) => {
                error!("report '{}' not sent: no recipients configured", subject);
                false
            }
            Err(err) => {
                error!("report '{}' not sent: {}", subject, err);
                false
            }
        }
    }

    pub fn send_run_report(&self, summary: &RunSummary, subsystem: &str) -> bool {
        let subject = subject_line(
            subsystem,
            summary.started_at.date_naive(),
            ReportKind::for_summary(summary),
        );
        let attachments = if summary.report.results.is_empty() {
            Vec::new()
        } else {
            vec![EmailAttachment::csv(CSV_FILENAME, outcomes_csv(&summary.report))]
        };
        self.deliver(&subject, render_run_report(summary, subsystem), attachments)
    }

    pub fn send_error_report(&self, subsystem: &str, message: &str, at: DateTime<Local>) -> bool {
        let subject = subject_line(subsystem, at.date_naive(), ReportKind::Error);
        self.deliver(&subject, render_error_report(subsystem, message, at), Vec::new())
    }
}
