use std::env;
use std::time::Duration;

use lettre::transport::smtp::authentication::Credentials;
use lettre::{SmtpTransport, Transport};
use tracing::info;

use crate::errors::EmailError;
use crate::message::{build_message, OutgoingEmail};

pub const DEFAULT_SMTP_PORT: u16 = 25;
const SUBMISSION_PORT: u16 = 587;

pub trait EmailSender {
    fn send(&self, email: &OutgoingEmail) -> Result<(), EmailError>;
}

impl<T: EmailSender + ?Sized> EmailSender for &T {
    fn send(&self, email: &OutgoingEmail) -> Result<(), EmailError> {
        (**self).send(email)
    }
}

#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub starttls: bool,
    pub timeout: Duration,
}

impl SmtpSettings {
    /// Reads `SMTP_SERVER` (required), `SMTP_PORT`, `SMTP_USER`, `SMTP_PASSWORD`
    /// and `SMTP_STARTTLS`. STARTTLS defaults on for the submission port.
    pub fn from_env() -> Result<Self, EmailError> {
        dotenvy::dotenv().ok();
        let host = env::var("SMTP_SERVER")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .ok_or(EmailError::MissingEnv { key: "SMTP_SERVER" })?;
        let port = match non_empty_env("SMTP_PORT") {
            Some(value) => value.parse::<u16>().map_err(|_| EmailError::InvalidEnv {
                key: "SMTP_PORT",
                value,
            })?,
            None => DEFAULT_SMTP_PORT,
        };
        let username = non_empty_env("SMTP_USER");
        let password = non_empty_env("SMTP_PASSWORD");
        let starttls = match env::var("SMTP_STARTTLS") {
            Ok(value) => matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes"
            ),
            Err(_) => port == SUBMISSION_PORT,
        };
        Ok(Self {
            host,
            port,
            username,
            password,
            starttls,
            timeout: Duration::from_secs(30),
        })
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[derive(Debug, Clone)]
pub struct SmtpMailer {
    settings: SmtpSettings,
}

impl SmtpMailer {
    pub fn new(settings: SmtpSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &SmtpSettings {
        &self.settings
    }

    fn transport(&self) -> Result<SmtpTransport, EmailError> {
        let settings = &self.settings;
        let mut builder = if settings.starttls {
            SmtpTransport::starttls_relay(&settings.host)?
        } else {
            SmtpTransport::builder_dangerous(&settings.host)
        };
        builder = builder.port(settings.port).timeout(Some(settings.timeout));
        if let (Some(user), Some(password)) = (&settings.username, &settings.password) {
            builder = builder.credentials(Credentials::new(user.clone(), password.clone()));
        }
        Ok(builder.build())
    }
}

impl EmailSender for SmtpMailer {
    fn send(&self, email: &OutgoingEmail) -> Result<(), EmailError> {
        let message = build_message(email)?;
        let transport = self.transport()?;
        transport.send(&message)?;
        info!(
            "email '{}' accepted by {}:{} for {} recipients",
            email.subject,
            self.settings.host,
            self.settings.port,
            email.to.len() + email.cc.len()
        );
        Ok(())
    }
}
