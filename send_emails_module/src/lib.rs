//! Outbound HTML email over SMTP.
//!
//! The transport is unauthenticated submission by default; STARTTLS and
//! credentials are opt-in through [`SmtpSettings`].

mod errors;
mod message;
mod recipients;
mod smtp;

pub use errors::EmailError;
pub use message::{build_message, EmailAttachment, OutgoingEmail};
pub use recipients::{parse_recipients, recipients_from_env};
pub use smtp::{EmailSender, SmtpMailer, SmtpSettings, DEFAULT_SMTP_PORT};
