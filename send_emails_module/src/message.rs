use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::Message;

use crate::errors::EmailError;

#[derive(Debug, Clone)]
pub struct EmailAttachment {
    pub filename: String,
    pub content_type: String,
    pub content: Vec<u8>,
}

impl EmailAttachment {
    pub fn csv(filename: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            filename: filename.into(),
            content_type: "text/csv".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OutgoingEmail {
    pub from: String,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub subject: String,
    pub html_body: String,
    pub attachments: Vec<EmailAttachment>,
}

pub fn build_message(email: &OutgoingEmail) -> Result<Message, EmailError> {
    if email.to.is_empty() {
        return Err(EmailError::NoRecipients);
    }

    let mut builder = Message::builder()
        .from(parse_mailbox(&email.from)?)
        .subject(email.subject.clone());
    for address in &email.to {
        builder = builder.to(parse_mailbox(address)?);
    }
    for address in &email.cc {
        builder = builder.cc(parse_mailbox(address)?);
    }

    let html = SinglePart::builder()
        .header(ContentType::TEXT_HTML)
        .body(email.html_body.clone());

    if email.attachments.is_empty() {
        return Ok(builder.singlepart(html)?);
    }

    let mut body = MultiPart::mixed().singlepart(html);
    for attachment in &email.attachments {
        let content_type = ContentType::parse(&attachment.content_type)
            .map_err(|_| EmailError::ContentType(attachment.content_type.clone()))?;
        body = body.singlepart(
            Attachment::new(attachment.filename.clone())
                .body(attachment.content.clone(), content_type),
        );
    }
    Ok(builder.multipart(body)?)
}

fn parse_mailbox(address: &str) -> Result<Mailbox, EmailError> {
    address
        .trim()
        .parse::<Mailbox>()
        .map_err(|err| EmailError::InvalidAddress {
            address: address.to_string(),
            reason: err.to_string(),
        })
}
