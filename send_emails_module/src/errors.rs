#[derive(Debug, thiserror::Error)]
pub enum EmailError {
    #[error("no recipients configured; refusing to send")]
    NoRecipients,
    #[error("invalid address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },
    #[error("invalid content type '{0}'")]
    ContentType(String),
    #[error("failed to build message: {0}")]
    Build(#[from] lettre::error::Error),
    #[error("smtp error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
    #[error("missing environment variable: {key}")]
    MissingEnv { key: &'static str },
    #[error("invalid value for {key}: '{value}'")]
    InvalidEnv { key: &'static str, value: String },
}
