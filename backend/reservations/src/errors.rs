//! Application-wide error types.

use hosted_checkout::ProtocolError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Payment declined: {message}")]
    GatewayDecline { code: String, message: String },

    #[error("Credential error: {0}")]
    Credential(String),
}

impl AppError {
    /// Stable error code exposed to clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "CONFIG_ERROR",
            Self::InvalidSignature => "INVALID_SIGNATURE",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::GatewayDecline { .. } => "GATEWAY_DECLINE",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Conflict(_) => "CONFLICT",
            Self::Database(_)
            | Self::Migrate(_)
            | Self::Http(_)
            | Self::Json(_)
            | Self::Credential(_) => "SERVER_ERROR",
        }
    }

    /// Message safe to show to a client. Internal failures get a generic text.
    pub fn public_message(&self) -> String {
        match self {
            Self::InvalidSignature => "Invalid request signature".to_string(),
            Self::Validation(_)
            | Self::NotFound(_)
            | Self::Conflict(_)
            | Self::GatewayDecline { .. } => self.to_string(),
            _ => "Internal server error".to_string(),
        }
    }
}

impl From<ProtocolError> for AppError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::MissingSecret => Self::Config(err.to_string()),
            ProtocolError::Validation(msg) => Self::Validation(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
