//! Protocol-level error types.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The shared signing secret is absent. Fatal for whoever owns the signer.
    #[error("Signing secret is not configured")]
    MissingSecret,

    #[error("Validation error: {0}")]
    Validation(String),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
