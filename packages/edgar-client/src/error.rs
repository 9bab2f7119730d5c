//! Error types for the EDGAR client.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EdgarError>;

#[derive(Debug, Error)]
pub enum EdgarError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("EDGAR API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("malformed Form D document: {0}")]
    Xml(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl EdgarError {
    /// Worth retrying later: network faults, throttling and 5xx.
    pub fn is_transient(&self) -> bool {
        match self {
            EdgarError::Http(_) => true,
            EdgarError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}
