//! Error types for the LLM clients.

use thiserror::Error;

/// Result type for LLM client operations.
pub type Result<T> = std::result::Result<T, LlmError>;

/// LLM client errors.
#[derive(Debug, Error)]
pub enum LlmError {
    /// Configuration error (missing API key, invalid settings)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Network error (connection refused, DNS, reset)
    #[error("Network error: {0}")]
    Network(String),

    /// The request exceeded the client timeout
    #[error("Request timed out")]
    Timeout,

    /// HTTP 429 from the provider
    #[error("Rate limited by provider (retry after {retry_after_secs:?}s)")]
    RateLimited { retry_after_secs: Option<u64> },

    /// Any other non-2xx response
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Parse error (invalid JSON, unexpected response format)
    #[error("Parse error: {0}")]
    Parse(String),
}

impl LlmError {
    /// 5xx responses.
    pub fn is_server_error(&self) -> bool {
        matches!(self, LlmError::Api { status, .. } if *status >= 500)
    }

    pub(crate) fn from_status(status: u16, message: String, retry_after_secs: Option<u64>) -> Self {
        if status == 429 {
            LlmError::RateLimited { retry_after_secs }
        } else {
            LlmError::Api { status, message }
        }
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            LlmError::Timeout
        } else if e.is_decode() {
            LlmError::Parse(e.to_string())
        } else {
            LlmError::Network(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_429_maps_to_rate_limited() {
        let err = LlmError::from_status(429, "slow down".into(), Some(7));
        assert!(matches!(
            err,
            LlmError::RateLimited {
                retry_after_secs: Some(7)
            }
        ));
    }

    #[test]
    fn server_errors_are_flagged() {
        assert!(LlmError::from_status(503, "down".into(), None).is_server_error());
        assert!(!LlmError::from_status(401, "bad key".into(), None).is_server_error());
        assert!(!LlmError::Timeout.is_server_error());
    }
}
