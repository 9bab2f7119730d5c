//! Typed errors for the funding engine.
//!
//! `PipelineError` is the taxonomy the orchestrator acts on. The narrower
//! enums belong to the consumed interfaces and convert into it.

use std::time::Duration;

use thiserror::Error;

use crate::types::status::CheckpointState;

/// Errors surfaced by stages, the router and the stores.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Network fault or timeout talking to an external service; retry the stage later
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    /// Every provider is rate limited and none frees up within the wait bound
    #[error("provider capacity exhausted after waiting {waited:?}")]
    CapacityExhausted { waited: Duration },

    /// Providers returned nothing usable
    #[error("extraction failed after {attempts} provider attempt(s): {reason}")]
    ExtractionFailed { attempts: usize, reason: String },

    /// Malformed candidate
    #[error("data quality: {0}")]
    DataQuality(String),

    /// Storage operation failed
    #[error("persistence error: {0}")]
    Persistence(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Checkpoint transition that skips or repeats a stage
    #[error("invalid checkpoint transition from {from} to {to}")]
    InvalidTransition {
        from: CheckpointState,
        to: CheckpointState,
    },

    /// Configuration error
    #[error("config error: {0}")]
    Config(String),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PipelineError {
    pub fn persistence(e: impl std::error::Error + Send + Sync + 'static) -> Self {
        PipelineError::Persistence(Box::new(e))
    }

    /// Whether a later run should retry the failed stage.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PipelineError::TransientNetwork(_)
                | PipelineError::CapacityExhausted { .. }
                | PipelineError::Persistence(_)
        )
    }

    /// Short category label for logs and error summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::TransientNetwork(_) => "transient_network",
            PipelineError::CapacityExhausted { .. } => "capacity_exhausted",
            PipelineError::ExtractionFailed { .. } => "extraction_failed",
            PipelineError::DataQuality(_) => "data_quality",
            PipelineError::Persistence(_) => "persistence",
            PipelineError::InvalidTransition { .. } => "invalid_transition",
            PipelineError::Config(_) => "config",
            PipelineError::Serialization(_) => "serialization",
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Failure of a single provider call.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProviderError {
    /// Provider answered 429
    #[error("rate limited by provider")]
    RateLimited { retry_after: Option<Duration> },

    /// Connection failure
    #[error("transport error: {0}")]
    Transport(String),

    /// 5xx
    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    /// 4xx other than 429 (bad key, bad model)
    #[error("client error ({status}): {message}")]
    Client { status: u16, message: String },

    /// Response body could not be read as a completion
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    /// Errors that put the provider into a degraded cooldown.
    pub fn degrades_provider(&self) -> bool {
        matches!(
            self,
            ProviderError::Transport(_)
                | ProviderError::Server { .. }
                | ProviderError::Timeout(_)
                | ProviderError::Client { .. }
        )
    }
}

/// Failure from the filings client.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FilingsError {
    #[error("not found in filings registry: {0}")]
    NotFound(String),

    #[error("filings registry unavailable: {0}")]
    Unavailable(String),
}

impl From<FilingsError> for PipelineError {
    fn from(e: FilingsError) -> Self {
        match e {
            FilingsError::NotFound(what) => {
                PipelineError::DataQuality(format!("filings not found: {}", what))
            }
            FilingsError::Unavailable(msg) => PipelineError::TransientNetwork(msg),
        }
    }
}

/// Failure from the search client.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SearchError {
    #[error("search unavailable: {0}")]
    Unavailable(String),

    #[error("search timed out after {0:?}")]
    Timeout(Duration),

    #[error("search misconfigured: {0}")]
    Config(String),
}

impl From<SearchError> for PipelineError {
    fn from(e: SearchError) -> Self {
        match e {
            SearchError::Config(msg) => PipelineError::Config(msg),
            other => PipelineError::TransientNetwork(other.to_string()),
        }
    }
}

#[cfg(feature = "sqlite")]
impl From<sqlx::Error> for PipelineError {
    fn from(e: sqlx::Error) -> Self {
        PipelineError::Persistence(Box::new(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(PipelineError::TransientNetwork("reset".into()).is_retryable());
        assert!(PipelineError::CapacityExhausted {
            waited: Duration::from_secs(30)
        }
        .is_retryable());
        assert!(!PipelineError::ExtractionFailed {
            attempts: 3,
            reason: "garbage".into()
        }
        .is_retryable());
        assert!(!PipelineError::DataQuality("no amount".into()).is_retryable());
    }

    #[test]
    fn filings_errors_map_into_taxonomy() {
        let e: PipelineError = FilingsError::Unavailable("503".into()).into();
        assert_eq!(e.kind(), "transient_network");
        let e: PipelineError = SearchError::Timeout(Duration::from_secs(5)).into();
        assert_eq!(e.kind(), "transient_network");
    }

    #[test]
    fn rate_limits_do_not_degrade() {
        assert!(!ProviderError::RateLimited { retry_after: None }.degrades_provider());
        assert!(ProviderError::Timeout(Duration::from_secs(1)).degrades_provider());
        assert!(!ProviderError::InvalidResponse("empty".into()).degrades_provider());
    }
}
