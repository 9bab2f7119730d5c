//! Text-generation backends behind the `Provider` trait.

pub mod gemini;
pub mod openai_compat;

use std::sync::Arc;
use std::time::Duration;

use llm_client::LlmError;
use tracing::{info, warn};

use crate::config::{ProviderConfig, ProviderKind, RouterConfig};
use crate::error::ProviderError;
use crate::traits::Provider;

pub use gemini::GeminiProvider;
pub use openai_compat::OpenAiCompatProvider;

/// Map client errors onto the router's failure classes.
pub(crate) fn provider_error(e: LlmError, timeout: Duration) -> ProviderError {
    match e {
        LlmError::RateLimited { retry_after_secs } => ProviderError::RateLimited {
            retry_after: retry_after_secs.map(Duration::from_secs),
        },
        LlmError::Timeout => ProviderError::Timeout(timeout),
        LlmError::Network(msg) => ProviderError::Transport(msg),
        LlmError::Api { status, message } if status >= 500 => ProviderError::Server { status, message },
        LlmError::Api { status, message } => ProviderError::Client { status, message },
        LlmError::Parse(msg) => ProviderError::InvalidResponse(msg),
        LlmError::Config(msg) => ProviderError::Client { status: 0, message: msg },
    }
}

/// Instantiate every enabled provider whose API key is present.
///
/// Providers without a key are skipped with a warning.
pub fn build_providers(configs: &[ProviderConfig], router: &RouterConfig) -> Vec<Arc<dyn Provider>> {
    let mut providers: Vec<Arc<dyn Provider>> = Vec::new();
    for config in configs.iter().filter(|c| c.enabled) {
        let Some(key) = config.api_key() else {
            warn!(provider = %config.id, env = %config.api_key_env, "API key not set, provider skipped");
            continue;
        };
        let built: Result<Arc<dyn Provider>, LlmError> = match config.kind {
            ProviderKind::OpenaiCompatible => {
                OpenAiCompatProvider::new(config, key, router).map(|p| Arc::new(p) as Arc<dyn Provider>)
            }
            ProviderKind::Gemini => {
                GeminiProvider::new(config, key, router).map(|p| Arc::new(p) as Arc<dyn Provider>)
            }
        };
        match built {
            Ok(provider) => {
                info!(provider = %config.id, model = %config.model, rpm = config.rpm, "Provider ready");
                providers.push(provider);
            }
            Err(e) => warn!(provider = %config.id, error = %e, "Provider could not be constructed"),
        }
    }
    providers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_client_errors() {
        let t = Duration::from_secs(30);
        assert_eq!(
            provider_error(LlmError::RateLimited { retry_after_secs: Some(7) }, t),
            ProviderError::RateLimited { retry_after: Some(Duration::from_secs(7)) }
        );
        assert!(matches!(
            provider_error(LlmError::Api { status: 503, message: "busy".into() }, t),
            ProviderError::Server { status: 503, .. }
        ));
        assert!(matches!(
            provider_error(LlmError::Api { status: 401, message: "bad key".into() }, t),
            ProviderError::Client { status: 401, .. }
        ));
        assert_eq!(provider_error(LlmError::Timeout, t), ProviderError::Timeout(t));
    }

    #[test]
    fn skips_providers_without_keys() {
        let configs = vec![ProviderConfig::openai_compatible(
            "nokey",
            "https://example.invalid/v1",
            "m",
            10,
            "FUNDING_ENGINE_TEST_UNSET_KEY",
        )];
        assert!(build_providers(&configs, &RouterConfig::default()).is_empty());
    }
}
