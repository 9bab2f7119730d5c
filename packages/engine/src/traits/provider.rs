//! Text-generation provider capability.
//!
//! Every backend implements the same narrow interface. The router only ever
//! looks at `rpm_budget` and `health`; it never branches on `id`.

use async_trait::async_trait;

use crate::error::ProviderError;

/// Static health as the provider itself reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    /// Not usable at all (missing credentials, switched off)
    Disabled,
}

/// Text returned by a provider.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Completion {
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl Completion {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }
}

#[async_trait]
pub trait Provider: Send + Sync {
    /// Stable identifier used for rate-limit and usage accounting.
    fn id(&self) -> &str;

    fn model(&self) -> &str;

    /// Requests allowed per rate-limit window.
    fn rpm_budget(&self) -> u32;

    fn health(&self) -> HealthState {
        HealthState::Healthy
    }

    async fn complete(&self, prompt: &str) -> Result<Completion, ProviderError>;
}
