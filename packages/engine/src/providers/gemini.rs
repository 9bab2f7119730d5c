//! Google Gemini backend.

use std::time::Duration;

use async_trait::async_trait;
use llm_client::{GeminiClient, GenerateContentRequest, GenerationConfig, LlmError};

use crate::config::{ProviderConfig, RouterConfig};
use crate::credentials::SecretString;
use crate::error::ProviderError;
use crate::traits::{Completion, Provider};

use super::provider_error;

pub struct GeminiProvider {
    id: String,
    model: String,
    rpm: u32,
    generation: GenerationConfig,
    timeout: Duration,
    client: GeminiClient,
}

impl GeminiProvider {
    pub fn new(config: &ProviderConfig, api_key: SecretString, router: &RouterConfig) -> Result<Self, LlmError> {
        let mut client = GeminiClient::with_timeout(api_key.expose(), router.call_timeout())?;
        if !config.endpoint.is_empty() {
            client = client.with_base_url(&config.endpoint);
        }
        Ok(Self {
            id: config.id.clone(),
            model: config.model.clone(),
            rpm: config.rpm,
            generation: GenerationConfig {
                temperature: Some(router.temperature),
                max_output_tokens: Some(router.max_tokens),
                response_mime_type: Some("application/json".to_string()),
            },
            timeout: router.call_timeout(),
            client,
        })
    }
}

#[async_trait]
impl Provider for GeminiProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn rpm_budget(&self) -> u32 {
        self.rpm
    }

    async fn complete(&self, prompt: &str) -> Result<Completion, ProviderError> {
        let request = GenerateContentRequest::prompt(prompt).with_config(self.generation.clone());
        let completion = self
            .client
            .generate_content(&self.model, &request)
            .await
            .map_err(|e| provider_error(e, self.timeout))?;

        Ok(Completion {
            text: completion.content,
            input_tokens: completion.usage.input_tokens,
            output_tokens: completion.usage.output_tokens,
        })
    }
}
