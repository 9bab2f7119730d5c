//! OpenAI-compatible chat completion backends (Groq, Mistral, OpenRouter, ...).

use std::time::Duration;

use async_trait::async_trait;
use llm_client::{ChatClient, ChatRequest, LlmError, Message};

use crate::config::{ProviderConfig, RouterConfig};
use crate::credentials::SecretString;
use crate::error::ProviderError;
use crate::traits::{Completion, Provider};

use super::provider_error;

const SYSTEM_PROMPT: &str =
    "You extract structured funding round data from text. Answer with JSON only.";

pub struct OpenAiCompatProvider {
    id: String,
    model: String,
    rpm: u32,
    temperature: f32,
    max_tokens: u32,
    timeout: Duration,
    client: ChatClient,
}

impl OpenAiCompatProvider {
    pub fn new(config: &ProviderConfig, api_key: SecretString, router: &RouterConfig) -> Result<Self, LlmError> {
        let client = ChatClient::with_timeout(&config.endpoint, api_key.expose(), router.call_timeout())?;
        Ok(Self {
            id: config.id.clone(),
            model: config.model.clone(),
            rpm: config.rpm,
            temperature: router.temperature,
            max_tokens: router.max_tokens,
            timeout: router.call_timeout(),
            client,
        })
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
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
        let request = ChatRequest::new(&self.model)
            .message(Message::system(SYSTEM_PROMPT))
            .message(Message::user(prompt))
            .temperature(self.temperature)
            .max_tokens(self.max_tokens);

        let completion = self
            .client
            .chat_completion(request)
            .await
            .map_err(|e| provider_error(e, self.timeout))?;

        Ok(Completion {
            text: completion.content,
            input_tokens: completion.usage.input_tokens,
            output_tokens: completion.usage.output_tokens,
        })
    }
}
