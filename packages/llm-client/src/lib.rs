//! REST clients for text-generation providers.
//!
//! Two API dialects cover every provider the pipeline uses:
//!
//! - [`ChatClient`]: the OpenAI-compatible `/chat/completions` endpoint
//!   (Groq, Mistral, OpenRouter, Cerebras, Together, Fireworks, ...)
//! - [`GeminiClient`]: Google's `generateContent` endpoint
//!
//! Both return a [`Completion`] and classify failures into [`LlmError`] so
//! callers can tell rate limits from server faults without parsing bodies.
//!
//! # Example
//!
//! ```rust,ignore
//! use llm_client::{ChatClient, ChatRequest, Message};
//!
//! let client = ChatClient::new("https://api.groq.com/openai/v1", api_key)?;
//! let completion = client
//!     .chat_completion(ChatRequest::new("llama-3.3-70b-versatile").message(Message::user("Hello")))
//!     .await?;
//! ```

pub mod error;
pub mod gemini;
pub mod types;

pub use error::{LlmError, Result};
pub use gemini::GeminiClient;
pub use types::*;

use std::time::{Duration, Instant};

use reqwest::{header, Client, Response};
use secrecy::{ExposeSecret, SecretBox};
use tracing::{debug, warn};

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// OpenAI-compatible chat completions client.
pub struct ChatClient {
    http_client: Client,
    api_key: SecretBox<str>,
    base_url: String,
}

impl ChatClient {
    /// Create a client for the given base URL (without `/chat/completions`).
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        Self::with_timeout(base_url, api_key, DEFAULT_TIMEOUT)
    }

    /// Create a client with an explicit request timeout.
    pub fn with_timeout(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(LlmError::Config("API key is empty".into()));
        }
        Ok(Self {
            http_client: build_http_client(timeout)?,
            api_key: SecretBox::new(Box::from(api_key.as_str())),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Chat completion (non-streaming).
    pub async fn chat_completion(&self, request: ChatRequest) -> Result<Completion> {
        let start = Instant::now();

        let response = self
            .http_client
            .post(format!("{}/chat/completions", self.base_url))
            .header(
                header::AUTHORIZATION,
                format!("Bearer {}", self.api_key.expose_secret()),
            )
            .header(header::CONTENT_TYPE, "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, base_url = %self.base_url, "Chat completion request failed");
                LlmError::from(e)
            })?;

        let response = check_status(response).await?;

        let raw: types::ChatResponseRaw = response
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;

        let content = raw
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| LlmError::Parse("response contained no choices".into()))?;

        let usage = raw
            .usage
            .map(|u| Usage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
            })
            .unwrap_or_default();

        debug!(
            model = %request.model,
            duration_ms = start.elapsed().as_millis() as u64,
            "Chat completion"
        );

        Ok(Completion { content, usage })
    }
}

pub(crate) fn build_http_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| LlmError::Config(format!("failed to build HTTP client: {}", e)))
}

/// Turn a non-2xx response into a typed error.
pub(crate) async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get(header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());
    let body = response.text().await.unwrap_or_default();

    warn!(status = %status, error = %truncate(&body, 300), "Provider API error");
    Err(LlmError::from_status(status.as_u16(), body, retry_after))
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_api_key() {
        let result = ChatClient::new("https://api.example.com/v1", "  ");
        assert!(matches!(result, Err(LlmError::Config(_))));
    }

    #[test]
    fn trims_trailing_slash_from_base_url() {
        let client = ChatClient::new("https://api.example.com/v1/", "key").unwrap();
        assert_eq!(client.base_url(), "https://api.example.com/v1");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("abc", 10), "abc");
    }
}
