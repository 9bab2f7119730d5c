//! Gemini `generateContent` client.

use std::time::{Duration, Instant};

use reqwest::{header, Client};
use secrecy::{ExposeSecret, SecretBox};
use tracing::{debug, warn};

use crate::error::{LlmError, Result};
use crate::types::{Completion, GenerateContentRequest, GenerateContentResponseRaw, Usage};
use crate::{build_http_client, check_status, DEFAULT_TIMEOUT};

const BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Client for Google's Gemini API.
///
/// The API key travels as the `key` query parameter.
pub struct GeminiClient {
    http_client: Client,
    api_key: SecretBox<str>,
    base_url: String,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Self::with_timeout(api_key, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(api_key: impl Into<String>, timeout: Duration) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(LlmError::Config("API key is empty".into()));
        }
        Ok(Self {
            http_client: build_http_client(timeout)?,
            api_key: SecretBox::new(Box::from(api_key.as_str())),
            base_url: BASE_URL.to_string(),
        })
    }

    /// Override the API root (proxies, tests).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub async fn generate_content(
        &self,
        model: &str,
        request: &GenerateContentRequest,
    ) -> Result<Completion> {
        let start = Instant::now();
        let url = format!("{}/models/{}:generateContent", self.base_url, model);

        let response = self
            .http_client
            .post(&url)
            .query(&[("key", self.api_key.expose_secret())])
            .header(header::CONTENT_TYPE, "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, model, "Gemini request failed");
                LlmError::from(e)
            })?;

        let response = check_status(response).await?;

        let raw: GenerateContentResponseRaw = response
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;

        let content = first_candidate_text(&raw)
            .ok_or_else(|| LlmError::Parse("response contained no candidate text".into()))?;

        let usage = raw
            .usage_metadata
            .as_ref()
            .map(|u| Usage {
                input_tokens: u.prompt_token_count,
                output_tokens: u.candidates_token_count,
            })
            .unwrap_or_default();

        debug!(
            model,
            duration_ms = start.elapsed().as_millis() as u64,
            "Gemini completion"
        );

        Ok(Completion { content, usage })
    }
}

fn first_candidate_text(raw: &GenerateContentResponseRaw) -> Option<String> {
    let content = raw.candidates.first()?.content.as_ref()?;
    let text: String = content.parts.iter().map(|p| p.text.as_str()).collect();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_candidate_parts() {
        let raw: GenerateContentResponseRaw = serde_json::from_value(serde_json::json!({
            "candidates": [{"content": {"parts": [{"text": "[{\"a\":"}, {"text": "1}]"}]}}],
            "usageMetadata": {"promptTokenCount": 12, "candidatesTokenCount": 4}
        }))
        .unwrap();
        assert_eq!(first_candidate_text(&raw).as_deref(), Some("[{\"a\":1}]"));
        assert_eq!(raw.usage_metadata.unwrap().prompt_token_count, 12);
    }

    #[test]
    fn empty_candidates_yield_none() {
        let raw: GenerateContentResponseRaw =
            serde_json::from_value(serde_json::json!({"candidates": []})).unwrap();
        assert!(first_candidate_text(&raw).is_none());
    }
}
