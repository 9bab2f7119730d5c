//! Tavily-backed web searcher.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::credentials::SecretString;
use crate::error::SearchError;
use crate::traits::{SearchResult, Searcher};

const TAVILY_URL: &str = "https://api.tavily.com/search";

#[derive(Debug, Serialize)]
struct TavilyRequest<'a> {
    query: &'a str,
    search_depth: &'a str,
    max_results: usize,
}

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Debug, Deserialize)]
struct TavilyResult {
    url: String,
    title: Option<String>,
    content: Option<String>,
    score: Option<f32>,
}

pub struct TavilySearcher {
    client: reqwest::Client,
    api_key: SecretString,
    endpoint: String,
    search_depth: String,
}

impl TavilySearcher {
    pub fn new(api_key: SecretString, timeout: Duration) -> Result<Self, SearchError> {
        if api_key.expose().is_empty() {
            return Err(SearchError::Config("TAVILY_API_KEY is empty".to_string()));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SearchError::Config(e.to_string()))?;
        Ok(Self {
            client,
            api_key,
            endpoint: TAVILY_URL.to_string(),
            search_depth: "basic".to_string(),
        })
    }

    /// "basic" or "advanced".
    pub fn with_search_depth(mut self, depth: impl Into<String>) -> Self {
        self.search_depth = depth.into();
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl Searcher for TavilySearcher {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchResult>, SearchError> {
        let request = TavilyRequest {
            query,
            search_depth: &self.search_depth,
            max_results,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", self.api_key.expose()))
            .json(&request)
            .send()
            .await
            .map_err(|e| SearchError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(SearchError::Config(format!("Tavily rejected the API key: {}", status)));
        }
        if !status.is_success() {
            return Err(SearchError::Unavailable(format!("Tavily API error: {}", status)));
        }

        let body: TavilyResponse = response
            .json()
            .await
            .map_err(|e| SearchError::Unavailable(format!("invalid Tavily response: {}", e)))?;

        let results: Vec<SearchResult> = body
            .results
            .into_iter()
            .filter_map(|r| {
                let url = Url::parse(&r.url).ok()?;
                let mut result = SearchResult::new(url);
                if let Some(title) = r.title {
                    result = result.with_title(title);
                }
                if let Some(content) = r.content {
                    result = result.with_snippet(content);
                }
                if let Some(score) = r.score {
                    result = result.with_score(score);
                }
                Some(result)
            })
            .take(max_results)
            .collect();

        debug!(query, results = results.len(), "Tavily search");
        Ok(results)
    }
}
