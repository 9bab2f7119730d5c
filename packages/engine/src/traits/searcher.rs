//! Web search client.

use async_trait::async_trait;
use url::Url;

use crate::error::SearchError;

/// A ranked search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub url: Url,
    pub title: Option<String>,
    pub snippet: Option<String>,

    /// Relevance score (0.0-1.0, if the API provides one)
    pub score: Option<f32>,
}

impl SearchResult {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            title: None,
            snippet: None,
            score: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_snippet(mut self, snippet: impl Into<String>) -> Self {
        self.snippet = Some(snippet.into());
        self
    }

    pub fn with_score(mut self, score: f32) -> Self {
        self.score = Some(score);
        self
    }

    /// Title and snippet joined, as handed to extraction.
    pub fn text(&self) -> String {
        match (&self.title, &self.snippet) {
            (Some(t), Some(s)) => format!("{}\n{}", t, s),
            (Some(t), None) => t.clone(),
            (None, Some(s)) => s.clone(),
            (None, None) => String::new(),
        }
    }
}

#[async_trait]
pub trait Searcher: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchResult>, SearchError>;
}
