//! Mock collaborators for tests.
//!
//! These let the pipeline run end to end without network calls: scripted
//! provider outcomes, canned filings and canned search results, each with
//! call tracking for assertions.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{FilingsError, ProviderError, SearchError};
use crate::traits::{
    Completion, FilingDocument, FilingsClient, HealthState, Provider, RegistryMatch, SearchResult,
    Searcher,
};
use crate::types::{name_key, RegistryId};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

type Outcome = Result<String, ProviderError>;

/// A scripted text-generation provider.
///
/// Outcomes come from, in order: the scripted queue, the first prompt rule
/// whose needle appears in the prompt, then the default.
pub struct MockProvider {
    id: String,
    model: String,
    rpm: u32,
    health: HealthState,
    latency: Option<Duration>,
    default: Outcome,
    rules: Vec<(String, Outcome)>,
    script: Mutex<VecDeque<Outcome>>,
    prompts: Mutex<Vec<String>>,
}

impl MockProvider {
    pub fn new(id: impl Into<String>, rpm: u32) -> Self {
        Self {
            id: id.into(),
            model: "mock-model".to_string(),
            rpm,
            health: HealthState::Healthy,
            latency: None,
            default: Ok("[]".to_string()),
            rules: Vec::new(),
            script: Mutex::new(VecDeque::new()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_default_response(mut self, text: impl Into<String>) -> Self {
        self.default = Ok(text.into());
        self
    }

    /// Fail every unscripted call with `error`.
    pub fn with_error(mut self, error: ProviderError) -> Self {
        self.default = Err(error);
        self
    }

    /// Answer prompts containing `needle` with `text`.
    pub fn with_response_for(mut self, needle: impl Into<String>, text: impl Into<String>) -> Self {
        self.rules.push((needle.into(), Ok(text.into())));
        self
    }

    /// Fail prompts containing `needle`.
    pub fn with_error_for(mut self, needle: impl Into<String>, error: ProviderError) -> Self {
        self.rules.push((needle.into(), Err(error)));
        self
    }

    /// Queue outcomes consumed before any rule or default.
    pub fn with_script(self, outcomes: impl IntoIterator<Item = Outcome>) -> Self {
        lock(&self.script).extend(outcomes);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.health = HealthState::Disabled;
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        lock(&self.prompts).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.prompts).len()
    }

    fn outcome_for(&self, prompt: &str) -> Outcome {
        if let Some(next) = lock(&self.script).pop_front() {
            return next;
        }
        self.rules
            .iter()
            .find(|(needle, _)| prompt.contains(needle.as_str()))
            .map(|(_, outcome)| outcome.clone())
            .unwrap_or_else(|| self.default.clone())
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn rpm_budget(&self) -> u32 {
        self.rpm
    }

    fn health(&self) -> HealthState {
        self.health
    }

    async fn complete(&self, prompt: &str) -> Result<Completion, ProviderError> {
        lock(&self.prompts).push(prompt.to_string());
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let text = self.outcome_for(prompt)?;
        Ok(Completion {
            output_tokens: (text.len() / 4) as u64,
            input_tokens: (prompt.len() / 4) as u64,
            text,
        })
    }
}

/// Canned registry entries and filings.
#[derive(Default)]
pub struct MockFilingsClient {
    registry: HashMap<String, RegistryMatch>,
    filings: HashMap<RegistryId, Vec<FilingDocument>>,
    unavailable: bool,
    failures_left: AtomicU32,
    lookups: AtomicUsize,
    fetches: AtomicUsize,
}

impl MockFilingsClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_registry(
        mut self,
        name: &str,
        registry_id: RegistryId,
        official_name: impl Into<String>,
    ) -> Self {
        self.registry.insert(
            name_key(name),
            RegistryMatch {
                registry_id,
                official_name: official_name.into(),
            },
        );
        self
    }

    pub fn with_filings(mut self, registry_id: RegistryId, documents: Vec<FilingDocument>) -> Self {
        self.filings.insert(registry_id, documents);
        self
    }

    /// Every call fails with `Unavailable`.
    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }

    /// The next `n` fetches fail with `Unavailable`.
    pub fn failing_fetches(self, n: u32) -> Self {
        self.failures_left.store(n, Ordering::SeqCst);
        self
    }

    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FilingsClient for MockFilingsClient {
    async fn lookup(&self, name: &str) -> Result<Option<RegistryMatch>, FilingsError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.unavailable {
            return Err(FilingsError::Unavailable("mock registry offline".to_string()));
        }
        Ok(self.registry.get(&name_key(name)).cloned())
    }

    async fn fetch_filings(&self, registry_id: &RegistryId) -> Result<Vec<FilingDocument>, FilingsError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.unavailable {
            return Err(FilingsError::Unavailable("mock registry offline".to_string()));
        }
        let pending = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if pending.is_ok() {
            return Err(FilingsError::Unavailable("mock fetch failure".to_string()));
        }
        Ok(self.filings.get(registry_id).cloned().unwrap_or_default())
    }
}

/// Canned search results.
///
/// Queries containing a configured needle get that needle's results;
/// everything else gets the default results.
#[derive(Default)]
pub struct MockSearcher {
    default: Vec<SearchResult>,
    by_needle: Vec<(String, Vec<SearchResult>)>,
    failing: Vec<String>,
    fail_all: bool,
    queries: Mutex<Vec<String>>,
}

impl MockSearcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_results(mut self, results: Vec<SearchResult>) -> Self {
        self.default = results;
        self
    }

    pub fn with_results_for(mut self, needle: impl Into<String>, results: Vec<SearchResult>) -> Self {
        self.by_needle.push((needle.into(), results));
        self
    }

    /// Fail every query containing `needle`.
    pub fn failing_for(mut self, needle: impl Into<String>) -> Self {
        self.failing.push(needle.into());
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail_all = true;
        self
    }

    pub fn queries(&self) -> Vec<String> {
        lock(&self.queries).clone()
    }
}

#[async_trait]
impl Searcher for MockSearcher {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchResult>, SearchError> {
        lock(&self.queries).push(query.to_string());
        if self.fail_all || self.failing.iter().any(|n| query.contains(n.as_str())) {
            return Err(SearchError::Unavailable("mock search offline".to_string()));
        }
        let results = self
            .by_needle
            .iter()
            .find(|(needle, _)| query.contains(needle.as_str()))
            .map(|(_, r)| r)
            .unwrap_or(&self.default);
        Ok(results.iter().take(max_results).cloned().collect())
    }
}
