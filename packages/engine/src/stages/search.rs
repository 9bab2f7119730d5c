//! Search-Extract: web search plus LLM extraction of round fields.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::{MergeConfig, SearchConfig};
use crate::error::{PipelineError, Result, SearchError};
use crate::merge::same_event;
use crate::router::{ProviderRouter, StructuredResult};
use crate::searchers::RateLimitedSearcher;
use crate::traits::{SearchResult, Searcher};
use crate::types::{Company, Confidence, FundingRound, RoundCandidate, Source, SourceType};

use super::prompts::{clean, extraction_prompt, extraction_schema, render_query, ExtractedRound};
use super::StageReport;

pub struct SearchStage {
    searcher: Arc<dyn Searcher>,
    router: Arc<ProviderRouter>,
    config: SearchConfig,
    merge: MergeConfig,
    schema: Value,
}

impl SearchStage {
    /// Wraps `searcher` with the configured per-query delay.
    pub fn new(
        searcher: Arc<dyn Searcher>,
        router: Arc<ProviderRouter>,
        config: SearchConfig,
        merge: MergeConfig,
    ) -> Self {
        let searcher = RateLimitedSearcher::wrap(searcher, config.query_delay());
        Self {
            searcher,
            router,
            config,
            merge,
            schema: extraction_schema(),
        }
    }

    pub fn queries(&self, company: &Company) -> Vec<String> {
        self.config
            .query_templates
            .iter()
            .take(self.config.queries_per_company)
            .map(|t| render_query(t, &company.name))
            .collect()
    }

    pub async fn run(&self, company: &Company) -> Result<StageReport> {
        let hits = self.search_all(company).await?;
        let mut notes = Vec::new();
        let mut candidates = Vec::new();
        let mut extracted = 0usize;
        let mut failed = 0usize;

        for (index, hit) in hits.iter().enumerate() {
            let text = hit.text();
            if text.trim().is_empty() {
                continue;
            }
            let prompt = extraction_prompt(
                &company.name,
                hit.title.as_deref().unwrap_or(""),
                hit.url.as_str(),
                &text,
            );
            match self.router.extract(&prompt, &self.schema).await {
                Ok(result) => {
                    extracted += 1;
                    candidates.extend(self.to_candidates(company, index, hit, &result, &mut notes));
                }
                Err(PipelineError::ExtractionFailed { attempts, reason }) => {
                    failed += 1;
                    warn!(company = %company.name, url = %hit.url, attempts, %reason, "Snippet extraction failed");
                    notes.push(format!("extraction failed for {}: {}", hit.url, reason));
                }
                Err(e) => return Err(e),
            }
        }

        if failed > 0 && extracted == 0 {
            return Err(PipelineError::ExtractionFailed {
                attempts: failed,
                reason: format!("none of {} snippet(s) could be extracted", failed),
            });
        }

        let rounds: Vec<(usize, FundingRound)> = candidates
            .iter()
            .map(|(i, c)| (*i, c.round.clone()))
            .collect();
        let candidates: Vec<RoundCandidate> = candidates
            .into_iter()
            .enumerate()
            .map(|(n, (_, mut candidate))| {
                let confidence = agreement(n, &rounds, &self.merge);
                candidate.round.confidence = confidence;
                for source in &mut candidate.sources {
                    source.extraction_confidence = Some(confidence);
                }
                candidate
            })
            .collect();

        info!(
            company = %company.name,
            results = hits.len(),
            candidates = candidates.len(),
            "Search extraction complete"
        );

        let pause = self.config.company_delay();
        if !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }
        Ok(StageReport { candidates, notes })
    }

    /// Run every query; results are de-duplicated by URL.
    async fn search_all(&self, company: &Company) -> Result<Vec<SearchResult>> {
        let queries = self.queries(company);
        let mut seen = HashSet::new();
        let mut hits = Vec::new();
        let mut failures = 0usize;
        let mut last_error = None;

        for query in &queries {
            let outcome = tokio::time::timeout(
                self.config.timeout(),
                self.searcher.search(query, self.config.max_results_per_query),
            )
            .await
            .unwrap_or(Err(SearchError::Timeout(self.config.timeout())));

            match outcome {
                Ok(results) => {
                    debug!(query = %query, results = results.len(), "Search returned");
                    for hit in results {
                        if seen.insert(url_key(&hit)) {
                            hits.push(hit);
                        }
                    }
                }
                Err(SearchError::Config(msg)) => return Err(PipelineError::Config(msg)),
                Err(e) => {
                    warn!(query = %query, error = %e, "Search query failed");
                    failures += 1;
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if failures == queries.len() => Err(PipelineError::TransientNetwork(format!(
                "all {} search queries failed, last: {}",
                failures, e
            ))),
            _ => Ok(hits),
        }
    }

    fn to_candidates(
        &self,
        company: &Company,
        index: usize,
        hit: &SearchResult,
        result: &StructuredResult,
        notes: &mut Vec<String>,
    ) -> Vec<(usize, RoundCandidate)> {
        let items = match &result.value {
            Value::Array(items) => items.clone(),
            Value::Null => Vec::new(),
            other => vec![other.clone()],
        };

        let mut out = Vec::new();
        for item in items {
            let extracted: ExtractedRound = match serde_json::from_value(item.clone()) {
                Ok(r) => r,
                Err(e) => {
                    notes.push(format!("unreadable round from {}: {}", hit.url, e));
                    continue;
                }
            };
            if extracted.is_empty() {
                continue;
            }

            let mut round = FundingRound::new(company.id, SourceType::Search, Confidence::Low)
                .with_valuations(extracted.pre_money(), extracted.post_money())
                .with_investors(extracted.all_investors.iter().filter_map(|i| clean(&Some(i.clone()))))
                .with_source_url(hit.url.as_str())
                .with_notes(format!("Extracted by {}/{}", result.provider, result.model))
                .with_raw_payload(item);
            round.round_label = clean(&extracted.round_name);
            round.announced_on = clean(&extracted.date);
            round.amount_raised = extracted.amount();
            if let Some(lead) = clean(&extracted.lead_investor) {
                round = round.with_lead_investor(lead);
            }

            let mut source = Source::new(round.id, SourceType::Search)
                .with_provider(&result.provider, &result.model)
                .with_url(hit.url.as_str());
            if let Some(title) = &hit.title {
                source = source.with_title(title.clone());
            }
            if let Some(snippet) = &hit.snippet {
                source = source.with_snippet(snippet.clone());
            }
            out.push((index, RoundCandidate::new(round).with_source(source)));
        }
        out
    }
}

fn url_key(hit: &SearchResult) -> String {
    let mut url = hit.url.clone();
    url.set_fragment(None);
    url.as_str().trim_end_matches('/').to_lowercase()
}

/// Confidence from how many distinct snippets report the same event.
fn agreement(n: usize, rounds: &[(usize, FundingRound)], config: &MergeConfig) -> Confidence {
    let (snippet, round) = &rounds[n];
    let mut snippets = HashSet::from([*snippet]);
    for (other_snippet, other) in rounds {
        if other_snippet != snippet && same_event(round, other, config) {
            snippets.insert(*other_snippet);
        }
    }
    Confidence::from_agreement(snippets.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RateLimitConfig, RouterConfig};
    use crate::limiter::{RateLimiter, RetryPolicy};
    use crate::testing::{MockProvider, MockSearcher};
    use crate::traits::Provider;

    const ROUND_JSON: &str = r#"[{"round_name": "Series A", "date": "2024-03-01",
        "amount_raised_usd": "$10M", "lead_investor": "Sequoia", "all_investors": ["Sequoia", "Accel"]}]"#;

    fn router(provider: MockProvider) -> Arc<ProviderRouter> {
        let limiter = Arc::new(RateLimiter::new(&RateLimitConfig::default(), RetryPolicy::immediate(3)));
        let providers: Vec<Arc<dyn Provider>> = vec![Arc::new(provider)];
        Arc::new(ProviderRouter::new(providers, limiter, RouterConfig::default()))
    }

    fn config() -> SearchConfig {
        SearchConfig::default().without_delays().with_queries_per_company(2)
    }

    fn hit(url: &str, snippet: &str) -> SearchResult {
        SearchResult::new(url.parse().unwrap())
            .with_title("Acme raises Series A")
            .with_snippet(snippet)
    }

    #[tokio::test]
    async fn extracts_and_scores_agreement() {
        let searcher = MockSearcher::new()
            .with_results(vec![
                hit("https://news.example.com/a", "Acme raised $10M led by Sequoia"),
                hit("https://blog.example.com/b", "Acme closes $10 million Series A"),
            ]);
        let stage = SearchStage::new(
            Arc::new(searcher),
            router(MockProvider::new("mock", 60).with_default_response(ROUND_JSON)),
            config(),
            MergeConfig::default(),
        );

        let report = stage.run(&Company::new("Acme")).await.unwrap();
        assert_eq!(report.candidates.len(), 2);
        for candidate in &report.candidates {
            let round = &candidate.round;
            assert_eq!(round.source_type, SourceType::Search);
            assert_eq!(round.amount_raised, Some(10_000_000.0));
            assert_eq!(round.lead_investor.as_deref(), Some("Sequoia"));
            assert_eq!(round.confidence, Confidence::Medium);
            assert_eq!(candidate.sources[0].provider.as_deref(), Some("mock"));
        }
    }

    #[tokio::test]
    async fn duplicate_urls_are_extracted_once() {
        let searcher = MockSearcher::new().with_results(vec![
            hit("https://news.example.com/a", "Acme raised $10M"),
            hit("https://news.example.com/a#comments", "Acme raised $10M"),
        ]);
        let provider = MockProvider::new("mock", 60).with_default_response(ROUND_JSON);
        let router = router(provider);
        let stage = SearchStage::new(Arc::new(searcher), router, config(), MergeConfig::default());

        let report = stage.run(&Company::new("Acme")).await.unwrap();
        assert_eq!(report.candidates.len(), 1);
        assert_eq!(report.candidates[0].round.confidence, Confidence::Low);
    }

    #[tokio::test]
    async fn all_queries_failing_is_transient() {
        let stage = SearchStage::new(
            Arc::new(MockSearcher::new().failing()),
            router(MockProvider::new("mock", 60)),
            config(),
            MergeConfig::default(),
        );
        let err = stage.run(&Company::new("Acme")).await.unwrap_err();
        assert!(matches!(err, PipelineError::TransientNetwork(_)));
    }

    #[tokio::test]
    async fn unusable_output_everywhere_fails_extraction() {
        let searcher = MockSearcher::new().with_results(vec![hit("https://a.example.com/", "Acme")]);
        let stage = SearchStage::new(
            Arc::new(searcher),
            router(MockProvider::new("mock", 60).with_default_response("I cannot help with that")),
            config(),
            MergeConfig::default(),
        );
        let err = stage.run(&Company::new("Acme")).await.unwrap_err();
        assert!(matches!(err, PipelineError::ExtractionFailed { .. }));
    }

    #[tokio::test]
    async fn no_results_is_an_empty_success() {
        let stage = SearchStage::new(
            Arc::new(MockSearcher::new()),
            router(MockProvider::new("mock", 60)),
            config(),
            MergeConfig::default(),
        );
        let report = stage.run(&Company::new("Acme")).await.unwrap();
        assert!(report.candidates.is_empty());
    }
}
