//! Multi-provider extraction router.
//!
//! `extract` picks providers by smooth weighted round-robin (weight = RPM
//! budget), skipping any that are disabled, degraded, or out of window
//! capacity. Each logical request tries a provider at most once and at most
//! `RetryPolicy::max_attempts` providers overall. Every dispatched call is
//! released back to the [`RateLimiter`], which updates usage accounting.

pub mod health;
pub mod selection;
pub mod structured;

pub use health::HealthBoard;
pub use selection::WeightedRoundRobin;
pub use structured::{parse_structured, with_schema};

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::RouterConfig;
use crate::error::{PipelineError, ProviderError, Result};
use crate::limiter::RateLimiter;
use crate::traits::{Completion, HealthState, Provider};
use crate::types::{CallOutcome, UsageEvent};

/// Parsed JSON plus which backend produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct StructuredResult {
    pub value: Value,
    pub provider: String,
    pub model: String,
    pub latency: Duration,
    /// Providers dispatched for this request, the successful one included
    pub attempts: usize,
}

enum Selection {
    Ready(usize),
    /// Nothing has capacity now; the soonest frees up after this long
    Wait(Duration),
    /// No untried provider is usable
    Exhausted,
}

pub struct ProviderRouter {
    providers: Vec<Arc<dyn Provider>>,
    weights: Vec<u32>,
    limiter: Arc<RateLimiter>,
    health: HealthBoard,
    selector: Mutex<WeightedRoundRobin>,
    config: RouterConfig,
}

impl ProviderRouter {
    /// Registers each provider's budget with `limiter`.
    pub fn new(
        providers: Vec<Arc<dyn Provider>>,
        limiter: Arc<RateLimiter>,
        config: RouterConfig,
    ) -> Self {
        for provider in &providers {
            limiter.register(provider.id(), provider.rpm_budget());
        }
        let weights = providers.iter().map(|p| p.rpm_budget()).collect();
        Self {
            selector: Mutex::new(WeightedRoundRobin::new(providers.len())),
            health: HealthBoard::new(config.degraded_cooldown()),
            providers,
            weights,
            limiter,
            config,
        }
    }

    pub fn provider_ids(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.id()).collect()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn health(&self) -> &HealthBoard {
        &self.health
    }

    /// Extract JSON conforming to `schema` from the first provider that
    /// returns something usable.
    pub async fn extract(&self, prompt: &str, schema: &Value) -> Result<StructuredResult> {
        let full_prompt = with_schema(prompt, schema);
        let started = Instant::now();
        let max_attempts = self.limiter.policy().attempts_for(self.providers.len());

        let mut tried = vec![false; self.providers.len()];
        let mut attempts = 0usize;
        let mut rate_limited = 0usize;
        let mut last_error: Option<String> = None;

        while attempts < max_attempts {
            let idx = match self.select(&tried) {
                Selection::Ready(idx) => idx,
                Selection::Wait(wait) => {
                    let waited = started.elapsed();
                    if waited + wait > self.limiter.max_wait() {
                        warn!(
                            waited_ms = waited.as_millis() as u64,
                            next_slot_ms = wait.as_millis() as u64,
                            "All providers at capacity"
                        );
                        return Err(PipelineError::CapacityExhausted { waited });
                    }
                    debug!(wait_ms = wait.as_millis() as u64, "Waiting for provider capacity");
                    tokio::time::sleep(wait).await;
                    continue;
                }
                Selection::Exhausted => break,
            };

            tried[idx] = true;
            attempts += 1;
            let provider = &self.providers[idx];

            let (result, latency) = self.dispatch(provider.as_ref(), &full_prompt).await;
            match result {
                Ok(completion) => match parse_structured(&completion.text, schema) {
                    Ok(value) => {
                        self.release(provider.as_ref(), CallOutcome::Success, latency, &completion, None)
                            .await;
                        // A concurrent failure may have degraded it mid-call
                        self.health.clear(provider.id());
                        debug!(
                            provider = provider.id(),
                            latency_ms = latency.as_millis() as u64,
                            attempts,
                            "Extraction succeeded"
                        );
                        return Ok(StructuredResult {
                            value,
                            provider: provider.id().to_string(),
                            model: provider.model().to_string(),
                            latency,
                            attempts,
                        });
                    }
                    Err(reason) => {
                        self.release(provider.as_ref(), CallOutcome::Failed, latency, &completion, None)
                            .await;
                        warn!(provider = provider.id(), reason = %reason, "Unusable provider output");
                        last_error = Some(format!("{}: {}", provider.id(), reason));
                    }
                },
                Err(ProviderError::RateLimited { retry_after }) => {
                    rate_limited += 1;
                    self.release(
                        provider.as_ref(),
                        CallOutcome::RateLimited,
                        latency,
                        &Completion::default(),
                        retry_after,
                    )
                    .await;
                    last_error = Some(format!("{}: rate limited", provider.id()));
                }
                Err(e) => {
                    self.release(provider.as_ref(), CallOutcome::Failed, latency, &Completion::default(), None)
                        .await;
                    if e.degrades_provider() {
                        self.health.mark_degraded(provider.id(), &e.to_string());
                    }
                    last_error = Some(format!("{}: {}", provider.id(), e));
                }
            }
        }

        if attempts > 0 && rate_limited == attempts {
            return Err(PipelineError::CapacityExhausted {
                waited: started.elapsed(),
            });
        }

        let reason = last_error.unwrap_or_else(|| "no healthy providers available".to_string());
        info!(attempts, reason = %reason, "Extraction failed on every eligible provider");
        Err(PipelineError::ExtractionFailed { attempts, reason })
    }

    fn select(&self, tried: &[bool]) -> Selection {
        let mut ready = vec![false; self.providers.len()];
        let mut soonest: Option<Duration> = None;

        for (i, provider) in self.providers.iter().enumerate() {
            if tried[i]
                || provider.health() == HealthState::Disabled
                || !self.health.is_available(provider.id())
            {
                continue;
            }
            let wait = self.limiter.time_until_available(provider.id());
            if wait.is_zero() {
                ready[i] = true;
            } else {
                soonest = Some(soonest.map_or(wait, |s| s.min(wait)));
            }
        }

        loop {
            let pick = self
                .selector
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .pick(&self.weights, |i| ready[i]);

            let Some(idx) = pick else {
                return soonest.map_or(Selection::Exhausted, Selection::Wait);
            };

            // Another worker may have taken the last slot since the peek
            match self.limiter.try_acquire(self.providers[idx].id()) {
                Ok(()) => return Selection::Ready(idx),
                Err(wait) => {
                    ready[idx] = false;
                    soonest = Some(soonest.map_or(wait, |s| s.min(wait)));
                }
            }
        }
    }

    async fn dispatch(
        &self,
        provider: &dyn Provider,
        prompt: &str,
    ) -> (std::result::Result<Completion, ProviderError>, Duration) {
        let timeout = self.config.call_timeout();
        let start = Instant::now();
        let result = match tokio::time::timeout(timeout, provider.complete(prompt)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(timeout)),
        };
        (result, start.elapsed())
    }

    async fn release(
        &self,
        provider: &dyn Provider,
        outcome: CallOutcome,
        latency: Duration,
        completion: &Completion,
        retry_after: Option<Duration>,
    ) {
        let event = UsageEvent::new(provider.id(), provider.model(), outcome)
            .with_latency(latency)
            .with_tokens(completion.input_tokens, completion.output_tokens);
        self.limiter.release_outcome(event, retry_after).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimitConfig;
    use crate::limiter::RetryPolicy;
    use crate::testing::MockProvider;
    use serde_json::json;

    fn schema() -> Value {
        json!({"type": "array"})
    }

    fn router(providers: Vec<Arc<dyn Provider>>, max_wait_secs: u64) -> ProviderRouter {
        let limiter = Arc::new(RateLimiter::new(
            &RateLimitConfig {
                window_secs: 60,
                max_wait_secs,
            },
            RetryPolicy::default(),
        ));
        ProviderRouter::new(providers, limiter, RouterConfig::default())
    }

    #[tokio::test]
    async fn returns_parsed_json_with_provenance() {
        let provider = Arc::new(MockProvider::new("groq", 30).with_default_response("[{\"a\": 1}]"));
        let router = router(vec![provider.clone()], 30);

        let result = router.extract("Find rounds", &schema()).await.unwrap();
        assert_eq!(result.value, json!([{"a": 1}]));
        assert_eq!(result.provider, "groq");
        assert_eq!(result.attempts, 1);
        assert!(provider.prompts()[0].contains("Find rounds"));
    }

    #[tokio::test]
    async fn fails_over_on_server_error_and_degrades() {
        let bad = Arc::new(MockProvider::new("bad", 100).with_error(ProviderError::Server {
            status: 503,
            message: "overloaded".into(),
        }));
        let good = Arc::new(MockProvider::new("good", 10).with_default_response("[]"));
        let router = router(vec![bad.clone(), good.clone()], 30);

        let result = router.extract("p", &schema()).await.unwrap();
        assert_eq!(result.provider, "good");
        assert_eq!(result.attempts, 2);
        assert!(!router.health().is_available("bad"));

        // Degraded provider is skipped on the next request
        router.extract("p", &schema()).await.unwrap();
        assert_eq!(bad.call_count(), 1);
        assert_eq!(good.call_count(), 2);
    }

    #[tokio::test]
    async fn unusable_output_tries_next_provider() {
        let chatty = Arc::new(MockProvider::new("chatty", 100).with_default_response("Sorry, no idea."));
        let good = Arc::new(MockProvider::new("good", 10).with_default_response("[]"));
        let router = router(vec![chatty.clone(), good], 30);

        let result = router.extract("p", &schema()).await.unwrap();
        assert_eq!(result.provider, "good");
        // Bad output is not a transport fault
        assert!(router.health().is_available("chatty"));
    }

    #[tokio::test]
    async fn every_provider_failing_is_extraction_failed() {
        let a = Arc::new(MockProvider::new("a", 10).with_default_response("nope"));
        let b = Arc::new(MockProvider::new("b", 10).with_error(ProviderError::Transport("reset".into())));
        let router = router(vec![a, b], 30);

        let err = router.extract("p", &schema()).await.unwrap_err();
        match err {
            PipelineError::ExtractionFailed { attempts, .. } => assert_eq!(attempts, 2),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn attempts_are_bounded_by_policy() {
        let providers: Vec<Arc<dyn Provider>> = (0..5)
            .map(|i| {
                Arc::new(
                    MockProvider::new(format!("p{i}"), 10)
                        .with_error(ProviderError::Transport("down".into())),
                ) as Arc<dyn Provider>
            })
            .collect();
        let limiter = Arc::new(RateLimiter::new(&RateLimitConfig::default(), RetryPolicy::new(3)));
        let router = ProviderRouter::new(providers, limiter, RouterConfig::default());

        let err = router.extract("p", &schema()).await.unwrap_err();
        assert!(matches!(err, PipelineError::ExtractionFailed { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn disabled_providers_are_never_called() {
        let off = Arc::new(MockProvider::new("off", 100).disabled());
        let on = Arc::new(MockProvider::new("on", 1).with_default_response("[]"));
        let router = router(vec![off.clone(), on], 30);

        router.extract("p", &schema()).await.unwrap();
        assert_eq!(off.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_provider_times_out_and_fails_over() {
        let slow = Arc::new(
            MockProvider::new("slow", 100)
                .with_default_response("[]")
                .with_latency(Duration::from_secs(120)),
        );
        let fast = Arc::new(MockProvider::new("fast", 10).with_default_response("[]"));
        let router = router(vec![slow, fast], 30);

        let result = router.extract("p", &schema()).await.unwrap();
        assert_eq!(result.provider, "fast");
        assert!(!router.health().is_available("slow"));
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_a_window_within_max_wait() {
        let provider = Arc::new(MockProvider::new("solo", 1).with_default_response("[]"));
        let router = router(vec![provider.clone()], 90);

        router.extract("p", &schema()).await.unwrap();
        let start = Instant::now();
        router.extract("p", &schema()).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(60));
        assert_eq!(provider.call_count(), 2);
    }
}
