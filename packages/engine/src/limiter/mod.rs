//! Per-provider rate limiting.
//!
//! Each provider gets a [`SlidingWindow`] sized to its RPM budget. Calls that
//! would overrun the window are deferred until a slot frees up, never
//! dropped. A provider that answers 429 is blocked for a cooldown taken from
//! the shared [`RetryPolicy`].
//!
//! The limiter is an injected service: construct one per pipeline (or per
//! test) and share it through an `Arc`.

pub mod policy;
pub mod window;

pub use policy::RetryPolicy;
pub use window::SlidingWindow;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::RateLimitConfig;
use crate::error::{PipelineError, Result};
use crate::traits::UsageStore;
use crate::types::{CallOutcome, UsageEvent};

#[derive(Debug, Default)]
struct ProviderCounters {
    granted: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    rate_limited: AtomicU64,
    deferred: AtomicU64,
}

#[derive(Debug)]
struct WindowState {
    window: SlidingWindow,
    consecutive_rate_limits: u32,
}

#[derive(Debug)]
struct ProviderSlot {
    rpm: u32,
    state: Mutex<WindowState>,
    counters: ProviderCounters,
}

impl ProviderSlot {
    fn lock(&self) -> MutexGuard<'_, WindowState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Point-in-time view of one provider's accounting.
#[derive(Debug, Clone, PartialEq)]
pub struct LimiterSnapshot {
    pub provider: String,
    pub rpm: u32,
    pub in_window: usize,
    pub granted: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub rate_limited: u64,
    /// Requests refused locally because the window was full
    pub deferred: u64,
    pub blocked_for: Option<Duration>,
}

pub struct RateLimiter {
    window: Duration,
    max_wait: Duration,
    policy: RetryPolicy,
    slots: RwLock<HashMap<String, Arc<ProviderSlot>>>,
    usage: Option<Arc<dyn UsageStore>>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig, policy: RetryPolicy) -> Self {
        Self {
            window: config.window(),
            max_wait: config.max_wait(),
            policy,
            slots: RwLock::new(HashMap::new()),
            usage: None,
        }
    }

    /// Persist every released outcome to `store`.
    pub fn with_usage_store(mut self, store: Arc<dyn UsageStore>) -> Self {
        self.usage = Some(store);
        self
    }

    pub fn max_wait(&self) -> Duration {
        self.max_wait
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Register (or resize) a provider's budget.
    pub fn register(&self, provider: &str, rpm: u32) {
        let slot = Arc::new(ProviderSlot {
            rpm,
            state: Mutex::new(WindowState {
                window: SlidingWindow::new(rpm, self.window),
                consecutive_rate_limits: 0,
            }),
            counters: ProviderCounters::default(),
        });
        self.slots
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(provider.to_string(), slot);
    }

    fn slot(&self, provider: &str) -> Option<Arc<ProviderSlot>> {
        self.slots
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(provider)
            .cloned()
    }

    /// Take a slot now, or learn how long until one frees up.
    ///
    /// Unregistered providers never get a slot.
    pub fn try_acquire(&self, provider: &str) -> std::result::Result<(), Duration> {
        let Some(slot) = self.slot(provider) else {
            warn!(provider, "Rate limit requested for unregistered provider");
            return Err(self.window);
        };

        let result = slot.lock().window.try_reserve(Instant::now());
        match result {
            Ok(()) => {
                slot.counters.granted.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(wait) => {
                slot.counters.deferred.fetch_add(1, Ordering::Relaxed);
                Err(wait)
            }
        }
    }

    /// How long until `provider` could take a slot, without taking it.
    pub fn time_until_available(&self, provider: &str) -> Duration {
        match self.slot(provider) {
            Some(slot) => slot.lock().window.wait_time(Instant::now()),
            None => self.window,
        }
    }

    /// Wait for a slot, at most the configured max wait.
    pub async fn acquire(&self, provider: &str) -> Result<()> {
        self.acquire_within(provider, self.max_wait).await
    }

    pub async fn acquire_within(&self, provider: &str, max_wait: Duration) -> Result<()> {
        let started = Instant::now();
        loop {
            match self.try_acquire(provider) {
                Ok(()) => return Ok(()),
                Err(wait) => {
                    let waited = started.elapsed();
                    if waited + wait > max_wait {
                        return Err(PipelineError::CapacityExhausted { waited });
                    }
                    debug!(provider, wait_ms = wait.as_millis() as u64, "Deferring call until window frees");
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    /// Record how a granted call ended.
    ///
    /// A provider 429 blocks the provider for `retry_after` if given, else
    /// the policy backoff for the number of consecutive 429s.
    pub async fn release_outcome(&self, event: UsageEvent, retry_after: Option<Duration>) {
        if let Some(slot) = self.slot(&event.provider) {
            let counters = &slot.counters;
            match event.outcome {
                CallOutcome::Success => {
                    counters.succeeded.fetch_add(1, Ordering::Relaxed);
                    slot.lock().consecutive_rate_limits = 0;
                }
                CallOutcome::Failed => {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                }
                CallOutcome::RateLimited => {
                    counters.rate_limited.fetch_add(1, Ordering::Relaxed);
                    let mut state = slot.lock();
                    let cooldown = retry_after
                        .unwrap_or_else(|| self.policy.backoff(state.consecutive_rate_limits));
                    state.consecutive_rate_limits = state.consecutive_rate_limits.saturating_add(1);
                    state.window.block_until(Instant::now() + cooldown);
                    warn!(
                        provider = %event.provider,
                        cooldown_ms = cooldown.as_millis() as u64,
                        "Provider rate limited, cooling down"
                    );
                }
            }
        }

        if let Some(store) = &self.usage {
            if let Err(e) = store.record_usage(&event).await {
                warn!(provider = %event.provider, error = %e, "Failed to persist provider usage");
            }
        }
    }

    pub fn snapshot(&self) -> Vec<LimiterSnapshot> {
        let now = Instant::now();
        let slots = self.slots.read().unwrap_or_else(|e| e.into_inner());
        let mut snapshots: Vec<LimiterSnapshot> = slots
            .iter()
            .map(|(provider, slot)| {
                let mut state = slot.lock();
                LimiterSnapshot {
                    provider: provider.clone(),
                    rpm: slot.rpm,
                    in_window: state.window.in_window(now),
                    granted: slot.counters.granted.load(Ordering::Relaxed),
                    succeeded: slot.counters.succeeded.load(Ordering::Relaxed),
                    failed: slot.counters.failed.load(Ordering::Relaxed),
                    rate_limited: slot.counters.rate_limited.load(Ordering::Relaxed),
                    deferred: slot.counters.deferred.load(Ordering::Relaxed),
                    blocked_for: state.window.blocked_for(now),
                }
            })
            .collect();
        snapshots.sort_by(|a, b| a.provider.cmp(&b.provider));
        snapshots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::MemoryStore;

    fn limiter(max_wait_secs: u64) -> RateLimiter {
        let config = RateLimitConfig {
            window_secs: 60,
            max_wait_secs,
        };
        RateLimiter::new(&config, RetryPolicy::default())
    }

    #[tokio::test(start_paused = true)]
    async fn defers_rather_than_drops() {
        let limiter = limiter(120);
        limiter.register("groq", 2);

        let start = Instant::now();
        limiter.acquire("groq").await.unwrap();
        limiter.acquire("groq").await.unwrap();
        limiter.acquire("groq").await.unwrap();

        assert!(start.elapsed() >= Duration::from_secs(60));
        let snap = &limiter.snapshot()[0];
        assert_eq!(snap.granted, 3);
        assert!(snap.deferred >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn deferred_acquire_stays_pending_until_the_window_slides() {
        let limiter = limiter(120);
        limiter.register("groq", 1);
        limiter.try_acquire("groq").unwrap();

        let mut waiting = tokio_test::task::spawn(limiter.acquire("groq"));
        tokio_test::assert_pending!(waiting.poll());

        tokio::time::advance(Duration::from_secs(60)).await;
        tokio_test::assert_ready_ok!(waiting.poll());
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_gives_up_past_max_wait() {
        let limiter = limiter(5);
        limiter.register("groq", 1);
        limiter.acquire("groq").await.unwrap();

        let err = limiter.acquire("groq").await.unwrap_err();
        assert!(matches!(err, PipelineError::CapacityExhausted { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn provider_429_blocks_for_policy_backoff() {
        let limiter = limiter(30);
        limiter.register("mistral", 100);
        limiter.try_acquire("mistral").unwrap();

        limiter
            .release_outcome(UsageEvent::new("mistral", "small", CallOutcome::RateLimited), None)
            .await;
        let wait = limiter.try_acquire("mistral").unwrap_err();
        assert_eq!(wait, Duration::from_secs(2));

        tokio::time::advance(Duration::from_secs(2)).await;
        limiter.try_acquire("mistral").unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn retry_after_overrides_backoff() {
        let limiter = limiter(30);
        limiter.register("groq", 100);
        limiter
            .release_outcome(
                UsageEvent::new("groq", "llama", CallOutcome::RateLimited),
                Some(Duration::from_secs(9)),
            )
            .await;
        assert_eq!(limiter.time_until_available("groq"), Duration::from_secs(9));
    }

    #[tokio::test]
    async fn released_outcomes_reach_the_usage_store() {
        let store = Arc::new(MemoryStore::new());
        let limiter = limiter(30).with_usage_store(store.clone());
        limiter.register("groq", 10);

        limiter
            .release_outcome(
                UsageEvent::new("groq", "llama", CallOutcome::Success).with_tokens(10, 5),
                None,
            )
            .await;
        limiter
            .release_outcome(UsageEvent::new("groq", "llama", CallOutcome::Failed), None)
            .await;

        let records = store.usage_records().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].total_calls, 2);
        assert_eq!(records[0].successful_calls, 1);
        assert_eq!(records[0].failed_calls, 1);
        assert_eq!(limiter.snapshot()[0].succeeded, 1);
    }

    #[test]
    fn unregistered_providers_never_get_slots() {
        let limiter = limiter(30);
        assert!(limiter.try_acquire("nobody").is_err());
    }
}
