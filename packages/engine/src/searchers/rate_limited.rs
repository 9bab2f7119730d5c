//! Politeness pacing for search calls.
//!
//! Wraps any `Searcher` with a governor limiter so consecutive calls are
//! spaced at least `period` apart across all workers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};

use crate::error::SearchError;
use crate::traits::{SearchResult, Searcher};

pub struct RateLimitedSearcher {
    inner: Arc<dyn Searcher>,
    limiter: DefaultDirectRateLimiter,
}

impl RateLimitedSearcher {
    /// `None` when `period` is zero.
    pub fn new(inner: Arc<dyn Searcher>, period: Duration) -> Option<Self> {
        let quota = Quota::with_period(period)?;
        Some(Self {
            inner,
            limiter: RateLimiter::direct(quota),
        })
    }

    /// Pace `inner`, or hand it back unchanged for a zero period.
    pub fn wrap(inner: Arc<dyn Searcher>, period: Duration) -> Arc<dyn Searcher> {
        match Self::new(inner.clone(), period) {
            Some(paced) => Arc::new(paced) as Arc<dyn Searcher>,
            None => inner,
        }
    }
}

#[async_trait]
impl Searcher for RateLimitedSearcher {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchResult>, SearchError> {
        self.limiter.until_ready().await;
        self.inner.search(query, max_results).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockSearcher;

    #[test]
    fn zero_period_is_unpaced() {
        assert!(RateLimitedSearcher::new(Arc::new(MockSearcher::new()), Duration::ZERO).is_none());
    }

    #[tokio::test]
    async fn spaces_consecutive_calls() {
        let inner = Arc::new(MockSearcher::new());
        let searcher = RateLimitedSearcher::wrap(inner.clone(), Duration::from_millis(50));

        let started = std::time::Instant::now();
        for _ in 0..3 {
            searcher.search("acme", 3).await.unwrap();
        }
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert_eq!(inner.queries().len(), 3);
    }
}
