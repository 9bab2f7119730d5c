//! User-agent rotation.
//!
//! EDGAR asks every client to identify itself and caps each identity at ten
//! requests per second. Requests cycle through the configured identities and
//! each identity is paced by its own limiter.

use std::num::NonZeroU32;
use std::sync::atomic::{AtomicUsize, Ordering};

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};

use crate::error::{EdgarError, Result};

/// Requests per second allowed per identity.
pub const REQUESTS_PER_SECOND: u32 = 10;

struct PacedAgent {
    value: String,
    limiter: DefaultDirectRateLimiter,
}

pub struct UserAgentPool {
    agents: Vec<PacedAgent>,
    next: AtomicUsize,
}

impl UserAgentPool {
    pub fn new(agents: Vec<String>) -> Result<Self> {
        Self::with_rate(agents, REQUESTS_PER_SECOND)
    }

    pub fn with_rate(agents: Vec<String>, requests_per_second: u32) -> Result<Self> {
        let rate = NonZeroU32::new(requests_per_second)
            .ok_or_else(|| EdgarError::Config("requests_per_second must be > 0".into()))?;

        let agents: Vec<PacedAgent> = agents
            .into_iter()
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty())
            .map(|value| PacedAgent {
                value,
                limiter: RateLimiter::direct(Quota::per_second(rate).allow_burst(NonZeroU32::MIN)),
            })
            .collect();

        if agents.is_empty() {
            return Err(EdgarError::Config(
                "at least one SEC user agent is required".into(),
            ));
        }

        Ok(Self {
            agents,
            next: AtomicUsize::new(0),
        })
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Next identity in rotation, once its pacing allows another request.
    pub async fn acquire(&self) -> &str {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.agents.len();
        let agent = &self.agents[idx];
        agent.limiter.until_ready().await;
        &agent.value
    }
}
