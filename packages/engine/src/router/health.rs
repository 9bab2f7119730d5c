//! Provider degradation tracking.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;
use tracing::warn;

/// Providers sitting out a cooldown after transport or server errors.
pub struct HealthBoard {
    cooldown: Duration,
    degraded_until: Mutex<HashMap<String, Instant>>,
}

impl HealthBoard {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            degraded_until: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Instant>> {
        self.degraded_until.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn mark_degraded(&self, provider: &str, reason: &str) {
        let until = Instant::now() + self.cooldown;
        self.lock().insert(provider.to_string(), until);
        warn!(
            provider,
            reason,
            cooldown_secs = self.cooldown.as_secs(),
            "Provider degraded"
        );
    }

    pub fn is_available(&self, provider: &str) -> bool {
        self.degraded_for(provider).is_none()
    }

    /// Remaining cooldown, if any. Expired entries are dropped.
    pub fn degraded_for(&self, provider: &str) -> Option<Duration> {
        let now = Instant::now();
        let mut map = self.lock();
        match map.get(provider) {
            Some(until) if *until > now => Some(*until - now),
            Some(_) => {
                map.remove(provider);
                None
            }
            None => None,
        }
    }

    /// Lift any cooldown, e.g. after the provider answered successfully.
    pub fn clear(&self, provider: &str) {
        self.lock().remove(provider);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn clearing_lifts_the_cooldown() {
        let board = HealthBoard::new(Duration::from_secs(60));
        board.mark_degraded("mistral", "connection reset");
        assert!(!board.is_available("mistral"));

        board.clear("mistral");
        assert!(board.is_available("mistral"));
        assert_eq!(board.degraded_for("mistral"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn cooldown_expires() {
        let board = HealthBoard::new(Duration::from_secs(60));
        board.mark_degraded("groq", "503");
        assert!(!board.is_available("groq"));
        assert!(board.is_available("mistral"));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(board.is_available("groq"));
    }
}
