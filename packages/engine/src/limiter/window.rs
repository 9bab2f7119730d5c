//! Sliding-window request log.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

/// Timestamps of granted calls within the last `window`.
///
/// A call granted at `t` occupies a slot over `[t, t + window)`, so no
/// half-open window of that length ever holds more than `capacity` grants.
#[derive(Debug)]
pub struct SlidingWindow {
    capacity: usize,
    window: Duration,
    grants: VecDeque<Instant>,
    blocked_until: Option<Instant>,
}

impl SlidingWindow {
    pub fn new(capacity: u32, window: Duration) -> Self {
        Self {
            capacity: capacity as usize,
            window,
            grants: VecDeque::with_capacity(capacity as usize),
            blocked_until: None,
        }
    }

    fn evict(&mut self, now: Instant) {
        while let Some(front) = self.grants.front() {
            if *front + self.window <= now {
                self.grants.pop_front();
            } else {
                break;
            }
        }
    }

    /// Take a slot, or return how long until one frees up.
    pub fn try_reserve(&mut self, now: Instant) -> Result<(), Duration> {
        let wait = self.wait_time(now);
        if !wait.is_zero() {
            return Err(wait);
        }
        self.grants.push_back(now);
        Ok(())
    }

    /// Zero when a slot is free right now.
    pub fn wait_time(&mut self, now: Instant) -> Duration {
        self.evict(now);

        if let Some(until) = self.blocked_until {
            if until > now {
                return until - now;
            }
            self.blocked_until = None;
        }

        if self.capacity == 0 {
            return self.window;
        }
        if self.grants.len() < self.capacity {
            return Duration::ZERO;
        }
        match self.grants.front() {
            Some(oldest) => (*oldest + self.window).saturating_duration_since(now),
            None => Duration::ZERO,
        }
    }

    /// Refuse all grants until `until` (provider asked us to back off).
    pub fn block_until(&mut self, until: Instant) {
        self.blocked_until = Some(self.blocked_until.map_or(until, |b| b.max(until)));
    }

    pub fn in_window(&mut self, now: Instant) -> usize {
        self.evict(now);
        self.grants.len()
    }

    pub fn blocked_for(&self, now: Instant) -> Option<Duration> {
        self.blocked_until
            .filter(|until| *until > now)
            .map(|until| until - now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grants_up_to_capacity_then_defers() {
        let start = Instant::now();
        let mut window = SlidingWindow::new(3, Duration::from_secs(60));
        for _ in 0..3 {
            window.try_reserve(start).unwrap();
        }
        let wait = window.try_reserve(start + Duration::from_secs(10)).unwrap_err();
        assert_eq!(wait, Duration::from_secs(50));
    }

    #[test]
    fn slots_free_as_the_window_slides() {
        let start = Instant::now();
        let mut window = SlidingWindow::new(2, Duration::from_secs(60));
        window.try_reserve(start).unwrap();
        window.try_reserve(start + Duration::from_secs(30)).unwrap();
        assert!(window.try_reserve(start + Duration::from_secs(59)).is_err());
        window.try_reserve(start + Duration::from_secs(60)).unwrap();
        assert_eq!(window.in_window(start + Duration::from_secs(60)), 2);
    }

    #[test]
    fn block_overrides_free_capacity() {
        let start = Instant::now();
        let mut window = SlidingWindow::new(10, Duration::from_secs(60));
        window.block_until(start + Duration::from_secs(5));
        assert_eq!(window.try_reserve(start), Err(Duration::from_secs(5)));
        window.try_reserve(start + Duration::from_secs(5)).unwrap();
        assert_eq!(window.blocked_for(start + Duration::from_secs(5)), None);
    }

    #[test]
    fn zero_capacity_never_grants() {
        let mut window = SlidingWindow::new(0, Duration::from_secs(60));
        assert!(window.try_reserve(Instant::now()).is_err());
    }
}
