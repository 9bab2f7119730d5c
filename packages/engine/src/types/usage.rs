//! Provider usage accounting.

use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// How a dispatched provider call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOutcome {
    Success,
    /// Provider answered 429
    RateLimited,
    Failed,
}

/// One dispatched call, as reported to the usage store.
#[derive(Debug, Clone, PartialEq)]
pub struct UsageEvent {
    pub provider: String,
    pub model: String,
    pub outcome: CallOutcome,
    pub latency: Option<Duration>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub at: DateTime<Utc>,
}

impl UsageEvent {
    pub fn new(provider: impl Into<String>, model: impl Into<String>, outcome: CallOutcome) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            outcome,
            latency: None,
            input_tokens: 0,
            output_tokens: 0,
            at: Utc::now(),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn with_tokens(mut self, input: u64, output: u64) -> Self {
        self.input_tokens = input;
        self.output_tokens = output;
        self
    }

    pub fn day(&self) -> NaiveDate {
        self.at.date_naive()
    }
}

/// Daily usage totals for one provider/model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderUsageRecord {
    pub provider: String,
    pub model: String,
    pub day: NaiveDate,

    /// `successful + failed + rate_limited`
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub rate_limited_calls: u64,

    pub input_tokens: u64,
    pub output_tokens: u64,

    pub total_latency_ms: f64,
    pub latency_samples: u64,
    pub min_latency_ms: Option<f64>,
    pub max_latency_ms: Option<f64>,
}

impl ProviderUsageRecord {
    pub fn new(provider: impl Into<String>, model: impl Into<String>, day: NaiveDate) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            day,
            total_calls: 0,
            successful_calls: 0,
            failed_calls: 0,
            rate_limited_calls: 0,
            input_tokens: 0,
            output_tokens: 0,
            total_latency_ms: 0.0,
            latency_samples: 0,
            min_latency_ms: None,
            max_latency_ms: None,
        }
    }

    pub fn apply(&mut self, event: &UsageEvent) {
        self.total_calls += 1;
        match event.outcome {
            CallOutcome::Success => self.successful_calls += 1,
            CallOutcome::RateLimited => self.rate_limited_calls += 1,
            CallOutcome::Failed => self.failed_calls += 1,
        }
        self.input_tokens += event.input_tokens;
        self.output_tokens += event.output_tokens;

        if let Some(latency) = event.latency {
            let ms = latency.as_secs_f64() * 1000.0;
            self.total_latency_ms += ms;
            self.latency_samples += 1;
            self.min_latency_ms = Some(self.min_latency_ms.map_or(ms, |m| m.min(ms)));
            self.max_latency_ms = Some(self.max_latency_ms.map_or(ms, |m| m.max(ms)));
        }
    }

    pub fn avg_latency_ms(&self) -> Option<f64> {
        (self.latency_samples > 0).then(|| self.total_latency_ms / self.latency_samples as f64)
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_calls == 0 {
            0.0
        } else {
            self.successful_calls as f64 / self.total_calls as f64
        }
    }
}
