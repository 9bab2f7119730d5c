//! Configuration types and loading.
//!
//! Tunables live in [`PipelineConfig`], read from an optional TOML file.
//! Secrets and deployment values come from the environment via
//! [`EnvConfig::from_env`].

use std::collections::HashSet;
use std::env;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::limiter::RetryPolicy;
use crate::credentials::SecretString;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub orchestrator: OrchestratorConfig,
    pub rate_limit: RateLimitConfig,
    pub retry: RetryPolicy,
    pub router: RouterConfig,
    pub search: SearchConfig,
    pub filings: FilingsConfig,
    pub merge: MergeConfig,
    pub database: DatabaseConfig,
    pub providers: Vec<ProviderConfig>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            orchestrator: OrchestratorConfig::default(),
            rate_limit: RateLimitConfig::default(),
            retry: RetryPolicy::default(),
            router: RouterConfig::default(),
            search: SearchConfig::default(),
            filings: FilingsConfig::default(),
            merge: MergeConfig::default(),
            database: DatabaseConfig::default(),
            providers: default_providers(),
        }
    }
}

impl PipelineConfig {
    /// Load from a TOML file, or defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|e| {
                    PipelineError::Config(format!("cannot read {}: {}", path.display(), e))
                })?;
                Self::from_toml(&text)?
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| PipelineError::Config(format!("invalid config: {}", e)))
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(PipelineError::Config(msg));

        if self.orchestrator.workers == 0 {
            return fail("orchestrator.workers must be > 0".into());
        }
        if self.orchestrator.batch_size == 0 {
            return fail("orchestrator.batch_size must be > 0".into());
        }
        if self.orchestrator.max_retries == 0 {
            return fail("orchestrator.max_retries must be > 0".into());
        }
        if self.rate_limit.window_secs == 0 {
            return fail("rate_limit.window_secs must be > 0".into());
        }
        self.merge.validate()?;

        let mut seen = HashSet::new();
        for provider in &self.providers {
            if provider.rpm == 0 {
                return fail(format!("provider {} has rpm = 0", provider.id));
            }
            if !seen.insert(provider.id.as_str()) {
                return fail(format!("duplicate provider id {}", provider.id));
            }
        }
        Ok(())
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.orchestrator.workers = workers;
        self
    }

    pub fn with_providers(mut self, providers: Vec<ProviderConfig>) -> Self {
        self.providers = providers;
        self
    }
}

/// Worker pool and checkpoint batching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub workers: usize,

    /// Company commits per write transaction
    pub batch_size: usize,

    /// Failures before a company is terminal
    pub max_retries: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            batch_size: 10,
            max_retries: 3,
        }
    }
}

impl OrchestratorConfig {
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }
}

/// Provider request windows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Rolling window length; RPM budgets apply per window
    pub window_secs: u64,

    /// Longest a request waits for any provider before `CapacityExhausted`
    pub max_wait_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_secs: 60,
            max_wait_secs: 30,
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_secs)
    }

    pub fn with_max_wait(mut self, wait: Duration) -> Self {
        self.max_wait_secs = wait.as_secs();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub call_timeout_secs: u64,

    /// How long a provider sits out after a transport or server error
    pub degraded_cooldown_secs: u64,

    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            call_timeout_secs: 30,
            degraded_cooldown_secs: 60,
            temperature: 0.1,
            max_tokens: 2_000,
        }
    }
}

impl RouterConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn degraded_cooldown(&self) -> Duration {
        Duration::from_secs(self.degraded_cooldown_secs)
    }
}

/// Search-Extract stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Templates with a `{company}` placeholder
    pub query_templates: Vec<String>,
    pub queries_per_company: usize,
    pub max_results_per_query: usize,

    /// Pause before each search call
    pub query_delay_ms: u64,

    /// Pause after a company's searches
    pub company_delay_ms: u64,

    pub timeout_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            query_templates: crate::stages::prompts::DEFAULT_QUERY_TEMPLATES
                .iter()
                .map(|t| t.to_string())
                .collect(),
            queries_per_company: 8,
            max_results_per_query: 4,
            query_delay_ms: 1_000,
            company_delay_ms: 2_000,
            timeout_secs: 20,
        }
    }
}

impl SearchConfig {
    pub fn query_delay(&self) -> Duration {
        Duration::from_millis(self.query_delay_ms)
    }

    pub fn company_delay(&self) -> Duration {
        Duration::from_millis(self.company_delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn with_queries_per_company(mut self, n: usize) -> Self {
        self.queries_per_company = n;
        self
    }

    /// Disable both politeness delays.
    pub fn without_delays(mut self) -> Self {
        self.query_delay_ms = 0;
        self.company_delay_ms = 0;
        self
    }
}

/// Filings-Collect stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilingsConfig {
    pub timeout_secs: u64,
    pub max_filings: usize,
    pub form_types: Vec<String>,
}

impl Default for FilingsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_filings: 20,
            form_types: vec!["D".to_string(), "D/A".to_string()],
        }
    }
}

impl FilingsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Dedup matching parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Dates further apart than this never match
    pub date_tolerance_days: i64,

    /// Relative difference `|a - b| / max(a, b)` beyond which amounts never match
    pub amount_tolerance: f64,

    /// Composite score needed to call two candidates the same event
    pub match_threshold: f64,

    pub date_weight: f64,
    pub amount_weight: f64,
    pub investor_weight: f64,

    /// Comparable components needed before a score counts
    pub min_components: usize,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            date_tolerance_days: 90,
            amount_tolerance: 0.10,
            match_threshold: 0.75,
            date_weight: 0.35,
            amount_weight: 0.40,
            investor_weight: 0.25,
            min_components: 2,
        }
    }
}

impl MergeConfig {
    pub fn with_date_tolerance_days(mut self, days: i64) -> Self {
        self.date_tolerance_days = days;
        self
    }

    pub fn with_amount_tolerance(mut self, tolerance: f64) -> Self {
        self.amount_tolerance = tolerance;
        self
    }

    pub fn with_match_threshold(mut self, threshold: f64) -> Self {
        self.match_threshold = threshold;
        self
    }

    pub fn validate(&self) -> Result<()> {
        let finite_non_negative = |v: f64| v.is_finite() && v >= 0.0;
        if self.date_tolerance_days < 0 {
            return Err(PipelineError::Config(
                "merge.date_tolerance_days must be >= 0".into(),
            ));
        }
        if !finite_non_negative(self.amount_tolerance) {
            return Err(PipelineError::Config(
                "merge.amount_tolerance must be a non-negative number".into(),
            ));
        }
        if !(self.match_threshold > 0.0 && self.match_threshold <= 1.0) {
            return Err(PipelineError::Config(
                "merge.match_threshold must be in (0, 1]".into(),
            ));
        }
        let weights = [self.date_weight, self.amount_weight, self.investor_weight];
        if !weights.iter().all(|w| finite_non_negative(*w)) || weights.iter().sum::<f64>() <= 0.0 {
            return Err(PipelineError::Config(
                "merge weights must be non-negative with a positive sum".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Overrides `DATABASE_URL`
    pub url: Option<String>,

    /// Defaults to the worker count plus one
    pub max_connections: Option<u32>,
}

/// API dialect spoken by a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    OpenaiCompatible,
    Gemini,
}

/// One text-generation backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    pub kind: ProviderKind,

    /// Base URL; unused for Gemini
    #[serde(default)]
    pub endpoint: String,

    pub model: String,

    /// Requests per window
    pub rpm: u32,

    /// Environment variable holding the API key
    pub api_key_env: String,

    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

impl ProviderConfig {
    pub fn openai_compatible(
        id: impl Into<String>,
        endpoint: impl Into<String>,
        model: impl Into<String>,
        rpm: u32,
        api_key_env: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind: ProviderKind::OpenaiCompatible,
            endpoint: endpoint.into(),
            model: model.into(),
            rpm,
            api_key_env: api_key_env.into(),
            enabled: true,
        }
    }

    pub fn gemini(model: impl Into<String>, rpm: u32, api_key_env: impl Into<String>) -> Self {
        Self {
            id: "gemini".to_string(),
            kind: ProviderKind::Gemini,
            endpoint: String::new(),
            model: model.into(),
            rpm,
            api_key_env: api_key_env.into(),
            enabled: true,
        }
    }

    /// API key from the environment, if set and non-empty.
    pub fn api_key(&self) -> Option<SecretString> {
        SecretString::from_env(&self.api_key_env)
    }
}

/// Built-in free-tier provider catalogue.
pub fn default_providers() -> Vec<ProviderConfig> {
    vec![
        ProviderConfig::gemini("gemini-2.0-flash", 15, "GEMINI_API_KEY"),
        ProviderConfig::openai_compatible(
            "groq",
            "https://api.groq.com/openai/v1",
            "llama-3.3-70b-versatile",
            30,
            "GROQ_API_KEY",
        ),
        ProviderConfig::openai_compatible(
            "mistral",
            "https://api.mistral.ai/v1",
            "mistral-small-latest",
            60,
            "MISTRAL_API_KEY",
        ),
        ProviderConfig::openai_compatible(
            "openrouter",
            "https://openrouter.ai/api/v1",
            "meta-llama/llama-3.3-70b-instruct:free",
            20,
            "OPENROUTER_API_KEY",
        ),
        ProviderConfig::openai_compatible(
            "cerebras",
            "https://api.cerebras.ai/v1",
            "llama3.1-8b",
            30,
            "CEREBRAS_API_KEY",
        ),
        ProviderConfig::openai_compatible(
            "together",
            "https://api.together.xyz/v1",
            "meta-llama/Llama-3.3-70B-Instruct-Turbo-Free",
            60,
            "TOGETHER_API_KEY",
        ),
        ProviderConfig::openai_compatible(
            "fireworks",
            "https://api.fireworks.ai/inference/v1",
            "accounts/fireworks/models/llama-v3p1-8b-instruct",
            10,
            "FIREWORKS_API_KEY",
        ),
        ProviderConfig::openai_compatible(
            "deepseek",
            "https://api.deepseek.com/v1",
            "deepseek-chat",
            60,
            "DEEPSEEK_API_KEY",
        ),
        ProviderConfig::openai_compatible(
            "sambanova",
            "https://api.sambanova.ai/v1",
            "Meta-Llama-3.1-8B-Instruct",
            10,
            "SAMBANOVA_API_KEY",
        ),
    ]
}

/// Number of `SEC_USER_AGENT_n` slots read from the environment.
pub const MAX_SEC_USER_AGENTS: usize = 10;

/// Values that come from the environment (`.env` supported).
#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub database_url: String,
    pub tavily_api_key: Option<SecretString>,
    pub sec_user_agents: Vec<String>,
}

impl EnvConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        // Load .env file if present (development)
        let _ = dotenvy::dotenv();

        let mut sec_user_agents: Vec<String> = (1..=MAX_SEC_USER_AGENTS)
            .filter_map(|i| env::var(format!("SEC_USER_AGENT_{}", i)).ok())
            .filter(|ua| !ua.trim().is_empty())
            .collect();
        if sec_user_agents.is_empty() {
            if let Ok(ua) = env::var("SEC_USER_AGENT") {
                if !ua.trim().is_empty() {
                    sec_user_agents.push(ua);
                }
            }
        }

        Self {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://funding_rounds.db".to_string()),
            tavily_api_key: SecretString::from_env("TAVILY_API_KEY"),
            sec_user_agents,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = PipelineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.providers.len(), 9);
        assert_eq!(config.search.query_templates.len(), 8);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = PipelineConfig::from_toml(
            r#"
            [orchestrator]
            workers = 8

            [merge]
            amount_tolerance = 0.05
            "#,
        )
        .unwrap();
        assert_eq!(config.orchestrator.workers, 8);
        assert_eq!(config.orchestrator.batch_size, 10);
        assert_eq!(config.merge.amount_tolerance, 0.05);
        assert_eq!(config.merge.date_tolerance_days, 90);
        assert_eq!(config.providers.len(), 9);
    }

    #[test]
    fn providers_section_replaces_catalogue() {
        let config = PipelineConfig::from_toml(
            r#"
            [[providers]]
            id = "local"
            kind = "openai_compatible"
            endpoint = "http://localhost:8000/v1"
            model = "qwen"
            rpm = 100
            api_key_env = "LOCAL_KEY"
            "#,
        )
        .unwrap();
        assert_eq!(config.providers.len(), 1);
        assert!(config.providers[0].enabled);
    }

    #[test]
    fn rejects_duplicate_provider_ids_and_zero_rpm() {
        let dup = PipelineConfig::default().with_providers(vec![
            ProviderConfig::gemini("a", 10, "K"),
            ProviderConfig::gemini("b", 10, "K"),
        ]);
        assert!(dup.validate().is_err());

        let zero = PipelineConfig::default().with_providers(vec![ProviderConfig::gemini("a", 0, "K")]);
        assert!(zero.validate().is_err());
    }

    #[test]
    fn rejects_bad_merge_parameters() {
        assert!(MergeConfig::default().with_amount_tolerance(-0.1).validate().is_err());
        assert!(MergeConfig::default().with_match_threshold(0.0).validate().is_err());
        assert!(MergeConfig::default().with_date_tolerance_days(-1).validate().is_err());
    }
}
