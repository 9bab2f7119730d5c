//! Funding Round Collection Engine
//!
//! Collects funding rounds per company from two kinds of sources, regulatory
//! filings and LLM extraction over web search results, then reconciles them
//! into one canonical record per real-world financing.
//!
//! # Architecture
//!
//! ```text
//! Pipeline::run_pipeline
//!     │
//!     └─► worker pool (one company per worker at a time)
//!             ├─► Resolve          FilingsClient::lookup
//!             ├─► Filings-Collect  FilingsClient::fetch_filings
//!             ├─► Search-Extract   Searcher + ProviderRouter::extract
//!             │                        └─► RateLimiter (per-provider windows)
//!             └─► Merge            MergeEngine (fuzzy dedup, filing precedence)
//! ```
//!
//! Every stage completion is a checkpoint. Checkpoints and candidate rounds
//! are written in batches, so a restarted run only redoes unfinished work.
//!
//! # Usage
//!
//! ```rust,ignore
//! use funding_engine::{Collaborators, MemoryStore, Pipeline, PipelineConfig};
//! use funding_engine::testing::{MockFilingsClient, MockProvider, MockSearcher};
//!
//! let config = PipelineConfig::default();
//! let store = Arc::new(MemoryStore::new());
//! let providers: Vec<Arc<dyn Provider>> = vec![Arc::new(MockProvider::new("groq", 30))];
//! let router = Pipeline::router_for(store.clone(), providers, &config);
//!
//! let pipeline = Pipeline::new(store, Collaborators {
//!     filings: Arc::new(MockFilingsClient::new()),
//!     searcher: Arc::new(MockSearcher::new()),
//!     router,
//! }, &config);
//!
//! pipeline.load_companies(&[CompanyInput::new("Acme Inc")]).await?;
//! let summary = pipeline.run_pipeline(None, Some(4)).await?;
//! ```
//!
//! # Modules
//!
//! - [`types`] - Companies, rounds, sources, checkpoints, usage records
//! - [`traits`] - Consumed interfaces (Provider, FilingsClient, Searcher, stores)
//! - [`limiter`] - Per-provider rolling windows and the shared retry policy
//! - [`router`] - Multi-provider extraction with failover
//! - [`stages`] - Stage executors
//! - [`merge`] - Dedup and canonical round selection
//! - [`pipeline`] - Orchestrator and batched checkpoint writes
//! - [`stores`] - Memory and SQLite backends
//! - [`providers`], [`searchers`], [`filings_edgar`] - Production collaborators
//! - [`testing`] - Mock collaborators

pub mod config;
pub mod credentials;
pub mod error;
pub mod filings_edgar;
pub mod limiter;
pub mod merge;
pub mod pipeline;
pub mod providers;
pub mod router;
pub mod searchers;
pub mod stages;
pub mod stores;
pub mod testing;
pub mod traits;
pub mod types;

pub use config::{
    DatabaseConfig, EnvConfig, FilingsConfig, MergeConfig, OrchestratorConfig, PipelineConfig,
    ProviderConfig, ProviderKind, RateLimitConfig, RouterConfig, SearchConfig,
};
pub use credentials::SecretString;
pub use error::{FilingsError, PipelineError, ProviderError, Result, SearchError};
pub use filings_edgar::EdgarFilings;
pub use limiter::{LimiterSnapshot, RateLimiter, RetryPolicy};
pub use merge::{CanonicalRounds, MergeEngine, MergePlan};
pub use pipeline::{Collaborators, LoadSummary, Pipeline};
pub use providers::build_providers;
pub use router::{ProviderRouter, StructuredResult};
pub use searchers::{RateLimitedSearcher, TavilySearcher};
pub use stores::MemoryStore;
#[cfg(feature = "sqlite")]
pub use stores::SqliteStore;
pub use traits::{
    Completion, FilingDocument, FilingsClient, HealthState, PipelineStore, Provider,
    RegistryMatch, SearchResult, Searcher,
};
pub use types::{
    CheckpointState, Company, CompanyId, CompanyInput, Confidence, FundingRound,
    ProcessingStatus, ProviderUsageRecord, RoundCandidate, RunSummary, Source, SourceType, Stage,
    Statistics,
};
