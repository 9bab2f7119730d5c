//! Interfaces the engine consumes.

pub mod filings;
pub mod provider;
pub mod searcher;
pub mod store;

pub use filings::{FilingDocument, FilingsClient, RegistryMatch};
pub use provider::{Completion, HealthState, Provider};
pub use searcher::{SearchResult, Searcher};
pub use store::{
    CheckpointStore, CommitStore, CompanyCommit, CompanyStore, PipelineStore, RoundStore,
    SourceMove, StatsStore, UsageStore,
};
