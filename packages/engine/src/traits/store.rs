//! Storage traits.
//!
//! The storage layer is split into focused traits:
//! - `CompanyStore`: company identity, create-if-absent
//! - `CheckpointStore`: per-company processing status
//! - `RoundStore`: funding rounds and their sources
//! - `UsageStore`: daily provider usage records
//! - `StatsStore`: dataset statistics
//! - `CommitStore`: transactional batch writes from the orchestrator
//! - `PipelineStore`: composite trait combining all of them

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{
    Company, CompanyId, CompanyInput, FundingRound, ProcessingStatus, ProviderUsageRecord,
    RegistryId, RoundCandidate, RoundId, Source, Stage, Statistics, UsageEvent,
};

#[async_trait]
pub trait CompanyStore: Send + Sync {
    /// Create the company and its status if absent.
    ///
    /// Matches an existing row by case-insensitive name, or by registry id
    /// when the input carries one. Returns the row and whether it was created.
    async fn upsert_company(&self, input: &CompanyInput) -> Result<(Company, bool)>;

    async fn get_company(&self, id: CompanyId) -> Result<Option<Company>>;

    /// Case-insensitive lookup by name.
    async fn find_company(&self, name: &str) -> Result<Option<Company>>;

    /// The company that owns `id`, if any.
    async fn find_by_registry_id(&self, id: RegistryId) -> Result<Option<Company>>;

    /// All companies in load order.
    async fn list_companies(&self) -> Result<Vec<Company>>;

    /// Remove a company with its status, rounds and sources.
    async fn delete_company(&self, id: CompanyId) -> Result<()>;
}

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn get_status(&self, id: CompanyId) -> Result<Option<ProcessingStatus>>;

    /// Write one status on its own, outside any batch.
    async fn save_status(&self, status: &ProcessingStatus) -> Result<()>;

    /// Companies not yet merged and not terminally failed.
    ///
    /// Companies with progress or recorded failures come first, then new
    /// ones; load order within each group.
    async fn pending_companies(&self, limit: Option<usize>)
        -> Result<Vec<(Company, ProcessingStatus)>>;

    /// Clear `stage` and every later stage for all companies. Returns rows changed.
    async fn reset_stages(&self, stage: Stage) -> Result<u64>;

    /// Clear retry counters and terminal failures. Returns rows changed.
    async fn clear_failures(&self) -> Result<u64>;
}

#[async_trait]
pub trait RoundStore: Send + Sync {
    async fn rounds_for_company(
        &self,
        id: CompanyId,
        include_duplicates: bool,
    ) -> Result<Vec<FundingRound>>;

    async fn sources_for_round(&self, id: RoundId) -> Result<Vec<Source>>;
}

#[async_trait]
pub trait UsageStore: Send + Sync {
    /// Fold one call into its provider/model/day record.
    ///
    /// Implementations serialize updates per key so concurrent workers never
    /// lose increments.
    async fn record_usage(&self, event: &UsageEvent) -> Result<()>;

    async fn usage_records(&self) -> Result<Vec<ProviderUsageRecord>>;
}

#[async_trait]
pub trait StatsStore: Send + Sync {
    async fn statistics(&self) -> Result<Statistics>;
}

/// Re-point every source of `from` at `to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceMove {
    pub from: RoundId,
    pub to: RoundId,
}

/// Everything one company's processing wants written.
#[derive(Debug, Clone)]
pub struct CompanyCommit {
    pub company: Company,
    pub status: ProcessingStatus,

    /// Candidates produced this run, inserted with their sources and investors
    pub new_rounds: Vec<RoundCandidate>,

    /// Previously stored rounds rewritten by merge
    pub updated_rounds: Vec<FundingRound>,

    /// Applied after inserts and updates
    pub source_moves: Vec<SourceMove>,
}

impl CompanyCommit {
    pub fn new(company: Company, status: ProcessingStatus) -> Self {
        Self {
            company,
            status,
            new_rounds: Vec::new(),
            updated_rounds: Vec::new(),
            source_moves: Vec::new(),
        }
    }
}

#[async_trait]
pub trait CommitStore: Send + Sync {
    /// Cheap connectivity check.
    async fn ping(&self) -> Result<()>;

    /// Write all commits in one transaction; nothing is written on error.
    async fn commit(&self, batch: &[CompanyCommit]) -> Result<()>;
}

/// Composite trait for a complete pipeline backend.
pub trait PipelineStore:
    CompanyStore + CheckpointStore + RoundStore + UsageStore + StatsStore + CommitStore
{
}

impl<T> PipelineStore for T where
    T: CompanyStore + CheckpointStore + RoundStore + UsageStore + StatsStore + CommitStore
{
}
