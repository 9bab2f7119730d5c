//! Pipeline entry points.
//!
//! [`Pipeline`] owns the store, the stage executors and the run-level
//! cancellation token. `run_pipeline` processes unfinished companies on a
//! worker pool; the other methods load input, inspect or rewind state.

pub mod batch;
mod orchestrator;

pub use batch::{BatchFailure, CompanyOutcome, PendingCommit, WriteBatch};
pub use orchestrator::Collaborators;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::limiter::RateLimiter;
use crate::merge::CanonicalRounds;
use crate::router::ProviderRouter;
use crate::traits::{CompanyStore, PipelineStore, Provider, UsageStore};
use crate::types::{CompanyId, CompanyInput, ProviderUsageRecord, RunSummary, Stage, Statistics};

use orchestrator::Orchestrator;

/// Result of `load_companies`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub created: u64,
    pub existing: u64,
    /// Blank names
    pub skipped: u64,
}

/// Create-if-absent for every input with a non-blank name.
pub async fn load_companies<C>(store: &C, inputs: &[CompanyInput]) -> Result<LoadSummary>
where
    C: CompanyStore + ?Sized,
{
    let mut summary = LoadSummary::default();
    for input in inputs {
        if input.name.trim().is_empty() {
            summary.skipped += 1;
            continue;
        }
        let (_, created) = store.upsert_company(input).await?;
        if created {
            summary.created += 1;
        } else {
            summary.existing += 1;
        }
    }
    info!(
        created = summary.created,
        existing = summary.existing,
        skipped = summary.skipped,
        "Companies loaded"
    );
    Ok(summary)
}

pub struct Pipeline<S: PipelineStore + 'static> {
    inner: Arc<Orchestrator<S>>,
    workers: usize,
    shutdown: CancellationToken,
}

impl<S: PipelineStore + 'static> Pipeline<S> {
    pub fn new(store: Arc<S>, collaborators: Collaborators, config: &PipelineConfig) -> Self {
        Self {
            inner: Arc::new(Orchestrator::new(store, collaborators, config)),
            workers: config.orchestrator.workers,
            shutdown: CancellationToken::new(),
        }
    }

    /// Router whose rate limiter records usage into `store`.
    pub fn router_for(
        store: Arc<S>,
        providers: Vec<Arc<dyn Provider>>,
        config: &PipelineConfig,
    ) -> Arc<ProviderRouter> {
        let usage: Arc<dyn UsageStore> = store;
        let limiter = RateLimiter::new(&config.rate_limit, config.retry.clone()).with_usage_store(usage);
        Arc::new(ProviderRouter::new(
            providers,
            Arc::new(limiter),
            config.router.clone(),
        ))
    }

    pub fn store(&self) -> &Arc<S> {
        &self.inner.store
    }

    /// Cancelling this token stops every run of this pipeline after the
    /// in-flight stages finish and their checkpoints are committed.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub async fn load_companies(&self, inputs: &[CompanyInput]) -> Result<LoadSummary> {
        load_companies(self.inner.store.as_ref(), inputs).await
    }

    /// Process up to `limit` unfinished companies with `workers` tasks
    /// (the configured count when `None`).
    ///
    /// Companies already merged or terminally failed are never touched, so
    /// re-invoking after an interruption picks up where the last run stopped.
    pub async fn run_pipeline(&self, limit: Option<usize>, workers: Option<usize>) -> Result<RunSummary> {
        let workers = workers.unwrap_or(self.workers);
        self.inner
            .run(limit, workers, self.shutdown.child_token())
            .await
    }

    /// Recompute one company's canonical rounds from what is stored.
    pub async fn merge_company(&self, id: CompanyId) -> Result<CanonicalRounds> {
        self.inner.merge_company(id).await
    }

    pub async fn get_statistics(&self) -> Result<Statistics> {
        self.inner.store.statistics().await
    }

    pub async fn usage(&self) -> Result<Vec<ProviderUsageRecord>> {
        self.inner.store.usage_records().await
    }

    /// Clear the earliest of `stages` and everything after it. Returns rows changed.
    pub async fn reset_stages(&self, stages: &[Stage]) -> Result<u64> {
        match stages.iter().min() {
            Some(stage) => {
                let changed = self.inner.store.reset_stages(*stage).await?;
                info!(stage = %stage, companies = changed, "Stages reset");
                Ok(changed)
            }
            None => Ok(0),
        }
    }

    pub async fn clear_failures(&self) -> Result<u64> {
        let changed = self.inner.store.clear_failures().await?;
        info!(companies = changed, "Failures cleared");
        Ok(changed)
    }
}
