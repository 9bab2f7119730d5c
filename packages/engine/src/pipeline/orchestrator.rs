//! Worker pool that drives companies through the four stages.
//!
//! ```text
//! run_pipeline
//!     │
//!     ├─► ping store (fatal on failure)
//!     ├─► load pending companies into a shared queue
//!     └─► N workers, each:
//!             ├─► pop company
//!             ├─► Resolve → Filings-Collect → Search-Extract → Merge
//!             │       (only stages the checkpoint still owes)
//!             └─► queue the company's commit, flush when the batch is full
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{OrchestratorConfig, PipelineConfig};
use crate::error::{PipelineError, Result};
use crate::merge::{CanonicalRounds, MergeEngine};
use crate::router::ProviderRouter;
use crate::stages::{FilingsStage, ResolveStage, SearchStage};
use crate::traits::{CompanyCommit, CompanyStore, FilingsClient, PipelineStore, Searcher, SourceMove};
use crate::types::{
    Company, CompanyFailure, CompanyId, FundingRound, ProcessingStatus, RoundCandidate, RoundId,
    RunSummary, Stage,
};

use super::batch::{CompanyOutcome, PendingCommit, WriteBatch};

type Queue = Mutex<VecDeque<(Company, ProcessingStatus)>>;

/// External collaborators the stages call.
#[derive(Clone)]
pub struct Collaborators {
    pub filings: Arc<dyn FilingsClient>,
    pub searcher: Arc<dyn Searcher>,
    pub router: Arc<ProviderRouter>,
}

/// Work accumulated for one company during a run.
struct CompanyWork {
    company: Company,
    status: ProcessingStatus,
    commit_rounds: Vec<RoundCandidate>,
    updated_rounds: Vec<FundingRound>,
    source_moves: Vec<SourceMove>,
    rounds_found: u64,
    duplicates_removed: u64,
}

impl CompanyWork {
    fn new(company: Company, status: ProcessingStatus) -> Self {
        Self {
            company,
            status,
            commit_rounds: Vec::new(),
            updated_rounds: Vec::new(),
            source_moves: Vec::new(),
            rounds_found: 0,
            duplicates_removed: 0,
        }
    }

    fn into_pending(self, outcome: CompanyOutcome) -> PendingCommit {
        let mut commit = CompanyCommit::new(self.company, self.status);
        commit.new_rounds = self.commit_rounds;
        commit.updated_rounds = self.updated_rounds;
        commit.source_moves = self.source_moves;
        PendingCommit { commit, outcome }
    }
}

pub(super) struct Orchestrator<S: PipelineStore + 'static> {
    pub(super) store: Arc<S>,
    resolve: ResolveStage,
    filings: FilingsStage,
    search: SearchStage,
    merge: MergeEngine,
    config: OrchestratorConfig,
}

impl<S: PipelineStore + 'static> Orchestrator<S> {
    pub(super) fn new(store: Arc<S>, collaborators: Collaborators, config: &PipelineConfig) -> Self {
        let companies: Arc<dyn CompanyStore> = store.clone();
        Self {
            store,
            resolve: ResolveStage::new(
                collaborators.filings.clone(),
                companies,
                config.filings.timeout(),
            ),
            filings: FilingsStage::new(collaborators.filings, config.filings.clone()),
            search: SearchStage::new(
                collaborators.searcher,
                collaborators.router,
                config.search.clone(),
                config.merge.clone(),
            ),
            merge: MergeEngine::new(config.merge.clone()),
            config: config.orchestrator.clone(),
        }
    }

    pub(super) async fn run(
        self: &Arc<Self>,
        limit: Option<usize>,
        workers: usize,
        cancel: CancellationToken,
    ) -> Result<RunSummary> {
        let started = Instant::now();

        // Backend unreachable at startup aborts before any worker starts
        self.store.ping().await?;

        let pending = self.store.pending_companies(limit).await?;
        let mut summary = RunSummary::default();
        if pending.is_empty() {
            info!("No pending companies");
            summary.elapsed = started.elapsed();
            return Ok(summary);
        }

        let workers = workers.max(1).min(pending.len());
        info!(companies = pending.len(), workers, "Starting pipeline run");

        let queue: Arc<Queue> = Arc::new(Mutex::new(pending.into_iter().collect()));
        let mut set = JoinSet::new();
        for worker_id in 0..workers {
            let this = Arc::clone(self);
            let queue = Arc::clone(&queue);
            let cancel = cancel.clone();
            set.spawn(async move { this.worker(worker_id, queue, cancel).await });
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(worker_summary) => summary.absorb(worker_summary),
                Err(e) => error!(error = %e, "Worker task aborted"),
            }
        }

        summary.cancelled = cancel.is_cancelled();
        summary.elapsed = started.elapsed();
        info!(
            processed = summary.companies_processed,
            failed = summary.companies_failed,
            interrupted = summary.companies_interrupted,
            rounds_found = summary.rounds_found,
            duplicates_removed = summary.duplicates_removed,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            cancelled = summary.cancelled,
            "Pipeline run finished"
        );
        Ok(summary)
    }

    async fn worker(&self, worker_id: usize, queue: Arc<Queue>, cancel: CancellationToken) -> RunSummary {
        let mut batch = WriteBatch::new(self.config.batch_size);
        let mut summary = RunSummary::default();

        loop {
            if cancel.is_cancelled() {
                debug!(worker_id, "Cancelled, worker stopping");
                break;
            }
            let next = queue.lock().unwrap_or_else(|e| e.into_inner()).pop_front();
            let Some((company, status)) = next else {
                break;
            };

            batch.push(self.process_company(company, status, &cancel).await);
            if batch.is_full() {
                self.flush(&mut batch, &mut summary).await;
            }
        }

        self.flush(&mut batch, &mut summary).await;
        summary
    }

    async fn flush(&self, batch: &mut WriteBatch, summary: &mut RunSummary) {
        let size = batch.len();
        match batch.flush(self.store.as_ref()).await {
            Ok(outcomes) => {
                if size > 0 {
                    debug!(companies = size, "Checkpoint batch committed");
                }
                for outcome in outcomes {
                    tally(summary, outcome);
                }
            }
            Err(failure) => {
                error!(
                    companies = failure.companies.len(),
                    error = %failure.error,
                    "Checkpoint batch failed, companies will resume next run"
                );
                let message = format!("checkpoint write failed: {}", failure.error);
                for (id, company) in failure.company_ids.into_iter().zip(failure.companies) {
                    let terminal = self.record_commit_failure(id, &company, &message).await;
                    summary.companies_failed += 1;
                    summary.errors.push(CompanyFailure {
                        company,
                        stage: None,
                        kind: failure.error.kind().to_string(),
                        message: failure.error.to_string(),
                        terminal,
                    });
                }
            }
        }
    }

    /// Count a failed batch write against the company's stored checkpoint,
    /// at the stage it still owes. Returns whether that made it terminal.
    async fn record_commit_failure(&self, id: CompanyId, company: &str, message: &str) -> bool {
        let mut status = match self.store.get_status(id).await {
            Ok(Some(status)) => status,
            Ok(None) => return false,
            Err(e) => {
                error!(company, error = %e, "Could not read checkpoint after failed batch");
                return false;
            }
        };
        let stage = status.next_stage().unwrap_or(Stage::Merge);
        let terminal = status.record_failure(
            stage,
            message.to_string(),
            self.config.max_retries,
            Utc::now(),
        );
        match self.store.save_status(&status).await {
            Ok(()) => {
                warn!(company, stage = %stage, retries = status.retry_count, terminal, "Recorded failed batch write");
                terminal
            }
            Err(e) => {
                error!(company, error = %e, "Could not record failed batch write");
                false
            }
        }
    }

    /// Run every stage the company still owes; stops at the first failure.
    async fn process_company(
        &self,
        company: Company,
        status: ProcessingStatus,
        cancel: &CancellationToken,
    ) -> PendingCommit {
        let mut work = CompanyWork::new(company, status);
        let mut ran_any = false;

        while let Some(stage) = work.status.next_stage() {
            // Cancellation lets the current stage finish, then stops here
            if ran_any && cancel.is_cancelled() {
                info!(company = %work.company.name, next_stage = %stage, "Interrupted between stages");
                let rounds_found = work.rounds_found;
                return work.into_pending(CompanyOutcome::Interrupted { rounds_found });
            }
            ran_any = true;

            if let Err(e) = self.run_stage(stage, &mut work).await {
                return self.fail(work, stage, e);
            }
        }

        let outcome = CompanyOutcome::Merged {
            rounds_found: work.rounds_found,
            duplicates_removed: work.duplicates_removed,
        };
        work.into_pending(outcome)
    }

    fn fail(&self, mut work: CompanyWork, stage: Stage, e: PipelineError) -> PendingCommit {
        let message = e.to_string();
        let max_retries = self.config.max_retries;
        let terminal = work
            .status
            .record_failure(stage, message.clone(), max_retries, Utc::now());

        if terminal {
            error!(
                company = %work.company.name,
                stage = %stage,
                kind = e.kind(),
                retries = work.status.retry_count,
                error = %e,
                "Company failed terminally"
            );
        } else {
            warn!(
                company = %work.company.name,
                stage = %stage,
                kind = e.kind(),
                retries = work.status.retry_count,
                error = %e,
                "Stage failed, will retry on a later run"
            );
        }

        let rounds_found = work.rounds_found;
        let failure = CompanyFailure {
            company: work.company.name.clone(),
            stage: Some(stage),
            kind: e.kind().to_string(),
            message,
            terminal,
        };
        work.into_pending(CompanyOutcome::Failed {
            rounds_found,
            failure,
        })
    }

    /// Execute one stage and advance the checkpoint. On error nothing in
    /// `work` has changed.
    async fn run_stage(&self, stage: Stage, work: &mut CompanyWork) -> Result<()> {
        match stage {
            Stage::Resolve => {
                let resolution = self.resolve.run(&work.company).await?;
                work.status.advance(stage, 0, Utc::now())?;
                debug!(
                    company = %work.company.name,
                    matched = resolution.matched,
                    "Resolve stage complete"
                );
                work.company = resolution.company;
            }
            Stage::FilingsCollect | Stage::SearchExtract => {
                let report = if stage == Stage::FilingsCollect {
                    self.filings.run(&work.company).await?
                } else {
                    self.search.run(&work.company).await?
                };
                let found = report.rounds_found();
                work.status.advance(stage, found, Utc::now())?;
                for note in &report.notes {
                    debug!(company = %work.company.name, stage = %stage, note = %note, "Stage note");
                }
                info!(company = %work.company.name, stage = %stage, rounds = found, "Stage complete");
                work.rounds_found += u64::from(found);
                work.commit_rounds.extend(report.candidates);
            }
            Stage::Merge => {
                let (persisted, earlier_dups) = self.stored_rounds(work.company.id).await?;
                let mut input = persisted.clone();
                input.extend(work.commit_rounds.iter().map(|c| c.round.clone()));
                let merged = self.merge.merge(&input);

                let unique = merged.unique_count() as u32;
                work.status.advance(stage, unique, Utc::now())?;

                work.updated_rounds = stored_changes(&persisted, &earlier_dups, &merged);
                let new = &merged.rounds[persisted.len()..];
                for (candidate, round) in work.commit_rounds.iter_mut().zip(new) {
                    candidate.round = round.clone();
                }
                work.duplicates_removed = merged.plan.duplicate_count() as u64;
                work.source_moves = merged.source_moves;

                info!(
                    company = %work.company.name,
                    unique_rounds = unique,
                    duplicates = work.duplicates_removed,
                    excluded = merged.plan.excluded.len(),
                    "Merged"
                );
            }
        }
        Ok(())
    }

    /// Stored rounds split into (canonical, already flagged duplicate).
    async fn stored_rounds(&self, id: CompanyId) -> Result<(Vec<FundingRound>, Vec<FundingRound>)> {
        let rounds = self.store.rounds_for_company(id, true).await?;
        Ok(rounds.into_iter().partition(|r| !r.is_duplicate))
    }

    /// Re-run the merge for one company outside a pipeline run.
    pub(super) async fn merge_company(&self, id: CompanyId) -> Result<CanonicalRounds> {
        let company = self
            .store
            .get_company(id)
            .await?
            .ok_or_else(|| PipelineError::DataQuality(format!("unknown company {}", id)))?;
        let mut status = self
            .store
            .get_status(id)
            .await?
            .unwrap_or_else(|| ProcessingStatus::new(id));

        let (persisted, earlier_dups) = self.stored_rounds(id).await?;
        let merged = self.merge.merge(&persisted);
        if status.merged {
            status.unique_rounds = merged.unique_count() as u32;
            status.updated_at = Utc::now();
        }

        let mut commit = CompanyCommit::new(company, status);
        commit.updated_rounds = stored_changes(&persisted, &earlier_dups, &merged);
        commit.source_moves = merged.source_moves.clone();
        self.store.commit(std::slice::from_ref(&commit)).await?;
        Ok(merged)
    }
}

/// Stored rounds the merge changed, plus earlier duplicates re-pointed when
/// the canonical they referenced became a duplicate itself.
fn stored_changes(
    persisted: &[FundingRound],
    earlier_dups: &[FundingRound],
    merged: &CanonicalRounds,
) -> Vec<FundingRound> {
    let mut changed: Vec<FundingRound> = merged
        .rounds
        .iter()
        .zip(persisted)
        .filter(|(after, before)| after != before)
        .map(|(after, _)| after.clone())
        .collect();

    let demoted: HashMap<RoundId, RoundId> = changed
        .iter()
        .filter_map(|r| r.duplicate_of.filter(|_| r.is_duplicate).map(|to| (r.id, to)))
        .collect();
    for dup in earlier_dups {
        if let Some(target) = dup.duplicate_of.and_then(|id| demoted.get(&id)) {
            let mut dup = dup.clone();
            dup.duplicate_of = Some(*target);
            changed.push(dup);
        }
    }
    changed
}

fn tally(summary: &mut RunSummary, outcome: CompanyOutcome) {
    match outcome {
        CompanyOutcome::Merged {
            rounds_found,
            duplicates_removed,
        } => {
            summary.companies_processed += 1;
            summary.rounds_found += rounds_found;
            summary.duplicates_removed += duplicates_removed;
        }
        CompanyOutcome::Failed {
            rounds_found,
            failure,
        } => {
            summary.companies_failed += 1;
            summary.rounds_found += rounds_found;
            summary.errors.push(failure);
        }
        CompanyOutcome::Interrupted { rounds_found } => {
            summary.companies_interrupted += 1;
            summary.rounds_found += rounds_found;
        }
    }
}
