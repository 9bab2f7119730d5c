//! Per-worker write batching.
//!
//! A worker queues one [`CompanyCommit`] per company it touched and writes
//! them in a single transaction once the batch is full. A crash loses at
//! most the unflushed batch, and those companies simply resume from their
//! last committed checkpoint on the next run.

use crate::error::PipelineError;
use crate::traits::{CommitStore, CompanyCommit};
use crate::types::{CompanyFailure, CompanyId};

/// What happened to one company, counted only once its commit is durable.
#[derive(Debug, Clone, PartialEq)]
pub enum CompanyOutcome {
    Merged {
        rounds_found: u64,
        duplicates_removed: u64,
    },
    Failed {
        rounds_found: u64,
        failure: CompanyFailure,
    },
    /// Stopped between stages by cancellation
    Interrupted { rounds_found: u64 },
}

#[derive(Debug)]
pub struct PendingCommit {
    pub commit: CompanyCommit,
    pub outcome: CompanyOutcome,
}

/// The batch could not be written; nothing in it was persisted.
#[derive(Debug)]
pub struct BatchFailure {
    pub error: PipelineError,
    pub companies: Vec<String>,
    pub company_ids: Vec<CompanyId>,
}

#[derive(Debug)]
pub struct WriteBatch {
    capacity: usize,
    pending: Vec<PendingCommit>,
}

impl WriteBatch {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            pending: Vec::new(),
        }
    }

    pub fn push(&mut self, pending: PendingCommit) {
        self.pending.push(pending);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.pending.len() >= self.capacity
    }

    /// Write everything queued. The batch is empty afterwards either way.
    pub async fn flush<C>(&mut self, store: &C) -> Result<Vec<CompanyOutcome>, BatchFailure>
    where
        C: CommitStore + ?Sized,
    {
        if self.pending.is_empty() {
            return Ok(Vec::new());
        }
        let pending = std::mem::take(&mut self.pending);
        let commits: Vec<CompanyCommit> = pending.iter().map(|p| p.commit.clone()).collect();

        match store.commit(&commits).await {
            Ok(()) => Ok(pending.into_iter().map(|p| p.outcome).collect()),
            Err(error) => Err(BatchFailure {
                error,
                company_ids: pending.iter().map(|p| p.commit.company.id).collect(),
                companies: pending.into_iter().map(|p| p.commit.company.name).collect(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::MemoryStore;
    use crate::traits::{CompanyStore, RoundStore};
    use crate::types::{CompanyInput, Confidence, FundingRound, RoundCandidate, SourceType};

    async fn pending(store: &MemoryStore, name: &str) -> PendingCommit {
        let (company, _) = store.upsert_company(&CompanyInput::new(name)).await.unwrap();
        let status = crate::types::ProcessingStatus::new(company.id);
        let mut commit = CompanyCommit::new(company.clone(), status);
        commit.new_rounds.push(RoundCandidate::new(
            FundingRound::new(company.id, SourceType::Filing, Confidence::High).with_amount(2e6),
        ));
        PendingCommit {
            commit,
            outcome: CompanyOutcome::Interrupted { rounds_found: 1 },
        }
    }

    #[tokio::test]
    async fn fills_to_capacity() {
        let store = MemoryStore::new();
        let mut batch = WriteBatch::new(2);
        batch.push(pending(&store, "Acme").await);
        assert!(!batch.is_full());
        batch.push(pending(&store, "Globex").await);
        assert!(batch.is_full());

        let outcomes = batch.flush(&store).await.unwrap();
        assert_eq!(outcomes.len(), 2);
        assert!(batch.is_empty());
        assert_eq!(store.commit_count(), 1);
    }

    #[tokio::test]
    async fn failed_flush_names_the_companies_and_writes_nothing() {
        let store = MemoryStore::new();
        let mut batch = WriteBatch::new(10);
        let first = pending(&store, "Acme").await;
        let company_id = first.commit.company.id;
        batch.push(first);

        store.fail_next_commits(1);
        let failure = batch.flush(&store).await.unwrap_err();
        assert_eq!(failure.companies, vec!["Acme".to_string()]);
        assert_eq!(failure.company_ids, vec![company_id]);
        assert!(batch.is_empty());
        assert!(store.rounds_for_company(company_id, true).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_flush_skips_the_store() {
        let store = MemoryStore::new();
        let mut batch = WriteBatch::new(3);
        assert!(batch.flush(&store).await.unwrap().is_empty());
        assert_eq!(store.commit_count(), 0);
    }
}
