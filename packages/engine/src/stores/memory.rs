//! In-memory storage for tests and development.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};

use crate::error::{PipelineError, Result};
use crate::traits::{
    CheckpointStore, CommitStore, CompanyCommit, CompanyStore, RoundStore, StatsStore, UsageStore,
};
use crate::types::{
    name_key, Company, CompanyId, CompanyInput, FundingRound, ProcessingStatus,
    ProviderUsageRecord, RegistryId, RoundId, Source, Stage, StageProgress, Statistics,
    UsageEvent,
};

#[derive(Debug, Clone, Default)]
struct State {
    /// Load order
    companies: Vec<Company>,
    statuses: HashMap<CompanyId, ProcessingStatus>,
    /// Insertion order
    rounds: Vec<FundingRound>,
    sources: Vec<Source>,
    usage: BTreeMap<(String, String, NaiveDate), ProviderUsageRecord>,
}

impl State {
    fn company_index(&self, input_key: &str, registry_id: Option<RegistryId>) -> Option<usize> {
        self.companies.iter().position(|c| {
            c.name_key() == input_key || (registry_id.is_some() && c.registry_id == registry_id)
        })
    }

    fn apply(&mut self, commit: &CompanyCommit) -> Result<()> {
        commit.status.validate()?;
        let company_id = commit.company.id;
        match self.companies.iter_mut().find(|c| c.id == company_id) {
            Some(existing) => *existing = commit.company.clone(),
            None => {
                return Err(PipelineError::persistence(std::io::Error::other(format!(
                    "unknown company {}",
                    company_id
                ))))
            }
        }
        self.statuses.insert(company_id, commit.status.clone());

        for candidate in &commit.new_rounds {
            self.upsert_round(candidate.round.clone());
            self.sources.extend(candidate.sources.iter().cloned());
        }
        for round in &commit.updated_rounds {
            self.upsert_round(round.clone());
        }
        for moved in &commit.source_moves {
            for source in self.sources.iter_mut().filter(|s| s.round_id == moved.from) {
                source.round_id = moved.to;
            }
        }
        self.check_duplicates(company_id)
    }

    fn upsert_round(&mut self, round: FundingRound) {
        match self.rounds.iter_mut().find(|r| r.id == round.id) {
            Some(existing) => *existing = round,
            None => self.rounds.push(round),
        }
    }

    /// Duplicates point at a canonical round of the same company.
    fn check_duplicates(&self, company_id: CompanyId) -> Result<()> {
        let canonical: HashMap<RoundId, &FundingRound> = self
            .rounds
            .iter()
            .filter(|r| r.company_id == company_id && !r.is_duplicate)
            .map(|r| (r.id, r))
            .collect();
        for round in self.rounds.iter().filter(|r| r.company_id == company_id && r.is_duplicate) {
            let target = round.duplicate_of.and_then(|id| canonical.get(&id));
            if target.is_none() {
                return Err(PipelineError::DataQuality(format!(
                    "duplicate round {} does not point at a canonical round",
                    round.id
                )));
            }
        }
        Ok(())
    }
}

/// In-memory pipeline store.
///
/// Commits apply to a copy of the state that replaces the original only when
/// every commit in the batch succeeded, so a failed batch leaves no trace.
pub struct MemoryStore {
    state: RwLock<State>,
    failing_commits: AtomicU32,
    unavailable: AtomicBool,
    commits: AtomicUsize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
            failing_commits: AtomicU32::new(0),
            unavailable: AtomicBool::new(false),
            commits: AtomicUsize::new(0),
        }
    }

    /// Make the next `n` commits fail with a persistence error.
    pub fn fail_next_commits(&self, n: u32) {
        self.failing_commits.store(n, Ordering::SeqCst);
    }

    /// Simulate an unreachable backend for `ping` and `commit`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Successful commits so far.
    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(PipelineError::persistence(std::io::Error::other(
                "memory store marked unavailable",
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl CompanyStore for MemoryStore {
    async fn upsert_company(&self, input: &CompanyInput) -> Result<(Company, bool)> {
        let key = name_key(&input.name);
        if key.is_empty() {
            return Err(PipelineError::DataQuality("company name is blank".to_string()));
        }
        let registry_id = input.registry_id.as_deref().and_then(RegistryId::parse);

        let mut state = self.write();
        if let Some(i) = state.company_index(&key, registry_id) {
            return Ok((state.companies[i].clone(), false));
        }

        let mut company = Company::new(input.name.clone());
        if let Some(id) = registry_id {
            company = company.with_registry_id(id);
        }
        state.statuses.insert(company.id, ProcessingStatus::new(company.id));
        state.companies.push(company.clone());
        Ok((company, true))
    }

    async fn get_company(&self, id: CompanyId) -> Result<Option<Company>> {
        Ok(self.read().companies.iter().find(|c| c.id == id).cloned())
    }

    async fn find_company(&self, name: &str) -> Result<Option<Company>> {
        let key = name_key(name);
        Ok(self.read().companies.iter().find(|c| c.name_key() == key).cloned())
    }

    async fn find_by_registry_id(&self, id: RegistryId) -> Result<Option<Company>> {
        Ok(self
            .read()
            .companies
            .iter()
            .find(|c| c.registry_id == Some(id))
            .cloned())
    }

    async fn list_companies(&self) -> Result<Vec<Company>> {
        Ok(self.read().companies.clone())
    }

    async fn delete_company(&self, id: CompanyId) -> Result<()> {
        let mut state = self.write();
        state.companies.retain(|c| c.id != id);
        state.statuses.remove(&id);
        let removed: BTreeSet<_> = state
            .rounds
            .iter()
            .filter(|r| r.company_id == id)
            .map(|r| r.id.0)
            .collect();
        state.rounds.retain(|r| r.company_id != id);
        state.sources.retain(|s| !removed.contains(&s.round_id.0));
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for MemoryStore {
    async fn get_status(&self, id: CompanyId) -> Result<Option<ProcessingStatus>> {
        Ok(self.read().statuses.get(&id).cloned())
    }

    async fn save_status(&self, status: &ProcessingStatus) -> Result<()> {
        self.check_available()?;
        status.validate()?;
        let mut state = self.write();
        match state.statuses.get_mut(&status.company_id) {
            Some(stored) => {
                *stored = status.clone();
                Ok(())
            }
            None => Err(PipelineError::DataQuality(format!(
                "unknown company {}",
                status.company_id
            ))),
        }
    }

    async fn pending_companies(&self, limit: Option<usize>) -> Result<Vec<(Company, ProcessingStatus)>> {
        let state = self.read();
        let eligible: Vec<(Company, ProcessingStatus)> = state
            .companies
            .iter()
            .filter_map(|c| {
                let status = state.statuses.get(&c.id)?;
                status.is_eligible().then(|| (c.clone(), status.clone()))
            })
            .collect();

        let (mut ordered, fresh): (Vec<_>, Vec<_>) =
            eligible.into_iter().partition(|(_, s)| s.is_in_progress());
        ordered.extend(fresh);
        if let Some(limit) = limit {
            ordered.truncate(limit);
        }
        Ok(ordered)
    }

    async fn reset_stages(&self, stage: Stage) -> Result<u64> {
        let mut state = self.write();
        let now = Utc::now();
        let mut changed = 0;
        for status in state.statuses.values_mut() {
            let before = status.state();
            if before.pending_stage().map_or(true, |pending| pending > stage) {
                status.reset_from(stage, now);
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn clear_failures(&self) -> Result<u64> {
        let mut state = self.write();
        let now = Utc::now();
        let mut changed = 0;
        for status in state.statuses.values_mut() {
            if status.has_error || status.retry_count > 0 || status.terminal_failure {
                status.clear_failures(now);
                changed += 1;
            }
        }
        Ok(changed)
    }
}

#[async_trait]
impl RoundStore for MemoryStore {
    async fn rounds_for_company(&self, id: CompanyId, include_duplicates: bool) -> Result<Vec<FundingRound>> {
        Ok(self
            .read()
            .rounds
            .iter()
            .filter(|r| r.company_id == id && (include_duplicates || !r.is_duplicate))
            .cloned()
            .collect())
    }

    async fn sources_for_round(&self, id: RoundId) -> Result<Vec<Source>> {
        Ok(self.read().sources.iter().filter(|s| s.round_id == id).cloned().collect())
    }
}

#[async_trait]
impl UsageStore for MemoryStore {
    async fn record_usage(&self, event: &UsageEvent) -> Result<()> {
        let key = (event.provider.clone(), event.model.clone(), event.day());
        self.write()
            .usage
            .entry(key)
            .or_insert_with(|| ProviderUsageRecord::new(&event.provider, &event.model, event.day()))
            .apply(event);
        Ok(())
    }

    async fn usage_records(&self) -> Result<Vec<ProviderUsageRecord>> {
        Ok(self.read().usage.values().cloned().collect())
    }
}

#[async_trait]
impl StatsStore for MemoryStore {
    async fn statistics(&self) -> Result<Statistics> {
        let state = self.read();
        let mut stats = Statistics {
            companies: state.companies.len() as u64,
            total_rounds: state.rounds.len() as u64,
            sources: state.sources.len() as u64,
            ..Default::default()
        };

        let mut investors = BTreeSet::new();
        for round in &state.rounds {
            investors.extend(round.investors.iter().map(|i| i.trim().to_lowercase()));
            if round.is_duplicate {
                stats.duplicates_found += 1;
                continue;
            }
            stats.funding_rounds += 1;
            stats.total_amount_raised += round.valid_amount().unwrap_or(0.0);
            *stats
                .rounds_by_source
                .entry(round.source_type.as_str().to_string())
                .or_default() += 1;
        }
        stats.investors = investors.len() as u64;

        let mut progress = StageProgress::default();
        for status in state.statuses.values() {
            progress.resolved += status.resolved as u64;
            progress.filings_collected += status.filings_collected as u64;
            progress.search_extracted += status.search_extracted as u64;
            progress.merged += status.merged as u64;
            progress.with_errors += status.has_error as u64;
            progress.terminal_failures += status.terminal_failure as u64;
        }
        stats.progress = progress;
        Ok(stats)
    }
}

#[async_trait]
impl CommitStore for MemoryStore {
    async fn ping(&self) -> Result<()> {
        self.check_available()
    }

    async fn commit(&self, batch: &[CompanyCommit]) -> Result<()> {
        self.check_available()?;
        let injected = self
            .failing_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if injected.is_ok() {
            return Err(PipelineError::persistence(std::io::Error::other(
                "injected commit failure",
            )));
        }

        let mut state = self.write();
        let mut next = state.clone();
        for commit in batch {
            next.apply(commit)?;
        }
        *state = next;
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
