//! Statistics and run summaries.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::status::Stage;

/// Counts per completed stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageProgress {
    pub resolved: u64,
    pub filings_collected: u64,
    pub search_extracted: u64,
    pub merged: u64,
    pub with_errors: u64,
    pub terminal_failures: u64,
}

/// Dataset-wide statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub companies: u64,

    /// Canonical (non-duplicate) rounds
    pub funding_rounds: u64,

    /// Including duplicates
    pub total_rounds: u64,

    pub investors: u64,
    pub sources: u64,
    pub duplicates_found: u64,

    /// Sum over canonical rounds, USD
    pub total_amount_raised: f64,

    /// Canonical rounds per source type
    pub rounds_by_source: BTreeMap<String, u64>,

    pub progress: StageProgress,
}

/// One company that did not finish in a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanyFailure {
    pub company: String,
    pub stage: Option<Stage>,
    pub kind: String,
    pub message: String,
    pub terminal: bool,
}

/// Outcome of `run_pipeline`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Companies that reached MERGED in this run
    pub companies_processed: u64,
    pub companies_failed: u64,

    /// Companies that stopped between stages because the run was cancelled
    pub companies_interrupted: u64,

    /// Candidates produced by filings and search stages
    pub rounds_found: u64,
    pub duplicates_removed: u64,

    pub errors: Vec<CompanyFailure>,
    pub cancelled: bool,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn absorb(&mut self, other: RunSummary) {
        self.companies_processed += other.companies_processed;
        self.companies_failed += other.companies_failed;
        self.companies_interrupted += other.companies_interrupted;
        self.rounds_found += other.rounds_found;
        self.duplicates_removed += other.duplicates_removed;
        self.errors.extend(other.errors);
        self.cancelled |= other.cancelled;
    }
}
