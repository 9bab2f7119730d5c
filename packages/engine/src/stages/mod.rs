//! Stage executors.
//!
//! Each executor runs one stage for one company and returns what it found.
//! Executors never touch the checkpoint; the orchestrator advances state
//! after an executor returns `Ok`.

pub mod filings;
pub mod prompts;
pub mod resolve;
pub mod search;

pub use filings::{filing_candidate, FilingsStage};
pub use resolve::{Resolution, ResolveStage};
pub use search::SearchStage;

use crate::types::RoundCandidate;

/// Candidates produced by a collection stage.
#[derive(Debug, Clone, Default)]
pub struct StageReport {
    pub candidates: Vec<RoundCandidate>,

    /// Non-fatal problems worth surfacing in logs
    pub notes: Vec<String>,
}

impl StageReport {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn rounds_found(&self) -> u32 {
        self.candidates.len() as u32
    }
}
