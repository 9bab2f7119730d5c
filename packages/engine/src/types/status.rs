//! Per-company checkpoint state machine.
//!
//! The persisted form keeps one completion flag and timestamp per stage.
//! [`CheckpointState`] is derived from those flags and every change goes
//! through [`ProcessingStatus::advance`], which only permits moving to the
//! immediate successor state.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::company::CompanyId;
use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckpointState {
    New,
    Resolved,
    FilingsDone,
    SearchDone,
    Merged,
}

impl CheckpointState {
    pub const ALL: [CheckpointState; 5] = [
        CheckpointState::New,
        CheckpointState::Resolved,
        CheckpointState::FilingsDone,
        CheckpointState::SearchDone,
        CheckpointState::Merged,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CheckpointState::New => "NEW",
            CheckpointState::Resolved => "RESOLVED",
            CheckpointState::FilingsDone => "FILINGS_DONE",
            CheckpointState::SearchDone => "SEARCH_DONE",
            CheckpointState::Merged => "MERGED",
        }
    }

    /// The stage that moves a company out of this state.
    pub fn pending_stage(&self) -> Option<Stage> {
        match self {
            CheckpointState::New => Some(Stage::Resolve),
            CheckpointState::Resolved => Some(Stage::FilingsCollect),
            CheckpointState::FilingsDone => Some(Stage::SearchExtract),
            CheckpointState::SearchDone => Some(Stage::Merge),
            CheckpointState::Merged => None,
        }
    }

    /// Transition table: only the immediate successor is reachable.
    pub fn can_transition_to(&self, to: CheckpointState) -> bool {
        self.pending_stage().map(|s| s.completes()) == Some(to)
    }
}

impl fmt::Display for CheckpointState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The four fixed processing phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Resolve,
    FilingsCollect,
    SearchExtract,
    Merge,
}

impl Stage {
    pub const ALL: [Stage; 4] = [
        Stage::Resolve,
        Stage::FilingsCollect,
        Stage::SearchExtract,
        Stage::Merge,
    ];

    /// State a company must be in for this stage to run.
    pub fn requires(&self) -> CheckpointState {
        match self {
            Stage::Resolve => CheckpointState::New,
            Stage::FilingsCollect => CheckpointState::Resolved,
            Stage::SearchExtract => CheckpointState::FilingsDone,
            Stage::Merge => CheckpointState::SearchDone,
        }
    }

    /// State reached when this stage succeeds.
    pub fn completes(&self) -> CheckpointState {
        match self {
            Stage::Resolve => CheckpointState::Resolved,
            Stage::FilingsCollect => CheckpointState::FilingsDone,
            Stage::SearchExtract => CheckpointState::SearchDone,
            Stage::Merge => CheckpointState::Merged,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Resolve => "resolve",
            Stage::FilingsCollect => "filings",
            Stage::SearchExtract => "search",
            Stage::Merge => "merge",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "resolve" => Ok(Stage::Resolve),
            "filings" | "filings_collect" | "sec" => Ok(Stage::FilingsCollect),
            "search" | "search_extract" => Ok(Stage::SearchExtract),
            "merge" | "dedup" => Ok(Stage::Merge),
            other => Err(format!("unknown stage: {}", other)),
        }
    }
}

/// Persisted checkpoint for one company.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingStatus {
    pub company_id: CompanyId,

    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,

    pub filings_collected: bool,
    pub filings_collected_at: Option<DateTime<Utc>>,
    pub filings_rounds_found: u32,

    pub search_extracted: bool,
    pub search_extracted_at: Option<DateTime<Utc>>,
    pub search_rounds_found: u32,

    pub merged: bool,
    pub merged_at: Option<DateTime<Utc>>,
    pub unique_rounds: u32,

    pub has_error: bool,
    pub last_error: Option<String>,
    pub error_stage: Option<Stage>,
    pub retry_count: u32,

    /// Excluded from automatic retries
    pub terminal_failure: bool,

    pub updated_at: DateTime<Utc>,
}

impl ProcessingStatus {
    pub fn new(company_id: CompanyId) -> Self {
        Self {
            company_id,
            resolved: false,
            resolved_at: None,
            filings_collected: false,
            filings_collected_at: None,
            filings_rounds_found: 0,
            search_extracted: false,
            search_extracted_at: None,
            search_rounds_found: 0,
            merged: false,
            merged_at: None,
            unique_rounds: 0,
            has_error: false,
            last_error: None,
            error_stage: None,
            retry_count: 0,
            terminal_failure: false,
            updated_at: Utc::now(),
        }
    }

    fn flags(&self) -> [bool; 4] {
        [
            self.resolved,
            self.filings_collected,
            self.search_extracted,
            self.merged,
        ]
    }

    /// Highest state reached through an unbroken prefix of completed stages.
    pub fn state(&self) -> CheckpointState {
        let done = self.flags().iter().take_while(|f| **f).count();
        CheckpointState::ALL[done]
    }

    /// Rejects a later stage marked complete while an earlier one is not.
    pub fn validate(&self) -> Result<()> {
        let flags = self.flags();
        let done = flags.iter().take_while(|f| **f).count();
        if let Some(offset) = flags[done..].iter().position(|f| *f) {
            return Err(PipelineError::InvalidTransition {
                from: CheckpointState::ALL[done],
                to: CheckpointState::ALL[done + offset + 1],
            });
        }
        Ok(())
    }

    pub fn next_stage(&self) -> Option<Stage> {
        self.state().pending_stage()
    }

    pub fn is_merged(&self) -> bool {
        self.merged
    }

    /// Still owed work by automatic runs.
    pub fn is_eligible(&self) -> bool {
        !self.merged && !self.terminal_failure
    }

    /// Any stage done, or any failure recorded.
    pub fn is_in_progress(&self) -> bool {
        self.state() != CheckpointState::New || self.retry_count > 0
    }

    /// Mark `stage` complete with its result count.
    pub fn advance(&mut self, stage: Stage, rounds: u32, now: DateTime<Utc>) -> Result<()> {
        let from = self.state();
        let to = stage.completes();
        if from != stage.requires() || !from.can_transition_to(to) {
            return Err(PipelineError::InvalidTransition { from, to });
        }

        match stage {
            Stage::Resolve => {
                self.resolved = true;
                self.resolved_at = Some(now);
            }
            Stage::FilingsCollect => {
                self.filings_collected = true;
                self.filings_collected_at = Some(now);
                self.filings_rounds_found = rounds;
            }
            Stage::SearchExtract => {
                self.search_extracted = true;
                self.search_extracted_at = Some(now);
                self.search_rounds_found = rounds;
            }
            Stage::Merge => {
                self.merged = true;
                self.merged_at = Some(now);
                self.unique_rounds = rounds;
            }
        }

        if self.error_stage == Some(stage) {
            self.has_error = false;
            self.error_stage = None;
        }
        self.updated_at = now;
        Ok(())
    }

    /// Record a failed stage. Returns true once the company becomes terminal.
    pub fn record_failure(
        &mut self,
        stage: Stage,
        message: impl Into<String>,
        max_retries: u32,
        now: DateTime<Utc>,
    ) -> bool {
        self.has_error = true;
        self.last_error = Some(message.into());
        self.error_stage = Some(stage);
        self.retry_count = self.retry_count.saturating_add(1);
        if self.retry_count >= max_retries {
            self.terminal_failure = true;
        }
        self.updated_at = now;
        self.terminal_failure
    }

    /// Clear `stage` and every later stage.
    pub fn reset_from(&mut self, stage: Stage, now: DateTime<Utc>) {
        let from = Stage::ALL.iter().position(|s| *s == stage).unwrap_or(0);
        for s in &Stage::ALL[from..] {
            match s {
                Stage::Resolve => {
                    self.resolved = false;
                    self.resolved_at = None;
                }
                Stage::FilingsCollect => {
                    self.filings_collected = false;
                    self.filings_collected_at = None;
                    self.filings_rounds_found = 0;
                }
                Stage::SearchExtract => {
                    self.search_extracted = false;
                    self.search_extracted_at = None;
                    self.search_rounds_found = 0;
                }
                Stage::Merge => {
                    self.merged = false;
                    self.merged_at = None;
                    self.unique_rounds = 0;
                }
            }
        }
        self.updated_at = now;
    }

    /// Re-admit a terminally failed company.
    pub fn clear_failures(&mut self, now: DateTime<Utc>) {
        self.has_error = false;
        self.last_error = None;
        self.error_stage = None;
        self.retry_count = 0;
        self.terminal_failure = false;
        self.updated_at = now;
    }
}
