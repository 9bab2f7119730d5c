//! SQLite storage.
//!
//! One file holds the whole dataset. Timestamps are stored as RFC 3339 text
//! and ids as hyphenated UUID text. Commits run in a single transaction.

use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::{FromRow, Sqlite, Transaction};
use tracing::debug;

use crate::error::{PipelineError, Result};
use crate::traits::{
    CheckpointStore, CommitStore, CompanyCommit, CompanyStore, RoundStore, StatsStore, UsageStore,
};
use crate::types::{
    name_key, CallOutcome, Company, CompanyId, CompanyInput, Confidence, FundingRound,
    ProcessingStatus, ProviderUsageRecord, RegistryId, RoundCandidate, RoundId, Source, SourceId,
    Stage, StageProgress, Statistics, UsageEvent,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS companies (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    name_key TEXT NOT NULL UNIQUE,
    registry_id TEXT UNIQUE,
    official_name TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS processing_status (
    company_id TEXT PRIMARY KEY REFERENCES companies(id) ON DELETE CASCADE,
    resolved INTEGER NOT NULL DEFAULT 0,
    resolved_at TEXT,
    filings_collected INTEGER NOT NULL DEFAULT 0,
    filings_collected_at TEXT,
    filings_rounds_found INTEGER NOT NULL DEFAULT 0,
    search_extracted INTEGER NOT NULL DEFAULT 0,
    search_extracted_at TEXT,
    search_rounds_found INTEGER NOT NULL DEFAULT 0,
    merged INTEGER NOT NULL DEFAULT 0,
    merged_at TEXT,
    unique_rounds INTEGER NOT NULL DEFAULT 0,
    has_error INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    error_stage TEXT,
    retry_count INTEGER NOT NULL DEFAULT 0,
    terminal_failure INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL,
    CHECK (filings_collected = 0 OR resolved = 1),
    CHECK (search_extracted = 0 OR filings_collected = 1),
    CHECK (merged = 0 OR search_extracted = 1)
);

CREATE TABLE IF NOT EXISTS funding_rounds (
    id TEXT PRIMARY KEY,
    company_id TEXT NOT NULL REFERENCES companies(id) ON DELETE CASCADE,
    round_label TEXT,
    announced_on TEXT,
    amount_raised REAL,
    pre_money_valuation REAL,
    post_money_valuation REAL,
    lead_investor TEXT,
    source_type TEXT NOT NULL,
    confidence TEXT NOT NULL,
    source_urls TEXT NOT NULL DEFAULT '[]',
    notes TEXT,
    raw_payload TEXT NOT NULL DEFAULT 'null',
    is_duplicate INTEGER NOT NULL DEFAULT 0,
    duplicate_of TEXT REFERENCES funding_rounds(id) ON DELETE CASCADE DEFERRABLE INITIALLY DEFERRED,
    created_at TEXT NOT NULL,
    CHECK (is_duplicate = 0 OR duplicate_of IS NOT NULL)
);

CREATE INDEX IF NOT EXISTS idx_rounds_company ON funding_rounds(company_id);

CREATE TABLE IF NOT EXISTS investors (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE COLLATE NOCASE
);

CREATE TABLE IF NOT EXISTS round_investors (
    round_id TEXT NOT NULL REFERENCES funding_rounds(id) ON DELETE CASCADE,
    investor_id INTEGER NOT NULL REFERENCES investors(id),
    is_lead INTEGER NOT NULL DEFAULT 0,
    position INTEGER NOT NULL,
    PRIMARY KEY (round_id, investor_id)
);

CREATE TABLE IF NOT EXISTS sources (
    id TEXT PRIMARY KEY,
    round_id TEXT NOT NULL REFERENCES funding_rounds(id) ON DELETE CASCADE,
    source_type TEXT NOT NULL,
    provider TEXT,
    model TEXT,
    url TEXT,
    title TEXT,
    snippet TEXT,
    extraction_confidence TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_sources_round ON sources(round_id);

CREATE TABLE IF NOT EXISTS provider_usage (
    provider TEXT NOT NULL,
    model TEXT NOT NULL,
    day TEXT NOT NULL,
    total_calls INTEGER NOT NULL DEFAULT 0,
    successful_calls INTEGER NOT NULL DEFAULT 0,
    failed_calls INTEGER NOT NULL DEFAULT 0,
    rate_limited_calls INTEGER NOT NULL DEFAULT 0,
    input_tokens INTEGER NOT NULL DEFAULT 0,
    output_tokens INTEGER NOT NULL DEFAULT 0,
    total_latency_ms REAL NOT NULL DEFAULT 0,
    latency_samples INTEGER NOT NULL DEFAULT 0,
    min_latency_ms REAL,
    max_latency_ms REAL,
    PRIMARY KEY (provider, model, day)
);
"#;

fn corrupt(what: impl std::fmt::Display) -> PipelineError {
    PipelineError::Persistence(format!("corrupt row: {}", what).into())
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| corrupt(format!("invalid timestamp {:?}: {}", raw, e)))
}

fn parse_opt_time(raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.as_deref().map(parse_time).transpose()
}

fn parse_id<T: FromStr>(raw: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.parse().map_err(|e| corrupt(format!("invalid id {:?}: {}", raw, e)))
}

fn parse_enum<T: FromStr<Err = String>>(raw: &str) -> Result<T> {
    raw.parse().map_err(corrupt)
}

fn ts(t: &DateTime<Utc>) -> String {
    t.to_rfc3339()
}

#[derive(Debug, FromRow)]
struct CompanyRow {
    id: String,
    name: String,
    registry_id: Option<String>,
    official_name: Option<String>,
    created_at: String,
    updated_at: String,
}

impl CompanyRow {
    fn into_company(self) -> Result<Company> {
        Ok(Company {
            id: parse_id(&self.id)?,
            name: self.name,
            registry_id: self.registry_id.as_deref().and_then(RegistryId::parse),
            official_name: self.official_name,
            created_at: parse_time(&self.created_at)?,
            updated_at: parse_time(&self.updated_at)?,
        })
    }
}

#[derive(Debug, FromRow)]
struct StatusRow {
    company_id: String,
    resolved: bool,
    resolved_at: Option<String>,
    filings_collected: bool,
    filings_collected_at: Option<String>,
    filings_rounds_found: i64,
    search_extracted: bool,
    search_extracted_at: Option<String>,
    search_rounds_found: i64,
    merged: bool,
    merged_at: Option<String>,
    unique_rounds: i64,
    has_error: bool,
    last_error: Option<String>,
    error_stage: Option<String>,
    retry_count: i64,
    terminal_failure: bool,
    updated_at: String,
}

impl StatusRow {
    fn into_status(self) -> Result<ProcessingStatus> {
        Ok(ProcessingStatus {
            company_id: parse_id(&self.company_id)?,
            resolved: self.resolved,
            resolved_at: parse_opt_time(self.resolved_at)?,
            filings_collected: self.filings_collected,
            filings_collected_at: parse_opt_time(self.filings_collected_at)?,
            filings_rounds_found: self.filings_rounds_found.max(0) as u32,
            search_extracted: self.search_extracted,
            search_extracted_at: parse_opt_time(self.search_extracted_at)?,
            search_rounds_found: self.search_rounds_found.max(0) as u32,
            merged: self.merged,
            merged_at: parse_opt_time(self.merged_at)?,
            unique_rounds: self.unique_rounds.max(0) as u32,
            has_error: self.has_error,
            last_error: self.last_error,
            error_stage: self.error_stage.as_deref().map(parse_enum::<Stage>).transpose()?,
            retry_count: self.retry_count.max(0) as u32,
            terminal_failure: self.terminal_failure,
            updated_at: parse_time(&self.updated_at)?,
        })
    }
}

#[derive(Debug, FromRow)]
struct RoundRow {
    id: String,
    company_id: String,
    round_label: Option<String>,
    announced_on: Option<String>,
    amount_raised: Option<f64>,
    pre_money_valuation: Option<f64>,
    post_money_valuation: Option<f64>,
    lead_investor: Option<String>,
    source_type: String,
    confidence: String,
    source_urls: String,
    notes: Option<String>,
    raw_payload: String,
    is_duplicate: bool,
    duplicate_of: Option<String>,
    created_at: String,
}

impl RoundRow {
    fn into_round(self, investors: Vec<String>) -> Result<FundingRound> {
        Ok(FundingRound {
            id: parse_id(&self.id)?,
            company_id: parse_id(&self.company_id)?,
            round_label: self.round_label,
            announced_on: self.announced_on,
            amount_raised: self.amount_raised,
            pre_money_valuation: self.pre_money_valuation,
            post_money_valuation: self.post_money_valuation,
            lead_investor: self.lead_investor,
            investors,
            source_type: parse_enum(&self.source_type)?,
            confidence: parse_enum(&self.confidence)?,
            source_urls: serde_json::from_str(&self.source_urls)?,
            notes: self.notes,
            raw_payload: serde_json::from_str(&self.raw_payload)?,
            is_duplicate: self.is_duplicate,
            duplicate_of: self.duplicate_of.as_deref().map(parse_id).transpose()?,
            created_at: parse_time(&self.created_at)?,
        })
    }
}

#[derive(Debug, FromRow)]
struct SourceRow {
    id: String,
    round_id: String,
    source_type: String,
    provider: Option<String>,
    model: Option<String>,
    url: Option<String>,
    title: Option<String>,
    snippet: Option<String>,
    extraction_confidence: Option<String>,
    created_at: String,
}

impl SourceRow {
    fn into_source(self) -> Result<Source> {
        Ok(Source {
            id: parse_id::<SourceId>(&self.id)?,
            round_id: parse_id(&self.round_id)?,
            source_type: parse_enum(&self.source_type)?,
            provider: self.provider,
            model: self.model,
            url: self.url,
            title: self.title,
            snippet: self.snippet,
            extraction_confidence: self
                .extraction_confidence
                .as_deref()
                .map(parse_enum::<Confidence>)
                .transpose()?,
            created_at: parse_time(&self.created_at)?,
        })
    }
}

#[derive(Debug, FromRow)]
struct UsageRow {
    provider: String,
    model: String,
    day: String,
    total_calls: i64,
    successful_calls: i64,
    failed_calls: i64,
    rate_limited_calls: i64,
    input_tokens: i64,
    output_tokens: i64,
    total_latency_ms: f64,
    latency_samples: i64,
    min_latency_ms: Option<f64>,
    max_latency_ms: Option<f64>,
}

impl UsageRow {
    fn into_record(self) -> Result<ProviderUsageRecord> {
        let day = NaiveDate::parse_from_str(&self.day, "%Y-%m-%d")
            .map_err(|e| corrupt(format!("invalid day {:?}: {}", self.day, e)))?;
        let count = |v: i64| v.max(0) as u64;
        Ok(ProviderUsageRecord {
            provider: self.provider,
            model: self.model,
            day,
            total_calls: count(self.total_calls),
            successful_calls: count(self.successful_calls),
            failed_calls: count(self.failed_calls),
            rate_limited_calls: count(self.rate_limited_calls),
            input_tokens: count(self.input_tokens),
            output_tokens: count(self.output_tokens),
            total_latency_ms: self.total_latency_ms,
            latency_samples: count(self.latency_samples),
            min_latency_ms: self.min_latency_ms,
            max_latency_ms: self.max_latency_ms,
        })
    }
}

/// Columns cleared per stage by `reset_stages`.
fn reset_columns(stage: Stage) -> &'static str {
    match stage {
        Stage::Resolve => "resolved = 0, resolved_at = NULL",
        Stage::FilingsCollect => {
            "filings_collected = 0, filings_collected_at = NULL, filings_rounds_found = 0"
        }
        Stage::SearchExtract => {
            "search_extracted = 0, search_extracted_at = NULL, search_rounds_found = 0"
        }
        Stage::Merge => "merged = 0, merged_at = NULL, unique_rounds = 0",
    }
}

fn completion_column(stage: Stage) -> &'static str {
    match stage {
        Stage::Resolve => "resolved",
        Stage::FilingsCollect => "filings_collected",
        Stage::SearchExtract => "search_extracted",
        Stage::Merge => "merged",
    }
}

/// SQLite-backed pipeline store.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `url` and apply the schema.
    ///
    /// Accepts `sqlite://path.db`, `sqlite:path.db` or `sqlite::memory:`.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(10));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.run_migrations().await?;
        debug!(url, max_connections, "Opened SQLite store");
        Ok(store)
    }

    /// Single-connection in-memory database.
    pub async fn in_memory() -> Result<Self> {
        Self::connect("sqlite::memory:", 1).await
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Investor names per round id, in stored order.
    async fn investors_for(&self, company_id: CompanyId) -> Result<HashMap<String, Vec<String>>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT ri.round_id, i.name
            FROM round_investors ri
            JOIN investors i ON i.id = ri.investor_id
            JOIN funding_rounds r ON r.id = ri.round_id
            WHERE r.company_id = ?
            ORDER BY ri.round_id, ri.position
            "#,
        )
        .bind(company_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut by_round: HashMap<String, Vec<String>> = HashMap::new();
        for (round_id, name) in rows {
            by_round.entry(round_id).or_default().push(name);
        }
        Ok(by_round)
    }

    async fn write_status(tx: &mut Transaction<'_, Sqlite>, status: &ProcessingStatus) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO processing_status (
                company_id, resolved, resolved_at, filings_collected, filings_collected_at,
                filings_rounds_found, search_extracted, search_extracted_at, search_rounds_found,
                merged, merged_at, unique_rounds, has_error, last_error, error_stage,
                retry_count, terminal_failure, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(company_id) DO UPDATE SET
                resolved = excluded.resolved,
                resolved_at = excluded.resolved_at,
                filings_collected = excluded.filings_collected,
                filings_collected_at = excluded.filings_collected_at,
                filings_rounds_found = excluded.filings_rounds_found,
                search_extracted = excluded.search_extracted,
                search_extracted_at = excluded.search_extracted_at,
                search_rounds_found = excluded.search_rounds_found,
                merged = excluded.merged,
                merged_at = excluded.merged_at,
                unique_rounds = excluded.unique_rounds,
                has_error = excluded.has_error,
                last_error = excluded.last_error,
                error_stage = excluded.error_stage,
                retry_count = excluded.retry_count,
                terminal_failure = excluded.terminal_failure,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(status.company_id.to_string())
        .bind(status.resolved)
        .bind(status.resolved_at.as_ref().map(ts))
        .bind(status.filings_collected)
        .bind(status.filings_collected_at.as_ref().map(ts))
        .bind(status.filings_rounds_found as i64)
        .bind(status.search_extracted)
        .bind(status.search_extracted_at.as_ref().map(ts))
        .bind(status.search_rounds_found as i64)
        .bind(status.merged)
        .bind(status.merged_at.as_ref().map(ts))
        .bind(status.unique_rounds as i64)
        .bind(status.has_error)
        .bind(&status.last_error)
        .bind(status.error_stage.map(|s| s.as_str()))
        .bind(status.retry_count as i64)
        .bind(status.terminal_failure)
        .bind(ts(&status.updated_at))
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn write_round(tx: &mut Transaction<'_, Sqlite>, round: &FundingRound) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO funding_rounds (
                id, company_id, round_label, announced_on, amount_raised, pre_money_valuation,
                post_money_valuation, lead_investor, source_type, confidence, source_urls, notes,
                raw_payload, is_duplicate, duplicate_of, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                round_label = excluded.round_label,
                announced_on = excluded.announced_on,
                amount_raised = excluded.amount_raised,
                pre_money_valuation = excluded.pre_money_valuation,
                post_money_valuation = excluded.post_money_valuation,
                lead_investor = excluded.lead_investor,
                confidence = excluded.confidence,
                source_urls = excluded.source_urls,
                notes = excluded.notes,
                is_duplicate = excluded.is_duplicate,
                duplicate_of = excluded.duplicate_of
            "#,
        )
        .bind(round.id.to_string())
        .bind(round.company_id.to_string())
        .bind(&round.round_label)
        .bind(&round.announced_on)
        .bind(round.amount_raised)
        .bind(round.pre_money_valuation)
        .bind(round.post_money_valuation)
        .bind(&round.lead_investor)
        .bind(round.source_type.as_str())
        .bind(round.confidence.as_str())
        .bind(serde_json::to_string(&round.source_urls)?)
        .bind(&round.notes)
        .bind(serde_json::to_string(&round.raw_payload)?)
        .bind(round.is_duplicate)
        .bind(round.duplicate_of.map(|id| id.to_string()))
        .bind(ts(&round.created_at))
        .execute(&mut **tx)
        .await?;

        sqlx::query("DELETE FROM round_investors WHERE round_id = ?")
            .bind(round.id.to_string())
            .execute(&mut **tx)
            .await?;

        for (position, name) in round.investors.iter().enumerate() {
            sqlx::query("INSERT INTO investors (name) VALUES (?) ON CONFLICT(name) DO NOTHING")
                .bind(name)
                .execute(&mut **tx)
                .await?;
            let is_lead = round
                .lead_investor
                .as_deref()
                .is_some_and(|lead| lead.eq_ignore_ascii_case(name));
            sqlx::query(
                r#"
                INSERT INTO round_investors (round_id, investor_id, is_lead, position)
                SELECT ?, id, ?, ? FROM investors WHERE name = ?
                ON CONFLICT(round_id, investor_id) DO NOTHING
                "#,
            )
            .bind(round.id.to_string())
            .bind(is_lead)
            .bind(position as i64)
            .bind(name)
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }

    async fn write_source(tx: &mut Transaction<'_, Sqlite>, source: &Source) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sources (
                id, round_id, source_type, provider, model, url, title, snippet,
                extraction_confidence, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(source.id.to_string())
        .bind(source.round_id.to_string())
        .bind(source.source_type.as_str())
        .bind(&source.provider)
        .bind(&source.model)
        .bind(&source.url)
        .bind(&source.title)
        .bind(&source.snippet)
        .bind(source.extraction_confidence.map(|c| c.as_str()))
        .bind(ts(&source.created_at))
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn write_candidate(tx: &mut Transaction<'_, Sqlite>, candidate: &RoundCandidate) -> Result<()> {
        Self::write_round(tx, &candidate.round).await?;
        for source in &candidate.sources {
            Self::write_source(tx, source).await?;
        }
        Ok(())
    }

    async fn write_commit(tx: &mut Transaction<'_, Sqlite>, commit: &CompanyCommit) -> Result<()> {
        commit.status.validate()?;
        let company = &commit.company;
        let updated = sqlx::query(
            "UPDATE companies SET registry_id = ?, official_name = ?, updated_at = ? WHERE id = ?",
        )
        .bind(company.registry_id.map(|id| id.padded()))
        .bind(&company.official_name)
        .bind(ts(&company.updated_at))
        .bind(company.id.to_string())
        .execute(&mut **tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(PipelineError::Persistence(
                format!("unknown company {}", company.id).into(),
            ));
        }

        Self::write_status(tx, &commit.status).await?;
        for candidate in &commit.new_rounds {
            Self::write_candidate(tx, candidate).await?;
        }
        for round in &commit.updated_rounds {
            Self::write_round(tx, round).await?;
        }
        for moved in &commit.source_moves {
            sqlx::query("UPDATE sources SET round_id = ? WHERE round_id = ?")
                .bind(moved.to.to_string())
                .bind(moved.from.to_string())
                .execute(&mut **tx)
                .await?;
        }

        let dangling: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM funding_rounds d
            LEFT JOIN funding_rounds c ON c.id = d.duplicate_of
            WHERE d.company_id = ? AND d.is_duplicate = 1
              AND (c.id IS NULL OR c.is_duplicate = 1 OR c.company_id != d.company_id)
            "#,
        )
        .bind(company.id.to_string())
        .fetch_one(&mut **tx)
        .await?;
        if dangling > 0 {
            return Err(PipelineError::DataQuality(format!(
                "{} duplicate round(s) of {} do not point at a canonical round",
                dangling, company.name
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl CompanyStore for SqliteStore {
    async fn upsert_company(&self, input: &CompanyInput) -> Result<(Company, bool)> {
        let key = name_key(&input.name);
        if key.is_empty() {
            return Err(PipelineError::DataQuality("company name is blank".to_string()));
        }
        let registry_id = input.registry_id.as_deref().and_then(RegistryId::parse);

        let mut tx = self.pool.begin().await?;
        let existing = sqlx::query_as::<_, CompanyRow>(
            r#"
            SELECT id, name, registry_id, official_name, created_at, updated_at
            FROM companies WHERE name_key = ? OR (? IS NOT NULL AND registry_id = ?)
            ORDER BY rowid LIMIT 1
            "#,
        )
        .bind(&key)
        .bind(registry_id.map(|id| id.padded()))
        .bind(registry_id.map(|id| id.padded()))
        .fetch_optional(&mut *tx)
        .await?;
        if let Some(row) = existing {
            tx.commit().await?;
            return Ok((row.into_company()?, false));
        }

        let mut company = Company::new(input.name.clone());
        if let Some(id) = registry_id {
            company = company.with_registry_id(id);
        }
        sqlx::query(
            r#"
            INSERT INTO companies (id, name, name_key, registry_id, official_name, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(company.id.to_string())
        .bind(&company.name)
        .bind(&key)
        .bind(company.registry_id.map(|id| id.padded()))
        .bind(&company.official_name)
        .bind(ts(&company.created_at))
        .bind(ts(&company.updated_at))
        .execute(&mut *tx)
        .await?;
        Self::write_status(&mut tx, &ProcessingStatus::new(company.id)).await?;
        tx.commit().await?;
        Ok((company, true))
    }

    async fn get_company(&self, id: CompanyId) -> Result<Option<Company>> {
        sqlx::query_as::<_, CompanyRow>(
            "SELECT id, name, registry_id, official_name, created_at, updated_at FROM companies WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .map(CompanyRow::into_company)
        .transpose()
    }

    async fn find_company(&self, name: &str) -> Result<Option<Company>> {
        sqlx::query_as::<_, CompanyRow>(
            "SELECT id, name, registry_id, official_name, created_at, updated_at FROM companies WHERE name_key = ?",
        )
        .bind(name_key(name))
        .fetch_optional(&self.pool)
        .await?
        .map(CompanyRow::into_company)
        .transpose()
    }

    async fn find_by_registry_id(&self, id: RegistryId) -> Result<Option<Company>> {
        sqlx::query_as::<_, CompanyRow>(
            "SELECT id, name, registry_id, official_name, created_at, updated_at FROM companies WHERE registry_id = ?",
        )
        .bind(id.padded())
        .fetch_optional(&self.pool)
        .await?
        .map(CompanyRow::into_company)
        .transpose()
    }

    async fn list_companies(&self) -> Result<Vec<Company>> {
        sqlx::query_as::<_, CompanyRow>(
            "SELECT id, name, registry_id, official_name, created_at, updated_at FROM companies ORDER BY rowid",
        )
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(CompanyRow::into_company)
        .collect()
    }

    async fn delete_company(&self, id: CompanyId) -> Result<()> {
        sqlx::query("DELETE FROM companies WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for SqliteStore {
    async fn get_status(&self, id: CompanyId) -> Result<Option<ProcessingStatus>> {
        sqlx::query_as::<_, StatusRow>("SELECT * FROM processing_status WHERE company_id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .map(StatusRow::into_status)
            .transpose()
    }

    async fn save_status(&self, status: &ProcessingStatus) -> Result<()> {
        status.validate()?;
        let mut tx = self.pool.begin().await?;
        Self::write_status(&mut tx, status).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn pending_companies(&self, limit: Option<usize>) -> Result<Vec<(Company, ProcessingStatus)>> {
        let companies = sqlx::query_as::<_, CompanyRow>(
            r#"
            SELECT c.id, c.name, c.registry_id, c.official_name, c.created_at, c.updated_at
            FROM companies c
            JOIN processing_status s ON s.company_id = c.id
            WHERE s.merged = 0 AND s.terminal_failure = 0
            ORDER BY CASE WHEN s.resolved = 1 OR s.retry_count > 0 THEN 0 ELSE 1 END, c.rowid
            LIMIT ?
            "#,
        )
        .bind(limit.map_or(-1, |l| l as i64))
        .fetch_all(&self.pool)
        .await?;

        let mut statuses: HashMap<String, StatusRow> = sqlx::query_as::<_, StatusRow>(
            "SELECT * FROM processing_status WHERE merged = 0 AND terminal_failure = 0",
        )
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|row| (row.company_id.clone(), row))
        .collect();

        let mut pending = Vec::with_capacity(companies.len());
        for row in companies {
            let Some(status) = statuses.remove(&row.id) else {
                continue;
            };
            pending.push((row.into_company()?, status.into_status()?));
        }
        Ok(pending)
    }

    async fn reset_stages(&self, stage: Stage) -> Result<u64> {
        let from = Stage::ALL.iter().position(|s| *s == stage).unwrap_or(0);
        let later = &Stage::ALL[from..];
        let set: Vec<&str> = later.iter().map(|s| reset_columns(*s)).collect();
        let any_done: Vec<String> = later
            .iter()
            .map(|s| format!("{} = 1", completion_column(*s)))
            .collect();
        let sql = format!(
            "UPDATE processing_status SET {}, updated_at = ? WHERE {}",
            set.join(", "),
            any_done.join(" OR ")
        );
        let result = sqlx::query(&sql)
            .bind(ts(&Utc::now()))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn clear_failures(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE processing_status
            SET has_error = 0, last_error = NULL, error_stage = NULL, retry_count = 0,
                terminal_failure = 0, updated_at = ?
            WHERE has_error = 1 OR retry_count > 0 OR terminal_failure = 1
            "#,
        )
        .bind(ts(&Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl RoundStore for SqliteStore {
    async fn rounds_for_company(&self, id: CompanyId, include_duplicates: bool) -> Result<Vec<FundingRound>> {
        let rows = sqlx::query_as::<_, RoundRow>(
            r#"
            SELECT id, company_id, round_label, announced_on, amount_raised, pre_money_valuation,
                   post_money_valuation, lead_investor, source_type, confidence, source_urls, notes,
                   raw_payload, is_duplicate, duplicate_of, created_at
            FROM funding_rounds
            WHERE company_id = ? AND (? OR is_duplicate = 0)
            ORDER BY rowid
            "#,
        )
        .bind(id.to_string())
        .bind(include_duplicates)
        .fetch_all(&self.pool)
        .await?;

        let mut investors = self.investors_for(id).await?;
        rows.into_iter()
            .map(|row| {
                let names = investors.remove(&row.id).unwrap_or_default();
                row.into_round(names)
            })
            .collect()
    }

    async fn sources_for_round(&self, id: RoundId) -> Result<Vec<Source>> {
        sqlx::query_as::<_, SourceRow>(
            r#"
            SELECT id, round_id, source_type, provider, model, url, title, snippet,
                   extraction_confidence, created_at
            FROM sources WHERE round_id = ? ORDER BY rowid
            "#,
        )
        .bind(id.to_string())
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(SourceRow::into_source)
        .collect()
    }
}

#[async_trait]
impl UsageStore for SqliteStore {
    /// Single upsert statement, so concurrent increments never race.
    async fn record_usage(&self, event: &UsageEvent) -> Result<()> {
        let flag = |o: CallOutcome| (event.outcome == o) as i64;
        let latency_ms = event.latency.map(|l| l.as_secs_f64() * 1000.0);
        sqlx::query(
            r#"
            INSERT INTO provider_usage (
                provider, model, day, total_calls, successful_calls, failed_calls,
                rate_limited_calls, input_tokens, output_tokens, total_latency_ms,
                latency_samples, min_latency_ms, max_latency_ms
            ) VALUES (?, ?, ?, 1, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(provider, model, day) DO UPDATE SET
                total_calls = total_calls + 1,
                successful_calls = successful_calls + excluded.successful_calls,
                failed_calls = failed_calls + excluded.failed_calls,
                rate_limited_calls = rate_limited_calls + excluded.rate_limited_calls,
                input_tokens = input_tokens + excluded.input_tokens,
                output_tokens = output_tokens + excluded.output_tokens,
                total_latency_ms = total_latency_ms + excluded.total_latency_ms,
                latency_samples = latency_samples + excluded.latency_samples,
                min_latency_ms = CASE
                    WHEN excluded.min_latency_ms IS NULL THEN min_latency_ms
                    WHEN min_latency_ms IS NULL THEN excluded.min_latency_ms
                    ELSE MIN(min_latency_ms, excluded.min_latency_ms) END,
                max_latency_ms = CASE
                    WHEN excluded.max_latency_ms IS NULL THEN max_latency_ms
                    WHEN max_latency_ms IS NULL THEN excluded.max_latency_ms
                    ELSE MAX(max_latency_ms, excluded.max_latency_ms) END
            "#,
        )
        .bind(&event.provider)
        .bind(&event.model)
        .bind(event.day().format("%Y-%m-%d").to_string())
        .bind(flag(CallOutcome::Success))
        .bind(flag(CallOutcome::Failed))
        .bind(flag(CallOutcome::RateLimited))
        .bind(event.input_tokens as i64)
        .bind(event.output_tokens as i64)
        .bind(latency_ms.unwrap_or(0.0))
        .bind(latency_ms.is_some() as i64)
        .bind(latency_ms)
        .bind(latency_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn usage_records(&self) -> Result<Vec<ProviderUsageRecord>> {
        sqlx::query_as::<_, UsageRow>("SELECT * FROM provider_usage ORDER BY provider, model, day")
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(UsageRow::into_record)
            .collect()
    }
}

#[async_trait]
impl StatsStore for SqliteStore {
    async fn statistics(&self) -> Result<Statistics> {
        let count = |sql: &'static str| {
            let pool = self.pool.clone();
            async move {
                let n: i64 = sqlx::query_scalar(sql).fetch_one(&pool).await?;
                Ok::<u64, PipelineError>(n.max(0) as u64)
            }
        };

        let total_amount_raised: Option<f64> = sqlx::query_scalar(
            "SELECT SUM(amount_raised) FROM funding_rounds WHERE is_duplicate = 0 AND amount_raised >= 0",
        )
        .fetch_one(&self.pool)
        .await?;

        let by_source: Vec<(String, i64)> = sqlx::query_as(
            "SELECT source_type, COUNT(*) FROM funding_rounds WHERE is_duplicate = 0 GROUP BY source_type",
        )
        .fetch_all(&self.pool)
        .await?;

        let progress: (i64, i64, i64, i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT COALESCE(SUM(resolved), 0), COALESCE(SUM(filings_collected), 0),
                   COALESCE(SUM(search_extracted), 0), COALESCE(SUM(merged), 0),
                   COALESCE(SUM(has_error), 0), COALESCE(SUM(terminal_failure), 0)
            FROM processing_status
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let n = |v: i64| v.max(0) as u64;
        Ok(Statistics {
            companies: count("SELECT COUNT(*) FROM companies").await?,
            funding_rounds: count("SELECT COUNT(*) FROM funding_rounds WHERE is_duplicate = 0").await?,
            total_rounds: count("SELECT COUNT(*) FROM funding_rounds").await?,
            investors: count("SELECT COUNT(*) FROM investors").await?,
            sources: count("SELECT COUNT(*) FROM sources").await?,
            duplicates_found: count("SELECT COUNT(*) FROM funding_rounds WHERE is_duplicate = 1").await?,
            total_amount_raised: total_amount_raised.unwrap_or(0.0),
            rounds_by_source: by_source
                .into_iter()
                .map(|(source, c)| (source, n(c)))
                .collect::<BTreeMap<_, _>>(),
            progress: StageProgress {
                resolved: n(progress.0),
                filings_collected: n(progress.1),
                search_extracted: n(progress.2),
                merged: n(progress.3),
                with_errors: n(progress.4),
                terminal_failures: n(progress.5),
            },
        })
    }
}

#[async_trait]
impl CommitStore for SqliteStore {
    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn commit(&self, batch: &[CompanyCommit]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for commit in batch {
            Self::write_commit(&mut tx, commit).await?;
        }
        tx.commit().await?;
        debug!(companies = batch.len(), "Committed batch");
        Ok(())
    }
}
