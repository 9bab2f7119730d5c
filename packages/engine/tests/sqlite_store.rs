#![cfg(feature = "sqlite")]
//! SQLite checkpoint store against a real database file.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tempfile::TempDir;

use funding_engine::traits::{
    CheckpointStore, CommitStore, CompanyCommit, CompanyStore, RoundStore, StatsStore, UsageStore,
};
use funding_engine::testing::{MockFilingsClient, MockProvider, MockSearcher};
use funding_engine::types::{CallOutcome, RegistryId, RoundId, UsageEvent};
use funding_engine::{
    Collaborators, Company, CompanyInput, Confidence, FilingDocument, FundingRound, Pipeline,
    PipelineConfig, PipelineError, ProcessingStatus, Provider, RoundCandidate, Source, SourceType,
    SqliteStore, Stage,
};

async fn open(dir: &TempDir) -> SqliteStore {
    let url = format!("sqlite://{}", dir.path().join("funding.db").display());
    SqliteStore::connect(&url, 4).await.unwrap()
}

async fn company(store: &SqliteStore, name: &str) -> (Company, ProcessingStatus) {
    let (company, _) = store.upsert_company(&CompanyInput::new(name)).await.unwrap();
    let status = store.get_status(company.id).await.unwrap().unwrap();
    (company, status)
}

fn through(mut status: ProcessingStatus, stages: &[Stage]) -> ProcessingStatus {
    for stage in stages {
        status.advance(*stage, 1, Utc::now()).unwrap();
    }
    status
}

fn filing_candidate(company: &Company, amount: f64) -> RoundCandidate {
    let round = FundingRound::new(company.id, SourceType::Filing, Confidence::High)
        .with_date("2024-03-01")
        .with_amount(amount)
        .with_investors(vec!["Accel".to_string(), "Index Ventures".to_string()])
        .with_lead_investor("Accel");
    RoundCandidate::new(round).with_source(
        Source::new(RoundId::new(), SourceType::Filing)
            .with_url("https://www.sec.gov/Archives/edgar/data/1/primary_doc.xml"),
    )
}

#[tokio::test]
async fn upsert_matches_names_case_insensitively() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir).await;

    let (first, created) = store.upsert_company(&CompanyInput::new("Acme Robotics")).await.unwrap();
    let (again, created_again) = store.upsert_company(&CompanyInput::new("  acme robotics ")).await.unwrap();
    assert!(created);
    assert!(!created_again);
    assert_eq!(first.id, again.id);
    assert_eq!(store.list_companies().await.unwrap().len(), 1);

    let status = store.get_status(first.id).await.unwrap().unwrap();
    assert_eq!(status.next_stage(), Some(Stage::Resolve));

    let blank = store.upsert_company(&CompanyInput::new("   ")).await;
    assert!(matches!(blank, Err(PipelineError::DataQuality(_))));
}

#[tokio::test]
async fn committed_rounds_come_back_with_investors_and_sources() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir).await;
    let (acme, status) = company(&store, "Acme").await;

    let candidate = filing_candidate(&acme, 5_000_000.0);
    let round_id = candidate.round.id;
    let mut commit = CompanyCommit::new(
        acme.clone(),
        through(status, &[Stage::Resolve, Stage::FilingsCollect]),
    );
    commit.new_rounds.push(candidate);
    store.commit(&[commit]).await.unwrap();

    let rounds = store.rounds_for_company(acme.id, false).await.unwrap();
    assert_eq!(rounds.len(), 1);
    assert_eq!(rounds[0].id, round_id);
    assert_eq!(rounds[0].amount_raised, Some(5_000_000.0));
    assert_eq!(rounds[0].investors, vec!["Accel".to_string(), "Index Ventures".to_string()]);

    let sources = store.sources_for_round(round_id).await.unwrap();
    assert_eq!(sources.len(), 1);
    assert_eq!(sources[0].round_id, round_id);

    let status = store.get_status(acme.id).await.unwrap().unwrap();
    assert_eq!(status.next_stage(), Some(Stage::SearchExtract));
}

#[tokio::test]
async fn failed_batch_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir).await;
    let (acme, status) = company(&store, "Acme").await;

    let mut good = CompanyCommit::new(acme.clone(), through(status, &[Stage::Resolve]));
    good.new_rounds.push(filing_candidate(&acme, 1_000_000.0));

    // Never loaded, so the store rejects it
    let stranger = Company::new("Stranger Inc");
    let bad = CompanyCommit::new(stranger.clone(), ProcessingStatus::new(stranger.id));

    assert!(store.commit(&[good, bad]).await.is_err());
    assert!(store.rounds_for_company(acme.id, true).await.unwrap().is_empty());
    let status = store.get_status(acme.id).await.unwrap().unwrap();
    assert_eq!(status.next_stage(), Some(Stage::Resolve));
}

#[tokio::test]
async fn duplicate_without_canonical_is_rejected() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir).await;
    let (acme, status) = company(&store, "Acme").await;

    let mut orphan = filing_candidate(&acme, 2_000_000.0);
    orphan.round.is_duplicate = true;
    orphan.round.duplicate_of = Some(RoundId::new());

    let mut commit = CompanyCommit::new(acme.clone(), through(status, &[Stage::Resolve]));
    commit.new_rounds.push(orphan);

    let err = store.commit(&[commit]).await.unwrap_err();
    assert!(matches!(err, PipelineError::DataQuality(_)), "{err:?}");
    assert!(store.rounds_for_company(acme.id, true).await.unwrap().is_empty());
}

#[tokio::test]
async fn checkpoints_survive_reopening() {
    let dir = TempDir::new().unwrap();
    let acme_id = {
        let store = open(&dir).await;
        let (acme, status) = company(&store, "Acme").await;
        let commit = CompanyCommit::new(acme.clone(), through(status, &[Stage::Resolve]));
        store.commit(&[commit]).await.unwrap();
        store.pool().close().await;
        acme.id
    };

    let store = open(&dir).await;
    let status = store.get_status(acme_id).await.unwrap().unwrap();
    assert!(status.resolved);
    assert_eq!(status.next_stage(), Some(Stage::FilingsCollect));
}

#[tokio::test]
async fn pending_puts_started_companies_first_and_resets_reopen_stages() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir).await;
    let (fresh, _) = company(&store, "Fresh").await;
    let (started, started_status) = company(&store, "Started").await;
    let (done, done_status) = company(&store, "Done").await;

    let all = [Stage::Resolve, Stage::FilingsCollect, Stage::SearchExtract, Stage::Merge];
    store
        .commit(&[
            CompanyCommit::new(started.clone(), through(started_status, &[Stage::Resolve])),
            CompanyCommit::new(done.clone(), through(done_status, &all)),
        ])
        .await
        .unwrap();

    let pending: Vec<_> = store
        .pending_companies(None)
        .await
        .unwrap()
        .into_iter()
        .map(|(c, _)| c.id)
        .collect();
    assert_eq!(pending, vec![started.id, fresh.id]);
    assert_eq!(store.pending_companies(Some(1)).await.unwrap().len(), 1);

    // Search and merge reopen for the merged company only
    assert_eq!(store.reset_stages(Stage::SearchExtract).await.unwrap(), 1);
    let reopened = store.get_status(done.id).await.unwrap().unwrap();
    assert_eq!(reopened.next_stage(), Some(Stage::SearchExtract));
    assert!(reopened.filings_collected);
    assert_eq!(reopened.unique_rounds, 0);
}

#[tokio::test]
async fn clearing_failures_readmits_terminal_companies() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir).await;
    let (acme, mut status) = company(&store, "Acme").await;

    for _ in 0..3 {
        status.record_failure(Stage::Resolve, "registry unavailable", 3, Utc::now());
    }
    assert!(status.terminal_failure);
    store.commit(&[CompanyCommit::new(acme.clone(), status)]).await.unwrap();
    assert!(store.pending_companies(None).await.unwrap().is_empty());

    assert_eq!(store.clear_failures().await.unwrap(), 1);
    let status = store.get_status(acme.id).await.unwrap().unwrap();
    assert!(!status.has_error);
    assert_eq!(status.retry_count, 0);
    assert_eq!(store.pending_companies(None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn statistics_count_canonical_rounds() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir).await;
    let (acme, status) = company(&store, "Acme").await;

    let canonical = filing_candidate(&acme, 5_000_000.0);
    let mut dup = RoundCandidate::new(
        FundingRound::new(acme.id, SourceType::Search, Confidence::Medium)
            .with_date("2024-03-03")
            .with_amount(5_000_000.0),
    );
    dup.round.is_duplicate = true;
    dup.round.duplicate_of = Some(canonical.round.id);

    let mut commit = CompanyCommit::new(acme.clone(), through(status, &[Stage::Resolve]));
    commit.new_rounds.push(canonical);
    commit.new_rounds.push(dup);
    store.commit(&[commit]).await.unwrap();

    let stats = store.statistics().await.unwrap();
    assert_eq!(stats.companies, 1);
    assert_eq!(stats.funding_rounds, 1);
    assert_eq!(stats.total_rounds, 2);
    assert_eq!(stats.duplicates_found, 1);
    assert_eq!(stats.investors, 2);
    assert_eq!(stats.sources, 1);
    assert_eq!(stats.total_amount_raised, 5_000_000.0);
    assert_eq!(stats.rounds_by_source.get("filing"), Some(&1));
    assert_eq!(stats.progress.resolved, 1);
}

#[tokio::test]
async fn concurrent_usage_updates_lose_nothing() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(open(&dir).await);

    let mut tasks = tokio::task::JoinSet::new();
    for worker in 0..8u64 {
        let store = store.clone();
        tasks.spawn(async move {
            for i in 0..25u64 {
                let outcome = if (worker + i) % 5 == 0 {
                    CallOutcome::RateLimited
                } else {
                    CallOutcome::Success
                };
                let event = UsageEvent::new("groq", "llama", outcome)
                    .with_latency(Duration::from_millis(100 + i))
                    .with_tokens(10, 5);
                store.record_usage(&event).await.unwrap();
            }
        });
    }
    while let Some(joined) = tasks.join_next().await {
        joined.unwrap();
    }

    let records = store.usage_records().await.unwrap();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.total_calls, 200);
    assert_eq!(record.successful_calls + record.rate_limited_calls, 200);
    assert_eq!(record.rate_limited_calls, 40);
    assert_eq!(record.input_tokens, 2_000);
    let close = |v: Option<f64>, want: f64| v.is_some_and(|v| (v - want).abs() < 1e-6);
    assert!(close(record.min_latency_ms, 100.0));
    assert!(close(record.max_latency_ms, 124.0));
}

#[tokio::test]
async fn deleting_a_company_cascades_but_investors_are_shared() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir).await;
    let (acme, acme_status) = company(&store, "Acme").await;
    let (globex, globex_status) = company(&store, "Globex").await;

    let acme_round = filing_candidate(&acme, 1_000_000.0);
    let acme_round_id = acme_round.round.id;
    let mut acme_commit = CompanyCommit::new(acme.clone(), through(acme_status, &[Stage::Resolve]));
    acme_commit.new_rounds.push(acme_round);
    let mut globex_commit =
        CompanyCommit::new(globex.clone(), through(globex_status, &[Stage::Resolve]));
    globex_commit.new_rounds.push(filing_candidate(&globex, 3_000_000.0));
    store.commit(&[acme_commit, globex_commit]).await.unwrap();

    // Both rounds name the same two investors
    assert_eq!(store.statistics().await.unwrap().investors, 2);

    store.delete_company(acme.id).await.unwrap();
    assert!(store.get_company(acme.id).await.unwrap().is_none());
    assert!(store.get_status(acme.id).await.unwrap().is_none());
    assert!(store.rounds_for_company(acme.id, true).await.unwrap().is_empty());
    assert!(store.sources_for_round(acme_round_id).await.unwrap().is_empty());

    let globex_rounds = store.rounds_for_company(globex.id, false).await.unwrap();
    assert_eq!(globex_rounds.len(), 1);
    assert_eq!(globex_rounds[0].investors.len(), 2);
}

#[tokio::test]
async fn two_names_resolving_to_one_registry_id_do_not_block_the_batch() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(open(&dir).await);
    let cik = RegistryId::parse("320193").unwrap();
    let filings = MockFilingsClient::new()
        .with_registry("Acme", cik, "ACME INC")
        .with_registry("Acme Inc", cik, "ACME INC")
        .with_filings(
            cik,
            vec![FilingDocument::new("0000320193-24-000001", "2024-03-05")
                .with_amount_sold(5_000_000.0)
                .with_first_sale("2024-03-01")],
        );

    let mut config = PipelineConfig::default().with_workers(1);
    config.search = config.search.without_delays().with_queries_per_company(1);
    let providers: Vec<Arc<dyn Provider>> = vec![Arc::new(MockProvider::new("groq", 30))];
    let router = Pipeline::router_for(store.clone(), providers, &config);
    let pipeline = Pipeline::new(
        store.clone(),
        Collaborators {
            filings: Arc::new(filings),
            searcher: Arc::new(MockSearcher::new()),
            router,
        },
        &config,
    );
    pipeline
        .load_companies(&[
            CompanyInput::new("Acme"),
            CompanyInput::new("Acme Inc"),
            CompanyInput::new("Bystander"),
        ])
        .await
        .unwrap();

    let summary = pipeline.run_pipeline(None, None).await.unwrap();
    assert_eq!(summary.companies_processed, 3);
    assert_eq!(summary.companies_failed, 0);

    let owners: Vec<Company> = store
        .list_companies()
        .await
        .unwrap()
        .into_iter()
        .filter(|c| c.registry_id == Some(cik))
        .collect();
    assert_eq!(owners.len(), 1);
    assert_eq!(owners[0].name, "Acme");
    assert_eq!(store.rounds_for_company(owners[0].id, false).await.unwrap().len(), 1);

    let loser = store.find_company("Acme Inc").await.unwrap().unwrap();
    assert_eq!(loser.registry_id, None);
    assert!(store.get_status(loser.id).await.unwrap().unwrap().merged);
    assert!(store.pending_companies(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn saved_status_round_trips_without_a_batch() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir).await;
    let (acme, status) = company(&store, "Acme").await;

    let mut failed = through(status, &[Stage::Resolve]);
    failed.record_failure(Stage::FilingsCollect, "checkpoint write failed", 3, Utc::now());
    store.save_status(&failed).await.unwrap();

    let stored = store.get_status(acme.id).await.unwrap().unwrap();
    assert!(stored.resolved);
    assert_eq!(stored.retry_count, 1);
    assert_eq!(stored.error_stage, Some(Stage::FilingsCollect));
    assert_eq!(stored.last_error.as_deref(), Some("checkpoint write failed"));
}
