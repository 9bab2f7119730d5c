//! Dedup behavior over realistic candidate sets.

use chrono::{Duration, Utc};

use funding_engine::merge::same_event;
use funding_engine::{
    CompanyId, Confidence, FundingRound, MergeConfig, MergeEngine, SourceType,
};

fn filing(company: CompanyId, date: &str, amount: f64) -> FundingRound {
    FundingRound::new(company, SourceType::Filing, Confidence::High)
        .with_date(date)
        .with_amount(amount)
}

fn search(company: CompanyId, date: &str, amount: f64) -> FundingRound {
    FundingRound::new(company, SourceType::Search, Confidence::Low)
        .with_date(date)
        .with_amount(amount)
}

#[test]
fn acme_filing_absorbs_matching_search_round() {
    let acme = CompanyId::new();
    let f = filing(acme, "2024-03-01", 5_000_000.0)
        .with_notes("SEC Form D filing (Accession: 0001234567-24-000001)");
    let s = search(acme, "2024-03-03", 5_000_000.0)
        .with_label("Series A")
        .with_lead_investor("Accel")
        .with_source_url("https://techcrunch.com/acme");

    let merged = MergeEngine::new(MergeConfig::default()).merge(&[s.clone(), f.clone()]);

    let canonical: Vec<&FundingRound> = merged.canonical().collect();
    assert_eq!(canonical.len(), 1);
    assert_eq!(canonical[0].id, f.id);
    assert_eq!(canonical[0].source_type, SourceType::Filing);
    assert_eq!(canonical[0].round_label.as_deref(), Some("Series A"));
    assert_eq!(canonical[0].source_urls, vec!["https://techcrunch.com/acme".to_string()]);
    assert_eq!(merged.source_moves.len(), 1);
    assert_eq!(merged.source_moves[0].from, s.id);
    assert_eq!(merged.source_moves[0].to, f.id);
}

#[test]
fn three_days_equal_amount_same_lead_is_one_event() {
    let company = CompanyId::new();
    let a = search(company, "2023-06-10", 12_000_000.0).with_lead_investor("Sequoia Capital");
    let b = search(company, "2023-06-13", 12_000_000.0).with_lead_investor("Sequoia Capital LLC");

    let engine = MergeEngine::new(MergeConfig::default());
    assert!(same_event(&a, &b, engine.config()));
    assert_eq!(engine.merge(&[a, b]).unique_count(), 1);
}

#[test]
fn amounts_beyond_tolerance_stay_distinct() {
    let company = CompanyId::new();
    let a = search(company, "2023-06-10", 10_000_000.0).with_lead_investor("Sequoia Capital");
    let b = search(company, "2023-06-13", 12_000_000.0).with_lead_investor("Sequoia Capital");

    let engine = MergeEngine::new(MergeConfig::default());
    assert_eq!(engine.merge(&[a.clone(), b.clone()]).unique_count(), 2);

    // Same pair merges once the tolerance is widened
    let loose = MergeEngine::new(MergeConfig::default().with_amount_tolerance(0.25));
    assert_eq!(loose.merge(&[a, b]).unique_count(), 1);
}

#[test]
fn date_tolerance_is_configurable() {
    let company = CompanyId::new();
    let a = search(company, "2023-01-05", 3_000_000.0);
    let b = search(company, "2023-02-20", 3_000_000.0);

    let strict = MergeEngine::new(MergeConfig::default().with_date_tolerance_days(30));
    assert_eq!(strict.merge(&[a.clone(), b.clone()]).unique_count(), 2);

    let default = MergeEngine::new(MergeConfig::default());
    assert_eq!(default.merge(&[a, b]).unique_count(), 1);
}

#[test]
fn different_labels_never_merge() {
    let company = CompanyId::new();
    let seed = search(company, "2022-01-10", 2_000_000.0).with_label("Seed");
    let series_a = search(company, "2022-01-12", 2_000_000.0).with_label("Series A");

    let merged = MergeEngine::new(MergeConfig::default()).merge(&[seed, series_a]);
    assert_eq!(merged.unique_count(), 2);
    assert!(merged.plan.clusters.iter().all(|c| c.duplicates.is_empty()));
}

#[test]
fn separate_rounds_of_one_company_are_kept_apart() {
    let company = CompanyId::new();
    let rounds = vec![
        filing(company, "2021-02-01", 1_500_000.0),
        search(company, "2021-02-03", 1_500_000.0).with_label("Seed"),
        filing(company, "2022-09-15", 8_000_000.0),
        search(company, "September 2022", 8_000_000.0).with_label("Series A"),
        search(company, "2024", 25_000_000.0).with_label("Series B"),
    ];

    let merged = MergeEngine::new(MergeConfig::default()).merge(&rounds);
    assert_eq!(merged.unique_count(), 3);
    assert_eq!(merged.plan.duplicate_count(), 2);
    assert!(merged
        .canonical()
        .filter(|r| r.amount_raised != Some(25_000_000.0))
        .all(|r| r.source_type == SourceType::Filing));
}

#[test]
fn malformed_candidates_are_noted_not_fatal() {
    let company = CompanyId::new();
    let ok = filing(company, "2024-01-01", 1_000_000.0);
    let no_amount = FundingRound::new(company, SourceType::Search, Confidence::Low).with_date("2024-01-02");
    let negative = search(company, "2024-01-03", -5.0);

    let merged = MergeEngine::new(MergeConfig::default()).merge(&[ok, no_amount.clone(), negative]);
    assert_eq!(merged.plan.excluded.len(), 2);
    assert_eq!(merged.plan.clusters.len(), 1);

    let noted = merged.rounds.iter().find(|r| r.id == no_amount.id).unwrap();
    assert!(!noted.is_duplicate);
    assert!(noted.notes.as_deref().unwrap_or_default().contains("data quality"));
}

#[test]
fn merge_is_idempotent_and_order_independent() {
    let company = CompanyId::new();
    let base = Utc::now();
    let rounds: Vec<FundingRound> = (0..6)
        .map(|i| {
            search(company, "2024-05-01", 4_000_000.0 + f64::from(i) * 10_000.0)
                .with_lead_investor("Founders Fund")
                .with_created_at(base + Duration::seconds(i64::from(i)))
        })
        .collect();

    let engine = MergeEngine::new(MergeConfig::default());
    let first = engine.plan(&rounds);
    assert_eq!(first, engine.plan(&rounds));

    let mut reversed = rounds.clone();
    reversed.reverse();
    assert_eq!(first, engine.plan(&reversed));

    // Feeding back the merged canonical set changes nothing
    let merged = engine.merge(&rounds);
    let canonical: Vec<FundingRound> = merged.canonical().cloned().collect();
    let again = engine.merge(&canonical);
    assert_eq!(again.plan.duplicate_count(), 0);
    assert_eq!(again.unique_count(), merged.unique_count());
}

#[test]
fn enrichment_cannot_unlock_matches_on_a_second_merge() {
    let company = CompanyId::new();
    let base = Utc::now();
    let a = filing(company, "2024-01-01", 5_000_000.0);
    let d = search(company, "2024-01-02", 5_000_000.0)
        .with_lead_investor("Accel")
        .with_created_at(base);
    let b = search(company, "2024-03-31", 4_750_000.0)
        .with_lead_investor("Accel")
        .with_created_at(base + Duration::seconds(1));

    let engine = MergeEngine::new(MergeConfig::default());
    let first = engine.merge(&[a.clone(), d.clone(), b.clone()]);
    assert_eq!(first.canonical().count(), 1);
    assert_eq!(first.plan.duplicate_count(), 2);
    assert_eq!(first.plan.duplicate_of(b.id), Some(a.id));

    let canonical: Vec<FundingRound> = first.canonical().cloned().collect();
    assert_eq!(canonical[0].lead_investor.as_deref(), Some("Accel"));

    let second = engine.merge(&canonical);
    assert_eq!(second.canonical().count(), 1);
    assert_eq!(second.plan.duplicate_count(), 0);
}
