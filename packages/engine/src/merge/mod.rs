//! Fuzzy deduplication of funding round candidates.
//!
//! Candidates are visited in precedence order (filings first, then by
//! confidence, completeness and age). Each candidate joins the best-scoring
//! existing cluster it matches, or starts a new cluster as its canonical. A
//! candidate is scored against every member of a cluster and against the
//! cluster's enriched canonical, so gaps filled by enrichment are already
//! visible to the plan. Clusters whose enriched canonicals match are then
//! folded together until none do, which makes re-merging the canonical
//! output a no-op. Because filings are visited first, a cluster containing a
//! filing always has a filing canonical.

pub mod normalize;
pub mod similarity;

use std::cmp::Ordering;
use std::collections::HashMap;

use tracing::{debug, warn};

use crate::config::MergeConfig;
use crate::traits::SourceMove;
use crate::types::{FundingRound, RoundId, SourceType};

use normalize::round_label_key;
use similarity::{labels_compatible, score};

pub use similarity::{same_event, MatchScore};

/// A malformed candidate left out of grouping.
#[derive(Debug, Clone, PartialEq)]
pub struct DataQualityNote {
    pub round_id: RoundId,
    pub reason: String,
}

/// One real-world funding event.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeCluster {
    pub canonical: RoundId,
    /// Matched members in precedence order, canonical excluded
    pub duplicates: Vec<RoundId>,
}

/// Canonical/duplicate partition of a candidate set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergePlan {
    pub clusters: Vec<MergeCluster>,
    pub excluded: Vec<DataQualityNote>,
}

impl MergePlan {
    pub fn canonical_ids(&self) -> Vec<RoundId> {
        self.clusters.iter().map(|c| c.canonical).collect()
    }

    pub fn duplicate_of(&self, id: RoundId) -> Option<RoundId> {
        self.clusters
            .iter()
            .find(|c| c.duplicates.contains(&id))
            .map(|c| c.canonical)
    }

    pub fn duplicate_count(&self) -> usize {
        self.clusters.iter().map(|c| c.duplicates.len()).sum()
    }
}

/// Result of merging one company's candidates.
#[derive(Debug, Clone, Default)]
pub struct CanonicalRounds {
    pub plan: MergePlan,

    /// Every input round in its merged state, in input order
    pub rounds: Vec<FundingRound>,

    /// Provenance to re-attach from duplicates to their canonical
    pub source_moves: Vec<SourceMove>,
}

impl CanonicalRounds {
    pub fn canonical(&self) -> impl Iterator<Item = &FundingRound> {
        self.rounds.iter().filter(|r| !r.is_duplicate)
    }

    pub fn unique_count(&self) -> usize {
        self.plan.clusters.len() + self.plan.excluded.len()
    }
}

/// Deterministic precedence: filing, confidence, completeness, age, id.
fn precedence(a: &FundingRound, b: &FundingRound) -> Ordering {
    let filing = |r: &FundingRound| r.source_type == SourceType::Filing;
    filing(b)
        .cmp(&filing(a))
        .then_with(|| b.confidence.cmp(&a.confidence))
        .then_with(|| b.completeness().cmp(&a.completeness()))
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.id.0.cmp(&b.id.0))
}

struct Cluster<'a> {
    canonical: &'a FundingRound,
    label: Option<String>,
    members: Vec<&'a FundingRound>,
    /// Canonical with every member's gaps folded in, as `merge` writes it
    view: FundingRound,
}

impl<'a> Cluster<'a> {
    fn new(canonical: &'a FundingRound, label: Option<String>) -> Self {
        Self {
            canonical,
            label,
            members: Vec::new(),
            view: canonical.clone(),
        }
    }

    fn push(&mut self, member: &'a FundingRound) {
        enrich(&mut self.view, member);
        self.members.push(member);
    }

    /// Fold `other` in, keeping members in precedence order.
    fn absorb(&mut self, other: Cluster<'a>) {
        self.members.push(other.canonical);
        self.members.extend(other.members);
        self.members.sort_by(|a, b| precedence(a, b));
        if self.label.is_none() {
            self.label = other.label;
        }
        let mut view = self.canonical.clone();
        for member in &self.members {
            enrich(&mut view, member);
        }
        self.view = view;
    }
}

pub struct MergeEngine {
    config: MergeConfig,
}

impl MergeEngine {
    pub fn new(config: MergeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MergeConfig {
        &self.config
    }

    /// Partition candidates into clusters. Pure and deterministic.
    ///
    /// Rounds already flagged as duplicates are ignored.
    pub fn plan(&self, candidates: &[FundingRound]) -> MergePlan {
        let mut excluded = Vec::new();
        let mut valid: Vec<&FundingRound> = Vec::new();
        for round in candidates.iter().filter(|r| !r.is_duplicate) {
            match round.valid_amount() {
                Ok(_) => valid.push(round),
                Err(reason) => excluded.push(DataQualityNote {
                    round_id: round.id,
                    reason,
                }),
            }
        }
        valid.sort_by(|a, b| precedence(a, b));

        let mut clusters: Vec<Cluster<'_>> = Vec::new();
        for candidate in valid {
            let key = round_label_key(candidate.round_label.as_deref());
            let best = clusters
                .iter()
                .enumerate()
                .filter(|(_, c)| match (&c.label, &key) {
                    (Some(a), Some(b)) => a == b,
                    _ => true,
                })
                .filter_map(|(i, c)| self.best_match(c, candidate).map(|s| (i, s)))
                // Highest score; earliest cluster on ties
                .fold(None::<(usize, f64)>, |best, (i, s)| match best {
                    Some((_, b)) if b >= s => best,
                    _ => Some((i, s)),
                });

            match best {
                Some((i, composite)) => {
                    let cluster = &mut clusters[i];
                    debug!(
                        canonical = %cluster.canonical.id,
                        duplicate = %candidate.id,
                        composite,
                        "Matched funding round"
                    );
                    if cluster.label.is_none() {
                        cluster.label = key;
                    }
                    cluster.push(candidate);
                }
                None => clusters.push(Cluster::new(candidate, key)),
            }
        }
        self.coalesce(&mut clusters);

        MergePlan {
            clusters: clusters
                .into_iter()
                .map(|c| MergeCluster {
                    canonical: c.canonical.id,
                    duplicates: c.members.iter().map(|m| m.id).collect(),
                })
                .collect(),
            excluded,
        }
    }

    /// Highest matching composite against any member or the enriched view.
    fn best_match(&self, cluster: &Cluster<'_>, candidate: &FundingRound) -> Option<f64> {
        std::iter::once(&cluster.view)
            .chain(std::iter::once(cluster.canonical))
            .chain(cluster.members.iter().copied())
            .map(|member| score(member, candidate, &self.config))
            .filter(|s| s.is_match(&self.config))
            .map(|s| s.composite)
            .reduce(f64::max)
    }

    /// Merge clusters whose enriched canonicals describe the same event.
    ///
    /// The earlier cluster keeps its canonical, so precedence still holds.
    fn coalesce(&self, clusters: &mut Vec<Cluster<'_>>) {
        loop {
            let n = clusters.len();
            let pair = (0..n)
                .flat_map(|i| (i + 1..n).map(move |j| (i, j)))
                .find(|&(i, j)| {
                    let (a, b) = (&clusters[i].view, &clusters[j].view);
                    labels_compatible(a.round_label.as_deref(), b.round_label.as_deref())
                        && score(a, b, &self.config).is_match(&self.config)
                });
            let Some((i, j)) = pair else {
                return;
            };
            let absorbed = clusters.remove(j);
            debug!(
                canonical = %clusters[i].canonical.id,
                absorbed = %absorbed.canonical.id,
                "Folded clusters after enrichment"
            );
            clusters[i].absorb(absorbed);
        }
    }

    /// Plan and apply: flag duplicates, enrich canonicals, list source moves.
    pub fn merge(&self, candidates: &[FundingRound]) -> CanonicalRounds {
        let plan = self.plan(candidates);
        let mut by_id: HashMap<RoundId, FundingRound> =
            candidates.iter().map(|r| (r.id, r.clone())).collect();
        let mut source_moves = Vec::new();

        for cluster in &plan.clusters {
            if cluster.duplicates.is_empty() {
                continue;
            }
            let mut canonical = match by_id.get(&cluster.canonical) {
                Some(r) => r.clone(),
                None => continue,
            };
            for dup_id in &cluster.duplicates {
                if let Some(dup) = by_id.get_mut(dup_id) {
                    enrich(&mut canonical, dup);
                    dup.is_duplicate = true;
                    dup.duplicate_of = Some(canonical.id);
                    source_moves.push(SourceMove {
                        from: dup.id,
                        to: canonical.id,
                    });
                }
            }
            by_id.insert(canonical.id, canonical);
        }

        for note in &plan.excluded {
            warn!(round_id = %note.round_id, reason = %note.reason, "Excluded round from merge");
            if let Some(round) = by_id.get_mut(&note.round_id) {
                let marker = format!("data quality: {}", note.reason);
                let notes = round.notes.get_or_insert_with(String::new);
                if !notes.contains(&marker) {
                    if !notes.is_empty() {
                        notes.push_str("; ");
                    }
                    notes.push_str(&marker);
                }
            }
        }

        let rounds = candidates
            .iter()
            .filter_map(|r| by_id.remove(&r.id))
            .collect();

        CanonicalRounds {
            plan,
            rounds,
            source_moves,
        }
    }
}

/// Fill gaps in `canonical` from a duplicate.
fn enrich(canonical: &mut FundingRound, dup: &FundingRound) {
    if canonical.round_label.is_none() {
        canonical.round_label = dup.round_label.clone();
    }
    if canonical.announced_on.is_none() {
        canonical.announced_on = dup.announced_on.clone();
    }
    if canonical.pre_money_valuation.is_none() {
        canonical.pre_money_valuation = dup.pre_money_valuation;
    }
    if canonical.post_money_valuation.is_none() {
        canonical.post_money_valuation = dup.post_money_valuation;
    }
    if canonical.lead_investor.is_none() {
        canonical.lead_investor = dup.lead_investor.clone();
    }
    for investor in &dup.investors {
        if !canonical
            .investors
            .iter()
            .any(|i| i.eq_ignore_ascii_case(investor))
        {
            canonical.investors.push(investor.clone());
        }
    }
    for url in &dup.source_urls {
        if !canonical.source_urls.contains(url) {
            canonical.source_urls.push(url.clone());
        }
    }
    canonical.confidence = canonical.confidence.max(dup.confidence);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CompanyId, Confidence};
    use chrono::{Duration, Utc};

    fn search(company: CompanyId, date: &str, amount: f64) -> FundingRound {
        FundingRound::new(company, SourceType::Search, Confidence::Low)
            .with_date(date)
            .with_amount(amount)
    }

    #[test]
    fn filing_wins_over_search() {
        let company = CompanyId::new();
        let s = search(company, "2024-03-03", 5e6).with_lead_investor("Accel");
        let f = FundingRound::new(company, SourceType::Filing, Confidence::High)
            .with_date("2024-03-01")
            .with_amount(5e6);

        let merged = MergeEngine::new(MergeConfig::default()).merge(&[s.clone(), f.clone()]);
        assert_eq!(merged.plan.canonical_ids(), vec![f.id]);
        assert_eq!(merged.plan.duplicate_of(s.id), Some(f.id));

        let canonical: Vec<_> = merged.canonical().collect();
        assert_eq!(canonical.len(), 1);
        assert_eq!(canonical[0].source_type, SourceType::Filing);
        assert_eq!(canonical[0].lead_investor.as_deref(), Some("Accel"));
        assert_eq!(merged.source_moves, vec![SourceMove { from: s.id, to: f.id }]);
    }

    #[test]
    fn higher_confidence_search_is_canonical() {
        let company = CompanyId::new();
        let low = search(company, "2024-05-01", 2e6).with_lead_investor("Index");
        let mut high = search(company, "2024-05-02", 2e6).with_lead_investor("Index");
        high.confidence = Confidence::Medium;

        let plan = MergeEngine::new(MergeConfig::default()).plan(&[low.clone(), high.clone()]);
        assert_eq!(plan.canonical_ids(), vec![high.id]);
    }

    #[test]
    fn malformed_candidates_are_excluded() {
        let company = CompanyId::new();
        let ok = search(company, "2024-01-01", 1e6);
        let missing = FundingRound::new(company, SourceType::Search, Confidence::Low).with_date("2024-01-01");

        let merged = MergeEngine::new(MergeConfig::default()).merge(&[ok.clone(), missing.clone()]);
        assert_eq!(merged.plan.excluded.len(), 1);
        assert_eq!(merged.plan.excluded[0].round_id, missing.id);
        assert_eq!(merged.unique_count(), 2);

        let noted = merged.rounds.iter().find(|r| r.id == missing.id).unwrap();
        assert!(noted.notes.as_deref().unwrap().contains("missing amount raised"));
        assert!(!noted.is_duplicate);
    }

    #[test]
    fn plan_is_deterministic_and_idempotent() {
        let company = CompanyId::new();
        let base = Utc::now();
        let rounds: Vec<_> = (0..6)
            .map(|i| {
                search(company, &format!("2024-0{}-01", 1 + i % 3), 1e6 * (1 + i % 3) as f64)
                    .with_created_at(base + Duration::seconds(i as i64))
            })
            .collect();

        let engine = MergeEngine::new(MergeConfig::default());
        let first = engine.plan(&rounds);
        let mut reversed = rounds.clone();
        reversed.reverse();
        assert_eq!(first, engine.plan(&reversed));

        let merged = engine.merge(&rounds);
        let canonical: Vec<_> = merged.canonical().cloned().collect();
        let again = engine.merge(&canonical);
        assert_eq!(again.plan.canonical_ids().len(), canonical.len());
        assert_eq!(again.plan.duplicate_count(), 0);
    }

    #[test]
    fn candidates_match_any_cluster_member() {
        let company = CompanyId::new();
        let base = Utc::now();
        // `far` misses the lead-less filing but matches `near`
        let f = FundingRound::new(company, SourceType::Filing, Confidence::High)
            .with_date("2024-01-01")
            .with_amount(5e6);
        let near = search(company, "2024-01-02", 5e6)
            .with_lead_investor("Accel")
            .with_created_at(base);
        let far = search(company, "2024-03-31", 4.75e6)
            .with_lead_investor("Accel")
            .with_created_at(base + Duration::seconds(1));

        let plan = MergeEngine::new(MergeConfig::default()).plan(&[far.clone(), near.clone(), f.clone()]);
        assert_eq!(plan.canonical_ids(), vec![f.id]);
        assert_eq!(plan.clusters[0].duplicates, vec![near.id, far.id]);
    }

    #[test]
    fn unlabeled_joins_labeled_cluster() {
        let company = CompanyId::new();
        let labeled = search(company, "2024-03-01", 8e6).with_label("Series A").with_lead_investor("Benchmark");
        let unlabeled = search(company, "2024-03-05", 8e6).with_lead_investor("Benchmark");
        let other = search(company, "2024-03-02", 8e6).with_label("Series B").with_lead_investor("Benchmark");

        let plan = MergeEngine::new(MergeConfig::default()).plan(&[labeled.clone(), unlabeled.clone(), other.clone()]);
        assert_eq!(plan.clusters.len(), 2);
        assert!(plan.duplicate_of(unlabeled.id).is_some());
        assert_eq!(plan.duplicate_of(other.id), None);
    }
}
