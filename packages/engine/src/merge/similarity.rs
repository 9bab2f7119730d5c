//! Pairwise similarity between funding round candidates.

use crate::config::MergeConfig;
use crate::types::FundingRound;

use super::normalize::{investor_key, parse_date_span, round_label_key};

/// Component scores for a pair; `None` means the component was not comparable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchScore {
    pub date: Option<f64>,
    pub amount: Option<f64>,
    pub investor: Option<f64>,
    pub composite: f64,
    /// A hard tolerance was exceeded
    pub vetoed: bool,
}

impl MatchScore {
    pub fn components(&self) -> usize {
        [self.date, self.amount, self.investor]
            .iter()
            .filter(|c| c.is_some())
            .count()
    }

    pub fn is_match(&self, config: &MergeConfig) -> bool {
        !self.vetoed
            && self.components() >= config.min_components
            && self.composite >= config.match_threshold
    }
}

/// Labels may match when either is unknown or both collapse to the same key.
pub fn labels_compatible(a: Option<&str>, b: Option<&str>) -> bool {
    match (round_label_key(a), round_label_key(b)) {
        (Some(a), Some(b)) => a == b,
        _ => true,
    }
}

fn date_score(a: &FundingRound, b: &FundingRound, config: &MergeConfig) -> (Option<f64>, bool) {
    let spans = (
        a.announced_on.as_deref().and_then(parse_date_span),
        b.announced_on.as_deref().and_then(parse_date_span),
    );
    let (Some(a), Some(b)) = spans else {
        return (None, false);
    };
    let distance = a.distance_days(&b);
    if distance > config.date_tolerance_days {
        return (Some(0.0), true);
    }
    if config.date_tolerance_days == 0 {
        return (Some(1.0), false);
    }
    let score = 1.0 - 0.5 * distance as f64 / config.date_tolerance_days as f64;
    (Some(score), false)
}

fn amount_score(a: &FundingRound, b: &FundingRound, config: &MergeConfig) -> (Option<f64>, bool) {
    let (Ok(a), Ok(b)) = (a.valid_amount(), b.valid_amount()) else {
        return (None, false);
    };
    let larger = a.max(b);
    let relative = if larger == 0.0 { 0.0 } else { (a - b).abs() / larger };
    if relative > config.amount_tolerance {
        return (Some(0.0), true);
    }
    (Some(1.0 - relative), false)
}

fn name_similarity(a: &str, b: &str) -> f64 {
    if a == b || a.contains(b) || b.contains(a) {
        1.0
    } else {
        strsim::jaro_winkler(a, b)
    }
}

fn investor_score(a: &FundingRound, b: &FundingRound) -> Option<f64> {
    let key = |s: &Option<String>| s.as_deref().map(investor_key).filter(|k| !k.is_empty());
    if let (Some(a), Some(b)) = (key(&a.lead_investor), key(&b.lead_investor)) {
        return Some(name_similarity(&a, &b));
    }

    let keys = |round: &FundingRound| -> Vec<String> {
        round
            .investors
            .iter()
            .map(|i| investor_key(i))
            .filter(|k| !k.is_empty())
            .collect()
    };
    let (left, right) = (keys(a), keys(b));
    if left.is_empty() || right.is_empty() {
        return None;
    }
    left.iter()
        .flat_map(|l| right.iter().map(move |r| name_similarity(l, r)))
        .reduce(f64::max)
}

/// Score a pair on date proximity, amount closeness and investor overlap.
pub fn score(a: &FundingRound, b: &FundingRound, config: &MergeConfig) -> MatchScore {
    let (date, date_veto) = date_score(a, b, config);
    let (amount, amount_veto) = amount_score(a, b, config);
    let investor = investor_score(a, b);

    let weighted = [
        (date, config.date_weight),
        (amount, config.amount_weight),
        (investor, config.investor_weight),
    ];
    let (sum, weights) = weighted
        .iter()
        .filter_map(|(s, w)| s.map(|s| (s * w, *w)))
        .fold((0.0, 0.0), |(sum, weights), (s, w)| (sum + s, weights + w));
    let composite = if weights > 0.0 { sum / weights } else { 0.0 };

    MatchScore {
        date,
        amount,
        investor,
        composite,
        vetoed: date_veto || amount_veto,
    }
}

/// Whether two candidates describe the same financing event.
pub fn same_event(a: &FundingRound, b: &FundingRound, config: &MergeConfig) -> bool {
    labels_compatible(a.round_label.as_deref(), b.round_label.as_deref())
        && a.valid_amount().is_ok()
        && b.valid_amount().is_ok()
        && score(a, b, config).is_match(config)
}
