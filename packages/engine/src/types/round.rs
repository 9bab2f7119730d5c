//! Funding rounds, their provenance, and candidates.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::company::CompanyId;

uuid_id!(
    /// Funding round primary key.
    RoundId
);

uuid_id!(
    /// Source (provenance) primary key.
    SourceId
);

/// Maximum stored length of a source title.
pub const MAX_TITLE_CHARS: usize = 490;

/// Where a round came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Filing,
    Search,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Filing => "filing",
            SourceType::Search => "search",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "filing" => Ok(SourceType::Filing),
            "search" => Ok(SourceType::Search),
            other => Err(format!("unknown source type: {}", other)),
        }
    }
}

/// Categorical confidence, ordered `Low < Medium < High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    /// Confidence from the number of independent sources that agree.
    pub fn from_agreement(sources: usize) -> Self {
        match sources {
            0 | 1 => Confidence::Low,
            2 => Confidence::Medium,
            _ => Confidence::High,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::Low => "low",
            Confidence::Medium => "medium",
            Confidence::High => "high",
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Confidence {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Confidence::Low),
            "medium" => Ok(Confidence::Medium),
            "high" => Ok(Confidence::High),
            other => Err(format!("unknown confidence: {}", other)),
        }
    }
}

/// A funding round, either a candidate or a canonical record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundingRound {
    pub id: RoundId,
    pub company_id: CompanyId,

    /// "Seed", "Series A", ...
    pub round_label: Option<String>,

    /// Free-form date as the source gave it
    pub announced_on: Option<String>,

    /// USD
    pub amount_raised: Option<f64>,
    pub pre_money_valuation: Option<f64>,
    pub post_money_valuation: Option<f64>,

    pub lead_investor: Option<String>,

    /// All named participants, lead included
    #[serde(default)]
    pub investors: Vec<String>,

    pub source_type: SourceType,
    pub confidence: Confidence,

    #[serde(default)]
    pub source_urls: Vec<String>,

    pub notes: Option<String>,

    /// Extraction payload kept for audit
    #[serde(default)]
    pub raw_payload: serde_json::Value,

    pub is_duplicate: bool,
    pub duplicate_of: Option<RoundId>,

    pub created_at: DateTime<Utc>,
}

impl FundingRound {
    pub fn new(company_id: CompanyId, source_type: SourceType, confidence: Confidence) -> Self {
        Self {
            id: RoundId::new(),
            company_id,
            round_label: None,
            announced_on: None,
            amount_raised: None,
            pre_money_valuation: None,
            post_money_valuation: None,
            lead_investor: None,
            investors: Vec::new(),
            source_type,
            confidence,
            source_urls: Vec::new(),
            notes: None,
            raw_payload: serde_json::Value::Null,
            is_duplicate: false,
            duplicate_of: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.round_label = Some(label.into());
        self
    }

    pub fn with_date(mut self, date: impl Into<String>) -> Self {
        self.announced_on = Some(date.into());
        self
    }

    pub fn with_amount(mut self, amount: f64) -> Self {
        self.amount_raised = Some(amount);
        self
    }

    pub fn with_valuations(mut self, pre: Option<f64>, post: Option<f64>) -> Self {
        self.pre_money_valuation = pre;
        self.post_money_valuation = post;
        self
    }

    pub fn with_lead_investor(mut self, lead: impl Into<String>) -> Self {
        let lead = lead.into();
        if !self.investors.iter().any(|i| i.eq_ignore_ascii_case(&lead)) {
            self.investors.push(lead.clone());
        }
        self.lead_investor = Some(lead);
        self
    }

    pub fn with_investors(mut self, investors: impl IntoIterator<Item = String>) -> Self {
        for investor in investors {
            let investor = investor.trim().to_string();
            if !investor.is_empty() && !self.investors.iter().any(|i| i.eq_ignore_ascii_case(&investor)) {
                self.investors.push(investor);
            }
        }
        self
    }

    pub fn with_source_url(mut self, url: impl Into<String>) -> Self {
        let url = url.into();
        if !self.source_urls.contains(&url) {
            self.source_urls.push(url);
        }
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn with_raw_payload(mut self, payload: serde_json::Value) -> Self {
        self.raw_payload = payload;
        self
    }

    pub fn with_created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = at;
        self
    }

    /// Count of filled key fields: amount, pre-money, post-money, lead.
    pub fn completeness(&self) -> u8 {
        [
            self.amount_raised.is_some(),
            self.pre_money_valuation.is_some(),
            self.post_money_valuation.is_some(),
            self.lead_investor.is_some(),
        ]
        .iter()
        .filter(|b| **b)
        .count() as u8
    }

    /// The amount, if usable for matching.
    pub fn valid_amount(&self) -> Result<f64, String> {
        match self.amount_raised {
            None => Err("missing amount raised".to_string()),
            Some(v) if !v.is_finite() => Err(format!("non-finite amount raised: {}", v)),
            Some(v) if v < 0.0 => Err(format!("negative amount raised: {}", v)),
            Some(v) => Ok(v),
        }
    }
}

/// One extraction event behind a round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub id: SourceId,
    pub round_id: RoundId,
    pub source_type: SourceType,

    /// Provider and model that produced the extraction (search sources)
    pub provider: Option<String>,
    pub model: Option<String>,

    pub url: Option<String>,
    pub title: Option<String>,
    pub snippet: Option<String>,

    pub extraction_confidence: Option<Confidence>,
    pub created_at: DateTime<Utc>,
}

impl Source {
    pub fn new(round_id: RoundId, source_type: SourceType) -> Self {
        Self {
            id: SourceId::new(),
            round_id,
            source_type,
            provider: None,
            model: None,
            url: None,
            title: None,
            snippet: None,
            extraction_confidence: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_provider(mut self, provider: impl Into<String>, model: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self.model = Some(model.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Titles are truncated to [`MAX_TITLE_CHARS`].
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        let title: String = title.into();
        self.title = Some(title.chars().take(MAX_TITLE_CHARS).collect());
        self
    }

    pub fn with_snippet(mut self, snippet: impl Into<String>) -> Self {
        self.snippet = Some(snippet.into());
        self
    }

    pub fn with_confidence(mut self, confidence: Confidence) -> Self {
        self.extraction_confidence = Some(confidence);
        self
    }
}

/// A round produced by a stage together with its provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundCandidate {
    pub round: FundingRound,
    pub sources: Vec<Source>,
}

impl RoundCandidate {
    pub fn new(round: FundingRound) -> Self {
        Self {
            round,
            sources: Vec::new(),
        }
    }

    /// Attach a source; its `round_id` is pointed at this round.
    pub fn with_source(mut self, mut source: Source) -> Self {
        source.round_id = self.round.id;
        self.sources.push(source);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_orders_low_to_high() {
        assert!(Confidence::High > Confidence::Medium);
        assert!(Confidence::Medium > Confidence::Low);
        assert_eq!(Confidence::from_agreement(1), Confidence::Low);
        assert_eq!(Confidence::from_agreement(2), Confidence::Medium);
        assert_eq!(Confidence::from_agreement(5), Confidence::High);
    }

    #[test]
    fn amount_validation() {
        let company = CompanyId::new();
        let round = FundingRound::new(company, SourceType::Search, Confidence::Low);
        assert!(round.valid_amount().is_err());
        assert!(round.clone().with_amount(f64::NAN).valid_amount().is_err());
        assert!(round.clone().with_amount(-5.0).valid_amount().is_err());
        assert_eq!(round.with_amount(0.0).valid_amount(), Ok(0.0));
    }

    #[test]
    fn lead_investor_is_listed_once() {
        let round = FundingRound::new(CompanyId::new(), SourceType::Search, Confidence::Low)
            .with_investors(vec!["Sequoia Capital".to_string(), "".to_string()])
            .with_lead_investor("sequoia capital");
        assert_eq!(round.investors, vec!["Sequoia Capital".to_string()]);
        assert_eq!(round.completeness(), 1);
    }

    #[test]
    fn long_titles_are_truncated() {
        let source = Source::new(RoundId::new(), SourceType::Search).with_title("x".repeat(600));
        assert_eq!(source.title.unwrap().chars().count(), MAX_TITLE_CHARS);
    }

    #[test]
    fn candidate_sources_point_at_round() {
        let round = FundingRound::new(CompanyId::new(), SourceType::Filing, Confidence::High);
        let id = round.id;
        let candidate = RoundCandidate::new(round).with_source(Source::new(RoundId::new(), SourceType::Filing));
        assert_eq!(candidate.sources[0].round_id, id);
    }
}
