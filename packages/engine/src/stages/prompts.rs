//! Search queries and the round-extraction prompt.

use std::sync::OnceLock;

use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Query templates; `{company}` is replaced with the company name.
pub const DEFAULT_QUERY_TEMPLATES: [&str; 8] = [
    "site:techcrunch.com \"{company}\" funding raised Series",
    "site:crunchbase.com \"{company}\" funding rounds",
    "\"{company}\" funding round site:reuters.com OR site:bloomberg.com",
    "\"{company}\" raises site:pitchbook.com OR site:cbinsights.com",
    "\"{company}\" funding site:theinformation.com OR site:axios.com",
    "\"{company}\" Series funding site:venturebeat.com OR site:geekwire.com",
    "\"{company}\" raises million site:wsj.com OR site:ft.com OR site:forbes.com",
    "\"{company}\" funding history seed series valuation investors",
];

pub fn render_query(template: &str, company: &str) -> String {
    template.replace("{company}", company)
}

/// One round as a model reports it.
///
/// Monetary fields accept numbers or strings like "$5M" or "1.2 billion".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ExtractedRound {
    /// e.g. "Seed", "Series A"
    #[serde(default)]
    pub round_name: Option<String>,

    /// Announcement date, YYYY-MM-DD when known, else YYYY-MM or YYYY
    #[serde(default)]
    pub date: Option<String>,

    /// Amount raised in USD
    #[serde(default)]
    #[schemars(with = "Option<f64>")]
    pub amount_raised_usd: Option<Value>,

    #[serde(default)]
    #[schemars(with = "Option<f64>")]
    pub pre_money_valuation_usd: Option<Value>,

    #[serde(default)]
    #[schemars(with = "Option<f64>")]
    pub post_money_valuation_usd: Option<Value>,

    #[serde(default)]
    pub lead_investor: Option<String>,

    #[serde(default)]
    pub all_investors: Vec<String>,
}

impl ExtractedRound {
    pub fn amount(&self) -> Option<f64> {
        self.amount_raised_usd.as_ref().and_then(money_value)
    }

    pub fn pre_money(&self) -> Option<f64> {
        self.pre_money_valuation_usd.as_ref().and_then(money_value)
    }

    pub fn post_money(&self) -> Option<f64> {
        self.post_money_valuation_usd.as_ref().and_then(money_value)
    }

    /// Nothing worth keeping: no label, date or amount.
    pub fn is_empty(&self) -> bool {
        clean(&self.round_name).is_none() && clean(&self.date).is_none() && self.amount().is_none()
    }
}

/// Trimmed, non-empty, and not a placeholder like "unknown".
pub fn clean(field: &Option<String>) -> Option<String> {
    let value = field.as_deref()?.trim();
    let lowered = value.to_ascii_lowercase();
    if value.is_empty() || matches!(lowered.as_str(), "null" | "none" | "unknown" | "n/a" | "undisclosed") {
        None
    } else {
        Some(value.to_string())
    }
}

/// JSON schema sent with every extraction request.
pub fn extraction_schema() -> Value {
    let schema = schemars::schema_for!(Vec<ExtractedRound>);
    serde_json::to_value(schema).unwrap_or_else(|_| serde_json::json!({"type": "array"}))
}

pub fn extraction_prompt(company: &str, title: &str, url: &str, text: &str) -> String {
    format!(
        "Extract funding round information for the company \"{company}\" from the search result below.\n\
         \n\
         Source: {title}\n\
         URL: {url}\n\
         Content:\n{text}\n\
         \n\
         Return a JSON array. Each element describes one funding round of {company} (not of other companies) with:\n\
         - round_name: e.g. \"Seed\", \"Series A\"\n\
         - date: announcement date, YYYY-MM-DD if known, else YYYY-MM or YYYY\n\
         - amount_raised_usd: amount raised in US dollars as a number\n\
         - pre_money_valuation_usd, post_money_valuation_usd: numbers if stated\n\
         - lead_investor: the lead investor if stated\n\
         - all_investors: every named participant\n\
         \n\
         Use null for anything not stated. Return [] if the text mentions no funding rounds for {company}."
    )
}

/// Money from a JSON number or a string such as "$5.2M", "1.1 billion", "250k".
pub fn money_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        Value::String(s) => parse_money(s),
        _ => None,
    }
}

fn money_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)([0-9][0-9,]*(?:\.[0-9]+)?)\s*(billion|bn|b|million|mm|m|thousand|k)?\b").ok()
    })
    .as_ref()
}

pub fn parse_money(text: &str) -> Option<f64> {
    let caps = money_regex()?.captures(text)?;
    let number: f64 = caps.get(1)?.as_str().replace(',', "").parse().ok()?;
    let multiplier = match caps.get(2).map(|m| m.as_str().to_ascii_lowercase()) {
        Some(unit) if unit == "billion" || unit == "bn" || unit == "b" => 1e9,
        Some(unit) if unit == "million" || unit == "mm" || unit == "m" => 1e6,
        Some(unit) if unit == "thousand" || unit == "k" => 1e3,
        _ => 1.0,
    };
    Some(number * multiplier).filter(|v| v.is_finite())
}
