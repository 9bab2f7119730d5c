//! Normalization of labels, investor names and dates for matching.

use chrono::{Datelike, NaiveDate};

/// Coarse grouping key for a round label.
///
/// Series letters, seed and a few named stages collapse to canonical
/// forms. Labels that say nothing about the stage ("Form D Filing",
/// "unknown") return `None`, which matches any label.
pub fn round_label_key(label: Option<&str>) -> Option<String> {
    let raw = label?;
    let lowered: String = raw
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    let words: Vec<&str> = lowered.split_whitespace().collect();
    if words.is_empty() {
        return None;
    }
    let joined = words.join(" ");

    if let Some(pos) = words.iter().position(|w| *w == "series") {
        if let Some(next) = words.get(pos + 1) {
            let mut chars = next.chars();
            if let Some(letter) = chars.next().filter(|c| c.is_ascii_alphabetic()) {
                // "a", "a1", "a2" all count as Series A
                if chars.all(|c| c.is_ascii_digit()) {
                    return Some(format!("series {}", letter));
                }
            }
        }
    }

    if joined.contains("pre seed") || words.contains(&"preseed") {
        return Some("pre-seed".to_string());
    }
    if words.contains(&"seed") {
        return Some("seed".to_string());
    }
    for stage in ["angel", "bridge", "ipo", "debt", "grant"] {
        if words.contains(&stage) {
            return Some(stage.to_string());
        }
    }
    let uninformative = ["form d", "filing", "unknown", "undisclosed", "funding", "round"];
    if uninformative.iter().any(|u| joined.contains(u)) && !joined.contains("venture") {
        return None;
    }
    Some(joined)
}

const INVESTOR_SUFFIXES: &[&str] = &["llc", "lp", "llp", "inc", "ltd", "co", "plc", "the"];

/// Lowercased investor name without punctuation or entity suffixes.
pub fn investor_key(name: &str) -> String {
    let lowered: String = name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    lowered
        .split_whitespace()
        .filter(|w| !INVESTOR_SUFFIXES.contains(w))
        .collect::<Vec<_>>()
        .join(" ")
}

/// The interval a free-form date covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateSpan {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateSpan {
    fn day(date: NaiveDate) -> Self {
        Self {
            start: date,
            end: date,
        }
    }

    fn month(year: i32, month: u32) -> Option<Self> {
        let start = NaiveDate::from_ymd_opt(year, month, 1)?;
        let next = if month == 12 {
            NaiveDate::from_ymd_opt(year + 1, 1, 1)?
        } else {
            NaiveDate::from_ymd_opt(year, month + 1, 1)?
        };
        Some(Self {
            start,
            end: next.pred_opt()?,
        })
    }

    fn year(year: i32) -> Option<Self> {
        Some(Self {
            start: NaiveDate::from_ymd_opt(year, 1, 1)?,
            end: NaiveDate::from_ymd_opt(year, 12, 31)?,
        })
    }

    /// Days between the spans; zero when they overlap.
    pub fn distance_days(&self, other: &DateSpan) -> i64 {
        if self.end < other.start {
            (other.start - self.end).num_days()
        } else if other.end < self.start {
            (self.start - other.end).num_days()
        } else {
            0
        }
    }
}

const DAY_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%d/%m/%Y", "%B %d, %Y", "%b %d, %Y", "%d %B %Y"];

/// Parse the date forms sources use, keeping their precision.
pub fn parse_date_span(text: &str) -> Option<DateSpan> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    // ISO timestamps
    let text = match text.find('T') {
        Some(10) => &text[..10],
        _ => text,
    };

    for format in DAY_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(text, format) {
            return Some(DateSpan::day(date));
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(&format!("{}-01", text), "%Y-%m-%d") {
        return DateSpan::month(date.year(), date.month());
    }
    for format in ["%d %B %Y", "%d %b %Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(&format!("1 {}", text), format) {
            return DateSpan::month(date.year(), date.month());
        }
    }

    if text.len() == 4 && text.chars().all(|c| c.is_ascii_digit()) {
        return text.parse().ok().and_then(DateSpan::year);
    }
    None
}
