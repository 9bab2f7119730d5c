//! SEC EDGAR REST client.
//!
//! Covers the three endpoints the funding pipeline needs: the company ticker
//! table (name → CIK), the submissions index, and Form D primary documents.
//!
//! # Example
//!
//! ```rust,ignore
//! use edgar_client::EdgarClient;
//!
//! let client = EdgarClient::new(vec!["Research Bot research@example.com".into()])?;
//! if let Some(company) = client.lookup_company("Acme Robotics").await? {
//!     let submissions = client.submissions(&company.cik).await?;
//!     for filing in submissions.filings.recent.of_forms(&["D", "D/A"]) {
//!         let form = client.form_d(&company.cik, &filing.accession_number).await?;
//!         println!("{:?}", form.total_amount_sold);
//!     }
//! }
//! ```

pub mod agents;
pub mod error;
pub mod form_d;
pub mod types;

pub use agents::UserAgentPool;
pub use error::{EdgarError, Result};
pub use form_d::parse_form_d;
pub use types::{CompanyMatch, FilingRef, FormD, RecentFilings, Submissions, TickerEntry};

use std::collections::HashMap;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tokio::sync::OnceCell;

const WWW_BASE_URL: &str = "https://www.sec.gov";
const DATA_BASE_URL: &str = "https://data.sec.gov";

pub struct EdgarClient {
    client: reqwest::Client,
    agents: UserAgentPool,
    www_base: String,
    data_base: String,
    tickers: OnceCell<Vec<TickerEntry>>,
}

impl EdgarClient {
    pub fn new(user_agents: Vec<String>) -> Result<Self> {
        Self::with_timeout(user_agents, Duration::from_secs(30))
    }

    pub fn with_timeout(user_agents: Vec<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            agents: UserAgentPool::new(user_agents)?,
            www_base: WWW_BASE_URL.to_string(),
            data_base: DATA_BASE_URL.to_string(),
            tickers: OnceCell::new(),
        })
    }

    /// Point both hosts elsewhere (mirrors, tests).
    pub fn with_base_urls(mut self, www: impl Into<String>, data: impl Into<String>) -> Self {
        self.www_base = www.into().trim_end_matches('/').to_string();
        self.data_base = data.into().trim_end_matches('/').to_string();
        self
    }

    /// The full ticker table, fetched once per client.
    pub async fn company_tickers(&self) -> Result<&[TickerEntry]> {
        let entries = self
            .tickers
            .get_or_try_init(|| async {
                let url = format!("{}/files/company_tickers.json", self.www_base);
                let table: HashMap<String, TickerEntry> = self.get_json(&url).await?;
                let mut entries: Vec<TickerEntry> = table.into_values().collect();
                entries.sort_by_key(|e| e.cik_str);
                tracing::debug!(count = entries.len(), "Loaded EDGAR ticker table");
                Ok::<_, EdgarError>(entries)
            })
            .await?;
        Ok(entries.as_slice())
    }

    /// Find a registrant by company name.
    pub async fn lookup_company(&self, name: &str) -> Result<Option<CompanyMatch>> {
        let entries = self.company_tickers().await?;
        Ok(match_company(entries, name))
    }

    pub async fn submissions(&self, cik: &str) -> Result<Submissions> {
        let url = format!("{}/submissions/CIK{}.json", self.data_base, pad_cik(cik)?);
        self.get_json(&url).await
    }

    pub fn form_d_url(&self, cik: &str, accession_number: &str) -> Result<String> {
        let cik_num = cik_number(cik)?;
        let accession: String = accession_number.chars().filter(|c| *c != '-').collect();
        Ok(format!(
            "{}/Archives/edgar/data/{}/{}/primary_doc.xml",
            self.www_base, cik_num, accession
        ))
    }

    pub async fn form_d(&self, cik: &str, accession_number: &str) -> Result<FormD> {
        let url = self.form_d_url(cik, accession_number)?;
        let body = self.get_text(&url).await?;
        parse_form_d(&body)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let body = self.get_text(url).await?;
        serde_json::from_str(&body).map_err(|e| EdgarError::Api {
            status: 200,
            message: format!("invalid JSON from {}: {}", url, e),
        })
    }

    async fn get_text(&self, url: &str) -> Result<String> {
        let agent = self.agents.acquire().await;
        let resp = self
            .client
            .get(url)
            .header(reqwest::header::USER_AGENT, agent)
            .send()
            .await?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(EdgarError::NotFound(url.to_string()));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            tracing::warn!(status = %status, url, "EDGAR request failed");
            return Err(EdgarError::Api {
                status: status.as_u16(),
                message: body,
            });
        }
        Ok(resp.text().await?)
    }
}

/// Ten-digit zero-padded CIK.
pub fn pad_cik(cik: &str) -> Result<String> {
    Ok(format!("{:010}", cik_number(cik)?))
}

fn cik_number(cik: &str) -> Result<u64> {
    let digits: String = cik.chars().filter(|c| c.is_ascii_digit()).collect();
    digits
        .parse::<u64>()
        .map_err(|_| EdgarError::Config(format!("invalid CIK: {:?}", cik)))
}

const ENTITY_SUFFIXES: &[&str] = &[
    "inc", "incorporated", "corp", "corporation", "co", "company", "ltd", "limited", "llc",
    "plc", "lp", "sa", "ag", "nv",
];

fn normalize_name(name: &str) -> String {
    let lowered: String = name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    let mut words: Vec<&str> = lowered.split_whitespace().collect();
    while words.len() > 1 && words.last().is_some_and(|w| ENTITY_SUFFIXES.contains(w)) {
        words.pop();
    }
    words.join(" ")
}

/// Exact normalized title match wins; otherwise the shortest title that
/// contains the query (or is contained by it).
fn match_company(entries: &[TickerEntry], name: &str) -> Option<CompanyMatch> {
    let query = normalize_name(name);
    if query.is_empty() {
        return None;
    }

    let to_match = |e: &TickerEntry| CompanyMatch {
        cik: format!("{:010}", e.cik_str),
        title: e.title.clone(),
        ticker: e.ticker.clone(),
    };

    if let Some(exact) = entries.iter().find(|e| normalize_name(&e.title) == query) {
        return Some(to_match(exact));
    }

    entries
        .iter()
        .filter(|e| {
            let title = normalize_name(&e.title);
            !title.is_empty() && (title.contains(&query) || query.contains(&title))
        })
        .min_by_key(|e| (e.title.len(), e.cik_str))
        .map(to_match)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(cik: u64, ticker: &str, title: &str) -> TickerEntry {
        TickerEntry {
            cik_str: cik,
            ticker: ticker.into(),
            title: title.into(),
        }
    }

    #[test]
    fn pads_cik_to_ten_digits() {
        assert_eq!(pad_cik("320193").unwrap(), "0000320193");
        assert_eq!(pad_cik("CIK0000320193").unwrap(), "0000320193");
        assert!(pad_cik("abc").is_err());
    }

    #[test]
    fn exact_match_beats_containment() {
        let entries = vec![
            entry(1, "ACMX", "Acme Robotics Holdings Corp"),
            entry(2, "ACME", "ACME Robotics, Inc."),
        ];
        let found = match_company(&entries, "acme robotics").unwrap();
        assert_eq!(found.cik, "0000000002");
    }

    #[test]
    fn containment_prefers_shortest_title() {
        let entries = vec![
            entry(10, "BIGW", "Widget Works International Group"),
            entry(11, "WW", "Widget Works Group"),
        ];
        let found = match_company(&entries, "Widget Works").unwrap();
        assert_eq!(found.ticker, "WW");
        assert!(match_company(&entries, "Nothing Similar").is_none());
    }

    #[test]
    fn form_d_url_strips_dashes_and_padding() {
        let client = EdgarClient::new(vec!["bot bot@example.com".into()]).unwrap();
        let url = client
            .form_d_url("0001234567", "0001234567-24-000001")
            .unwrap();
        assert_eq!(
            url,
            "https://www.sec.gov/Archives/edgar/data/1234567/000123456724000001/primary_doc.xml"
        );
    }

    #[test]
    fn recent_filings_filter_by_form() {
        let recent = RecentFilings {
            accession_number: vec!["a-1".into(), "a-2".into(), "a-3".into()],
            filing_date: vec!["2024-03-01".into(), "2024-02-01".into(), "2023-01-01".into()],
            form: vec!["D".into(), "10-K".into(), "D/A".into()],
            primary_document: vec![],
        };
        let filings = recent.of_forms(&["D", "D/A"]);
        assert_eq!(filings.len(), 2);
        assert_eq!(filings[1].accession_number, "a-3");
        assert_eq!(filings[1].primary_document, None);
    }
}
