//! EDGAR response types.

use serde::{Deserialize, Serialize};

/// One row of `company_tickers.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct TickerEntry {
    pub cik_str: u64,
    pub ticker: String,
    pub title: String,
}

/// A registrant matched by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyMatch {
    /// Zero-padded to ten digits
    pub cik: String,
    pub title: String,
    pub ticker: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Submissions {
    pub cik: String,
    #[serde(default)]
    pub name: String,
    pub filings: SubmissionFilings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmissionFilings {
    pub recent: RecentFilings,
}

/// Column-oriented list of the registrant's most recent filings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentFilings {
    #[serde(default)]
    pub accession_number: Vec<String>,
    #[serde(default)]
    pub filing_date: Vec<String>,
    #[serde(default)]
    pub form: Vec<String>,
    #[serde(default)]
    pub primary_document: Vec<String>,
}

impl RecentFilings {
    /// Rows whose form type is one of `forms`, newest first as EDGAR lists them.
    pub fn of_forms(&self, forms: &[&str]) -> Vec<FilingRef> {
        self.form
            .iter()
            .enumerate()
            .filter(|(_, form)| forms.iter().any(|f| f.eq_ignore_ascii_case(form)))
            .filter_map(|(i, form)| {
                Some(FilingRef {
                    accession_number: self.accession_number.get(i)?.clone(),
                    filing_date: self.filing_date.get(i).cloned().unwrap_or_default(),
                    form: form.clone(),
                    primary_document: self.primary_document.get(i).cloned(),
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilingRef {
    pub accession_number: String,
    pub filing_date: String,
    pub form: String,
    pub primary_document: Option<String>,
}

/// Fields of a Form D notice of exempt offering.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormD {
    pub issuer_name: Option<String>,
    pub issuer_cik: Option<String>,
    pub industry_group: Option<String>,
    pub is_amendment: bool,
    pub date_of_first_sale: Option<String>,
    /// `None` when the document says "Indefinite"
    pub total_offering_amount: Option<f64>,
    pub total_amount_sold: Option<f64>,
    pub total_remaining: Option<f64>,
    pub investor_count: Option<u32>,
}
