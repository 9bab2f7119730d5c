//! Regulatory filings client.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::FilingsError;
use crate::types::RegistryId;

/// A registry entry matched by company name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryMatch {
    pub registry_id: RegistryId,
    pub official_name: String,
}

/// One filing, reduced to the fields that describe a financing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilingDocument {
    pub accession_number: String,
    pub form_type: String,
    pub filing_date: String,
    pub url: Option<String>,
    pub issuer_name: Option<String>,
    pub date_of_first_sale: Option<String>,
    pub total_offering_amount: Option<f64>,
    pub total_amount_sold: Option<f64>,
    pub industry_group: Option<String>,
    pub investor_count: Option<u32>,
    pub is_amendment: bool,
}

impl FilingDocument {
    pub fn new(accession_number: impl Into<String>, filing_date: impl Into<String>) -> Self {
        Self {
            accession_number: accession_number.into(),
            form_type: "D".to_string(),
            filing_date: filing_date.into(),
            ..Default::default()
        }
    }

    pub fn with_offering_amount(mut self, amount: f64) -> Self {
        self.total_offering_amount = Some(amount);
        self
    }

    pub fn with_amount_sold(mut self, amount: f64) -> Self {
        self.total_amount_sold = Some(amount);
        self
    }

    pub fn with_first_sale(mut self, date: impl Into<String>) -> Self {
        self.date_of_first_sale = Some(date.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }
}

#[async_trait]
pub trait FilingsClient: Send + Sync {
    /// Resolve a company name to a registry entry.
    async fn lookup(&self, _name: &str) -> Result<Option<RegistryMatch>, FilingsError> {
        Ok(None)
    }

    /// Filing documents for a registrant.
    async fn fetch_filings(&self, registry_id: &RegistryId) -> Result<Vec<FilingDocument>, FilingsError>;
}
