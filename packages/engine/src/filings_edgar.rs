//! `FilingsClient` over SEC EDGAR.

use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use edgar_client::{EdgarClient, EdgarError, FilingRef};
use tracing::{debug, warn};

use crate::config::FilingsConfig;
use crate::error::FilingsError;
use crate::traits::{FilingDocument, FilingsClient, RegistryMatch};
use crate::types::RegistryId;

/// Form D documents fetched at once per company; agent pacing still applies.
const DOCUMENT_CONCURRENCY: usize = 4;

pub struct EdgarFilings {
    client: EdgarClient,
    form_types: Vec<String>,
    max_filings: usize,
}

impl EdgarFilings {
    pub fn new(client: EdgarClient, config: &FilingsConfig) -> Self {
        Self {
            client,
            form_types: config.form_types.clone(),
            max_filings: config.max_filings,
        }
    }

    /// Client rotating over `agents`, each paced separately.
    pub fn from_user_agents(agents: Vec<String>, config: &FilingsConfig) -> Result<Self, FilingsError> {
        let client = EdgarClient::with_timeout(agents, config.timeout()).map_err(filings_error)?;
        Ok(Self::new(client, config))
    }

    async fn document(&self, cik: &str, filing: &FilingRef) -> Result<FilingDocument, FilingsError> {
        let mut doc = FilingDocument::new(&filing.accession_number, &filing.filing_date);
        doc.form_type = filing.form.clone();
        doc.is_amendment = filing.form.ends_with("/A");
        doc.url = self.client.form_d_url(cik, &filing.accession_number).ok();

        match self.client.form_d(cik, &filing.accession_number).await {
            Ok(form) => {
                doc.issuer_name = form.issuer_name;
                doc.date_of_first_sale = form.date_of_first_sale;
                doc.total_offering_amount = form.total_offering_amount;
                doc.total_amount_sold = form.total_amount_sold;
                doc.industry_group = form.industry_group;
                doc.investor_count = form.investor_count;
                doc.is_amendment |= form.is_amendment;
            }
            // A filing without a readable primary document still dates a financing.
            Err(e @ (EdgarError::NotFound(_) | EdgarError::Xml(_))) => {
                warn!(accession = %filing.accession_number, error = %e, "Form D document unreadable");
            }
            Err(e) => return Err(filings_error(e)),
        }
        Ok(doc)
    }
}

fn filings_error(e: EdgarError) -> FilingsError {
    match e {
        EdgarError::NotFound(what) => FilingsError::NotFound(what),
        other => FilingsError::Unavailable(other.to_string()),
    }
}

#[async_trait]
impl FilingsClient for EdgarFilings {
    async fn lookup(&self, name: &str) -> Result<Option<RegistryMatch>, FilingsError> {
        let found = self.client.lookup_company(name).await.map_err(filings_error)?;
        Ok(found.and_then(|m| {
            RegistryId::parse(&m.cik).map(|registry_id| RegistryMatch {
                registry_id,
                official_name: m.title,
            })
        }))
    }

    async fn fetch_filings(&self, registry_id: &RegistryId) -> Result<Vec<FilingDocument>, FilingsError> {
        let cik = registry_id.padded();
        let submissions = self.client.submissions(&cik).await.map_err(filings_error)?;
        let forms: Vec<&str> = self.form_types.iter().map(String::as_str).collect();
        let refs = submissions.filings.recent.of_forms(&forms);
        debug!(cik = %cik, filings = refs.len(), "EDGAR submissions loaded");

        let documents: Vec<_> = refs
            .iter()
            .take(self.max_filings)
            .map(|filing| self.document(&cik, filing))
            .collect();
        stream::iter(documents)
            .buffered(DOCUMENT_CONCURRENCY)
            .try_collect()
            .await
    }
}
