//! Filings-Collect: turn regulatory filings into high-confidence candidates.

use std::sync::Arc;

use tracing::{debug, info};

use crate::config::FilingsConfig;
use crate::error::{FilingsError, PipelineError, Result};
use crate::traits::{FilingDocument, FilingsClient};
use crate::types::{
    Company, CompanyId, Confidence, FundingRound, RoundCandidate, Source, SourceType,
};

use super::StageReport;

pub struct FilingsStage {
    client: Arc<dyn FilingsClient>,
    config: FilingsConfig,
}

impl FilingsStage {
    pub fn new(client: Arc<dyn FilingsClient>, config: FilingsConfig) -> Self {
        Self { client, config }
    }

    pub async fn run(&self, company: &Company) -> Result<StageReport> {
        let Some(registry_id) = company.registry_id.as_ref() else {
            debug!(company = %company.name, "No registry id, skipping filings");
            return Ok(StageReport::empty().with_note("no registry identifier"));
        };

        let fetched = tokio::time::timeout(self.config.timeout(), self.client.fetch_filings(registry_id))
            .await
            .map_err(|_| {
                PipelineError::TransientNetwork(format!(
                    "filings fetch timed out after {:?}",
                    self.config.timeout()
                ))
            })?;

        let documents = match fetched {
            Ok(docs) => docs,
            Err(FilingsError::NotFound(what)) => {
                debug!(company = %company.name, %what, "No filings on record");
                return Ok(StageReport::empty().with_note(format!("no filings: {}", what)));
            }
            Err(e) => return Err(e.into()),
        };

        let candidates: Vec<RoundCandidate> = documents
            .iter()
            .filter(|d| self.accepts(&d.form_type))
            .take(self.config.max_filings)
            .map(|d| filing_candidate(company.id, company.display_name(), d))
            .collect();

        info!(
            company = %company.name,
            filings = documents.len(),
            candidates = candidates.len(),
            "Collected filings"
        );
        Ok(StageReport {
            candidates,
            notes: Vec::new(),
        })
    }

    fn accepts(&self, form_type: &str) -> bool {
        self.config
            .form_types
            .iter()
            .any(|f| f.eq_ignore_ascii_case(form_type))
    }
}

fn describe(doc: &FilingDocument) -> String {
    let mut parts = Vec::new();
    if let Some(offered) = doc.total_offering_amount {
        parts.push(format!("Total offering: ${:.0}", offered));
    }
    if let Some(sold) = doc.total_amount_sold {
        parts.push(format!("Amount sold: ${:.0}", sold));
    }
    if let Some(first) = &doc.date_of_first_sale {
        parts.push(format!("First sale: {}", first));
    }
    if let Some(industry) = &doc.industry_group {
        parts.push(format!("Industry: {}", industry));
    }
    if let Some(count) = doc.investor_count {
        parts.push(format!("Investors: {}", count));
    }
    parts.join(", ")
}

/// Map one filing to a candidate.
///
/// Amount is the amount sold when positive, else the offering amount. Date
/// is the first-sale date, else the filing date.
pub fn filing_candidate(company_id: CompanyId, company_name: &str, doc: &FilingDocument) -> RoundCandidate {
    let amount = doc
        .total_amount_sold
        .filter(|v| *v > 0.0)
        .or(doc.total_offering_amount);
    let date = doc
        .date_of_first_sale
        .clone()
        .filter(|d| !d.trim().is_empty())
        .or_else(|| Some(doc.filing_date.clone()).filter(|d| !d.trim().is_empty()));

    let mut notes = format!(
        "SEC Form {} filing (Accession: {})",
        doc.form_type, doc.accession_number
    );
    if doc.is_amendment {
        notes.push_str(", amendment");
    }

    let mut round = FundingRound::new(company_id, SourceType::Filing, Confidence::High)
        .with_notes(notes)
        .with_raw_payload(serde_json::to_value(doc).unwrap_or_default());
    round.announced_on = date;
    round.amount_raised = amount;
    if let Some(url) = &doc.url {
        round = round.with_source_url(url.clone());
    }

    let issuer = doc.issuer_name.as_deref().unwrap_or(company_name);
    let mut source = Source::new(round.id, SourceType::Filing)
        .with_title(format!("Form {} - {} ({})", doc.form_type, issuer, doc.filing_date))
        .with_snippet(describe(doc))
        .with_confidence(Confidence::High);
    if let Some(url) = &doc.url {
        source = source.with_url(url.clone());
    }

    RoundCandidate::new(round).with_source(source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockFilingsClient;
    use crate::types::RegistryId;

    fn stage(client: MockFilingsClient) -> FilingsStage {
        FilingsStage::new(Arc::new(client), FilingsConfig::default())
    }

    #[test]
    fn prefers_amount_sold() {
        let doc = FilingDocument::new("0001-24-000001", "2024-03-05")
            .with_offering_amount(10_000_000.0)
            .with_amount_sold(5_000_000.0)
            .with_first_sale("2024-03-01");
        let candidate = filing_candidate(CompanyId::new(), "Acme", &doc);

        assert_eq!(candidate.round.amount_raised, Some(5_000_000.0));
        assert_eq!(candidate.round.announced_on.as_deref(), Some("2024-03-01"));
        assert_eq!(candidate.round.confidence, Confidence::High);
        assert_eq!(candidate.round.source_type, SourceType::Filing);
        assert!(candidate.round.notes.as_deref().unwrap().contains("0001-24-000001"));
        assert_eq!(candidate.sources.len(), 1);
    }

    #[test]
    fn falls_back_to_offering_and_filing_date() {
        let doc = FilingDocument::new("0001-24-000002", "2024-06-10")
            .with_offering_amount(2_500_000.0)
            .with_amount_sold(0.0);
        let candidate = filing_candidate(CompanyId::new(), "Acme", &doc);
        assert_eq!(candidate.round.amount_raised, Some(2_500_000.0));
        assert_eq!(candidate.round.announced_on.as_deref(), Some("2024-06-10"));
    }

    #[tokio::test]
    async fn no_registry_id_yields_nothing() {
        let report = stage(MockFilingsClient::new()).run(&Company::new("Acme")).await.unwrap();
        assert!(report.candidates.is_empty());
    }

    #[tokio::test]
    async fn collects_documents_for_registry_id() {
        let id = RegistryId::parse("1234").unwrap();
        let client = MockFilingsClient::new().with_filings(
            id,
            vec![
                FilingDocument::new("a", "2023-01-01").with_offering_amount(1e6),
                FilingDocument::new("b", "2024-01-01").with_offering_amount(2e6),
            ],
        );
        let company = Company::new("Acme").with_registry_id(id);
        let report = stage(client).run(&company).await.unwrap();
        assert_eq!(report.rounds_found(), 2);
    }

    #[tokio::test]
    async fn unavailable_client_is_transient() {
        let id = RegistryId::parse("1234").unwrap();
        let company = Company::new("Acme").with_registry_id(id);
        let err = stage(MockFilingsClient::new().unavailable()).run(&company).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
