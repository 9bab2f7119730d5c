//! Resolve: attach a registry identity to a company.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::error::{FilingsError, PipelineError, Result};
use crate::traits::{CompanyStore, FilingsClient};
use crate::types::{Company, CompanyId, RegistryId};

/// Outcome of resolving one company.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub company: Company,
    /// A registry identifier is known after resolution
    pub matched: bool,
}

impl Resolution {
    fn unmatched(company: &Company) -> Self {
        Self {
            company: company.clone(),
            matched: false,
        }
    }
}

pub struct ResolveStage {
    filings: Arc<dyn FilingsClient>,
    companies: Arc<dyn CompanyStore>,
    timeout: Duration,
    /// Ids handed out this run but possibly not committed yet
    claims: Mutex<HashMap<RegistryId, CompanyId>>,
}

impl ResolveStage {
    pub fn new(
        filings: Arc<dyn FilingsClient>,
        companies: Arc<dyn CompanyStore>,
        timeout: Duration,
    ) -> Self {
        Self {
            filings,
            companies,
            timeout,
            claims: Mutex::new(HashMap::new()),
        }
    }

    /// Look the company up in the registry unless it already has an id.
    ///
    /// No match is a successful resolution without an identifier. So is a
    /// match whose id already belongs to another company: one registry id
    /// maps to one company row.
    pub async fn run(&self, company: &Company) -> Result<Resolution> {
        if company.registry_id.is_some() {
            return Ok(Resolution {
                company: company.clone(),
                matched: true,
            });
        }

        let lookup = tokio::time::timeout(self.timeout, self.filings.lookup(&company.name))
            .await
            .map_err(|_| {
                PipelineError::TransientNetwork(format!(
                    "registry lookup timed out after {:?}",
                    self.timeout
                ))
            })?;

        match lookup {
            Ok(Some(found)) => {
                if let Some(owner) = self.owner(found.registry_id, company.id).await? {
                    warn!(
                        company = %company.name,
                        registry_id = %found.registry_id,
                        owner = %owner,
                        "Registry id already belongs to another company, resolving without it"
                    );
                    return Ok(Resolution::unmatched(company));
                }
                info!(
                    company = %company.name,
                    registry_id = %found.registry_id,
                    official_name = %found.official_name,
                    "Resolved company"
                );
                let mut resolved = company.clone().with_registry_id(found.registry_id);
                if resolved.official_name.is_none() && !found.official_name.is_empty() {
                    resolved = resolved.with_official_name(found.official_name);
                }
                resolved.updated_at = Utc::now();
                Ok(Resolution {
                    company: resolved,
                    matched: true,
                })
            }
            Ok(None) | Err(FilingsError::NotFound(_)) => {
                debug!(company = %company.name, "No registry match");
                Ok(Resolution::unmatched(company))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Who else holds `id`: a stored company's name, or the id of a company
    /// that claimed it earlier this run. Claims `id` for `company` when free.
    async fn owner(&self, id: RegistryId, company: CompanyId) -> Result<Option<String>> {
        if let Some(stored) = self.companies.find_by_registry_id(id).await? {
            if stored.id != company {
                return Ok(Some(stored.name));
            }
        }

        let mut claims = self.claims.lock().unwrap_or_else(|e| e.into_inner());
        match claims.entry(id) {
            Entry::Occupied(held) if *held.get() != company => Ok(Some(held.get().to_string())),
            Entry::Occupied(_) => Ok(None),
            Entry::Vacant(slot) => {
                slot.insert(company);
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::MemoryStore;
    use crate::testing::MockFilingsClient;
    use crate::types::CompanyInput;

    fn cik() -> RegistryId {
        RegistryId::parse("320193").unwrap()
    }

    fn stage(client: Arc<MockFilingsClient>) -> ResolveStage {
        ResolveStage::new(client, Arc::new(MemoryStore::new()), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn attaches_registry_id() {
        let client = MockFilingsClient::new().with_registry("Acme Inc", cik(), "ACME INC");
        let resolution = stage(Arc::new(client)).run(&Company::new("Acme Inc")).await.unwrap();
        assert!(resolution.matched);
        assert_eq!(resolution.company.registry_id.unwrap().padded(), "0000320193");
        assert_eq!(resolution.company.official_name.as_deref(), Some("ACME INC"));
    }

    #[tokio::test]
    async fn unknown_company_resolves_without_id() {
        let resolution = stage(Arc::new(MockFilingsClient::new()))
            .run(&Company::new("Nobody LLC"))
            .await
            .unwrap();
        assert!(!resolution.matched);
        assert!(resolution.company.registry_id.is_none());
    }

    #[tokio::test]
    async fn known_id_skips_lookup() {
        let client = Arc::new(MockFilingsClient::new());
        let company = Company::new("Acme").with_registry_id(RegistryId::parse("42").unwrap());

        stage(client.clone()).run(&company).await.unwrap();
        assert_eq!(client.lookup_count(), 0);
    }

    #[tokio::test]
    async fn unavailable_registry_is_transient() {
        let err = stage(Arc::new(MockFilingsClient::new().unavailable()))
            .run(&Company::new("Acme"))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::TransientNetwork(_)));
    }

    #[tokio::test]
    async fn id_owned_by_a_stored_company_is_not_reused() {
        let store = Arc::new(MemoryStore::new());
        store
            .upsert_company(&CompanyInput::new("Apple").with_registry_id("320193"))
            .await
            .unwrap();
        let client = MockFilingsClient::new().with_registry("Apple Hospitality", cik(), "APPLE INC");
        let stage = ResolveStage::new(Arc::new(client), store, Duration::from_secs(5));

        let resolution = stage.run(&Company::new("Apple Hospitality")).await.unwrap();
        assert!(!resolution.matched);
        assert!(resolution.company.registry_id.is_none());
    }

    #[tokio::test]
    async fn first_claim_in_a_run_wins() {
        let client = MockFilingsClient::new()
            .with_registry("Acme", cik(), "ACME INC")
            .with_registry("Acme Inc", cik(), "ACME INC");
        let stage = stage(Arc::new(client));

        let first = Company::new("Acme");
        assert!(stage.run(&first).await.unwrap().matched);
        // Resolving the same company again keeps its claim
        assert!(stage.run(&first).await.unwrap().matched);

        let second = stage.run(&Company::new("Acme Inc")).await.unwrap();
        assert!(!second.matched);
        assert!(second.company.registry_id.is_none());
    }
}
