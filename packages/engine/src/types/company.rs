//! Companies and their registry identity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

uuid_id!(
    /// Company primary key.
    CompanyId
);

/// A company tracked by the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Company {
    pub id: CompanyId,

    /// Unique, as loaded
    pub name: String,

    /// Filings-registry identifier (SEC CIK)
    pub registry_id: Option<RegistryId>,

    /// Registrant name as the registry spells it
    pub official_name: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Company {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: CompanyId::new(),
            name: name.into().trim().to_string(),
            registry_id: None,
            official_name: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_registry_id(mut self, id: RegistryId) -> Self {
        self.registry_id = Some(id);
        self
    }

    pub fn with_official_name(mut self, name: impl Into<String>) -> Self {
        self.official_name = Some(name.into());
        self
    }

    /// Case- and whitespace-insensitive identity key.
    pub fn name_key(&self) -> String {
        name_key(&self.name)
    }

    /// Name to use in search queries.
    pub fn display_name(&self) -> &str {
        &self.name
    }
}

/// Lowercased name with internal whitespace collapsed.
pub fn name_key(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Registry identifier, compared without leading zeros or punctuation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RegistryId(u64);

impl RegistryId {
    /// Parse "320193", "0000320193" or "CIK0000320193".
    pub fn parse(raw: &str) -> Option<Self> {
        let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
        digits.parse::<u64>().ok().filter(|n| *n > 0).map(Self)
    }

    /// Ten-digit zero-padded form.
    pub fn padded(&self) -> String {
        format!("{:010}", self.0)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for RegistryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.padded())
    }
}

impl TryFrom<String> for RegistryId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        RegistryId::parse(&value).ok_or_else(|| format!("invalid registry id: {:?}", value))
    }
}

impl From<RegistryId> for String {
    fn from(id: RegistryId) -> Self {
        id.padded()
    }
}

/// A company as it enters the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyInput {
    pub name: String,
    pub registry_id: Option<String>,
}

impl CompanyInput {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            registry_id: None,
        }
    }

    pub fn with_registry_id(mut self, id: impl Into<String>) -> Self {
        self.registry_id = Some(id.into());
        self
    }
}
