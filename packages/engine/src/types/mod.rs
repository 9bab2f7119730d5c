//! Domain types for the funding pipeline.

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord,
            serde::Serialize, serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub uuid::Uuid);

        impl $name {
            /// Time-ordered id, generated client side.
            pub fn new() -> Self {
                Self(uuid::Uuid::now_v7())
            }

            pub fn as_uuid(&self) -> &uuid::Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.0.fmt(f)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                uuid::Uuid::parse_str(s).map(Self)
            }
        }
    };
}

pub mod company;
pub mod round;
pub mod stats;
pub mod status;
pub mod usage;

pub use company::{name_key, Company, CompanyId, CompanyInput, RegistryId};
pub use round::{Confidence, FundingRound, RoundCandidate, RoundId, Source, SourceId, SourceType};
pub use stats::{CompanyFailure, RunSummary, StageProgress, Statistics};
pub use status::{CheckpointState, ProcessingStatus, Stage};
pub use usage::{CallOutcome, ProviderUsageRecord, UsageEvent};
