//! Web search backends.

pub mod rate_limited;
pub mod tavily;

pub use rate_limited::RateLimitedSearcher;
pub use tavily::TavilySearcher;
