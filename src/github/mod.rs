//! GitHub REST access
//!
//! Authenticated requests, shared quota tracking and `link`-header
//! pagination. Everything above this layer sees only parsed JSON.

pub mod client;
pub mod error;
pub mod pagination;
pub mod rate_limiter;

// Re-export client types
pub use client::{ApiOutcome, GitHubClient, GitHubClientBuilder, RawResponse};

// Re-export error types
pub use error::{GitHubError, GitHubResult};

pub use pagination::{PageWalk, PagedResult, ensure_per_page, parse_links};
pub use rate_limiter::{RateLimiter, RateState};
