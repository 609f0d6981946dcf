//! GitHub API error types

use thiserror::Error;

/// Error types for GitHub API operations
///
/// Expected absence (404 and friends) is not an error: it surfaces as
/// [`ApiOutcome::NotFound`](crate::github::ApiOutcome::NotFound).
#[derive(Debug, Error)]
pub enum GitHubError {
    /// Bad or revoked credentials (401)
    #[error("Unauthorized request: {url}")]
    Unauthorized { url: String },

    /// Server error or an HTTP condition GitHub does not document
    #[error("GitHub returned HTTP {status} for {url}")]
    Server { status: u16, url: String },

    /// Non-transient transport failure
    #[error("Request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// URL could not be built or parsed
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Client setup/configuration error
    #[error("Client setup failed: {0}")]
    ClientSetup(String),
}

impl GitHubError {
    /// Whether the error must abort the whole retrieval command.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, GitHubError::Unauthorized { .. })
    }
}

/// Convenience result alias for GitHub operations
pub type GitHubResult<T> = Result<T, GitHubError>;
