//! `ci_harvest` - GitHub repository mirroring and CI build-metrics extraction
//!
//! Two halves share one crate: the retriever walks the GitHub REST API
//! (rate limited, `link`-paginated) and stores what it finds in a document
//! store without ever duplicating a document; the extractor joins a local
//! clone, the relational project database and the stored documents into
//! one metrics record per workflow run.

// Module declarations
pub mod config;
pub mod db;
pub mod extractor;
pub mod git;
pub mod github;
pub mod jobs;
pub mod language;
pub mod retriever;
pub mod runtime;
pub mod shutdown;
pub mod store;

// Re-export runtime types
pub use runtime::{AsyncTask, TaskError};

// Re-export GitHub client types
pub use github::{ApiOutcome, GitHubClient, GitHubClientBuilder, PageWalk, PagedResult, RateLimiter};

// Re-export GitHub error types
pub use github::{GitHubError, GitHubResult};

pub use config::{CommitHandling, ConfigError, Settings};
pub use db::{ProjectDatabase, SqliteProjectDb};
pub use extractor::{
    BuildMetricsExtractor, BuildMetricsRecord, BuildOutcome, ExtractError, ExtractionSummary,
    StrippedCache, SummaryStatus,
};
pub use git::{GitError, GitHistoryWalker, LocalRepo};
pub use jobs::{Pipeline, RequestStatus, RequestTracker, StatusRecord, parse_github_url};
pub use language::LanguageProfile;
pub use retriever::{RepoRetriever, RetrieveError};
pub use shutdown::{ShutdownFlag, install_ctrl_c_handler};
pub use store::{DocumentStore, ResourceRepository, Selector, StoreError, open_document_store};
