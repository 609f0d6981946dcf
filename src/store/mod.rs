//! Document store
//!
//! JSON documents grouped into named collections. Lookups are exact,
//! type-sensitive equality over flat or dotted field paths; callers that
//! need id coercion go through [`ResourceRepository`].
//!
//! | Backend | Use |
//! |---------|-----|
//! | [`SqliteDocumentStore`] | persistent store |
//! | [`MemoryDocumentStore`] | tests, short-lived runs |
//! | [`NoopDocumentStore`] | dry runs: discards writes, reads nothing |

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

pub mod memory;
pub mod noop;
pub mod repository;
pub mod sqlite;

pub use memory::MemoryDocumentStore;
pub use noop::NoopDocumentStore;
pub use repository::ResourceRepository;
pub use sqlite::SqliteDocumentStore;

/// Collection names
pub mod collections {
    pub const USERS: &str = "users";
    pub const FOLLOWERS: &str = "followers";
    pub const REPOS: &str = "repos";
    pub const COMMITS: &str = "commits";
    pub const COMMIT_COMMENTS: &str = "commit_comments";
    pub const WATCHERS: &str = "watchers";
    pub const FORKS: &str = "forks";
    pub const PULL_REQUESTS: &str = "pull_requests";
    pub const PULL_REQUEST_COMMITS: &str = "pull_request_commits";
    pub const PULL_REQUEST_COMMENTS: &str = "pull_request_comments";
    pub const ISSUES: &str = "issues";
    pub const ISSUE_EVENTS: &str = "issue_events";
    pub const ISSUE_COMMENTS: &str = "issue_comments";
    pub const REPO_LABELS: &str = "repo_labels";
    pub const TOPICS: &str = "topics";
    pub const EVENTS: &str = "events";
    pub const WORKFLOWS: &str = "workflows";
    pub const WORKFLOW_RUNS: &str = "workflow_runs";
    pub const CI_BUILDS: &str = "ci_builds";
    pub const RETRIEVE_REQUESTS: &str = "retrieve_requests";
}

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store backend error: {0}")]
    Backend(#[from] sqlx::Error),

    #[error("Document serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unsupported document store: {0}")]
    Unsupported(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A stored document and its store-assigned id.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: i64,
    pub body: Value,
}

/// Conjunction of `path == value` conditions. Paths may be dotted (`owner.login`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selector {
    fields: Vec<(String, Value)>,
}

impl Selector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn eq(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        let path = path.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(p, _)| *p == path) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((path, value)),
        }
        self
    }

    pub fn fields(&self) -> &[(String, Value)] {
        &self.fields
    }

    /// Whether `doc` satisfies every condition.
    #[must_use]
    pub fn matches(&self, doc: &Value) -> bool {
        self.fields.iter().all(|(path, expected)| {
            match lookup_path(doc, path) {
                Some(actual) => actual == expected,
                None => expected.is_null(),
            }
        })
    }
}

/// Resolve a dotted path inside a JSON document.
pub fn lookup_path<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(doc, |node, key| node.get(key))
}

/// Shallow merge of `update` into `base`; fields in `update` win.
pub(crate) fn merge_fields(base: &mut Value, update: &Value) {
    match (base.as_object_mut(), update.as_object()) {
        (Some(target), Some(fields)) => {
            for (k, v) in fields {
                target.insert(k.clone(), v.clone());
            }
        }
        _ => *base = update.clone(),
    }
}

/// Document persistence contract.
///
/// `store` never deduplicates; idempotency is the caller's job.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn find(&self, collection: &str, selector: &Selector) -> StoreResult<Vec<Document>>;

    /// Append a document, returning its new id.
    async fn store(&self, collection: &str, doc: &Value) -> StoreResult<i64>;

    /// Overwrite the fields of the first match, keeping its id; insert when
    /// nothing matches.
    async fn upsert(&self, collection: &str, selector: &Selector, doc: &Value) -> StoreResult<i64>;

    async fn count(&self, collection: &str, selector: &Selector) -> StoreResult<usize> {
        Ok(self.find(collection, selector).await?.len())
    }
}

/// Open a backend from its settings string: `memory`, `noop` or a `sqlite:` URL.
pub async fn open_document_store(url: &str) -> StoreResult<Arc<dyn DocumentStore>> {
    match url {
        "memory" => Ok(Arc::new(MemoryDocumentStore::new())),
        "noop" => Ok(Arc::new(NoopDocumentStore)),
        u if u.starts_with("sqlite:") => Ok(Arc::new(SqliteDocumentStore::connect(u).await?)),
        other => Err(StoreError::Unsupported(other.to_string())),
    }
}
