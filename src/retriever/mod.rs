//! Repository ingestion
//!
//! Every `retrieve_*` operation follows the same pattern: look in the
//! document store, fetch from the API only when absent (or when a refresh
//! is requested), tag the document with its owner/repo context, store it
//! and log. Running an operation twice never duplicates documents.

mod bound;
mod commits;
mod issues;
mod pull_requests;
mod repos;
mod users;
mod workflows;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde_json::Value;
use thiserror::Error;

use crate::config::CommitHandling;
use crate::db::{DbError, ProjectDatabase};
use crate::github::{GitHubClient, GitHubError};
use crate::store::{ResourceRepository, StoreError};

pub use bound::{BoundQuery, PageOrder};

#[derive(Debug, Error)]
pub enum RetrieveError {
    #[error(transparent)]
    GitHub(#[from] GitHubError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Db(#[from] DbError),
}

impl RetrieveError {
    /// Only bad credentials abort a retrieval.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, RetrieveError::GitHub(e) if e.is_fatal())
    }
}

pub type RetrieveResult<T> = Result<T, RetrieveError>;

#[derive(Clone)]
pub struct RepoRetriever {
    client: GitHubClient,
    docs: ResourceRepository,
    db: Option<Arc<dyn ProjectDatabase>>,
    pages_back: i64,
    commit_handling: CommitHandling,
}

impl RepoRetriever {
    pub fn new(client: GitHubClient, docs: ResourceRepository) -> Self {
        Self {
            client,
            docs,
            db: None,
            pages_back: 1000,
            commit_handling: CommitHandling::Full,
        }
    }

    /// Mirror workflows and runs into the relational store as well.
    #[must_use]
    pub fn with_project_db(mut self, db: Arc<dyn ProjectDatabase>) -> Self {
        self.db = Some(db);
        self
    }

    #[must_use]
    pub fn pages_back(mut self, pages: i64) -> Self {
        self.pages_back = pages;
        self
    }

    #[must_use]
    pub fn commit_handling(mut self, handling: CommitHandling) -> Self {
        self.commit_handling = handling;
        self
    }

    pub fn client(&self) -> &GitHubClient {
        &self.client
    }

    pub fn documents(&self) -> &ResourceRepository {
        &self.docs
    }

    /// Ingest everything known about one repository.
    ///
    /// Steps fail independently: a failed step is logged and the next one
    /// runs. Only an authentication failure stops the whole retrieval.
    pub async fn retrieve_full_repo(&self, owner: &str, repo: &str) -> RetrieveResult<()> {
        let Some(repo_doc) = settle("repo", self.retrieve_repo(owner, repo, false).await)?.flatten() else {
            warn!("Repo {owner}/{repo} does not exist");
            return Ok(());
        };
        let owner_login = repo_doc
            .get("owner")
            .and_then(|o| o.get("login"))
            .and_then(Value::as_str)
            .unwrap_or(owner)
            .to_string();
        settle("owner", self.retrieve_user_byusername(&owner_login).await)?;
        settle("languages", self.retrieve_languages(owner, repo).await)?;
        settle("topics", self.retrieve_topics(owner, repo).await)?;

        info!("Retrieving commits for {owner}/{repo}");
        settle(
            "commits",
            self.retrieve_commits(owner, repo, None, self.pages_back).await,
        )?;

        settle("labels", self.retrieve_repo_labels(owner, repo, false).await)?;

        info!("Retrieving pull requests for {owner}/{repo}");
        let pull_requests = settle("pull requests", self.retrieve_pull_requests(owner, repo, false).await)?
            .unwrap_or_default();
        for pr in &pull_requests {
            let Some(number) = pr.get("number").and_then(Value::as_i64) else {
                continue;
            };
            if let Some(commits) = settle(
                "pull request commits",
                self.retrieve_pull_req_commits(owner, repo, number).await,
            )? {
                for commit in &commits {
                    if let Some(sha) = commit.get("sha").and_then(Value::as_str) {
                        settle(
                            "pull request commit",
                            self.retrieve_pull_request_commit(pr, owner, repo, sha).await,
                        )?;
                    }
                }
            }
            settle(
                "pull request comments",
                self.retrieve_pull_req_comments(owner, repo, number).await,
            )?;
        }

        info!("Retrieving issues for {owner}/{repo}");
        let issues = settle("issues", self.retrieve_issues(owner, repo, false).await)?.unwrap_or_default();
        for issue in &issues {
            let Some(number) = issue.get("number").and_then(Value::as_i64) else {
                continue;
            };
            settle("issue events", self.retrieve_issue_events(owner, repo, number).await)?;
            settle("issue comments", self.retrieve_issue_comments(owner, repo, number).await)?;
            settle("issue labels", self.retrieve_issue_labels(owner, repo, number).await)?;
        }

        settle("events", self.get_repo_events(owner, repo).await)?;

        info!("Retrieving workflows for {owner}/{repo}");
        settle("workflows", self.retrieve_workflows(owner, repo).await)?;
        let stored = settle("stored workflows", self.stored_workflow_ids(owner, repo).await)?.unwrap_or_default();
        for workflow_id in stored {
            settle(
                "workflow runs",
                self.retrieve_workflow_runs(owner, repo, workflow_id).await,
            )?;
        }

        info!("Finished retrieving {owner}/{repo}");
        Ok(())
    }
}

/// Swallow a non-fatal step failure after logging it.
fn settle<T>(step: &str, result: RetrieveResult<T>) -> RetrieveResult<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            warn!("Retrieving {step} failed: {e}");
            Ok(None)
        }
    }
}

/// Add the `owner`/`repo` context fields to an API object.
pub(crate) fn tag(doc: &mut Value, owner: &str, repo: &str) {
    if let Some(map) = doc.as_object_mut() {
        map.insert("owner".to_string(), Value::from(owner));
        map.insert("repo".to_string(), Value::from(repo));
    }
}

/// `None` for null, `{}` and `[]` bodies.
pub(crate) fn non_empty(body: Option<Value>) -> Option<Value> {
    body.filter(|v| match v {
        Value::Null => false,
        Value::Object(map) => !map.is_empty(),
        Value::Array(items) => !items.is_empty(),
        _ => true,
    })
}

pub(crate) fn parse_time(doc: &Value, key: &str) -> Option<DateTime<Utc>> {
    doc.get(key)
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
}
