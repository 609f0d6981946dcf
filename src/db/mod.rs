//! Relational project database
//!
//! Read-mostly view over the GHTorrent-shaped tables (users, projects,
//! commits, pull requests, comments). The only writes are workflow and
//! workflow-run mirroring.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

pub mod sqlite;

pub use sqlite::SqliteProjectDb;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("Invalid database URL: {0}")]
    InvalidUrl(String),
}

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug, Clone, PartialEq)]
pub struct Project {
    pub id: i64,
    pub owner: String,
    pub name: String,
    pub language: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommitRow {
    pub id: i64,
    pub sha: String,
    pub author_id: Option<i64>,
    pub committer_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Pull request a commit belongs to, with its `opened` timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct PullRequestLink {
    pub pr_id: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowRow {
    pub github_id: i64,
    pub project_id: i64,
    pub name: String,
    pub path: String,
    pub state: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowRunRow {
    pub github_id: i64,
    /// Local `workflows.id`
    pub workflow_id: i64,
    pub project_id: i64,
    pub name: Option<String>,
    pub head_branch: Option<String>,
    pub head_sha: String,
    pub run_number: i64,
    pub status: Option<String>,
    pub conclusion: Option<String>,
    pub event: Option<String>,
    pub created_at: DateTime<Utc>,
    pub run_started_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub actor_login: Option<String>,
    pub triggering_actor_login: Option<String>,
}

#[async_trait]
pub trait ProjectDatabase: Send + Sync {
    /// Project owned by the user `owner` and named `repo`.
    async fn find_project(&self, owner: &str, repo: &str) -> DbResult<Option<Project>>;

    /// For every `(head_branch, head_sha)` the run with the latest `run_started_at`.
    async fn latest_workflow_runs(&self, project_id: i64) -> DbResult<Vec<WorkflowRunRow>>;

    async fn find_commit(&self, sha: &str) -> DbResult<Option<CommitRow>>;

    /// Login of the non-fake user with this email.
    async fn login_by_email(&self, email: &str) -> DbResult<Option<String>>;

    /// Login of the non-fake user with this id.
    async fn login_by_id(&self, user_id: i64) -> DbResult<Option<String>>;

    /// Distinct non-fake commit authors on the project between `from` and `to`.
    async fn main_team(
        &self,
        owner: &str,
        repo: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DbResult<Vec<String>>;

    async fn pr_info_for_commit(&self, sha: &str, project_id: i64) -> DbResult<Option<PullRequestLink>>;

    /// Code review comments on the pull request between `from` and `to`.
    async fn num_pr_comments(&self, pr_id: i64, from: DateTime<Utc>, to: DateTime<Utc>) -> DbResult<i64>;

    /// Discussion comments on the pull request's issue between `from` and `to`.
    async fn num_issue_comments(&self, pr_id: i64, from: DateTime<Utc>, to: DateTime<Utc>) -> DbResult<i64>;

    async fn num_commit_comments(&self, owner: &str, repo: &str, sha: &str) -> DbResult<i64>;

    /// Insert or update by `github_id`, returning the local id.
    async fn upsert_workflow(&self, workflow: &WorkflowRow) -> DbResult<i64>;

    async fn workflow_id_by_github_id(&self, github_id: i64) -> DbResult<Option<i64>>;

    /// Insert or update by `github_id`, returning the local id.
    async fn upsert_workflow_run(&self, run: &WorkflowRunRow) -> DbResult<i64>;
}
