//! Tests for workflow mirroring when the project database rejects a write.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ci_harvest::db::{
    CommitRow, DbError, DbResult, Project, ProjectDatabase, PullRequestLink, WorkflowRow, WorkflowRunRow,
};
use ci_harvest::store::MemoryDocumentStore;
use ci_harvest::store::collections::{COMMITS, WORKFLOW_RUNS, WORKFLOWS};
use ci_harvest::{GitHubClient, RepoRetriever, ResourceRepository, Selector, SqliteProjectDb};
use mockito::{Matcher, Mock, Server};
use serde_json::{Value, json};

/// Delegates to SQLite but fails the first `fail_workflows` workflow
/// upserts and the first `fail_runs` run upserts.
struct FlakyDb {
    inner: SqliteProjectDb,
    fail_workflows: AtomicUsize,
    fail_runs: AtomicUsize,
}

impl FlakyDb {
    async fn new(fail_workflows: usize, fail_runs: usize) -> Self {
        let inner = SqliteProjectDb::connect("sqlite::memory:").await.unwrap();
        sqlx::query("INSERT INTO users (id, login) VALUES (9, 'o')")
            .execute(inner.pool())
            .await
            .unwrap();
        sqlx::query("INSERT INTO projects (id, owner_id, name, language) VALUES (3, 9, 'r', 'JavaScript')")
            .execute(inner.pool())
            .await
            .unwrap();
        Self {
            inner,
            fail_workflows: AtomicUsize::new(fail_workflows),
            fail_runs: AtomicUsize::new(fail_runs),
        }
    }

    fn should_fail(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl ProjectDatabase for FlakyDb {
    async fn find_project(&self, owner: &str, repo: &str) -> DbResult<Option<Project>> {
        self.inner.find_project(owner, repo).await
    }

    async fn latest_workflow_runs(&self, project_id: i64) -> DbResult<Vec<WorkflowRunRow>> {
        self.inner.latest_workflow_runs(project_id).await
    }

    async fn find_commit(&self, sha: &str) -> DbResult<Option<CommitRow>> {
        self.inner.find_commit(sha).await
    }

    async fn login_by_email(&self, email: &str) -> DbResult<Option<String>> {
        self.inner.login_by_email(email).await
    }

    async fn login_by_id(&self, user_id: i64) -> DbResult<Option<String>> {
        self.inner.login_by_id(user_id).await
    }

    async fn main_team(
        &self,
        owner: &str,
        repo: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DbResult<Vec<String>> {
        self.inner.main_team(owner, repo, from, to).await
    }

    async fn pr_info_for_commit(&self, sha: &str, project_id: i64) -> DbResult<Option<PullRequestLink>> {
        self.inner.pr_info_for_commit(sha, project_id).await
    }

    async fn num_pr_comments(&self, pr_id: i64, from: DateTime<Utc>, to: DateTime<Utc>) -> DbResult<i64> {
        self.inner.num_pr_comments(pr_id, from, to).await
    }

    async fn num_issue_comments(&self, pr_id: i64, from: DateTime<Utc>, to: DateTime<Utc>) -> DbResult<i64> {
        self.inner.num_issue_comments(pr_id, from, to).await
    }

    async fn num_commit_comments(&self, owner: &str, repo: &str, sha: &str) -> DbResult<i64> {
        self.inner.num_commit_comments(owner, repo, sha).await
    }

    async fn upsert_workflow(&self, workflow: &WorkflowRow) -> DbResult<i64> {
        if Self::should_fail(&self.fail_workflows) {
            return Err(DbError::Sql(sqlx::Error::PoolTimedOut));
        }
        self.inner.upsert_workflow(workflow).await
    }

    async fn workflow_id_by_github_id(&self, github_id: i64) -> DbResult<Option<i64>> {
        self.inner.workflow_id_by_github_id(github_id).await
    }

    async fn upsert_workflow_run(&self, run: &WorkflowRunRow) -> DbResult<i64> {
        if Self::should_fail(&self.fail_runs) {
            return Err(DbError::Sql(sqlx::Error::PoolTimedOut));
        }
        self.inner.upsert_workflow_run(run).await
    }
}

async fn serve(server: &mut Server, path: &str, body: Value) -> Mock {
    server
        .mock("GET", path)
        .match_query(Matcher::Any)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(body.to_string())
        .create_async()
        .await
}

fn workflow(id: i64) -> Value {
    json!({
        "id": id, "name": format!("CI {id}"), "path": format!(".github/workflows/{id}.yml"),
        "state": "active", "created_at": "2024-01-01T00:00:00Z", "updated_at": "2024-01-01T00:00:00Z",
    })
}

fn run(id: i64, sha: &str) -> Value {
    json!({
        "id": id, "name": "CI", "head_branch": "main", "head_sha": sha, "run_number": id,
        "status": "completed", "conclusion": "success", "event": "push",
        "created_at": "2024-01-01T00:00:00Z", "run_started_at": "2024-01-01T00:00:00Z",
        "updated_at": "2024-01-01T00:10:00Z", "actor": {"login": "o"},
    })
}

async fn mock_workflows(server: &mut Server) -> Vec<Mock> {
    vec![
        serve(server, "/repos/o/r", json!({"id": 1, "name": "r", "owner": {"login": "o"}})).await,
        serve(
            server,
            "/repos/o/r/actions/workflows",
            json!({"total_count": 2, "workflows": [workflow(11), workflow(12)]}),
        )
        .await,
        serve(
            server,
            "/repos/o/r/actions/workflows/11/runs",
            json!({"total_count": 2, "workflow_runs": [run(21, "c1"), run(22, "c2")]}),
        )
        .await,
        serve(server, "/repos/o/r/commits/c1", json!({"sha": "c1", "files": []})).await,
        serve(server, "/repos/o/r/commits/c2", json!({"sha": "c2", "files": []})).await,
    ]
}

fn retriever_for(server: &Server, db: Arc<FlakyDb>) -> RepoRetriever {
    let client = GitHubClient::builder().base_uri(server.url()).build().unwrap();
    RepoRetriever::new(client, ResourceRepository::new(Arc::new(MemoryDocumentStore::new())))
        .with_project_db(db)
}

#[tokio::test]
async fn test_failed_workflow_write_keeps_listing() {
    let mut server = Server::new_async().await;
    let _mocks = mock_workflows(&mut server).await;
    let db = Arc::new(FlakyDb::new(1, 0).await);
    let retriever = retriever_for(&server, Arc::clone(&db));

    let added = retriever.retrieve_workflows("o", "r").await.unwrap();
    assert_eq!(added.len(), 2);
    assert_eq!(retriever.documents().count(WORKFLOWS, &Selector::new()).await.unwrap(), 2);
    assert_eq!(db.workflow_id_by_github_id(11).await.unwrap(), None);
    assert!(db.workflow_id_by_github_id(12).await.unwrap().is_some());
}

#[tokio::test]
async fn test_failed_run_write_keeps_later_runs() {
    let mut server = Server::new_async().await;
    let _mocks = mock_workflows(&mut server).await;
    let db = Arc::new(FlakyDb::new(0, 1).await);
    let retriever = retriever_for(&server, Arc::clone(&db));
    retriever.retrieve_workflows("o", "r").await.unwrap();

    let added = retriever.retrieve_workflow_runs("o", "r", 11).await.unwrap();
    assert_eq!(added.len(), 2);

    let docs = retriever.documents();
    assert_eq!(docs.count(WORKFLOW_RUNS, &Selector::new()).await.unwrap(), 2);
    assert!(docs.exists(COMMITS, &Selector::new().eq("sha", "c1")).await.unwrap());
    assert!(docs.exists(COMMITS, &Selector::new().eq("sha", "c2")).await.unwrap());

    let mirrored: Vec<i64> = db
        .latest_workflow_runs(3)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.github_id)
        .collect();
    assert_eq!(mirrored, vec![22]);
}
