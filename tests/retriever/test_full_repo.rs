//! Tests for whole-repository retrieval against a mocked API.

use std::sync::Arc;

use ci_harvest::db::ProjectDatabase;
use ci_harvest::store::MemoryDocumentStore;
use ci_harvest::store::collections::*;
use ci_harvest::{GitHubClient, RepoRetriever, ResourceRepository, Selector, SqliteProjectDb};
use mockito::{Matcher, Mock, Server};
use serde_json::{Value, json};

async fn serve(server: &mut Server, path: &str, body: Value) -> Mock {
    serve_status(server, path, 200, body).await
}

async fn serve_status(server: &mut Server, path: &str, status: usize, body: Value) -> Mock {
    server
        .mock("GET", path)
        .match_query(Matcher::Any)
        .with_status(status)
        .with_header("content-type", "application/json")
        .with_body(body.to_string())
        .create_async()
        .await
}

/// One repository with a commit, a pull request, an issue and a workflow run.
async fn mock_repository(server: &mut Server) -> Vec<Mock> {
    mock_repository_with_labels(server, 200).await
}

async fn mock_repository_with_labels(server: &mut Server, labels_status: usize) -> Vec<Mock> {
    let base = server.url();
    let commit = json!({
        "sha": "c1",
        "commit": {"author": {"email": "dev@example.com", "name": "Dev One"}},
        "files": [{"filename": "src/a.js", "patch": "+x"}],
    });
    vec![
        serve(
            server,
            "/repos/o/r",
            json!({"id": 1, "name": "r", "owner": {"login": "o"}, "default_branch": "main", "language": "JavaScript"}),
        )
        .await,
        serve(server, "/users/o", json!({"login": "o", "id": 9, "type": "User"})).await,
        serve(server, "/repos/o/r/languages", json!({"JavaScript": 1000})).await,
        serve(server, "/repos/o/r/topics", json!({"names": ["ci"]})).await,
        serve(server, "/repos/o/r/commits", json!([{"sha": "c1"}])).await,
        serve(server, "/repos/o/r/commits/c1", commit).await,
        serve_status(
            server,
            "/repos/o/r/labels",
            labels_status,
            json!([{"name": "bug", "color": "f00"}]),
        )
        .await,
        serve(
            server,
            "/repos/o/r/pulls",
            json!([{"number": 1, "id": 100, "url": format!("{base}/repos/o/r/pulls/1")}]),
        )
        .await,
        serve(
            server,
            "/repos/o/r/pulls/1",
            json!({"number": 1, "id": 100, "title": "Fix", "state": "closed"}),
        )
        .await,
        serve(
            server,
            "/repos/o/r/pulls/1/commits",
            json!([{"sha": "c1", "url": format!("{base}/repos/o/r/commits/c1")}]),
        )
        .await,
        serve(server, "/repos/o/r/pulls/1/comments", json!([{"id": 5, "body": "nit"}])).await,
        serve(server, "/repos/o/r/issues", json!([{"number": 2, "id": 200}])).await,
        serve(server, "/repos/o/r/issues/2/events", json!([{"id": 7, "event": "closed"}])).await,
        serve(server, "/repos/o/r/issues/2/comments", json!([{"id": 8, "body": "thanks"}])).await,
        serve(server, "/repos/o/r/issues/2/labels", json!([])).await,
        serve(
            server,
            "/repos/o/r/events",
            json!([{"id": "e1", "type": "PushEvent", "repo": {"name": "o/r"}}]),
        )
        .await,
        serve(
            server,
            "/repos/o/r/actions/workflows",
            json!({"total_count": 1, "workflows": [{
                "id": 11, "name": "CI", "path": ".github/workflows/ci.yml", "state": "active",
                "created_at": "2024-01-01T00:00:00Z", "updated_at": "2024-01-01T00:00:00Z",
            }]}),
        )
        .await,
        serve(
            server,
            "/repos/o/r/actions/workflows/11/runs",
            json!({"total_count": 1, "workflow_runs": [{
                "id": 21, "name": "CI", "head_branch": "main", "head_sha": "c1", "run_number": 1,
                "status": "completed", "conclusion": "success", "event": "push",
                "created_at": "2024-01-01T00:00:00Z", "run_started_at": "2024-01-01T00:00:00Z",
                "updated_at": "2024-01-01T00:10:00Z", "actor": {"login": "o"},
            }]}),
        )
        .await,
    ]
}

fn retriever_for(server: &Server) -> RepoRetriever {
    let client = GitHubClient::builder().base_uri(server.url()).build().unwrap();
    RepoRetriever::new(client, ResourceRepository::new(Arc::new(MemoryDocumentStore::new())))
}

const COLLECTIONS: &[&str] = &[
    REPOS,
    USERS,
    TOPICS,
    COMMITS,
    REPO_LABELS,
    PULL_REQUESTS,
    PULL_REQUEST_COMMITS,
    PULL_REQUEST_COMMENTS,
    ISSUES,
    ISSUE_EVENTS,
    ISSUE_COMMENTS,
    EVENTS,
    WORKFLOWS,
    WORKFLOW_RUNS,
];

async fn counts(docs: &ResourceRepository) -> Vec<usize> {
    let mut counts = Vec::new();
    for collection in COLLECTIONS {
        counts.push(docs.count(collection, &Selector::new()).await.unwrap());
    }
    counts
}

#[tokio::test]
async fn test_full_retrieval_stores_each_resource_once() {
    let mut server = Server::new_async().await;
    let _mocks = mock_repository(&mut server).await;
    let retriever = retriever_for(&server);

    retriever.retrieve_full_repo("o", "r").await.unwrap();
    let first = counts(retriever.documents()).await;
    assert_eq!(first, vec![1; COLLECTIONS.len()]);

    retriever.retrieve_full_repo("o", "r").await.unwrap();
    assert_eq!(counts(retriever.documents()).await, first);
}

#[tokio::test]
async fn test_documents_carry_context() {
    let mut server = Server::new_async().await;
    let _mocks = mock_repository(&mut server).await;
    let retriever = retriever_for(&server);
    retriever.retrieve_full_repo("o", "r").await.unwrap();
    let docs = retriever.documents();

    let pr = docs.find_one(PULL_REQUESTS, &Selector::new()).await.unwrap().unwrap();
    assert_eq!((pr["owner"].as_str(), pr["repo"].as_str()), (Some("o"), Some("r")));
    assert_eq!(pr["title"], "Fix");

    let link = docs.find_one(PULL_REQUEST_COMMITS, &Selector::new()).await.unwrap().unwrap();
    assert_eq!(link["pull_request_id"], 100);

    let comment = docs.find_one(PULL_REQUEST_COMMENTS, &Selector::new()).await.unwrap().unwrap();
    assert_eq!(comment["pullreq_id"], 1);

    let event = docs.find_one(ISSUE_EVENTS, &Selector::new()).await.unwrap().unwrap();
    assert_eq!(event["issue_id"], 2);

    let run = docs.find_one(WORKFLOW_RUNS, &Selector::new()).await.unwrap().unwrap();
    assert_eq!(run["workflow_id"], 11);
    assert_eq!(run["actor"]["login"], "o");
}

#[tokio::test]
async fn test_missing_repository_stores_nothing() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("GET", "/repos/o/gone")
        .match_query(Matcher::Any)
        .with_status(404)
        .create_async()
        .await;
    let retriever = retriever_for(&server);

    retriever.retrieve_full_repo("o", "gone").await.unwrap();
    assert_eq!(counts(retriever.documents()).await, vec![0; COLLECTIONS.len()]);
}

#[tokio::test]
async fn test_bad_credentials_abort() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("GET", "/repos/o/r")
        .match_query(Matcher::Any)
        .with_status(401)
        .create_async()
        .await;
    let retriever = retriever_for(&server);

    let err = retriever.retrieve_full_repo("o", "r").await.unwrap_err();
    assert!(err.is_fatal());
}

#[tokio::test]
async fn test_failed_step_does_not_stop_retrieval() {
    let mut server = Server::new_async().await;
    let _mocks = mock_repository_with_labels(&mut server, 500).await;
    let retriever = retriever_for(&server);

    retriever.retrieve_full_repo("o", "r").await.unwrap();
    let docs = retriever.documents();
    assert_eq!(docs.count(REPO_LABELS, &Selector::new()).await.unwrap(), 0);
    assert_eq!(docs.count(WORKFLOW_RUNS, &Selector::new()).await.unwrap(), 1);
    assert_eq!(docs.count(ISSUES, &Selector::new()).await.unwrap(), 1);
}

#[tokio::test]
async fn test_workflows_mirrored_into_project_db() {
    let mut server = Server::new_async().await;
    let _mocks = mock_repository(&mut server).await;

    let db = SqliteProjectDb::connect("sqlite::memory:").await.unwrap();
    sqlx::query("INSERT INTO users (id, login) VALUES (9, 'o')")
        .execute(db.pool())
        .await
        .unwrap();
    sqlx::query("INSERT INTO projects (id, owner_id, name, language) VALUES (3, 9, 'r', 'JavaScript')")
        .execute(db.pool())
        .await
        .unwrap();
    let db: Arc<dyn ProjectDatabase> = Arc::new(db);

    let retriever = retriever_for(&server).with_project_db(Arc::clone(&db));
    retriever.retrieve_full_repo("o", "r").await.unwrap();
    retriever.retrieve_full_repo("o", "r").await.unwrap();

    let local_workflow = db.workflow_id_by_github_id(11).await.unwrap();
    assert!(local_workflow.is_some());

    let runs = db.latest_workflow_runs(3).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].github_id, 21);
    assert_eq!(runs[0].head_sha, "c1");
    assert_eq!(runs[0].workflow_id, local_workflow.unwrap());
    assert_eq!(runs[0].conclusion.as_deref(), Some("success"));
}
