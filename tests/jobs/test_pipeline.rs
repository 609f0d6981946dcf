//! Tests for tracked retrieve-then-extract runs.

use std::sync::Arc;

use ci_harvest::db::ProjectDatabase;
use ci_harvest::store::MemoryDocumentStore;
use ci_harvest::{
    BuildMetricsExtractor, GitHistoryWalker, GitHubClient, Pipeline, RepoRetriever, RequestStatus,
    RequestTracker, ResourceRepository, SqliteProjectDb,
};
use mockito::{Matcher, Server};
use tempfile::TempDir;

async fn pipeline(server: &Server, dir: &TempDir) -> Pipeline {
    let docs = ResourceRepository::new(Arc::new(MemoryDocumentStore::new()));
    let client = GitHubClient::builder().base_uri(server.url()).build().unwrap();
    let db: Arc<dyn ProjectDatabase> = Arc::new(SqliteProjectDb::connect("sqlite::memory:").await.unwrap());

    let retriever = RepoRetriever::new(client, docs.clone()).with_project_db(Arc::clone(&db));
    let walker = GitHistoryWalker::new(dir.path().join("repos"), dir.path().join("origin").to_string_lossy());
    let extractor = BuildMetricsExtractor::new(db, docs.clone(), walker).with_retriever(retriever.clone());
    Pipeline::new(retriever, extractor, RequestTracker::new(docs))
}

#[tokio::test]
async fn test_bad_credentials_end_in_error() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("GET", "/repos/o/r")
        .match_query(Matcher::Any)
        .with_status(401)
        .create_async()
        .await;
    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline(&server, &dir).await;

    pipeline.tracker().enqueue("req-1").await.unwrap();
    let record = pipeline.run_request("o", "r", "req-1").await;
    assert_eq!(record.status, RequestStatus::Error);
    assert!(record.error.unwrap().contains("Unauthorized"));

    let stored = pipeline.tracker().status("req-1").await.unwrap().unwrap();
    assert_eq!(stored.status, RequestStatus::Error);
}

#[tokio::test]
async fn test_unknown_project_ends_in_error() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("GET", "/repos/o/r")
        .match_query(Matcher::Any)
        .with_status(404)
        .create_async()
        .await;
    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline(&server, &dir).await;

    let record = pipeline.run_request("o", "r", "req-2").await;
    assert_eq!(record.status, RequestStatus::Error);
    assert!(record.error.unwrap().contains("o/r"));
    assert!(record.status.is_terminal());
}
