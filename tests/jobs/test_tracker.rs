//! Tests for request status records.

use std::sync::Arc;

use ci_harvest::store::MemoryDocumentStore;
use ci_harvest::store::collections::RETRIEVE_REQUESTS;
use ci_harvest::{RequestStatus, RequestTracker, ResourceRepository, Selector};
use serde_json::json;

fn tracker() -> (RequestTracker, ResourceRepository) {
    let docs = ResourceRepository::new(Arc::new(MemoryDocumentStore::new()));
    (RequestTracker::new(docs.clone()), docs)
}

#[tokio::test]
async fn test_request_lifecycle() {
    let (tracker, docs) = tracker();

    tracker.enqueue("req-1").await.unwrap();
    assert_eq!(
        tracker.status("req-1").await.unwrap().unwrap().status,
        RequestStatus::Queued
    );

    tracker
        .mark("req-1", RequestStatus::Processing, None, None)
        .await
        .unwrap();
    tracker
        .mark("req-1", RequestStatus::Success, Some(json!({"saved": 3})), None)
        .await
        .unwrap();

    let record = tracker.status("req-1").await.unwrap().unwrap();
    assert_eq!(record.status, RequestStatus::Success);
    assert!(record.status.is_terminal());
    assert_eq!(record.data, Some(json!({"saved": 3})));
    assert_eq!(record.error, None);
    assert_eq!(
        docs.count(RETRIEVE_REQUESTS, &Selector::new()).await.unwrap(),
        1
    );
}

#[tokio::test]
async fn test_unset_fields_keep_stored_values() {
    let (tracker, _) = tracker();
    tracker
        .mark("req-2", RequestStatus::Error, Some(json!({"saved": 0})), Some("boom".to_string()))
        .await
        .unwrap();
    tracker
        .mark("req-2", RequestStatus::Processing, None, None)
        .await
        .unwrap();

    let record = tracker.status("req-2").await.unwrap().unwrap();
    assert_eq!(record.status, RequestStatus::Processing);
    assert_eq!(record.error.as_deref(), Some("boom"));
    assert_eq!(record.data, Some(json!({"saved": 0})));
}

#[tokio::test]
async fn test_unknown_request() {
    let (tracker, _) = tracker();
    assert!(tracker.status("nope").await.unwrap().is_none());
}
