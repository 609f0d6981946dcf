//! Store that discards writes and finds nothing.

use async_trait::async_trait;
use log::debug;
use serde_json::Value;

use super::{Document, DocumentStore, Selector, StoreResult};

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopDocumentStore;

#[async_trait]
impl DocumentStore for NoopDocumentStore {
    async fn find(&self, _collection: &str, _selector: &Selector) -> StoreResult<Vec<Document>> {
        Ok(Vec::new())
    }

    async fn store(&self, collection: &str, _doc: &Value) -> StoreResult<i64> {
        debug!("noop store: discarding write to {collection}");
        Ok(0)
    }

    async fn upsert(&self, collection: &str, _selector: &Selector, _doc: &Value) -> StoreResult<i64> {
        debug!("noop store: discarding upsert to {collection}");
        Ok(0)
    }
}
