//! In-memory [`DocumentStore`] for tests and short-lived runs.
//!
//! Collections are `Vec`s behind a `std::sync::RwLock`; ids come from a
//! process-local counter.

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use serde_json::Value;

use super::{Document, DocumentStore, Selector, StoreResult, merge_fields};

pub struct MemoryDocumentStore {
    collections: RwLock<HashMap<String, Vec<Document>>>,
    next_id: AtomicI64,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            next_id: AtomicI64::new(1),
        }
    }

    fn allocate_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn find(&self, collection: &str, selector: &Selector) -> StoreResult<Vec<Document>> {
        let collections = self.collections.read().unwrap_or_else(|e| e.into_inner());
        Ok(collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .filter(|d| selector.matches(&d.body))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn store(&self, collection: &str, doc: &Value) -> StoreResult<i64> {
        let id = self.allocate_id();
        let mut collections = self.collections.write().unwrap_or_else(|e| e.into_inner());
        collections
            .entry(collection.to_string())
            .or_default()
            .push(Document {
                id,
                body: doc.clone(),
            });
        Ok(id)
    }

    async fn upsert(&self, collection: &str, selector: &Selector, doc: &Value) -> StoreResult<i64> {
        let mut collections = self.collections.write().unwrap_or_else(|e| e.into_inner());
        let docs = collections.entry(collection.to_string()).or_default();
        if let Some(existing) = docs.iter_mut().find(|d| selector.matches(&d.body)) {
            merge_fields(&mut existing.body, doc);
            return Ok(existing.id);
        }
        let id = self.allocate_id();
        docs.push(Document {
            id,
            body: doc.clone(),
        });
        Ok(id)
    }
}
