//! Typed access to the document store
//!
//! Adds the lookups the retriever relies on: first-match finds, existence
//! checks, and discriminator lookups that tolerate GitHub ids arriving as
//! either numbers or strings.

use std::sync::Arc;

use log::debug;
use serde_json::Value;

use super::{Document, DocumentStore, Selector, StoreResult};

#[derive(Clone)]
pub struct ResourceRepository {
    store: Arc<dyn DocumentStore>,
}

impl ResourceRepository {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub fn store_handle(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub async fn find(&self, collection: &str, selector: &Selector) -> StoreResult<Vec<Value>> {
        Ok(self
            .store
            .find(collection, selector)
            .await?
            .into_iter()
            .map(|d| d.body)
            .collect())
    }

    pub async fn find_documents(&self, collection: &str, selector: &Selector) -> StoreResult<Vec<Document>> {
        self.store.find(collection, selector).await
    }

    pub async fn find_one(&self, collection: &str, selector: &Selector) -> StoreResult<Option<Value>> {
        Ok(self
            .store
            .find(collection, selector)
            .await?
            .into_iter()
            .next()
            .map(|d| d.body))
    }

    pub async fn exists(&self, collection: &str, selector: &Selector) -> StoreResult<bool> {
        Ok(self.store.count(collection, selector).await? > 0)
    }

    pub async fn count(&self, collection: &str, selector: &Selector) -> StoreResult<usize> {
        self.store.count(collection, selector).await
    }

    pub async fn store(&self, collection: &str, doc: &Value) -> StoreResult<i64> {
        self.store.store(collection, doc).await
    }

    pub async fn upsert(&self, collection: &str, selector: &Selector, doc: &Value) -> StoreResult<i64> {
        self.store.upsert(collection, selector, doc).await
    }

    /// Documents matching `selector` plus `discriminator == item_id`.
    ///
    /// Tries the type-coerced id first (`"5"` becomes `5`), then the raw value.
    pub async fn bound_instance(
        &self,
        collection: &str,
        selector: &Selector,
        discriminator: &str,
        item_id: &Value,
    ) -> StoreResult<Vec<Value>> {
        let candidates = id_candidates(item_id);
        for candidate in &candidates {
            let found = self
                .find(collection, &selector.clone().eq(discriminator, candidate.clone()))
                .await?;
            if !found.is_empty() {
                return Ok(found);
            }
        }
        debug!("No {collection} entry with {discriminator} = {item_id}");
        Ok(Vec::new())
    }
}

/// Lookup order for a discriminator value: coerced form first, raw form second.
pub(crate) fn id_candidates(item_id: &Value) -> Vec<Value> {
    let coerced = match item_id {
        Value::String(s) => s
            .parse::<i64>()
            .ok()
            .filter(|n| n.to_string() == *s)
            .map(Value::from),
        Value::Number(n) => Some(Value::String(n.to_string())),
        _ => None,
    };
    match coerced {
        Some(Value::String(s)) => vec![item_id.clone(), Value::String(s)],
        Some(c) => vec![c, item_id.clone()],
        None => vec![item_id.clone()],
    }
}
