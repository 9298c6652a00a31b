//! In-memory document store
//!
//! Keeps every collection as an insertion-ordered `Vec` behind one async
//! `RwLock`. Updates run under the write lock, so each is atomic.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use shared::ObjectId;
use tokio::sync::RwLock;

use super::{
    ensure_id, Collection, Cursor, Document, DocumentStore, Filter, StoreError, StoreResult,
    Update, UpdateOutcome, ID_FIELD,
};

/// Document store held entirely in process memory
#[derive(Clone, Default)]
pub struct MemoryStore {
    collections: Arc<RwLock<HashMap<Collection, Vec<Document>>>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents in a collection
    pub async fn count(&self, collection: Collection) -> usize {
        self.collections
            .read()
            .await
            .get(&collection)
            .map_or(0, Vec::len)
    }

    /// Insert a JSON object as-is, assigning `_id` when absent
    pub async fn insert_value(&self, collection: Collection, value: Value) -> StoreResult<ObjectId> {
        match value {
            Value::Object(document) => self.insert_one(collection, document).await,
            other => Err(StoreError::InvalidDocument(format!(
                "expected an object, found {}",
                super::value_kind(&other)
            ))),
        }
    }
}

impl DocumentStore for MemoryStore {
    async fn find(&self, collection: Collection, filter: &Filter) -> StoreResult<Cursor> {
        let collections = self.collections.read().await;
        let documents = collections
            .get(&collection)
            .map(|documents| {
                documents
                    .iter()
                    .filter(|document| filter.matches(document))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(Cursor::new(collection, documents))
    }

    async fn find_one(
        &self,
        collection: Collection,
        filter: &Filter,
    ) -> StoreResult<Option<Document>> {
        let collections = self.collections.read().await;
        Ok(collections.get(&collection).and_then(|documents| {
            documents
                .iter()
                .find(|document| filter.matches(document))
                .cloned()
        }))
    }

    async fn insert_one(
        &self,
        collection: Collection,
        mut document: Document,
    ) -> StoreResult<ObjectId> {
        let id = ensure_id(&mut document)?;
        let key = Value::from(id);

        let mut collections = self.collections.write().await;
        let documents = collections.entry(collection).or_default();
        if documents.iter().any(|existing| existing.get(ID_FIELD) == Some(&key)) {
            return Err(StoreError::DuplicateKey {
                collection,
                id: id.to_hex(),
            });
        }
        documents.push(document);
        Ok(id)
    }

    async fn update_one(
        &self,
        collection: Collection,
        filter: &Filter,
        update: &Update,
    ) -> StoreResult<UpdateOutcome> {
        let mut collections = self.collections.write().await;
        let target = collections
            .get_mut(&collection)
            .and_then(|documents| documents.iter_mut().find(|document| filter.matches(document)));

        match target {
            Some(document) => {
                let modified = update.apply(document)?;
                Ok(UpdateOutcome {
                    matched: 1,
                    modified: u64::from(modified),
                })
            }
            None => Ok(UpdateOutcome::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::push_target_error;
    use serde_json::json;

    #[tokio::test]
    async fn test_insert_assigns_id_and_find_returns_it() {
        let store = MemoryStore::new();
        let id = store
            .insert_value(Collection::Estimates, json!({ "estimatedKg": 10 }))
            .await
            .unwrap();

        let found = store
            .find_one(Collection::Estimates, &Filter::by_id(id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found["estimatedKg"], json!(10));
        assert_eq!(store.count(Collection::Estimates).await, 1);
        assert_eq!(store.count(Collection::Harvest).await, 0);
    }

    #[tokio::test]
    async fn test_duplicate_id_is_rejected() {
        let store = MemoryStore::new();
        let id = ObjectId::new();
        store
            .insert_value(Collection::FinalProduction, json!({ "_id": id }))
            .await
            .unwrap();
        let second = store
            .insert_value(Collection::FinalProduction, json!({ "_id": id }))
            .await;
        assert!(matches!(second, Err(StoreError::DuplicateKey { .. })));
    }

    #[tokio::test]
    async fn test_non_object_is_rejected() {
        let store = MemoryStore::new();
        let result = store.insert_value(Collection::Harvest, json!([1, 2])).await;
        assert!(matches!(result, Err(StoreError::InvalidDocument(_))));
    }

    #[tokio::test]
    async fn test_update_without_match_reports_zero() {
        let store = MemoryStore::new();
        let outcome = store
            .update_one(
                Collection::Harvest,
                &Filter::by_id(ObjectId::new()),
                &Update::set("summaryFinalProduction", "x"),
            )
            .await
            .unwrap();
        assert_eq!(outcome, UpdateOutcome { matched: 0, modified: 0 });
    }

    #[tokio::test]
    async fn test_find_preserves_insertion_order() {
        let store = MemoryStore::new();
        for n in 0..5 {
            store
                .insert_value(Collection::Estimates, json!({ "n": n }))
                .await
                .unwrap();
        }
        let order: Vec<Value> = store
            .find(Collection::Estimates, &Filter::All)
            .await
            .unwrap()
            .map(|document| document["n"].clone())
            .collect();
        assert_eq!(order, vec![json!(0), json!(1), json!(2), json!(3), json!(4)]);
    }

    #[tokio::test]
    async fn test_push_onto_null_or_scalar_fails_without_change() {
        let store = MemoryStore::new();
        for current in [Value::Null, json!("oops")] {
            let id = store
                .insert_value(Collection::Harvest, json!({ "estimates": current }))
                .await
                .unwrap();

            let err = store
                .update_one(
                    Collection::Harvest,
                    &Filter::by_id(id),
                    &Update::push("estimates", "e1"),
                )
                .await
                .unwrap_err();
            assert_eq!(
                err.to_string(),
                push_target_error("estimates", &current).to_string()
            );

            let stored = store
                .find_one(Collection::Harvest, &Filter::by_id(id))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(stored["estimates"], current);
        }
    }
}
