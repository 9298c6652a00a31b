//! Document store boundary
//!
//! The harvest service talks to storage only through [`DocumentStore`], so a
//! PostgreSQL-backed store and the in-memory store are interchangeable.

pub mod memory;
pub mod pipeline;
pub mod postgres;

use std::fmt;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use shared::ObjectId;
use thiserror::Error;

pub use memory::MemoryStore;
pub use pipeline::{Pipeline, Stage};
pub use postgres::PgDocumentStore;

/// A stored document: a JSON object keyed by field name
pub type Document = serde_json::Map<String, Value>;

/// Identity field present on every stored document
pub const ID_FIELD: &str = "_id";

/// Named collections this layer reads and writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Collection {
    Harvest,
    Estimates,
    FinalProduction,
}

impl Collection {
    pub const ALL: [Collection; 3] = [
        Collection::Harvest,
        Collection::Estimates,
        Collection::FinalProduction,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Collection::Harvest => "Harvest",
            Collection::Estimates => "Estimates",
            Collection::FinalProduction => "FinalProduction",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Store-level failures
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid document: {0}")]
    InvalidDocument(String),

    #[error("duplicate key {id} in {collection}")]
    DuplicateKey { collection: Collection, id: String },

    #[error("pipeline error: {0}")]
    Pipeline(String),

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Document selection
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Every document in the collection
    All,
    /// Field equals the value
    Eq(String, Value),
    /// Field equals one of the values
    In(String, Vec<Value>),
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq(field.into(), value.into())
    }

    pub fn by_id(id: ObjectId) -> Self {
        Filter::eq(ID_FIELD, id)
    }

    pub fn matches(&self, document: &Document) -> bool {
        match self {
            Filter::All => true,
            Filter::Eq(field, value) => document.get(field) == Some(value),
            Filter::In(field, values) => document
                .get(field)
                .is_some_and(|current| values.contains(current)),
        }
    }
}

/// Single-field modification of one document
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    /// Replace the field's value
    Set(String, Value),
    /// Append to the field's array, creating it when missing
    Push(String, Value),
}

impl Update {
    pub fn set(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Update::Set(field.into(), value.into())
    }

    pub fn push(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Update::Push(field.into(), value.into())
    }

    pub fn field(&self) -> &str {
        match self {
            Update::Set(field, _) | Update::Push(field, _) => field,
        }
    }

    /// Apply in place; returns whether the document changed
    pub fn apply(&self, document: &mut Document) -> StoreResult<bool> {
        match self {
            Update::Set(field, value) => {
                if document.get(field) == Some(value) {
                    return Ok(false);
                }
                document.insert(field.clone(), value.clone());
                Ok(true)
            }
            Update::Push(field, value) => {
                let slot = document
                    .entry(field.clone())
                    .or_insert_with(|| Value::Array(Vec::new()));
                match slot {
                    Value::Array(items) => {
                        items.push(value.clone());
                        Ok(true)
                    }
                    other => Err(push_target_error(field, other)),
                }
            }
        }
    }
}

/// Result of an update against a single document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UpdateOutcome {
    pub matched: u64,
    pub modified: u64,
}

/// Result set of a scan or aggregation
///
/// Documents are handed out one at a time; whatever is left is released when
/// the cursor is dropped.
pub struct Cursor {
    collection: Collection,
    documents: std::vec::IntoIter<Document>,
}

impl Cursor {
    pub fn new(collection: Collection, documents: Vec<Document>) -> Self {
        Self {
            collection,
            documents: documents.into_iter(),
        }
    }

    pub fn collection(&self) -> Collection {
        self.collection
    }

    pub fn remaining(&self) -> usize {
        self.documents.len()
    }
}

impl Iterator for Cursor {
    type Item = Document;

    fn next(&mut self) -> Option<Self::Item> {
        self.documents.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.documents.size_hint()
    }
}

impl Drop for Cursor {
    fn drop(&mut self) {
        tracing::trace!(
            collection = %self.collection,
            unread = self.documents.len(),
            "cursor released"
        );
    }
}

/// Document-oriented storage
pub trait DocumentStore: Send + Sync + Clone {
    /// Scan a collection for documents matching the filter
    fn find(
        &self,
        collection: Collection,
        filter: &Filter,
    ) -> impl Future<Output = StoreResult<Cursor>> + Send;

    /// First document matching the filter
    fn find_one(
        &self,
        collection: Collection,
        filter: &Filter,
    ) -> impl Future<Output = StoreResult<Option<Document>>> + Send;

    /// Insert a document, assigning `_id` when it has none
    fn insert_one(
        &self,
        collection: Collection,
        document: Document,
    ) -> impl Future<Output = StoreResult<ObjectId>> + Send;

    /// Atomically apply an update to the first document matching the filter
    fn update_one(
        &self,
        collection: Collection,
        filter: &Filter,
        update: &Update,
    ) -> impl Future<Output = StoreResult<UpdateOutcome>> + Send;

    /// Run a multi-stage pipeline over a collection
    ///
    /// The default evaluation composes `find` calls in process; see
    /// [`pipeline::evaluate`].
    fn aggregate(
        &self,
        collection: Collection,
        pipeline: &Pipeline,
    ) -> impl Future<Output = StoreResult<Cursor>> + Send {
        pipeline::evaluate(self, collection, pipeline)
    }
}

/// Read the `_id` of a document, generating one when absent
pub(crate) fn ensure_id(document: &mut Document) -> StoreResult<ObjectId> {
    match document.get(ID_FIELD) {
        None | Some(Value::Null) => {
            let id = ObjectId::new();
            document.insert(ID_FIELD.to_string(), id.into());
            Ok(id)
        }
        Some(Value::String(raw)) => ObjectId::parse_str(raw)
            .map_err(|e| StoreError::InvalidDocument(format!("malformed `_id` {:?}: {}", raw, e))),
        Some(other) => Err(StoreError::InvalidDocument(format!(
            "`_id` must be a hex string, found {}",
            value_kind(other)
        ))),
    }
}

/// A push found a value that is not an array under `field`
pub(crate) fn push_target_error(field: &str, current: &Value) -> StoreError {
    StoreError::InvalidDocument(format!(
        "cannot push to `{}`: field holds {}",
        field,
        value_kind(current)
    ))
}

pub(crate) fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_filter_eq_and_in() {
        let d = doc(json!({ "idFarmLot": "a", "type": "coffee" }));
        assert!(Filter::All.matches(&d));
        assert!(Filter::eq("idFarmLot", "a").matches(&d));
        assert!(!Filter::eq("idFarmLot", "b").matches(&d));
        assert!(!Filter::eq("missing", Value::Null).matches(&d));
        assert!(Filter::In("type".into(), vec![json!("tea"), json!("coffee")]).matches(&d));
        assert!(!Filter::In("type".into(), vec![]).matches(&d));
    }

    #[test]
    fn test_push_appends_in_order() {
        let mut d = doc(json!({ "estimates": [] }));
        Update::push("estimates", "x").apply(&mut d).unwrap();
        Update::push("estimates", "y").apply(&mut d).unwrap();
        Update::push("estimates", "x").apply(&mut d).unwrap();
        assert_eq!(d["estimates"], json!(["x", "y", "x"]));
    }

    #[test]
    fn test_push_creates_missing_array() {
        let mut d = doc(json!({}));
        assert!(Update::push("estimates", "x").apply(&mut d).unwrap());
        assert_eq!(d["estimates"], json!(["x"]));
    }

    #[test]
    fn test_push_to_scalar_fails() {
        let mut d = doc(json!({ "estimates": null }));
        assert!(matches!(
            Update::push("estimates", "x").apply(&mut d),
            Err(StoreError::InvalidDocument(_))
        ));
    }

    #[test]
    fn test_set_reports_unchanged_value() {
        let mut d = doc(json!({ "summaryFinalProduction": "p1" }));
        assert!(!Update::set("summaryFinalProduction", "p1").apply(&mut d).unwrap());
        assert!(Update::set("summaryFinalProduction", "p2").apply(&mut d).unwrap());
        assert_eq!(d["summaryFinalProduction"], json!("p2"));
    }

    #[test]
    fn test_ensure_id_generates_and_validates() {
        let mut d = doc(json!({ "type": "coffee" }));
        let id = ensure_id(&mut d).unwrap();
        assert_eq!(d[ID_FIELD], json!(id.to_hex()));

        let mut bad = doc(json!({ "_id": 7 }));
        assert!(ensure_id(&mut bad).is_err());
    }

    #[test]
    fn test_cursor_yields_in_order_and_counts() {
        let mut cursor = Cursor::new(
            Collection::Estimates,
            vec![doc(json!({ "n": 1 })), doc(json!({ "n": 2 }))],
        );
        assert_eq!(cursor.remaining(), 2);
        assert_eq!(cursor.next(), Some(doc(json!({ "n": 1 }))));
        assert_eq!(cursor.remaining(), 1);
    }
}
