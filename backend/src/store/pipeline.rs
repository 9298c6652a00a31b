//! Aggregation pipelines
//!
//! A [`Pipeline`] is an ordered list of [`Stage`]s run over one collection.
//! [`evaluate`] executes it against any [`DocumentStore`] by pushing a leading
//! match down to `find` and resolving each lookup with one batched query.

use serde_json::Value;

use super::{
    value_kind, Collection, Cursor, Document, DocumentStore, Filter, StoreError, StoreResult,
    ID_FIELD,
};

/// One step of an aggregation pipeline
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    /// Keep documents matching the filter
    Match(Filter),
    /// Replace `as_field` with the foreign documents whose `_id` is an
    /// element of the array held in `local_field`
    LookupMembership {
        from: Collection,
        local_field: String,
        as_field: String,
    },
    /// Replace `as_field` with the foreign documents whose `foreign_field`
    /// equals the value of `local_field`
    LookupEq {
        from: Collection,
        local_field: String,
        foreign_field: String,
        as_field: String,
    },
    /// Emit one document per element of the array at `path`
    Unwind {
        path: String,
        preserve_null_and_empty: bool,
    },
    /// Set `field` to `replacement` when it is missing or null
    IfNull { field: String, replacement: Value },
}

/// Ordered stages, built fluently
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn matching(self, filter: Filter) -> Self {
        self.stage(Stage::Match(filter))
    }

    pub fn lookup_membership(
        self,
        from: Collection,
        local_field: impl Into<String>,
        as_field: impl Into<String>,
    ) -> Self {
        self.stage(Stage::LookupMembership {
            from,
            local_field: local_field.into(),
            as_field: as_field.into(),
        })
    }

    pub fn lookup_eq(
        self,
        from: Collection,
        local_field: impl Into<String>,
        foreign_field: impl Into<String>,
        as_field: impl Into<String>,
    ) -> Self {
        self.stage(Stage::LookupEq {
            from,
            local_field: local_field.into(),
            foreign_field: foreign_field.into(),
            as_field: as_field.into(),
        })
    }

    pub fn unwind(self, path: impl Into<String>, preserve_null_and_empty: bool) -> Self {
        self.stage(Stage::Unwind {
            path: path.into(),
            preserve_null_and_empty,
        })
    }

    pub fn if_null(self, field: impl Into<String>, replacement: Value) -> Self {
        self.stage(Stage::IfNull {
            field: field.into(),
            replacement,
        })
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

/// Run a pipeline by composing primitive store queries
pub async fn evaluate<S: DocumentStore>(
    store: &S,
    collection: Collection,
    pipeline: &Pipeline,
) -> StoreResult<Cursor> {
    let (initial, rest) = match pipeline.stages() {
        [Stage::Match(filter), rest @ ..] => (filter.clone(), rest),
        stages => (Filter::All, stages),
    };

    let mut documents: Vec<Document> = store.find(collection, &initial).await?.collect();

    for stage in rest {
        if documents.is_empty() {
            break;
        }
        documents = match stage {
            Stage::Match(filter) => documents
                .into_iter()
                .filter(|document| filter.matches(document))
                .collect(),
            Stage::LookupMembership {
                from,
                local_field,
                as_field,
            } => lookup_membership(store, documents, *from, local_field, as_field).await?,
            Stage::LookupEq {
                from,
                local_field,
                foreign_field,
                as_field,
            } => lookup_eq(store, documents, *from, local_field, foreign_field, as_field).await?,
            Stage::Unwind {
                path,
                preserve_null_and_empty,
            } => unwind(documents, path, *preserve_null_and_empty),
            Stage::IfNull { field, replacement } => if_null(documents, field, replacement),
        };
    }

    Ok(Cursor::new(collection, documents))
}

async fn lookup_membership<S: DocumentStore>(
    store: &S,
    mut documents: Vec<Document>,
    from: Collection,
    local_field: &str,
    as_field: &str,
) -> StoreResult<Vec<Document>> {
    let mut keys_per_document = Vec::with_capacity(documents.len());
    for document in &documents {
        let keys = match document.get(local_field) {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items.clone(),
            Some(other) => {
                return Err(StoreError::Pipeline(format!(
                    "membership lookup on `{}` requires an array, found {}",
                    local_field,
                    value_kind(other)
                )))
            }
        };
        keys_per_document.push(keys);
    }

    let keys = distinct_keys(keys_per_document.iter().flatten());
    let foreign = fetch_matching(store, from, ID_FIELD, keys).await?;

    for (document, keys) in documents.iter_mut().zip(keys_per_document) {
        let joined = foreign
            .iter()
            .filter(|candidate| {
                candidate
                    .get(ID_FIELD)
                    .is_some_and(|id| keys.contains(id))
            })
            .cloned()
            .map(Value::Object)
            .collect();
        document.insert(as_field.to_string(), Value::Array(joined));
    }

    Ok(documents)
}

async fn lookup_eq<S: DocumentStore>(
    store: &S,
    mut documents: Vec<Document>,
    from: Collection,
    local_field: &str,
    foreign_field: &str,
    as_field: &str,
) -> StoreResult<Vec<Document>> {
    let values_per_document: Vec<Vec<Value>> = documents
        .iter()
        .map(|document| match document.get(local_field) {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items.clone(),
            Some(value) => vec![value.clone()],
        })
        .collect();

    let keys = distinct_keys(values_per_document.iter().flatten());
    let foreign = fetch_matching(store, from, foreign_field, keys).await?;

    for (document, values) in documents.iter_mut().zip(values_per_document) {
        let joined = foreign
            .iter()
            .filter(|candidate| {
                candidate
                    .get(foreign_field)
                    .is_some_and(|value| values.contains(value))
            })
            .cloned()
            .map(Value::Object)
            .collect();
        document.insert(as_field.to_string(), Value::Array(joined));
    }

    Ok(documents)
}

fn distinct_keys<'a>(keys: impl Iterator<Item = &'a Value>) -> Vec<Value> {
    let mut distinct: Vec<Value> = Vec::new();
    for key in keys {
        if !key.is_null() && !distinct.contains(key) {
            distinct.push(key.clone());
        }
    }
    distinct
}

/// One query for every key referenced by the batch
async fn fetch_matching<S: DocumentStore>(
    store: &S,
    from: Collection,
    field: &str,
    keys: Vec<Value>,
) -> StoreResult<Vec<Document>> {
    if keys.is_empty() {
        return Ok(Vec::new());
    }

    let filter = Filter::In(field.to_string(), keys);
    Ok(store.find(from, &filter).await?.collect())
}

fn unwind(documents: Vec<Document>, path: &str, preserve_null_and_empty: bool) -> Vec<Document> {
    let mut unwound = Vec::with_capacity(documents.len());
    for mut document in documents {
        match document.remove(path) {
            Some(Value::Array(items)) if !items.is_empty() => {
                for item in items {
                    let mut copy = document.clone();
                    copy.insert(path.to_string(), item);
                    unwound.push(copy);
                }
            }
            // empty array: the field is dropped
            Some(Value::Array(_)) => {
                if preserve_null_and_empty {
                    unwound.push(document);
                }
            }
            Some(Value::Null) => {
                if preserve_null_and_empty {
                    document.insert(path.to_string(), Value::Null);
                    unwound.push(document);
                }
            }
            None => {
                if preserve_null_and_empty {
                    unwound.push(document);
                }
            }
            // a scalar unwinds to itself
            Some(scalar) => {
                document.insert(path.to_string(), scalar);
                unwound.push(document);
            }
        }
    }
    unwound
}

fn if_null(mut documents: Vec<Document>, field: &str, replacement: &Value) -> Vec<Document> {
    for document in &mut documents {
        if document.get(field).map_or(true, Value::is_null) {
            document.insert(field.to_string(), replacement.clone());
        }
    }
    documents
}
