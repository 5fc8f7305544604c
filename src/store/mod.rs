//! Document store abstraction.
//!
//! [`DocumentStore`] is the narrow collection contract the dashboard needs:
//! find, find-one, insert, `$set` update by filter, delete-many and
//! distinct. Two backends ship with the crate:
//!
//! - [`MemoryDatabase`]: in-process, for tests and demos
//! - [`SqliteDatabase`]: JSON documents in a single SQLite table
//!
//! Filters are [`FilterExpression`]s evaluated in-process with
//! document-database semantics. Concurrent writers are not coordinated:
//! the last write wins.

pub mod memory;
pub mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::document::{Document, FieldPath, ID_FIELD, resolve, set_path};
use crate::errors::StoreError;
use crate::query::{FilterExpression, QueryBuilder};

pub use memory::{MemoryDatabase, MemoryStore};
pub use sqlite::{SqliteDatabase, SqliteStore};

/// Outcome of an `update_one` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UpdateResult {
    pub matched: u64,
    pub modified: u64,
}

/// One collection of schemaless documents.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// All documents matching `filter`, in insertion order.
    async fn find(&self, filter: &FilterExpression) -> Result<Vec<Document>, StoreError>;

    /// First document matching `filter`.
    async fn find_one(&self, filter: &FilterExpression) -> Result<Option<Document>, StoreError> {
        Ok(self.find(filter).await?.into_iter().next())
    }

    /// Insert a mapping document, assigning `_id` when absent. Returns the key.
    async fn insert_one(&self, doc: Document) -> Result<Value, StoreError>;

    /// Apply `$set` (dotted paths allowed) to the first matching document.
    async fn update_one(
        &self,
        filter: &FilterExpression,
        set: Map<String, Value>,
    ) -> Result<UpdateResult, StoreError>;

    /// Delete every matching document. Returns the number removed.
    async fn delete_many(&self, filter: &FilterExpression) -> Result<u64, StoreError>;

    /// Distinct values at `field` across the collection. Sequence values
    /// contribute their elements.
    async fn distinct(&self, field: &str) -> Result<Vec<Value>, StoreError> {
        let docs = self.find(&FilterExpression::All).await?;
        Ok(distinct_values(&docs, field))
    }

    async fn count(&self, filter: &FilterExpression) -> Result<u64, StoreError> {
        Ok(self.find(filter).await?.len() as u64)
    }
}

/// A set of named collections.
pub trait DocumentDatabase: Send + Sync {
    fn collection(&self, name: &str) -> Arc<dyn DocumentStore>;
}

/// Free-text filter for `store`: `term` against every leaf field of the
/// collection's first document. Empty terms match everything; an empty
/// collection matches nothing.
pub async fn text_filter(
    store: &dyn DocumentStore,
    builder: &QueryBuilder,
    term: &str,
) -> Result<FilterExpression, StoreError> {
    if term.trim().is_empty() {
        return Ok(FilterExpression::All);
    }
    let sample = store.find_one(&FilterExpression::All).await?;
    Ok(builder.build(sample.as_ref(), term))
}

/// Validate a new document and give it a key.
pub(crate) fn prepare_insert(mut doc: Document) -> Result<(Value, Document), StoreError> {
    let Value::Object(map) = &mut doc else {
        return Err(StoreError::NotAMapping);
    };
    let id = match map.get(ID_FIELD) {
        Some(id) if !id.is_null() => id.clone(),
        _ => {
            let id = Value::String(uuid::Uuid::new_v4().to_string());
            // Key goes first, like a database-assigned key.
            let mut keyed = Map::new();
            keyed.insert(ID_FIELD.to_string(), id.clone());
            keyed.extend(std::mem::take(map));
            *map = keyed;
            id
        }
    };
    Ok((id, doc))
}

/// Apply a `$set` to `doc`. Returns whether anything changed.
pub(crate) fn apply_set(doc: &mut Document, set: &Map<String, Value>) -> Result<bool, StoreError> {
    let mut updated = doc.clone();
    for (path, value) in set {
        if path == ID_FIELD || path.starts_with("_id.") {
            let current = resolve(doc, &FieldPath::parse(path));
            if current.first().copied() != Some(value) {
                return Err(StoreError::ImmutableKey);
            }
            continue;
        }
        set_path(&mut updated, path, value.clone())?;
    }
    let changed = updated != *doc;
    *doc = updated;
    Ok(changed)
}

pub(crate) fn distinct_values(docs: &[Document], field: &str) -> Vec<Value> {
    let path = FieldPath::parse(field);
    let mut out: Vec<Value> = Vec::new();
    for doc in docs {
        for v in resolve(doc, &path) {
            let values: Vec<&Value> = match v {
                Value::Array(items) => items.iter().collect(),
                other => vec![other],
            };
            for v in values {
                if !out.contains(v) {
                    out.push(v.clone());
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_prepare_insert_assigns_key_first() {
        let (id, doc) = prepare_insert(json!({"Order": "T1"})).unwrap();
        assert!(id.is_string());
        let keys: Vec<&String> = doc.as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["_id", "Order"]);
    }

    #[test]
    fn test_prepare_insert_keeps_existing_key() {
        let (id, _) = prepare_insert(json!({"_id": "k1", "Order": "T1"})).unwrap();
        assert_eq!(id, json!("k1"));
    }

    #[test]
    fn test_prepare_insert_rejects_scalars() {
        assert!(matches!(prepare_insert(json!("x")), Err(StoreError::NotAMapping)));
    }

    #[test]
    fn test_apply_set_dotted_paths() {
        let mut doc = json!({"_id": "k", "a": {"b": 1}});
        let set = json!({"a.b": 2, "status": true}).as_object().unwrap().clone();
        assert!(apply_set(&mut doc, &set).unwrap());
        assert_eq!(doc, json!({"_id": "k", "a": {"b": 2}, "status": true}));
        assert!(!apply_set(&mut doc, &set).unwrap());
    }

    #[test]
    fn test_apply_set_rejects_key_change() {
        let mut doc = json!({"_id": "k", "a": 1});
        let set = json!({"_id": "other", "a": 2}).as_object().unwrap().clone();
        assert!(matches!(apply_set(&mut doc, &set), Err(StoreError::ImmutableKey)));
        assert_eq!(doc, json!({"_id": "k", "a": 1}));
    }

    #[tokio::test]
    async fn test_text_filter_follows_first_document() {
        let store = MemoryStore::with_documents(vec![
            json!({"name": "Acme", "city": "Hong Kong"}),
            json!({"name": "Globex", "city": "Kowloon", "extra": "hong"}),
        ]);
        let builder = QueryBuilder::new();
        let filter = text_filter(&store, &builder, "hong").await.unwrap();
        assert_eq!(filter.predicate_count(), 2);
        // `extra` is not in the sample, so only the first matches.
        assert_eq!(store.find(&filter).await.unwrap().len(), 1);
        assert_eq!(text_filter(&store, &builder, "  ").await.unwrap(), FilterExpression::All);

        let empty = MemoryStore::new();
        let filter = text_filter(&empty, &builder, "x").await.unwrap();
        assert_eq!(filter, FilterExpression::Nothing);
    }

    #[test]
    fn test_distinct_flattens_sequences() {
        let docs = vec![
            json!({"event_type": "upload", "tags": ["a", "b"]}),
            json!({"event_type": "validate", "tags": ["b"]}),
            json!({"event_type": "upload"}),
        ];
        assert_eq!(distinct_values(&docs, "event_type"), vec![json!("upload"), json!("validate")]);
        assert_eq!(distinct_values(&docs, "tags"), vec![json!("a"), json!("b")]);
    }
}
