use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use super::{DocumentDatabase, DocumentStore, UpdateResult, apply_set, prepare_insert};
use crate::document::{Document, ID_FIELD, scalar_text};
use crate::errors::StoreError;
use crate::query::FilterExpression;

/// In-process collection. Cloning shares the underlying documents.
#[derive(Clone, Default)]
pub struct MemoryStore {
    docs: Arc<RwLock<Vec<Document>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_documents(docs: Vec<Document>) -> Self {
        Self {
            docs: Arc::new(RwLock::new(docs)),
        }
    }

    pub async fn len(&self) -> usize {
        self.docs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.docs.read().await.is_empty()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn find(&self, filter: &FilterExpression) -> Result<Vec<Document>, StoreError> {
        let docs = self.docs.read().await;
        Ok(docs.iter().filter(|d| filter.matches(d)).cloned().collect())
    }

    async fn insert_one(&self, doc: Document) -> Result<Value, StoreError> {
        let (id, doc) = prepare_insert(doc)?;
        let mut docs = self.docs.write().await;
        if docs.iter().any(|d| d.get(ID_FIELD) == Some(&id)) {
            return Err(StoreError::DuplicateKey(scalar_text(&id)));
        }
        docs.push(doc);
        Ok(id)
    }

    async fn update_one(
        &self,
        filter: &FilterExpression,
        set: Map<String, Value>,
    ) -> Result<UpdateResult, StoreError> {
        let mut docs = self.docs.write().await;
        let Some(doc) = docs.iter_mut().find(|d| filter.matches(d)) else {
            return Ok(UpdateResult::default());
        };
        let changed = apply_set(doc, &set)?;
        Ok(UpdateResult {
            matched: 1,
            modified: changed as u64,
        })
    }

    async fn delete_many(&self, filter: &FilterExpression) -> Result<u64, StoreError> {
        let mut docs = self.docs.write().await;
        let before = docs.len();
        docs.retain(|d| !filter.matches(d));
        Ok((before - docs.len()) as u64)
    }
}

/// Named in-process collections, created on first use.
#[derive(Clone, Default)]
pub struct MemoryDatabase {
    collections: Arc<Mutex<HashMap<String, MemoryStore>>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DocumentDatabase for MemoryDatabase {
    fn collection(&self, name: &str) -> Arc<dyn DocumentStore> {
        let mut collections = self
            .collections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::new(collections.entry(name.to_string()).or_default().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_insert_find_update_delete() {
        let store = MemoryStore::new();
        let id = store.insert_one(json!({"Order": "T1", "Status": "Document Required"})).await.unwrap();
        store.insert_one(json!({"Order": "T2"})).await.unwrap();

        let found = store.find(&FilterExpression::eq("Order", "T1")).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0]["_id"], id);

        let mut set = Map::new();
        set.insert("Status".into(), json!("AI Validated"));
        let res = store.update_one(&FilterExpression::by_id(&id), set).await.unwrap();
        assert_eq!(res, UpdateResult { matched: 1, modified: 1 });

        let doc = store.find_one(&FilterExpression::by_id(&id)).await.unwrap().unwrap();
        assert_eq!(doc["Status"], "AI Validated");

        let removed = store.delete_many(&FilterExpression::eq("Order", "T1")).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_duplicate_key_is_rejected() {
        let store = MemoryStore::new();
        store.insert_one(json!({"_id": "k", "Order": "T1"})).await.unwrap();
        let err = store.insert_one(json!({"_id": "k", "Order": "T2"})).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey(_)));
        store.insert_one(json!({"_id": 7, "Order": "T3"})).await.unwrap();
        assert!(store.insert_one(json!({"_id": 7})).await.is_err());
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_update_without_match_is_noop() {
        let store = MemoryStore::new();
        let res = store
            .update_one(&FilterExpression::eq("Order", "none"), Map::new())
            .await
            .unwrap();
        assert_eq!(res, UpdateResult::default());
    }

    #[tokio::test]
    async fn test_database_shares_collections_by_name() {
        let db = MemoryDatabase::new();
        db.collection("orders").insert_one(json!({"Order": "T1"})).await.unwrap();
        assert_eq!(db.collection("orders").count(&FilterExpression::All).await.unwrap(), 1);
        assert_eq!(db.collection("logs").count(&FilterExpression::All).await.unwrap(), 0);
    }
}
