use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use rusqlite::{Connection, params};
use serde_json::{Map, Value};

use super::{DocumentDatabase, DocumentStore, UpdateResult, apply_set, prepare_insert};
use crate::document::{Document, ID_FIELD};
use crate::errors::StoreError;
use crate::query::FilterExpression;

/// Async-safe handle to the SQLite document database.
///
/// All access runs on tokio's blocking pool via `spawn_blocking` so that
/// synchronous SQLite I/O never ties up async worker threads.
#[derive(Clone)]
pub struct SqliteDatabase {
    conn: Arc<std::sync::Mutex<Connection>>,
}

impl SqliteDatabase {
    /// Open (or create) a database file and run migrations.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        Self::init(conn)
    }

    /// In-memory database (for testing).
    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> anyhow::Result<Self> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS documents (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                collection TEXT NOT NULL,
                doc_id TEXT NOT NULL,
                body TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now')),
                UNIQUE(collection, doc_id)
            );

            CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents(collection);
            ",
        )
        .context("Failed to create documents table")?;
        Ok(Self {
            conn: Arc::new(std::sync::Mutex::new(conn)),
        })
    }

    /// Run a closure with the connection on a blocking thread.
    async fn call<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&Connection) -> Result<R, StoreError> + Send + 'static,
        R: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().map_err(|_| StoreError::LockPoisoned)?;
            f(&guard)
        })
        .await
        .map_err(|e| StoreError::Backend(anyhow::anyhow!("SQLite task panicked: {}", e)))?
    }

    pub fn store(&self, collection: &str) -> SqliteStore {
        SqliteStore {
            db: self.clone(),
            collection: collection.to_string(),
        }
    }
}

impl DocumentDatabase for SqliteDatabase {
    fn collection(&self, name: &str) -> Arc<dyn DocumentStore> {
        Arc::new(self.store(name))
    }
}

/// One collection inside a [`SqliteDatabase`].
#[derive(Clone)]
pub struct SqliteStore {
    db: SqliteDatabase,
    collection: String,
}

fn backend(e: rusqlite::Error) -> StoreError {
    StoreError::Backend(e.into())
}

/// Stored key for a document key value.
fn key_text(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn load_all(conn: &Connection, collection: &str) -> Result<Vec<(i64, Document)>, StoreError> {
    let mut stmt = conn
        .prepare("SELECT seq, body FROM documents WHERE collection = ?1 ORDER BY seq")
        .map_err(backend)?;
    let rows = stmt
        .query_map(params![collection], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })
        .map_err(backend)?;

    let mut out = Vec::new();
    for row in rows {
        let (seq, body) = row.map_err(backend)?;
        out.push((seq, serde_json::from_str(&body)?));
    }
    Ok(out)
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn find(&self, filter: &FilterExpression) -> Result<Vec<Document>, StoreError> {
        let collection = self.collection.clone();
        let filter = filter.clone();
        self.db
            .call(move |conn| {
                Ok(load_all(conn, &collection)?
                    .into_iter()
                    .map(|(_, doc)| doc)
                    .filter(|doc| filter.matches(doc))
                    .collect())
            })
            .await
    }

    async fn insert_one(&self, doc: Document) -> Result<Value, StoreError> {
        let (id, doc) = prepare_insert(doc)?;
        let collection = self.collection.clone();
        let body = serde_json::to_string(&doc)?;
        let key = key_text(&id);
        self.db
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO documents (collection, doc_id, body) VALUES (?1, ?2, ?3)",
                    params![collection, key, body],
                )
                .map_err(|e| match e {
                    rusqlite::Error::SqliteFailure(f, _)
                        if f.code == rusqlite::ErrorCode::ConstraintViolation =>
                    {
                        StoreError::DuplicateKey(key.clone())
                    }
                    other => backend(other),
                })?;
                Ok(())
            })
            .await?;
        Ok(id)
    }

    async fn update_one(
        &self,
        filter: &FilterExpression,
        set: Map<String, Value>,
    ) -> Result<UpdateResult, StoreError> {
        let collection = self.collection.clone();
        let filter = filter.clone();
        self.db
            .call(move |conn| {
                let Some((seq, mut doc)) = load_all(conn, &collection)?
                    .into_iter()
                    .find(|(_, doc)| filter.matches(doc))
                else {
                    return Ok(UpdateResult::default());
                };
                let changed = apply_set(&mut doc, &set)?;
                if changed {
                    conn.execute(
                        "UPDATE documents SET body = ?1, updated_at = datetime('now') WHERE seq = ?2",
                        params![serde_json::to_string(&doc)?, seq],
                    )
                    .map_err(backend)?;
                }
                Ok(UpdateResult {
                    matched: 1,
                    modified: changed as u64,
                })
            })
            .await
    }

    async fn delete_many(&self, filter: &FilterExpression) -> Result<u64, StoreError> {
        let collection = self.collection.clone();
        let filter = filter.clone();
        self.db
            .call(move |conn| {
                let doomed: Vec<i64> = load_all(conn, &collection)?
                    .into_iter()
                    .filter(|(_, doc)| filter.matches(doc))
                    .map(|(seq, _)| seq)
                    .collect();
                let tx = conn.unchecked_transaction().map_err(backend)?;
                for seq in &doomed {
                    tx.execute("DELETE FROM documents WHERE seq = ?1", params![seq])
                        .map_err(backend)?;
                }
                tx.commit().map_err(backend)?;
                Ok(doomed.len() as u64)
            })
            .await
    }

    async fn find_one(&self, filter: &FilterExpression) -> Result<Option<Document>, StoreError> {
        // Key lookups skip the scan.
        if let FilterExpression::Field {
            path,
            condition: crate::query::Condition::Eq(id),
        } = filter
        {
            if path.to_string() == ID_FIELD {
                let collection = self.collection.clone();
                let key = key_text(id);
                let id = id.clone();
                return self
                    .db
                    .call(move |conn| {
                        let mut stmt = conn
                            .prepare(
                                "SELECT body FROM documents WHERE collection = ?1 AND doc_id = ?2",
                            )
                            .map_err(backend)?;
                        let mut rows = stmt.query(params![collection, key]).map_err(backend)?;
                        let body: Option<String> = match rows.next().map_err(backend)? {
                            Some(row) => Some(row.get(0).map_err(backend)?),
                            None => None,
                        };
                        let Some(body) = body else {
                            return Ok(None);
                        };
                        let doc: Document = serde_json::from_str(&body)?;
                        // Keys of different types can share stored text.
                        Ok((doc.get(ID_FIELD) == Some(&id)).then_some(doc))
                    })
                    .await;
            }
        }
        Ok(self.find(filter).await?.into_iter().next())
    }
}
