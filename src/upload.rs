//! Document upload: store each file, record it on the order, and have the
//! agent validate it. Documents are processed in parallel on a bounded
//! worker pool; the call returns once every worker has finished.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::agent::{AgentHandle, AgentOutcome, prompts};
use crate::blob::BlobStore;
use crate::errors::UploadError;
use crate::orders::{MissingDocument, OrderBook};

/// One file submitted for an outstanding document.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub document: String,
    /// Client-side file name; only its extension is kept.
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl UploadFile {
    fn extension(&self) -> String {
        file_extension(&self.file_name)
    }
}

/// Lower-cased extension of a client file name; `bin` when there is none.
pub fn file_extension(file_name: &str) -> String {
    Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_else(|| "bin".to_string())
}

/// Blob path for an order document.
pub fn blob_path(order: &str, document: &str, extension: &str) -> String {
    format!("data/orders/{order}/{order}_{document}.{extension}")
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DocumentStatus {
    Validated { ai_response: String },
    TimedOut { message: String },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentResult {
    pub document: String,
    pub blob_path: String,
    pub url: Option<String>,
    #[serde(flatten)]
    pub status: DocumentStatus,
}

#[derive(Clone)]
pub struct Uploader {
    orders: OrderBook,
    blobs: Arc<dyn BlobStore>,
    container: String,
    agent: AgentHandle,
    timeout: Duration,
    max_workers: usize,
}

impl Uploader {
    pub fn new(
        orders: OrderBook,
        blobs: Arc<dyn BlobStore>,
        container: impl Into<String>,
        agent: AgentHandle,
        timeout: Duration,
    ) -> Self {
        Self {
            orders,
            blobs,
            container: container.into(),
            agent,
            timeout,
            max_workers: 4,
        }
    }

    pub fn with_max_workers(mut self, n: usize) -> Self {
        self.max_workers = n.max(1);
        self
    }

    /// Process `files` for `order`. Every file must name a document still
    /// outstanding on the order; otherwise nothing is uploaded. Per-document
    /// failures are reported in the result, in input order.
    pub async fn upload(&self, order: &str, files: Vec<UploadFile>) -> Result<Vec<DocumentResult>, UploadError> {
        let missing = self.orders.missing_documents(order).await?;
        let mut jobs = Vec::with_capacity(files.len());
        for file in files {
            let Some(slot) = missing.iter().find(|m| m.document == file.document) else {
                return Err(UploadError::NotRequested {
                    order: order.to_string(),
                    document: file.document,
                });
            };
            jobs.push((slot.clone(), file));
        }

        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let mut set = JoinSet::new();
        let total = jobs.len();
        for (idx, (slot, file)) in jobs.into_iter().enumerate() {
            let semaphore = semaphore.clone();
            let this = self.clone();
            set.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| UploadError::Worker(e.to_string()))?;
                Ok::<_, UploadError>((idx, this.process(slot, file).await))
            });
        }

        let mut results: Vec<Option<DocumentResult>> = vec![None; total];
        while let Some(joined) = set.join_next().await {
            let (idx, result) = joined.map_err(|e| UploadError::Worker(e.to_string()))??;
            results[idx] = Some(result);
        }
        tracing::info!(order, documents = total, "upload batch finished");
        Ok(results.into_iter().flatten().collect())
    }

    async fn process(&self, slot: MissingDocument, file: UploadFile) -> DocumentResult {
        let path = blob_path(&slot.order, &slot.document, &file.extension());
        let mut result = DocumentResult {
            document: slot.document.clone(),
            blob_path: path.clone(),
            url: None,
            status: DocumentStatus::Failed {
                error: String::new(),
            },
        };
        result.status = match self.store_and_validate(&slot, file, &path, &mut result.url).await {
            Ok(AgentOutcome::Completed(record)) => DocumentStatus::Validated {
                ai_response: record.ai_response,
            },
            Ok(timed_out @ AgentOutcome::TimedOut) => DocumentStatus::TimedOut {
                message: timed_out.message(),
            },
            Err(e) => {
                tracing::warn!(order = %slot.order, document = %slot.document, error = %e, "document upload failed");
                DocumentStatus::Failed { error: e.to_string() }
            }
        };
        result
    }

    async fn store_and_validate(
        &self,
        slot: &MissingDocument,
        file: UploadFile,
        path: &str,
        url_out: &mut Option<String>,
    ) -> Result<AgentOutcome, UploadError> {
        let url = self.blobs.upload(&self.container, path, file.bytes).await?;
        *url_out = Some(url.clone());
        self.orders
            .record_upload(&slot.record_id, path, Local::now().date_naive())
            .await?;
        let prompt = prompts::document_validation(&slot.document, &slot.order, &url);
        Ok(self.agent.ask(prompt, None, self.timeout).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentClient, LogPoller};
    use crate::blob::LocalBlobStore;
    use crate::config::sample_config;
    use crate::query::FilterExpression;
    use crate::store::{DocumentStore, MemoryStore};
    use axum::{Json, Router, http::StatusCode, routing::post};
    use serde_json::{Value, json};

    #[test]
    fn test_blob_path_layout() {
        assert_eq!(blob_path("T1", "Invoice", "pdf"), "data/orders/T1/T1_Invoice.pdf");
        let file = UploadFile {
            document: "Invoice".into(),
            file_name: "Scan.PDF".into(),
            bytes: vec![],
        };
        assert_eq!(file.extension(), "pdf");
    }

    fn orders() -> MemoryStore {
        MemoryStore::with_documents(vec![
            json!({"_id": "r1", "Order": "T1", "Status": "Document Required", "Document": "Invoice"}),
            json!({"_id": "r2", "Order": "T1", "Status": "Document Required", "Document": "Packing List"}),
            json!({"_id": "r3", "Order": "T1", "Status": "Approved", "Document": "Bill"}),
        ])
    }

    /// Agent stub: writes a log record for every request, except those
    /// mentioning `silent`.
    async fn spawn_agent(log: MemoryStore, silent: &'static str) -> Option<String> {
        let router = Router::new().route(
            "/agent-call",
            post(move |Json(req): Json<Value>| {
                let log = log.clone();
                async move {
                    let message = req["message"].as_str().unwrap_or_default().to_string();
                    if !message.contains(silent) {
                        log.insert_one(json!({
                            "thread_id": req["thread_id"],
                            "ai_response": format!("checked: {}", message.lines().nth(2).unwrap_or_default()),
                        }))
                        .await
                        .unwrap();
                    }
                    StatusCode::OK
                }
            }),
        );
        let listener = match tokio::net::TcpListener::bind("127.0.0.1:0").await {
            Ok(l) => l,
            Err(e) => {
                eprintln!("Skipping upload test (sandbox): {}", e);
                return None;
            }
        };
        let addr = listener.local_addr().ok()?;
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        Some(format!("http://{}/agent-call", addr))
    }

    fn uploader(orders: &MemoryStore, log: &MemoryStore, url: String, blob_dir: &Path) -> Uploader {
        let agent = AgentHandle::new(
            AgentClient::new(url),
            LogPoller::new(Arc::new(log.clone()), Duration::from_millis(20)),
            "admin-001",
        );
        Uploader::new(
            OrderBook::new(Arc::new(orders.clone()), sample_config().inputs),
            Arc::new(LocalBlobStore::new(blob_dir)),
            "docs",
            agent,
            Duration::from_millis(500),
        )
        .with_max_workers(2)
    }

    fn file(document: &str, name: &str) -> UploadFile {
        UploadFile {
            document: document.into(),
            file_name: name.into(),
            bytes: b"data".to_vec(),
        }
    }

    #[tokio::test]
    async fn test_upload_fans_out_and_joins() {
        let orders = orders();
        let log = MemoryStore::new();
        let Some(url) = spawn_agent(log.clone(), "Packing List").await else {
            return;
        };
        let dir = tempfile::tempdir().unwrap();
        let results = uploader(&orders, &log, url, dir.path())
            .upload("T1", vec![file("Invoice", "inv.pdf"), file("Packing List", "pl.png")])
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].document, "Invoice");
        assert_eq!(
            results[0].status,
            DocumentStatus::Validated {
                ai_response: "checked: doc_type is Invoice.".into()
            }
        );
        assert!(matches!(results[1].status, DocumentStatus::TimedOut { .. }));
        assert!(dir.path().join("docs/data/orders/T1/T1_Packing List.png").exists());

        let record = orders
            .find_one(&FilterExpression::by_id(&json!("r1")))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record["blob_path"], "data/orders/T1/T1_Invoice.pdf");
    }

    #[tokio::test]
    async fn test_upload_rejects_documents_not_outstanding() {
        let orders = orders();
        let dir = tempfile::tempdir().unwrap();
        let up = uploader(&orders, &MemoryStore::new(), "http://127.0.0.1:9/agent-call".into(), dir.path());
        let err = up.upload("T1", vec![file("Bill", "b.pdf")]).await.unwrap_err();
        assert!(matches!(err, UploadError::NotRequested { .. }));
        let err = up.upload("T404", vec![file("Invoice", "i.pdf")]).await.unwrap_err();
        assert!(matches!(err, UploadError::Order(_)));
        assert!(!dir.path().join("docs").exists());
    }
}
