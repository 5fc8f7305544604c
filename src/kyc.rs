//! KYC extraction: store an identity or company document, have the agent
//! verify it and extract its fields, then let staff correct and confirm the
//! extracted fields on the records the agent files under the order.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::agent::{AgentHandle, TokenUsage, prompts};
use crate::blob::BlobStore;
use crate::config::KycConfig;
use crate::document::Document;
use crate::editor::{EditForm, EditSession};
use crate::errors::{KycError, StoreError, ValidationError};
use crate::events::newest_first;
use crate::orders::is_safe_order_id;
use crate::query::FilterExpression;
use crate::store::DocumentStore;
use crate::upload::{blob_path, file_extension};
use crate::validation::{SaveOutcome, ValidationDesk};

/// Nation sent when one file holds several document types.
pub const GENERAL_NATION: &str = "General";

/// What the uploaded file is expected to contain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum KycTarget {
    Single { nation: String, document_type: String },
    Multiple { document_types: Vec<String> },
}

#[derive(Debug, Clone)]
pub struct KycSubmission {
    pub order: String,
    pub target: KycTarget,
    pub file_name: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Serialize)]
pub struct KycOutcome {
    pub blob_path: String,
    pub url: String,
    pub timed_out: bool,
    pub message: String,
    pub token_usage: Option<TokenUsage>,
}

#[derive(Clone)]
pub struct KycDesk {
    config: KycConfig,
    store: Arc<dyn DocumentStore>,
    editor: ValidationDesk,
    blobs: Arc<dyn BlobStore>,
    container: String,
    agent: AgentHandle,
    timeout: Duration,
}

impl KycDesk {
    pub fn new(
        config: KycConfig,
        store: Arc<dyn DocumentStore>,
        blobs: Arc<dyn BlobStore>,
        container: impl Into<String>,
        agent: AgentHandle,
        timeout: Duration,
    ) -> Self {
        Self {
            config,
            editor: ValidationDesk::new(store.clone()),
            store,
            blobs,
            container: container.into(),
            agent,
            timeout,
        }
    }

    fn check(&self, submission: &KycSubmission) -> Result<(), KycError> {
        let order = submission.order.trim();
        if order.is_empty() {
            return Err(KycError::MissingOrder);
        }
        if !is_safe_order_id(order) {
            return Err(KycError::InvalidOrder(order.to_string()));
        }
        match &submission.target {
            KycTarget::Single {
                nation,
                document_type,
            } => {
                let issued = self
                    .config
                    .document_types(nation)
                    .ok_or_else(|| KycError::UnknownNation(nation.clone()))?;
                if !issued.contains(document_type) {
                    return Err(KycError::UnknownDocumentType {
                        nation: nation.clone(),
                        document: document_type.clone(),
                    });
                }
            }
            KycTarget::Multiple { document_types } => {
                if document_types.is_empty() {
                    return Err(KycError::NoDocumentTypes);
                }
                if let Some(unknown) = document_types
                    .iter()
                    .find(|d| !self.config.possible_doc_type.contains(d))
                {
                    return Err(KycError::UnknownDocumentType {
                        nation: GENERAL_NATION.to_string(),
                        document: unknown.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Store the file and wait for the agent's verification. A timeout is
    /// reported in the outcome, not as an error.
    pub async fn submit(&self, submission: KycSubmission) -> Result<KycOutcome, KycError> {
        self.check(&submission)?;
        let order = submission.order.trim();
        let file_type = file_extension(&submission.file_name);
        let (label, nation, target, possible) = match &submission.target {
            KycTarget::Single {
                nation,
                document_type,
            } => (document_type.as_str(), nation.as_str(), Some(document_type.as_str()), None),
            KycTarget::Multiple { document_types } => {
                ("Multiple", GENERAL_NATION, None, Some(document_types.as_slice()))
            }
        };

        let path = blob_path(order, label, &file_type);
        let url = self
            .blobs
            .upload(&self.container, &path, submission.bytes)
            .await?;

        let prompt = prompts::kyc_extraction(&prompts::KycRequest {
            order_id: order,
            file_url: &url,
            file_type: &file_type,
            nationality: nation,
            possible_doc_types: possible,
            target_doc_type: target,
            multiple_doc_types: possible.is_some(),
        });
        tracing::info!(order, nation, blob = %path, "requesting KYC extraction");
        let outcome = self.agent.ask(prompt, None, self.timeout).await?;

        Ok(KycOutcome {
            blob_path: path,
            url,
            timed_out: outcome.record().is_none(),
            message: outcome.message(),
            token_usage: outcome.record().map(|r| r.token_usage),
        })
    }

    /// Extraction records filed under `order`, newest first.
    pub async fn records(&self, order: &str) -> Result<Vec<Document>, StoreError> {
        let mut docs = self
            .store
            .find(&FilterExpression::eq("Order ID", order.trim()))
            .await?;
        newest_first(&mut docs);
        Ok(docs)
    }

    pub async fn form(&self, id: &str) -> Result<EditForm, ValidationError> {
        self.editor.form(id).await
    }

    /// Write back the edited fields and mark the record human validated.
    pub async fn save(&self, session: &EditSession) -> Result<SaveOutcome, ValidationError> {
        self.editor.save(session).await
    }
}
