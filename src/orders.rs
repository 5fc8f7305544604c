//! The order book: one record per (order, document type).
//!
//! Record shape:
//!
//! ```json
//! {"_id": "...", "Order": "T1", "Target Email": "a@b.c", "Target Whatsapp": "+85291234567",
//!  "Status": "Document Required", "Document": "Invoice",
//!  "Last Modified": "19/10/2026 09:30AM", "Created Time": "19/10/2026 09:30AM",
//!  "Due Date": "31/10/2026"}
//! ```

use std::sync::Arc;

use chrono::{Local, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::config::InputsConfig;
use crate::document::{Document, ID_FIELD};
use crate::errors::OrderError;
use crate::query::FilterExpression;
use crate::store::DocumentStore;

pub const STATUS_DOCUMENT_REQUIRED: &str = "Document Required";
pub const STATUS_AI_VALIDATED: &str = "AI Validated";
pub const STATUS_HUMAN_VALIDATED: &str = "Human Validated";
pub const STATUS_APPROVED: &str = "Approved";

/// Timestamp format of `Last Modified` and `Created Time`.
pub const TIME_FORMAT: &str = "%d/%m/%Y %I:%M%p";
pub const DATE_FORMAT: &str = "%d/%m/%Y";

/// A new order as entered by staff.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewOrder {
    pub order: String,
    #[serde(default)]
    pub email: String,
    /// Country key from the config's `country_code` table.
    #[serde(default)]
    pub country: Option<String>,
    /// Local number; the country's phone code is prepended.
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub documents: Vec<String>,
    /// Defaults to the placement date.
    #[serde(default)]
    pub due: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OrderStats {
    pub total_documents: u64,
    pub total_orders: u64,
    pub document_required: u64,
    pub ai_validated: u64,
    pub human_validated: u64,
    pub approved: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderProgress {
    pub order: String,
    pub total_documents: u64,
    pub completed_documents: u64,
    /// Percentage, two decimals.
    pub progress_rate: f64,
}

/// A document still outstanding on an order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MissingDocument {
    /// Key of the order record that asks for it.
    pub record_id: Value,
    pub order: String,
    pub document: String,
}

/// Split a comma-separated id list, dropping blanks.
pub fn split_ids(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Order ids end up in blob paths, so separators and parent references are refused.
pub(crate) fn is_safe_order_id(order: &str) -> bool {
    !order.contains(['/', '\\']) && !order.contains("..")
}

fn text<'a>(doc: &'a Document, field: &str) -> &'a str {
    doc.get(field).and_then(Value::as_str).unwrap_or_default()
}

#[derive(Clone)]
pub struct OrderBook {
    store: Arc<dyn DocumentStore>,
    inputs: InputsConfig,
}

impl OrderBook {
    pub fn new(store: Arc<dyn DocumentStore>, inputs: InputsConfig) -> Self {
        Self { store, inputs }
    }

    pub async fn place(&self, new: &NewOrder) -> Result<Vec<Value>, OrderError> {
        self.place_at(new, Local::now().naive_local()).await
    }

    /// Insert one record per requested document type. Nothing is written
    /// when validation fails or the order id is taken.
    pub async fn place_at(&self, new: &NewOrder, now: NaiveDateTime) -> Result<Vec<Value>, OrderError> {
        let order = new.order.trim();
        let email = new.email.trim();
        let phone = new.phone.trim();
        if order.is_empty() {
            return Err(OrderError::MissingFields);
        }
        if !is_safe_order_id(order) {
            return Err(OrderError::InvalidOrderId(order.to_string()));
        }
        if new.documents.is_empty() {
            return Err(OrderError::NoDocuments);
        }
        if let Some(unknown) = new
            .documents
            .iter()
            .find(|d| !self.inputs.document_type.contains(d))
        {
            return Err(OrderError::UnknownDocumentType(unknown.clone()));
        }

        let code = match new.country.as_deref().map(str::trim) {
            Some(country) if !country.is_empty() => self
                .inputs
                .country_code
                .get(country)
                .ok_or_else(|| OrderError::UnknownCountry(country.to_string()))?
                .as_str(),
            _ => "",
        };
        let whatsapp = format!("{}{}", code, phone);

        if self
            .store
            .find_one(&FilterExpression::eq("Order", order))
            .await?
            .is_some()
        {
            tracing::warn!(order, "rejecting duplicate order");
            return Err(OrderError::AlreadyExists {
                order: order.to_string(),
            });
        }

        let stamp = now.format(TIME_FORMAT).to_string();
        let due = new.due.unwrap_or(now.date()).format(DATE_FORMAT).to_string();
        let mut ids = Vec::with_capacity(new.documents.len());
        for document in &new.documents {
            let id = self
                .store
                .insert_one(json!({
                    "Order": order,
                    "Target Email": email,
                    "Target Whatsapp": whatsapp,
                    "Status": STATUS_DOCUMENT_REQUIRED,
                    "Document": document,
                    "Last Modified": stamp,
                    "Created Time": stamp,
                    "Due Date": due,
                }))
                .await?;
            ids.push(id);
        }
        tracing::info!(order, documents = ids.len(), "order placed");
        Ok(ids)
    }

    /// Delete every record whose order id is in the comma-separated list.
    pub async fn delete(&self, id_list: &str) -> Result<u64, OrderError> {
        let ids = split_ids(id_list);
        if ids.is_empty() {
            return Ok(0);
        }
        let values = ids.iter().map(|s| Value::String(s.clone())).collect();
        let removed = self
            .store
            .delete_many(&FilterExpression::is_in("Order", values))
            .await?;
        tracing::info!(orders = ?ids, removed, "orders deleted");
        Ok(removed)
    }

    /// Records, optionally restricted to the listed order ids.
    pub async fn list(&self, id_list: Option<&str>) -> Result<Vec<Document>, OrderError> {
        let filter = match id_list.map(split_ids) {
            Some(ids) if !ids.is_empty() => {
                FilterExpression::is_in("Order", ids.into_iter().map(Value::String).collect())
            }
            _ => FilterExpression::All,
        };
        Ok(self.store.find(&filter).await?)
    }

    pub async fn statistics(&self) -> Result<OrderStats, OrderError> {
        let docs = self.store.find(&FilterExpression::All).await?;
        let mut stats = OrderStats {
            total_documents: docs.len() as u64,
            ..Default::default()
        };
        let mut orders: Vec<&str> = Vec::new();
        for doc in &docs {
            if let Some(order) = doc.get("Order").and_then(Value::as_str) {
                if !orders.contains(&order) {
                    orders.push(order);
                }
            }
            match text(doc, "Status") {
                STATUS_DOCUMENT_REQUIRED => stats.document_required += 1,
                STATUS_AI_VALIDATED => stats.ai_validated += 1,
                STATUS_HUMAN_VALIDATED => stats.human_validated += 1,
                STATUS_APPROVED => stats.approved += 1,
                _ => {}
            }
        }
        stats.total_orders = orders.len() as u64;
        Ok(stats)
    }

    /// Per-order completion, in first-seen order.
    pub async fn progress(&self) -> Result<Vec<OrderProgress>, OrderError> {
        let docs = self.store.find(&FilterExpression::All).await?;
        let mut out: Vec<OrderProgress> = Vec::new();
        for doc in &docs {
            let Some(order) = doc.get("Order").and_then(Value::as_str) else {
                continue;
            };
            let idx = match out.iter().position(|p| p.order == order) {
                Some(i) => i,
                None => {
                    out.push(OrderProgress {
                        order: order.to_string(),
                        total_documents: 0,
                        completed_documents: 0,
                        progress_rate: 0.0,
                    });
                    out.len() - 1
                }
            };
            let entry = &mut out[idx];
            entry.total_documents += 1;
            if text(doc, "Status") != STATUS_DOCUMENT_REQUIRED {
                entry.completed_documents += 1;
            }
        }
        for p in &mut out {
            let rate = p.completed_documents as f64 / p.total_documents as f64 * 100.0;
            p.progress_rate = (rate * 100.0).round() / 100.0;
        }
        Ok(out)
    }

    /// Documents on `order` not yet validated or approved.
    pub async fn missing_documents(&self, order: &str) -> Result<Vec<MissingDocument>, OrderError> {
        let records = self
            .store
            .find(&FilterExpression::eq("Order", order))
            .await?;
        if records.is_empty() {
            return Err(OrderError::NotFound {
                order: order.to_string(),
            });
        }

        let mut missing = Vec::new();
        for record in &records {
            let status = text(record, "Status");
            if status == STATUS_APPROVED || status == STATUS_AI_VALIDATED {
                continue;
            }
            let record_id = record.get(ID_FIELD).cloned().unwrap_or(Value::Null);
            for document in split_ids(text(record, "Document")) {
                missing.push(MissingDocument {
                    record_id: record_id.clone(),
                    order: order.to_string(),
                    document,
                });
            }
        }
        Ok(missing)
    }

    /// Note an uploaded file on its order record.
    pub async fn record_upload(
        &self,
        record_id: &Value,
        blob_path: &str,
        modified: NaiveDate,
    ) -> Result<(), OrderError> {
        let mut set = Map::new();
        set.insert(
            "st_modified_date".into(),
            Value::String(modified.format("%Y-%m-%d").to_string()),
        );
        set.insert("blob_path".into(), Value::String(blob_path.to_string()));
        self.store
            .update_one(&FilterExpression::by_id(record_id), set)
            .await?;
        Ok(())
    }
}
