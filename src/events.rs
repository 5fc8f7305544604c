//! Event log browsing.

use std::cmp::Reverse;
use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document::{Document, ID_FIELD, scalar_text};
use crate::errors::StoreError;
use crate::orders::TIME_FORMAT;
use crate::query::{FilterExpression, ListPaths, QueryBuilder};
use crate::store::{DocumentStore, text_filter};

/// Parse a stored timestamp. Dashboard records use [`TIME_FORMAT`]; agent
/// records may carry RFC 3339 or ISO-like text.
pub fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    NaiveDateTime::parse_from_str(text, TIME_FORMAT)
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(text).ok().map(|dt| dt.naive_utc()))
        .or_else(|| NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f").ok())
        .or_else(|| NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f").ok())
}

/// Sort records by `created_time`, newest first. Records without a
/// readable time go last.
pub fn newest_first(docs: &mut [Document]) {
    docs.sort_by_cached_key(|d| {
        let created = d.get("created_time");
        let parsed = created.and_then(Value::as_str).and_then(parse_timestamp);
        Reverse((parsed, created.map(scalar_text)))
    });
}

/// Trim and fold every whitespace run into one space.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventQuery {
    /// Free text matched against every field. Takes precedence over the
    /// structured filters.
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub event_types: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventEntry {
    pub id: Value,
    pub created_time: Option<NaiveDateTime>,
    /// `created_time` as stored.
    pub created_label: String,
    pub event_type: String,
    pub order_id: String,
    pub activity: String,
}

impl EventEntry {
    fn from_document(doc: &Document) -> Self {
        let field = |name: &str| match doc.get(name) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => "N/A".to_string(),
            Some(other) => other.to_string(),
        };
        let created_label = field("created_time");
        Self {
            id: doc.get(ID_FIELD).cloned().unwrap_or(Value::Null),
            created_time: parse_timestamp(&created_label),
            created_label,
            event_type: field("event_type"),
            order_id: field("order_id"),
            activity: collapse_whitespace(&field("activity")),
        }
    }
}

#[derive(Clone)]
pub struct EventLog {
    store: Arc<dyn DocumentStore>,
    builder: QueryBuilder,
}

impl EventLog {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            builder: QueryBuilder::new().with_list_paths(ListPaths::FlattenMappings),
        }
    }

    async fn filter(&self, query: &EventQuery) -> Result<FilterExpression, StoreError> {
        if let Some(text) = query.text.as_deref().filter(|t| !t.trim().is_empty()) {
            return text_filter(self.store.as_ref(), &self.builder, text).await;
        }
        let mut filter = FilterExpression::All;
        if let Some(order) = query.order_id.as_deref().filter(|o| !o.is_empty()) {
            filter = filter.and(FilterExpression::eq("order_id", order));
        }
        if !query.event_types.is_empty() {
            let types = query.event_types.iter().cloned().map(Value::String).collect();
            filter = filter.and(FilterExpression::is_in("event_type", types));
        }
        Ok(filter)
    }

    /// Matching events, oldest first. Entries without a readable time go last.
    pub async fn search(&self, query: &EventQuery) -> Result<Vec<EventEntry>, StoreError> {
        let filter = self.filter(query).await?;
        let mut entries: Vec<EventEntry> = self
            .store
            .find(&filter)
            .await?
            .iter()
            .map(EventEntry::from_document)
            .collect();
        entries.sort_by_key(|e| (e.created_time.is_none(), e.created_time));
        Ok(entries)
    }

    pub async fn event_types(&self) -> Result<Vec<Value>, StoreError> {
        self.store.distinct("event_type").await
    }

    pub async fn order_ids(&self) -> Result<Vec<Value>, StoreError> {
        self.store.distinct("order_id").await
    }
}
