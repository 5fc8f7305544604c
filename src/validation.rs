//! Human validation of extracted fields, and review of content-check
//! reports.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::agent::{AgentHandle, AgentOutcome, prompts};
use crate::document::{Document, ID_FIELD, scalar_text};
use crate::editor::{EditForm, EditSession, FieldIssue, NestedEditor};
use crate::errors::{StoreError, ValidationError};
use crate::events::newest_first;
use crate::query::{FilterExpression, Pattern, QueryBuilder};
use crate::store::{DocumentStore, UpdateResult, text_filter};

pub const EXTRACTED_FIELDS: &str = "Extracted Fields";
pub const VALIDATED_FLAG: &str = "human_validate_status";

/// How the search term selects records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    /// Match the term against every field of a sample record.
    FreeText,
    /// Orders sharing the term's prefix (text before the first `_`).
    Prefix,
    /// Exact order id.
    #[default]
    Full,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusFilter {
    #[default]
    All,
    Validated,
    NotValidated,
}

impl StatusFilter {
    pub fn filter(self) -> FilterExpression {
        match self {
            StatusFilter::All => FilterExpression::All,
            StatusFilter::Validated => FilterExpression::eq(VALIDATED_FLAG, true),
            StatusFilter::NotValidated => FilterExpression::ne(VALIDATED_FLAG, true),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationQuery {
    #[serde(default)]
    pub mode: SearchMode,
    #[serde(default)]
    pub term: String,
    #[serde(default)]
    pub status: StatusFilter,
}

/// Order filter for the prefix and full modes.
pub fn order_filter(mode: SearchMode, term: &str) -> FilterExpression {
    match mode {
        SearchMode::Prefix => {
            let prefix = term.split('_').next().unwrap_or_default();
            FilterExpression::regex("Order", Pattern::prefix(&format!("{}_", prefix)))
        }
        SearchMode::Full | SearchMode::FreeText => FilterExpression::eq("Order", term),
    }
}

/// Outcome of saving a validated record.
#[derive(Debug, Clone, Serialize)]
pub struct SaveOutcome {
    pub fields: Value,
    pub issues: Vec<FieldIssue>,
    pub modified: bool,
}

/// Search, render and confirm records awaiting human validation.
#[derive(Clone)]
pub struct ValidationDesk {
    store: Arc<dyn DocumentStore>,
    builder: QueryBuilder,
}

impl ValidationDesk {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            builder: QueryBuilder::new(),
        }
    }

    pub async fn search(&self, query: &ValidationQuery) -> Result<Vec<Document>, StoreError> {
        let term = query.term.trim();
        let mut filter = FilterExpression::All;
        if !term.is_empty() {
            filter = match query.mode {
                SearchMode::FreeText => text_filter(self.store.as_ref(), &self.builder, term).await?,
                mode => order_filter(mode, term),
            };
        }
        filter = filter.and(query.status.filter());
        tracing::debug!(filter = %filter.to_json(), "validation search");
        self.store.find(&filter).await
    }

    async fn fetch(&self, id: &str) -> Result<Document, ValidationError> {
        self.store
            .find_one(&FilterExpression::by_id_text(id))
            .await?
            .ok_or_else(|| ValidationError::NotFound { id: id.to_string() })
    }

    /// Editable view of a record's extracted fields.
    pub async fn form(&self, id: &str) -> Result<EditForm, ValidationError> {
        let doc = self.fetch(id).await?;
        Ok(extracted_form(&doc))
    }

    /// Apply `session` to the record's extracted fields and mark it
    /// validated, in one update.
    pub async fn save(&self, session: &EditSession) -> Result<SaveOutcome, ValidationError> {
        let doc = self.fetch(&session.document_id).await?;
        let rebuilt = extracted_form(&doc).submit(session)?;

        let mut set = Map::new();
        set.insert(EXTRACTED_FIELDS.to_string(), rebuilt.document.clone());
        set.insert(VALIDATED_FLAG.to_string(), Value::Bool(true));
        let key = doc.get(ID_FIELD).cloned().unwrap_or(Value::Null);
        let result = self.store.update_one(&FilterExpression::by_id(&key), set).await?;

        tracing::info!(
            id = %session.document_id,
            issues = rebuilt.issues.len(),
            "extracted fields confirmed"
        );
        Ok(SaveOutcome {
            fields: rebuilt.document,
            issues: rebuilt.issues,
            modified: result.modified > 0,
        })
    }
}

fn extracted_form(doc: &Document) -> EditForm {
    let identity = doc.get(ID_FIELD).map(scalar_text).unwrap_or_default();
    let fields = doc
        .get(EXTRACTED_FIELDS)
        .cloned()
        .unwrap_or_else(|| Value::Object(Map::new()));
    NestedEditor::new(identity)
        .with_prefix(EXTRACTED_FIELDS)
        .render(&fields)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleDecision {
    Approved,
    Rejected,
}

impl RuleDecision {
    pub fn as_str(self) -> &'static str {
        match self {
            RuleDecision::Approved => "Approved",
            RuleDecision::Rejected => "Rejected",
        }
    }
}

/// One `rule_N` entry of a content-check report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleResult {
    pub key: String,
    pub number: Option<u32>,
    pub rule: String,
    pub reason: String,
    pub score: Option<i64>,
    pub field_comparison: Value,
    pub approval_status: Option<String>,
}

/// Rule entries of a report, ordered by rule number; unnumbered last.
pub fn report_rules(report: &Document) -> Vec<RuleResult> {
    let Some(map) = report.as_object() else {
        return Vec::new();
    };
    let mut rules: Vec<RuleResult> = map
        .iter()
        .filter(|(k, _)| k.starts_with("rule_"))
        .map(|(k, v)| {
            let text = |name: &str| v.get(name).map(scalar_text).unwrap_or_default();
            RuleResult {
                key: k.clone(),
                number: k["rule_".len()..].parse().ok(),
                rule: text("Rule"),
                reason: text("Reason"),
                score: v.get("Score").and_then(Value::as_i64),
                field_comparison: v.get("Field Comparison").cloned().unwrap_or(Value::Null),
                approval_status: v
                    .get("approval_status")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            }
        })
        .collect();
    rules.sort_by_key(|r| (r.number.is_none(), r.number));
    rules
}

/// Content-check reports written by the agent.
#[derive(Clone)]
pub struct ReportDesk {
    store: Arc<dyn DocumentStore>,
}

impl ReportDesk {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Ask the agent to check an order's documents against `rules`.
    pub async fn request_check(
        &self,
        agent: &AgentHandle,
        order_id: &str,
        rules: &Value,
        doc_types: &[String],
        timeout: Duration,
    ) -> Result<AgentOutcome, ValidationError> {
        let prompt = prompts::content_check(order_id, rules, doc_types);
        tracing::info!(order_id, "requesting content check");
        Ok(agent.ask(prompt, None, timeout).await?)
    }

    /// Newest report whose `Order ID` matches `order_id`.
    pub async fn latest(&self, order_id: &str) -> Result<Option<Document>, StoreError> {
        let filter = FilterExpression::regex("Order ID", Pattern::new(order_id));
        let mut reports = self.store.find(&filter).await?;
        newest_first(&mut reports);
        Ok(reports.into_iter().next())
    }

    async fn fetch(&self, report_id: &str) -> Result<Document, ValidationError> {
        self.store
            .find_one(&FilterExpression::by_id_text(report_id))
            .await?
            .ok_or_else(|| ValidationError::NotFound {
                id: report_id.to_string(),
            })
    }

    pub async fn decide(
        &self,
        report_id: &str,
        rule_key: &str,
        decision: RuleDecision,
    ) -> Result<UpdateResult, ValidationError> {
        let report = self.fetch(report_id).await?;
        if !rule_key.starts_with("rule_") || report.get(rule_key).is_none() {
            return Err(ValidationError::UnknownRule(rule_key.to_string()));
        }

        let mut set = Map::new();
        set.insert(
            format!("{}.approval_status", rule_key),
            Value::String(decision.as_str().to_string()),
        );
        let key = report.get(ID_FIELD).cloned().unwrap_or(Value::Null);
        let result = self.store.update_one(&FilterExpression::by_id(&key), set).await?;
        tracing::info!(report = report_id, rule = rule_key, decision = decision.as_str(), "rule reviewed");
        Ok(result)
    }

    pub async fn confirm(&self, report_id: &str) -> Result<UpdateResult, ValidationError> {
        let report = self.fetch(report_id).await?;
        let mut set = Map::new();
        set.insert(VALIDATED_FLAG.to_string(), Value::Bool(true));
        let key = report.get(ID_FIELD).cloned().unwrap_or(Value::Null);
        Ok(self.store.update_one(&FilterExpression::by_id(&key), set).await?)
    }
}
