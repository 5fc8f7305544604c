//! Supplier and product search through the agent.
//!
//! The agent writes a search-history record keyed by the `search_id` we mint;
//! its id list is resolved against the catalog collections.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use crate::agent::{AgentHandle, AgentOutcome, prompts};
use crate::document::{Document, prune};
use crate::errors::AgentError;
use crate::query::FilterExpression;
use crate::store::DocumentStore;

/// Keys never shown in catalog records.
pub const HIDDEN_KEYS: &[&str] = &["_id", "FacilityImage"];

/// Most results resolved per search.
pub const DISPLAY_LIMIT: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CatalogKind {
    Supplier,
    Product,
}

impl CatalogKind {
    fn ids_field(self) -> &'static str {
        match self {
            CatalogKind::Supplier => "supplier_ids",
            CatalogKind::Product => "product_uuids",
        }
    }

    fn lookup(self, id: &Value) -> FilterExpression {
        match self {
            CatalogKind::Supplier => FilterExpression::eq("System.ID", id.clone()),
            CatalogKind::Product => FilterExpression::by_id(id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub id: Value,
    pub reason: Option<String>,
    pub retrieved: Option<Value>,
    /// Catalog record, pruned; `None` when the id is unknown.
    pub record: Option<Document>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResults {
    pub kind: CatalogKind,
    pub search_id: String,
    pub timed_out: bool,
    pub hits: Vec<SearchHit>,
}

#[derive(Clone)]
pub struct Sourcing {
    agent: AgentHandle,
    suppliers: Arc<dyn DocumentStore>,
    products: Arc<dyn DocumentStore>,
    supplier_searches: Arc<dyn DocumentStore>,
    product_searches: Arc<dyn DocumentStore>,
    timeout: Duration,
}

impl Sourcing {
    pub fn new(
        agent: AgentHandle,
        suppliers: Arc<dyn DocumentStore>,
        products: Arc<dyn DocumentStore>,
        supplier_searches: Arc<dyn DocumentStore>,
        product_searches: Arc<dyn DocumentStore>,
        timeout: Duration,
    ) -> Self {
        Self {
            agent,
            suppliers,
            products,
            supplier_searches,
            product_searches,
            timeout,
        }
    }

    pub async fn search_suppliers(&self, query: &str) -> Result<SearchResults, AgentError> {
        let search_id = uuid::Uuid::new_v4().to_string();
        let prompt = prompts::supplier_search(&search_id, query);
        self.run(CatalogKind::Supplier, search_id, prompt).await
    }

    /// Search by text, by image URL, or both.
    pub async fn search_products(
        &self,
        query: Option<&str>,
        image_url: Option<&str>,
    ) -> Result<SearchResults, AgentError> {
        let search_id = uuid::Uuid::new_v4().to_string();
        let prompt = prompts::product_search(&search_id, query, image_url);
        self.run(CatalogKind::Product, search_id, prompt).await
    }

    async fn run(&self, kind: CatalogKind, search_id: String, prompt: String) -> Result<SearchResults, AgentError> {
        tracing::info!(?kind, search_id = %search_id, "catalog search");
        let outcome = self
            .agent
            .ask(prompt, Some(prompts::SEARCH_ROLE), self.timeout)
            .await?;
        let hits = match outcome {
            AgentOutcome::TimedOut => Vec::new(),
            AgentOutcome::Completed(_) => self.resolve(kind, &search_id).await?,
        };
        Ok(SearchResults {
            kind,
            search_id,
            timed_out: matches!(outcome, AgentOutcome::TimedOut),
            hits,
        })
    }

    async fn resolve(&self, kind: CatalogKind, search_id: &str) -> Result<Vec<SearchHit>, AgentError> {
        let (history, catalog) = match kind {
            CatalogKind::Supplier => (&self.supplier_searches, &self.suppliers),
            CatalogKind::Product => (&self.product_searches, &self.products),
        };
        let Some(record) = history
            .find_one(&FilterExpression::eq("search_id", search_id))
            .await?
        else {
            tracing::warn!(search_id, "search finished without a history record");
            return Ok(Vec::new());
        };

        let list = |name: &str| record.get(name).and_then(Value::as_array).cloned().unwrap_or_default();
        let ids = list(kind.ids_field());
        let reasons = list("reasons");
        let retrieved = list("retrieved_data");

        let mut hits = Vec::new();
        for (i, id) in ids.into_iter().take(DISPLAY_LIMIT).enumerate() {
            let record = catalog
                .find_one(&kind.lookup(&id))
                .await?
                .map(|doc| prune(&doc, HIDDEN_KEYS));
            hits.push(SearchHit {
                id,
                reason: reasons.get(i).and_then(Value::as_str).map(str::to_string),
                retrieved: retrieved.get(i).cloned(),
                record,
            });
        }
        Ok(hits)
    }
}
