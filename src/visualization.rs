//! Charts produced by the data-visualisation agent. Only records that carry
//! a rendered result are offered.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::document::{Document, scalar_text};
use crate::errors::StoreError;
use crate::query::FilterExpression;
use crate::store::DocumentStore;

pub const RESULT_FIELD: &str = "data_visualization_result";

/// One answered question and its chart.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Visualization {
    pub uuid: String,
    pub question: String,
    pub answer: String,
    pub visualization_reason: String,
    /// Self-contained HTML of the chart.
    pub html: String,
}

impl Visualization {
    fn from_document(doc: &Document) -> Self {
        let text = |name: &str| doc.get(name).map(scalar_text).unwrap_or_default();
        Self {
            uuid: text("uuid"),
            question: text("question"),
            answer: text("answer"),
            visualization_reason: text("visualization_reason"),
            html: text(RESULT_FIELD),
        }
    }
}

#[derive(Clone)]
pub struct VisualizationGallery {
    store: Arc<dyn DocumentStore>,
}

impl VisualizationGallery {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    fn rendered() -> FilterExpression {
        FilterExpression::ne(RESULT_FIELD, Value::Null)
    }

    /// Ids of rendered charts, in store order.
    pub async fn uuids(&self) -> Result<Vec<String>, StoreError> {
        Ok(self
            .store
            .find(&Self::rendered())
            .await?
            .iter()
            .filter_map(|d| d.get("uuid").map(scalar_text))
            .collect())
    }

    pub async fn get(&self, uuid: &str) -> Result<Option<Visualization>, StoreError> {
        let filter = FilterExpression::eq("uuid", uuid).and(Self::rendered());
        Ok(self
            .store
            .find_one(&filter)
            .await?
            .as_ref()
            .map(Visualization::from_document))
    }
}
