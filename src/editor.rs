//! Field-by-field editing of untyped documents.
//!
//! [`NestedEditor::render`] turns a document into a tree of [`Control`]s:
//! a text field per scalar, a group per mapping, a grid per sequence of
//! mappings and a list per other sequence. [`EditForm::submit`] applies an
//! [`EditSession`] and rebuilds a document of the same shape.
//!
//! Unedited fields keep their original value exactly. A bad edit is
//! reported as a [`FieldIssue`] and the original value is kept; it never
//! prevents the rest of the document from being rebuilt.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use thiserror::Error;

use crate::document::{Document, FieldPath, decode_structured, scalar_text};

/// Scalar type of a text field, used to parse the edited text back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarKind {
    Null,
    Bool,
    Integer,
    Float,
    String,
}

impl ScalarKind {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => ScalarKind::Null,
            Value::Bool(_) => ScalarKind::Bool,
            Value::Number(n) if n.is_f64() => ScalarKind::Float,
            Value::Number(_) => ScalarKind::Integer,
            _ => ScalarKind::String,
        }
    }

    /// Parse edited text back into this kind. Text that does not fit the
    /// kind is kept as a string.
    pub fn parse(self, text: &str) -> Value {
        let trimmed = text.trim();
        match self {
            ScalarKind::String => Value::String(text.to_string()),
            ScalarKind::Bool => match trimmed.to_ascii_lowercase().as_str() {
                "true" => Value::Bool(true),
                "false" => Value::Bool(false),
                _ => Value::String(text.to_string()),
            },
            ScalarKind::Integer => {
                if let Ok(i) = trimmed.parse::<i64>() {
                    Value::from(i)
                } else if let Ok(u) = trimmed.parse::<u64>() {
                    Value::from(u)
                } else {
                    ScalarKind::Float.parse(text)
                }
            }
            ScalarKind::Float => trimmed
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .unwrap_or_else(|| Value::String(text.to_string())),
            ScalarKind::Null => {
                if trimmed.is_empty() {
                    return Value::Null;
                }
                match serde_json::from_str::<Value>(trimmed) {
                    Ok(v @ (Value::Bool(_) | Value::Number(_) | Value::Null)) => v,
                    _ => Value::String(text.to_string()),
                }
            }
        }
    }
}

/// One rendered control.
#[derive(Debug, Clone, Serialize)]
pub struct Control {
    /// Unique across all documents rendered with distinct identities.
    pub id: String,
    /// Mapping key, or element index for sequence items.
    pub label: String,
    /// Full dotted path, including the editor prefix.
    pub path: String,
    /// Nesting depth, for indentation.
    pub depth: usize,
    pub widget: Widget,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Widget {
    Text {
        value: String,
        kind: ScalarKind,
        #[serde(skip)]
        original: Value,
    },
    Group {
        children: Vec<Control>,
    },
    List {
        items: Vec<Control>,
    },
    /// A sequence of mappings as a table. Columns are the union of the
    /// element keys in first-seen order; absent keys render as null.
    Grid {
        columns: Vec<String>,
        rows: Vec<Vec<Value>>,
    },
}

/// User edits for one document, addressed by full dotted path.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EditSession {
    /// Store key of the document being edited.
    #[serde(default)]
    pub document_id: String,
    /// Replacement text for scalar fields.
    #[serde(default)]
    pub fields: HashMap<String, String>,
    /// Replacement rows for grid fields.
    #[serde(default)]
    pub grids: HashMap<String, Vec<Value>>,
}

impl EditSession {
    pub fn new(document_id: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            ..Default::default()
        }
    }

    pub fn set_field(mut self, path: &str, text: impl Into<String>) -> Self {
        self.fields.insert(path.to_string(), text.into());
        self
    }

    pub fn set_grid(mut self, path: &str, rows: Vec<Value>) -> Self {
        self.grids.insert(path.to_string(), rows);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.grids.is_empty()
    }
}

/// An edit that could not be applied; the original value was kept.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldIssue {
    pub path: String,
    pub message: String,
}

#[derive(Debug, Error, PartialEq)]
pub enum EditError {
    #[error("Edit session for '{session}' does not belong to document '{form}'")]
    IdentityMismatch { form: String, session: String },
}

/// Result of applying an edit session.
#[derive(Debug, Clone)]
pub struct Reconstruction {
    pub document: Document,
    pub issues: Vec<FieldIssue>,
}

/// Renders documents into editable controls.
#[derive(Debug, Clone)]
pub struct NestedEditor {
    identity: String,
    prefix: FieldPath,
}

impl NestedEditor {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            prefix: FieldPath::root(),
        }
    }

    /// Path of the rendered subtree inside its enclosing record, e.g.
    /// `Extracted Fields`. Control paths and edit paths include it.
    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.prefix = FieldPath::parse(prefix);
        self
    }

    pub fn render(&self, doc: &Document) -> EditForm {
        let label = match self.prefix.last() {
            Some(seg) => seg.to_string(),
            None => String::new(),
        };
        EditForm {
            identity: self.identity.clone(),
            root: self.control(&label, doc, &self.prefix, 0),
        }
    }

    fn control(&self, label: &str, value: &Value, path: &FieldPath, depth: usize) -> Control {
        let decoded = match value {
            Value::String(s) => decode_structured(s),
            _ => None,
        };
        let value = decoded.as_ref().unwrap_or(value);

        let widget = match value {
            Value::Object(map) => Widget::Group {
                children: map
                    .iter()
                    .map(|(k, v)| self.control(k, v, &path.key(k), depth + 1))
                    .collect(),
            },
            Value::Array(items) if items.iter().all(Value::is_object) => grid(items),
            Value::Array(items) => Widget::List {
                items: items
                    .iter()
                    .enumerate()
                    .map(|(i, v)| self.control(&i.to_string(), v, &path.index(i), depth + 1))
                    .collect(),
            },
            scalar => Widget::Text {
                value: scalar_text(scalar),
                kind: ScalarKind::of(scalar),
                original: scalar.clone(),
            },
        };

        Control {
            id: format!("{}_{}", self.identity, path),
            label: label.to_string(),
            path: path.to_string(),
            depth,
            widget,
        }
    }
}

fn grid(items: &[Value]) -> Widget {
    let mut columns: Vec<String> = Vec::new();
    for item in items {
        if let Value::Object(map) = item {
            for k in map.keys() {
                if !columns.contains(k) {
                    columns.push(k.clone());
                }
            }
        }
    }
    let rows = items
        .iter()
        .map(|item| {
            columns
                .iter()
                .map(|c| item.get(c).cloned().unwrap_or(Value::Null))
                .collect()
        })
        .collect();
    Widget::Grid { columns, rows }
}

/// A rendered document awaiting edits.
#[derive(Debug, Clone, Serialize)]
pub struct EditForm {
    pub identity: String,
    pub root: Control,
}

impl EditForm {
    /// Every control in render order, depth-first.
    pub fn controls(&self) -> Vec<&Control> {
        fn collect<'a>(c: &'a Control, out: &mut Vec<&'a Control>) {
            out.push(c);
            match &c.widget {
                Widget::Group { children } => children.iter().for_each(|ch| collect(ch, out)),
                Widget::List { items } => items.iter().for_each(|ch| collect(ch, out)),
                _ => {}
            }
        }
        let mut out = Vec::new();
        collect(&self.root, &mut out);
        out
    }

    pub fn find(&self, path: &str) -> Option<&Control> {
        self.controls().into_iter().find(|c| c.path == path)
    }

    /// Rebuild the document with `session` applied.
    ///
    /// Edits addressed to unknown paths, or to a control of the wrong kind,
    /// are reported and ignored.
    pub fn submit(&self, session: &EditSession) -> Result<Reconstruction, EditError> {
        if !session.document_id.is_empty() && session.document_id != self.identity {
            return Err(EditError::IdentityMismatch {
                form: self.identity.clone(),
                session: session.document_id.clone(),
            });
        }

        let mut issues = Vec::new();
        let mut used_fields = 0;
        let mut used_grids = 0;
        let document = rebuild(&self.root, session, &mut issues, &mut used_fields, &mut used_grids);

        if used_fields < session.fields.len() || used_grids < session.grids.len() {
            let controls = self.controls();
            let mut unknown: Vec<&String> = session
                .fields
                .keys()
                .filter(|p| !controls.iter().any(|c| &c.path == *p && matches!(c.widget, Widget::Text { .. })))
                .chain(session.grids.keys().filter(|p| {
                    !controls
                        .iter()
                        .any(|c| &c.path == *p && matches!(c.widget, Widget::Grid { .. }))
                }))
                .collect();
            unknown.sort();
            for path in unknown {
                tracing::warn!(path = %path, identity = %self.identity, "ignoring edit for unknown field");
                issues.push(FieldIssue {
                    path: path.clone(),
                    message: "no editable field at this path".into(),
                });
            }
        }

        Ok(Reconstruction { document, issues })
    }
}

fn rebuild(
    control: &Control,
    session: &EditSession,
    issues: &mut Vec<FieldIssue>,
    used_fields: &mut usize,
    used_grids: &mut usize,
) -> Value {
    match &control.widget {
        Widget::Text {
            value,
            kind,
            original,
        } => match session.fields.get(&control.path) {
            Some(text) => {
                *used_fields += 1;
                if text == value {
                    original.clone()
                } else {
                    kind.parse(text)
                }
            }
            None => original.clone(),
        },
        Widget::Group { children } => Value::Object(
            children
                .iter()
                .map(|c| {
                    (
                        c.label.clone(),
                        rebuild(c, session, issues, used_fields, used_grids),
                    )
                })
                .collect(),
        ),
        Widget::List { items } => Value::Array(
            items
                .iter()
                .map(|c| rebuild(c, session, issues, used_fields, used_grids))
                .collect(),
        ),
        Widget::Grid { columns, rows } => {
            let rendered = || {
                Value::Array(
                    rows.iter()
                        .map(|cells| {
                            Value::Object(
                                columns.iter().cloned().zip(cells.iter().cloned()).collect(),
                            )
                        })
                        .collect(),
                )
            };
            match session.grids.get(&control.path) {
                Some(edited) => {
                    *used_grids += 1;
                    match grid_rows(columns, edited) {
                        Ok(v) => v,
                        Err(message) => {
                            tracing::warn!(path = %control.path, %message, "keeping original grid rows");
                            issues.push(FieldIssue {
                                path: control.path.clone(),
                                message,
                            });
                            rendered()
                        }
                    }
                }
                None => rendered(),
            }
        }
    }
}

/// Normalise submitted grid rows: every row must be a mapping; grid
/// columns come first in grid order, absent ones filled with null.
fn grid_rows(columns: &[String], edited: &[Value]) -> Result<Value, String> {
    let mut out = Vec::with_capacity(edited.len());
    for (i, row) in edited.iter().enumerate() {
        let Value::Object(cells) = row else {
            return Err(format!("row {} is not a mapping", i));
        };
        let mut rebuilt = Map::new();
        for c in columns {
            rebuilt.insert(c.clone(), cells.get(c).cloned().unwrap_or(Value::Null));
        }
        for (k, v) in cells {
            if !rebuilt.contains_key(k) {
                rebuilt.insert(k.clone(), v.clone());
            }
        }
        out.push(Value::Object(rebuilt));
    }
    Ok(Value::Array(out))
}
