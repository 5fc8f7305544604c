//! Filter expressions over untyped documents.
//!
//! [`QueryBuilder`] turns a representative document plus a free-text search
//! term into a disjunction with one case-insensitive match per leaf field.
//! The resulting [`FilterExpression`] can be rendered as a document-database
//! query (`{"$or": [{"a.b": {"$regex": "x", "$options": "i"}}, ...]}`) and
//! evaluated in-process by the bundled stores.

use regex::{Regex, RegexBuilder};
use serde_json::{Map, Value, json};

use crate::document::{Document, FieldPath, ID_FIELD, resolve};

/// A case-insensitive pattern built from user input.
///
/// The term is used as a regex fragment. Input that is not a valid regex is
/// matched literally instead of being rejected.
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    regex: Option<Regex>,
}

impl Pattern {
    pub fn new(term: &str) -> Self {
        let regex = RegexBuilder::new(term)
            .case_insensitive(true)
            .build()
            .or_else(|_| {
                RegexBuilder::new(&regex::escape(term))
                    .case_insensitive(true)
                    .build()
            })
            .ok();
        Self {
            source: term.to_string(),
            regex,
        }
    }

    /// Anchored prefix pattern, e.g. `^PO123_`.
    pub fn prefix(prefix: &str) -> Self {
        Self::new(&format!("^{}", regex::escape(prefix)))
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex.as_ref().is_some_and(|r| r.is_match(text))
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

/// Condition applied to the value(s) found at a field path.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Case-insensitive regex against string values.
    Regex(Pattern),
    Eq(Value),
    Ne(Value),
    In(Vec<Value>),
}

/// A query predicate tree.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterExpression {
    /// Matches every document (`{}`).
    All,
    /// Matches no document.
    Nothing,
    Or(Vec<FilterExpression>),
    And(Vec<FilterExpression>),
    Field { path: FieldPath, condition: Condition },
}

impl FilterExpression {
    pub fn field(path: impl Into<FieldPath>, condition: Condition) -> Self {
        FilterExpression::Field {
            path: path.into(),
            condition,
        }
    }

    pub fn eq(path: &str, value: impl Into<Value>) -> Self {
        Self::field(path, Condition::Eq(value.into()))
    }

    pub fn ne(path: &str, value: impl Into<Value>) -> Self {
        Self::field(path, Condition::Ne(value.into()))
    }

    pub fn is_in(path: &str, values: Vec<Value>) -> Self {
        Self::field(path, Condition::In(values))
    }

    pub fn regex(path: &str, pattern: Pattern) -> Self {
        Self::field(path, Condition::Regex(pattern))
    }

    /// Key filter for a single document.
    pub fn by_id(id: &Value) -> Self {
        Self::field(ID_FIELD, Condition::Eq(id.clone()))
    }

    /// Key filter for a key that arrived as text, such as a URL segment.
    /// Also matches the number or boolean the text spells.
    pub fn by_id_text(id: &str) -> Self {
        let mut keys = vec![Value::String(id.to_string())];
        if let Ok(scalar @ (Value::Number(_) | Value::Bool(_))) = serde_json::from_str(id.trim()) {
            keys.push(scalar);
        }
        match keys.len() {
            1 => Self::field(ID_FIELD, Condition::Eq(keys.remove(0))),
            _ => Self::is_in(ID_FIELD, keys),
        }
    }

    /// Conjunction that treats `All` as the identity.
    pub fn and(self, other: FilterExpression) -> Self {
        match (self, other) {
            (FilterExpression::All, f) | (f, FilterExpression::All) => f,
            (FilterExpression::And(mut a), FilterExpression::And(b)) => {
                a.extend(b);
                FilterExpression::And(a)
            }
            (FilterExpression::And(mut a), f) => {
                a.push(f);
                FilterExpression::And(a)
            }
            (f, FilterExpression::And(mut b)) => {
                b.insert(0, f);
                FilterExpression::And(b)
            }
            (a, b) => FilterExpression::And(vec![a, b]),
        }
    }

    /// Number of field predicates in the tree.
    pub fn predicate_count(&self) -> usize {
        match self {
            FilterExpression::All | FilterExpression::Nothing => 0,
            FilterExpression::Field { .. } => 1,
            FilterExpression::Or(fs) | FilterExpression::And(fs) => {
                fs.iter().map(|f| f.predicate_count()).sum()
            }
        }
    }

    /// Evaluate against a document using document-database semantics.
    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            FilterExpression::All => true,
            FilterExpression::Nothing => false,
            FilterExpression::Or(fs) => fs.iter().any(|f| f.matches(doc)),
            FilterExpression::And(fs) => fs.iter().all(|f| f.matches(doc)),
            FilterExpression::Field { path, condition } => {
                let found = resolve(doc, path);
                match condition {
                    Condition::Regex(p) => found.iter().any(|v| regex_matches(p, v)),
                    Condition::Eq(expected) => eq_matches(&found, expected),
                    Condition::Ne(expected) => !eq_matches(&found, expected),
                    Condition::In(values) => values.iter().any(|e| eq_matches(&found, e)),
                }
            }
        }
    }

    /// Render as a document-database filter document.
    pub fn to_json(&self) -> Value {
        match self {
            FilterExpression::All => json!({}),
            FilterExpression::Nothing => json!({ ID_FIELD: { "$in": [] } }),
            FilterExpression::Or(fs) if fs.is_empty() => FilterExpression::Nothing.to_json(),
            FilterExpression::Or(fs) => {
                json!({ "$or": fs.iter().map(|f| f.to_json()).collect::<Vec<_>>() })
            }
            FilterExpression::And(fs) if fs.is_empty() => json!({}),
            FilterExpression::And(fs) => {
                json!({ "$and": fs.iter().map(|f| f.to_json()).collect::<Vec<_>>() })
            }
            FilterExpression::Field { path, condition } => {
                let cond = match condition {
                    Condition::Regex(p) => json!({ "$regex": p.source(), "$options": "i" }),
                    Condition::Eq(v) => v.clone(),
                    Condition::Ne(v) => json!({ "$ne": v }),
                    Condition::In(vs) => json!({ "$in": vs }),
                };
                let mut map = Map::new();
                map.insert(path.to_string(), cond);
                Value::Object(map)
            }
        }
    }
}

fn regex_matches(pattern: &Pattern, value: &Value) -> bool {
    match value {
        Value::String(s) => pattern.is_match(s),
        Value::Array(items) => items
            .iter()
            .any(|v| v.as_str().is_some_and(|s| pattern.is_match(s))),
        _ => false,
    }
}

fn eq_matches(found: &[&Value], expected: &Value) -> bool {
    if found.is_empty() {
        return expected.is_null();
    }
    found.iter().any(|v| {
        *v == expected
            || matches!(v, Value::Array(items) if !expected.is_array() && items.contains(expected))
    })
}

/// How sequence elements contribute path segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListPaths {
    /// Every element gets its index segment (`items.0.name`, `tags.1`).
    #[default]
    Indexed,
    /// Mapping elements contribute no index segment (`items.name`) while
    /// scalar elements still do. Distinct elements can then share a path;
    /// duplicates collapse to a single predicate.
    FlattenMappings,
}

/// Builds free-text search filters from a representative document.
#[derive(Debug, Clone, Default)]
pub struct QueryBuilder {
    list_paths: ListPaths,
}

impl QueryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_list_paths(mut self, mode: ListPaths) -> Self {
        self.list_paths = mode;
        self
    }

    /// Build the search filter for `term`.
    ///
    /// - empty term: [`FilterExpression::All`]
    /// - no sample (empty collection): [`FilterExpression::Nothing`]
    /// - otherwise: OR of one regex predicate per leaf path of the sample
    pub fn build(&self, sample: Option<&Document>, term: &str) -> FilterExpression {
        if term.trim().is_empty() {
            return FilterExpression::All;
        }
        let Some(sample) = sample else {
            return FilterExpression::Nothing;
        };

        let pattern = Pattern::new(term);
        FilterExpression::Or(
            self.leaf_paths(sample)
                .into_iter()
                .map(|path| FilterExpression::Field {
                    path,
                    condition: Condition::Regex(pattern.clone()),
                })
                .collect(),
        )
    }

    /// Depth-first list of leaf scalar paths in `sample`, without duplicates.
    pub fn leaf_paths(&self, sample: &Document) -> Vec<FieldPath> {
        let mut out = Vec::new();
        self.walk(sample, FieldPath::root(), &mut out);
        out
    }

    fn walk(&self, value: &Value, path: FieldPath, out: &mut Vec<FieldPath>) {
        match value {
            Value::Object(map) => {
                for (k, v) in map {
                    self.walk(v, path.key(k), out);
                }
            }
            Value::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    let next = match (self.list_paths, item) {
                        (ListPaths::FlattenMappings, Value::Object(_)) => path.clone(),
                        _ => path.index(i),
                    };
                    self.walk(item, next, out);
                }
            }
            _ => {
                if !path.is_root() && !out.contains(&path) {
                    out.push(path);
                }
            }
        }
    }
}
