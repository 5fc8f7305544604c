//! Untyped document trees and the paths that address into them.
//!
//! Records in the document store have no fixed schema, so they are carried
//! as [`serde_json::Value`] (built with `preserve_order`, so mappings keep
//! their insertion order). A [`FieldPath`] names a leaf or subtree with
//! dotted key/index segments, e.g. `Extracted Fields.Items.2.Name`.

use std::fmt;

use serde_json::{Map, Value};

use crate::errors::StoreError;

/// Any record retrieved from or destined for the document store.
pub type Document = Value;

/// Store key field. Immutable across edits.
pub const ID_FIELD: &str = "_id";

/// One step of a [`FieldPath`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    Key(String),
    Index(usize),
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Key(k) => write!(f, "{}", k),
            Segment::Index(i) => write!(f, "{}", i),
        }
    }
}

/// Ordered key/index segments addressing a node inside a [`Document`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct FieldPath(Vec<Segment>);

impl FieldPath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Parse a dotted path. All-digit segments become indices.
    pub fn parse(dotted: &str) -> Self {
        if dotted.is_empty() {
            return Self::root();
        }
        Self(
            dotted
                .split('.')
                .map(|s| match s.parse::<usize>() {
                    Ok(i) if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) => {
                        Segment::Index(i)
                    }
                    _ => Segment::Key(s.to_string()),
                })
                .collect(),
        )
    }

    pub fn key(&self, key: &str) -> Self {
        let mut next = self.clone();
        next.0.push(Segment::Key(key.to_string()));
        next
    }

    pub fn index(&self, index: usize) -> Self {
        let mut next = self.clone();
        next.0.push(Segment::Index(index));
        next
    }

    pub fn segments(&self) -> &[Segment] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn last(&self) -> Option<&Segment> {
        self.0.last()
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, seg) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{}", seg)?;
        }
        Ok(())
    }
}

impl From<&str> for FieldPath {
    fn from(s: &str) -> Self {
        FieldPath::parse(s)
    }
}

/// Collect every value reachable at `path`.
///
/// Follows the document-database convention: a key segment applied to a
/// sequence fans out over the sequence's mapping elements, and an index
/// segment applied to a sequence selects that element.
pub fn resolve<'a>(doc: &'a Value, path: &FieldPath) -> Vec<&'a Value> {
    let mut current = vec![doc];
    for seg in path.segments() {
        let mut next = Vec::new();
        for node in current {
            step(node, seg, &mut next);
        }
        if next.is_empty() {
            return next;
        }
        current = next;
    }
    current
}

fn step<'a>(node: &'a Value, seg: &Segment, out: &mut Vec<&'a Value>) {
    match (node, seg) {
        (Value::Object(map), Segment::Key(k)) => {
            if let Some(v) = map.get(k) {
                out.push(v);
            }
        }
        (Value::Object(map), Segment::Index(i)) => {
            if let Some(v) = map.get(&i.to_string()) {
                out.push(v);
            }
        }
        (Value::Array(items), Segment::Index(i)) => {
            if let Some(v) = items.get(*i) {
                out.push(v);
            }
        }
        (Value::Array(items), Segment::Key(_)) => {
            for item in items {
                if item.is_object() {
                    step(item, seg, out);
                }
            }
        }
        _ => {}
    }
}

/// Assign `value` at a dotted path, creating intermediate mappings.
///
/// Index segments into a sequence pad it with nulls when out of range.
/// Descending into a scalar is an error.
pub fn set_path(doc: &mut Value, path: &str, value: Value) -> Result<(), StoreError> {
    let field_path = FieldPath::parse(path);
    let segments = field_path.segments();
    if segments.is_empty() {
        return Err(StoreError::InvalidPath {
            path: path.to_string(),
            message: "empty path".into(),
        });
    }

    let mut node = doc;
    for (i, seg) in segments.iter().enumerate() {
        let is_last = i + 1 == segments.len();
        node = match (node, seg) {
            (Value::Object(map), seg) => {
                let key = seg.to_string();
                if is_last {
                    map.insert(key, value);
                    return Ok(());
                }
                map.entry(key).or_insert_with(|| Value::Object(Map::new()))
            }
            (Value::Array(items), Segment::Index(idx)) => {
                if items.len() <= *idx {
                    items.resize(*idx + 1, Value::Null);
                }
                if is_last {
                    items[*idx] = value;
                    return Ok(());
                }
                let slot = &mut items[*idx];
                if slot.is_null() {
                    *slot = Value::Object(Map::new());
                }
                slot
            }
            (Value::Array(_), Segment::Key(k)) => {
                return Err(StoreError::InvalidPath {
                    path: path.to_string(),
                    message: format!("cannot use key '{}' on a sequence", k),
                });
            }
            (_, seg) => {
                return Err(StoreError::InvalidPath {
                    path: path.to_string(),
                    message: format!("cannot descend into a scalar at '{}'", seg),
                });
            }
        };
    }
    Ok(())
}

/// Best-effort recovery of a structure that was stored as its literal text.
///
/// Only text that looks like a mapping or sequence is considered. JSON is
/// tried first, then the Python literal form (`{'a': 1, 'b': (1, 2), 'c': None}`).
/// Unquoted words other than numbers, `True`, `False` and `None` make the
/// text a plain string, so `"[Draft]"` yields `None`.
pub fn decode_structured(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    let looks_structured = (trimmed.starts_with('{') && trimmed.ends_with('}'))
        || (trimmed.starts_with('[') && trimmed.ends_with(']'));
    if !looks_structured {
        return None;
    }

    if let Ok(v) = serde_json::from_str::<Value>(trimmed) {
        return Some(v);
    }

    let json = literal_to_json(trimmed)?;
    match serde_json::from_str::<Value>(&json).ok()? {
        v @ (Value::Object(_) | Value::Array(_)) => Some(v),
        _ => None,
    }
}

/// Rewrite a Python literal as JSON text. `None` when it holds anything
/// other than strings, numbers, the three constants and brackets.
fn literal_to_json(text: &str) -> Option<String> {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\'' | '"' => {
                let mut decoded = String::new();
                loop {
                    match chars.next()? {
                        '\\' => match chars.next()? {
                            'n' => decoded.push('\n'),
                            't' => decoded.push('\t'),
                            'r' => decoded.push('\r'),
                            e @ ('\\' | '\'' | '"') => decoded.push(e),
                            other => {
                                decoded.push('\\');
                                decoded.push(other);
                            }
                        },
                        q if q == c => break,
                        other => decoded.push(other),
                    }
                }
                out.push_str(&serde_json::to_string(&decoded).ok()?);
            }
            '{' | '[' | ':' | ',' => out.push(c),
            '(' => out.push('['),
            '}' | ']' | ')' => {
                // Python allows a trailing comma.
                if out.trim_end().ends_with(',') {
                    let keep = out.trim_end().len() - 1;
                    out.truncate(keep);
                }
                out.push(if c == ')' { ']' } else { c });
            }
            c if c.is_whitespace() => out.push(c),
            _ => {
                let mut word = String::from(c);
                while let Some(&next) = chars.peek() {
                    if next.is_whitespace() || "{}[]():,'\"".contains(next) {
                        break;
                    }
                    word.push(next);
                    chars.next();
                }
                match word.as_str() {
                    "True" => out.push_str("true"),
                    "False" => out.push_str("false"),
                    "None" => out.push_str("null"),
                    w if serde_json::from_str::<serde_json::Number>(w).is_ok() => out.push_str(w),
                    _ => return None,
                }
            }
        }
    }
    Some(out)
}

/// Drop null and empty-string values, and any key named in `keys`, at every
/// depth. Used before presenting supplier/product records.
pub fn prune(doc: &Value, keys: &[&str]) -> Value {
    fn is_blank(v: &Value) -> bool {
        v.is_null() || v.as_str() == Some("")
    }

    match doc {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(k, v)| !is_blank(v) && !keys.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), prune(v, keys)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .filter(|v| !is_blank(v))
                .map(|v| prune(v, keys))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Text shown for a scalar in an edit control or table cell.
pub fn scalar_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
