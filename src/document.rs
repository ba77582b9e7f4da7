//! Document flattening and search-field mapping
//!
//! Documents are flattened into dotted, lower-cased key paths. Values found
//! under the same path in several array elements are joined with
//! [`ARRAY_DELIMITER`], which is what lets `equals` match a single element of
//! an array through pattern matches.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{DocumentStoreError, Result};
use crate::schema::Schema;
use crate::sql::sanitize::{PATH_SEPARATOR, safe_name};
use crate::types::{InternalField, SqlValue};

/// Joins values of array elements that share a path
pub const ARRAY_DELIMITER: &str = "-@-";

/// A stored document as returned by finds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(rename = "_id")]
    pub id: i64,
    pub json: Value,
}

/// Which rows a removal applies to
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentTarget {
    /// The row with this internal id
    Id(i64),
    /// Every live row matching this document as a shorthand query
    Matching(Value),
}

impl DocumentTarget {
    /// `{_id, json}` wrappers and bare integers target an id, anything else
    /// is matched by content
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Number(n) => match n.as_i64() {
                Some(id) => Self::Id(id),
                None => Self::Matching(value.clone()),
            },
            Value::Object(obj) => {
                match obj.get(InternalField::Id.name()).and_then(Value::as_i64) {
                    Some(id) => Self::Id(id),
                    None => Self::Matching(value.clone()),
                }
            }
            other => Self::Matching(other.clone()),
        }
    }
}

impl From<&Document> for DocumentTarget {
    fn from(document: &Document) -> Self {
        Self::Id(document.id)
    }
}

/// New content for an existing row
#[derive(Debug, Clone, PartialEq)]
pub struct Replacement {
    pub id: i64,
    pub json: Value,
}

impl Replacement {
    pub fn new(id: i64, json: Value) -> Self {
        Self { id, json }
    }

    /// Read an `{_id, json}` wrapper; a replacement without an id is refused
    pub fn from_value(value: &Value) -> Result<Self> {
        let id = value
            .get(InternalField::Id.name())
            .and_then(Value::as_i64)
            .ok_or_else(|| {
                DocumentStoreError::update_on_missing("replacement has no internal _id")
            })?;
        let json = value
            .get(InternalField::Json.name())
            .cloned()
            .ok_or_else(|| {
                DocumentStoreError::update_on_missing(format!("replacement {} has no json", id))
            })?;
        Ok(Self { id, json })
    }
}

impl From<Document> for Replacement {
    fn from(document: Document) -> Self {
        Self {
            id: document.id,
            json: document.json,
        }
    }
}

// ============================================================================
// Normalization
// ============================================================================

/// Flatten a document into dotted, lower-cased paths
///
/// Nested objects contribute their paths, arrays contribute one
/// delimiter-joined string per path, scalars pass through.
///
/// Keys of one object that only differ by case collapse onto one path. The
/// non-null value of an already lower-case key wins; failing that, the first
/// non-null value in key order. [`resolve_path`] follows the same rule, so a
/// document maps identically before and after normalization.
pub fn normalize(document: &Value) -> Map<String, Value> {
    let mut out = Map::new();
    match document {
        Value::Object(obj) => flatten_object("", obj, &mut out),
        Value::Array(items) => flatten_array("", items, &mut out),
        _ => {}
    }
    out
}

fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{}{}{}", prefix, PATH_SEPARATOR, key)
    }
}

fn insert_flat(out: &mut Map<String, Value>, path: String, value: Value) {
    match out.get(&path) {
        Some(Value::Null) | None => {
            out.insert(path, value);
        }
        Some(_) => {
            tracing::debug!(path = %path, "ambiguous key differing only by case, keeping first");
        }
    }
}

fn flatten_object(prefix: &str, obj: &Map<String, Value>, out: &mut Map<String, Value>) {
    let (lower, mixed): (Vec<_>, Vec<_>) = obj.iter().partition(|(key, _)| is_lowercase(key));
    for (key, value) in lower.into_iter().chain(mixed) {
        let path = join_path(prefix, &key.to_lowercase());
        match value {
            Value::Object(inner) => flatten_object(&path, inner, out),
            Value::Array(items) => flatten_array(&path, items, out),
            scalar => insert_flat(out, path, scalar.clone()),
        }
    }
}

fn flatten_array(path: &str, items: &[Value], out: &mut Map<String, Value>) {
    let mut joined: BTreeMap<String, Vec<String>> = BTreeMap::new();
    collect_array(path, items, &mut joined);
    for (p, parts) in joined {
        if !parts.is_empty() {
            insert_flat(out, p, Value::String(parts.join(ARRAY_DELIMITER)));
        }
    }
}

fn collect_array(path: &str, items: &[Value], acc: &mut BTreeMap<String, Vec<String>>) {
    for item in items {
        match item {
            Value::Object(inner) => {
                let mut nested = Map::new();
                flatten_object(path, inner, &mut nested);
                for (p, v) in nested {
                    if let Some(text) = scalar_text(&v) {
                        acc.entry(p).or_default().push(text);
                    }
                }
            }
            Value::Array(inner) => collect_array(path, inner, acc),
            scalar => {
                if let Some(text) = scalar_text(scalar) {
                    acc.entry(path.to_string()).or_default().push(text);
                }
            }
        }
    }
}

/// Text form of a scalar inside a joined array value; booleans become 1/0
fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Bool(b) => Some(if *b { "1" } else { "0" }.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

// ============================================================================
// Path Resolution
// ============================================================================

fn is_lowercase(key: &str) -> bool {
    !key.chars().any(char::is_uppercase)
}

/// Exact key first, then the first case-insensitive match in key order
fn lookup<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    match obj.get(key) {
        Some(value) if !value.is_null() => Some(value),
        _ => {
            let wanted = key.to_lowercase();
            obj.iter()
                .find(|(k, v)| !v.is_null() && k.to_lowercase() == wanted)
                .map(|(_, v)| v)
        }
    }
}

/// Resolve a dotted path against a (possibly already flattened) document
///
/// A key equal to the whole path wins, so flattened and nested documents
/// resolve alike. Otherwise the head segment is looked up case-sensitively,
/// then case-insensitively (see [`normalize`] for how case collisions
/// resolve); objects recurse on the rest of the path and
/// arrays project the rest into each element and join the results. Dead ends
/// yield `None`.
pub fn resolve_path(value: &Value, path: &str) -> Option<Value> {
    let obj = match value {
        Value::Object(obj) => obj,
        Value::Array(items) => return join_elements(items, Some(path)),
        _ => return None,
    };

    if let Some(found) = lookup(obj, path) {
        return finish(found, None);
    }

    let (head, rest) = path.split_once(PATH_SEPARATOR)?;
    let found = lookup(obj, head)?;
    finish(found, Some(rest))
}

fn finish(found: &Value, rest: Option<&str>) -> Option<Value> {
    match (found, rest) {
        (Value::Null, _) => None,
        (Value::Array(items), rest) => join_elements(items, rest),
        (Value::Object(_), Some(rest)) => resolve_path(found, rest),
        (Value::Object(_), None) => None,
        (_, Some(_)) => None,
        (scalar, None) => Some(scalar.clone()),
    }
}

fn join_elements(items: &[Value], rest: Option<&str>) -> Option<Value> {
    let mut parts = Vec::new();
    for item in items {
        let resolved = match (item, rest) {
            (Value::Object(_) | Value::Array(_), Some(rest)) => resolve_path(item, rest),
            (Value::Array(inner), None) => join_elements(inner, None),
            (Value::Object(_), None) => None,
            (_, Some(_)) => None,
            (scalar, None) => Some(scalar.clone()),
        };
        if let Some(text) = resolved.as_ref().and_then(scalar_text) {
            parts.push(text);
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(Value::String(parts.join(ARRAY_DELIMITER)))
    }
}

// ============================================================================
// Mapping
// ============================================================================

/// Column values of one document, keyed by column-safe field name
pub type ColumnValues = BTreeMap<String, SqlValue>;

/// Map a document onto the schema's search-field columns
///
/// Every declared field is resolved against `extra` first, then the document;
/// fields without a non-null value are left out.
pub fn map_document(schema: &Schema, document: &Value, extra: Option<&Value>) -> ColumnValues {
    let mut columns = ColumnValues::new();
    for field in schema.fields() {
        let resolved = extra
            .and_then(|e| resolve_path(e, &field.name))
            .or_else(|| resolve_path(document, &field.name));
        if let Some(value) = resolved {
            columns.insert(
                safe_name(&field.name),
                SqlValue::for_field(&value, field.field_type),
            );
        }
    }
    columns
}
