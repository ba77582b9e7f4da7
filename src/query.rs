//! Query model for Document Store
//!
//! A [`Query`] is an OR of [`QueryPart`]s, each an AND of [`QueryPartItem`]s.
//! Each item tests one field with one [`QueryOperator`] against a value whose
//! shape is fixed by the operator class.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{DocumentStoreError, Result};
use crate::types::{DeletedPolicy, InternalField, SortSpec};

/// Optional marker character callers may put in front of operator names
pub const OPERATOR_MARKER: char = '$';

/// Accepted value shape of an operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorClass {
    Scalar,
    Range,
    Set,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum QueryOperator {
    Equals,
    NotEquals,
    FuzzyEquals,
    FuzzyNotEquals,
    FuzzyLeftEquals,
    FuzzyNotLeftEquals,
    FuzzyRightEquals,
    FuzzyNotRightEquals,
    LessThan,
    LessOrEqual,
    GreaterThan,
    GreaterOrEqual,
    Between,
    NotBetween,
    In,
    NotIn,
}

impl QueryOperator {
    pub fn class(self) -> OperatorClass {
        match self {
            QueryOperator::Between | QueryOperator::NotBetween => OperatorClass::Range,
            QueryOperator::In | QueryOperator::NotIn => OperatorClass::Set,
            _ => OperatorClass::Scalar,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            QueryOperator::Equals => "equals",
            QueryOperator::NotEquals => "not-equals",
            QueryOperator::FuzzyEquals => "fuzzy-equals",
            QueryOperator::FuzzyNotEquals => "fuzzy-not-equals",
            QueryOperator::FuzzyLeftEquals => "fuzzy-left-equals",
            QueryOperator::FuzzyNotLeftEquals => "fuzzy-not-left-equals",
            QueryOperator::FuzzyRightEquals => "fuzzy-right-equals",
            QueryOperator::FuzzyNotRightEquals => "fuzzy-not-right-equals",
            QueryOperator::LessThan => "less-than",
            QueryOperator::LessOrEqual => "less-or-equal",
            QueryOperator::GreaterThan => "greater-than",
            QueryOperator::GreaterOrEqual => "greater-or-equal",
            QueryOperator::Between => "between",
            QueryOperator::NotBetween => "not-between",
            QueryOperator::In => "in",
            QueryOperator::NotIn => "not-in",
        }
    }

    /// Parse an operator name
    ///
    /// Matching ignores case, an optional leading marker, and the `-`/`_`
    /// separators, so `$LessThan`, `less_than` and `less-than` are the same
    /// operator. The legacy camel-case names (`like`, `leftLike`, `inside`,
    /// ...) are accepted as aliases.
    pub fn parse(name: &str) -> Result<Self> {
        let trimmed = name.strip_prefix(OPERATOR_MARKER).unwrap_or(name);
        let key: String = trimmed
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .flat_map(char::to_lowercase)
            .collect();

        let op = match key.as_str() {
            "equals" | "equal" => QueryOperator::Equals,
            "notequals" | "notequal" => QueryOperator::NotEquals,
            "fuzzyequals" | "like" => QueryOperator::FuzzyEquals,
            "fuzzynotequals" | "notlike" => QueryOperator::FuzzyNotEquals,
            "fuzzyleftequals" | "leftlike" => QueryOperator::FuzzyLeftEquals,
            "fuzzynotleftequals" | "notleftlike" => QueryOperator::FuzzyNotLeftEquals,
            "fuzzyrightequals" | "rightlike" => QueryOperator::FuzzyRightEquals,
            "fuzzynotrightequals" | "notrightlike" => QueryOperator::FuzzyNotRightEquals,
            "lessthan" => QueryOperator::LessThan,
            "lessorequal" | "lessorequalthan" => QueryOperator::LessOrEqual,
            "greaterthan" => QueryOperator::GreaterThan,
            "greaterorequal" | "greaterorequalthan" => QueryOperator::GreaterOrEqual,
            "between" => QueryOperator::Between,
            "notbetween" => QueryOperator::NotBetween,
            "in" | "inside" => QueryOperator::In,
            "notin" | "notinside" => QueryOperator::NotIn,
            _ => {
                return Err(DocumentStoreError::malformed_query(format!(
                    "unknown operator '{}'",
                    name
                )));
            }
        };
        Ok(op)
    }
}

impl fmt::Display for QueryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Operand of a query item, shaped by the operator class
#[derive(Debug, Clone, PartialEq)]
pub enum QueryValue {
    Scalar(Value),
    Range(Value, Value),
    Set(Vec<Value>),
}

impl QueryValue {
    /// Check a raw JSON operand against the operator class
    pub fn for_operator(op: QueryOperator, value: Value) -> Result<Self> {
        let is_scalar = |v: &Value| !v.is_array() && !v.is_object();
        match (op.class(), value) {
            (OperatorClass::Scalar, v) if is_scalar(&v) && !v.is_null() => {
                Ok(QueryValue::Scalar(v))
            }
            (OperatorClass::Range, Value::Array(items))
                if items.len() == 2 && items.iter().all(|v| is_scalar(v) && !v.is_null()) =>
            {
                let mut items = items.into_iter();
                match (items.next(), items.next()) {
                    (Some(low), Some(high)) => Ok(QueryValue::Range(low, high)),
                    _ => Err(DocumentStoreError::malformed_query(format!(
                        "{} expects exactly 2 values",
                        op
                    ))),
                }
            }
            (OperatorClass::Set, Value::Array(items)) if items.iter().all(is_scalar) => {
                Ok(QueryValue::Set(items))
            }
            (OperatorClass::Scalar, v) => Err(DocumentStoreError::malformed_query(format!(
                "{} expects a single scalar value, got {}",
                op, v
            ))),
            (OperatorClass::Range, v) => Err(DocumentStoreError::malformed_query(format!(
                "{} expects an array of exactly 2 scalar values, got {}",
                op, v
            ))),
            (OperatorClass::Set, v) => Err(DocumentStoreError::malformed_query(format!(
                "{} expects an array of scalar values, got {}",
                op, v
            ))),
        }
    }
}

/// One predicate on one field
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPartItem {
    pub key: String,
    pub operator: QueryOperator,
    pub value: QueryValue,
    /// Key names an internal column (`_id`, `_dirty`, ...) rather than a search field
    pub is_key_special: bool,
}

impl QueryPartItem {
    /// Keys are stored lower-cased, like search field names
    pub fn new(key: impl Into<String>, operator: QueryOperator, value: Value) -> Result<Self> {
        let key = key.into().to_lowercase();
        let value = QueryValue::for_operator(operator, value)?;
        let is_key_special = InternalField::from_name(&key).is_some();
        Ok(Self {
            key,
            operator,
            value,
            is_key_special,
        })
    }

    /// Parse the wire shape `{key, operator, value}`
    pub fn from_json(item: &Value) -> Result<Self> {
        let obj = item.as_object().ok_or_else(|| {
            DocumentStoreError::malformed_query(format!("query item must be an object, got {}", item))
        })?;
        let key = obj.get("key").and_then(Value::as_str).ok_or_else(|| {
            DocumentStoreError::malformed_query("query item requires a string 'key'")
        })?;
        let operator = obj.get("operator").and_then(Value::as_str).ok_or_else(|| {
            DocumentStoreError::malformed_query("query item requires a string 'operator'")
        })?;
        let value = obj.get("value").cloned().unwrap_or(Value::Null);

        Self::new(key, QueryOperator::parse(operator)?, value)
    }
}

/// Items ANDed together
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryPart {
    pub items: Vec<QueryPartItem>,
}

impl QueryPart {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn item(mut self, item: QueryPartItem) -> Self {
        self.items.push(item);
        self
    }

    fn push(mut self, key: &str, operator: QueryOperator, value: Value) -> Result<Self> {
        self.items.push(QueryPartItem::new(key, operator, value)?);
        Ok(self)
    }

    pub fn equals(self, key: &str, value: impl Into<Value>) -> Result<Self> {
        self.push(key, QueryOperator::Equals, value.into())
    }

    pub fn not_equals(self, key: &str, value: impl Into<Value>) -> Result<Self> {
        self.push(key, QueryOperator::NotEquals, value.into())
    }

    pub fn fuzzy_equals(self, key: &str, value: impl Into<Value>) -> Result<Self> {
        self.push(key, QueryOperator::FuzzyEquals, value.into())
    }

    pub fn less_than(self, key: &str, value: impl Into<Value>) -> Result<Self> {
        self.push(key, QueryOperator::LessThan, value.into())
    }

    pub fn greater_than(self, key: &str, value: impl Into<Value>) -> Result<Self> {
        self.push(key, QueryOperator::GreaterThan, value.into())
    }

    pub fn between(self, key: &str, low: impl Into<Value>, high: impl Into<Value>) -> Result<Self> {
        self.push(
            key,
            QueryOperator::Between,
            Value::Array(vec![low.into(), high.into()]),
        )
    }

    pub fn is_in(self, key: &str, values: Vec<Value>) -> Result<Self> {
        self.push(key, QueryOperator::In, Value::Array(values))
    }

    pub fn from_json(part: &Value) -> Result<Self> {
        let items = part.as_array().ok_or_else(|| {
            DocumentStoreError::malformed_query(format!("query part must be an array, got {}", part))
        })?;
        let items = items
            .iter()
            .map(QueryPartItem::from_json)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { items })
    }
}

/// Parts ORed together; empty matches everything
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub parts: Vec<QueryPart>,
}

impl Query {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn new(parts: Vec<QueryPart>) -> Self {
        Self { parts }
    }

    pub fn or(mut self, part: QueryPart) -> Self {
        self.parts.push(part);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.parts.iter().all(|p| p.items.is_empty())
    }

    /// Parse the wire shape: a list of parts, each a list of items
    pub fn from_json(query: &Value) -> Result<Self> {
        match query {
            Value::Null => Ok(Self::all()),
            Value::Array(parts) => Ok(Self {
                parts: parts
                    .iter()
                    .map(QueryPart::from_json)
                    .collect::<Result<Vec<_>>>()?,
            }),
            other => Err(DocumentStoreError::malformed_query(format!(
                "query must be an array of parts, got {}",
                other
            ))),
        }
    }

    /// Shorthand `{field: value, ...}` object as a single part
    ///
    /// `exact` picks `equals` for every pair, otherwise `fuzzy-equals`. This is
    /// the only place the exact/fuzzy toggle applies; explicit parts keep the
    /// operator they were built with.
    pub fn from_object(object: &Value, exact: bool) -> Result<Self> {
        let obj = object.as_object().ok_or_else(|| {
            DocumentStoreError::malformed_query(format!(
                "query object must be an object, got {}",
                object
            ))
        })?;
        let operator = if exact {
            QueryOperator::Equals
        } else {
            QueryOperator::FuzzyEquals
        };
        let mut part = QueryPart::new();
        for (key, value) in obj {
            part = part.push(key, operator, value.clone())?;
        }
        Ok(Self::new(vec![part]))
    }
}

// ============================================================================
// Operation Options
// ============================================================================

/// Options for find and count
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FindOptions {
    /// Columns returned by `find_fields`; defaults to `_id` and `json`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Vec<String>>,
    /// Negative means "last N by id", overriding any sort
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
    /// Honored only together with a limit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<i64>,
    #[serde(default)]
    pub sort: Vec<SortSpec>,
    #[serde(default)]
    pub deleted: DeletedPolicy,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filter(mut self, fields: Vec<String>) -> Self {
        self.filter = Some(fields);
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn with_sort(mut self, sort: Vec<SortSpec>) -> Self {
        self.sort = sort;
        self
    }

    pub fn with_deleted(mut self, deleted: DeletedPolicy) -> Self {
        self.deleted = deleted;
        self
    }
}

/// Options for adding documents
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddOptions {
    /// `true` records a pending `add`; `false` stores locally with `store`
    #[serde(rename = "markDirty", default = "default_true")]
    pub mark_dirty: bool,
    /// Values for search fields that are not part of the document
    #[serde(
        rename = "additionalSearchFields",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub additional_search_fields: Option<Value>,
}

fn default_true() -> bool {
    true
}

impl Default for AddOptions {
    fn default() -> Self {
        Self {
            mark_dirty: true,
            additional_search_fields: None,
        }
    }
}

impl AddOptions {
    pub fn local_only() -> Self {
        Self {
            mark_dirty: false,
            additional_search_fields: None,
        }
    }

    pub fn with_additional_search_fields(mut self, extra: Value) -> Self {
        self.additional_search_fields = Some(extra);
        self
    }
}

/// Options for removing documents
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveOptions {
    /// `false` erases rows physically instead of soft-marking them
    #[serde(rename = "markDirty", default = "default_true")]
    pub mark_dirty: bool,
    /// Match documents without an `_id` exactly instead of fuzzily
    #[serde(default)]
    pub exact: bool,
}

impl Default for RemoveOptions {
    fn default() -> Self {
        Self {
            mark_dirty: true,
            exact: false,
        }
    }
}
