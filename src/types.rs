//! Core type definitions for Document Store
//!
//! Includes search field types, internal columns, sync operation tags and the
//! value type bound into SQL statements.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DocumentStoreError;

// ============================================================================
// Search Field Definitions
// ============================================================================

/// Declared type of a search field
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    /// Stored with integer affinity as 1/0
    Boolean,
    /// Integer affinity
    Integer,
    /// Real affinity
    Number,
    /// Text affinity
    String,
}

impl FieldType {
    /// SQLite column type for this field
    pub fn to_sql_type(self) -> &'static str {
        match self {
            FieldType::Boolean | FieldType::Integer => "INTEGER",
            FieldType::Number => "REAL",
            FieldType::String => "TEXT",
        }
    }
}

impl FromStr for FieldType {
    type Err = DocumentStoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "boolean" | "bool" => Ok(FieldType::Boolean),
            "integer" | "int" => Ok(FieldType::Integer),
            "number" => Ok(FieldType::Number),
            "string" => Ok(FieldType::String),
            other => Err(DocumentStoreError::invalid_field_name(format!(
                "unknown search field type '{}'",
                other
            ))),
        }
    }
}

/// A named, typed projection of a document value into its own column
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SearchField {
    /// Dotted lower-case path into the document
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
}

impl SearchField {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
        }
    }
}

// ============================================================================
// Internal Columns
// ============================================================================

/// Columns every collection table carries regardless of its search fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InternalField {
    Id,
    Json,
    Dirty,
    Deleted,
    Operation,
}

impl InternalField {
    pub const ALL: [InternalField; 5] = [
        InternalField::Id,
        InternalField::Json,
        InternalField::Dirty,
        InternalField::Deleted,
        InternalField::Operation,
    ];

    pub fn name(self) -> &'static str {
        match self {
            InternalField::Id => "_id",
            InternalField::Json => "json",
            InternalField::Dirty => "_dirty",
            InternalField::Deleted => "_deleted",
            InternalField::Operation => "_operation",
        }
    }

    pub fn to_sql_type(self) -> &'static str {
        match self {
            InternalField::Id | InternalField::Deleted => "INTEGER",
            InternalField::Json | InternalField::Operation => "TEXT",
            InternalField::Dirty => "REAL",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.name() == name)
    }
}

// ============================================================================
// Sync State
// ============================================================================

/// Pending sync intent recorded on a document row
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SyncOperation {
    /// Local-only persistence, never pushed
    Store,
    Add,
    Replace,
    Remove,
}

impl SyncOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncOperation::Store => "store",
            SyncOperation::Add => "add",
            SyncOperation::Replace => "replace",
            SyncOperation::Remove => "remove",
        }
    }

    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "store" => Some(SyncOperation::Store),
            "add" => Some(SyncOperation::Add),
            "replace" => Some(SyncOperation::Replace),
            "remove" => Some(SyncOperation::Remove),
            _ => None,
        }
    }

    /// Operation a row moves to when its document is replaced
    ///
    /// A create that has not been synced yet stays a create.
    pub fn after_replace(current: Option<SyncOperation>) -> SyncOperation {
        match current {
            Some(SyncOperation::Add) => SyncOperation::Add,
            _ => SyncOperation::Replace,
        }
    }
}

impl fmt::Display for SyncOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which rows a read sees with respect to the soft-delete flag
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeletedPolicy {
    #[default]
    Standard,
    DeletedOnly,
    Both,
}

// ============================================================================
// Sorting
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_sql(self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

/// One (field, direction) pair of an ORDER BY
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SortSpec {
    pub field: String,
    pub direction: SortDirection,
}

impl SortSpec {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }
}

// ============================================================================
// SQL Values
// ============================================================================

/// A value that may only ever reach SQL as a bound parameter
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl SqlValue {
    /// Bind form of a JSON scalar; booleans become 1/0
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => SqlValue::Null,
            serde_json::Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => SqlValue::Integer(i),
                None => SqlValue::Real(n.as_f64().unwrap_or(0.0)),
            },
            serde_json::Value::String(s) => SqlValue::Text(s.clone()),
            other => SqlValue::Text(other.to_string()),
        }
    }

    /// Column value for a field of the given type
    ///
    /// Values that do not fit the declared type are kept as-is and left to
    /// the column affinity.
    pub fn for_field(value: &serde_json::Value, field_type: FieldType) -> Self {
        match (field_type, value) {
            (FieldType::Boolean, serde_json::Value::String(s)) => {
                match s.to_ascii_lowercase().as_str() {
                    "true" => SqlValue::Integer(1),
                    "false" => SqlValue::Integer(0),
                    _ => SqlValue::Text(s.clone()),
                }
            }
            (FieldType::String, serde_json::Value::Number(n)) => SqlValue::Text(n.to_string()),
            (FieldType::Number, serde_json::Value::Number(n)) => {
                SqlValue::Real(n.as_f64().unwrap_or(0.0))
            }
            _ => SqlValue::from_json(value),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Integer(i) => Some(*i),
            SqlValue::Real(f) => Some(*f as i64),
            SqlValue::Text(s) => s.parse().ok(),
            SqlValue::Null => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SqlValue::Integer(i) => Some(*i as f64),
            SqlValue::Real(f) => Some(*f),
            SqlValue::Text(s) => s.parse().ok(),
            SqlValue::Null => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            SqlValue::Null => serde_json::Value::Null,
            SqlValue::Integer(i) => serde_json::Value::from(*i),
            SqlValue::Real(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            SqlValue::Text(s) => serde_json::Value::String(s.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // =========================================================================
    // FieldType Tests
    // =========================================================================

    #[test]
    fn test_field_type_affinity() {
        assert_eq!(FieldType::Boolean.to_sql_type(), "INTEGER");
        assert_eq!(FieldType::Integer.to_sql_type(), "INTEGER");
        assert_eq!(FieldType::Number.to_sql_type(), "REAL");
        assert_eq!(FieldType::String.to_sql_type(), "TEXT");
    }

    #[test]
    fn test_field_type_parse_case_insensitive() {
        assert_eq!("STRING".parse::<FieldType>().unwrap(), FieldType::String);
        assert_eq!("Boolean".parse::<FieldType>().unwrap(), FieldType::Boolean);
        assert!("date".parse::<FieldType>().is_err());
    }

    #[test]
    fn test_search_field_serialization() {
        let field = SearchField::new("name", FieldType::String);
        let value = serde_json::to_value(&field).unwrap();
        assert_eq!(value, json!({"name": "name", "type": "string"}));
    }

    // =========================================================================
    // SyncOperation Tests
    // =========================================================================

    #[test]
    fn test_replace_keeps_unsynced_add() {
        assert_eq!(
            SyncOperation::after_replace(Some(SyncOperation::Add)),
            SyncOperation::Add
        );
        assert_eq!(
            SyncOperation::after_replace(Some(SyncOperation::Store)),
            SyncOperation::Replace
        );
        assert_eq!(
            SyncOperation::after_replace(Some(SyncOperation::Replace)),
            SyncOperation::Replace
        );
        assert_eq!(SyncOperation::after_replace(None), SyncOperation::Replace);
    }

    #[test]
    fn test_operation_tags_roundtrip_names() {
        for op in [
            SyncOperation::Store,
            SyncOperation::Add,
            SyncOperation::Replace,
            SyncOperation::Remove,
        ] {
            assert_eq!(SyncOperation::parse(op.as_str()), Some(op));
        }
        assert_eq!(SyncOperation::parse("upsert"), None);
    }

    // =========================================================================
    // SqlValue Tests
    // =========================================================================

    #[test]
    fn test_booleans_bind_as_integers() {
        assert_eq!(SqlValue::from_json(&json!(true)), SqlValue::Integer(1));
        assert_eq!(SqlValue::from_json(&json!(false)), SqlValue::Integer(0));
        assert_eq!(
            SqlValue::for_field(&json!("TRUE"), FieldType::Boolean),
            SqlValue::Integer(1)
        );
    }

    #[test]
    fn test_for_field_coerces_numbers() {
        assert_eq!(
            SqlValue::for_field(&json!(7), FieldType::String),
            SqlValue::Text("7".to_string())
        );
        assert_eq!(
            SqlValue::for_field(&json!(7), FieldType::Number),
            SqlValue::Real(7.0)
        );
        assert_eq!(
            SqlValue::for_field(&json!(1.5), FieldType::Integer),
            SqlValue::Real(1.5)
        );
    }

    #[test]
    fn test_internal_field_lookup() {
        assert_eq!(InternalField::from_name("_dirty"), Some(InternalField::Dirty));
        assert_eq!(InternalField::from_name("dirty"), None);
        assert_eq!(InternalField::Id.to_sql_type(), "INTEGER");
    }
}
