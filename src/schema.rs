//! Collection schema: declared search fields plus the fixed internal columns

use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::{DocumentStoreError, Result};
use crate::sql::sanitize::{safe_name, validate_field_name};
use crate::types::{FieldType, InternalField, SearchField};

/// Search fields of one collection
///
/// Primary fields are resolved against stored documents; additional fields
/// hold values supplied next to the document at write time. Both get their
/// own column.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    primary: Vec<SearchField>,
    additional: Vec<SearchField>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    /// Build from `{name: type}` objects as callers send them
    pub fn from_json(search_fields: &Value, additional: Option<&Value>) -> Result<Self> {
        let mut schema = Self::new();
        for (name, field_type) in Self::field_pairs(search_fields)? {
            schema.define_field(&name, field_type)?;
        }
        if let Some(additional) = additional {
            for (name, field_type) in Self::field_pairs(additional)? {
                schema.define_additional_field(&name, field_type)?;
            }
        }
        Ok(schema)
    }

    fn field_pairs(value: &Value) -> Result<Vec<(String, FieldType)>> {
        let obj = value.as_object().ok_or_else(|| {
            DocumentStoreError::invalid_field_name("search fields must be an object of name to type")
        })?;
        obj.iter()
            .map(|(name, field_type)| {
                let type_name = field_type.as_str().ok_or_else(|| {
                    DocumentStoreError::invalid_field_name(format!(
                        "type of search field '{}' must be a string",
                        name
                    ))
                })?;
                Ok((name.clone(), type_name.parse()?))
            })
            .collect()
    }

    /// Declare a search field resolved from the document
    pub fn define_field(&mut self, name: &str, field_type: FieldType) -> Result<()> {
        let name = self.check_new_field(name)?;
        self.primary.push(SearchField::new(name, field_type));
        Ok(())
    }

    /// Declare a search field whose value is supplied alongside the document
    pub fn define_additional_field(&mut self, name: &str, field_type: FieldType) -> Result<()> {
        let name = self.check_new_field(name)?;
        self.additional.push(SearchField::new(name, field_type));
        Ok(())
    }

    fn check_new_field(&self, name: &str) -> Result<String> {
        let lowered = validate_field_name(name)?;
        let column = safe_name(&lowered);
        if self.fields().any(|f| f.name == lowered || safe_name(&f.name) == column) {
            return Err(DocumentStoreError::reserved_field_name(format!(
                "search field '{}' is already defined",
                name
            )));
        }
        Ok(lowered)
    }

    /// Primary fields followed by additional fields
    pub fn fields(&self) -> impl Iterator<Item = &SearchField> {
        self.primary.iter().chain(self.additional.iter())
    }

    pub fn primary_fields(&self) -> &[SearchField] {
        &self.primary
    }

    pub fn additional_fields(&self) -> &[SearchField] {
        &self.additional
    }

    /// Look a field up by declared or column-safe name, ignoring case
    pub fn field(&self, name: &str) -> Option<&SearchField> {
        let lowered = name.to_lowercase();
        let column = safe_name(&lowered);
        self.fields()
            .find(|f| f.name == lowered)
            .or_else(|| self.fields().find(|f| safe_name(&f.name) == column))
    }

    /// Declared plus internal columns
    pub fn column_count(&self) -> usize {
        self.primary.len() + self.additional.len() + InternalField::ALL.len()
    }

    /// Compare against a live table's column name to type map
    pub fn matches_live_schema(&self, live: &BTreeMap<String, String>) -> bool {
        self.drift(live).is_empty()
    }

    /// Human-readable differences between the declared and live columns
    pub fn drift(&self, live: &BTreeMap<String, String>) -> Vec<String> {
        let mut problems = Vec::new();

        if live.len() != self.column_count() {
            problems.push(format!(
                "declared {} columns, table has {}",
                self.column_count(),
                live.len()
            ));
        }

        for field in self.fields() {
            let live_type = live
                .get(&field.name)
                .or_else(|| live.get(&safe_name(&field.name)));
            match live_type {
                Some(t) if t.eq_ignore_ascii_case(field.field_type.to_sql_type()) => {}
                Some(t) => problems.push(format!(
                    "field '{}' is {} in the table but declared {}",
                    field.name,
                    t,
                    field.field_type.to_sql_type()
                )),
                None => problems.push(format!("field '{}' has no column", field.name)),
            }
        }

        for internal in InternalField::ALL {
            match live.get(internal.name()) {
                Some(t) if t.eq_ignore_ascii_case(internal.to_sql_type()) => {}
                Some(t) => problems.push(format!(
                    "internal column '{}' is {}, expected {}",
                    internal.name(),
                    t,
                    internal.to_sql_type()
                )),
                None => problems.push(format!("internal column '{}' is missing", internal.name())),
            }
        }

        problems
    }

    fn primary_map(&self) -> BTreeMap<&str, FieldType> {
        self.primary
            .iter()
            .map(|f| (f.name.as_str(), f.field_type))
            .collect()
    }
}

/// Equal when the primary search fields are equal, regardless of order
impl PartialEq for Schema {
    fn eq(&self, other: &Self) -> bool {
        self.primary_map() == other.primary_map()
    }
}

/// Builder collecting field declarations; errors surface at `build`
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    fields: Vec<(String, FieldType, bool)>,
}

impl SchemaBuilder {
    pub fn field(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.fields.push((name.into(), field_type, false));
        self
    }

    pub fn additional_field(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.fields.push((name.into(), field_type, true));
        self
    }

    pub fn build(self) -> Result<Schema> {
        let mut schema = Schema::new();
        for (name, field_type, additional) in self.fields {
            if additional {
                schema.define_additional_field(&name, field_type)?;
            } else {
                schema.define_field(&name, field_type)?;
            }
        }
        Ok(schema)
    }
}
