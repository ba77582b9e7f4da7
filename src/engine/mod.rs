//! Relational engine capability
//!
//! The store talks to SQL through [`RelationalEngine`]. Two implementations
//! exist, chosen by [`EngineKind`] at open time: [`sqlite::SqliteEngine`] and
//! [`encrypted::EncryptedSqliteEngine`]. Engines only execute [`Statement`]s,
//! which keeps caller values out of the SQL text.

pub mod encrypted;
pub mod sqlite;

use std::collections::BTreeMap;

use crate::config::{EngineKind, StoreConfig};
use crate::error::Result;
use crate::sql::ddl::DdlGenerator;
use crate::sql::statement::{Delete, Expr, Ident, Insert, Statement, Update};
use crate::types::SqlValue;

pub use encrypted::EncryptedSqliteEngine;
pub use sqlite::SqliteEngine;

/// One result row with its column names
#[derive(Debug, Clone, PartialEq)]
pub struct SqlRow {
    columns: Vec<String>,
    values: Vec<SqlValue>,
}

impl SqlRow {
    pub fn new(columns: Vec<String>, values: Vec<SqlValue>) -> Self {
        Self { columns, values }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[SqlValue] {
        &self.values
    }

    /// Value of a column, matched case-insensitively
    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(column))
            .and_then(|i| self.values.get(i))
    }

    pub fn get_i64(&self, column: &str) -> Option<i64> {
        self.get(column).and_then(SqlValue::as_i64)
    }

    pub fn get_str(&self, column: &str) -> Option<&str> {
        self.get(column).and_then(SqlValue::as_str)
    }
}

/// Effect of a write statement
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecOutcome {
    pub rows_affected: u64,
    pub last_insert_id: i64,
}

/// Blocking relational engine bound to one open database
pub trait RelationalEngine: Send {
    fn query(&mut self, statement: &Statement) -> Result<Vec<SqlRow>>;

    fn execute(&mut self, statement: &Statement) -> Result<ExecOutcome>;

    fn begin(&mut self) -> Result<()>;

    fn commit(&mut self) -> Result<()>;

    fn rollback(&mut self) -> Result<()>;

    /// Open a named savepoint inside the current transaction
    fn savepoint(&mut self, name: &str) -> Result<()>;

    /// Fold a savepoint into the enclosing transaction
    fn release(&mut self, name: &str) -> Result<()>;

    /// Undo everything written since a savepoint; the savepoint stays open
    fn rollback_to(&mut self, name: &str) -> Result<()>;

    /// Release the underlying connection
    fn close(self: Box<Self>) -> Result<()>;

    /// Live column name to declared type; empty when the table does not exist
    fn table_columns(&mut self, table: &str) -> Result<BTreeMap<String, String>> {
        let rows = self.query(&DdlGenerator::generate_table_columns(table))?;
        Ok(rows
            .iter()
            .filter_map(|row| {
                let name = row.get_str("name")?;
                let column_type = row.get_str("type").unwrap_or_default();
                Some((name.to_string(), column_type.to_ascii_uppercase()))
            })
            .collect())
    }

    /// Insert one row and return its rowid
    fn insert(&mut self, table: &str, values: Vec<(Ident, SqlValue)>) -> Result<i64> {
        let statement = values
            .into_iter()
            .fold(Insert::into(Ident::table(table)), |insert, (column, value)| {
                insert.value(column, value)
            })
            .build();
        Ok(self.execute(&statement)?.last_insert_id)
    }

    fn update(&mut self, table: &str, set: Vec<(Ident, SqlValue)>, filter: Expr) -> Result<u64> {
        let statement = set
            .into_iter()
            .fold(Update::table(Ident::table(table)), |update, (column, value)| {
                update.set(column, value)
            })
            .filter(filter)
            .build();
        Ok(self.execute(&statement)?.rows_affected)
    }

    fn delete(&mut self, table: &str, filter: Expr) -> Result<u64> {
        let statement = Delete::from(Ident::table(table)).filter(filter).build();
        Ok(self.execute(&statement)?.rows_affected)
    }
}

/// Open the engine the configuration selects
pub fn open_engine(config: &StoreConfig) -> Result<Box<dyn RelationalEngine>> {
    match &config.engine {
        EngineKind::Plain => Ok(Box::new(SqliteEngine::open(config)?)),
        EngineKind::Encrypted(key) => Ok(Box::new(EncryptedSqliteEngine::open(config, key)?)),
    }
}
