//! Plain SQLite engine on sqlx
//!
//! sqlx is async; the engine owns a private current-thread runtime and blocks
//! on every call, so callers see a synchronous API.

use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqliteConnection, SqliteRow};
use sqlx::{Column, ConnectOptions, Connection, Row, Sqlite, TypeInfo, ValueRef};
use tokio::runtime::Runtime;
use tracing::debug;

use super::{ExecOutcome, RelationalEngine, SqlRow};
use crate::config::{EncryptionKey, StoreConfig, StoreLocation};
use crate::error::Result;
use crate::sql::sanitize::quote_identifier;
use crate::sql::statement::Statement;
use crate::types::SqlValue;

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

pub struct SqliteEngine {
    runtime: Runtime,
    conn: SqliteConnection,
}

impl SqliteEngine {
    pub fn open(config: &StoreConfig) -> Result<Self> {
        Self::open_with_key(config, None)
    }

    /// Open, setting the SQLCipher `key` pragma when a key is given
    pub(crate) fn open_with_key(config: &StoreConfig, key: Option<&EncryptionKey>) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        let mut options = match &config.location {
            StoreLocation::Memory => SqliteConnectOptions::new().in_memory(true),
            StoreLocation::File(path) => SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(config.create_if_missing),
        };
        options = options.busy_timeout(config.busy_timeout);
        if let Some(key) = key {
            options = options.pragma("key", format!("\"x'{}'\"", key.to_hex()));
        }

        let conn = runtime.block_on(options.connect())?;
        debug!(location = ?config.location, encrypted = key.is_some(), "Opened SQLite connection");

        Ok(Self { runtime, conn })
    }

    fn bind(statement: &Statement) -> SqliteQuery<'_> {
        let mut query = sqlx::query(statement.sql());
        for param in statement.params() {
            query = match param {
                SqlValue::Null => query.bind(None::<String>),
                SqlValue::Integer(i) => query.bind(*i),
                SqlValue::Real(f) => query.bind(*f),
                SqlValue::Text(s) => query.bind(s.as_str()),
            };
        }
        query
    }

    fn decode_row(row: &SqliteRow) -> Result<SqlRow> {
        let mut columns = Vec::with_capacity(row.len());
        let mut values = Vec::with_capacity(row.len());

        for column in row.columns() {
            let index = column.ordinal();
            let (is_null, type_name) = {
                let raw = row.try_get_raw(index)?;
                (raw.is_null(), raw.type_info().name().to_string())
            };

            let value = if is_null {
                SqlValue::Null
            } else {
                match type_name.as_str() {
                    "INTEGER" | "BOOLEAN" => {
                        SqlValue::Integer(row.try_get_unchecked::<i64, _>(index)?)
                    }
                    "REAL" => SqlValue::Real(row.try_get_unchecked::<f64, _>(index)?),
                    "BLOB" => {
                        let bytes = row.try_get_unchecked::<Vec<u8>, _>(index)?;
                        SqlValue::Text(String::from_utf8_lossy(&bytes).into_owned())
                    }
                    _ => SqlValue::Text(row.try_get_unchecked::<String, _>(index)?),
                }
            };

            columns.push(column.name().to_string());
            values.push(value);
        }

        Ok(SqlRow::new(columns, values))
    }

    fn run_raw(&mut self, sql: &str) -> Result<()> {
        self.runtime.block_on(sqlx::query(sql).execute(&mut self.conn))?;
        Ok(())
    }
}

impl RelationalEngine for SqliteEngine {
    fn query(&mut self, statement: &Statement) -> Result<Vec<SqlRow>> {
        debug!(sql = %statement.sql(), params = statement.params().len(), "query");
        let rows = self
            .runtime
            .block_on(Self::bind(statement).fetch_all(&mut self.conn))?;
        rows.iter().map(Self::decode_row).collect()
    }

    fn execute(&mut self, statement: &Statement) -> Result<ExecOutcome> {
        debug!(sql = %statement.sql(), params = statement.params().len(), "execute");
        let result = self
            .runtime
            .block_on(Self::bind(statement).execute(&mut self.conn))?;
        Ok(ExecOutcome {
            rows_affected: result.rows_affected(),
            last_insert_id: result.last_insert_rowid(),
        })
    }

    fn begin(&mut self) -> Result<()> {
        self.run_raw("BEGIN")
    }

    fn commit(&mut self) -> Result<()> {
        self.run_raw("COMMIT")
    }

    fn rollback(&mut self) -> Result<()> {
        self.run_raw("ROLLBACK")
    }

    fn savepoint(&mut self, name: &str) -> Result<()> {
        self.run_raw(&format!("SAVEPOINT {}", quote_identifier(name)))
    }

    fn release(&mut self, name: &str) -> Result<()> {
        self.run_raw(&format!("RELEASE {}", quote_identifier(name)))
    }

    fn rollback_to(&mut self, name: &str) -> Result<()> {
        self.run_raw(&format!("ROLLBACK TO {}", quote_identifier(name)))
    }

    fn close(self: Box<Self>) -> Result<()> {
        let SqliteEngine { runtime, conn } = *self;
        runtime.block_on(conn.close())?;
        Ok(())
    }
}
