//! DocumentStore - CRUD and sync bookkeeping over one collection
//!
//! Every row carries the raw document plus three sync columns:
//! `_dirty` (0 or the time of the last unsynced change), `_deleted` (soft
//! delete flag) and `_operation` (pending sync intent, see [`SyncOperation`]).
//! All collections of one store share a single engine connection.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::document::{Document, DocumentTarget, Replacement, map_document};
use crate::engine::{RelationalEngine, SqlRow};
use crate::error::{DocumentStoreError, Result};
use crate::query::{AddOptions, FindOptions, Query, QueryPart, RemoveOptions};
use crate::schema::Schema;
use crate::sql::condition::{compile_count, compile_find, compile_query};
use crate::sql::sanitize::safe_name;
use crate::sql::statement::{CompareOp, Expr, Ident, Select};
use crate::types::{DeletedPolicy, InternalField, SortSpec, SqlValue, SyncOperation};

pub(crate) type Engine = Box<dyn RelationalEngine>;

const BATCH_SAVEPOINT: &str = "document_store_batch";

/// Explicit transaction opened through the store manager
#[derive(Debug, Default)]
pub(crate) struct OpenTransaction {
    pub(crate) successful: bool,
}

/// The engine shared by every collection of one store
pub(crate) struct Connection {
    engine: Option<Engine>,
    pub(crate) transaction: Option<OpenTransaction>,
}

pub(crate) type SharedConnection = Arc<Mutex<Connection>>;

impl Connection {
    pub(crate) fn new(engine: Engine) -> Self {
        Self {
            engine: Some(engine),
            transaction: None,
        }
    }

    pub(crate) fn engine(&mut self) -> Result<&mut Engine> {
        self.engine.as_mut().ok_or(DocumentStoreError::DatabaseClosed)
    }

    pub(crate) fn is_open(&self) -> bool {
        self.engine.is_some()
    }

    pub(crate) fn take_engine(&mut self) -> Option<Engine> {
        self.transaction = None;
        self.engine.take()
    }

    /// Run `f` so that its writes land together or not at all
    ///
    /// Inside an explicit transaction the work runs under a savepoint, so a
    /// failure undoes only `f` and leaves the transaction open. Otherwise a
    /// transaction is opened just for `f`.
    pub(crate) fn atomically<T>(&mut self, f: impl FnOnce(&mut Engine) -> Result<T>) -> Result<T> {
        let joined = self.transaction.is_some();
        let engine = self.engine()?;
        if joined {
            return Self::under_savepoint(engine, f);
        }

        engine.begin()?;
        match f(engine) {
            Ok(value) => {
                engine.commit()?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = engine.rollback() {
                    warn!(error = %rollback_err, "Rollback after failed write also failed");
                }
                Err(e)
            }
        }
    }

    fn under_savepoint<T>(
        engine: &mut Engine,
        f: impl FnOnce(&mut Engine) -> Result<T>,
    ) -> Result<T> {
        engine.savepoint(BATCH_SAVEPOINT)?;
        match f(engine) {
            Ok(value) => {
                engine.release(BATCH_SAVEPOINT)?;
                Ok(value)
            }
            Err(e) => {
                let undone = engine
                    .rollback_to(BATCH_SAVEPOINT)
                    .and_then(|()| engine.release(BATCH_SAVEPOINT));
                if let Err(rollback_err) = undone {
                    warn!(error = %rollback_err, "Undoing failed write inside transaction failed");
                }
                debug!(error = %e, "Failed write undone, transaction stays open");
                Err(e)
            }
        }
    }
}

/// A row with pending changes, as handed to a synchronizer
#[derive(Debug, Clone, PartialEq)]
pub struct DirtyDocument {
    pub id: i64,
    pub json: Value,
    pub operation: SyncOperation,
    /// Time of the last unsynced change in milliseconds since the epoch
    pub dirty: f64,
}

/// Time stamped into `_dirty`
fn dirty_timestamp() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64
}

fn id_filter(id: i64) -> Expr {
    Expr::compare(
        Ident::internal(InternalField::Id),
        CompareOp::Eq,
        SqlValue::Integer(id),
    )
}

fn dirty_query() -> Result<Query> {
    Ok(Query::new(vec![
        QueryPart::new().greater_than(InternalField::Dirty.name(), 0)?,
    ]))
}

/// Accessor for one collection
///
/// Cheap to clone; clones share the store's connection.
#[derive(Clone)]
pub struct DocumentStore {
    name: String,
    schema: Arc<Schema>,
    connection: SharedConnection,
}

impl DocumentStore {
    pub(crate) fn new(name: String, schema: Arc<Schema>, connection: SharedConnection) -> Self {
        Self {
            name,
            schema,
            connection,
        }
    }

    /// Collection name, which is also the table name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Insert documents and return their internal ids in input order
    ///
    /// With `mark_dirty` the rows are recorded as pending `add`s; otherwise
    /// they are stored locally with operation `store` and a clean flag.
    pub fn add(&self, documents: &[Value], options: &AddOptions) -> Result<Vec<i64>> {
        let (operation, dirty) = if options.mark_dirty {
            (SyncOperation::Add, dirty_timestamp())
        } else {
            (SyncOperation::Store, 0.0)
        };

        let mut rows = Vec::with_capacity(documents.len());
        for document in documents {
            let mut values = vec![(
                Ident::internal(InternalField::Json),
                SqlValue::Text(serde_json::to_string(document)?),
            )];
            let columns = map_document(
                &self.schema,
                document,
                options.additional_search_fields.as_ref(),
            );
            values.extend(
                columns
                    .into_iter()
                    .map(|(column, value)| (Ident::field(&column), value)),
            );
            values.push((Ident::internal(InternalField::Dirty), SqlValue::Real(dirty)));
            values.push((Ident::internal(InternalField::Deleted), SqlValue::Integer(0)));
            values.push((
                Ident::internal(InternalField::Operation),
                SqlValue::Text(operation.as_str().to_string()),
            ));
            rows.push(values);
        }

        let ids = self.connection.lock().atomically(|engine| {
            rows.into_iter()
                .map(|values| engine.insert(&self.name, values))
                .collect::<Result<Vec<_>>>()
        })?;

        debug!(collection = %self.name, count = ids.len(), operation = %operation, "Added documents");
        Ok(ids)
    }

    /// Insert a single document
    pub fn add_one(&self, document: &Value, options: &AddOptions) -> Result<i64> {
        let ids = self.add(std::slice::from_ref(document), options)?;
        ids.into_iter()
            .next()
            .ok_or_else(|| DocumentStoreError::database("insert returned no id"))
    }

    /// Replace the content of existing documents
    ///
    /// A pending `add` stays an `add`, anything else becomes `replace`.
    /// Replacing a missing or removed document fails the whole batch. With
    /// `mark_dirty == false` the sync columns are left as they are.
    pub fn replace(&self, replacements: &[Replacement], mark_dirty: bool) -> Result<usize> {
        let count = self.connection.lock().atomically(|engine| {
            for replacement in replacements {
                self.replace_in(engine, replacement, mark_dirty)?;
            }
            Ok(replacements.len())
        })?;

        debug!(collection = %self.name, count, "Replaced documents");
        Ok(count)
    }

    fn replace_in(
        &self,
        engine: &mut Engine,
        replacement: &Replacement,
        mark_dirty: bool,
    ) -> Result<()> {
        let current = match self.current_operation(engine, replacement.id)? {
            None => {
                return Err(DocumentStoreError::update_on_missing(format!(
                    "document {} does not exist in '{}'",
                    replacement.id, self.name
                )));
            }
            Some(Some(SyncOperation::Remove)) => {
                return Err(DocumentStoreError::update_on_missing(format!(
                    "document {} in '{}' has been removed",
                    replacement.id, self.name
                )));
            }
            Some(current) => current,
        };

        let mut set = vec![(
            Ident::internal(InternalField::Json),
            SqlValue::Text(serde_json::to_string(&replacement.json)?),
        )];

        let mut columns = map_document(&self.schema, &replacement.json, None);
        for field in self.schema.primary_fields() {
            let column = safe_name(&field.name);
            let value = columns.remove(&column).unwrap_or(SqlValue::Null);
            set.push((Ident::field(&column), value));
        }
        // Additional fields are only overwritten when the document carries them
        set.extend(
            columns
                .into_iter()
                .map(|(column, value)| (Ident::field(&column), value)),
        );

        if mark_dirty {
            let next = SyncOperation::after_replace(current);
            set.push((Ident::internal(InternalField::Dirty), SqlValue::Real(dirty_timestamp())));
            set.push((
                Ident::internal(InternalField::Operation),
                SqlValue::Text(next.as_str().to_string()),
            ));
            debug!(collection = %self.name, id = replacement.id, from = ?current, to = %next, "Sync state transition");
        }

        engine.update(&self.name, set, id_filter(replacement.id))?;
        Ok(())
    }

    /// Remove one target, soft or hard
    ///
    /// Rows whose pending operation is `add` never reached the remote side and
    /// are always erased. Other rows are erased when `is_erase` is set and
    /// soft-marked as `remove` otherwise. A content target removes every live
    /// match, matched with `equals` when `exact` and `fuzzy-equals` otherwise.
    /// Returns the number of rows erased or marked.
    pub fn delete_if_required(
        &self,
        target: &DocumentTarget,
        is_erase: bool,
        exact: bool,
    ) -> Result<u64> {
        self.connection
            .lock()
            .atomically(|engine| self.remove_in(engine, target, is_erase, exact))
    }

    /// Remove several targets atomically
    ///
    /// `mark_dirty == false` erases rows instead of soft-marking them.
    pub fn remove(&self, targets: &[DocumentTarget], options: &RemoveOptions) -> Result<u64> {
        let is_erase = !options.mark_dirty;
        let affected = self.connection.lock().atomically(|engine| {
            targets.iter().try_fold(0u64, |total, target| -> Result<u64> {
                Ok(total + self.remove_in(engine, target, is_erase, options.exact)?)
            })
        })?;

        debug!(collection = %self.name, affected, is_erase, "Removed documents");
        Ok(affected)
    }

    fn remove_in(
        &self,
        engine: &mut Engine,
        target: &DocumentTarget,
        is_erase: bool,
        exact: bool,
    ) -> Result<u64> {
        let ids = match target {
            DocumentTarget::Id(id) => vec![*id],
            DocumentTarget::Matching(object) => {
                let query = Query::from_object(object, exact)?;
                self.matching_ids(engine, &query, DeletedPolicy::Standard)?
            }
        };

        let mut affected = 0;
        for id in ids {
            let current = match self.current_operation(engine, id)? {
                Some(current) => current,
                None => continue,
            };

            if is_erase || current == Some(SyncOperation::Add) {
                affected += engine.delete(&self.name, id_filter(id))?;
                debug!(collection = %self.name, id, from = ?current, "Erased document");
            } else {
                affected += engine.update(
                    &self.name,
                    vec![
                        (Ident::internal(InternalField::Deleted), SqlValue::Integer(1)),
                        (Ident::internal(InternalField::Dirty), SqlValue::Real(dirty_timestamp())),
                        (
                            Ident::internal(InternalField::Operation),
                            SqlValue::Text(SyncOperation::Remove.as_str().to_string()),
                        ),
                    ],
                    id_filter(id),
                )?;
                debug!(collection = %self.name, id, from = ?current, to = %SyncOperation::Remove, "Sync state transition");
            }
        }

        Ok(affected)
    }

    /// Clear the dirty flag once a sync has been confirmed
    ///
    /// The pending operation is left untouched. Content targets are matched
    /// exactly, including soft-deleted rows.
    pub fn mark_clean(&self, targets: &[DocumentTarget]) -> Result<u64> {
        let affected = self.connection.lock().atomically(|engine| {
            let mut affected = 0;
            for target in targets {
                let ids = match target {
                    DocumentTarget::Id(id) => vec![*id],
                    DocumentTarget::Matching(object) => {
                        let query = Query::from_object(object, true)?;
                        self.matching_ids(engine, &query, DeletedPolicy::Both)?
                    }
                };
                for id in ids {
                    affected += engine.update(
                        &self.name,
                        vec![(Ident::internal(InternalField::Dirty), SqlValue::Integer(0))],
                        id_filter(id),
                    )?;
                }
            }
            Ok(affected)
        })?;

        debug!(collection = %self.name, affected, "Marked documents clean");
        Ok(affected)
    }

    /// Delete every row without dropping the table
    pub fn clear(&self) -> Result<u64> {
        let mut conn = self.connection.lock();
        let removed = conn.engine()?.delete(&self.name, Expr::True)?;
        debug!(collection = %self.name, removed, "Cleared collection");
        Ok(removed)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Documents matching a query
    ///
    /// Always returns `_id` and `json`; see [`DocumentStore::find_fields`]
    /// for a column projection.
    pub fn find(&self, query: &Query, options: &FindOptions) -> Result<Vec<Document>> {
        let options = FindOptions {
            filter: None,
            ..options.clone()
        };
        let statement = compile_find(&self.name, query, &options, &self.schema)?;
        let rows = self.connection.lock().engine()?.query(&statement)?;
        rows.iter().map(Self::row_to_document).collect()
    }

    /// Every document, subject to the options' deletion policy and modifiers
    pub fn find_all(&self, options: &FindOptions) -> Result<Vec<Document>> {
        self.find(&Query::all(), options)
    }

    /// Documents with the given internal ids
    pub fn find_by_ids(&self, ids: &[i64], deleted: DeletedPolicy) -> Result<Vec<Document>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let part = QueryPart::new().is_in(
            InternalField::Id.name(),
            ids.iter().map(|id| Value::from(*id)).collect(),
        )?;
        self.find(
            &Query::new(vec![part]),
            &FindOptions::new().with_deleted(deleted),
        )
    }

    /// Documents matching a `{field: value}` object
    pub fn find_by_object(
        &self,
        object: &Value,
        exact: bool,
        options: &FindOptions,
    ) -> Result<Vec<Document>> {
        self.find(&Query::from_object(object, exact)?, options)
    }

    /// Selected columns of matching rows, keyed by column name
    pub fn find_fields(
        &self,
        query: &Query,
        options: &FindOptions,
    ) -> Result<Vec<Map<String, Value>>> {
        let statement = compile_find(&self.name, query, options, &self.schema)?;
        let rows = self.connection.lock().engine()?.query(&statement)?;
        rows.iter().map(Self::row_to_object).collect()
    }

    pub fn count(&self, query: &Query, deleted: DeletedPolicy) -> Result<u64> {
        let statement = compile_count(&self.name, query, deleted, &self.schema)?;
        let rows = self.connection.lock().engine()?.query(&statement)?;
        Self::single_count(&rows)
    }

    /// Rows waiting to be pushed, oldest change first, removed rows included
    pub fn find_all_dirty(&self) -> Result<Vec<DirtyDocument>> {
        let options = FindOptions::new()
            .with_filter(
                [
                    InternalField::Id,
                    InternalField::Json,
                    InternalField::Operation,
                    InternalField::Dirty,
                ]
                .iter()
                .map(|f| f.name().to_string())
                .collect(),
            )
            .with_sort(vec![
                SortSpec::asc(InternalField::Dirty.name()),
                SortSpec::asc(InternalField::Id.name()),
            ])
            .with_deleted(DeletedPolicy::Both);
        let statement = compile_find(&self.name, &dirty_query()?, &options, &self.schema)?;
        let rows = self.connection.lock().engine()?.query(&statement)?;
        rows.iter().map(Self::row_to_dirty).collect()
    }

    pub fn count_all_dirty(&self) -> Result<u64> {
        self.count(&dirty_query()?, DeletedPolicy::Both)
    }

    pub fn is_dirty(&self, id: i64) -> Result<bool> {
        let part = QueryPart::new()
            .equals(InternalField::Id.name(), id)?
            .greater_than(InternalField::Dirty.name(), 0)?;
        Ok(self.count(&Query::new(vec![part]), DeletedPolicy::Both)? > 0)
    }

    // =========================================================================
    // Row helpers
    // =========================================================================

    /// `None` when the row does not exist, `Some(op)` with its tag otherwise
    fn current_operation(
        &self,
        engine: &mut Engine,
        id: i64,
    ) -> Result<Option<Option<SyncOperation>>> {
        let statement = Select::from(Ident::table(&self.name))
            .columns(vec![Ident::internal(InternalField::Operation)])
            .filter(id_filter(id))
            .build();
        let rows = engine.query(&statement)?;
        Ok(rows.first().map(|row| {
            row.get_str(InternalField::Operation.name())
                .and_then(SyncOperation::parse)
        }))
    }

    fn matching_ids(
        &self,
        engine: &mut Engine,
        query: &Query,
        deleted: DeletedPolicy,
    ) -> Result<Vec<i64>> {
        let statement = Select::from(Ident::table(&self.name))
            .columns(vec![Ident::internal(InternalField::Id)])
            .filter(compile_query(query, &self.schema, deleted)?)
            .build();
        let rows = engine.query(&statement)?;
        Ok(rows
            .iter()
            .filter_map(|row| row.get_i64(InternalField::Id.name()))
            .collect())
    }

    fn single_count(rows: &[SqlRow]) -> Result<u64> {
        rows.first()
            .and_then(|row| row.values().first())
            .and_then(SqlValue::as_i64)
            .map(|n| n.max(0) as u64)
            .ok_or_else(|| DocumentStoreError::database("count returned no rows"))
    }

    fn parse_json(row: &SqlRow) -> Result<Value> {
        match row.get_str(InternalField::Json.name()) {
            Some(text) => Ok(serde_json::from_str(text)?),
            None => Ok(Value::Null),
        }
    }

    fn row_id(row: &SqlRow) -> Result<i64> {
        row.get_i64(InternalField::Id.name())
            .ok_or_else(|| DocumentStoreError::database("row has no _id"))
    }

    fn row_to_document(row: &SqlRow) -> Result<Document> {
        Ok(Document {
            id: Self::row_id(row)?,
            json: Self::parse_json(row)?,
        })
    }

    fn row_to_object(row: &SqlRow) -> Result<Map<String, Value>> {
        let mut object = Map::new();
        for (column, value) in row.columns().iter().zip(row.values()) {
            let value = if column.eq_ignore_ascii_case(InternalField::Json.name()) {
                Self::parse_json(row)?
            } else {
                value.to_json()
            };
            object.insert(column.clone(), value);
        }
        Ok(object)
    }

    fn row_to_dirty(row: &SqlRow) -> Result<DirtyDocument> {
        let tag = row.get_str(InternalField::Operation.name()).unwrap_or_default();
        let operation = SyncOperation::parse(tag).ok_or_else(|| {
            DocumentStoreError::database(format!("unknown operation tag '{}'", tag))
        })?;
        Ok(DirtyDocument {
            id: Self::row_id(row)?,
            json: Self::parse_json(row)?,
            operation,
            dirty: row
                .get(InternalField::Dirty.name())
                .and_then(SqlValue::as_f64)
                .unwrap_or_default(),
        })
    }
}

impl std::fmt::Debug for DocumentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentStore")
            .field("name", &self.name)
            .field("schema", &self.schema)
            .finish()
    }
}
