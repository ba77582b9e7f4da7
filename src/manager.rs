//! StoreManager - owns the engine connection and the collection registry
//!
//! One manager is one open database. Collections are provisioned through it
//! and handed out as [`DocumentStore`] accessors that share its connection.

use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::StoreConfig;
use crate::engine::open_engine;
use crate::error::{DocumentStoreError, Result};
use crate::schema::Schema;
use crate::sql::ddl::DdlGenerator;
use crate::sql::sanitize::validate_collection_name;
use crate::store::{Connection, DocumentStore, OpenTransaction, SharedConnection};

/// Options for provisioning a collection
#[derive(Debug, Clone, Copy, Default)]
pub struct ProvisionOptions {
    /// Drop any existing table (and its rows) before provisioning
    pub drop_first: bool,
}

impl ProvisionOptions {
    pub fn drop_first() -> Self {
        Self { drop_first: true }
    }
}

/// How an explicit transaction ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionOutcome {
    Committed,
    /// Not marked successful before commit
    RolledBack,
}

/// Accessors by collection name
///
/// Only reachable through the manager's lock, so provisioning of one name
/// never interleaves with another provision or drop.
#[derive(Default)]
struct CollectionRegistry {
    collections: BTreeMap<String, DocumentStore>,
}

impl CollectionRegistry {
    fn get(&self, name: &str) -> Option<&DocumentStore> {
        self.collections.get(name)
    }

    fn insert(&mut self, store: DocumentStore) {
        self.collections.insert(store.name().to_string(), store);
    }

    fn remove(&mut self, name: &str) -> Option<DocumentStore> {
        self.collections.remove(name)
    }

    fn names(&self) -> Vec<String> {
        self.collections.keys().cloned().collect()
    }

    fn clear(&mut self) {
        self.collections.clear();
    }
}

/// An open document database
pub struct StoreManager {
    config: StoreConfig,
    connection: SharedConnection,
    registry: Mutex<CollectionRegistry>,
}

impl StoreManager {
    /// Open the database with the engine the configuration selects
    pub fn open(config: StoreConfig) -> Result<Self> {
        let engine = open_engine(&config)?;
        info!(location = ?config.location, "Opened document store");
        Ok(Self {
            config,
            connection: Arc::new(Mutex::new(Connection::new(engine))),
            registry: Mutex::new(CollectionRegistry::default()),
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn is_open(&self) -> bool {
        self.connection.lock().is_open()
    }

    // =========================================================================
    // Collections
    // =========================================================================

    /// Open or create the table backing a collection
    ///
    /// This will:
    /// 1. Drop the existing table when `drop_first` is set
    /// 2. Create the table and one index per search field if it is absent
    /// 3. Otherwise compare the live columns with `schema` and fail with
    ///    `SchemaMismatch` on any difference, leaving the table untouched
    pub fn provision(
        &self,
        name: &str,
        schema: Schema,
        options: ProvisionOptions,
    ) -> Result<DocumentStore> {
        validate_collection_name(name)?;

        let mut registry = self.registry.lock();
        let mut conn = self.connection.lock();
        if conn.transaction.is_some() {
            return Err(DocumentStoreError::transaction_state(format!(
                "cannot provision '{}' while a transaction is open",
                name
            )));
        }

        if options.drop_first {
            conn.engine()?
                .execute(&DdlGenerator::generate_drop_table(name))?;
            registry.remove(name);
            info!(collection = %name, "Dropped collection before provisioning");
        }

        let live = conn.engine()?.table_columns(name)?;
        if live.is_empty() {
            let generator = DdlGenerator::new(&schema);
            conn.atomically(|engine| {
                engine.execute(&generator.generate_create_table(name))?;
                for index in generator.generate_create_indexes(name) {
                    engine.execute(&index)?;
                }
                Ok(())
            })?;
            info!(collection = %name, fields = schema.column_count(), "Created collection");
        } else {
            let drift = schema.drift(&live);
            if !drift.is_empty() {
                warn!(collection = %name, drift = ?drift, "Declared schema differs from table");
                return Err(DocumentStoreError::schema_mismatch(format!(
                    "collection '{}': {}",
                    name,
                    drift.join("; ")
                )));
            }
            debug!(collection = %name, "Opened existing collection");
        }
        drop(conn);

        let store = DocumentStore::new(name.to_string(), Arc::new(schema), self.connection.clone());
        registry.insert(store.clone());
        Ok(store)
    }

    /// Accessor of a provisioned collection
    pub fn collection(&self, name: &str) -> Result<DocumentStore> {
        self.registry
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| DocumentStoreError::CollectionNotFound(name.to_string()))
    }

    /// Names of provisioned collections, sorted
    pub fn collection_names(&self) -> Vec<String> {
        self.registry.lock().names()
    }

    /// Drop a collection's table and forget its accessor
    pub fn drop_collection(&self, name: &str) -> Result<()> {
        validate_collection_name(name)?;

        let mut registry = self.registry.lock();
        self.connection
            .lock()
            .engine()?
            .execute(&DdlGenerator::generate_drop_table(name))?;
        registry.remove(name);

        info!(collection = %name, "Dropped collection");
        Ok(())
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    /// Open the store's single explicit transaction
    pub fn begin_transaction(&self) -> Result<()> {
        let mut conn = self.connection.lock();
        if conn.transaction.is_some() {
            return Err(DocumentStoreError::transaction_state(
                "a transaction is already open",
            ));
        }
        conn.engine()?.begin()?;
        conn.transaction = Some(OpenTransaction::default());
        debug!("Transaction started");
        Ok(())
    }

    /// Allow the open transaction to commit
    pub fn mark_transaction_successful(&self) -> Result<()> {
        let mut conn = self.connection.lock();
        match conn.transaction.as_mut() {
            Some(transaction) => {
                transaction.successful = true;
                Ok(())
            }
            None => Err(DocumentStoreError::transaction_state(
                "no transaction is open",
            )),
        }
    }

    /// End the open transaction
    ///
    /// Commits when it was marked successful and rolls back otherwise.
    pub fn commit_transaction(&self) -> Result<TransactionOutcome> {
        let mut conn = self.connection.lock();
        let transaction = conn
            .transaction
            .take()
            .ok_or_else(|| DocumentStoreError::transaction_state("no transaction to commit"))?;
        let engine = conn.engine()?;

        if !transaction.successful {
            engine.rollback()?;
            debug!("Transaction was not marked successful, rolled back");
            return Ok(TransactionOutcome::RolledBack);
        }

        if let Err(e) = engine.commit() {
            warn!(error = %e, "Commit failed, rolling back");
            if let Err(rollback_err) = engine.rollback() {
                warn!(error = %rollback_err, "Rollback after failed commit also failed");
            }
            return Err(DocumentStoreError::transaction_state(format!(
                "commit failed: {}",
                e
            )));
        }

        debug!("Transaction committed");
        Ok(TransactionOutcome::Committed)
    }

    /// Abandon the open transaction
    pub fn rollback_transaction(&self) -> Result<()> {
        let mut conn = self.connection.lock();
        if conn.transaction.take().is_none() {
            return Err(DocumentStoreError::transaction_state(
                "no transaction to roll back",
            ));
        }
        conn.engine()?.rollback()?;
        debug!("Transaction rolled back");
        Ok(())
    }

    pub fn in_transaction(&self) -> bool {
        self.connection.lock().transaction.is_some()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Close the connection; accessors handed out fail with `DatabaseClosed`
    ///
    /// An open transaction is rolled back. Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        let mut registry = self.registry.lock();
        let mut conn = self.connection.lock();
        let pending = conn.transaction.is_some();
        let Some(mut engine) = conn.take_engine() else {
            return Ok(());
        };
        registry.clear();

        if pending {
            warn!("Closing with an open transaction, rolling back");
            if let Err(e) = engine.rollback() {
                warn!(error = %e, "Rollback on close failed");
            }
        }
        engine.close()?;

        info!(location = ?self.config.location, "Closed document store");
        Ok(())
    }

    /// Delete the database file and its side files
    ///
    /// Keeps going when one file cannot be removed and reports the failures
    /// once at the end. Missing files are skipped. The store must be closed.
    pub fn destroy(config: &StoreConfig) -> Result<()> {
        let mut failures = Vec::new();
        let mut removed = 0;

        for path in config.backing_files() {
            match std::fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to remove store file");
                    failures.push(format!("{}: {}", path.display(), e));
                }
            }
        }

        if !failures.is_empty() {
            return Err(DocumentStoreError::PartialMaintenanceFailure(format!(
                "removed {} file(s), failed on {}",
                removed,
                failures.join(", ")
            )));
        }

        info!(location = ?config.location, removed, "Destroyed document store");
        Ok(())
    }
}
