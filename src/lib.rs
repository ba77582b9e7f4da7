//! # runtara-document-store
//!
//! An offline-first JSON document store on SQLite.
//!
//! Documents are kept whole in a `json` column; declared search fields are
//! projected into their own typed, indexed columns so they can be queried.
//! Every row also records whether it has changes a remote synchronizer still
//! needs to push, and which kind of change that is.
//!
//! ## Features
//!
//! - **Search Fields**: Dotted paths into documents, typed as boolean, integer, number or string
//! - **Array Membership**: Array values are stored delimiter-joined so `equals` matches one element
//! - **Structured Queries**: ORed parts of ANDed items over 16 operators
//! - **Sync Bookkeeping**: Dirty timestamps, soft deletes and a pending-operation tag per row
//! - **Schema Drift Detection**: Reopening a collection with a different schema is an error, not a migration
//! - **SQL Injection Prevention**: Identifiers are safed and quoted; values are always bound parameters
//! - **Encryption**: SQLCipher keying through a caller-supplied key provider; opening fails
//!   when the linked SQLite has no SQLCipher support
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use runtara_document_store::{
//!     AddOptions, FieldType, FindOptions, ProvisionOptions, Query, QueryPart, Schema,
//!     SortSpec, StoreConfig, StoreManager,
//! };
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = StoreManager::open(StoreConfig::builder("app.db").build())?;
//!
//!     let people = manager.provision(
//!         "people",
//!         Schema::builder()
//!             .field("name", FieldType::String)
//!             .field("age", FieldType::Integer)
//!             .build()?,
//!         ProvisionOptions::default(),
//!     )?;
//!
//!     people.add(
//!         &[serde_json::json!({"name": "hayata", "age": 1})],
//!         &AddOptions::default(),
//!     )?;
//!
//!     let query = Query::new(vec![
//!         QueryPart::new()
//!             .fuzzy_equals("name", "hayata")?
//!             .less_than("age", 99)?,
//!     ]);
//!     let found = people.find(
//!         &query,
//!         &FindOptions::new()
//!             .with_limit(10)
//!             .with_sort(vec![SortSpec::asc("name"), SortSpec::desc("age")]),
//!     )?;
//!     assert_eq!(found.len(), 1);
//!
//!     // Hand pending changes to a synchronizer, then confirm them
//!     for pending in people.find_all_dirty()? {
//!         println!("{} {} {}", pending.operation, pending.id, pending.json);
//!     }
//!
//!     manager.close()?;
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! ```rust
//! use std::time::Duration;
//! use runtara_document_store::{EncryptionKey, StoreConfig};
//!
//! let config = StoreConfig::builder("secure.db")
//!     .encryption_key(EncryptionKey::from_bytes(vec![7u8; 32])) // Encrypted engine
//!     .create_if_missing(true)                                  // Default
//!     .busy_timeout(Duration::from_secs(5))                     // Default
//!     .build();
//! ```
//!
//! ## Concurrency
//!
//! Every call blocks until the engine returns. A manager holds exactly one
//! connection, shared by all of its collection accessors; callers are
//! expected to funnel writes through a single worker.

pub mod config;
pub mod document;
pub mod engine;
pub mod error;
pub mod manager;
pub mod query;
pub mod schema;
pub mod sql;
pub mod store;
pub mod types;

// Re-export main types for convenience
pub use config::{
    EncryptionKey, EngineKind, KeyProvider, StoreConfig, StoreConfigBuilder, StoreLocation,
};
pub use document::{
    ARRAY_DELIMITER, ColumnValues, Document, DocumentTarget, Replacement, map_document, normalize,
    resolve_path,
};
pub use engine::{ExecOutcome, RelationalEngine, SqlRow};
pub use error::{DocumentStoreError, Result};
pub use manager::{ProvisionOptions, StoreManager, TransactionOutcome};
pub use query::{
    AddOptions, FindOptions, OperatorClass, Query, QueryOperator, QueryPart, QueryPartItem,
    QueryValue, RemoveOptions,
};
pub use schema::{Schema, SchemaBuilder};
pub use store::{DirtyDocument, DocumentStore};
pub use types::{
    DeletedPolicy, FieldType, InternalField, SearchField, SortDirection, SortSpec, SqlValue,
    SyncOperation,
};

// Re-export SQL utilities for advanced users
pub use sql::condition::{compile_count, compile_find, compile_query};
pub use sql::ddl::DdlGenerator;
pub use sql::sanitize::{quote_identifier, safe_name};
