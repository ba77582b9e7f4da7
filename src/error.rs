//! Error types for Document Store operations

use thiserror::Error;

/// Errors that can occur during document store operations
#[derive(Debug, Error)]
pub enum DocumentStoreError {
    #[error("Invalid field name: {0}")]
    InvalidFieldName(String),

    #[error("Reserved field name: {0}")]
    ReservedFieldName(String),

    #[error("Invalid collection name: {0}")]
    InvalidCollectionName(String),

    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("Malformed query: {0}")]
    MalformedQuery(String),

    #[error("Database is closed")]
    DatabaseClosed,

    #[error("Transaction state error: {0}")]
    TransactionState(String),

    #[error("Cannot update missing or removed document: {0}")]
    UpdateOnMissingOrRemovedDocument(String),

    #[error("Maintenance partially failed: {0}")]
    PartialMaintenanceFailure(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DocumentStoreError {
    pub fn invalid_field_name(msg: impl Into<String>) -> Self {
        Self::InvalidFieldName(msg.into())
    }

    pub fn reserved_field_name(msg: impl Into<String>) -> Self {
        Self::ReservedFieldName(msg.into())
    }

    pub fn invalid_collection_name(msg: impl Into<String>) -> Self {
        Self::InvalidCollectionName(msg.into())
    }

    pub fn schema_mismatch(msg: impl Into<String>) -> Self {
        Self::SchemaMismatch(msg.into())
    }

    pub fn malformed_query(msg: impl Into<String>) -> Self {
        Self::MalformedQuery(msg.into())
    }

    pub fn transaction_state(msg: impl Into<String>) -> Self {
        Self::TransactionState(msg.into())
    }

    pub fn update_on_missing(msg: impl Into<String>) -> Self {
        Self::UpdateOnMissingOrRemovedDocument(msg.into())
    }

    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    /// Stable code reported to callers across releases
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidFieldName(_) => "INVALID_FIELD_NAME",
            Self::ReservedFieldName(_) => "RESERVED_FIELD_NAME",
            Self::InvalidCollectionName(_) => "INVALID_COLLECTION_NAME",
            Self::CollectionNotFound(_) => "COLLECTION_NOT_FOUND",
            Self::SchemaMismatch(_) => "SCHEMA_MISMATCH",
            Self::MalformedQuery(_) => "MALFORMED_QUERY",
            Self::DatabaseClosed => "DATABASE_CLOSED",
            Self::TransactionState(_) => "TRANSACTION_STATE",
            Self::UpdateOnMissingOrRemovedDocument(_) => "UPDATE_ON_MISSING_OR_REMOVED_DOCUMENT",
            Self::PartialMaintenanceFailure(_) => "PARTIAL_MAINTENANCE_FAILURE",
            Self::Database(_) | Self::Sql(_) => "DATABASE",
            Self::Json(_) => "JSON",
            Self::Io(_) => "IO",
        }
    }
}

pub type Result<T> = std::result::Result<T, DocumentStoreError>;
