//! SQL utilities for Document Store
//!
//! Provides statement building, query compilation, DDL generation and
//! identifier sanitization.

pub mod condition;
pub mod ddl;
pub mod sanitize;
pub mod statement;

pub use condition::{apply_modifiers, compile_count, compile_find, compile_query};
pub use ddl::DdlGenerator;
pub use sanitize::{quote_identifier, safe_name, validate_collection_name, validate_field_name};
pub use statement::{CompareOp, Delete, Expr, Ident, Insert, Select, Statement, Update};
