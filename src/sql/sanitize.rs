//! SQL Identifier Sanitization Utilities
//!
//! Every identifier that reaches SQL text goes through [`safe_name`] and
//! [`quote_identifier`]. Values never do; they are bound as parameters.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{DocumentStoreError, Result};
use crate::types::InternalField;

/// Separator between path segments of a search field
pub const PATH_SEPARATOR: char = '.';

static FIELD_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^.\[\]\x00-\x1f]+(\.[^.\[\]\x00-\x1f]+)*$").expect("field name pattern")
});

static COLLECTION_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("collection name pattern"));

/// Column-safe form of a search field name
///
/// Lower-cases the name and replaces path separators with underscores, so
/// `address.City` is stored in column `address_city`.
///
/// # Example
/// ```
/// use runtara_document_store::sql::safe_name;
///
/// assert_eq!(safe_name("Address.City"), "address_city");
/// ```
pub fn safe_name(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .filter(|c| *c != '[' && *c != ']')
        .map(|c| if c == PATH_SEPARATOR { '_' } else { c })
        .collect()
}

/// Bracket-quote an identifier
///
/// Brackets cannot be escaped inside a bracketed identifier, so they are
/// dropped.
///
/// # Example
/// ```
/// use runtara_document_store::sql::quote_identifier;
///
/// assert_eq!(quote_identifier("people"), "[people]");
/// ```
pub fn quote_identifier(identifier: &str) -> String {
    let cleaned: String = identifier
        .chars()
        .filter(|c| *c != '[' && *c != ']')
        .collect();
    format!("[{}]", cleaned)
}

/// Validate a search field name and return its stored (lower-case) form
///
/// Rules:
/// - Must not be empty
/// - No leading, trailing or doubled path separators
/// - No brackets or control characters
/// - Cannot reuse an internal column name
pub fn validate_field_name(name: &str) -> Result<String> {
    if name.is_empty() {
        return Err(DocumentStoreError::invalid_field_name(
            "search field name cannot be empty",
        ));
    }

    let lowered = name.to_lowercase();

    if !FIELD_NAME.is_match(&lowered) {
        return Err(DocumentStoreError::invalid_field_name(format!(
            "search field name '{}' is invalid. Path segments must be non-empty and may not contain brackets.",
            name
        )));
    }

    if InternalField::from_name(&lowered).is_some()
        || InternalField::from_name(&safe_name(&lowered)).is_some()
    {
        return Err(DocumentStoreError::reserved_field_name(format!(
            "'{}' is reserved for internal use",
            name
        )));
    }

    Ok(lowered)
}

/// Validate a collection name, which doubles as its table name
pub fn validate_collection_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(DocumentStoreError::invalid_collection_name(
            "collection name cannot be empty",
        ));
    }

    if !COLLECTION_NAME.is_match(name) {
        return Err(DocumentStoreError::invalid_collection_name(format!(
            "collection name '{}' is invalid. Must start with a letter or underscore and contain only letters, numbers, and underscores.",
            name
        )));
    }

    if name.to_ascii_lowercase().starts_with("sqlite_") {
        return Err(DocumentStoreError::invalid_collection_name(format!(
            "collection name '{}' uses the engine's reserved prefix",
            name
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // safe_name / quote_identifier Tests
    // =========================================================================

    #[test]
    fn test_safe_name_lowercases_and_flattens_paths() {
        assert_eq!(safe_name("name"), "name");
        assert_eq!(safe_name("Name"), "name");
        assert_eq!(safe_name("address.city.zip"), "address_city_zip");
    }

    #[test]
    fn test_quote_identifier_brackets() {
        assert_eq!(quote_identifier("people"), "[people]");
        assert_eq!(quote_identifier("_deleted"), "[_deleted]");
        assert_eq!(quote_identifier("select"), "[select]");
    }

    #[test]
    fn test_quote_identifier_strips_brackets() {
        assert_eq!(quote_identifier("a]; DROP TABLE x; --"), "[a; DROP TABLE x; --]");
        assert_eq!(quote_identifier("[x]"), "[x]");
    }

    // =========================================================================
    // validate_field_name Tests
    // =========================================================================

    #[test]
    fn test_validate_field_name_valid() {
        assert_eq!(validate_field_name("name").unwrap(), "name");
        assert_eq!(validate_field_name("Address.City").unwrap(), "address.city");
        assert_eq!(validate_field_name("a.b.c").unwrap(), "a.b.c");
    }

    #[test]
    fn test_validate_field_name_empty() {
        let err = validate_field_name("").unwrap_err();
        assert_eq!(err.code(), "INVALID_FIELD_NAME");
    }

    #[test]
    fn test_validate_field_name_bad_separators() {
        for name in [".name", "name.", "a..b", ".", "a[0]"] {
            let err = validate_field_name(name).unwrap_err();
            assert_eq!(err.code(), "INVALID_FIELD_NAME", "{}", name);
        }
    }

    #[test]
    fn test_validate_field_name_reserved() {
        for name in ["_id", "json", "JSON", "_dirty", "_deleted", "_operation"] {
            let err = validate_field_name(name).unwrap_err();
            assert_eq!(err.code(), "RESERVED_FIELD_NAME", "{}", name);
        }
    }

    // =========================================================================
    // validate_collection_name Tests
    // =========================================================================

    #[test]
    fn test_validate_collection_name() {
        assert!(validate_collection_name("people").is_ok());
        assert!(validate_collection_name("People_2").is_ok());
        assert!(validate_collection_name("_private").is_ok());
    }

    #[test]
    fn test_validate_collection_name_invalid() {
        assert!(validate_collection_name("").is_err());
        assert!(validate_collection_name("2people").is_err());
        assert!(validate_collection_name("my-people").is_err());
        assert!(validate_collection_name("sqlite_master").is_err());
    }
}
