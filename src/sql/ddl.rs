//! DDL Generation for collection tables
//!
//! Generates SQLite DDL for the table backing one collection: the internal
//! columns plus one typed column per declared search field.

use crate::schema::Schema;
use crate::sql::statement::{Ident, Statement};
use crate::types::{InternalField, SearchField, SqlValue};

/// DDL Generator for collection tables
pub struct DdlGenerator<'a> {
    schema: &'a Schema,
}

impl<'a> DdlGenerator<'a> {
    pub fn new(schema: &'a Schema) -> Self {
        Self { schema }
    }

    /// Generate CREATE TABLE statement
    ///
    /// Creates a table with:
    /// - `_id` autoincrement primary key and the raw `json`
    /// - One column per primary and additional search field
    /// - Sync bookkeeping: `_dirty`, `_deleted`, `_operation`
    pub fn generate_create_table(&self, table_name: &str) -> Statement {
        let mut column_defs = vec![
            format!(
                "{} INTEGER PRIMARY KEY AUTOINCREMENT",
                Ident::internal(InternalField::Id).as_sql()
            ),
            format!("{} TEXT", Ident::internal(InternalField::Json).as_sql()),
        ];

        for field in self.schema.fields() {
            column_defs.push(Self::format_column_definition(field));
        }

        column_defs.push(format!(
            "{} REAL DEFAULT 0",
            Ident::internal(InternalField::Dirty).as_sql()
        ));
        column_defs.push(format!(
            "{} INTEGER DEFAULT 0",
            Ident::internal(InternalField::Deleted).as_sql()
        ));
        column_defs.push(format!(
            "{} TEXT",
            Ident::internal(InternalField::Operation).as_sql()
        ));

        Statement::new(
            format!(
                "CREATE TABLE {} ({})",
                Ident::table(table_name).as_sql(),
                column_defs.join(", ")
            ),
            Vec::new(),
        )
    }

    /// One index per search field
    pub fn generate_create_indexes(&self, table_name: &str) -> Vec<Statement> {
        self.schema
            .fields()
            .map(|field| Self::generate_create_index(table_name, field))
            .collect()
    }

    pub fn generate_create_index(table_name: &str, field: &SearchField) -> Statement {
        Statement::new(
            format!(
                "CREATE INDEX IF NOT EXISTS {} ON {}({})",
                Ident::index(table_name, &field.name).as_sql(),
                Ident::table(table_name).as_sql(),
                Ident::field(&field.name).as_sql()
            ),
            Vec::new(),
        )
    }

    pub fn generate_drop_table(table_name: &str) -> Statement {
        Statement::new(
            format!("DROP TABLE IF EXISTS {}", Ident::table(table_name).as_sql()),
            Vec::new(),
        )
    }

    /// Live `(name, type)` rows of a table; empty when the table is absent
    pub fn generate_table_columns(table_name: &str) -> Statement {
        Statement::new(
            "SELECT name, type FROM pragma_table_info(?)",
            vec![SqlValue::Text(table_name.to_string())],
        )
    }

    /// User tables of the database, engine bookkeeping excluded
    pub fn generate_list_tables() -> Statement {
        Statement::new(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
            Vec::new(),
        )
    }

    pub fn format_column_definition(field: &SearchField) -> String {
        format!(
            "{} {}",
            Ident::field(&field.name).as_sql(),
            field.field_type.to_sql_type()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FieldType;

    fn people() -> Schema {
        Schema::builder()
            .field("name", FieldType::String)
            .field("age", FieldType::Integer)
            .field("score", FieldType::Number)
            .field("active", FieldType::Boolean)
            .additional_field("address.city", FieldType::String)
            .build()
            .unwrap()
    }

    // ==================== CREATE TABLE Tests ====================

    #[test]
    fn test_generate_create_table() {
        let schema = people();
        let ddl = DdlGenerator::new(&schema).generate_create_table("people");

        assert_eq!(
            ddl.sql(),
            "CREATE TABLE [people] ([_id] INTEGER PRIMARY KEY AUTOINCREMENT, [json] TEXT, \
             [name] TEXT, [age] INTEGER, [score] REAL, [active] INTEGER, [address_city] TEXT, \
             [_dirty] REAL DEFAULT 0, [_deleted] INTEGER DEFAULT 0, [_operation] TEXT)"
        );
        assert!(ddl.params().is_empty());
    }

    #[test]
    fn test_generate_create_table_empty_schema() {
        let schema = Schema::new();
        let ddl = DdlGenerator::new(&schema).generate_create_table("bare");

        assert!(ddl.sql().starts_with("CREATE TABLE [bare] ([_id] INTEGER"));
        assert!(ddl.sql().contains("[json] TEXT, [_dirty] REAL"));
    }

    #[test]
    fn test_generate_create_table_strips_brackets() {
        let schema = Schema::new();
        let ddl = DdlGenerator::new(&schema).generate_create_table("x]y");
        assert!(ddl.sql().starts_with("CREATE TABLE [xy] ("));
    }

    // ==================== Index Tests ====================

    #[test]
    fn test_generate_create_indexes() {
        let schema = people();
        let indexes = DdlGenerator::new(&schema).generate_create_indexes("people");

        assert_eq!(indexes.len(), 5);
        assert_eq!(
            indexes[0].sql(),
            "CREATE INDEX IF NOT EXISTS [people_name_idx] ON [people]([name])"
        );
        assert_eq!(
            indexes[4].sql(),
            "CREATE INDEX IF NOT EXISTS [people_address_city_idx] ON [people]([address_city])"
        );
    }

    // ==================== DROP / Introspection Tests ====================

    #[test]
    fn test_generate_drop_table() {
        let ddl = DdlGenerator::generate_drop_table("people");
        assert_eq!(ddl.sql(), "DROP TABLE IF EXISTS [people]");
    }

    #[test]
    fn test_generate_table_columns_binds_name() {
        let stmt = DdlGenerator::generate_table_columns("people");
        assert_eq!(stmt.sql(), "SELECT name, type FROM pragma_table_info(?)");
        assert_eq!(stmt.params(), &[SqlValue::Text("people".into())]);
    }

    #[test]
    fn test_format_column_definition() {
        let field = SearchField::new("Address.Zip", FieldType::Integer);
        assert_eq!(
            DdlGenerator::format_column_definition(&field),
            "[address_zip] INTEGER"
        );
    }
}
