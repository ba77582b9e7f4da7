//! Query compilation for SQL WHERE clauses
//!
//! Converts a [`Query`] plus [`FindOptions`] into [`Expr`] trees and
//! [`Select`] statements. Array-valued search fields are stored joined with
//! [`ARRAY_DELIMITER`], so membership tests are expressed as patterns
//! anchored on that delimiter: case-sensitive GLOB for `equals`, escaped
//! LIKE for the fuzzy operators.

use serde_json::Value;
use tracing::debug;

use crate::document::ARRAY_DELIMITER;
use crate::error::{DocumentStoreError, Result};
use crate::query::{FindOptions, Query, QueryOperator, QueryPart, QueryPartItem, QueryValue};
use crate::schema::Schema;
use crate::sql::statement::{CompareOp, Expr, Ident, Select, Statement};
use crate::types::{DeletedPolicy, FieldType, InternalField, SortDirection, SqlValue};

/// Column and declared type a query key refers to
struct Target {
    column: Ident,
    field_type: Option<FieldType>,
}

impl Target {
    fn resolve(key: &str, schema: &Schema) -> Result<Self> {
        if let Some(internal) = InternalField::from_name(&key.to_lowercase()) {
            return Ok(Self {
                column: Ident::internal(internal),
                field_type: None,
            });
        }
        match schema.field(key) {
            Some(field) => Ok(Self {
                column: Ident::field(&field.name),
                field_type: Some(field.field_type),
            }),
            None => Err(DocumentStoreError::malformed_query(format!(
                "'{}' is not a search field of this collection",
                key
            ))),
        }
    }

    fn bind(&self, value: &Value) -> SqlValue {
        match self.field_type {
            Some(field_type) => SqlValue::for_field(value, field_type),
            None => SqlValue::from_json(value),
        }
    }
}

/// Text form used inside patterns; booleans become 1/0
fn pattern_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => String::from(if *b { "1" } else { "0" }),
        other => other.to_string(),
    }
}

/// Escape `%`, `_` and the escape character itself for `LIKE ... ESCAPE '\'`
fn escape_like(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Escape GLOB wildcards by wrapping each in a one-character class
fn escape_glob(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '*' | '?' | '[' => {
                out.push('[');
                out.push(c);
                out.push(']');
            }
            _ => out.push(c),
        }
    }
    out
}

fn like_forms(target: &Target, patterns: Vec<String>, negated: bool) -> Expr {
    let exprs: Vec<Expr> = patterns
        .into_iter()
        .map(|p| {
            if negated {
                Expr::not_like(target.column.clone(), p)
            } else {
                Expr::like(target.column.clone(), p)
            }
        })
        .collect();
    if negated {
        Expr::all(exprs)
    } else {
        Expr::any(exprs)
    }
}

fn compile_item(item: &QueryPartItem, schema: &Schema) -> Result<Expr> {
    let target = Target::resolve(&item.key, schema)?;
    let d = ARRAY_DELIMITER;

    let expr = match (&item.value, item.operator) {
        (QueryValue::Scalar(value), op) => {
            let text = escape_like(&pattern_text(value));
            match op {
                QueryOperator::Equals | QueryOperator::NotEquals => {
                    let negated = op == QueryOperator::NotEquals;
                    let literal = Expr::compare(
                        target.column.clone(),
                        if negated { CompareOp::Ne } else { CompareOp::Eq },
                        target.bind(value),
                    );
                    // Element matches stay as case-sensitive as the literal form
                    let element = escape_glob(&pattern_text(value));
                    let delimited = [
                        format!("*{d}{element}"),
                        format!("*{d}{element}{d}*"),
                        format!("{element}{d}*"),
                    ];
                    let mut forms = vec![literal];
                    forms.extend(delimited.into_iter().map(|p| {
                        if negated {
                            Expr::not_glob(target.column.clone(), p)
                        } else {
                            Expr::glob(target.column.clone(), p)
                        }
                    }));
                    if negated {
                        Expr::all(forms)
                    } else {
                        Expr::any(forms)
                    }
                }
                QueryOperator::FuzzyEquals => like_forms(&target, vec![format!("%{text}%")], false),
                QueryOperator::FuzzyNotEquals => {
                    like_forms(&target, vec![format!("%{text}%")], true)
                }
                QueryOperator::FuzzyLeftEquals | QueryOperator::FuzzyNotLeftEquals => like_forms(
                    &target,
                    vec![format!("%{text}"), format!("%{text}{d}%")],
                    op == QueryOperator::FuzzyNotLeftEquals,
                ),
                QueryOperator::FuzzyRightEquals | QueryOperator::FuzzyNotRightEquals => like_forms(
                    &target,
                    vec![format!("{text}%"), format!("%{d}{text}%")],
                    op == QueryOperator::FuzzyNotRightEquals,
                ),
                QueryOperator::LessThan => {
                    Expr::compare(target.column.clone(), CompareOp::Lt, target.bind(value))
                }
                QueryOperator::LessOrEqual => {
                    Expr::compare(target.column.clone(), CompareOp::Le, target.bind(value))
                }
                QueryOperator::GreaterThan => {
                    Expr::compare(target.column.clone(), CompareOp::Gt, target.bind(value))
                }
                QueryOperator::GreaterOrEqual => {
                    Expr::compare(target.column.clone(), CompareOp::Ge, target.bind(value))
                }
                other => return Err(shape_error(other)),
            }
        }
        (QueryValue::Range(low, high), op @ (QueryOperator::Between | QueryOperator::NotBetween)) => {
            Expr::Between {
                column: target.column.clone(),
                low: target.bind(low),
                high: target.bind(high),
                negated: op == QueryOperator::NotBetween,
            }
        }
        (QueryValue::Set(values), op @ (QueryOperator::In | QueryOperator::NotIn)) => {
            let negated = op == QueryOperator::NotIn;
            Expr::InList {
                column: target.column.clone(),
                values: values.iter().map(|v| target.bind(v)).collect(),
                negated,
            }
        }
        (_, op) => return Err(shape_error(op)),
    };

    Ok(expr)
}

fn shape_error(op: QueryOperator) -> DocumentStoreError {
    DocumentStoreError::malformed_query(format!("value shape does not match operator {}", op))
}

fn compile_part(part: &QueryPart, schema: &Schema) -> Result<Expr> {
    let items = part
        .items
        .iter()
        .map(|item| compile_item(item, schema))
        .collect::<Result<Vec<_>>>()?;
    Ok(Expr::all(items))
}

/// Compile a query and deletion policy into a WHERE expression
///
/// Parts are ORed, items within a part ANDed, and the policy is ANDed onto
/// the whole block. An empty query compiles to the true predicate.
pub fn compile_query(query: &Query, schema: &Schema, deleted: DeletedPolicy) -> Result<Expr> {
    let parts = query
        .parts
        .iter()
        .map(|p| compile_part(p, schema))
        .collect::<Result<Vec<_>>>()?;

    let predicate = if parts.is_empty() {
        Expr::True
    } else {
        Expr::any(parts)
    };

    Ok(Expr::all(vec![predicate, deleted_filter(deleted)]))
}

/// Soft-delete restriction for a policy
pub fn deleted_filter(deleted: DeletedPolicy) -> Expr {
    match deleted {
        DeletedPolicy::Standard => Expr::flag(InternalField::Deleted, false),
        DeletedPolicy::DeletedOnly => Expr::flag(InternalField::Deleted, true),
        DeletedPolicy::Both => Expr::True,
    }
}

/// Columns a find returns; defaults to `_id` and `json`
pub fn projection(options: &FindOptions, schema: &Schema) -> Result<Vec<Ident>> {
    match &options.filter {
        None => Ok(vec![
            Ident::internal(InternalField::Id),
            Ident::internal(InternalField::Json),
        ]),
        Some(fields) if fields.is_empty() => Ok(vec![
            Ident::internal(InternalField::Id),
            Ident::internal(InternalField::Json),
        ]),
        Some(fields) => fields
            .iter()
            .map(|f| Target::resolve(f, schema).map(|t| t.column))
            .collect(),
    }
}

/// Apply sort, limit and offset
///
/// A negative limit replaces any sort with `_id DESC` and uses its absolute
/// value. Offset is dropped when there is no limit.
pub fn apply_modifiers(mut select: Select, options: &FindOptions, schema: &Schema) -> Result<Select> {
    match options.limit {
        Some(limit) if limit < 0 => {
            select = select
                .order_by(Ident::internal(InternalField::Id), SortDirection::Desc)
                .limit(Some(limit.saturating_abs()));
        }
        limit => {
            for spec in &options.sort {
                let target = Target::resolve(&spec.field, schema).map_err(|_| {
                    DocumentStoreError::malformed_query(format!(
                        "invalid sort field '{}'",
                        spec.field
                    ))
                })?;
                select = select.order_by(target.column, spec.direction);
            }
            select = select.limit(limit);
        }
    }

    if options.limit.is_some() {
        select = select.offset(options.offset);
    }

    Ok(select)
}

/// Full SELECT for a find over one collection table
pub fn compile_find(
    table: &str,
    query: &Query,
    options: &FindOptions,
    schema: &Schema,
) -> Result<Statement> {
    let filter = compile_query(query, schema, options.deleted)?;
    let select = Select::from(Ident::table(table))
        .columns(projection(options, schema)?)
        .filter(filter);
    let statement = apply_modifiers(select, options, schema)?.build();
    debug!(table = %table, sql = %statement.sql(), "Compiled find");
    Ok(statement)
}

/// `SELECT COUNT(*)` for a query over one collection table
pub fn compile_count(
    table: &str,
    query: &Query,
    deleted: DeletedPolicy,
    schema: &Schema,
) -> Result<Statement> {
    let filter = compile_query(query, schema, deleted)?;
    let statement = Select::from(Ident::table(table))
        .count()
        .filter(filter)
        .build();
    debug!(table = %table, sql = %statement.sql(), "Compiled count");
    Ok(statement)
}
