//! Structured SQL statements
//!
//! Statements are assembled from identifiers, operators and parameter slots.
//! Identifiers can only be created through the sanitizing constructors on
//! [`Ident`], and every caller-supplied value is a [`SqlValue`] that renders
//! as a `?` placeholder, so a value can never end up in the SQL text.

use crate::sql::sanitize::{quote_identifier, safe_name};
use crate::types::{InternalField, SortDirection, SqlValue};

/// A sanitized, bracket-quoted identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ident(String);

impl Ident {
    /// Column of a declared search field
    pub fn field(name: &str) -> Self {
        Self(quote_identifier(&safe_name(name)))
    }

    pub fn internal(field: InternalField) -> Self {
        Self(quote_identifier(field.name()))
    }

    pub fn table(name: &str) -> Self {
        Self(quote_identifier(name))
    }

    /// Index name derived from a table and a column
    pub fn index(table: &str, column: &str) -> Self {
        Self(quote_identifier(&format!("{}_{}_idx", table, safe_name(column))))
    }

    pub fn as_sql(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    fn as_sql(self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }
}

/// Boolean expression tree for WHERE clauses
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Literal true predicate `1`
    True,
    /// `column = 1` / `column = 0` against an internal flag
    Flag { column: Ident, set: bool },
    Compare {
        column: Ident,
        op: CompareOp,
        value: SqlValue,
    },
    /// Case-insensitive pattern; `\` escapes `%` and `_`
    Like {
        column: Ident,
        pattern: String,
        negated: bool,
    },
    /// Case-sensitive pattern with `*` and `?` wildcards
    Glob {
        column: Ident,
        pattern: String,
        negated: bool,
    },
    Between {
        column: Ident,
        low: SqlValue,
        high: SqlValue,
        negated: bool,
    },
    InList {
        column: Ident,
        values: Vec<SqlValue>,
        negated: bool,
    },
    And(Vec<Expr>),
    Or(Vec<Expr>),
}

impl Expr {
    pub fn compare(column: Ident, op: CompareOp, value: SqlValue) -> Self {
        Expr::Compare { column, op, value }
    }

    pub fn like(column: Ident, pattern: impl Into<String>) -> Self {
        Expr::Like {
            column,
            pattern: pattern.into(),
            negated: false,
        }
    }

    pub fn not_like(column: Ident, pattern: impl Into<String>) -> Self {
        Expr::Like {
            column,
            pattern: pattern.into(),
            negated: true,
        }
    }

    pub fn glob(column: Ident, pattern: impl Into<String>) -> Self {
        Expr::Glob {
            column,
            pattern: pattern.into(),
            negated: false,
        }
    }

    pub fn not_glob(column: Ident, pattern: impl Into<String>) -> Self {
        Expr::Glob {
            column,
            pattern: pattern.into(),
            negated: true,
        }
    }

    pub fn flag(field: InternalField, set: bool) -> Self {
        Expr::Flag {
            column: Ident::internal(field),
            set,
        }
    }

    /// `AND` of the given expressions, collapsing trivial cases
    pub fn all(mut exprs: Vec<Expr>) -> Self {
        exprs.retain(|e| *e != Expr::True);
        match exprs.len() {
            0 => Expr::True,
            1 => exprs.remove(0),
            _ => Expr::And(exprs),
        }
    }

    /// `OR` of the given expressions; a single child is returned as-is
    pub fn any(mut exprs: Vec<Expr>) -> Self {
        match exprs.len() {
            0 => Expr::True,
            1 => exprs.remove(0),
            _ => Expr::Or(exprs),
        }
    }

    fn write(&self, out: &mut SqlWriter) {
        match self {
            Expr::True => out.push("1"),
            Expr::Flag { column, set } => {
                out.push(column.as_sql());
                out.push(if *set { " = 1" } else { " = 0" });
            }
            Expr::Compare { column, op, value } => {
                out.push(column.as_sql());
                out.push(" ");
                out.push(op.as_sql());
                out.push(" ");
                out.bind(value.clone());
            }
            Expr::Like {
                column,
                pattern,
                negated,
            } => {
                out.push(column.as_sql());
                out.push(if *negated { " NOT LIKE " } else { " LIKE " });
                out.bind(SqlValue::Text(pattern.clone()));
                out.push(" ESCAPE '\\'");
            }
            Expr::Glob {
                column,
                pattern,
                negated,
            } => {
                out.push(column.as_sql());
                out.push(if *negated { " NOT GLOB " } else { " GLOB " });
                out.bind(SqlValue::Text(pattern.clone()));
            }
            Expr::Between {
                column,
                low,
                high,
                negated,
            } => {
                out.push(column.as_sql());
                out.push(if *negated { " NOT BETWEEN " } else { " BETWEEN " });
                out.bind(low.clone());
                out.push(" AND ");
                out.bind(high.clone());
            }
            Expr::InList {
                column,
                values,
                negated,
            } => {
                out.push(column.as_sql());
                out.push(if *negated { " NOT IN (" } else { " IN (" });
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        out.push(", ");
                    }
                    out.bind(value.clone());
                }
                out.push(")");
            }
            Expr::And(children) => Self::write_joined(children, " AND ", out),
            Expr::Or(children) => Self::write_joined(children, " OR ", out),
        }
    }

    fn write_joined(children: &[Expr], separator: &str, out: &mut SqlWriter) {
        if children.is_empty() {
            out.push("1");
            return;
        }
        for (i, child) in children.iter().enumerate() {
            if i > 0 {
                out.push(separator);
            }
            let grouped = matches!(child, Expr::And(_) | Expr::Or(_));
            if grouped {
                out.push("(");
            }
            child.write(out);
            if grouped {
                out.push(")");
            }
        }
    }
}

/// Rendered SQL text plus its positional parameters
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    sql: String,
    params: Vec<SqlValue>,
}

impl Statement {
    /// Only this crate's builders and DDL generator produce statements
    pub(crate) fn new(sql: impl Into<String>, params: Vec<SqlValue>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[SqlValue] {
        &self.params
    }
}

#[derive(Default)]
struct SqlWriter {
    sql: String,
    params: Vec<SqlValue>,
}

impl SqlWriter {
    fn push(&mut self, text: &str) {
        self.sql.push_str(text);
    }

    fn bind(&mut self, value: SqlValue) {
        self.sql.push('?');
        self.params.push(value);
    }

    fn finish(self) -> Statement {
        Statement::new(self.sql, self.params)
    }
}

/// What a SELECT returns
#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    Columns(Vec<Ident>),
    Count,
}

/// SELECT builder
#[derive(Debug, Clone)]
pub struct Select {
    table: Ident,
    projection: Projection,
    filter: Expr,
    order_by: Vec<(Ident, SortDirection)>,
    limit: Option<i64>,
    offset: Option<i64>,
}

impl Select {
    pub fn from(table: Ident) -> Self {
        Self {
            table,
            projection: Projection::Count,
            filter: Expr::True,
            order_by: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    pub fn columns(mut self, columns: Vec<Ident>) -> Self {
        self.projection = Projection::Columns(columns);
        self
    }

    pub fn count(mut self) -> Self {
        self.projection = Projection::Count;
        self
    }

    pub fn filter(mut self, filter: Expr) -> Self {
        self.filter = filter;
        self
    }

    pub fn order_by(mut self, column: Ident, direction: SortDirection) -> Self {
        self.order_by.push((column, direction));
        self
    }

    pub fn limit(mut self, limit: Option<i64>) -> Self {
        self.limit = limit;
        self
    }

    /// Ignored when no limit is set
    pub fn offset(mut self, offset: Option<i64>) -> Self {
        self.offset = offset;
        self
    }

    pub fn build(&self) -> Statement {
        let mut out = SqlWriter::default();
        out.push("SELECT ");
        match &self.projection {
            Projection::Count => out.push("COUNT(*)"),
            Projection::Columns(columns) => {
                let list: Vec<&str> = columns.iter().map(Ident::as_sql).collect();
                out.push(&list.join(", "));
            }
        }
        out.push(" FROM ");
        out.push(self.table.as_sql());
        out.push(" WHERE ");
        self.filter.write(&mut out);

        if !self.order_by.is_empty() {
            let list: Vec<String> = self
                .order_by
                .iter()
                .map(|(column, direction)| format!("{} {}", column.as_sql(), direction.as_sql()))
                .collect();
            out.push(" ORDER BY ");
            out.push(&list.join(", "));
        }

        if let Some(limit) = self.limit {
            out.push(" LIMIT ");
            out.bind(SqlValue::Integer(limit));
            if let Some(offset) = self.offset {
                out.push(" OFFSET ");
                out.bind(SqlValue::Integer(offset));
            }
        }

        out.finish()
    }
}

/// INSERT builder
#[derive(Debug, Clone)]
pub struct Insert {
    table: Ident,
    values: Vec<(Ident, SqlValue)>,
}

impl Insert {
    pub fn into(table: Ident) -> Self {
        Self {
            table,
            values: Vec::new(),
        }
    }

    pub fn value(mut self, column: Ident, value: SqlValue) -> Self {
        self.values.push((column, value));
        self
    }

    pub fn build(&self) -> Statement {
        let mut out = SqlWriter::default();
        out.push("INSERT INTO ");
        out.push(self.table.as_sql());
        if self.values.is_empty() {
            out.push(" DEFAULT VALUES");
            return out.finish();
        }
        let columns: Vec<&str> = self.values.iter().map(|(c, _)| c.as_sql()).collect();
        out.push(" (");
        out.push(&columns.join(", "));
        out.push(") VALUES (");
        for (i, (_, value)) in self.values.iter().enumerate() {
            if i > 0 {
                out.push(", ");
            }
            out.bind(value.clone());
        }
        out.push(")");
        out.finish()
    }
}

/// UPDATE builder
#[derive(Debug, Clone)]
pub struct Update {
    table: Ident,
    set: Vec<(Ident, SqlValue)>,
    filter: Expr,
}

impl Update {
    pub fn table(table: Ident) -> Self {
        Self {
            table,
            set: Vec::new(),
            filter: Expr::True,
        }
    }

    pub fn set(mut self, column: Ident, value: SqlValue) -> Self {
        self.set.push((column, value));
        self
    }

    pub fn filter(mut self, filter: Expr) -> Self {
        self.filter = filter;
        self
    }

    pub fn build(&self) -> Statement {
        let mut out = SqlWriter::default();
        out.push("UPDATE ");
        out.push(self.table.as_sql());
        out.push(" SET ");
        for (i, (column, value)) in self.set.iter().enumerate() {
            if i > 0 {
                out.push(", ");
            }
            out.push(column.as_sql());
            out.push(" = ");
            out.bind(value.clone());
        }
        out.push(" WHERE ");
        self.filter.write(&mut out);
        out.finish()
    }
}

/// DELETE builder
#[derive(Debug, Clone)]
pub struct Delete {
    table: Ident,
    filter: Expr,
}

impl Delete {
    pub fn from(table: Ident) -> Self {
        Self {
            table,
            filter: Expr::True,
        }
    }

    pub fn filter(mut self, filter: Expr) -> Self {
        self.filter = filter;
        self
    }

    pub fn build(&self) -> Statement {
        let mut out = SqlWriter::default();
        out.push("DELETE FROM ");
        out.push(self.table.as_sql());
        out.push(" WHERE ");
        self.filter.write(&mut out);
        out.finish()
    }
}
