//! Validating wrappers over [`sqlx::QueryBuilder`].
//!
//! Only table and column identifiers are written into the SQL text, and
//! those are checked against [`IDENTIFIER_PATTERN`]; values always go
//! through `push_bind` and render as `?` placeholders. Clauses are written
//! in call order, so conditions must be added before ordering and paging.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use sqlx::{Encode, QueryBuilder, Sqlite, Type};
use std::fmt;

static IDENTIFIER_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$").unwrap());

/// A finished statement, ready for `build()`.
pub type Statement = QueryBuilder<'static, Sqlite>;

/// Anything that can be bound to a placeholder of a [`Statement`].
pub trait BindValue: 'static + Encode<'static, Sqlite> + Type<Sqlite> {}

impl<T> BindValue for T where T: 'static + Encode<'static, Sqlite> + Type<Sqlite> {}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryBuildError {
    #[error("no table specified")]
    EmptyTable,
    #[error("no columns specified for {0}")]
    NoColumns(String),
    #[error("no assignments specified for update of {0}")]
    NoAssignments(String),
    #[error("invalid identifier: {0:?}")]
    InvalidIdentifier(String),
    #[error("{table} has {expected} columns but {got} values")]
    ValueCount {
        table: String,
        expected: usize,
        got: usize,
    },
    #[error("{clause} cannot follow {after}")]
    ClauseOrder {
        clause: &'static str,
        after: &'static str,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortOrder::Asc => write!(f, "ASC"),
            SortOrder::Desc => write!(f, "DESC"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Clause {
    Head,
    Where,
    OrderBy,
    Limit,
    Offset,
}

impl Clause {
    fn keyword(self) -> &'static str {
        match self {
            Clause::Head => "column list",
            Clause::Where => "WHERE",
            Clause::OrderBy => "ORDER BY",
            Clause::Limit => "LIMIT",
            Clause::Offset => "OFFSET",
        }
    }
}

/// Shared state of the statement builders: the sqlx builder, the last
/// clause written and the first error hit.
struct Draft {
    builder: Statement,
    clause: Clause,
    error: Option<QueryBuildError>,
}

impl Draft {
    fn new(head: String) -> Self {
        Self {
            builder: QueryBuilder::new(head),
            clause: Clause::Head,
            error: None,
        }
    }

    fn failed(error: QueryBuildError) -> Self {
        let mut draft = Self::new(String::new());
        draft.error = Some(error);
        draft
    }

    fn fail(&mut self, error: QueryBuildError) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    fn identifier(&mut self, identifier: &str) -> bool {
        let valid = IDENTIFIER_PATTERN.is_match(identifier);
        if !valid {
            self.fail(QueryBuildError::InvalidIdentifier(identifier.to_string()));
        }
        valid && self.error.is_none()
    }

    fn enter(&mut self, clause: Clause) -> bool {
        let repeated = clause == self.clause && clause != Clause::Where;
        if clause < self.clause || repeated {
            self.fail(QueryBuildError::ClauseOrder {
                clause: clause.keyword(),
                after: self.clause.keyword(),
            });
            return false;
        }
        self.clause = clause;
        true
    }

    /// Writes ` WHERE column op` or ` AND column op`.
    fn condition(&mut self, column: &str, operator: &str) -> bool {
        let first = self.clause != Clause::Where;
        if !self.identifier(column) || !self.enter(Clause::Where) {
            return false;
        }
        self.builder
            .push(if first { " WHERE " } else { " AND " })
            .push(column)
            .push(operator);
        true
    }

    fn finish(self) -> Result<Statement, QueryBuildError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.builder),
        }
    }
}

fn check_identifier(identifier: &str) -> Result<(), QueryBuildError> {
    if IDENTIFIER_PATTERN.is_match(identifier) {
        Ok(())
    } else {
        Err(QueryBuildError::InvalidIdentifier(identifier.to_string()))
    }
}

fn check_table(table: &str) -> Result<(), QueryBuildError> {
    if table.is_empty() {
        return Err(QueryBuildError::EmptyTable);
    }
    check_identifier(table)
}

fn check_columns<I, S>(table: &str, columns: I) -> Result<Vec<String>, QueryBuildError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    check_table(table)?;
    let columns = columns
        .into_iter()
        .map(|column| {
            let column = column.as_ref();
            check_identifier(column).map(|_| column.to_string())
        })
        .collect::<Result<Vec<_>, _>>()?;
    if columns.is_empty() {
        return Err(QueryBuildError::NoColumns(table.to_string()));
    }
    Ok(columns)
}

/// Escapes `LIKE` wildcards so `prefix` matches literally.
fn escape_like(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len());
    for c in prefix.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// A `SELECT` over one table.
pub struct Select {
    draft: Draft,
}

impl Select {
    /// `SELECT columns FROM table`.
    pub fn columns<I, S>(table: &str, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let draft = match check_columns(table, columns) {
            Ok(columns) => Draft::new(format!("SELECT {} FROM {}", columns.join(", "), table)),
            Err(err) => Draft::failed(err),
        };
        Self { draft }
    }

    /// `SELECT COUNT(column) FROM table`.
    pub fn count(table: &str, column: &str) -> Self {
        let draft = match check_columns(table, [column]) {
            Ok(_) => Draft::new(format!("SELECT COUNT({}) FROM {}", column, table)),
            Err(err) => Draft::failed(err),
        };
        Self { draft }
    }

    /// Adds `column = ?`, joined to earlier conditions with `AND`.
    pub fn where_eq<T: BindValue>(mut self, column: &str, value: T) -> Self {
        if self.draft.condition(column, " = ") {
            self.draft.builder.push_bind(value);
        }
        self
    }

    /// Adds `column > ?`.
    pub fn where_gt<T: BindValue>(mut self, column: &str, value: T) -> Self {
        if self.draft.condition(column, " > ") {
            self.draft.builder.push_bind(value);
        }
        self
    }

    /// Adds `column < ?`.
    pub fn where_lt<T: BindValue>(mut self, column: &str, value: T) -> Self {
        if self.draft.condition(column, " < ") {
            self.draft.builder.push_bind(value);
        }
        self
    }

    pub fn where_null(mut self, column: &str) -> Self {
        self.draft.condition(column, " IS NULL");
        self
    }

    pub fn where_not_null(mut self, column: &str) -> Self {
        self.draft.condition(column, " IS NOT NULL");
        self
    }

    /// Case-insensitive (ASCII) prefix match. Wildcards in `prefix` are
    /// matched literally.
    pub fn where_starts_with(mut self, column: &str, prefix: &str) -> Self {
        if self.draft.condition(column, " LIKE ") {
            self.draft
                .builder
                .push_bind(escape_like(prefix))
                .push(" || '%' ESCAPE '\\'");
        }
        self
    }

    /// Must follow every condition.
    pub fn order_by(mut self, column: &str, order: SortOrder) -> Self {
        if self.draft.identifier(column) && self.draft.enter(Clause::OrderBy) {
            self.draft
                .builder
                .push(format!(" ORDER BY {} {}", column, order));
        }
        self
    }

    /// Renders the number inline rather than as a placeholder.
    pub fn limit(mut self, limit: u64) -> Self {
        if self.draft.enter(Clause::Limit) {
            self.draft.builder.push(format!(" LIMIT {}", limit));
        }
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        if self.draft.enter(Clause::Offset) {
            self.draft.builder.push(format!(" OFFSET {}", offset));
        }
        self
    }

    /// Returns the first error recorded while building, if any.
    pub fn finish(self) -> Result<Statement, QueryBuildError> {
        self.draft.finish()
    }
}

/// A single-row `INSERT`. Call [`Insert::value`] once per column, in order.
pub struct Insert {
    draft: Draft,
    table: String,
    expected: usize,
    values: usize,
}

impl Insert {
    /// `INSERT INTO table (columns) VALUES (...)`.
    pub fn into_table<I, S>(table: &str, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let (draft, expected) = match check_columns(table, columns) {
            Ok(columns) => (
                Draft::new(format!(
                    "INSERT INTO {} ({}) VALUES (",
                    table,
                    columns.join(", ")
                )),
                columns.len(),
            ),
            Err(err) => (Draft::failed(err), 0),
        };
        Self {
            draft,
            table: table.to_string(),
            expected,
            values: 0,
        }
    }

    /// Binds the next column's value.
    pub fn value<T: BindValue>(mut self, value: T) -> Self {
        if self.values > 0 {
            self.draft.builder.push(", ");
        }
        self.draft.builder.push_bind(value);
        self.values += 1;
        self
    }

    /// Fails unless exactly one value was given per column.
    pub fn finish(mut self) -> Result<Statement, QueryBuildError> {
        if self.values != self.expected {
            self.draft.fail(QueryBuildError::ValueCount {
                table: self.table,
                expected: self.expected,
                got: self.values,
            });
        }
        self.draft.builder.push(")");
        self.draft.finish()
    }
}

/// An `UPDATE` of one table. Assignments come before conditions.
pub struct Update {
    draft: Draft,
    table: String,
    assignments: usize,
}

impl Update {
    /// `UPDATE table SET ...`.
    pub fn table(table: &str) -> Self {
        let draft = match check_table(table) {
            Ok(()) => Draft::new(format!("UPDATE {} SET ", table)),
            Err(err) => Draft::failed(err),
        };
        Self {
            draft,
            table: table.to_string(),
            assignments: 0,
        }
    }

    fn assignment(&mut self, column: &str) -> bool {
        if self.draft.clause != Clause::Head {
            let after = self.draft.clause.keyword();
            self.draft.fail(QueryBuildError::ClauseOrder {
                clause: "SET",
                after,
            });
            return false;
        }
        if !self.draft.identifier(column) {
            return false;
        }
        if self.assignments > 0 {
            self.draft.builder.push(", ");
        }
        self.draft.builder.push(column).push(" = ");
        self.assignments += 1;
        true
    }

    /// Assigns a bound value.
    pub fn set<T: BindValue>(mut self, column: &str, value: T) -> Self {
        if self.assignment(column) {
            self.draft.builder.push_bind(value);
        }
        self
    }

    /// Assigns a trusted SQL expression, such as the current time.
    pub fn set_expr(mut self, column: &str, expr: &'static str) -> Self {
        if self.assignment(column) {
            self.draft.builder.push(expr);
        }
        self
    }

    /// Adds `column = ?`, joined to earlier conditions with `AND`.
    pub fn where_eq<T: BindValue>(mut self, column: &str, value: T) -> Self {
        if self.draft.condition(column, " = ") {
            self.draft.builder.push_bind(value);
        }
        self
    }

    pub fn where_null(mut self, column: &str) -> Self {
        self.draft.condition(column, " IS NULL");
        self
    }

    /// Fails when nothing was assigned.
    pub fn finish(mut self) -> Result<Statement, QueryBuildError> {
        if self.assignments == 0 {
            self.draft
                .fail(QueryBuildError::NoAssignments(self.table));
        }
        self.draft.finish()
    }
}
