//! Statement requests and results passed through the gateway.

use crate::DbError;
use rusqlite::types::{FromSql, Value, ValueRef};
use std::borrow::Cow;
use std::sync::Arc;

/// Bind parameters for one statement.
///
/// Named binds may be written with or without the leading `:`; the gateway
/// checks them against the statement's placeholders before running it.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Binds {
    /// The statement has no placeholders.
    #[default]
    None,
    /// `:name` placeholders.
    Named(Vec<(String, Value)>),
    /// `?` / `?N` placeholders, in order.
    Positional(Vec<Value>),
}

impl Binds {
    /// Builds named binds from `(name, value)` pairs.
    pub fn named<I, K>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Self::Named(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Builds positional binds.
    pub fn positional<I>(values: I) -> Self
    where
        I: IntoIterator<Item = Value>,
    {
        Self::Positional(values.into_iter().collect())
    }

    /// Number of supplied values.
    pub fn len(&self) -> usize {
        match self {
            Self::None => 0,
            Self::Named(pairs) => pairs.len(),
            Self::Positional(values) => values.len(),
        }
    }

    /// Returns `true` if no values are supplied.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Shorthand for a text bind value.
pub fn text(s: &str) -> Value {
    Value::Text(s.to_owned())
}

/// Per-call execution options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecuteOptions {
    /// Commit the statement's transaction before returning. When `false`
    /// any changes are rolled back as the connection is released.
    pub auto_commit: bool,
}

/// A single SQL statement with its binds and options.
#[derive(Debug, Clone)]
pub struct StatementRequest {
    sql: Cow<'static, str>,
    binds: Binds,
    options: ExecuteOptions,
}

impl StatementRequest {
    pub fn new(sql: impl Into<Cow<'static, str>>, binds: Binds, options: ExecuteOptions) -> Self {
        Self {
            sql: sql.into(),
            binds,
            options,
        }
    }

    /// A read: nothing is committed.
    pub fn query(sql: impl Into<Cow<'static, str>>, binds: Binds) -> Self {
        Self::new(sql, binds, ExecuteOptions::default())
    }

    /// A write committed as soon as it succeeds.
    pub fn mutation(sql: impl Into<Cow<'static, str>>, binds: Binds) -> Self {
        Self::new(sql, binds, ExecuteOptions { auto_commit: true })
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn binds(&self) -> &Binds {
        &self.binds
    }

    pub fn options(&self) -> ExecuteOptions {
        self.options
    }
}

/// One result row: column names shared across the result set, values owned.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    pub(crate) fn new(columns: Arc<[String]>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    fn index_of(&self, column: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|name| name.eq_ignore_ascii_case(column))
    }

    /// Raw value of a column, matched case-insensitively.
    pub fn value(&self, column: &str) -> Option<&Value> {
        self.index_of(column).map(|idx| &self.values[idx])
    }

    /// Converts a column into `T`.
    ///
    /// # Errors
    ///
    /// `InvalidColumnName` if the column is absent, `FromSqlConversionFailure`
    /// if the stored value does not convert.
    pub fn get<T: FromSql>(&self, column: &str) -> rusqlite::Result<T> {
        let idx = self
            .index_of(column)
            .ok_or_else(|| rusqlite::Error::InvalidColumnName(column.to_string()))?;
        let value = &self.values[idx];
        T::column_result(ValueRef::from(value)).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, value.data_type(), Box::new(e))
        })
    }
}

/// What a statement produced. Reads fill `rows`; writes report `rows_affected`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatementResult {
    rows: Vec<Row>,
    rows_affected: usize,
}

impl StatementResult {
    pub(crate) fn with_rows(rows: Vec<Row>) -> Self {
        Self {
            rows,
            rows_affected: 0,
        }
    }

    pub(crate) fn with_rows_affected(rows_affected: usize) -> Self {
        Self {
            rows: Vec::new(),
            rows_affected,
        }
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn rows_affected(&self) -> usize {
        self.rows_affected
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    /// Decodes every row with `f`, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// Returns `DbError::RowDecode` wrapping the first conversion error.
    pub fn map_rows<T, F>(&self, f: F) -> Result<Vec<T>, DbError>
    where
        F: FnMut(&Row) -> rusqlite::Result<T>,
    {
        self.rows
            .iter()
            .map(f)
            .collect::<rusqlite::Result<Vec<T>>>()
            .map_err(DbError::RowDecode)
    }
}
