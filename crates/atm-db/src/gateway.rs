//! The single execute path to the database.

use crate::{Binds, DbError, PoolManager, Row, StatementRequest, StatementResult};
use rusqlite::types::Value;
use rusqlite::{Connection, Statement, Transaction};
use std::borrow::Cow;
use std::sync::Arc;

/// Runs statements on pooled connections.
///
/// Every call borrows its own connection and gives it back before
/// returning, whether the statement succeeded or not. Callers never see a
/// connection and cannot hold one across calls.
#[derive(Clone)]
pub struct Gateway {
    pool: Arc<PoolManager>,
}

impl Gateway {
    pub fn new(pool: Arc<PoolManager>) -> Self {
        Self { pool }
    }

    /// The pool manager this gateway borrows from.
    pub fn pool(&self) -> &Arc<PoolManager> {
        &self.pool
    }

    /// Executes one statement.
    ///
    /// The statement runs inside a transaction that is committed when
    /// `auto_commit` is set and rolled back otherwise.
    ///
    /// # Errors
    ///
    /// Pool errors from [`PoolManager::acquire`]; `DbError::Statement` for
    /// prepare, bind, execution and commit failures.
    pub fn execute(&self, request: &StatementRequest) -> Result<StatementResult, DbError> {
        let mut conn = self.pool.acquire()?;
        let auto_commit = request.options().auto_commit;
        tracing::debug!(
            sql = request.sql(),
            binds = request.binds().len(),
            auto_commit,
            "executing statement"
        );

        let result = run_in_transaction(&mut conn, request);
        drop(conn);

        if let Err(e) = &result {
            tracing::debug!(error = %e, sql = request.sql(), "statement failed");
        }
        result
    }
}

fn run_in_transaction(
    conn: &mut Connection,
    request: &StatementRequest,
) -> Result<StatementResult, DbError> {
    let tx = conn.transaction().map_err(DbError::Statement)?;

    match run_statement(&tx, request) {
        Ok(result) if request.options().auto_commit => {
            tx.commit().map_err(DbError::Statement)?;
            Ok(result)
        }
        Ok(result) => {
            roll_back(tx);
            Ok(result)
        }
        Err(e) => {
            roll_back(tx);
            Err(e)
        }
    }
}

// A failed rollback is logged only; the caller must see the statement's
// own outcome.
fn roll_back(tx: Transaction<'_>) {
    if let Err(e) = tx.rollback() {
        tracing::warn!(error = %e, "rollback before releasing connection failed");
    }
}

fn run_statement(conn: &Connection, request: &StatementRequest) -> Result<StatementResult, DbError> {
    let mut stmt = conn.prepare(request.sql()).map_err(DbError::Statement)?;
    bind(&mut stmt, request.binds()).map_err(DbError::Statement)?;

    if stmt.column_count() == 0 {
        let affected = stmt.raw_execute().map_err(DbError::Statement)?;
        return Ok(StatementResult::with_rows_affected(affected));
    }

    let columns: Arc<[String]> = stmt.column_names().into_iter().map(String::from).collect();
    let width = columns.len();
    let mut rows = stmt.raw_query();
    let mut out = Vec::new();
    while let Some(row) = rows.next().map_err(DbError::Statement)? {
        let values = (0..width)
            .map(|idx| row.get::<_, Value>(idx))
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(DbError::Statement)?;
        out.push(Row::new(Arc::clone(&columns), values));
    }
    Ok(StatementResult::with_rows(out))
}

/// Binds every value, requiring a one-to-one match with the placeholders.
fn bind(stmt: &mut Statement<'_>, binds: &Binds) -> rusqlite::Result<()> {
    let expected = stmt.parameter_count();
    if binds.len() != expected {
        return Err(rusqlite::Error::InvalidParameterCount(binds.len(), expected));
    }

    match binds {
        Binds::None => {}
        Binds::Named(pairs) => {
            let mut bound = vec![false; expected];
            for (name, value) in pairs {
                let placeholder = if name.starts_with([':', '@', '$']) {
                    Cow::Borrowed(name.as_str())
                } else {
                    Cow::Owned(format!(":{name}"))
                };
                let idx = stmt
                    .parameter_index(&placeholder)?
                    .ok_or_else(|| rusqlite::Error::InvalidParameterName(placeholder.to_string()))?;
                if std::mem::replace(&mut bound[idx - 1], true) {
                    return Err(rusqlite::Error::InvalidParameterName(placeholder.into_owned()));
                }
                stmt.raw_bind_parameter(idx, value)?;
            }
        }
        Binds::Positional(values) => {
            for (i, value) in values.iter().enumerate() {
                stmt.raw_bind_parameter(i + 1, value)?;
            }
        }
    }
    Ok(())
}
