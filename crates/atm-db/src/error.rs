//! Error taxonomy for the data-access core.

use thiserror::Error;

/// Errors produced by the pool manager and the execute gateway.
#[derive(Debug, Error)]
pub enum DbError {
    /// The pool could not be built (bad path, unreachable target).
    #[error("failed to create database connection pool: {0}")]
    PoolCreation(#[source] r2d2::Error),

    /// The pool settings cannot describe a working pool.
    #[error("invalid database pool settings: {0}")]
    InvalidPoolSettings(String),

    /// Every connection was in use and none came back in time.
    #[error("database pool exhausted: all {max_size} connections are in use")]
    PoolExhausted {
        /// Configured pool bound.
        max_size: u32,
    },

    /// Borrowing a connection failed for a reason other than exhaustion.
    #[error("failed to acquire database connection: {0}")]
    Acquire(#[source] r2d2::Error),

    /// The pool has been shut down and will not be created again.
    #[error("database pool is shut down")]
    PoolClosed,

    /// Preparing, binding, running or committing a statement failed.
    #[error("statement failed: {0}")]
    Statement(#[source] rusqlite::Error),

    /// A returned row could not be converted into the caller's type.
    #[error("failed to decode row: {0}")]
    RowDecode(#[source] rusqlite::Error),
}

impl DbError {
    /// Returns `true` if this is a statement failure caused by a constraint
    /// (foreign key, unique, not null) violation.
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            DbError::Statement(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation
        )
    }
}
