//! Data-access core for the ATM card service.
//!
//! Provides a lazily initialized SQLite connection pool (via `r2d2`), the
//! single execute primitive every business crate goes through, and the
//! embedded schema migrations.
//!
//! # Design decisions
//!
//! - **One pool per process**: [`PoolManager`] owns the pool slot and is
//!   injected through `Arc`. Nothing else creates or destroys physical
//!   connections.
//! - **One execute path**: [`Gateway::execute`] borrows a connection, runs a
//!   single statement inside a transaction, commits only when asked to and
//!   hands the connection back on every exit path. Business code never holds
//!   a connection across two calls.
//! - **Typed binds**: [`Binds`] is checked against the prepared statement's
//!   placeholders before anything runs.
//! - **Foreign keys without cascade rules**: the schema enforces references
//!   but never deletes dependents on its own; callers delete in order.

mod error;
mod gateway;
mod migrations;
mod pool;
mod statement;

pub use error::DbError;
pub use gateway::Gateway;
pub use migrations::{run_migrations, MigrationError};
pub use pool::{
    create_pool, AllocationPolicy, DbConnection, DbPool, DbRuntimeSettings, PoolManager,
    PoolStatus,
};
pub use rusqlite::types::Value;
pub use statement::{text, Binds, ExecuteOptions, Row, StatementRequest, StatementResult};
