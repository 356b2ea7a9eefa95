//! Embedded SQL migration runner.
//!
//! Migrations are SQL files embedded at compile time. They run sequentially
//! on startup, tracked by the `_atm_migrations` table, and each one runs
//! exactly once.

use rusqlite::Connection;
use thiserror::Error;

struct Migration {
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. New migrations are appended here.
const MIGRATIONS: &[Migration] = &[
    Migration {
        name: "000_init",
        sql: include_str!("migrations/000_init.sql"),
    },
    Migration {
        name: "001_customers",
        sql: include_str!("migrations/001_customers.sql"),
    },
    Migration {
        name: "002_employees",
        sql: include_str!("migrations/002_employees.sql"),
    },
    Migration {
        name: "003_cards",
        sql: include_str!("migrations/003_cards.sql"),
    },
    Migration {
        name: "004_login_accounts",
        sql: include_str!("migrations/004_login_accounts.sql"),
    },
];

/// Errors that can occur during migration execution.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// A SQL statement within a migration failed.
    #[error("migration '{name}' failed: {source}")]
    ExecutionFailed {
        /// The name of the migration that failed.
        name: String,
        /// The underlying SQLite error.
        source: rusqlite::Error,
    },

    /// Failed to query migration state.
    #[error("failed to check migration state: {0}")]
    StateQuery(rusqlite::Error),
}

/// Runs all pending migrations against the given connection.
///
/// Returns the number of migrations applied by this call.
///
/// # Errors
///
/// Returns `MigrationError` if any migration fails to execute or if the
/// migration tracking table cannot be queried.
pub fn run_migrations(conn: &Connection) -> Result<usize, MigrationError> {
    run_migrations_from_list(conn, MIGRATIONS)
}

fn run_migrations_from_list(
    conn: &Connection,
    migrations: &[Migration],
) -> Result<usize, MigrationError> {
    let failed = |name: &str| {
        let name = name.to_string();
        move |source| MigrationError::ExecutionFailed { name, source }
    };

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _atm_migrations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )
    .map_err(failed("_atm_migrations_bootstrap"))?;

    let mut applied = 0;

    for migration in migrations {
        let already_applied: bool = conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM _atm_migrations WHERE name = ?1",
                [migration.name],
                |row| row.get(0),
            )
            .map_err(MigrationError::StateQuery)?;

        if already_applied {
            tracing::debug!(
                migration = migration.name,
                "migration already applied, skipping"
            );
            continue;
        }

        tracing::info!(migration = migration.name, "applying migration");

        let tx = conn
            .unchecked_transaction()
            .map_err(failed(migration.name))?;
        tx.execute_batch(migration.sql)
            .map_err(failed(migration.name))?;
        tx.execute(
            "INSERT INTO _atm_migrations (name) VALUES (?1)",
            [migration.name],
        )
        .map_err(failed(migration.name))?;
        tx.commit().map_err(failed(migration.name))?;

        applied += 1;
    }

    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_exists(conn: &Connection, name: &str) -> bool {
        conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
            [name],
            |row| row.get(0),
        )
        .expect("should query sqlite_master")
    }

    #[test]
    fn run_migrations_on_fresh_db() {
        let conn = Connection::open_in_memory().expect("should open in-memory db");
        let applied = run_migrations(&conn).expect("migrations should succeed");
        assert_eq!(applied, MIGRATIONS.len());

        for table in [
            "customers",
            "bank_accounts",
            "employees",
            "cards",
            "card_processing",
            "transactions",
            "login_accounts",
        ] {
            assert!(table_exists(&conn, table), "{table} should exist");
        }
    }

    #[test]
    fn run_migrations_idempotent() {
        let conn = Connection::open_in_memory().expect("should open in-memory db");

        let first = run_migrations(&conn).expect("first run should succeed");
        assert_eq!(first, MIGRATIONS.len());

        let second = run_migrations(&conn).expect("second run should succeed");
        assert_eq!(second, 0, "no new migrations to apply");
    }

    #[test]
    fn card_references_do_not_cascade() {
        let conn = Connection::open_in_memory().expect("should open in-memory db");
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        run_migrations(&conn).expect("migrations should succeed");

        conn.execute_batch(
            "INSERT INTO customers (customer_id, full_name) VALUES ('KH001', 'Tran An');
             INSERT INTO bank_accounts (account_id, customer_id) VALUES ('TK001', 'KH001');
             INSERT INTO cards (card_id, account_id, pin, issued_on, expires_on, status, card_number, cvv)
                 VALUES ('TH001', 'TK001', '1234', '2023-01-01', '2028-01-01', 'active', '9704000000000001', '123');
             INSERT INTO transactions (transaction_id, card_id, amount, kind) VALUES ('GD001', 'TH001', 500, 'withdrawal');",
        )
        .expect("seed");

        let err = conn
            .execute("DELETE FROM cards WHERE card_id = 'TH001'", [])
            .expect_err("dependent transaction should block the delete");
        assert_eq!(
            err.sqlite_error_code(),
            Some(rusqlite::ErrorCode::ConstraintViolation)
        );
    }

    #[test]
    fn migration_side_effects_rollback_when_tracking_insert_fails() {
        let conn = Connection::open_in_memory().expect("should open in-memory db");
        let migrations = [Migration {
            name: "001_tracking_insert_conflict",
            sql: "
                CREATE TABLE rollback_check (id INTEGER PRIMARY KEY);
                INSERT INTO _atm_migrations (name) VALUES ('001_tracking_insert_conflict');
            ",
        }];

        let err = run_migrations_from_list(&conn, &migrations)
            .expect_err("tracking insert conflict should fail migration");

        match err {
            MigrationError::ExecutionFailed { name, .. } => {
                assert_eq!(name, "001_tracking_insert_conflict")
            }
            other => panic!("unexpected error type: {other:?}"),
        }

        assert!(
            !table_exists(&conn, "rollback_check"),
            "schema side effects should be rolled back when tracking insert fails"
        );
    }
}
