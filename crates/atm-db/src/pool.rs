//! Connection pool creation and lifecycle.

use crate::DbError;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::OpenFlags;
use serde::Deserialize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// How the pool behaves when every connection is in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllocationPolicy {
    /// Wait up to the acquire timeout for a connection to come back.
    #[default]
    Block,
    /// Return [`DbError::PoolExhausted`] immediately.
    Fail,
}

/// Runtime tunables for SQLite connection behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbRuntimeSettings {
    /// Busy timeout for SQLite connections, in milliseconds.
    pub busy_timeout_ms: u64,

    /// Maximum number of pooled SQLite connections.
    pub pool_max_size: u32,

    /// How long to wait when opening or borrowing a connection, in milliseconds.
    pub acquire_timeout_ms: u64,

    /// Behavior when the pool is exhausted.
    pub allocation: AllocationPolicy,
}

impl DbRuntimeSettings {
    /// Checks the values r2d2 requires to be positive.
    ///
    /// # Errors
    ///
    /// Returns `DbError::InvalidPoolSettings` naming the offending field.
    pub fn validate(&self) -> Result<(), DbError> {
        if self.pool_max_size == 0 {
            return Err(DbError::InvalidPoolSettings(
                "pool_max_size must be at least 1".to_string(),
            ));
        }
        if self.acquire_timeout_ms == 0 {
            return Err(DbError::InvalidPoolSettings(
                "acquire_timeout_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for DbRuntimeSettings {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5_000,
            pool_max_size: 8,
            acquire_timeout_ms: 5_000,
            allocation: AllocationPolicy::Block,
        }
    }
}

/// A type alias for the SQLite connection pool.
pub type DbPool = Pool<SqliteConnectionManager>;

/// A connection borrowed from the pool. Dropping it hands it back.
pub type DbConnection = PooledConnection<SqliteConnectionManager>;

/// Creates a new SQLite connection pool with WAL mode and foreign keys enabled.
///
/// Blocks until all `pool_max_size` connections are open, so an unreachable
/// target fails here rather than on first use.
///
/// # Arguments
///
/// * `db_path` - Path to the SQLite database file.
///
/// # Errors
///
/// Returns `DbError::InvalidPoolSettings` for a zero pool size or acquire
/// timeout and `DbError::PoolCreation` if the connection pool cannot be
/// created.
pub fn create_pool(db_path: &str, settings: DbRuntimeSettings) -> Result<DbPool, DbError> {
    settings.validate()?;

    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;

    let manager = SqliteConnectionManager::file(db_path)
        .with_flags(flags)
        .with_init(move |conn| {
            // In-memory databases report "memory", which is acceptable.
            let journal_mode: String =
                conn.query_row("PRAGMA journal_mode = WAL;", [], |row| row.get(0))?;
            if journal_mode != "wal" && journal_mode != "memory" {
                return Err(rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_ERROR),
                    Some(format!(
                        "failed to set WAL journal mode, got: {}",
                        journal_mode
                    )),
                ));
            }
            conn.execute_batch(&format!(
                "PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = {};",
                settings.busy_timeout_ms
            ))
        });

    Pool::builder()
        .max_size(settings.pool_max_size)
        .connection_timeout(Duration::from_millis(settings.acquire_timeout_ms))
        .build(manager)
        .map_err(DbError::PoolCreation)
}

/// Point-in-time view of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Configured upper bound.
    pub max_size: u32,
    /// Physical connections currently open.
    pub connections: u32,
    /// Open connections sitting idle in the pool.
    pub idle: u32,
    /// Connections currently borrowed.
    pub in_use: u32,
}

impl PoolStatus {
    fn of(pool: &DbPool) -> Self {
        let state = pool.state();
        Self {
            max_size: pool.max_size(),
            connections: state.connections,
            idle: state.idle_connections,
            in_use: state.connections.saturating_sub(state.idle_connections),
        }
    }

    /// Every connection is open and borrowed.
    fn is_saturated(&self) -> bool {
        self.idle == 0 && self.connections >= self.max_size
    }
}

/// Decides whether a timed-out blocking borrow was exhaustion.
///
/// A connection handed back between the timeout and the second snapshot
/// would hide a saturated pool, so saturation at the start of the call
/// counts as well.
fn timed_out_on_exhaustion(before: PoolStatus, after: PoolStatus) -> bool {
    before.is_saturated() || after.is_saturated()
}

enum PoolSlot {
    Uninitialized,
    Ready(DbPool),
    Closed,
}

/// Owns the process-wide connection pool.
///
/// The pool is built at most once, either by an explicit [`initialize`]
/// at startup or lazily by the first [`acquire`]. After [`shutdown`] the
/// manager refuses to hand out connections.
///
/// [`initialize`]: PoolManager::initialize
/// [`acquire`]: PoolManager::acquire
/// [`shutdown`]: PoolManager::shutdown
pub struct PoolManager {
    db_path: String,
    settings: DbRuntimeSettings,
    slot: Mutex<PoolSlot>,
}

impl PoolManager {
    /// Creates a manager without opening any connection.
    pub fn new(db_path: impl Into<String>, settings: DbRuntimeSettings) -> Self {
        Self {
            db_path: db_path.into(),
            settings,
            slot: Mutex::new(PoolSlot::Uninitialized),
        }
    }

    /// Returns the runtime settings this manager builds its pool with.
    pub fn settings(&self) -> DbRuntimeSettings {
        self.settings
    }

    // The slot only ever holds a fully built pool or a marker, so a panic
    // while the lock was held cannot leave it half-written.
    fn slot(&self) -> MutexGuard<'_, PoolSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Builds the pool if it does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns `DbError::PoolCreation` if the pool cannot be built and
    /// `DbError::PoolClosed` if the manager was already shut down.
    pub fn initialize(&self) -> Result<(), DbError> {
        self.pool().map(|_| ())
    }

    fn pool(&self) -> Result<DbPool, DbError> {
        let mut slot = self.slot();
        match &*slot {
            PoolSlot::Ready(pool) => return Ok(pool.clone()),
            PoolSlot::Closed => return Err(DbError::PoolClosed),
            PoolSlot::Uninitialized => {}
        }

        let pool = create_pool(&self.db_path, self.settings).inspect_err(|e| {
            tracing::error!(path = %self.db_path, error = %e, "failed to create database pool");
        })?;
        tracing::info!(
            path = %self.db_path,
            max_size = self.settings.pool_max_size,
            "database connection pool created"
        );
        *slot = PoolSlot::Ready(pool.clone());
        Ok(pool)
    }

    /// Borrows one connection, creating the pool first if needed.
    ///
    /// # Errors
    ///
    /// Returns `DbError::PoolExhausted` when no connection is available under
    /// the configured [`AllocationPolicy`], `DbError::Acquire` for other
    /// borrow failures and any error [`initialize`](Self::initialize) returns.
    pub fn acquire(&self) -> Result<DbConnection, DbError> {
        let pool = self.pool()?;
        let max_size = pool.max_size();

        let result = match self.settings.allocation {
            AllocationPolicy::Fail => pool.try_get().ok_or(DbError::PoolExhausted { max_size }),
            AllocationPolicy::Block => {
                let before = PoolStatus::of(&pool);
                pool.get().map_err(|e| {
                    if timed_out_on_exhaustion(before, PoolStatus::of(&pool)) {
                        DbError::PoolExhausted { max_size }
                    } else {
                        DbError::Acquire(e)
                    }
                })
            }
        };

        result.inspect_err(|e| tracing::warn!(error = %e, "failed to acquire database connection"))
    }

    /// Returns current occupancy, or `None` if no pool is open.
    pub fn status(&self) -> Option<PoolStatus> {
        match &*self.slot() {
            PoolSlot::Ready(pool) => Some(PoolStatus::of(pool)),
            PoolSlot::Uninitialized | PoolSlot::Closed => None,
        }
    }

    /// Closes the pool, giving borrowed connections up to `grace` to return.
    ///
    /// Does nothing if the pool was never created or is already closed.
    /// Connections still borrowed when the grace period runs out are closed
    /// as soon as their holders drop them. Never fails: shutdown runs while
    /// the process exits and problems are only logged.
    pub fn shutdown(&self, grace: Duration) {
        let pool = {
            let mut slot = self.slot();
            match std::mem::replace(&mut *slot, PoolSlot::Closed) {
                PoolSlot::Ready(pool) => pool,
                PoolSlot::Closed => return,
                PoolSlot::Uninitialized => {
                    *slot = PoolSlot::Uninitialized;
                    tracing::debug!("database pool was never created, nothing to close");
                    return;
                }
            }
        };

        // A grace too large to represent never expires.
        let deadline = Instant::now().checked_add(grace);
        loop {
            let status = PoolStatus::of(&pool);
            if status.in_use == 0 {
                break;
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                tracing::warn!(
                    in_use = status.in_use,
                    grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX),
                    "grace period elapsed, forcing database pool closure"
                );
                break;
            }
            std::thread::sleep(Duration::from_millis(25));
        }

        drop(pool);
        tracing::info!(path = %self.db_path, "database connection pool closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(max: u32) -> DbRuntimeSettings {
        DbRuntimeSettings {
            busy_timeout_ms: 2_500,
            pool_max_size: max,
            acquire_timeout_ms: 200,
            allocation: AllocationPolicy::Block,
        }
    }

    #[test]
    fn create_file_pool() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("atm.db");
        let pool =
            create_pool(path.to_str().unwrap(), settings(3)).expect("pool creation should succeed");
        let conn = pool.get().expect("should get a connection");

        let mode: String = conn
            .query_row("PRAGMA journal_mode;", [], |row| row.get(0))
            .expect("should query journal_mode");
        assert_eq!(mode, "wal");

        let fk: i32 = conn
            .query_row("PRAGMA foreign_keys;", [], |row| row.get(0))
            .expect("should query foreign_keys");
        assert_eq!(fk, 1, "foreign keys should be enabled");

        let busy_timeout: i32 = conn
            .query_row("PRAGMA busy_timeout;", [], |row| row.get(0))
            .expect("should query busy_timeout");
        assert_eq!(busy_timeout, 2_500, "busy timeout should match settings");

        assert_eq!(pool.max_size(), 3, "pool max size should match settings");
    }

    #[test]
    fn unreachable_target_is_a_creation_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("missing").join("nested").join("atm.db");
        let manager = PoolManager::new(path.to_str().unwrap(), settings(1));

        let err = manager.initialize().expect_err("missing directory should fail");
        assert!(matches!(err, DbError::PoolCreation(_)), "got {err:?}");
        assert!(manager.status().is_none());
    }

    #[test]
    fn zero_sized_settings_are_creation_errors() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("atm.db");

        for bad in [
            DbRuntimeSettings {
                pool_max_size: 0,
                ..settings(1)
            },
            DbRuntimeSettings {
                acquire_timeout_ms: 0,
                ..settings(1)
            },
        ] {
            let manager = PoolManager::new(path.to_str().unwrap(), bad);
            let err = manager.initialize().expect_err("zero value should be rejected");
            assert!(matches!(err, DbError::InvalidPoolSettings(_)), "got {err:?}");
            assert!(matches!(
                manager.acquire(),
                Err(DbError::InvalidPoolSettings(_))
            ));
            assert!(manager.status().is_none());
        }
    }

    #[test]
    fn acquire_bootstraps_the_pool_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("atm.db");
        let manager = PoolManager::new(path.to_str().unwrap(), settings(2));
        assert!(manager.status().is_none());

        {
            let _conn = manager.acquire().expect("lazy acquire");
            let status = manager.status().expect("pool exists after acquire");
            assert_eq!(status.in_use, 1);
            assert_eq!(status.max_size, 2);
        }

        manager.initialize().expect("initialize after bootstrap is a no-op");
        let status = manager.status().unwrap();
        assert_eq!(status.in_use, 0);
        assert_eq!(status.connections, 2);
    }

    #[test]
    fn fail_policy_reports_exhaustion_immediately() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("atm.db");
        let manager = PoolManager::new(
            path.to_str().unwrap(),
            DbRuntimeSettings {
                allocation: AllocationPolicy::Fail,
                ..settings(1)
            },
        );

        let held = manager.acquire().expect("first borrow");
        let err = manager.acquire().expect_err("second borrow should fail");
        assert!(matches!(err, DbError::PoolExhausted { max_size: 1 }), "got {err:?}");

        drop(held);
        manager.acquire().expect("borrow after release");
    }

    #[test]
    fn block_policy_times_out_as_exhaustion() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("atm.db");
        let manager = PoolManager::new(path.to_str().unwrap(), settings(1));

        let _held = manager.acquire().expect("first borrow");
        let err = manager.acquire().expect_err("second borrow should time out");
        assert!(matches!(err, DbError::PoolExhausted { .. }), "got {err:?}");
    }

    #[test]
    fn exhaustion_survives_a_late_release() {
        let status = |connections, idle| PoolStatus {
            max_size: 2,
            connections,
            idle,
            in_use: connections - idle,
        };

        // Saturated when the borrow started, a connection came back after the timeout.
        assert!(timed_out_on_exhaustion(status(2, 0), status(2, 1)));
        // Saturated only when the timeout fired.
        assert!(timed_out_on_exhaustion(status(2, 1), status(2, 0)));
        // Never saturated: the borrow failed for another reason.
        assert!(!timed_out_on_exhaustion(status(1, 1), status(1, 1)));
    }

    #[test]
    fn shutdown_logs_an_unbounded_grace() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("atm.db");
        let manager = PoolManager::new(path.to_str().unwrap(), settings(1));

        let held = manager.acquire().expect("borrow");
        let releaser = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            drop(held);
        });

        // Overflows both an Instant deadline and a u64 millisecond count;
        // shutdown still returns once the connection is back.
        manager.shutdown(Duration::MAX);
        assert!(manager.status().is_none());
        releaser.join().expect("releaser thread");
    }

    #[test]
    fn shutdown_is_a_noop_before_initialize() {
        let manager = PoolManager::new("never-opened.db", settings(1));
        manager.shutdown(Duration::from_millis(10));
        assert!(manager.status().is_none());
    }

    #[test]
    fn shutdown_closes_and_refuses_further_borrows() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("atm.db");
        let manager = PoolManager::new(path.to_str().unwrap(), settings(2));
        manager.initialize().expect("initialize");

        manager.shutdown(Duration::from_millis(100));
        assert!(manager.status().is_none());
        assert!(matches!(manager.acquire(), Err(DbError::PoolClosed)));
        assert!(matches!(manager.initialize(), Err(DbError::PoolClosed)));

        // A second shutdown does nothing.
        manager.shutdown(Duration::from_millis(10));
    }

    #[test]
    fn shutdown_waits_for_in_flight_connection() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("atm.db");
        let manager = PoolManager::new(path.to_str().unwrap(), settings(1));

        let held = manager.acquire().expect("borrow");
        let releaser = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            drop(held);
        });

        let started = Instant::now();
        manager.shutdown(Duration::from_secs(5));
        assert!(
            started.elapsed() < Duration::from_secs(5),
            "shutdown should return once the connection is back"
        );
        releaser.join().expect("releaser thread");
    }
}
