//! Store: shared SQLite connection
//!
//! A single `rusqlite::Connection` behind an `Arc<Mutex<_>>`. Clones share the
//! connection, so any number of handles and threads may issue statements; each
//! statement runs to completion before the next one takes the lock. There is
//! no application-level row locking: tenant isolation comes from predicate
//! scoping on every statement.

use parking_lot::{Mutex, MutexGuard};
use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;

use crate::config::DatabaseSettings;
use crate::error::{PersistenceError, Result, StoreResultExt};

/// Shared handle over the relational store
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Opens (or creates) the database described by `settings`.
    ///
    /// ```no_run
    /// use warden_core::config::DatabaseSettings;
    /// use warden_core::Store;
    /// let store = Store::open(&DatabaseSettings::default()).unwrap();
    /// ```
    pub fn open(settings: &DatabaseSettings) -> Result<Self> {
        let path = settings.path.as_path();
        if path != Path::new(":memory:") {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path).store_op("open database")?;

        if settings.wal && path != Path::new(":memory:") {
            conn.pragma_update(None, "journal_mode", "WAL")
                .store_op("set journal_mode")?;
        }
        conn.execute_batch(&format!(
            "PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = {};",
            settings.busy_timeout_ms
        ))
        .store_op("configure pragmas")?;

        tracing::debug!("Opened database {}", path.display());
        Ok(Self::from_connection(conn))
    }

    /// In-memory store, used by tests and throwaway tooling
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().store_op("open in-memory database")?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .store_op("configure pragmas")?;
        Ok(Self::from_connection(conn))
    }

    /// Wrap an already opened connection
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Borrow the connection for the duration of one unit of work
    pub fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }

    /// Round-trip a trivial query
    pub fn ping(&self) -> Result<()> {
        self.lock()
            .query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .store_op("ping")?;
        Ok(())
    }

    /// Flush and release the connection once every clone is gone.
    ///
    /// Returns an error when other handles still hold the connection.
    pub fn close(self) -> Result<()> {
        match Arc::try_unwrap(self.conn) {
            Ok(mutex) => mutex
                .into_inner()
                .close()
                .map_err(|(_, e)| PersistenceError::store("close database", e)),
            Err(conn) => Err(PersistenceError::StoreInUse {
                handles: Arc::strong_count(&conn) - 1,
            }),
        }
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").finish_non_exhaustive()
    }
}
