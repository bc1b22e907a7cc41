//! Database connection management.
//!
//! Wraps a single rusqlite Connection in a Mutex for thread-safe access.
//! Configures WAL mode and recommended PRAGMAs on initialization. The
//! connection slot is emptied on close so the handle is released once.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use rusqlite::{Connection, ErrorCode, Transaction};
use tracing::{debug, info};

use clarify_core::config::StorageConfig;
use clarify_core::error::{Result, StoreError};

use crate::schema;

/// Thread-safe SQLite database wrapper owning exactly one connection.
pub struct Database {
    path: PathBuf,
    conn: Mutex<Option<Connection>>,
}

impl Database {
    /// Open (or create) a database at the given path.
    ///
    /// Configures WAL mode, the configured synchronous level, foreign keys,
    /// busy timeout and cache size, then applies the schema.
    pub fn open(path: &Path, config: &StorageConfig) -> Result<Self> {
        // Ensure parent directory exists.
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)
            .map_err(|e| StoreError::Storage(format!("Failed to open database: {}", e)))?;

        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))
            .map_err(|e| storage_err("Failed to set busy timeout", e))?;

        conn.execute_batch(&format!(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = {};
             PRAGMA foreign_keys = ON;
             PRAGMA cache_size = -{};",
            config.synchronous.to_uppercase(),
            config.cache_size_kib
        ))
        .map_err(|e| storage_err("Failed to set pragmas", e))?;

        let version = schema::initialize(&conn)?;
        info!(path = %path.display(), schema_version = version, "Database opened");

        Ok(Self {
            path: path.to_path_buf(),
            conn: Mutex::new(Some(conn)),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StoreError::Storage(format!("Failed to open in-memory db: {}", e)))?;

        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|e| storage_err("Failed to set pragmas", e))?;

        schema::initialize(&conn)?;

        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn: Mutex::new(Some(conn)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Execute a closure with a reference to the underlying connection.
    ///
    /// Fails with `StorageClosed` once [`Database::close`] has run. The mutex
    /// is held for the duration of the closure.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let guard = self
            .conn
            .lock()
            .map_err(|e| StoreError::Storage(format!("Database lock poisoned: {}", e)))?;
        match guard.as_ref() {
            Some(conn) => f(conn),
            None => Err(StoreError::StorageClosed),
        }
    }

    /// Run a closure inside one transaction.
    ///
    /// Commits when the closure returns `Ok`; any error rolls the whole
    /// transaction back and is propagated unchanged.
    pub fn with_tx<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<T>,
    {
        let mut guard = self
            .conn
            .lock()
            .map_err(|e| StoreError::Storage(format!("Database lock poisoned: {}", e)))?;
        let conn = guard.as_mut().ok_or(StoreError::StorageClosed)?;

        let mut tx = conn
            .transaction()
            .map_err(|e| storage_err("Failed to begin transaction", e))?;
        let value = f(&mut tx)?;
        tx.commit()
            .map_err(|e| storage_err("Failed to commit transaction", e))?;
        Ok(value)
    }

    pub fn is_closed(&self) -> bool {
        self.conn.lock().map(|g| g.is_none()).unwrap_or(true)
    }

    /// Release the connection. Safe to call more than once.
    pub fn close(&self) -> Result<()> {
        let mut guard = self
            .conn
            .lock()
            .map_err(|e| StoreError::Storage(format!("Database lock poisoned: {}", e)))?;
        match guard.take() {
            Some(conn) => {
                conn.close()
                    .map_err(|(_, e)| storage_err("Failed to close database", e))?;
                info!(path = %self.path.display(), "Database closed");
            }
            None => debug!(path = %self.path.display(), "Database already closed"),
        }
        Ok(())
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").field("path", &self.path).finish()
    }
}

/// Classify a rusqlite error: constraint failures keep their class, anything
/// else becomes an opaque storage error.
pub(crate) fn storage_err(context: &str, e: rusqlite::Error) -> StoreError {
    if e.sqlite_error_code() == Some(ErrorCode::ConstraintViolation) {
        StoreError::constraint(format!("{}: {}", context, e))
    } else {
        StoreError::Storage(format!("{}: {}", context, e))
    }
}
