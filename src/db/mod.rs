//! Database layer: one embedded SQLite store per project.

pub mod branches;
pub mod claims;
pub mod convert;
pub mod events;
pub mod initiatives;
pub mod reviews;
pub mod tasks;

use crate::error::{Result, StoreError};
use rusqlite::{Connection, Transaction};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;

mod embedded {
    use refinery::embed_migrations;
    embed_migrations!("migrations");
}

/// Default SQLite busy timeout, overridable via [`Database::open_with`].
pub const DEFAULT_BUSY_TIMEOUT_MS: u32 = 5000;

/// Handle to one project's database.
///
/// Cloning shares the underlying connection. Every operation serializes on
/// the internal mutex; this is the process-local write lock of the design
/// (SQLite's WAL mode still serves readers in other processes). After
/// [`close`](Database::close), every clone of the handle reports a storage
/// failure.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Option<Connection>>>,
}

impl Database {
    /// Open or create the database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with(path, DEFAULT_BUSY_TIMEOUT_MS)
    }

    /// Open or create the database with an explicit busy timeout.
    pub fn open_with<P: AsRef<Path>>(path: P, busy_timeout_ms: u32) -> Result<Self> {
        let db = Self::open_raw(path, busy_timeout_ms)?;
        db.run_migrations()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let db = Self::open_raw_in_memory()?;
        db.run_migrations()?;
        Ok(db)
    }

    /// Open without running the per-project migrations.
    /// The global store applies its own schema on top of this.
    pub(crate) fn open_raw<P: AsRef<Path>>(path: P, busy_timeout_ms: u32) -> Result<Self> {
        debug!(path = %path.as_ref().display(), "opening store");
        let conn = Connection::open(path)?;

        // Enable WAL mode for concurrent access
        conn.execute_batch(&format!(
            "PRAGMA journal_mode=WAL;
             PRAGMA foreign_keys=ON;
             PRAGMA busy_timeout={busy_timeout_ms};"
        ))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
        })
    }

    pub(crate) fn open_raw_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;

        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
        })
    }

    /// Run database migrations.
    fn run_migrations(&self) -> Result<()> {
        self.with_conn_mut(|conn| {
            embedded::migrations::runner().run(conn)?;
            Ok(())
        })
    }

    /// Execute a function with exclusive access to the connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let guard = self.conn.lock().unwrap();
        let conn = guard
            .as_ref()
            .ok_or_else(|| StoreError::storage("store handle is closed"))?;
        f(conn)
    }

    /// Execute a function with mutable access to the connection (for transactions).
    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T>,
    {
        let mut guard = self.conn.lock().unwrap();
        let conn = guard
            .as_mut()
            .ok_or_else(|| StoreError::storage("store handle is closed"))?;
        f(conn)
    }

    /// Begin a transaction, run `f`, and commit on success.
    ///
    /// Rolls back on error (the first error from `f` propagates verbatim)
    /// and on panic (drop rollback). Callers never observe partial writes.
    pub fn run_in_transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let out = f(&tx)?;
            tx.commit()?;
            Ok(out)
        })
    }

    /// [`run_in_transaction`](Self::run_in_transaction) with cancellation.
    ///
    /// The token is checked before the transaction begins and again before
    /// commit; a fired token rolls back and returns [`StoreError::Canceled`].
    pub fn run_in_transaction_ctx<F, T>(&self, ctx: &CancellationToken, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        ensure_active(Some(ctx))?;
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let out = f(&tx)?;
            ensure_active(Some(ctx))?;
            tx.commit()?;
            Ok(out)
        })
    }

    /// Close the underlying connection.
    /// Afterwards every clone of this handle fails with a storage error.
    pub fn close(&self) -> Result<()> {
        let mut guard = self.conn.lock().unwrap();
        if let Some(conn) = guard.take() {
            debug!("closing store handle");
            conn.close().map_err(|(_, err)| StoreError::from(err))?;
        }
        Ok(())
    }
}

/// Fail with [`StoreError::Canceled`] once the token has fired.
/// Multi-statement operations call this at each statement-group boundary.
pub(crate) fn ensure_active(ctx: Option<&CancellationToken>) -> Result<()> {
    if let Some(ctx) = ctx
        && ctx.is_cancelled()
    {
        return Err(StoreError::Canceled);
    }
    Ok(())
}

/// Get the current timestamp in milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
