//! The process-wide store connection
//!
//! One `StoreHandle` owns the only SQLite connection of the process. It is
//! created closed and opened on first use. The swap controller takes it over
//! with [`StoreHandle::quiesce`]: the returned guard keeps the connection slot
//! locked, so nobody can lazily reopen the store while files are replaced,
//! and reopens it when resumed or dropped.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rusqlite::Connection;

use super::errors::{StoreError, StoreResult};

const BUSY_TIMEOUT: Duration = Duration::from_millis(250);

pub struct StoreHandle {
    path: PathBuf,
    conn: Mutex<Option<Connection>>,
}

impl StoreHandle {
    /// Create a closed handle for the store at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            conn: Mutex::new(None),
        }
    }

    /// Create a handle and open it immediately.
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let handle = Self::new(path);
        handle.with_conn(|_| Ok(()))?;
        Ok(handle)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.slot().is_some()
    }

    /// Run `f` against the connection, opening it first if needed.
    pub fn with_conn<T, F>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Connection) -> rusqlite::Result<T>,
    {
        let mut slot = self.slot();
        let conn = match slot.take() {
            Some(conn) => conn,
            None => {
                let conn = open_connection(&self.path)?;
                tracing::debug!(path = %self.path.display(), "store opened");
                conn
            }
        };
        Ok(f(slot.insert(conn))?)
    }

    /// Trivial read proving the handle is open and responsive.
    pub fn ping(&self) -> StoreResult<()> {
        self.with_conn(|conn| conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0)))?;
        Ok(())
    }

    /// Close the connection and hold the slot until the guard is resumed or
    /// dropped.
    pub fn quiesce(&self) -> QuiescedStore<'_> {
        let mut slot = self.slot();
        if let Some(conn) = slot.take() {
            close_connection(conn);
            tracing::info!(path = %self.path.display(), "store closed for swap");
        }
        QuiescedStore {
            path: &self.path,
            slot: Some(slot),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<Connection>> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreHandle")
            .field("path", &self.path)
            .field("open", &self.is_open())
            .finish()
    }
}

/// Exclusive ownership of a closed store.
///
/// Dropping the guard without calling [`QuiescedStore::resume`] still reopens
/// the store; the error, if any, is only logged.
pub struct QuiescedStore<'a> {
    path: &'a Path,
    slot: Option<MutexGuard<'a, Option<Connection>>>,
}

impl QuiescedStore<'_> {
    /// Reopen the store and release the slot.
    pub fn resume(mut self) -> StoreResult<()> {
        self.reopen()
    }

    /// Reopen the store. On failure the slot stays held, so the caller can
    /// put a usable file back in place and try again.
    pub fn reopen(&mut self) -> StoreResult<()> {
        let Some(slot) = self.slot.as_mut() else {
            return Ok(());
        };
        **slot = Some(open_connection(self.path)?);
        self.slot = None;
        tracing::info!(path = %self.path.display(), "store reopened");
        Ok(())
    }
}

impl Drop for QuiescedStore<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.reopen() {
            tracing::error!(path = %self.path.display(), error = %e, "failed to reopen store");
        }
    }
}

fn open_connection(path: &Path) -> StoreResult<Connection> {
    let open_err = |source| StoreError::Open {
        path: path.display().to_string(),
        source,
    };
    let conn = Connection::open(path).map_err(open_err)?;
    conn.busy_timeout(BUSY_TIMEOUT).map_err(open_err)?;
    conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;")
        .map_err(open_err)?;
    Ok(conn)
}

/// Fold the WAL back before closing; the close itself removes the log when
/// this is the last connection.
fn close_connection(conn: Connection) {
    if let Err(e) = conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);") {
        tracing::warn!(error = %e, "checkpoint before close failed");
    }
    if let Err((_conn, e)) = conn.close() {
        tracing::warn!(error = %e, "store close reported an error");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_opens_lazily() {
        let temp = TempDir::new().unwrap();
        let handle = StoreHandle::new(temp.path().join("test.db"));
        assert!(!handle.is_open());

        handle.ping().unwrap();
        assert!(handle.is_open());
        assert!(temp.path().join("test.db").exists());
    }

    #[test]
    fn test_wal_mode_enabled() {
        let temp = TempDir::new().unwrap();
        let handle = StoreHandle::open(temp.path().join("test.db")).unwrap();
        let mode: String = handle
            .with_conn(|c| c.query_row("PRAGMA journal_mode", [], |r| r.get(0)))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }

    #[test]
    fn test_quiesce_then_resume() {
        let temp = TempDir::new().unwrap();
        let handle = StoreHandle::open(temp.path().join("test.db")).unwrap();

        let quiesced = handle.quiesce();
        assert!(!handle_is_open_unlocked(&quiesced));
        quiesced.resume().unwrap();

        assert!(handle.is_open());
        handle.ping().unwrap();
    }

    fn handle_is_open_unlocked(quiesced: &QuiescedStore<'_>) -> bool {
        quiesced.slot.as_ref().map(|s| s.is_some()).unwrap_or(false)
    }

    #[test]
    fn test_dropped_guard_reopens() {
        let temp = TempDir::new().unwrap();
        let handle = StoreHandle::open(temp.path().join("test.db")).unwrap();

        {
            let _quiesced = handle.quiesce();
        }

        assert!(handle.is_open());
    }

    #[test]
    fn test_failed_reopen_keeps_slot_for_retry() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("test.db");
        let handle = StoreHandle::open(&path).unwrap();
        handle
            .with_conn(|c| c.execute_batch("CREATE TABLE t (x INTEGER);"))
            .unwrap();

        let mut quiesced = handle.quiesce();
        let good = std::fs::read(&path).unwrap();
        std::fs::write(&path, b"garbage that is not a database file").unwrap();

        assert!(quiesced.reopen().is_err());
        assert!(quiesced.slot.is_some());

        std::fs::write(&path, good).unwrap();
        quiesced.reopen().unwrap();
        drop(quiesced);
        handle
            .with_conn(|c| c.query_row("SELECT COUNT(*) FROM t", [], |r| r.get::<_, i64>(0)))
            .unwrap();
    }

    #[test]
    fn test_close_removes_wal_siblings() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("test.db");
        let handle = StoreHandle::open(&path).unwrap();
        handle
            .with_conn(|c| c.execute_batch("CREATE TABLE t (x INTEGER); INSERT INTO t VALUES (1);"))
            .unwrap();

        let quiesced = handle.quiesce();
        assert!(!temp.path().join("test.db-wal").exists());
        quiesced.resume().unwrap();
    }
}
