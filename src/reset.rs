//! Destructive reset of all business data
//!
//! Deletes every row of the business tables, child before parent, and
//! resets their AUTOINCREMENT counters. Note templates and schema metadata
//! are kept. Everything runs in one transaction: either all rows are gone
//! and every counter restarts at 1, or nothing changed.
//!
//! There is no undo.

use rusqlite::Connection;
use thiserror::Error;

use crate::store::schema::RESET_TABLES;
use crate::store::{StoreError, StoreHandle};

pub type ResetResult<T> = Result<T, ResetError>;

#[derive(Debug, Error)]
pub enum ResetError {
    #[error("Reset failed: {0}")]
    Store(#[from] StoreError),

    #[error("Reset task did not complete: {0}")]
    Task(String),
}

impl ResetError {
    pub fn code(&self) -> &'static str {
        "VAULT_RESET_FAILED"
    }

    pub fn status_code(&self) -> u16 {
        match self {
            ResetError::Store(e) if e.is_busy() => 503,
            _ => 500,
        }
    }
}

/// Rows removed per table, in deletion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResetReport {
    pub deleted: Vec<(&'static str, usize)>,
}

impl ResetReport {
    pub fn total(&self) -> usize {
        self.deleted.iter().map(|(_, n)| n).sum()
    }
}

/// Clear the business tables on the calling thread.
pub fn reset_all(store: &StoreHandle) -> ResetResult<ResetReport> {
    tracing::warn!(tables = ?RESET_TABLES, "destructive reset started");
    let report = store.with_conn(clear_business_tables)?;
    tracing::warn!(rows = report.total(), "destructive reset completed");
    Ok(report)
}

fn clear_business_tables(conn: &mut Connection) -> rusqlite::Result<ResetReport> {
    let tx = conn.transaction()?;
    let mut report = ResetReport::default();

    for table in RESET_TABLES {
        let n = tx.execute(&format!("DELETE FROM {}", table), [])?;
        tracing::debug!(table, rows = n, "table cleared");
        report.deleted.push((table, n));
    }

    let has_sequence: bool = tx.query_row(
        "SELECT EXISTS (SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'sqlite_sequence')",
        [],
        |r| r.get(0),
    )?;
    if has_sequence {
        let names = RESET_TABLES
            .iter()
            .map(|t| format!("'{}'", t))
            .collect::<Vec<_>>()
            .join(", ");
        tx.execute(
            &format!("DELETE FROM sqlite_sequence WHERE name IN ({})", names),
            [],
        )?;
    }

    tx.commit()?;
    Ok(report)
}
