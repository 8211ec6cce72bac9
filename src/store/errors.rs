//! Store handle errors

use thiserror::Error;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised while opening or using the store connection
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to open store at {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Store query failed: {0}")]
    Query(#[from] rusqlite::Error),
}

impl StoreError {
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::Open { .. } => "VAULT_STORE_OPEN",
            StoreError::Query(_) => "VAULT_STORE_QUERY",
        }
    }

    /// Whether the underlying SQLite error is lock contention.
    pub fn is_busy(&self) -> bool {
        let err = match self {
            StoreError::Open { source, .. } => source,
            StoreError::Query(e) => e,
        };
        is_busy_error(err)
    }
}

/// `SQLITE_BUSY` / `SQLITE_LOCKED`, the transient contention codes.
pub fn is_busy_error(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(rusqlite::ErrorCode::DatabaseBusy) | Some(rusqlite::ErrorCode::DatabaseLocked)
    )
}
