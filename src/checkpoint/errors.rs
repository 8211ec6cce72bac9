//! Checkpoint-specific error types
//!
//! `StoreBusy` is the only recoverable outcome: the caller should surface it
//! as "temporarily unavailable" and let the operator retry later.

use thiserror::Error;

use crate::store::StoreError;

/// Result type for checkpoint operations
pub type CheckpointResult<T> = Result<T, CheckpointError>;

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Store still busy after {attempts} checkpoint attempts")]
    StoreBusy { attempts: u32 },

    #[error("Checkpoint failed: {0}")]
    Store(#[from] StoreError),

    #[error("Checkpoint attempts must be at least 1")]
    InvalidAttempts,

    #[error("Checkpoint task did not complete: {0}")]
    Task(String),
}

impl CheckpointError {
    pub fn code(&self) -> &'static str {
        match self {
            CheckpointError::StoreBusy { .. } => "VAULT_STORE_BUSY",
            CheckpointError::Store(e) => e.code(),
            CheckpointError::InvalidAttempts => "VAULT_CHECKPOINT_CONFIG",
            CheckpointError::Task(_) => "VAULT_CHECKPOINT_FAILED",
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            CheckpointError::StoreBusy { .. } => 503,
            _ => 500,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, CheckpointError::StoreBusy { .. })
    }
}
