//! Restore-specific error types
//!
//! `InvalidArtifact` and `MalformedArchive` are detected before any live
//! file is touched. `RestoreFailed` means the install phase faulted; the
//! store handle has been reopened regardless and the rollback copy (if one
//! was taken) is still on disk.

use std::io;

use thiserror::Error;

use crate::store::StoreError;

/// Result type for restore operations
pub type RestoreResult<T> = Result<T, RestoreError>;

#[derive(Debug, Error)]
pub enum RestoreError {
    #[error("Invalid artifact: {0}")]
    InvalidArtifact(String),

    #[error("Malformed archive: {0}")]
    MalformedArchive(String),

    #[error("Restore failed while {step}: {source}")]
    RestoreFailed {
        step: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("Store could not be reopened after restore: {0}")]
    Reopen(#[source] StoreError),
}

impl RestoreError {
    pub fn invalid(message: impl Into<String>) -> Self {
        RestoreError::InvalidArtifact(message.into())
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        RestoreError::MalformedArchive(message.into())
    }

    pub fn failed(step: &'static str, source: io::Error) -> Self {
        RestoreError::RestoreFailed { step, source }
    }

    pub fn code(&self) -> &'static str {
        match self {
            RestoreError::InvalidArtifact(_) => "VAULT_INVALID_ARTIFACT",
            RestoreError::MalformedArchive(_) => "VAULT_MALFORMED_ARCHIVE",
            RestoreError::RestoreFailed { .. } => "VAULT_RESTORE_FAILED",
            RestoreError::Reopen(_) => "VAULT_RESTORE_FAILED",
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            RestoreError::InvalidArtifact(_) | RestoreError::MalformedArchive(_) => 400,
            _ => 500,
        }
    }

    /// True if no live file was modified.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            RestoreError::InvalidArtifact(_) | RestoreError::MalformedArchive(_)
        )
    }
}
