//! Backup-specific error types
//!
//! A backup never modifies the store beyond the checkpoint. Every failure
//! here is reported to the requester as a failed download; partial archive
//! bytes must never be presented as a complete artifact.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::checkpoint::CheckpointError;

/// Result type for backup operations
pub type BackupResult<T> = Result<T, BackupError>;

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("Backup source missing: {}", .0.display())]
    SourceMissing(PathBuf),

    #[error("Archive write failed while {context}: {source}")]
    ArchiveWriteFailed {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

impl BackupError {
    pub fn archive_write(context: impl Into<String>, source: io::Error) -> Self {
        BackupError::ArchiveWriteFailed {
            context: context.into(),
            source,
        }
    }

    pub fn zip(context: impl Into<String>, source: zip::result::ZipError) -> Self {
        let source = match source {
            zip::result::ZipError::Io(e) => e,
            other => io::Error::other(other),
        };
        Self::archive_write(context, source)
    }

    /// The reader of the artifact went away before the archive was done.
    pub fn is_consumer_gone(&self) -> bool {
        matches!(
            self,
            BackupError::ArchiveWriteFailed { source, .. } if source.kind() == io::ErrorKind::BrokenPipe
        )
    }

    pub fn code(&self) -> &'static str {
        match self {
            BackupError::SourceMissing(_) => "VAULT_SOURCE_MISSING",
            BackupError::ArchiveWriteFailed { .. } => "VAULT_ARCHIVE_WRITE_FAILED",
            BackupError::Checkpoint(e) => e.code(),
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            BackupError::Checkpoint(e) => e.status_code(),
            _ => 500,
        }
    }
}
