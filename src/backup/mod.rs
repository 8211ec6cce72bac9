//! Backup subsystem
//!
//! Produces downloadable artifacts of the live data root. Three scopes:
//!
//! ```text
//! database   invoice-backup-YYYY-MM-DD.db        raw store file
//! uploads    invoice-uploads-YYYY-MM-DD.zip      uploads/...
//! full       invoice-full-backup-YYYY-MM-DD.zip  invoice.db + uploads/...
//! ```
//!
//! # Algorithm
//!
//! 1. Verify the store file exists (database and full)
//! 2. Force a WAL checkpoint with bounded retry (database and full)
//! 3. Database: stream the store file as is
//! 4. Archives: encode on a blocking thread straight into a bounded pipe
//!    that the consumer drains; a slow reader slows the encoder
//!
//! A backup never writes to the store or the upload tree. The only side
//! effect is the checkpoint, which changes no logical content.
//!
//! The caller's lease (the maintenance slot) rides along with the artifact:
//! it is released once both the body and the encoder are gone.

mod archive;
mod errors;
mod stream;

pub use archive::{ArchiveBuilder, ArchiveEntry, ArchiveSummary, EntryKind};
pub use errors::{BackupError, BackupResult};
pub use stream::{encoded_stream, file_stream, hold, pipe, ArtifactBody, PipeWriter, SpoolGuard, PIPE_CAPACITY};

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::checkpoint::{checkpoint, CheckpointPolicy};
use crate::fault_point::FaultInjector;
use crate::layout::{DataLayout, UPLOADS_ENTRY};
use crate::store::StoreHandle;

/// What an artifact contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactScope {
    Database,
    Uploads,
    Full,
}

impl ArtifactScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactScope::Database => "database",
            ArtifactScope::Uploads => "uploads",
            ArtifactScope::Full => "full",
        }
    }

    /// File extension of artifacts of this scope, without the dot.
    pub fn extension(&self) -> &'static str {
        match self {
            ArtifactScope::Database => "db",
            ArtifactScope::Uploads | ArtifactScope::Full => "zip",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ArtifactScope::Database => "application/octet-stream",
            ArtifactScope::Uploads | ArtifactScope::Full => "application/zip",
        }
    }

    /// Suggested filename, dated with the UTC day the backup started.
    pub fn filename(&self, prefix: &str, started_at: DateTime<Utc>) -> String {
        let date = started_at.format("%Y-%m-%d");
        match self {
            ArtifactScope::Database => format!("{}-backup-{}.db", prefix, date),
            ArtifactScope::Uploads => format!("{}-uploads-{}.zip", prefix, date),
            ArtifactScope::Full => format!("{}-full-backup-{}.zip", prefix, date),
        }
    }

    fn includes_store(&self) -> bool {
        matches!(self, ArtifactScope::Database | ArtifactScope::Full)
    }
}

impl fmt::Display for ArtifactScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArtifactScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "database" | "db" => Ok(ArtifactScope::Database),
            "uploads" => Ok(ArtifactScope::Uploads),
            "full" => Ok(ArtifactScope::Full),
            other => Err(format!("unknown backup scope: {}", other)),
        }
    }
}

/// A ready-to-send artifact.
pub struct Artifact {
    pub scope: ArtifactScope,
    pub filename: String,
    /// Known up front for the database file only; archives are encoded
    /// while they stream.
    pub content_length: Option<u64>,
    pub body: ArtifactBody,
}

impl Artifact {
    pub fn content_type(&self) -> &'static str {
        self.scope.content_type()
    }
}

impl fmt::Debug for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Artifact")
            .field("scope", &self.scope)
            .field("filename", &self.filename)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Builds artifacts for one data root.
///
/// # Usage
///
/// ```ignore
/// let producer = BackupProducer::new(layout, store, "invoice");
/// let artifact = producer.produce(ArtifactScope::Full, Utc::now(), permit).await?;
/// ```
pub struct BackupProducer {
    layout: DataLayout,
    store: Arc<StoreHandle>,
    prefix: String,
    policy: CheckpointPolicy,
    faults: FaultInjector,
}

impl BackupProducer {
    pub fn new(layout: DataLayout, store: Arc<StoreHandle>, prefix: impl Into<String>) -> Self {
        Self {
            layout,
            store,
            prefix: prefix.into(),
            policy: CheckpointPolicy::default(),
            faults: FaultInjector::disabled(),
        }
    }

    pub fn with_policy(mut self, policy: CheckpointPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_faults(mut self, faults: FaultInjector) -> Self {
        self.faults = faults;
        self
    }

    /// Entries of an archive scope, in archive order.
    pub fn archive_entries(&self, scope: ArtifactScope) -> Vec<ArchiveEntry> {
        let uploads = ArchiveEntry::directory(self.layout.uploads_dir(), UPLOADS_ENTRY);
        match scope {
            ArtifactScope::Database => Vec::new(),
            ArtifactScope::Uploads => vec![uploads],
            ArtifactScope::Full => vec![
                ArchiveEntry::file(self.layout.store_file(), self.layout.store_entry_name()),
                uploads,
            ],
        }
    }

    /// Produce the artifact for `scope`, holding `lease` until the
    /// artifact is fully sent or abandoned.
    ///
    /// Errors found before the first byte are returned here. Archive
    /// failures after that end the body with an error item.
    pub async fn produce<L>(
        &self,
        scope: ArtifactScope,
        started_at: DateTime<Utc>,
        lease: L,
    ) -> BackupResult<Artifact>
    where
        L: Send + Sync + 'static,
    {
        let filename = scope.filename(&self.prefix, started_at);
        tracing::info!(scope = %scope, filename = %filename, "backup started");

        if scope.includes_store() {
            let store_file = self.layout.store_file();
            if !store_file.is_file() {
                return Err(BackupError::SourceMissing(store_file));
            }
            checkpoint(Arc::clone(&self.store), self.policy).await?;
        }

        let lease = Arc::new(lease);
        let (body, content_length) = match scope {
            ArtifactScope::Database => {
                let (body, len) = file_stream(&self.layout.store_file())
                    .await
                    .map_err(|e| BackupError::archive_write("opening store file", e))?;
                (body, Some(len))
            }
            ArtifactScope::Uploads | ArtifactScope::Full => {
                (self.encode(scope, Arc::clone(&lease))?, None)
            }
        };

        tracing::info!(scope = %scope, bytes = ?content_length, "backup ready");
        Ok(Artifact {
            scope,
            filename,
            content_length,
            body: hold(body, lease),
        })
    }

    fn encode<L>(&self, scope: ArtifactScope, lease: Arc<L>) -> BackupResult<ArtifactBody>
    where
        L: Send + Sync + 'static,
    {
        let temp_dir = self.layout.temp_dir();
        std::fs::create_dir_all(&temp_dir)
            .map_err(|e| BackupError::archive_write("creating temp directory", e))?;
        let builder = ArchiveBuilder::new(self.archive_entries(scope))?
            .with_scratch_dir(temp_dir)
            .with_faults(self.faults.clone());

        let (writer, reader) = pipe();
        let encoder = tokio::task::spawn_blocking(move || {
            let _lease = lease;
            match builder.write_to(writer) {
                Ok(summary) => {
                    tracing::debug!(
                        scope = %scope,
                        files = summary.files,
                        directories = summary.directories,
                        bytes = summary.bytes_written,
                        "archive encoded"
                    );
                    Ok(())
                }
                Err(e) if e.is_consumer_gone() => {
                    tracing::warn!(scope = %scope, "consumer closed the stream; archive abandoned");
                    Err(std::io::Error::other(e))
                }
                Err(e) => {
                    tracing::error!(scope = %scope, error = %e, "archive build failed");
                    Err(std::io::Error::other(e))
                }
            }
        });

        Ok(encoded_stream(reader, encoder))
    }
}
