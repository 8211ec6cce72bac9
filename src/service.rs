//! Operation facade
//!
//! `VaultService` is what the HTTP routes and the CLI call. It owns the
//! store handle, serializes operations through a single-slot gate and turns
//! subsystem errors into a [`ServiceError`] with a stable kind and a message
//! safe to show to a client. Internal causes stay in the logs.

use std::error::Error as StdError;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task::JoinError;

use crate::backup::{Artifact, ArtifactScope, BackupError, BackupProducer, SpoolGuard};
use crate::config::AppConfig;
use crate::fault_point::FaultInjector;
use crate::layout::DataLayout;
use crate::reset::{reset_all, ResetError, ResetReport};
use crate::restore::{RestoreError, RestoreReport, RestoreRequest, SwapController};
use crate::store::schema::ensure_schema;
use crate::store::{StoreError, StoreHandle};

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Machine-checkable failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    StoreBusy,
    SourceMissing,
    InvalidArtifact,
    MalformedArchive,
    RestoreFailed,
    ArchiveWriteFailed,
    ResetFailed,
    OperationInProgress,
    ArtifactTooLarge,
    Unauthorized,
    Store,
}

impl ErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::StoreBusy => "VAULT_STORE_BUSY",
            ErrorKind::SourceMissing => "VAULT_SOURCE_MISSING",
            ErrorKind::InvalidArtifact => "VAULT_INVALID_ARTIFACT",
            ErrorKind::MalformedArchive => "VAULT_MALFORMED_ARCHIVE",
            ErrorKind::RestoreFailed => "VAULT_RESTORE_FAILED",
            ErrorKind::ArchiveWriteFailed => "VAULT_ARCHIVE_WRITE_FAILED",
            ErrorKind::ResetFailed => "VAULT_RESET_FAILED",
            ErrorKind::OperationInProgress => "VAULT_OPERATION_IN_PROGRESS",
            ErrorKind::ArtifactTooLarge => "VAULT_ARTIFACT_TOO_LARGE",
            ErrorKind::Unauthorized => "VAULT_UNAUTHORIZED",
            ErrorKind::Store => "VAULT_STORE",
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            ErrorKind::InvalidArtifact | ErrorKind::MalformedArchive => 400,
            ErrorKind::Unauthorized => 401,
            ErrorKind::OperationInProgress => 409,
            ErrorKind::ArtifactTooLarge => 413,
            ErrorKind::StoreBusy => 503,
            _ => 500,
        }
    }
}

#[derive(Debug, Error)]
#[error("{message}")]
pub struct ServiceError {
    kind: ErrorKind,
    message: String,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl ServiceError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn in_progress() -> Self {
        Self::new(
            ErrorKind::OperationInProgress,
            "Another maintenance operation is in progress",
        )
    }

    pub fn unauthorized() -> Self {
        Self::new(ErrorKind::Unauthorized, "Authentication required")
    }

    pub fn too_large(limit: u64) -> Self {
        Self::new(
            ErrorKind::ArtifactTooLarge,
            format!("Uploaded file exceeds the {} MiB limit", limit / (1024 * 1024)),
        )
    }

    pub fn invalid_artifact(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArtifact, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Client-safe message.
    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    pub fn status_code(&self) -> u16 {
        self.kind.status_code()
    }
}

impl From<BackupError> for ServiceError {
    fn from(err: BackupError) -> Self {
        let kind = match &err {
            BackupError::SourceMissing(_) => ErrorKind::SourceMissing,
            BackupError::ArchiveWriteFailed { .. } => ErrorKind::ArchiveWriteFailed,
            BackupError::Checkpoint(e) if e.is_retryable() => ErrorKind::StoreBusy,
            BackupError::Checkpoint(_) => ErrorKind::Store,
        };
        let message = match kind {
            ErrorKind::SourceMissing => "Nothing to back up: the database file is missing",
            ErrorKind::StoreBusy => "The database is busy; try again shortly",
            _ => "The backup could not be created",
        };
        ServiceError::new(kind, message).with_source(err)
    }
}

impl From<RestoreError> for ServiceError {
    fn from(err: RestoreError) -> Self {
        match &err {
            RestoreError::InvalidArtifact(reason) => {
                let message = format!("Invalid backup file: {}", reason);
                ServiceError::new(ErrorKind::InvalidArtifact, message).with_source(err)
            }
            RestoreError::MalformedArchive(_) => ServiceError::new(
                ErrorKind::MalformedArchive,
                "The archive does not contain a recognizable backup",
            )
            .with_source(err),
            RestoreError::RestoreFailed { .. } | RestoreError::Reopen(_) => ServiceError::new(
                ErrorKind::RestoreFailed,
                "Restore failed; the previous database was kept as a rollback copy",
            )
            .with_source(err),
        }
    }
}

impl From<ResetError> for ServiceError {
    fn from(err: ResetError) -> Self {
        let kind = if err.status_code() == 503 {
            ErrorKind::StoreBusy
        } else {
            ErrorKind::ResetFailed
        };
        ServiceError::new(kind, "Reset failed; no data was changed").with_source(err)
    }
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        let kind = if err.is_busy() {
            ErrorKind::StoreBusy
        } else {
            ErrorKind::Store
        };
        ServiceError::new(kind, "The database is unavailable").with_source(err)
    }
}

/// A taken operation slot. Dropping it lets the next operation in.
pub type OperationPermit = OwnedMutexGuard<()>;

/// Single-slot gate shared by every maintenance operation.
#[derive(Debug, Clone, Default)]
pub struct OperationGate {
    slot: Arc<Mutex<()>>,
}

impl OperationGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the slot or fail immediately.
    pub fn try_enter(&self, operation: &'static str) -> ServiceResult<OperationPermit> {
        Arc::clone(&self.slot).try_lock_owned().map_err(|_| {
            tracing::warn!(operation, "rejected: another operation is running");
            ServiceError::in_progress()
        })
    }
}

/// Run `work` on the blocking pool with `permit` moved into the task.
///
/// A blocking task cannot be cancelled. If the caller stops waiting, the
/// work still runs to the end and the slot is released only then.
async fn run_gated<T, F>(permit: OperationPermit, work: F) -> Result<T, JoinError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let _permit = permit;
        work()
    })
    .await
}

/// A restore upload already spooled under `temp/`.
#[derive(Debug, Clone)]
pub struct UploadedArtifact {
    pub path: PathBuf,
    pub original_name: String,
}

pub struct VaultService {
    layout: DataLayout,
    store: Arc<StoreHandle>,
    backups: BackupProducer,
    swap: SwapController,
    gate: OperationGate,
}

impl VaultService {
    pub fn new(config: &AppConfig, store: Arc<StoreHandle>) -> Self {
        let layout = config.layout();
        let backups =
            BackupProducer::new(layout.clone(), Arc::clone(&store), config.artifact_prefix.clone())
                .with_policy(config.checkpoint_policy());
        let swap = SwapController::new(layout.clone(), Arc::clone(&store));
        Self {
            layout,
            store,
            backups,
            swap,
            gate: OperationGate::new(),
        }
    }

    /// Create the data root layout, open the store and bootstrap its schema.
    pub fn open(config: &AppConfig) -> ServiceResult<Self> {
        let layout = config.layout();
        layout.ensure_dirs().map_err(|e| {
            ServiceError::new(ErrorKind::Store, "The data directory could not be prepared")
                .with_source(e)
        })?;
        let store = Arc::new(StoreHandle::open(layout.store_file())?);
        store.with_conn(ensure_schema)?;
        tracing::info!(root = %layout.root().display(), "vault opened");
        Ok(Self::new(config, store))
    }

    pub fn with_faults(mut self, faults: FaultInjector) -> Self {
        self.backups = self.backups.with_faults(faults.clone());
        self.swap = self.swap.with_faults(faults);
        self
    }

    pub fn layout(&self) -> &DataLayout {
        &self.layout
    }

    pub fn store(&self) -> &Arc<StoreHandle> {
        &self.store
    }

    pub async fn health(&self) -> ServiceResult<()> {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || store.ping())
            .await
            .map_err(|e| ServiceError::new(ErrorKind::Store, "Health check failed").with_source(e))??;
        Ok(())
    }

    pub async fn download_database_backup(&self) -> ServiceResult<Artifact> {
        self.download(ArtifactScope::Database).await
    }

    pub async fn download_uploads_backup(&self) -> ServiceResult<Artifact> {
        self.download(ArtifactScope::Uploads).await
    }

    pub async fn download_full_backup(&self) -> ServiceResult<Artifact> {
        self.download(ArtifactScope::Full).await
    }

    /// The gate stays held until the artifact stream is gone and, for
    /// archives, the encoder has stopped.
    async fn download(&self, scope: ArtifactScope) -> ServiceResult<Artifact> {
        let permit = self.gate.try_enter("backup")?;
        Ok(self.backups.produce(scope, Utc::now(), permit).await?)
    }

    pub async fn restore_database(&self, upload: UploadedArtifact) -> ServiceResult<RestoreReport> {
        self.restore(ArtifactScope::Database, upload).await
    }

    pub async fn restore_uploads(&self, upload: UploadedArtifact) -> ServiceResult<RestoreReport> {
        self.restore(ArtifactScope::Uploads, upload).await
    }

    pub async fn restore_full(&self, upload: UploadedArtifact) -> ServiceResult<RestoreReport> {
        self.restore(ArtifactScope::Full, upload).await
    }

    async fn restore(
        &self,
        scope: ArtifactScope,
        upload: UploadedArtifact,
    ) -> ServiceResult<RestoreReport> {
        let permit = match self.gate.try_enter("restore") {
            Ok(permit) => permit,
            Err(e) => {
                drop(SpoolGuard::new(upload.path));
                return Err(e);
            }
        };

        let request = RestoreRequest {
            scope,
            artifact: upload.path,
            original_name: upload.original_name,
        };
        let swap = self.swap.clone();
        let started_at = Utc::now();
        let report = run_gated(permit, move || swap.restore_blocking(request, started_at))
            .await
            .map_err(|e| RestoreError::failed("running restore task", std::io::Error::other(e)))??;
        Ok(report)
    }

    /// Irreversibly delete every business row.
    pub async fn reset_all_data(&self) -> ServiceResult<ResetReport> {
        let permit = self.gate.try_enter("reset")?;
        let store = Arc::clone(&self.store);
        let report = run_gated(permit, move || reset_all(&store))
            .await
            .map_err(|e| ResetError::Task(e.to_string()))??;
        Ok(report)
    }
}

impl std::fmt::Debug for VaultService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultService")
            .field("root", &self.layout.root())
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}
