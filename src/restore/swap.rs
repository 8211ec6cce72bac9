//! Store swap controller
//!
//! Replaces the live store file and/or upload tree with restored content.
//!
//! ```text
//! validate ─► quiesce ─► snapshot ─► purge -wal/-shm ─► install ─► reopen ─► cleanup
//!                 │                                                  ▲          ▲
//!                 └──────────────── any error ───────────────────────┴──────────┘
//! ```
//!
//! Reopen and cleanup run on every path. Reopen is tied to the
//! [`QuiescedStore`](crate::store::QuiescedStore) guard and cleanup to the
//! staging and spool guards, so an early return or a panic still performs
//! both.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::backup::{ArtifactScope, SpoolGuard};
use crate::fault_point::{points, FaultInjector};
use crate::layout::DataLayout;
use crate::store::StoreHandle;

use super::errors::{RestoreError, RestoreResult};
use super::extractor::{extract_archive, StagingArea};
use super::fs_ops::{
    clear_dir_contents, copy_dir_contents, copy_file_synced, fsync_dir, remove_dir_quietly,
    remove_file_if_exists,
};
use super::validator::{
    classify, select_payload, validate_extension, validate_store_file, RestorePayload,
};

/// An uploaded artifact waiting to be applied.
#[derive(Debug, Clone)]
pub struct RestoreRequest {
    pub scope: ArtifactScope,
    /// Spooled artifact under `temp/`. Deleted when the restore finishes.
    pub artifact: PathBuf,
    /// Name the artifact was uploaded under; its extension is checked.
    pub original_name: String,
}

/// What a successful restore changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub store_replaced: bool,
    pub rollback_copy: Option<PathBuf>,
    pub upload_files: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct SwapController {
    layout: DataLayout,
    store: Arc<StoreHandle>,
    faults: FaultInjector,
}

impl SwapController {
    pub fn new(layout: DataLayout, store: Arc<StoreHandle>) -> Self {
        Self {
            layout,
            store,
            faults: FaultInjector::disabled(),
        }
    }

    pub fn with_faults(mut self, faults: FaultInjector) -> Self {
        self.faults = faults;
        self
    }

    /// Apply `request` on the calling thread. Blocks on file I/O.
    pub fn restore_blocking(
        &self,
        request: RestoreRequest,
        started_at: DateTime<Utc>,
    ) -> RestoreResult<RestoreReport> {
        let scope = request.scope;
        tracing::info!(scope = %scope, artifact = %request.original_name, "restore started");

        let _artifact = SpoolGuard::new(request.artifact.clone());
        let result = self.run(&request, started_at);

        match &result {
            Ok(report) => tracing::info!(
                scope = %scope,
                rollback_copy = ?report.rollback_copy,
                upload_files = ?report.upload_files,
                "restore completed"
            ),
            Err(e) if e.is_rejection() => {
                tracing::warn!(scope = %scope, error = %e, "restore rejected")
            }
            Err(e) => tracing::error!(scope = %scope, error = %e, "restore failed"),
        }
        result
    }

    fn run(&self, request: &RestoreRequest, started_at: DateTime<Utc>) -> RestoreResult<RestoreReport> {
        validate_extension(request.scope, &request.original_name)?;

        match request.scope {
            ArtifactScope::Database => {
                validate_store_file(&request.artifact)?;
                let payload = RestorePayload {
                    store: Some(request.artifact.clone()),
                    uploads: None,
                };
                self.apply(&payload, started_at)
            }
            ArtifactScope::Uploads | ArtifactScope::Full => {
                let staging = StagingArea::create(self.layout.staging_dir(started_at))?;
                extract_archive(&request.artifact, staging.path())?;
                let shape = classify(staging.path(), &self.layout.store_entry_name())?;
                let payload = select_payload(request.scope, shape)?;
                if let Some(store) = &payload.store {
                    validate_store_file(store)?;
                }
                self.apply(&payload, started_at)
            }
        }
    }

    fn apply(&self, payload: &RestorePayload, started_at: DateTime<Utc>) -> RestoreResult<RestoreReport> {
        let mut report = RestoreReport::default();

        if let Some(source) = &payload.store {
            let mut quiesced = self.store.quiesce();
            let installed = self.install_store(source, started_at);
            let reopened = quiesced.reopen();

            match (installed, reopened) {
                (Ok(rollback_copy), Ok(())) => {
                    report.store_replaced = true;
                    report.rollback_copy = rollback_copy;
                }
                (Err(e), Ok(())) => return Err(e),
                (Ok(rollback_copy), Err(e)) => {
                    tracing::error!(error = %e, "installed store does not open; reinstating previous store");
                    if let Err(reinstate) = self.reinstate_store(rollback_copy.as_deref()) {
                        tracing::error!(error = %reinstate, "failed to reinstate previous store");
                    }
                    if let Err(again) = quiesced.reopen() {
                        tracing::error!(error = %again, "store reopen failed after reinstating");
                    }
                    return Err(RestoreError::Reopen(e));
                }
                (Err(e), Err(reopen)) => {
                    tracing::error!(error = %reopen, "store reopen failed after install fault");
                    return Err(e);
                }
            }
        }

        if let Some(source) = &payload.uploads {
            report.upload_files = Some(self.install_uploads(source, started_at)?);
        }

        Ok(report)
    }

    /// Steps 3 to 5 against a closed store. Returns the rollback copy path.
    fn install_store(&self, source: &Path, started_at: DateTime<Utc>) -> RestoreResult<Option<PathBuf>> {
        self.faults
            .check(points::SWAP_AFTER_QUIESCE)
            .map_err(|e| RestoreError::failed("closing store", e))?;

        let live = self.layout.store_file();
        fs::create_dir_all(self.layout.data_dir())
            .map_err(|e| RestoreError::failed("preparing data directory", e))?;

        // Snapshot
        let rollback_copy = if live.is_file() {
            let rollback = self.layout.rollback_file(started_at);
            copy_file_synced(&live, &rollback)
                .map_err(|e| RestoreError::failed("writing rollback copy", e))?;
            tracing::info!(path = %rollback.display(), "rollback copy written");
            Some(rollback)
        } else {
            None
        };

        self.faults
            .check(points::SWAP_AFTER_SNAPSHOT)
            .map_err(|e| RestoreError::failed("writing rollback copy", e))?;

        // Purge log siblings
        for sibling in [self.layout.wal_file(), self.layout.shm_file()] {
            if remove_file_if_exists(&sibling)
                .map_err(|e| RestoreError::failed("purging log files", e))?
            {
                tracing::debug!(path = %sibling.display(), "log sibling removed");
            }
        }

        // Install
        let incoming = self.layout.incoming_store_file();
        let installed = self.install_incoming(source, &incoming, &live);
        if installed.is_err() {
            if let Err(e) = remove_file_if_exists(&incoming) {
                tracing::warn!(path = %incoming.display(), error = %e, "failed to remove incoming store file");
            }
        }
        installed?;

        tracing::info!(path = %live.display(), "store file installed");
        Ok(rollback_copy)
    }

    fn install_incoming(&self, source: &Path, incoming: &Path, live: &Path) -> RestoreResult<()> {
        copy_file_synced(source, incoming)
            .map_err(|e| RestoreError::failed("installing store file", e))?;
        self.faults
            .check(points::SWAP_DURING_INSTALL)
            .map_err(|e| RestoreError::failed("installing store file", e))?;
        self.faults
            .check(points::SWAP_BEFORE_RENAME)
            .map_err(|e| RestoreError::failed("installing store file", e))?;

        fs::rename(incoming, live).map_err(|e| RestoreError::failed("installing store file", e))?;
        fsync_dir(&self.layout.data_dir())
            .map_err(|e| RestoreError::failed("installing store file", e))
    }

    /// Put the rollback copy back at the live path after an installed file
    /// failed to open. Without a rollback copy the live file is removed so
    /// the store reopens empty. The rollback copy itself stays on disk.
    fn reinstate_store(&self, rollback_copy: Option<&Path>) -> std::io::Result<()> {
        let live = self.layout.store_file();
        for sibling in [self.layout.wal_file(), self.layout.shm_file()] {
            remove_file_if_exists(&sibling)?;
        }

        match rollback_copy {
            Some(rollback) => {
                let incoming = self.layout.incoming_store_file();
                copy_file_synced(rollback, &incoming)?;
                fs::rename(&incoming, &live)?;
                tracing::warn!(path = %live.display(), from = %rollback.display(), "previous store reinstated");
            }
            None => {
                remove_file_if_exists(&live)?;
                tracing::warn!(path = %live.display(), "unusable store file removed");
            }
        }
        fsync_dir(&self.layout.data_dir())
    }

    /// Replace the contents of the live upload tree with those of `source`.
    ///
    /// The current contents are copied aside first and put back if the new
    /// content cannot be copied in.
    fn install_uploads(&self, source: &Path, started_at: DateTime<Utc>) -> RestoreResult<usize> {
        let live = self.layout.uploads_dir();
        let previous = self.layout.uploads_previous_dir(started_at);

        let preserved = copy_dir_contents(&live, &previous).and_then(|files| {
            self.faults.check(points::UPLOADS_AFTER_PRESERVE)?;
            Ok(files)
        });
        if let Err(e) = preserved {
            remove_dir_quietly(&previous);
            return Err(RestoreError::failed("preserving current uploads", e));
        }

        let replaced = clear_dir_contents(&live).and_then(|_| {
            self.faults.check(points::UPLOADS_AFTER_CLEAR)?;
            copy_dir_contents(source, &live)
        });

        match replaced {
            Ok(files) => {
                remove_dir_quietly(&previous);
                tracing::info!(files, path = %live.display(), "uploads installed");
                Ok(files)
            }
            Err(e) => {
                let put_back =
                    clear_dir_contents(&live).and_then(|_| copy_dir_contents(&previous, &live));
                match put_back {
                    Ok(files) => {
                        remove_dir_quietly(&previous);
                        tracing::warn!(files, "previous uploads put back");
                    }
                    Err(put_back_err) => tracing::error!(
                        path = %previous.display(),
                        error = %put_back_err,
                        "failed to put previous uploads back; copy kept"
                    ),
                }
                Err(RestoreError::failed("installing uploads", e))
            }
        }
    }
}
