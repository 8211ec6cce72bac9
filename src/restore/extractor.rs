//! Archive extraction for restore
//!
//! - Extract an uploaded zip into a fresh staging area under `temp/`
//! - Reject entries whose names would land outside the staging area
//! - Remove the staging area when the restore is over, whatever the outcome

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use zip::ZipArchive;

use super::errors::{RestoreError, RestoreResult};
use super::fs_ops::remove_dir_quietly;

/// A staging directory that is removed on drop.
#[derive(Debug)]
pub struct StagingArea {
    path: PathBuf,
}

impl StagingArea {
    pub fn create(path: PathBuf) -> RestoreResult<Self> {
        if path.exists() {
            remove_dir_quietly(&path);
        }
        fs::create_dir_all(&path)
            .map_err(|e| RestoreError::failed("creating staging area", e))?;
        tracing::debug!(path = %path.display(), "staging area created");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StagingArea {
    fn drop(&mut self) {
        remove_dir_quietly(&self.path);
        tracing::debug!(path = %self.path.display(), "staging area removed");
    }
}

/// Unpack every entry of `archive_path` into `dest_dir`.
///
/// Returns the number of file entries written.
pub fn extract_archive(archive_path: &Path, dest_dir: &Path) -> RestoreResult<usize> {
    let file = File::open(archive_path)
        .map_err(|e| RestoreError::failed("opening uploaded artifact", e))?;
    let mut archive = ZipArchive::new(file)
        .map_err(|e| RestoreError::malformed(format!("not a readable zip archive: {}", e)))?;

    let mut files = 0;
    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|e| RestoreError::malformed(format!("unreadable entry #{}: {}", index, e)))?;

        let relative = match entry.enclosed_name() {
            Some(name) => name.to_path_buf(),
            None => {
                return Err(RestoreError::malformed(format!(
                    "entry escapes the staging area: {}",
                    entry.name()
                )))
            }
        };
        let target = dest_dir.join(&relative);

        if entry.is_dir() {
            fs::create_dir_all(&target)
                .map_err(|e| RestoreError::failed("extracting archive", e))?;
            continue;
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| RestoreError::failed("extracting archive", e))?;
        }
        let mut out =
            File::create(&target).map_err(|e| RestoreError::failed("extracting archive", e))?;
        io::copy(&mut entry, &mut out).map_err(|e| {
            if e.kind() == io::ErrorKind::InvalidData {
                RestoreError::malformed(format!("corrupt entry {}: {}", entry.name(), e))
            } else {
                RestoreError::failed("extracting archive", e)
            }
        })?;
        files += 1;
    }

    tracing::info!(
        archive = %archive_path.display(),
        entries = archive.len(),
        files,
        "archive extracted"
    );
    Ok(files)
}
