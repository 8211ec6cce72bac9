//! Filesystem primitives for installing restored content
//!
//! Directory operations act on contents only: the directory itself is never
//! removed or recreated, so a mount point stays mounted.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::Path;

use walkdir::WalkDir;

/// fsync a directory so renames inside it are durable.
pub fn fsync_dir(dir: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        OpenOptions::new().read(true).open(dir)?.sync_all()
    }
    #[cfg(not(unix))]
    {
        let _ = dir;
        Ok(())
    }
}

/// Copy one file and fsync the destination.
pub fn copy_file_synced(src: &Path, dst: &Path) -> io::Result<u64> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut reader = File::open(src)?;
    let mut writer = File::create(dst)?;
    let copied = io::copy(&mut reader, &mut writer)?;
    writer.sync_all()?;
    Ok(copied)
}

/// Remove a file, treating "already gone" as success.
pub fn remove_file_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Delete every entry inside `dir`, keeping `dir` itself.
///
/// A missing directory is already clear.
pub fn clear_dir_contents(dir: &Path) -> io::Result<usize> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    let mut removed = 0;
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
        removed += 1;
    }
    Ok(removed)
}

/// Recursively copy the contents of `src` into `dst`, merging into whatever
/// `dst` already holds. Returns the number of files copied.
pub fn copy_dir_contents(src: &Path, dst: &Path) -> io::Result<usize> {
    fs::create_dir_all(dst)?;
    if !src.is_dir() {
        return Ok(0);
    }

    let mut copied = 0;
    for item in WalkDir::new(src).min_depth(1).sort_by_file_name() {
        let item = item.map_err(io::Error::other)?;
        let relative = item.path().strip_prefix(src).map_err(io::Error::other)?;
        let target = dst.join(relative);

        if item.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else if item.file_type().is_file() {
            copy_file_synced(item.path(), &target)?;
            copied += 1;
        }
    }
    Ok(copied)
}

/// Best-effort recursive removal, logged on failure.
pub fn remove_dir_quietly(dir: &Path) {
    match fs::remove_dir_all(dir) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %dir.display(), error = %e, "failed to remove directory"),
    }
}
