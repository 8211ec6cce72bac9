//! Artifact validation for restore
//!
//! Every check here runs before the store is quiesced. A failure leaves the
//! live store, its handle and the upload tree untouched.

use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags};

use crate::backup::ArtifactScope;
use crate::layout::UPLOADS_ENTRY;
use crate::store::SQLITE_HEADER;

use super::errors::{RestoreError, RestoreResult};
use super::fs_ops::remove_file_if_exists;

/// Recognized layout of an extracted archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveShape {
    /// Store entry and `uploads/` at the root.
    Full { store: PathBuf, uploads: PathBuf },
    /// Store entry without `uploads/`.
    DatabaseOnly { store: PathBuf },
    /// `uploads/` at the root, or a bare tree that is the upload content.
    UploadsOnly { uploads: PathBuf },
}

/// What a restore will install.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestorePayload {
    pub store: Option<PathBuf>,
    pub uploads: Option<PathBuf>,
}

/// Check the uploaded file's original name against the restore kind.
pub fn validate_extension(scope: ArtifactScope, original_name: &str) -> RestoreResult<()> {
    let expected = scope.extension();
    let actual = Path::new(original_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    match actual {
        Some(ext) if ext == expected => Ok(()),
        _ => Err(RestoreError::invalid(format!(
            "{} restore expects a .{} file",
            scope, expected
        ))),
    }
}

/// Check that the staged file at `path` is a readable SQLite database.
///
/// The header magic is checked first, then the file is opened and put
/// through `PRAGMA quick_check`. The staged file is a private copy under
/// `temp/`; any `-wal`/`-shm` sibling the check leaves is removed.
pub fn validate_store_file(path: &Path) -> RestoreResult<()> {
    let mut header = [0u8; 16];
    let mut file = File::open(path)
        .map_err(|_| RestoreError::invalid("database file could not be read"))?;
    file.read_exact(&mut header)
        .map_err(|_| RestoreError::invalid("database file is too short"))?;
    drop(file);

    if &header != SQLITE_HEADER {
        return Err(RestoreError::invalid("file is not a SQLite database"));
    }

    let checked = quick_check(path);
    for suffix in ["-wal", "-shm"] {
        let mut sibling = path.as_os_str().to_owned();
        sibling.push(suffix);
        if let Err(e) = remove_file_if_exists(Path::new(&sibling)) {
            tracing::warn!(path = ?sibling, error = %e, "failed to remove staged log file");
        }
    }

    match checked {
        Ok(verdict) if verdict.eq_ignore_ascii_case("ok") => Ok(()),
        Ok(verdict) => {
            tracing::warn!(path = %path.display(), verdict = %verdict, "integrity check failed");
            Err(RestoreError::invalid("database file is corrupt"))
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "database file could not be opened");
            Err(RestoreError::invalid("database file is corrupt"))
        }
    }
}

/// First line of `PRAGMA quick_check`; `ok` for a sound file.
fn quick_check(path: &Path) -> rusqlite::Result<String> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    let verdict = conn.query_row("PRAGMA quick_check", [], |row| row.get::<_, String>(0))?;
    conn.close().map_err(|(_, e)| e)?;
    Ok(verdict)
}

/// Classify the tree extracted into `staging`.
pub fn classify(staging: &Path, store_entry_name: &str) -> RestoreResult<ArchiveShape> {
    let store = staging.join(store_entry_name);
    let uploads = staging.join(UPLOADS_ENTRY);
    let has_store = store.is_file();
    let has_uploads = uploads.is_dir();

    let shape = match (has_store, has_uploads) {
        (true, true) => ArchiveShape::Full { store, uploads },
        (true, false) => ArchiveShape::DatabaseOnly { store },
        (false, true) => ArchiveShape::UploadsOnly { uploads },
        (false, false) => {
            let is_empty = fs::read_dir(staging)
                .map_err(|e| RestoreError::failed("inspecting staging area", e))?
                .next()
                .is_none();
            if is_empty {
                return Err(RestoreError::malformed("archive contains no recognized entries"));
            }
            ArchiveShape::UploadsOnly {
                uploads: staging.to_path_buf(),
            }
        }
    };

    tracing::debug!(shape = ?shape, "archive classified");
    Ok(shape)
}

/// Pick what to install for `scope` from a classified archive.
pub fn select_payload(scope: ArtifactScope, shape: ArchiveShape) -> RestoreResult<RestorePayload> {
    match (scope, shape) {
        (ArtifactScope::Uploads, ArchiveShape::UploadsOnly { uploads })
        | (ArtifactScope::Uploads, ArchiveShape::Full { uploads, .. }) => Ok(RestorePayload {
            store: None,
            uploads: Some(uploads),
        }),
        (ArtifactScope::Uploads, ArchiveShape::DatabaseOnly { .. }) => Err(RestoreError::invalid(
            "uploads restore received an archive without uploads",
        )),
        (ArtifactScope::Full, ArchiveShape::Full { store, uploads }) => Ok(RestorePayload {
            store: Some(store),
            uploads: Some(uploads),
        }),
        (ArtifactScope::Full, ArchiveShape::DatabaseOnly { store }) => Ok(RestorePayload {
            store: Some(store),
            uploads: None,
        }),
        (ArtifactScope::Full, ArchiveShape::UploadsOnly { .. }) => Err(RestoreError::invalid(
            "full restore requires a database entry",
        )),
        (ArtifactScope::Database, _) => Err(RestoreError::invalid(
            "database restore does not accept archives",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_extension_rules() {
        assert!(validate_extension(ArtifactScope::Database, "invoice-backup-2024-01-01.db").is_ok());
        assert!(validate_extension(ArtifactScope::Database, "BACKUP.DB").is_ok());
        assert!(validate_extension(ArtifactScope::Full, "full.zip").is_ok());
        assert!(validate_extension(ArtifactScope::Uploads, "uploads.Zip").is_ok());

        let err = validate_extension(ArtifactScope::Database, "notes.txt").unwrap_err();
        assert_eq!(err.code(), "VAULT_INVALID_ARTIFACT");
        assert!(validate_extension(ArtifactScope::Full, "backup.db").is_err());
        assert!(validate_extension(ArtifactScope::Database, "db").is_err());
    }

    #[test]
    fn test_store_header() {
        let temp = TempDir::new().unwrap();
        let good = temp.path().join("good.db");
        let conn = rusqlite::Connection::open(&good).unwrap();
        conn.execute_batch("CREATE TABLE t (x);").unwrap();
        drop(conn);
        assert!(validate_store_file(&good).is_ok());

        let bad = temp.path().join("bad.db");
        fs::write(&bad, b"this is plain text, not sqlite").unwrap();
        assert!(matches!(
            validate_store_file(&bad),
            Err(RestoreError::InvalidArtifact(_))
        ));

        let short = temp.path().join("short.db");
        fs::write(&short, b"SQLite").unwrap();
        assert!(validate_store_file(&short).is_err());
    }

    #[test]
    fn test_corrupt_body_behind_valid_header() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("corrupt.db");
        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.execute_batch("PRAGMA journal_mode = WAL; CREATE TABLE t (x); INSERT INTO t VALUES (1);")
            .unwrap();
        conn.close().unwrap();

        let mut bytes = fs::read(&path).unwrap();
        // Page size 3 is not a power of two.
        bytes[16] = 0x00;
        bytes[17] = 0x03;
        fs::write(&path, &bytes).unwrap();

        let err = validate_store_file(&path).unwrap_err();
        assert!(matches!(err, RestoreError::InvalidArtifact(_)));
        assert!(!temp.path().join("corrupt.db-wal").exists());
        assert!(!temp.path().join("corrupt.db-shm").exists());
    }

    #[test]
    fn test_wal_mode_store_passes_check_without_siblings() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("wal.db");
        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.execute_batch("PRAGMA journal_mode = WAL; CREATE TABLE t (x); INSERT INTO t VALUES (1);")
            .unwrap();
        conn.close().unwrap();

        validate_store_file(&path).unwrap();
        assert!(!temp.path().join("wal.db-wal").exists());
    }

    #[test]
    fn test_classify_shapes() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();

        fs::create_dir_all(root.join("uploads")).unwrap();
        assert!(matches!(
            classify(root, "invoice.db").unwrap(),
            ArchiveShape::UploadsOnly { .. }
        ));

        fs::write(root.join("invoice.db"), b"db").unwrap();
        assert!(matches!(
            classify(root, "invoice.db").unwrap(),
            ArchiveShape::Full { .. }
        ));

        fs::remove_dir_all(root.join("uploads")).unwrap();
        assert!(matches!(
            classify(root, "invoice.db").unwrap(),
            ArchiveShape::DatabaseOnly { .. }
        ));
    }

    #[test]
    fn test_bare_tree_is_uploads() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("companies")).unwrap();

        assert_eq!(
            classify(temp.path(), "invoice.db").unwrap(),
            ArchiveShape::UploadsOnly {
                uploads: temp.path().to_path_buf()
            }
        );
    }

    #[test]
    fn test_empty_archive_is_malformed() {
        let temp = TempDir::new().unwrap();
        let err = classify(temp.path(), "invoice.db").unwrap_err();
        assert!(matches!(err, RestoreError::MalformedArchive(_)));
    }

    #[test]
    fn test_payload_selection() {
        let full = ArchiveShape::Full {
            store: PathBuf::from("s/invoice.db"),
            uploads: PathBuf::from("s/uploads"),
        };

        let payload = select_payload(ArtifactScope::Uploads, full.clone()).unwrap();
        assert_eq!(payload.store, None);
        assert_eq!(payload.uploads, Some(PathBuf::from("s/uploads")));

        let payload = select_payload(ArtifactScope::Full, full).unwrap();
        assert!(payload.store.is_some() && payload.uploads.is_some());

        let uploads_only = ArchiveShape::UploadsOnly {
            uploads: PathBuf::from("s/uploads"),
        };
        assert!(select_payload(ArtifactScope::Full, uploads_only).is_err());

        let db_only = ArchiveShape::DatabaseOnly {
            store: PathBuf::from("s/invoice.db"),
        };
        assert!(select_payload(ArtifactScope::Uploads, db_only.clone()).is_err());
        let payload = select_payload(ArtifactScope::Full, db_only).unwrap();
        assert_eq!(payload.uploads, None);
    }
}
