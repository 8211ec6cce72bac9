//! On-disk layout of a data root
//!
//! ```text
//! <data_root>/
//! ├── data/
//! │   ├── <name>.db
//! │   ├── <name>.db-wal            (managed by SQLite)
//! │   ├── <name>.db-shm            (managed by SQLite)
//! │   └── <name>.db.backup-<ts>    (rollback copies, never auto-deleted)
//! ├── uploads/                     (logos, stamps, nested freely)
//! └── temp/
//!     ├── restore-<ts>-<id>.<ext>  (uploaded artifacts)
//!     └── extract-<ts>-<id>/       (staging areas)
//! ```

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Root name of the upload tree inside archives and on disk.
pub const UPLOADS_ENTRY: &str = "uploads";

/// Resolves every path the backup subsystem touches from one data root.
#[derive(Debug, Clone)]
pub struct DataLayout {
    root: PathBuf,
    database_name: String,
}

impl DataLayout {
    pub fn new(root: impl Into<PathBuf>, database_name: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            database_name: database_name.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root.join("data")
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.root.join(UPLOADS_ENTRY)
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.root.join("temp")
    }

    /// Entry name of the store file inside a full archive (`invoice.db`).
    pub fn store_entry_name(&self) -> String {
        format!("{}.db", self.database_name)
    }

    pub fn store_file(&self) -> PathBuf {
        self.data_dir().join(self.store_entry_name())
    }

    pub fn wal_file(&self) -> PathBuf {
        sibling(&self.store_file(), "-wal")
    }

    pub fn shm_file(&self) -> PathBuf {
        sibling(&self.store_file(), "-shm")
    }

    /// Temporary target of an atomic store install.
    pub fn incoming_store_file(&self) -> PathBuf {
        sibling(&self.store_file(), ".incoming")
    }

    /// Rollback copy stamped with the operation's start time (epoch millis).
    pub fn rollback_file(&self, started_at: DateTime<Utc>) -> PathBuf {
        sibling(
            &self.store_file(),
            &format!(".backup-{}", started_at.timestamp_millis()),
        )
    }

    pub fn staging_dir(&self, started_at: DateTime<Utc>) -> PathBuf {
        self.temp_dir().join(format!(
            "extract-{}-{}",
            started_at.timestamp_millis(),
            short_id()
        ))
    }

    pub fn uploads_previous_dir(&self, started_at: DateTime<Utc>) -> PathBuf {
        self.temp_dir().join(format!(
            "uploads-previous-{}-{}",
            started_at.timestamp_millis(),
            short_id()
        ))
    }

    /// Where an uploaded artifact with the given extension is spooled.
    pub fn upload_spool_file(&self, extension: &str) -> PathBuf {
        self.temp_dir().join(format!(
            "restore-{}-{}.{}",
            Utc::now().timestamp_millis(),
            short_id(),
            extension
        ))
    }

    /// Create `data/`, `uploads/` and `temp/` if missing.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.data_dir())?;
        std::fs::create_dir_all(self.uploads_dir())?;
        std::fs::create_dir_all(self.temp_dir())?;
        Ok(())
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

fn short_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}
