//! Restore subsystem
//!
//! Applies an uploaded artifact to the live data root.
//!
//! # Algorithm
//!
//! 1. Validate the artifact (extension, SQLite header, archive shape)
//! 2. Quiesce the store handle (database and full)
//! 3. Copy the live store to `<name>.db.backup-<ts>`
//! 4. Delete `<name>.db-wal` and `<name>.db-shm`
//! 5. Install the store via `<name>.db.incoming` + rename, then the uploads
//! 6. Reopen the store handle, whatever happened in 3 to 5
//! 7. Remove the staging area and the uploaded artifact
//!
//! # Important
//!
//! Rollback copies are never deleted automatically.
//! A rejected artifact never touches a live file.

mod errors;
mod extractor;
mod fs_ops;
mod swap;
mod validator;

pub use errors::{RestoreError, RestoreResult};
pub use extractor::{extract_archive, StagingArea};
pub use fs_ops::{clear_dir_contents, copy_dir_contents};
pub use swap::{RestoreReport, RestoreRequest, SwapController};
pub use validator::{classify, select_payload, validate_extension, ArchiveShape, RestorePayload};
