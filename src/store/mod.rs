//! Store handle and schema bootstrap
//!
//! The store is a single SQLite file in WAL mode. Only the swap controller
//! and the initial open may close or reopen it; everything else goes
//! through [`StoreHandle::with_conn`].

mod errors;
mod handle;
pub mod schema;

pub use errors::{is_busy_error, StoreError, StoreResult};
pub use handle::{QuiescedStore, StoreHandle};

/// First 16 bytes of every SQLite database file.
pub const SQLITE_HEADER: &[u8; 16] = b"SQLite format 3\0";
