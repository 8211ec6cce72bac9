//! Checkpoint coordinator
//!
//! Before any raw copy of the store file is taken, the WAL must be folded
//! into the main file and truncated so that the copy is self-consistent
//! without its `-wal`/`-shm` siblings.
//!
//! # Usage
//!
//! ```ignore
//! checkpoint(Arc::clone(&store), CheckpointPolicy::default()).await?;
//! let bytes = std::fs::read(store.path())?;
//! ```

mod coordinator;
mod errors;

pub use coordinator::{checkpoint, CheckpointPolicy};
pub use errors::{CheckpointError, CheckpointResult};
