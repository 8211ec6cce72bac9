//! Forced WAL checkpoint with bounded retry
//!
//! `PRAGMA wal_checkpoint(TRUNCATE)` copies every WAL frame into the main
//! file and truncates the log. When another connection holds a read or
//! write lock the pragma either fails with `SQLITE_BUSY` or reports
//! `busy = 1`; both count as a failed attempt.

use std::sync::Arc;
use std::time::Duration;

use crate::store::{StoreError, StoreHandle};

use super::errors::{CheckpointError, CheckpointResult};

/// Retry policy for [`checkpoint`].
#[derive(Debug, Clone, Copy)]
pub struct CheckpointPolicy {
    pub max_attempts: u32,
    pub retry_interval: Duration,
}

impl Default for CheckpointPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_interval: Duration::from_millis(100),
        }
    }
}

/// Outcome of a single attempt.
#[derive(Debug)]
pub(crate) enum Attempt {
    Done { log_frames: i64, checkpointed: i64 },
    Busy,
}

/// Run one forced checkpoint against the open store.
pub(crate) fn try_checkpoint(store: &StoreHandle) -> Result<Attempt, StoreError> {
    let result = store.with_conn(|conn| {
        conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })
    });

    match result {
        Ok((0, log_frames, checkpointed)) => Ok(Attempt::Done {
            log_frames,
            checkpointed,
        }),
        Ok(_) => Ok(Attempt::Busy),
        Err(e) if e.is_busy() => Ok(Attempt::Busy),
        Err(e) => Err(e),
    }
}

/// Force the WAL into the main store file, retrying on lock contention.
///
/// Waits `policy.retry_interval` between attempts without blocking the
/// runtime. Fails with [`CheckpointError::StoreBusy`] once
/// `policy.max_attempts` attempts were all blocked. Does not close or
/// reopen the handle.
pub async fn checkpoint(store: Arc<StoreHandle>, policy: CheckpointPolicy) -> CheckpointResult<()> {
    if policy.max_attempts == 0 {
        return Err(CheckpointError::InvalidAttempts);
    }

    for attempt in 1..=policy.max_attempts {
        let handle = Arc::clone(&store);
        let outcome = tokio::task::spawn_blocking(move || try_checkpoint(&handle))
            .await
            .map_err(|e| CheckpointError::Task(e.to_string()))?;

        match outcome {
            Ok(Attempt::Done {
                log_frames,
                checkpointed,
            }) => {
                tracing::info!(attempt, log_frames, checkpointed, "store checkpoint completed");
                return Ok(());
            }
            Ok(Attempt::Busy) => {
                tracing::warn!(attempt, max_attempts = policy.max_attempts, "store checkpoint blocked");
            }
            Err(e) => {
                tracing::error!(attempt, error = %e, "store checkpoint failed");
                if attempt == policy.max_attempts {
                    return Err(CheckpointError::Store(e));
                }
            }
        }

        if attempt < policy.max_attempts {
            tokio::time::sleep(policy.retry_interval).await;
        }
    }

    Err(CheckpointError::StoreBusy {
        attempts: policy.max_attempts,
    })
}
