//! Artifact byte streams
//!
//! The database artifact is the store file read in fixed-size chunks.
//! Archives are encoded on a blocking thread straight into a bounded pipe
//! whose read half is the body:
//!
//! ```text
//! encoder ──write──► [ pipe, PIPE_CAPACITY ] ──read──► body ──► consumer
//!    ▲ blocks while full                                  │
//!    └──────────── BrokenPipe once the body is dropped ◄──┘
//! ```
//!
//! The encoder's outcome is the last item of the body. A failure after the
//! first byte ends the stream with an error, never with a clean end.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::body::Bytes;
use futures_util::future;
use futures_util::stream::{self, BoxStream, StreamExt};
use tokio::io::DuplexStream;
use tokio::task::JoinHandle;
use tokio_util::io::{ReaderStream, SyncIoBridge};

/// Stream of artifact bytes handed to the boundary.
pub type ArtifactBody = BoxStream<'static, io::Result<Bytes>>;

/// Blocking write half of an archive pipe.
pub type PipeWriter = SyncIoBridge<DuplexStream>;

const CHUNK_SIZE: usize = 64 * 1024;

/// Bytes buffered between the encoder and the consumer.
pub const PIPE_CAPACITY: usize = 256 * 1024;

/// Removes a spool file when dropped.
#[derive(Debug)]
pub struct SpoolGuard {
    path: PathBuf,
    armed: bool,
}

impl SpoolGuard {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            armed: true,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Keep the file on drop.
    pub fn disarm(mut self) -> PathBuf {
        self.armed = false;
        std::mem::take(&mut self.path)
    }
}

impl Drop for SpoolGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "spool file removed"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to remove spool file")
            }
        }
    }
}

/// Stream a file as it exists on disk.
pub async fn file_stream(path: &Path) -> io::Result<(ArtifactBody, u64)> {
    let file = tokio::fs::File::open(path).await?;
    let len = file.metadata().await?.len();
    let body = ReaderStream::with_capacity(file, CHUNK_SIZE).boxed();
    Ok((body, len))
}

/// A bounded pipe: the write half for a blocking encoder, the read half for
/// [`encoded_stream`]. Must be called from within the runtime.
pub fn pipe() -> (PipeWriter, DuplexStream) {
    let (writer, reader) = tokio::io::duplex(PIPE_CAPACITY);
    (SyncIoBridge::new(writer), reader)
}

/// Everything the encoder wrote to the pipe, then its error if it failed.
pub fn encoded_stream(reader: DuplexStream, encoder: JoinHandle<io::Result<()>>) -> ArtifactBody {
    let outcome = stream::once(async move {
        match encoder.await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(Err(e)),
            Err(e) => Some(Err(io::Error::other(e))),
        }
    })
    .filter_map(future::ready);

    ReaderStream::with_capacity(reader, CHUNK_SIZE)
        .chain(outcome)
        .boxed()
}

/// Keep `lease` alive for as long as the body exists.
pub fn hold<L>(body: ArtifactBody, lease: Arc<L>) -> ArtifactBody
where
    L: Send + Sync + 'static,
{
    body.map(move |chunk| {
        let _lease = &lease;
        chunk
    })
    .boxed()
}
