//! Zip archive creation for backup
//!
//! - Deflate at maximum level
//! - Entries written in declaration order, directory contents sorted by name
//! - Written front to back; the sink never has to seek
//!
//! The zip writer patches a local header once an entry's checksum and sizes
//! are known. To avoid that, every file is first deflated into an anonymous
//! scratch file and then raw-copied into the archive with its header
//! complete. At most one compressed entry sits in scratch at a time.
//!
//! Entry names always use `/` separators. A directory entry is written for
//! the root of every directory source, so an empty upload tree still
//! produces an `uploads/` entry.

use std::cell::Cell;
use std::fs::File;
use std::io::{self, Cursor, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::fault_point::{points, FaultInjector};

use super::errors::{BackupError, BackupResult};

/// Entries at or above this size need zip64 headers.
const ZIP64_THRESHOLD: u64 = u32::MAX as u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// One filesystem source and the name it takes inside the archive.
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    pub source: PathBuf,
    pub archive_name: String,
    pub kind: EntryKind,
}

impl ArchiveEntry {
    pub fn file(source: impl Into<PathBuf>, archive_name: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            archive_name: archive_name.into(),
            kind: EntryKind::File,
        }
    }

    pub fn directory(source: impl Into<PathBuf>, archive_name: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            archive_name: archive_name.into(),
            kind: EntryKind::Directory,
        }
    }
}

/// Counters reported once an archive is finished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub files: usize,
    pub directories: usize,
    pub bytes_written: u64,
}

#[derive(Debug, Clone)]
pub struct ArchiveBuilder {
    entries: Vec<ArchiveEntry>,
    scratch_dir: PathBuf,
    faults: FaultInjector,
}

type Writer<W> = ZipWriter<ForwardOnly<W>>;

impl ArchiveBuilder {
    /// Validate the sources up front.
    ///
    /// A missing file source is an error before any byte is produced. A
    /// missing directory source contributes no entries.
    pub fn new(entries: Vec<ArchiveEntry>) -> BackupResult<Self> {
        for entry in &entries {
            if entry.kind == EntryKind::File && !entry.source.is_file() {
                return Err(BackupError::SourceMissing(entry.source.clone()));
            }
        }
        Ok(Self {
            entries,
            scratch_dir: std::env::temp_dir(),
            faults: FaultInjector::disabled(),
        })
    }

    /// Directory for per-entry scratch files.
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = dir.into();
        self
    }

    pub fn with_faults(mut self, faults: FaultInjector) -> Self {
        self.faults = faults;
        self
    }

    /// Encode every entry into `sink`.
    ///
    /// On error the bytes already written are not a complete artifact even
    /// if a prefix of them parses.
    pub fn write_to<W: Write>(&self, sink: W) -> BackupResult<ArchiveSummary> {
        let sink = ForwardOnly::new(sink);
        let abandoned = Rc::clone(&sink.abandoned);
        let mut zip = ZipWriter::new(sink);
        let mut summary = ArchiveSummary::default();

        let finished = self
            .write_entries(&mut zip, &mut summary)
            .and_then(|()| zip.finish().map_err(|e| BackupError::zip("finishing archive", e)));

        match finished {
            Ok(mut sink) => {
                sink.flush()
                    .map_err(|e| BackupError::archive_write("flushing archive", e))?;
                summary.bytes_written = sink.position;
                Ok(summary)
            }
            Err(e) => {
                // The writer finalizes on drop; keep that trailer off the sink.
                abandoned.set(true);
                Err(e)
            }
        }
    }

    fn write_entries<W: Write>(
        &self,
        zip: &mut Writer<W>,
        summary: &mut ArchiveSummary,
    ) -> BackupResult<()> {
        let mut directory = directory_template()?;
        for entry in &self.entries {
            match entry.kind {
                EntryKind::File => {
                    self.add_file(zip, &entry.source, &entry.archive_name)?;
                    summary.files += 1;
                }
                EntryKind::Directory => {
                    self.add_tree(zip, &mut directory, &entry.source, &entry.archive_name, summary)?
                }
            }
        }
        Ok(())
    }

    fn add_tree<W: Write>(
        &self,
        zip: &mut Writer<W>,
        directory: &mut ZipArchive<Cursor<Vec<u8>>>,
        root: &Path,
        archive_root: &str,
        summary: &mut ArchiveSummary,
    ) -> BackupResult<()> {
        if !root.is_dir() {
            tracing::debug!(path = %root.display(), "archive source directory absent");
            return Ok(());
        }

        for item in WalkDir::new(root).sort_by_file_name() {
            let item = item.map_err(|e| {
                let context = format!("walking {}", archive_root);
                BackupError::archive_write(context, io::Error::other(e))
            })?;

            let relative = item.path().strip_prefix(root).map_err(|e| {
                BackupError::archive_write("resolving entry name", io::Error::other(e))
            })?;
            let name = entry_name(archive_root, relative);
            let file_type = item.file_type();

            if file_type.is_dir() {
                let name = if name.ends_with('/') { name } else { name + "/" };
                let template = directory
                    .by_index(0)
                    .map_err(|e| BackupError::zip("reading directory template", e))?;
                zip.raw_copy_file_rename(template, name.as_str())
                    .map_err(|e| BackupError::zip(format!("adding directory {}", name), e))?;
                summary.directories += 1;
            } else if file_type.is_file() {
                self.add_file(zip, item.path(), &name)?;
                summary.files += 1;
            } else {
                tracing::warn!(path = %item.path().display(), "skipping non-regular file");
            }
        }

        Ok(())
    }

    fn add_file<W: Write>(&self, zip: &mut Writer<W>, source: &Path, name: &str) -> BackupResult<()> {
        let mut file = File::open(source).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                BackupError::SourceMissing(source.to_path_buf())
            } else {
                BackupError::archive_write(format!("opening {}", name), e)
            }
        })?;
        let size = file
            .metadata()
            .map_err(|e| BackupError::archive_write(format!("opening {}", name), e))?
            .len();

        // Deflate into scratch so checksum and sizes are known up front.
        let scratch = tempfile::tempfile_in(&self.scratch_dir)
            .map_err(|e| BackupError::archive_write(format!("creating scratch for {}", name), e))?;
        let mut staged = ZipWriter::new(scratch);
        staged
            .start_file(name, options().large_file(size >= ZIP64_THRESHOLD))
            .map_err(|e| BackupError::zip(format!("starting entry {}", name), e))?;
        io::copy(&mut file, &mut staged)
            .map_err(|e| BackupError::archive_write(format!("compressing entry {}", name), e))?;
        let scratch = staged
            .finish()
            .map_err(|e| BackupError::zip(format!("compressing entry {}", name), e))?;

        let mut staged = ZipArchive::new(scratch)
            .map_err(|e| BackupError::zip(format!("reading compressed entry {}", name), e))?;
        let compressed = staged
            .by_index(0)
            .map_err(|e| BackupError::zip(format!("reading compressed entry {}", name), e))?;
        zip.raw_copy_file_rename(compressed, name)
            .map_err(|e| BackupError::zip(format!("writing entry {}", name), e))?;

        self.faults
            .check(points::ARCHIVE_AFTER_FIRST_ENTRY)
            .map_err(|e| BackupError::archive_write(format!("writing entry {}", name), e))?;
        Ok(())
    }
}

/// Sink wrapper that counts bytes and only answers position queries.
///
/// Any seek that would move the write position fails, so a writer that
/// tries to patch earlier bytes errors out instead of corrupting output.
/// Once `abandoned` is set, writes are dropped.
struct ForwardOnly<W> {
    inner: W,
    position: u64,
    abandoned: Rc<Cell<bool>>,
}

impl<W: Write> ForwardOnly<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            position: 0,
            abandoned: Rc::new(Cell::new(false)),
        }
    }
}

impl<W: Write> Write for ForwardOnly<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.abandoned.get() {
            return Ok(buf.len());
        }
        let written = self.inner.write(buf)?;
        self.position += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.abandoned.get() {
            return Ok(());
        }
        self.inner.flush()
    }
}

impl<W> Seek for ForwardOnly<W> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match pos {
            SeekFrom::Current(0) | SeekFrom::End(0) => Ok(self.position),
            SeekFrom::Start(offset) if offset == self.position => Ok(self.position),
            _ => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "archive sink cannot seek",
            )),
        }
    }
}

/// One-entry archive holding an empty directory; raw-copied under a new
/// name for every directory entry.
fn directory_template() -> BackupResult<ZipArchive<Cursor<Vec<u8>>>> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    zip.add_directory("dir/", options())
        .map_err(|e| BackupError::zip("building directory template", e))?;
    let bytes = zip
        .finish()
        .map_err(|e| BackupError::zip("building directory template", e))?;
    ZipArchive::new(bytes).map_err(|e| BackupError::zip("building directory template", e))
}

fn options() -> FileOptions {
    FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(9))
}

/// `<root>/<relative with forward slashes>`, with a trailing `/` for the root.
fn entry_name(archive_root: &str, relative: &Path) -> String {
    let mut name = archive_root.trim_end_matches('/').to_string();
    for part in relative.components() {
        name.push('/');
        name.push_str(&part.as_os_str().to_string_lossy());
    }
    if relative.as_os_str().is_empty() {
        name.push('/');
    }
    name
}
