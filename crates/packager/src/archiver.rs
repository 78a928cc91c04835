//! # Archiver
//!
//! Packages are stored using the ZIP file format.
//!
//! The archive stream does not support concurrent writers, while content
//! is queued from async tasks. [`ArchiveBuilder`] therefore owns
//! a single blocking writer task, which consumes queued [`ArchiveCommand`]s
//! one by one. Clonable [`ArchiveHandle`]s only enqueue work.
//!
//! Every entry is compressed with deflate at [`COMPRESSION_LEVEL`] and
//! carries the same fixed modification time. Entries are written in queue
//! order, so callers that queue content in a stable order get identical
//! archives for identical inputs.

use std::{
    fs::File,
    io::{self, Read, Seek, Write},
    path::{Path, PathBuf},
};

use derive_more::{Display, Error, From};
use tokio::{
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    task::JoinHandle,
};
use tracing::debug;
use zip::{write::FileOptions, CompressionMethod, DateTime, ZipWriter};

use crate::{
    alias::join_archive_path,
    collector::{self, CollectorError},
};

/// Deflate compression level used for every archive entry.
pub(crate) const COMPRESSION_LEVEL: i32 = 9;

/// Size of the buffer used to copy files into the archive.
const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Errors that may occur during the archive creation process.
#[derive(Debug, Display, From, Error)]
pub(crate) enum ArchiverError {
    /// [`zip`]-crate specific error.
    Zip(zip::result::ZipError),

    /// IO error.
    Io(io::Error),

    /// Unable to enumerate the mirrored directory.
    Collector(CollectorError),

    /// Unable to read a file that was queued for archiving.
    #[from(ignore)]
    #[display(fmt = "unable to read {}: {}", "path.display()", source)]
    ReadFile {
        /// Path of the queued file.
        path: PathBuf,

        /// Underlying IO error.
        source: io::Error,
    },

    /// Unable to write entry content into the archive stream.
    #[from(ignore)]
    #[display(fmt = "unable to write archive entry {}: {}", name, source)]
    WriteEntry {
        /// Archive entry name.
        name: String,

        /// Underlying IO error.
        source: io::Error,
    },

    /// Archive writer stopped accepting new entries.
    #[display(fmt = "archive writer stopped before the archive was finalized")]
    WriterClosed,
}

/// A single unit of work for the archive writer.
enum ArchiveCommand {
    /// Copy a file from disk into the archive.
    File {
        /// Source file path.
        path: PathBuf,

        /// Archive entry name.
        name: String,
    },

    /// Write an in-memory buffer into the archive.
    Entry {
        /// Entry content.
        content: Vec<u8>,

        /// Archive entry name.
        name: String,
    },

    /// Write the central directory and stop.
    Finish,
}

/// Queue handle used to register archive content from concurrent tasks.
#[derive(Clone)]
pub(crate) struct ArchiveHandle {
    /// Writer queue.
    sender: UnboundedSender<ArchiveCommand>,
}

impl ArchiveHandle {
    /// Queue a single command, failing if the writer has already stopped.
    fn send(&self, command: ArchiveCommand) -> Result<(), ArchiverError> {
        self.sender
            .send(command)
            .map_err(|_| ArchiverError::WriterClosed)
    }

    /// Recursively mirror eligible files of `source` under the archive `prefix`.
    ///
    /// Returns the count of queued files.
    pub(crate) async fn add_directory(
        &self,
        source: &Path,
        prefix: &str,
    ) -> Result<usize, ArchiverError> {
        let dir = source.to_path_buf();

        let files = tokio::task::spawn_blocking(move || collector::collect_files(&dir))
            .await
            .map_err(io::Error::from)??;

        let count = files.len();

        for file in files {
            self.send(ArchiveCommand::File {
                name: join_archive_path([prefix, file.relative_path.as_str()]),
                path: file.absolute_path,
            })?;
        }

        debug!(source = %source.display(), %prefix, count, "queued directory");

        Ok(count)
    }

    /// Queue an in-memory buffer as the `name` archive entry.
    pub(crate) fn add_entry(&self, content: Vec<u8>, name: &str) -> Result<(), ArchiverError> {
        self.send(ArchiveCommand::Entry {
            content,
            name: name.to_owned(),
        })
    }
}

/// Owner of a single output ZIP stream.
pub(crate) struct ArchiveBuilder {
    /// Handle kept to send the final [`ArchiveCommand::Finish`].
    handle: ArchiveHandle,

    /// Writer task, resolving to the archive size once finished.
    writer: JoinHandle<Result<Option<u64>, ArchiverError>>,
}

impl ArchiveBuilder {
    /// Start the archive writer task over the provided `output`.
    pub(crate) fn new<W>(output: W) -> Self
    where
        W: Write + Seek + Send + 'static,
    {
        let (sender, receiver) = mpsc::unbounded_channel();
        let writer = tokio::task::spawn_blocking(move || write_archive(output, receiver));

        Self {
            handle: ArchiveHandle { sender },
            writer,
        }
    }

    /// Create a new queue handle.
    pub(crate) fn handle(&self) -> ArchiveHandle {
        self.handle.clone()
    }

    /// Write all queued entries, finish the archive and return its size in bytes.
    ///
    /// Any error raised by the writer while processing earlier entries
    /// is returned here, and the archive is left unfinished.
    pub(crate) async fn finalize(self) -> Result<u64, ArchiverError> {
        // A closed queue means the writer has already failed, the
        // actual error is retrieved from the task below.
        let _ = self.handle.send(ArchiveCommand::Finish);
        drop(self.handle);

        self.writer
            .await
            .map_err(io::Error::from)??
            .ok_or(ArchiverError::WriterClosed)
    }

    /// Stop accepting new entries without finishing the archive.
    ///
    /// Returns the writer error, if the writer has failed on its own.
    pub(crate) async fn abort(self) -> Option<ArchiverError> {
        drop(self.handle);

        match self.writer.await {
            Ok(Ok(_)) => None,
            Ok(Err(error)) => Some(error),
            Err(error) => Some(io::Error::from(error).into()),
        }
    }
}

/// Options shared by every archive entry.
fn file_options() -> FileOptions {
    FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(COMPRESSION_LEVEL))
        .last_modified_time(DateTime::default())
}

/// Archive writer loop.
///
/// Returns [`None`] if the queue was closed without a [`ArchiveCommand::Finish`].
fn write_archive<W: Write + Seek>(
    output: W,
    mut receiver: UnboundedReceiver<ArchiveCommand>,
) -> Result<Option<u64>, ArchiverError> {
    let mut writer = ZipWriter::new(output);
    let options = file_options();

    while let Some(command) = receiver.blocking_recv() {
        match command {
            ArchiveCommand::File { path, name } => {
                let file = File::open(&path).map_err(|source| ArchiverError::ReadFile {
                    path: path.clone(),
                    source,
                })?;

                writer.start_file(name.as_str(), options)?;
                copy_file(file, &path, &name, &mut writer)?;
            }
            ArchiveCommand::Entry { content, name } => {
                writer.start_file(name, options)?;
                writer.write_all(&content)?;
            }
            ArchiveCommand::Finish => {
                let mut output = writer.finish()?;
                output.flush()?;
                return Ok(Some(output.stream_position()?));
            }
        }
    }

    Ok(None)
}

/// Copy `file` content into the current archive entry.
///
/// Read failures are reported against the source `path`, write failures
/// against the entry `name`.
fn copy_file<W: Write>(
    mut file: File,
    path: &Path,
    name: &str,
    writer: &mut W,
) -> Result<(), ArchiverError> {
    let mut buf = vec![0; COPY_BUFFER_SIZE];

    loop {
        let read = match file.read(&mut buf) {
            Ok(0) => return Ok(()),
            Ok(read) => read,
            Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
            Err(source) => {
                return Err(ArchiverError::ReadFile {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        writer
            .write_all(&buf[..read])
            .map_err(|source| ArchiverError::WriteEntry {
                name: name.to_owned(),
                source,
            })?;
    }
}
