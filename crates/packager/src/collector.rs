use std::{
    ffi::OsStr,
    io,
    path::{Path, PathBuf, StripPrefixError},
};

use derive_more::{Display, Error, From};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use crate::routes::RouteEntry;

/// File extensions that are eligible for packaging.
pub(crate) const ALLOWED_EXTENSIONS: [&str; 5] = ["html", "js", "css", "png", "jpg"];

/// Errors that may occur while collecting route files.
#[derive(Debug, Display, From, Error)]
pub(crate) enum CollectorError {
    /// [`walkdir`]-crate specific error.
    WalkDir(walkdir::Error),

    /// IO error.
    Io(io::Error),

    /// Unable to strip route directory prefix from path.
    StripPrefix(StripPrefixError),

    /// Route source directory does not exist or is not a directory.
    #[display(fmt = "route source {} is not a readable directory", "_0.display()")]
    MissingSource(#[error(ignore)] PathBuf),
}

/// File discovered inside of a route source directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CollectedFile {
    /// Absolute file path on disk.
    pub absolute_path: PathBuf,

    /// Forward-slash separated path relative to the route source directory.
    pub relative_path: String,
}

/// Check whether the file name ends with one of the [`ALLOWED_EXTENSIONS`].
///
/// Names without a stem, such as `.html`, are never eligible.
pub(crate) fn is_eligible(path: &Path) -> bool {
    path.extension()
        .and_then(OsStr::to_str)
        .filter(|extension| ALLOWED_EXTENSIONS.contains(extension))
        .is_some()
}

/// Source directory of `route` inside of the input `root`.
pub(crate) fn route_source(root: &Path, route: &RouteEntry) -> PathBuf {
    if route.from.is_empty() || route.from == "." {
        root.to_path_buf()
    } else {
        root.join(&route.from)
    }
}

/// Recursively collect eligible files of a single route.
///
/// This is a blocking operation, see [`collect_route_files`] for the async counterpart.
pub(crate) fn collect_files(source: &Path) -> Result<Vec<CollectedFile>, CollectorError> {
    walk_eligible_files(source)?.collect()
}

/// Collect eligible files of `route` without blocking the async runtime.
pub(crate) async fn collect_route_files(
    root: &Path,
    route: &RouteEntry,
) -> Result<Vec<CollectedFile>, CollectorError> {
    let source = route_source(root, route);

    let files = tokio::task::spawn_blocking(move || collect_files(&source))
        .await
        .map_err(io::Error::from)??;

    debug!(from = %route.from, count = files.len(), "collected route files");

    Ok(files)
}

/// Iterate over eligible files inside of the `source` directory.
///
/// Files are yielded in a stable order (sorted by file name on each level).
/// Paths that contain non-unicode symbols are skipped with a warning.
pub(crate) fn walk_eligible_files(
    source: &Path,
) -> Result<impl Iterator<Item = Result<CollectedFile, CollectorError>>, CollectorError> {
    let source = source.canonicalize().map_err(|error| match error.kind() {
        io::ErrorKind::NotFound => CollectorError::MissingSource(source.to_path_buf()),
        _ => CollectorError::Io(error),
    })?;

    if !source.is_dir() {
        return Err(CollectorError::MissingSource(source));
    }

    let files = walk_route_directory(&source)
        .filter_map(move |entry| collected_file(&source, entry).transpose());

    Ok(files)
}

/// Convert a directory entry into a [`CollectedFile`], if it is eligible for packaging.
fn collected_file(
    source: &Path,
    entry: Result<DirEntry, walkdir::Error>,
) -> Result<Option<CollectedFile>, CollectorError> {
    let entry = entry?;

    if !entry.file_type().is_file() || !is_eligible(entry.path()) {
        return Ok(None);
    }

    let relative = entry.path().strip_prefix(source)?;

    let segments = relative
        .components()
        .map(|component| component.as_os_str().to_str())
        .collect::<Option<Vec<_>>>();

    let Some(segments) = segments else {
        warn!(path = %entry.path().display(), "file contains non-unicode symbols in path");
        return Ok(None);
    };

    Ok(Some(CollectedFile {
        absolute_path: entry.path().to_path_buf(),
        relative_path: segments.join("/"),
    }))
}

/// Recursively iterate over route files and directories while filtering them.
///
/// Returned [`Iterator`] will not yield any hidden files or directories,
/// names of which begin with a dot (`.git`, `.DS_Store`, etc.).
fn walk_route_directory(dir: &Path) -> impl Iterator<Item = Result<DirEntry, walkdir::Error>> {
    WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0
                || entry
                    .file_name()
                    .to_str()
                    .filter(|name| !name.starts_with('.'))
                    .is_some()
        })
}
