//! # Packaging flow
//!
//! [`pack`] validates user arguments, resolves the route table and the
//! archive destination, and then drives collection, alias resolution and
//! archiving for every route concurrently:
//!
//! ```text
//! validate -> resolve routes -> resolve output -> build archive -> report
//! ```
//!
//! All argument checks happen before the filesystem is touched. Routes are
//! processed one after another in route table order, while the files of a
//! single route are collected for alias resolution and mirrored into the
//! archive concurrently. The first fatal error stops the flow; an archive
//! file that was already created is left in place but never reported as a
//! finished package.

use std::{
    env, io,
    path::{self, Path, PathBuf},
};

use derive_more::{Display, Error, From};
use tracing::debug;

use crate::{
    alias::{join_archive_path, AliasManifest, AliasResolver, AliasWrites},
    archiver::{ArchiveBuilder, ArchiveHandle, ArchiverError},
    collector::{self, CollectorError},
    reporter::Reporter,
    routes::{RouteEntry, RouteError, RouteTable},
};

/// File name used when the output path is a directory.
pub(crate) const DEFAULT_ARCHIVE_NAME: &str = "archive.zip";

/// Name of the alias manifest entry inside of the package directory.
pub(crate) const CONFIG_ENTRY_NAME: &str = "config.json";

/// Argument validation errors.
///
/// These are raised before any filesystem modification takes place.
#[derive(Debug, Display, Error, PartialEq, Eq)]
pub(crate) enum ValidationError {
    /// Package identifier is not a positive integer.
    #[display(fmt = "pid must be an integer bigger than 0, got \"{}\"", _0)]
    InvalidPid(#[error(ignore)] String),

    /// Input directory was not provided.
    #[display(fmt = "input must be a path to directory")]
    MissingInput,

    /// Output path was not provided.
    #[display(fmt = "output must be either a file path or a directory path")]
    MissingOutput,

    /// Routing source is invalid.
    Routes(RouteError),

    /// Input path is not a readable and traversable directory.
    #[display(fmt = "input path {} is not a readable directory", "_0.display()")]
    UnreadableInput(#[error(ignore)] PathBuf),

    /// Output path exists, but it is neither a file nor a directory.
    #[display(
        fmt = "output path {} must be either a file path or a directory path",
        "_0.display()"
    )]
    UnsupportedOutput(#[error(ignore)] PathBuf),

    /// Output directory is not writable.
    #[display(fmt = "output directory {} is not writable", "_0.display()")]
    ReadonlyOutput(#[error(ignore)] PathBuf),
}

impl From<RouteError> for ValidationError {
    fn from(error: RouteError) -> Self {
        ValidationError::Routes(error)
    }
}

/// Packaging flow errors.
#[derive(Debug, Display, From, Error)]
pub(crate) enum PackError {
    /// Invalid user arguments.
    #[display(fmt = "invalid arguments: {}", _0)]
    Validation(ValidationError),

    /// Filesystem error while preparing the input or output paths.
    #[from(ignore)]
    #[display(fmt = "{}: {}", "path.display()", source)]
    Filesystem {
        /// Offending path.
        path: PathBuf,

        /// Underlying IO error.
        source: io::Error,
    },

    /// Unable to collect route files.
    #[display(fmt = "unable to collect files: {}", _0)]
    Collector(CollectorError),

    /// Archive writer error.
    #[from(ignore)]
    #[display(fmt = "unable to create zip archive: {}", _0)]
    Archiver(ArchiverError),

    /// Unable to serialize the alias manifest.
    #[display(fmt = "unable to serialize alias manifest: {}", _0)]
    Manifest(serde_json::Error),
}

impl From<RouteError> for PackError {
    fn from(error: RouteError) -> Self {
        PackError::Validation(error.into())
    }
}

impl From<ArchiverError> for PackError {
    fn from(error: ArchiverError) -> Self {
        match error {
            // Mirroring walks the same route directories as collection does.
            ArchiverError::Collector(error) => PackError::Collector(error),
            error => PackError::Archiver(error),
        }
    }
}

impl PackError {
    /// Attach the offending `path` to an IO error.
    fn filesystem(path: &Path) -> impl FnOnce(io::Error) -> Self + '_ {
        move |source| PackError::Filesystem {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// User-provided packaging arguments.
#[derive(Debug, Clone, Default)]
pub(crate) struct PackOptions {
    /// Positive integer package identifier, used verbatim as the archive root directory.
    pub pid: String,

    /// Input directory.
    pub input: Option<PathBuf>,

    /// Output archive file or directory.
    ///
    /// A non-existent path that ends with a path separator is treated as a directory.
    pub output: Option<PathBuf>,

    /// Single host name mapping the whole input directory.
    pub host: Option<String>,

    /// Explicit route list, ignored when `host` is set.
    pub map: Vec<RouteEntry>,
}

/// How the output path is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OutputKind {
    /// Output path is the archive file itself.
    File,

    /// Output path is a directory, which contains [`DEFAULT_ARCHIVE_NAME`].
    Directory,
}

/// Successfully created package.
#[derive(Debug)]
pub(crate) struct PackReport {
    /// Archive file location.
    pub archive_path: PathBuf,

    /// How the output path was interpreted.
    pub output_kind: OutputKind,

    /// Total archive size, in bytes.
    pub bytes: u64,

    /// Count of packaged files.
    pub files: usize,

    /// Count of aliases in the manifest.
    pub aliases: usize,
}

/// Check that `pid` is a positive integer.
pub(crate) fn validate_pid(pid: &str) -> Result<&str, ValidationError> {
    match pid.parse::<u64>() {
        Ok(value) if value > 0 => Ok(pid),
        _ => Err(ValidationError::InvalidPid(pid.to_owned())),
    }
}

/// Create an offline package.
///
/// Relative `input` and `output` paths are resolved against `cwd`.
pub(crate) async fn pack(
    cwd: &Path,
    options: PackOptions,
    reporter: &dyn Reporter,
) -> Result<PackReport, PackError> {
    let pid = validate_pid(&options.pid)?;

    let input = options
        .input
        .as_deref()
        .filter(|input| !input.as_os_str().is_empty())
        .ok_or(ValidationError::MissingInput)?;

    let output = options
        .output
        .as_deref()
        .filter(|output| !output.as_os_str().is_empty())
        .ok_or(ValidationError::MissingOutput)?;

    let routes = RouteTable::resolve(options.host.as_deref(), &options.map)?;
    debug!(count = routes.len(), ?routes, "resolved routes");

    reporter.stage("Validating input path and output path...");

    let input = ensure_input_directory(&cwd.join(input)).await?;
    debug!(input = %input.display(), "input directory");

    let (archive_path, output_kind) = prepare_output(cwd, output).await?;
    debug!(output = %archive_path.display(), ?output_kind, "archive destination");

    reporter.stage("Archiving input directory...");

    let file = tokio::fs::File::create(&archive_path)
        .await
        .map_err(PackError::filesystem(&archive_path))?;
    let builder = ArchiveBuilder::new(file.into_std().await);

    let (files, manifest) = match queue_package(pid, &input, &routes, builder.handle(), reporter).await
    {
        Ok(queued) => queued,
        // The writer error, if any, is the root cause of a failed route.
        Err(error) => return Err(builder.abort().await.map_or(error, PackError::from)),
    };

    let bytes = builder.finalize().await?;

    reporter.finish(&format!("Offline package created, total bytes: {bytes}B"));

    Ok(PackReport {
        archive_path,
        output_kind,
        bytes,
        files,
        aliases: manifest.len(),
    })
}

/// Create an offline package, resolving relative paths against the process working directory.
#[deprecated(note = "use `pack` with an explicit working directory")]
pub(crate) async fn create(
    options: PackOptions,
    reporter: &dyn Reporter,
) -> Result<PackReport, PackError> {
    let cwd = env::current_dir().map_err(PackError::filesystem(Path::new(".")))?;
    pack(&cwd, options, reporter).await
}

/// Directory permissions required by the packaging flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DirectoryAccess {
    /// List and enter the directory.
    ReadTraverse,

    /// Create entries in and enter the directory.
    WriteTraverse,
}

/// Check whether the current user has the requested `access` to `path`.
#[cfg(unix)]
async fn has_access(path: &Path, access: DirectoryAccess) -> io::Result<bool> {
    use nix::{
        errno::Errno,
        unistd::{self, AccessFlags},
    };

    let flags = match access {
        DirectoryAccess::ReadTraverse => AccessFlags::R_OK | AccessFlags::X_OK,
        DirectoryAccess::WriteTraverse => AccessFlags::W_OK | AccessFlags::X_OK,
    };

    let path = path.to_path_buf();

    match tokio::task::spawn_blocking(move || unistd::access(path.as_path(), flags)).await? {
        Ok(()) => Ok(true),
        Err(Errno::EACCES | Errno::EPERM | Errno::EROFS | Errno::ENOENT | Errno::ENOTDIR) => {
            Ok(false)
        }
        Err(errno) => Err(errno.into()),
    }
}

/// Check whether the current user has the requested `access` to `path`.
#[cfg(not(unix))]
async fn has_access(path: &Path, access: DirectoryAccess) -> io::Result<bool> {
    match access {
        DirectoryAccess::ReadTraverse => Ok(tokio::fs::read_dir(path).await.is_ok()),
        DirectoryAccess::WriteTraverse => Ok(tokio::fs::metadata(path)
            .await
            .map(|metadata| !metadata.permissions().readonly())
            .unwrap_or(false)),
    }
}

/// Ensure `path` is a readable and traversable directory.
async fn ensure_input_directory(path: &Path) -> Result<PathBuf, PackError> {
    let unreadable = || PackError::from(ValidationError::UnreadableInput(path.to_path_buf()));

    let canonical = match tokio::fs::canonicalize(path).await {
        Ok(canonical) => canonical,
        Err(error) if is_access_error(&error) => return Err(unreadable()),
        Err(error) => return Err(PackError::filesystem(path)(error)),
    };

    let metadata = tokio::fs::metadata(&canonical)
        .await
        .map_err(PackError::filesystem(&canonical))?;

    if !metadata.is_dir() {
        return Err(unreadable());
    }

    let accessible = has_access(&canonical, DirectoryAccess::ReadTraverse)
        .await
        .map_err(PackError::filesystem(&canonical))?;

    if !accessible {
        return Err(unreadable());
    }

    Ok(canonical)
}

/// Whether the error means the path is missing or not accessible.
fn is_access_error(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied
    )
}

/// Whether the user-provided path ends with a path separator.
fn ends_with_separator(path: &Path) -> bool {
    path.to_string_lossy().ends_with(path::is_separator)
}

/// Determine how to treat the user-provided `output` path.
pub(crate) async fn output_kind(cwd: &Path, output: &Path) -> Result<OutputKind, PackError> {
    let resolved = cwd.join(output);

    match tokio::fs::metadata(&resolved).await {
        Ok(metadata) if metadata.is_file() => Ok(OutputKind::File),
        Ok(metadata) if metadata.is_dir() => Ok(OutputKind::Directory),
        Ok(_) => Err(ValidationError::UnsupportedOutput(resolved).into()),
        Err(error) if error.kind() == io::ErrorKind::NotFound => {
            if ends_with_separator(output) {
                Ok(OutputKind::Directory)
            } else {
                Ok(OutputKind::File)
            }
        }
        Err(error) => Err(PackError::filesystem(&resolved)(error)),
    }
}

/// Resolve the archive file location, creating the output directory if needed.
async fn prepare_output(cwd: &Path, output: &Path) -> Result<(PathBuf, OutputKind), PackError> {
    let resolved = cwd.join(output);
    let kind = output_kind(cwd, output).await?;

    let archive_path = match kind {
        OutputKind::File => resolved,
        OutputKind::Directory => {
            create_output_directory(&resolved).await?;
            resolved.join(DEFAULT_ARCHIVE_NAME)
        }
    };

    Ok((archive_path, kind))
}

/// Create the output directory and its parents with `rwxrwsr-x` permissions.
async fn create_output_directory(path: &Path) -> Result<(), PackError> {
    let mut builder = tokio::fs::DirBuilder::new();
    builder.recursive(true);

    #[cfg(unix)]
    builder.mode(0o2775);

    builder
        .create(path)
        .await
        .map_err(PackError::filesystem(path))?;

    let writable = has_access(path, DirectoryAccess::WriteTraverse)
        .await
        .map_err(PackError::filesystem(path))?;

    if !writable {
        return Err(ValidationError::ReadonlyOutput(path.to_path_buf()).into());
    }

    Ok(())
}

/// Queue every route, in route table order, and the alias manifest into the archive.
///
/// Returns the count of mirrored files and the merged manifest.
async fn queue_package(
    pid: &str,
    input: &Path,
    routes: &RouteTable,
    handle: ArchiveHandle,
    reporter: &dyn Reporter,
) -> Result<(usize, AliasManifest), PackError> {
    let mut files = 0;
    let mut manifest = AliasManifest::default();

    // Routes are queued in order, which keeps the archive entry order stable.
    for route in routes.entries() {
        let (mirrored, writes) = process_route(pid, input, route, &handle).await?;
        files += mirrored;

        let redirected = manifest.merge(writes);

        if redirected > 0 {
            reporter.warn(&format!(
                "Route \"{}\" => \"{}\" redirected {redirected} existing aliases",
                route.from, route.to
            ));
        }
    }

    let config = manifest.to_config_json()?;
    debug!("create map config: {}", String::from_utf8_lossy(&config));

    handle.add_entry(config, &join_archive_path([pid, CONFIG_ENTRY_NAME]))?;

    Ok((files, manifest))
}

/// Mirror a single route into the archive while computing its aliases.
async fn process_route(
    pid: &str,
    input: &Path,
    route: &RouteEntry,
    handle: &ArchiveHandle,
) -> Result<(usize, AliasWrites), PackError> {
    let resolver = AliasResolver::new(pid, route);
    let source = collector::route_source(input, route);
    let prefix = resolver.archive_prefix();

    let (files, mirrored) = tokio::try_join!(
        async {
            collector::collect_route_files(input, route)
                .await
                .map_err(PackError::from)
        },
        async {
            handle
                .add_directory(&source, &prefix)
                .await
                .map_err(PackError::from)
        },
    )?;

    let writes = resolver.resolve_all(&files);
    debug!(from = %route.from, to = %route.to, files = mirrored, aliases = writes.len(), "processed route");

    Ok((mirrored, writes))
}
