use std::path::PathBuf;

use derive_more::{Display, Error, From};
use tracing::debug;

use crate::{
    commands::{init_logging, reporter, Pack},
    config::{ProjectConfig, ProjectConfigError},
    packager::{self, PackError, PackReport},
};

/// `pack` subcommand errors.
#[derive(Debug, Display, From, Error)]
pub(crate) enum PackCommandError {
    /// Logging configuration error.
    Figment(figment::Error),

    /// Project configuration error.
    ProjectConfig(ProjectConfigError),

    /// Packaging flow error.
    Pack(PackError),
}

/// Merge the configuration file, environment variables and CLI arguments.
fn load_config(
    Pack {
        pid,
        input,
        output,
        host,
        config,
        verbose,
    }: Pack,
) -> Result<(Option<PathBuf>, ProjectConfig), ProjectConfigError> {
    let overrides = ProjectConfig {
        pid,
        input,
        output,
        host,
        map: Vec::new(),
        verbose,
    };

    let project_config = ProjectConfig::load(config.as_deref(), overrides)?;

    Ok((config, project_config))
}

/// Log details of a created package.
fn log_report(report: &PackReport) {
    debug!(
        archive = %report.archive_path.display(),
        output_kind = ?report.output_kind,
        bytes = report.bytes,
        files = report.files,
        aliases = report.aliases,
        "package written"
    );
}

/// Packaging entrypoint.
pub(crate) async fn pack(args: Pack) -> Result<(), PackCommandError> {
    let (config_file, project_config) = load_config(args)?;

    init_logging(project_config.verbose)?;

    let cwd = ProjectConfig::working_directory(config_file.as_deref())?;
    let reporter = reporter(project_config.verbose);

    let report = packager::pack(&cwd, project_config.into_pack_options(), reporter.as_ref()).await?;
    log_report(&report);

    Ok(())
}

/// Legacy packaging entrypoint.
pub(crate) async fn create(args: Pack) -> Result<(), PackCommandError> {
    let (_, project_config) = load_config(args)?;

    init_logging(project_config.verbose)?;

    let reporter = reporter(project_config.verbose);

    #[allow(deprecated)]
    let report = packager::create(project_config.into_pack_options(), reporter.as_ref()).await?;
    log_report(&report);

    Ok(())
}
