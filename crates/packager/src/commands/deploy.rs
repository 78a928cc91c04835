use std::path::{Path, PathBuf};

use common::config::Store;
use derive_more::{Display, Error, From};
use tracing::debug;

use crate::{
    commands::{init_logging, reporter, Deploy},
    config::{ProjectConfig, ProjectConfigError},
    packager::{self, OutputKind, PackError, ValidationError, DEFAULT_ARCHIVE_NAME},
    store::{StoreError, UploadSession},
};

/// `deploy` subcommand errors.
#[derive(Debug, Display, From, Error)]
pub(crate) enum DeployError {
    /// Unable to load the configuration using [`figment`].
    Figment(figment::Error),

    /// Project configuration error.
    ProjectConfig(ProjectConfigError),

    /// Invalid user arguments.
    #[display(fmt = "invalid arguments: {}", _0)]
    Validation(ValidationError),

    /// Unable to inspect the configured output path.
    Pack(PackError),

    /// Package store API error.
    Store(StoreError),

    /// Neither the archive path nor a configuration file with an output path were provided.
    #[display(fmt = "input must be a path to the archive file")]
    MissingArchive,

    /// Archive file is missing or not readable.
    #[from(ignore)]
    #[display(fmt = "archive {} is not a readable file", "_0.display()")]
    UnreadableArchive(#[error(ignore)] PathBuf),

    /// Required environment variable is not set.
    #[from(ignore)]
    #[display(fmt = "{} environment variable must be set", _0)]
    MissingCredential(#[error(ignore)] &'static str),
}

/// Locate the archive file, preferring the explicitly provided path
/// over the output path of the configuration file.
async fn archive_path(
    input: Option<PathBuf>,
    config_file: Option<&Path>,
    project_config: &ProjectConfig,
) -> Result<PathBuf, DeployError> {
    if let Some(input) = input {
        return Ok(input);
    }

    let output = match (config_file, &project_config.output) {
        (Some(_), Some(output)) => output,
        _ => return Err(DeployError::MissingArchive),
    };

    let cwd = ProjectConfig::working_directory(config_file)?;

    Ok(match packager::output_kind(&cwd, output).await? {
        OutputKind::File => cwd.join(output),
        OutputKind::Directory => cwd.join(output).join(DEFAULT_ARCHIVE_NAME),
    })
}

/// Ensure `path` is a regular file that can be opened for reading.
async fn ensure_readable(path: &Path) -> Result<(), DeployError> {
    let readable = match tokio::fs::metadata(path).await {
        Ok(metadata) if metadata.is_file() => tokio::fs::File::open(path).await.is_ok(),
        _ => false,
    };

    if readable {
        Ok(())
    } else {
        Err(DeployError::UnreadableArchive(path.to_path_buf()))
    }
}

/// Deployment entrypoint.
pub(crate) async fn deploy(
    Deploy {
        pid,
        input,
        config,
        verbose,
    }: Deploy,
) -> Result<(), DeployError> {
    let overrides = ProjectConfig {
        pid,
        verbose,
        ..Default::default()
    };

    let project_config = ProjectConfig::load(config.as_deref(), overrides)?;

    init_logging(project_config.verbose)?;

    let pid = project_config.pid.clone().unwrap_or_default();
    packager::validate_pid(&pid)?;

    let archive = archive_path(input, config.as_deref(), &project_config).await?;
    ensure_readable(&archive).await?;
    debug!(archive = %archive.display(), %pid, "deploying package");

    let store = Store::from_env()?;
    let email = store
        .email
        .as_deref()
        .ok_or(DeployError::MissingCredential("DS_EMAIL"))?;
    let password = store
        .password
        .as_deref()
        .ok_or(DeployError::MissingCredential("DS_PASSWORD"))?;

    let reporter = reporter(project_config.verbose);

    reporter.stage("Logging in...");
    let session = UploadSession::login(&store.normalized_base_url(), email, password).await?;

    reporter.stage("Uploading package...");
    session.upload_package(&pid, &archive).await?;

    reporter.finish(&format!("Package {pid} uploaded"));

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{
        fs,
        path::{Path, PathBuf},
    };

    use tempfile::TempDir;

    use super::{archive_path, ensure_readable, DeployError};
    use crate::config::ProjectConfig;

    #[tokio::test]
    async fn explicit_input_wins() {
        let project_config = ProjectConfig {
            output: Some(PathBuf::from("dist/")),
            ..Default::default()
        };

        let path = archive_path(
            Some(PathBuf::from("custom.zip")),
            Some(Path::new("pack.json")),
            &project_config,
        )
        .await
        .unwrap();

        assert_eq!(path, PathBuf::from("custom.zip"));
    }

    #[tokio::test]
    async fn output_requires_config_file() {
        let project_config = ProjectConfig {
            output: Some(PathBuf::from("dist/")),
            ..Default::default()
        };

        let result = archive_path(None, None, &project_config).await;

        assert!(matches!(result, Err(DeployError::MissingArchive)));
    }

    #[tokio::test]
    async fn directory_output_points_to_default_archive() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("dist")).unwrap();

        let config_file = dir.path().join("pack.json");
        let project_config = ProjectConfig {
            output: Some(PathBuf::from("dist")),
            ..Default::default()
        };

        let path = archive_path(None, Some(&config_file), &project_config)
            .await
            .unwrap();

        assert_eq!(path, dir.path().join("dist").join("archive.zip"));
    }

    #[tokio::test]
    async fn unreadable_archive() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("archive.zip");

        assert!(matches!(
            ensure_readable(&archive).await,
            Err(DeployError::UnreadableArchive(_))
        ));
        assert!(matches!(
            ensure_readable(dir.path()).await,
            Err(DeployError::UnreadableArchive(_))
        ));

        fs::write(&archive, b"PK").unwrap();
        assert!(ensure_readable(&archive).await.is_ok());
    }
}
