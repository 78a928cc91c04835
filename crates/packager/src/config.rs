use std::{
    env,
    ffi::OsStr,
    fmt, io,
    path::{Path, PathBuf},
};

use derive_more::{Display, Error, From};
use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};
use serde::{de, Deserialize, Deserializer, Serialize};

use crate::{packager::PackOptions, routes::RouteEntry};

/// Project configuration errors.
#[derive(Debug, Display, From, Error)]
pub(crate) enum ProjectConfigError {
    /// Unable to load the configuration using [`figment`].
    Figment(figment::Error),

    /// IO-related error.
    Io(io::Error),

    /// Explicitly provided configuration file does not exist.
    #[display(fmt = "configuration file {} does not exist", "_0.display()")]
    NotFound(#[error(ignore)] PathBuf),
}

/// Packaging configuration merged from the configuration file,
/// `PACK_`-prefixed environment variables and CLI arguments.
#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct ProjectConfig {
    /// Package identifier.
    #[serde(
        default,
        deserialize_with = "deserialize_pid",
        skip_serializing_if = "Option::is_none"
    )]
    pub pid: Option<String>,

    /// Input directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<PathBuf>,

    /// Output archive file or directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,

    /// Host name that maps the whole input directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// Explicit route list.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub map: Vec<RouteEntry>,

    /// Verbose logging.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub verbose: bool,
}

/// Accept package identifiers written both as strings and as numbers.
fn deserialize_pid<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    /// Visitor that stringifies integer package identifiers.
    struct PidVisitor;

    impl<'de> de::Visitor<'de> for PidVisitor {
        type Value = Option<String>;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("a package identifier")
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
            Ok(Some(value.to_owned()))
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<Self::Value, E> {
            Ok(Some(value.to_string()))
        }

        fn visit_i64<E: de::Error>(self, value: i64) -> Result<Self::Value, E> {
            Ok(Some(value.to_string()))
        }

        fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
            deserializer.deserialize_any(self)
        }
    }

    deserializer.deserialize_option(PidVisitor)
}

impl ProjectConfig {
    /// Load configuration, with `overrides` taking precedence over
    /// environment variables, which take precedence over `config_file`.
    ///
    /// Files with the `.json` extension are parsed as JSON, any other as TOML.
    pub(crate) fn load(
        config_file: Option<&Path>,
        overrides: ProjectConfig,
    ) -> Result<Self, ProjectConfigError> {
        let mut figment = Figment::new();

        if let Some(path) = config_file {
            if !path.is_file() {
                return Err(ProjectConfigError::NotFound(path.to_path_buf()));
            }

            figment = match path.extension().and_then(OsStr::to_str) {
                Some("json") => figment.merge(Json::file(path)),
                _ => figment.merge(Toml::file(path)),
            };
        }

        Ok(figment
            .merge(Env::prefixed("PACK_"))
            .merge(Serialized::defaults(overrides))
            .extract()?)
    }

    /// Directory that relative paths are resolved against.
    ///
    /// This is the configuration file directory, if one was used,
    /// or the current working directory otherwise.
    pub(crate) fn working_directory(config_file: Option<&Path>) -> Result<PathBuf, ProjectConfigError> {
        let cwd = env::current_dir()?;

        Ok(match config_file.and_then(Path::parent) {
            Some(parent) => cwd.join(parent),
            None => cwd,
        })
    }

    /// Convert into packaging arguments.
    pub(crate) fn into_pack_options(self) -> PackOptions {
        PackOptions {
            pid: self.pid.unwrap_or_default(),
            input: self.input,
            output: self.output,
            host: self.host,
            map: self.map,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use figment::Jail;

    use super::{ProjectConfig, ProjectConfigError};
    use crate::routes::RouteEntry;

    #[test]
    fn json_config_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "pack.json",
                r#"{
                    "pid": 100,
                    "input": "public",
                    "output": "dist/",
                    "map": [
                        { "from": "web", "to": "www.example.com" },
                        { "from": "admin", "to": "admin.example.com" }
                    ]
                }"#,
            )?;

            let config =
                ProjectConfig::load(Some(Path::new("pack.json")), ProjectConfig::default())
                    .unwrap();

            assert_eq!(config.pid.as_deref(), Some("100"));
            assert_eq!(config.input, Some(PathBuf::from("public")));
            assert_eq!(config.output, Some(PathBuf::from("dist/")));
            assert_eq!(config.host, None);
            assert_eq!(
                config.map,
                [
                    RouteEntry::new("web", "www.example.com"),
                    RouteEntry::new("admin", "admin.example.com")
                ]
            );
            assert!(!config.verbose);

            Ok(())
        });
    }

    #[test]
    fn toml_config_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "Pack.toml",
                r#"
                pid = "5"
                input = "public"
                host = "127.0.0.1:8080"
                verbose = true
                "#,
            )?;

            let config =
                ProjectConfig::load(Some(Path::new("Pack.toml")), ProjectConfig::default())
                    .unwrap();

            assert_eq!(config.pid.as_deref(), Some("5"));
            assert_eq!(config.host.as_deref(), Some("127.0.0.1:8080"));
            assert!(config.verbose);

            Ok(())
        });
    }

    #[test]
    fn cli_overrides_env_and_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "pack.json",
                r#"{ "pid": 1, "input": "from-file", "output": "file.zip" }"#,
            )?;
            jail.set_env("PACK_INPUT", "from-env");
            jail.set_env("PACK_HOST", "env.example.com");

            let overrides = ProjectConfig {
                pid: Some(String::from("2")),
                ..Default::default()
            };

            let config = ProjectConfig::load(Some(Path::new("pack.json")), overrides).unwrap();

            assert_eq!(config.pid.as_deref(), Some("2"));
            assert_eq!(config.input, Some(PathBuf::from("from-env")));
            assert_eq!(config.output, Some(PathBuf::from("file.zip")));
            assert_eq!(config.host.as_deref(), Some("env.example.com"));

            Ok(())
        });
    }

    #[test]
    fn missing_config_file() {
        Jail::expect_with(|_| {
            let result =
                ProjectConfig::load(Some(Path::new("missing.json")), ProjectConfig::default());

            assert!(matches!(result, Err(ProjectConfigError::NotFound(_))));

            Ok(())
        });
    }

    #[test]
    fn working_directory_follows_config_file() {
        Jail::expect_with(|_| {
            let cwd = std::env::current_dir().unwrap();

            assert_eq!(ProjectConfig::working_directory(None).unwrap(), cwd);
            assert_eq!(
                ProjectConfig::working_directory(Some(Path::new("config/pack.json"))).unwrap(),
                cwd.join("config")
            );
            assert_eq!(
                ProjectConfig::working_directory(Some(Path::new("pack.json"))).unwrap(),
                cwd.join("")
            );

            Ok(())
        });
    }

    #[test]
    fn into_pack_options() {
        let options = ProjectConfig {
            pid: Some(String::from("9")),
            input: Some(PathBuf::from("public")),
            output: None,
            host: Some(String::from("example.com")),
            map: Vec::new(),
            verbose: true,
        }
        .into_pack_options();

        assert_eq!(options.pid, "9");
        assert_eq!(options.input, Some(PathBuf::from("public")));
        assert_eq!(options.host.as_deref(), Some("example.com"));
        assert!(options.map.is_empty());
    }
}
