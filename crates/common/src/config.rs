use std::path::PathBuf;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::Deserialize;

#[cfg(feature = "logging")]
use tracing_subscriber::filter::LevelFilter;

/// Implementation of [`serde`]'s deserializer for [`FromStr`] types.
///
/// [`FromStr`]: std::str::FromStr
#[cfg(feature = "logging")]
fn deserialize_from_str<'de, T, D>(deserializer: D) -> Result<T, D::Error>
where
    T: std::str::FromStr,
    T::Err: std::error::Error,
    D: serde::de::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    std::str::FromStr::from_str(&s).map_err(serde::de::Error::custom)
}

/// Logging configuration.
#[cfg(feature = "logging")]
#[derive(Deserialize)]
pub struct Logging {
    /// Log level.
    #[serde(deserialize_with = "deserialize_from_str")]
    pub level: LevelFilter,
}

#[cfg(feature = "logging")]
impl Logging {
    /// Logging configuration used when the user asked for verbose output.
    pub fn verbose() -> Self {
        Self {
            level: LevelFilter::TRACE,
        }
    }
}

#[cfg(feature = "logging")]
impl Default for Logging {
    fn default() -> Self {
        Self {
            level: LevelFilter::INFO,
        }
    }
}

/// Default base URL of the package store API.
pub fn default_store_url() -> String {
    String::from("https://store.abcwallet.com/api/open")
}

/// Package store account configuration.
///
/// Loaded exclusively from `DS_`-prefixed environment variables.
#[derive(Deserialize)]
pub struct Store {
    /// Base URL of the store API.
    #[serde(default = "default_store_url")]
    pub base_url: String,

    /// Account email.
    #[serde(default)]
    pub email: Option<String>,

    /// Account password.
    #[serde(default)]
    pub password: Option<String>,
}

impl Store {
    /// Load store configuration from `DS_BASE_URL`, `DS_EMAIL` and `DS_PASSWORD`.
    pub fn from_env() -> Result<Self, figment::Error> {
        Figment::new().merge(Env::prefixed("DS_")).extract()
    }

    /// Base URL with a guaranteed trailing slash.
    pub fn normalized_base_url(&self) -> String {
        if self.base_url.ends_with('/') {
            self.base_url.clone()
        } else {
            format!("{}/", self.base_url)
        }
    }
}

/// General configuration.
#[derive(Deserialize, Default)]
pub struct Config {
    /// Logging configuration.
    #[cfg(feature = "logging")]
    #[serde(default)]
    pub logging: Logging,
}

impl Config {
    /// Create new config using default configuration file or environment variables.
    ///
    /// See [`Env`] for more details on how to use environment variables configuration.
    ///
    /// [`Env`]: figment::providers::Env
    pub fn new(path: Option<PathBuf>) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path.unwrap_or(PathBuf::from("Packager.toml"))))
            .merge(Env::prefixed("PACKAGER_").split("_"))
            .extract()
    }
}
