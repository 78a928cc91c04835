/// `deploy` subcommand.
mod deploy;

/// `pack` and legacy `create` subcommands.
mod pack;

pub(crate) use deploy::deploy;
pub(crate) use pack::{create, pack};

use std::{path::PathBuf, time::Duration};

use clap::{Args, Parser, Subcommand};
use common::config::{Config, Logging};
use indicatif::ProgressBar;

use crate::reporter::{Reporter, TracingReporter};

/// CLI configuration.
#[derive(Parser)]
#[command(about)]
pub(crate) struct Cli {
    /// Selected subcommand.
    #[command(subcommand)]
    pub command: Commands,
}

/// Supported subcommands.
#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Create an offline package from a static web site directory.
    Pack(Pack),

    /// Upload an offline package to the package store.
    Deploy(Deploy),

    /// Same as `pack`, but relative paths always resolve against the working directory.
    #[command(hide = true)]
    Create(Pack),
}

/// `pack` subcommand configuration.
#[derive(Args)]
pub struct Pack {
    /// Package identifier, a positive integer.
    #[arg(short, long)]
    pid: Option<String>,

    /// Static web site directory.
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Archive file path, or a directory path ending with a path separator.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Host name that maps the whole input directory.
    #[arg(short = 'H', long)]
    host: Option<String>,

    /// JSON or TOML configuration file, which may also contain an explicit route map.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print detailed logs instead of a progress spinner.
    #[arg(short, long)]
    verbose: bool,
}

/// `deploy` subcommand configuration.
#[derive(Args)]
pub struct Deploy {
    /// Package identifier, a positive integer.
    #[arg(short, long)]
    pid: Option<String>,

    /// Archive file path.
    ///
    /// Defaults to the output path of the configuration file.
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// JSON or TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print detailed logs instead of a progress spinner.
    #[arg(short, long)]
    verbose: bool,
}

/// Initialize logging, raising the log level to the most detailed one if `verbose` is set.
fn init_logging(verbose: bool) -> Result<(), figment::Error> {
    let mut config = Config::new(None)?;

    if verbose {
        config.logging = Logging::verbose();
    }

    common::logging::init(&config.logging);

    Ok(())
}

/// Progress reporter for the current invocation.
fn reporter(verbose: bool) -> Box<dyn Reporter> {
    if verbose {
        return Box::new(TracingReporter);
    }

    let pg = ProgressBar::new_spinner();
    pg.enable_steady_tick(Duration::from_millis(150));

    Box::new(pg)
}
