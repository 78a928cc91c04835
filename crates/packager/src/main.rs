//! # Packager
//!
//! Offline packaging of static web sites.
//!
//! The input directory is split into routes, every route is mirrored into
//! a ZIP archive under the `<pid>/<route prefix>` directory, and a
//! `config.json` alias manifest is written next to the mirrored files, so that
//! friendly URLs (`/about/`, `/about`) can be resolved to concrete archive
//! entries (`/about/index.html`) without listing directories.
//!
//! Created archives can then be uploaded to the package store with the
//! `deploy` subcommand.

#![deny(missing_docs)]
#![deny(clippy::missing_docs_in_private_items)]

use clap::Parser;
use commands::{Cli, Commands};

/// Alias resolution and the alias manifest.
mod alias;

/// ZIP archive writer.
mod archiver;

/// Eligible file discovery.
mod collector;

/// CLI subcommands.
mod commands;

/// CLI-specific project configuration.
mod config;

/// Packaging flow orchestration.
mod packager;

/// User-facing progress reporting.
mod reporter;

/// Routing rules.
mod routes;

/// Package store client.
mod store;

/// CLI entrypoint.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Pack(args) => commands::pack(args).await?,
        Commands::Create(args) => commands::create(args).await?,
        Commands::Deploy(args) => commands::deploy(args).await?,
    }

    Ok(())
}
