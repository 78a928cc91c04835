//! # Alias resolution
//!
//! Every packaged file is stored under a single canonical archive path
//! (`<pid>/<to>/<relative path>`). Clients that resolve friendly URLs
//! also need to find the file when the request omits `index.html`, the
//! `.html` extension or the trailing slash. Instead of listing directories
//! at runtime, consumers look up such URLs in the alias manifest that is
//! packaged as `<pid>/config.json`.
//!
//! For a canonical path `1/site/docs/index.html` the following aliases
//! are registered:
//!
//! | alias                  | rule                           |
//! |------------------------|--------------------------------|
//! | `1/site/docs/`         | `index.html` suffix stripped   |
//! | `1/site/docs`          | `/index.html` suffix stripped  |
//! | `1/site/docs/index`    | `.html` suffix stripped        |
//! | `1/site/docs/index.html` | identity                     |
//!
//! # Collision policy
//!
//! Writes produced for a single route are kept in file enumeration order.
//! Route writes are merged into the manifest in route table order, and
//! a later write for the same alias replaces an earlier one. Routes with
//! overlapping destination prefixes are therefore resolved in favour of
//! the last route listed.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;

use crate::{collector::CollectedFile, routes::RouteEntry};

/// Join archive path segments with forward slashes.
///
/// Empty and `.` segments are dropped, so an empty route destination
/// maps files directly under the package identifier.
pub(crate) fn join_archive_path<'a>(parts: impl IntoIterator<Item = &'a str>) -> String {
    parts
        .into_iter()
        .flat_map(|part| part.split(['/', '\\']))
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// Aliases computed for a single collected file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ResolvedFile {
    /// Canonical archive path of the file.
    pub canonical: String,

    /// Alias strings in registration order, the last one is always the identity alias.
    pub aliases: Vec<String>,
}

/// Computes canonical archive paths and aliases for files of a single route.
pub(crate) struct AliasResolver<'a> {
    /// Package identifier used as the first archive path segment.
    pid: &'a str,

    /// Route that produced the files.
    route: &'a RouteEntry,
}

impl<'a> AliasResolver<'a> {
    /// Create a resolver for files of `route` packaged under `pid`.
    pub(crate) fn new(pid: &'a str, route: &'a RouteEntry) -> Self {
        Self { pid, route }
    }

    /// Archive prefix under which the route directory is mirrored.
    pub(crate) fn archive_prefix(&self) -> String {
        join_archive_path([self.pid, self.route.to.as_str()])
    }

    /// Canonical archive path of a file relative to the route source directory.
    pub(crate) fn canonical_path(&self, relative_path: &str) -> String {
        join_archive_path([self.pid, self.route.to.as_str(), relative_path])
    }

    /// Compute the canonical path and every alias of a single file.
    pub(crate) fn resolve(&self, file: &CollectedFile) -> ResolvedFile {
        let canonical = self.canonical_path(&file.relative_path);
        let mut aliases = Vec::with_capacity(4);

        if let Some(directory) = canonical.strip_suffix("index.html") {
            // /path/home/ => /path/home/index.html
            aliases.push(directory.to_owned());

            // /path/home => /path/home/index.html
            if let Some(directory) = canonical.strip_suffix("/index.html") {
                aliases.push(directory.to_owned());
            }
        }

        if let Some(page) = canonical.strip_suffix(".html") {
            // /path/home => /path/home.html
            aliases.push(page.to_owned());

            // Only reachable for files literally named `.html`, which are
            // never collected. Kept for manifest compatibility.
            if let Some(page) = canonical.strip_suffix("/.html") {
                aliases.push(page.to_owned());
            }
        }

        aliases.push(canonical.clone());

        ResolvedFile { canonical, aliases }
    }

    /// Resolve all files of the route into an ordered list of manifest writes.
    pub(crate) fn resolve_all(&self, files: &[CollectedFile]) -> AliasWrites {
        let mut writes = AliasWrites::default();

        for file in files {
            let ResolvedFile { canonical, aliases } = self.resolve(file);

            for alias in aliases {
                writes.push(alias, canonical.clone());
            }
        }

        writes
    }
}

/// Ordered alias writes produced by a single route.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct AliasWrites(Vec<(String, String)>);

impl AliasWrites {
    /// Record a single `alias` to `canonical` write.
    fn push(&mut self, alias: String, canonical: String) {
        self.0.push((alias, canonical));
    }

    /// Count of recorded writes.
    pub(crate) fn len(&self) -> usize {
        self.0.len()
    }
}

/// Mapping of alias strings to canonical archive paths.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub(crate) struct AliasManifest(BTreeMap<String, String>);

/// JSON document stored as the package `config.json` entry.
#[derive(Serialize)]
struct PackageConfig<'a> {
    /// Alias manifest.
    map: &'a AliasManifest,
}

impl AliasManifest {
    /// Apply route writes in order, later writes replacing earlier ones.
    ///
    /// Returns the number of aliases that were redirected to a different
    /// canonical path by these writes.
    pub(crate) fn merge(&mut self, writes: AliasWrites) -> usize {
        let mut redirected = 0;

        for (alias, canonical) in writes.0 {
            if let Some(previous) = self.0.get(&alias).filter(|previous| **previous != canonical) {
                debug!(%alias, %previous, %canonical, "alias redirected");
                redirected += 1;
            }

            self.0.insert(alias, canonical);
        }

        redirected
    }

    /// Canonical path registered for `alias`.
    #[cfg(test)]
    pub(crate) fn get(&self, alias: &str) -> Option<&str> {
        self.0.get(alias).map(String::as_str)
    }

    /// Count of unique aliases.
    pub(crate) fn len(&self) -> usize {
        self.0.len()
    }

    /// Serialize the manifest as a pretty-printed `{"map": {...}}` document.
    pub(crate) fn to_config_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec_pretty(&PackageConfig { map: self })
    }
}
