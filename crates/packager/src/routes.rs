use std::path::{Component, Path};

use derive_more::{Display, Error};
use serde::{Deserialize, Serialize};

/// Route table validation errors.
#[derive(Debug, Display, Error, PartialEq, Eq)]
pub(crate) enum RouteError {
    /// Neither a host nor an explicit route list was provided.
    #[display(fmt = "host and map can not be both empty")]
    Empty,

    /// Route source path escapes the input directory.
    #[display(fmt = "route source \"{}\" must be a relative path inside the input directory", _0)]
    InvalidSource(#[error(ignore)] String),

    /// Route destination contains parent directory segments.
    #[display(fmt = "route destination \"{}\" must not contain \"..\" segments", _0)]
    InvalidDestination(#[error(ignore)] String),
}

/// A single source sub-directory to archive prefix mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct RouteEntry {
    /// Directory relative to the input root.
    pub from: String,

    /// Archive-internal destination prefix, empty for the package root.
    pub to: String,
}

impl RouteEntry {
    /// Create a new route entry.
    pub(crate) fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }

    /// Check that the entry stays inside both the input directory and the archive.
    fn validate(&self) -> Result<(), RouteError> {
        let escapes_input = Path::new(&self.from)
            .components()
            .any(|component| !matches!(component, Component::Normal(_) | Component::CurDir));

        if escapes_input {
            return Err(RouteError::InvalidSource(self.from.clone()));
        }

        if self.to.split(['/', '\\']).any(|segment| segment == "..") {
            return Err(RouteError::InvalidDestination(self.to.clone()));
        }

        Ok(())
    }
}

/// Ordered list of route entries.
///
/// Entries are independent of each other, the order only affects
/// the order in which diagnostics are reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RouteTable {
    /// Validated entries in insertion order.
    entries: Vec<RouteEntry>,
}

impl RouteTable {
    /// Resolve the route table from the user-provided routing source.
    ///
    /// A non-empty `host` always wins over an explicit route list and
    /// is converted into a single `{ from: ".", to: host }` entry.
    pub(crate) fn resolve(host: Option<&str>, map: &[RouteEntry]) -> Result<Self, RouteError> {
        match host.filter(|host| !host.is_empty()) {
            Some(host) => Self::from_host(host),
            None => Self::from_entries(map.to_vec()),
        }
    }

    /// Create a table with a single entry mirroring the whole input under `host`.
    pub(crate) fn from_host(host: &str) -> Result<Self, RouteError> {
        Self::from_entries(vec![RouteEntry::new(".", host)])
    }

    /// Create a table from an explicit list of entries.
    pub(crate) fn from_entries(entries: Vec<RouteEntry>) -> Result<Self, RouteError> {
        if entries.is_empty() {
            return Err(RouteError::Empty);
        }

        for entry in &entries {
            entry.validate()?;
        }

        Ok(Self { entries })
    }

    /// Entries in insertion order.
    pub(crate) fn entries(&self) -> &[RouteEntry] {
        &self.entries
    }

    /// Count of entries.
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::{RouteEntry, RouteError, RouteTable};

    #[test]
    fn host_converted_to_single_entry() {
        let table = RouteTable::resolve(Some("127.0.0.1:8080"), &[]).unwrap();

        assert_eq!(table.entries(), &[RouteEntry::new(".", "127.0.0.1:8080")]);
    }

    #[test]
    fn host_takes_precedence() {
        let map = [RouteEntry::new("public", "site")];
        let table = RouteTable::resolve(Some("example.com"), &map).unwrap();

        assert_eq!(table.entries(), &[RouteEntry::new(".", "example.com")]);
    }

    #[test]
    fn explicit_routes_keep_order() {
        let map = [
            RouteEntry::new("b", "second"),
            RouteEntry::new("a", "first"),
        ];
        let table = RouteTable::resolve(Some(""), &map).unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(table.entries(), &map);
    }

    #[test]
    fn empty_routing_source() {
        assert_eq!(RouteTable::resolve(None, &[]), Err(RouteError::Empty));
        assert_eq!(RouteTable::resolve(Some(""), &[]), Err(RouteError::Empty));
    }

    #[test]
    fn source_outside_input() {
        let result = RouteTable::from_entries(vec![RouteEntry::new("../secrets", "site")]);
        assert_eq!(
            result,
            Err(RouteError::InvalidSource(String::from("../secrets")))
        );

        let result = RouteTable::from_entries(vec![RouteEntry::new("/etc", "site")]);
        assert_eq!(result, Err(RouteError::InvalidSource(String::from("/etc"))));
    }

    #[test]
    fn destination_with_parent_segments() {
        let result = RouteTable::from_entries(vec![RouteEntry::new(".", "site/../../x")]);
        assert_eq!(
            result,
            Err(RouteError::InvalidDestination(String::from("site/../../x")))
        );
    }

    #[test]
    fn empty_destination_is_root() {
        let table = RouteTable::from_entries(vec![RouteEntry::new("dist", "")]).unwrap();
        assert_eq!(table.entries()[0].to, "");
    }
}
