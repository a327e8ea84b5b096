//! Database driver seam.
//!
//! The collection core talks to the engine only through these traits.
//! [`duckdb::DuckDbConnector`] is the bundled engine.

pub mod duckdb;
#[cfg(test)]
pub(crate) mod test_utils;

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::cell::RawCell;
use crate::error::Result;

pub use self::duckdb::DuckDbConnector;

/// Session settings pinned on every connection before any query runs.
///
/// Settings are applied to the connection being opened, never to the
/// process environment, so collectors for different targets cannot affect
/// each other.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct SessionProfile {
    settings: BTreeMap<String, String>,
}

impl SessionProfile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a setting, replacing any earlier value for the same key.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }

    pub fn settings(&self) -> impl Iterator<Item = (&str, &str)> {
        self.settings.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.settings.is_empty()
    }
}

/// Opens sessions against a database engine.
pub trait Connector: Send + Sync {
    /// Engine name used in events and logs.
    fn name(&self) -> &'static str;

    /// Open one connection. Failures are `Error::ConnectFailed`.
    fn connect(&self, locator: &str, profile: &SessionProfile) -> Result<Box<dyn Session>>;

    /// Query returning one row with a `VERSION` column holding the engine
    /// version as a dotted string.
    fn version_query(&self) -> &str;
}

/// One open connection, exclusively owned by a collection cycle.
pub trait Session {
    /// Execute `sql` and hand the open cursor to `scan`.
    ///
    /// The cursor only lives for the duration of the callback. Prepare and
    /// execute failures are `Error::QueryFailed`; errors returned by `scan`
    /// are passed through unchanged.
    fn query(&mut self, sql: &str, scan: &mut dyn FnMut(&mut dyn Cursor) -> Result<()>)
        -> Result<()>;

    /// Release the connection.
    fn close(self: Box<Self>) -> Result<()>;
}

/// An open result set.
pub trait Cursor {
    /// Column names in driver order.
    fn columns(&self) -> &[String];

    /// Fetch the next row, one cell per column. Driver decode failures are
    /// `Error::RowScanFailed`.
    fn next_row(&mut self) -> Result<Option<Vec<RawCell>>>;
}
