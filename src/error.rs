//! Error types for metric collection.
//!
//! Cycle-aborting failures (`ConnectFailed`, `QueryFailed`, `RowScanFailed`,
//! `NoMatchingQueryVariant`, `CyclePanicked`) surface to the caller of a
//! collection cycle. `UnsupportedColumnType`, `CoercionFailed` and
//! `VersionParseFailed` are contained where they happen and only logged.

use std::fmt;

/// Result type alias for collection operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for metric collection.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// The connection could not be opened.
    ConnectFailed { locator: String, message: String },
    /// The SQL statement could not be prepared or executed.
    QueryFailed { message: String },
    /// The driver could not decode a row of the result set.
    RowScanFailed { row: usize, message: String },
    /// A cell's runtime kind has no normalization rule.
    UnsupportedColumnType { column: String, kind: String },
    /// A schema field could not be derived from the cell's value.
    CoercionFailed {
        field: String,
        target: String,
        value: String,
    },
    /// A version string could not be parsed.
    VersionParseFailed { version: String },
    /// None of the version-gated query variants matched the engine version.
    NoMatchingQueryVariant { version: String },
    /// The collection cycle panicked.
    CyclePanicked { message: String },
    /// The configuration is invalid.
    Config { message: String },
}

impl Error {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
        }
    }

    pub(crate) fn query(err: impl fmt::Display) -> Self {
        Error::QueryFailed {
            message: err.to_string(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ConnectFailed { locator, message } => {
                write!(f, "connect to '{locator}' failed: {message}")
            }
            Error::QueryFailed { message } => write!(f, "query failed: {message}"),
            Error::RowScanFailed { row, message } => {
                write!(f, "scan of row {row} failed: {message}")
            }
            Error::UnsupportedColumnType { column, kind } => {
                write!(f, "{column}: unsupported column type {kind}")
            }
            Error::CoercionFailed {
                field,
                target,
                value,
            } => {
                write!(f, "{field}: cannot convert '{value}' to {target}")
            }
            Error::VersionParseFailed { version } => {
                write!(f, "cannot parse version '{version}'")
            }
            Error::NoMatchingQueryVariant { version } => {
                write!(f, "no query variant matches engine version '{version}'")
            }
            Error::CyclePanicked { message } => {
                write!(f, "collection cycle panicked: {message}")
            }
            Error::Config { message } => write!(f, "invalid configuration: {message}"),
        }
    }
}

impl std::error::Error for Error {}
