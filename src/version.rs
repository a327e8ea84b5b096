//! Dotted version strings and range matching.
//!
//! Only the first two components (major, minor) take part in comparisons.
//! Tokens that are not non-negative integers count as 0, and a missing
//! minor component counts as 0, so `"9999"` behaves like `"9999.0"`.

use serde::Deserialize;

use crate::error::{Error, Result};

/// The (major, minor) part of a dotted version string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
}

impl Version {
    /// Parse a dotted version string such as `"12.2.0.1"`.
    ///
    /// Fails only for an empty string.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::VersionParseFailed {
                version: s.to_string(),
            });
        }

        let mut parts = s.split('.').map(|p| p.trim().parse::<u64>().unwrap_or(0));
        let major = parts.next().unwrap_or(0);
        let minor = parts.next().unwrap_or(0);
        Ok(Version { major, minor })
    }
}

/// An inclusive `[low, high]` version range.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct VersionRange {
    pub low: String,
    pub high: String,
}

impl VersionRange {
    pub fn new(low: impl Into<String>, high: impl Into<String>) -> Self {
        Self {
            low: low.into(),
            high: high.into(),
        }
    }

    /// Returns true if `actual` falls inside this range.
    pub fn contains(&self, actual: &str) -> bool {
        matches(actual, &self.low, &self.high)
    }
}

/// Returns true iff `low <= actual <= high` comparing (major, minor).
///
/// Any empty or unparseable input yields `false`.
pub fn matches(actual: &str, low: &str, high: &str) -> bool {
    let parsed = Version::parse(actual)
        .and_then(|a| Ok((a, Version::parse(low)?, Version::parse(high)?)));
    match parsed {
        Ok((actual, low, high)) => low <= actual && actual <= high,
        Err(e) => {
            tracing::debug!("version match treated as no match: {e}");
            false
        }
    }
}
