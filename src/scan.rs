//! Result-set scanning.
//!
//! [`scan`] runs a query whose column set is only known at runtime and
//! returns every row as a [`NormalizedRow`] keyed by column name.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::cell::{normalize, NormalizedValue};
use crate::driver::Session;
use crate::error::Result;

/// One result row, keyed by column name as reported by the driver.
///
/// Null cells and cells that could not be normalized have no key.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct NormalizedRow(BTreeMap<String, NormalizedValue>);

impl NormalizedRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, column: &str) -> Option<&NormalizedValue> {
        self.0.get(column)
    }

    pub fn insert(&mut self, column: impl Into<String>, value: NormalizedValue) {
        self.0.insert(column.into(), value);
    }

    pub fn contains(&self, column: &str) -> bool {
        self.0.contains_key(column)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &NormalizedValue)> {
        self.0.iter()
    }
}

impl<K: Into<String>> FromIterator<(K, NormalizedValue)> for NormalizedRow {
    fn from_iter<I: IntoIterator<Item = (K, NormalizedValue)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

/// Execute `sql` on `session` and return all rows, fully materialized.
///
/// A query or row-level driver failure aborts the whole scan and no rows
/// are returned. Cells of an unsupported kind are dropped with a warning
/// and the rest of the row is kept. When the driver reports the same
/// column name twice, the later column wins.
pub fn scan(session: &mut dyn Session, sql: &str) -> Result<Vec<NormalizedRow>> {
    tracing::debug!("executing query: {}", sql.trim());

    let mut rows = Vec::new();
    session.query(sql, &mut |cursor| {
        let columns = cursor.columns().to_vec();
        while let Some(cells) = cursor.next_row()? {
            let mut row = NormalizedRow::new();
            for (column, cell) in columns.iter().zip(cells) {
                if cell.is_null() {
                    continue;
                }
                match normalize(column, cell) {
                    Ok(value) => row.insert(column.as_str(), value),
                    Err(e) => tracing::warn!("dropping cell in row {}: {e}", rows.len()),
                }
            }
            rows.push(row);
        }
        Ok(())
    })?;

    tracing::debug!("query returned {} rows", rows.len());
    Ok(rows)
}
