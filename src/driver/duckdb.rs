//! DuckDB engine support.

use std::path::Path;

use ::duckdb::types::{TimeUnit, Value};
use ::duckdb::{AccessMode, Config, Connection};
use chrono::{DateTime, Utc};

use super::{Connector, Cursor, Session, SessionProfile};
use crate::cell::RawCell;
use crate::error::{Error, Result};

/// Locator that opens a private in-memory database.
pub const MEMORY_LOCATOR: &str = ":memory:";

const VERSION_QUERY: &str = "SELECT ltrim(library_version, 'v') AS version FROM pragma_version()";

/// Opens DuckDB database files.
#[derive(Debug, Clone)]
pub struct DuckDbConnector {
    /// Open database files read-only.
    pub read_only: bool,
    /// Create the database file if it does not exist.
    pub create_if_missing: bool,
    /// Report column names upper-cased.
    pub uppercase_columns: bool,
}

impl Default for DuckDbConnector {
    fn default() -> Self {
        Self {
            read_only: false,
            create_if_missing: false,
            uppercase_columns: true,
        }
    }
}

impl DuckDbConnector {
    fn open(&self, locator: &str, profile: &SessionProfile) -> ::duckdb::Result<Connection> {
        let mut config = Config::default();
        for (key, value) in profile.settings() {
            config = config.with(key, value)?;
        }

        if locator == MEMORY_LOCATOR {
            return Connection::open_in_memory_with_flags(config);
        }
        if self.read_only {
            config = config.access_mode(AccessMode::ReadOnly)?;
        }
        Connection::open_with_flags(locator, config)
    }
}

impl Connector for DuckDbConnector {
    fn name(&self) -> &'static str {
        "duckdb"
    }

    fn connect(&self, locator: &str, profile: &SessionProfile) -> Result<Box<dyn Session>> {
        let connect_err = |message: String| Error::ConnectFailed {
            locator: locator.to_string(),
            message,
        };

        if locator.is_empty() {
            return Err(connect_err("empty locator".to_string()));
        }
        if locator != MEMORY_LOCATOR && !self.create_if_missing && !Path::new(locator).exists() {
            return Err(connect_err("database not found".to_string()));
        }

        let conn = self
            .open(locator, profile)
            .map_err(|e| connect_err(e.to_string()))?;
        tracing::debug!("opened duckdb session on {locator}");

        Ok(Box::new(DuckDbSession {
            conn,
            uppercase_columns: self.uppercase_columns,
        }))
    }

    fn version_query(&self) -> &str {
        VERSION_QUERY
    }
}

/// An open DuckDB connection.
pub struct DuckDbSession {
    conn: Connection,
    uppercase_columns: bool,
}

impl Session for DuckDbSession {
    fn query(
        &mut self,
        sql: &str,
        scan: &mut dyn FnMut(&mut dyn Cursor) -> Result<()>,
    ) -> Result<()> {
        let mut stmt = self.conn.prepare(sql).map_err(Error::query)?;
        let rows = stmt.query([]).map_err(Error::query)?;

        let columns = extract_column_names(&rows, self.uppercase_columns);
        let mut cursor = DuckDbCursor {
            rows,
            columns,
            row_index: 0,
        };
        scan(&mut cursor)
    }

    fn close(self: Box<Self>) -> Result<()> {
        let session = *self;
        session.conn.close().map_err(|(_, e)| Error::QueryFailed {
            message: format!("close failed: {e}"),
        })
    }
}

/// Extract column names from a DuckDB result set.
fn extract_column_names(rows: &::duckdb::Rows<'_>, uppercase: bool) -> Vec<String> {
    let Some(stmt) = rows.as_ref() else {
        return Vec::new();
    };
    (0..stmt.column_count())
        .map(|i| {
            let name = stmt.column_name(i).map_or("?".to_string(), |s| s.to_string());
            if uppercase {
                name.to_uppercase()
            } else {
                name
            }
        })
        .collect()
}

struct DuckDbCursor<'stmt> {
    rows: ::duckdb::Rows<'stmt>,
    columns: Vec<String>,
    row_index: usize,
}

impl Cursor for DuckDbCursor<'_> {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn next_row(&mut self) -> Result<Option<Vec<RawCell>>> {
        let row_index = self.row_index;
        let scan_err = |e: ::duckdb::Error| Error::RowScanFailed {
            row: row_index,
            message: e.to_string(),
        };

        let Some(row) = self.rows.next().map_err(scan_err)? else {
            return Ok(None);
        };
        self.row_index += 1;

        let mut cells = Vec::with_capacity(self.columns.len());
        for i in 0..self.columns.len() {
            let value: Value = row.get(i).map_err(scan_err)?;
            cells.push(value_to_cell(value));
        }
        Ok(Some(cells))
    }
}

/// Convert a DuckDB value to a driver-neutral cell.
pub(crate) fn value_to_cell(value: Value) -> RawCell {
    match value {
        Value::Null => RawCell::Null,
        Value::Boolean(b) => RawCell::Boolean(b),
        Value::TinyInt(n) => RawCell::Int32(n.into()),
        Value::SmallInt(n) => RawCell::Int32(n.into()),
        Value::Int(n) => RawCell::Int32(n),
        Value::BigInt(n) => RawCell::Int64(n),
        Value::HugeInt(n) => match i64::try_from(n) {
            Ok(n64) => RawCell::Int64(n64),
            Err(_) => RawCell::Number(n.to_string()),
        },
        Value::UTinyInt(n) => RawCell::Int32(n.into()),
        Value::USmallInt(n) => RawCell::Int32(n.into()),
        Value::UInt(n) => RawCell::Int64(n.into()),
        Value::UBigInt(n) => match i64::try_from(n) {
            Ok(n64) => RawCell::Int64(n64),
            Err(_) => RawCell::Number(n.to_string()),
        },
        Value::Float(n) => RawCell::Float(n.into()),
        Value::Double(n) => RawCell::Float(n),
        Value::Decimal(d) => RawCell::Number(d.to_string()),
        Value::Text(s) => RawCell::Text(s),
        Value::Enum(s) => RawCell::Text(s),
        Value::Blob(b) => RawCell::Bytes(b),
        Value::Timestamp(unit, v) => match timestamp_from_unit(unit, v) {
            Some(ts) => RawCell::Timestamp(ts),
            None => RawCell::Unsupported {
                kind: format!("TIMESTAMP out of range ({v})"),
            },
        },
        Value::Date32(days) => match DateTime::from_timestamp(i64::from(days) * 86_400, 0) {
            Some(ts) => RawCell::Timestamp(ts),
            None => RawCell::Unsupported {
                kind: format!("DATE out of range ({days})"),
            },
        },
        other => RawCell::Unsupported {
            kind: value_kind(&other).to_string(),
        },
    }
}

fn timestamp_from_unit(unit: TimeUnit, v: i64) -> Option<DateTime<Utc>> {
    match unit {
        TimeUnit::Second => DateTime::from_timestamp(v, 0),
        TimeUnit::Millisecond => DateTime::from_timestamp_millis(v),
        TimeUnit::Microsecond => DateTime::from_timestamp_micros(v),
        TimeUnit::Nanosecond => Some(DateTime::from_timestamp_nanos(v)),
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Time64(..) => "TIME",
        Value::Interval { .. } => "INTERVAL",
        Value::List(_) => "LIST",
        Value::Struct(_) => "STRUCT",
        Value::Array(_) => "ARRAY",
        Value::Map(_) => "MAP",
        Value::Union(_) => "UNION",
        _ => "UNKNOWN",
    }
}
