//! Cell normalization.
//!
//! Drivers hand over each column value as a [`RawCell`]; [`normalize`] turns
//! it into one of the [`NormalizedValue`] variants carried to the schema
//! layer.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};

use crate::error::{Error, Result};

/// A single column value as returned by a driver.
#[derive(Debug, Clone, PartialEq)]
pub enum RawCell {
    Null,
    Text(String),
    Int32(i32),
    Int64(i64),
    Float(f64),
    /// Exact numeric delivered as decimal text (e.g. `NUMBER`, `DECIMAL`).
    Number(String),
    Boolean(bool),
    Bytes(Vec<u8>),
    Timestamp(DateTime<Utc>),
    /// A value the driver could read but that has no normalization rule.
    Unsupported { kind: String },
}

impl RawCell {
    pub fn is_null(&self) -> bool {
        matches!(self, RawCell::Null)
    }

    /// Short name of the runtime kind, used in diagnostics.
    pub fn kind(&self) -> &str {
        match self {
            RawCell::Null => "null",
            RawCell::Text(_) => "text",
            RawCell::Int32(_) => "int32",
            RawCell::Int64(_) => "int64",
            RawCell::Float(_) => "float",
            RawCell::Number(_) => "number",
            RawCell::Boolean(_) => "boolean",
            RawCell::Bytes(_) => "bytes",
            RawCell::Timestamp(_) => "timestamp",
            RawCell::Unsupported { kind } => kind,
        }
    }
}

/// A normalized column value.
#[derive(Debug, Clone, PartialEq)]
pub enum NormalizedValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Timestamp(DateTime<Utc>),
}

impl NormalizedValue {
    /// Textual form of the value, as used for string fields.
    pub fn to_text(&self) -> String {
        match self {
            NormalizedValue::Text(s) => s.clone(),
            NormalizedValue::Integer(n) => n.to_string(),
            NormalizedValue::Float(n) => n.to_string(),
            NormalizedValue::Boolean(b) => b.to_string(),
            NormalizedValue::Timestamp(ts) => format_timestamp(ts),
        }
    }
}

impl Serialize for NormalizedValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            NormalizedValue::Text(s) => serializer.serialize_str(s),
            NormalizedValue::Integer(n) => serializer.serialize_i64(*n),
            NormalizedValue::Float(n) => serializer.serialize_f64(*n),
            NormalizedValue::Boolean(b) => serializer.serialize_bool(*b),
            NormalizedValue::Timestamp(ts) => serializer.serialize_str(&format_timestamp(ts)),
        }
    }
}

/// Render a timestamp as `YYYY-MM-DDTHH:MM:SS.mmmZ`.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Normalize one non-null cell.
///
/// `column` is only used to label the error for unsupported kinds.
pub fn normalize(column: &str, cell: RawCell) -> Result<NormalizedValue> {
    match cell {
        RawCell::Text(s) => Ok(NormalizedValue::Text(s)),
        RawCell::Int32(n) => Ok(NormalizedValue::Integer(n.into())),
        RawCell::Int64(n) => Ok(NormalizedValue::Integer(n)),
        RawCell::Float(n) => Ok(NormalizedValue::Float(n)),
        RawCell::Number(s) => Ok(normalize_number(s)),
        RawCell::Boolean(b) => Ok(NormalizedValue::Boolean(b)),
        RawCell::Bytes(b) => Ok(NormalizedValue::Text(
            String::from_utf8_lossy(&b).into_owned(),
        )),
        RawCell::Timestamp(ts) => Ok(NormalizedValue::Timestamp(ts)),
        RawCell::Null | RawCell::Unsupported { .. } => Err(Error::UnsupportedColumnType {
            column: column.to_string(),
            kind: cell.kind().to_string(),
        }),
    }
}

// Integral decimals become integers, the rest floats. Text that is not a
// number at all is passed through untouched.
fn normalize_number(s: String) -> NormalizedValue {
    let trimmed = s.trim();
    if let Ok(n) = trimmed.parse::<i64>() {
        return NormalizedValue::Integer(n);
    }
    if let Some((int_part, frac)) = trimmed.split_once('.') {
        if !frac.is_empty() && frac.bytes().all(|b| b == b'0') {
            if let Ok(n) = int_part.parse::<i64>() {
                return NormalizedValue::Integer(n);
            }
        }
    }
    match trimmed.parse::<f64>() {
        Ok(n) if n.is_finite() => NormalizedValue::Float(n),
        _ => NormalizedValue::Text(s),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_normalize_scalars() {
        assert_eq!(
            normalize("A", RawCell::Text("OPEN".to_string())).unwrap(),
            NormalizedValue::Text("OPEN".to_string())
        );
        assert_eq!(
            normalize("A", RawCell::Int32(8192)).unwrap(),
            NormalizedValue::Integer(8192)
        );
        assert_eq!(
            normalize("A", RawCell::Int64(-5)).unwrap(),
            NormalizedValue::Integer(-5)
        );
        assert_eq!(
            normalize("A", RawCell::Boolean(true)).unwrap(),
            NormalizedValue::Boolean(true)
        );
    }

    #[test]
    fn test_normalize_bytes_as_text() {
        assert_eq!(
            normalize("A", RawCell::Bytes(b"ONLINE".to_vec())).unwrap(),
            NormalizedValue::Text("ONLINE".to_string())
        );
    }

    #[test]
    fn test_normalize_number_text() {
        assert_eq!(
            normalize("A", RawCell::Number("42".to_string())).unwrap(),
            NormalizedValue::Integer(42)
        );
        assert_eq!(
            normalize("A", RawCell::Number("42.000".to_string())).unwrap(),
            NormalizedValue::Integer(42)
        );
        assert_eq!(
            normalize("A", RawCell::Number("12.5".to_string())).unwrap(),
            NormalizedValue::Float(12.5)
        );
        // Too large for i64, still numeric
        assert_eq!(
            normalize("A", RawCell::Number("18446744073709551616".to_string())).unwrap(),
            NormalizedValue::Float(18446744073709551616.0)
        );
    }

    #[test]
    fn test_non_finite_number_text_stays_text() {
        for token in ["NaN", "inf", "-Infinity"] {
            assert_eq!(
                normalize("A", RawCell::Number(token.to_string())).unwrap(),
                NormalizedValue::Text(token.to_string())
            );
        }
    }

    #[test]
    fn test_normalize_unsupported() {
        let err = normalize(
            "PAYLOAD",
            RawCell::Unsupported {
                kind: "LIST".to_string(),
            },
        )
        .unwrap_err();
        assert_eq!(
            err,
            Error::UnsupportedColumnType {
                column: "PAYLOAD".to_string(),
                kind: "LIST".to_string(),
            }
        );
    }

    #[test]
    fn test_timestamp_text_form() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        let value = normalize("STARTUP_TIME", RawCell::Timestamp(ts)).unwrap();
        assert_eq!(value.to_text(), "2024-03-09T14:05:07.000Z");
        assert_eq!(
            serde_json::to_value(&value).unwrap(),
            serde_json::json!("2024-03-09T14:05:07.000Z")
        );
    }
}
