//! Declarative field mapping from normalized rows to events.
//!
//! A [`Schema`] names each output field and where it comes from. Applying
//! it never fails: missing source columns and values that cannot be
//! coerced to the declared type are simply left out of the [`Event`].

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};

use crate::cell::{format_timestamp, NormalizedValue};
use crate::error::Error;
use crate::scan::NormalizedRow;

/// Layout of timestamps rendered by the pinned session date format.
const SESSION_TIMESTAMP_LAYOUT: &str = "%Y-%m-%dT%H:%M:%S";

const TRUE_TOKENS: &[&str] = &["1", "t", "T", "TRUE", "true", "True"];
const FALSE_TOKENS: &[&str] = &["0", "f", "F", "FALSE", "false", "False"];

/// Declared type of an output field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    #[default]
    String,
    Integer,
    Float,
    Boolean,
    Timestamp,
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TargetKind::String => "string",
            TargetKind::Integer => "integer",
            TargetKind::Float => "float",
            TargetKind::Boolean => "boolean",
            TargetKind::Timestamp => "timestamp",
        };
        f.write_str(name)
    }
}

/// Where an output field comes from.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RuleDef")]
pub enum Rule {
    /// Read `column` and coerce it to `kind`.
    Field { column: String, kind: TargetKind },
    /// A nested group of fields.
    Object { object: Schema },
}

/// Wire form of a [`Rule`]: `{"column", "type"}` or `{"object"}`.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RuleDef {
    column: Option<String>,
    #[serde(rename = "type")]
    kind: Option<TargetKind>,
    object: Option<Schema>,
}

impl TryFrom<RuleDef> for Rule {
    type Error = String;

    fn try_from(def: RuleDef) -> Result<Self, Self::Error> {
        match (def.column, def.kind, def.object) {
            (Some(column), kind, None) => Ok(Rule::Field {
                column,
                kind: kind.unwrap_or_default(),
            }),
            (None, None, Some(object)) => Ok(Rule::Object { object }),
            (None, _, None) => Err("rule needs either 'column' or 'object'".to_string()),
            _ => Err("'object' rules take no 'column' or 'type'".to_string()),
        }
    }
}

impl Rule {
    pub fn field(column: impl Into<String>, kind: TargetKind) -> Self {
        Rule::Field {
            column: column.into(),
            kind,
        }
    }
}

/// Ordered mapping of output field name to [`Rule`].
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct Schema {
    fields: BTreeMap<String, Rule>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field, replacing any earlier rule with the same name.
    pub fn with(mut self, name: impl Into<String>, rule: Rule) -> Self {
        self.fields.insert(name.into(), rule);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &Rule)> {
        self.fields.iter()
    }

    /// Map one row into an event.
    pub fn apply(&self, row: &NormalizedRow) -> Event {
        let mut event = Event::new();
        for (name, rule) in &self.fields {
            match rule {
                Rule::Field { column, kind } => {
                    let Some(value) = row.get(column) else {
                        continue;
                    };
                    match coerce(value, *kind) {
                        Some(v) => event.insert(name.clone(), v),
                        None => {
                            let err = Error::CoercionFailed {
                                field: name.clone(),
                                target: kind.to_string(),
                                value: value.to_text(),
                            };
                            tracing::warn!("dropping field: {err}");
                        }
                    }
                }
                Rule::Object { object } => {
                    let nested = object.apply(row);
                    if !nested.is_empty() {
                        event.insert(name.clone(), FieldValue::Object(nested));
                    }
                }
            }
        }
        event
    }

    /// Every source column the schema reads, nested ones included.
    pub fn columns(&self) -> Vec<&str> {
        let mut out = Vec::new();
        for rule in self.fields.values() {
            match rule {
                Rule::Field { column, .. } => out.push(column.as_str()),
                Rule::Object { object } => out.extend(object.columns()),
            }
        }
        out
    }
}

/// A typed event value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Timestamp(DateTime<Utc>),
    Object(Event),
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FieldValue::String(s) => serializer.serialize_str(s),
            FieldValue::Integer(n) => serializer.serialize_i64(*n),
            FieldValue::Float(n) => serializer.serialize_f64(*n),
            FieldValue::Boolean(b) => serializer.serialize_bool(*b),
            FieldValue::Timestamp(ts) => serializer.serialize_str(&format_timestamp(ts)),
            FieldValue::Object(event) => event.serialize(serializer),
        }
    }
}

/// Output event: field name to typed value.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Event(BTreeMap<String, FieldValue>);

impl Event {
    pub fn new() -> Self {
        Self::default()
    }

    /// The `{status: "OFFLINE"}` event reported for a failed cycle.
    pub fn offline() -> Self {
        let mut event = Self::new();
        event.insert("status", FieldValue::String("OFFLINE".to_string()));
        event
    }

    pub fn insert(&mut self, name: impl Into<String>, value: FieldValue) {
        self.0.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

/// Coerce a normalized value to the declared kind.
pub fn coerce(value: &NormalizedValue, kind: TargetKind) -> Option<FieldValue> {
    match kind {
        TargetKind::String => Some(FieldValue::String(value.to_text())),
        TargetKind::Integer => match value {
            NormalizedValue::Integer(n) => Some(FieldValue::Integer(*n)),
            NormalizedValue::Float(n) if n.fract() == 0.0 && n.abs() < i64::MAX as f64 => {
                Some(FieldValue::Integer(*n as i64))
            }
            NormalizedValue::Text(s) => s.parse().ok().map(FieldValue::Integer),
            _ => None,
        },
        TargetKind::Float => match value {
            NormalizedValue::Integer(n) => Some(FieldValue::Float(*n as f64)),
            NormalizedValue::Float(n) if n.is_finite() => Some(FieldValue::Float(*n)),
            NormalizedValue::Text(s) => s
                .parse::<f64>()
                .ok()
                .filter(|n| n.is_finite())
                .map(FieldValue::Float),
            _ => None,
        },
        TargetKind::Boolean => match value {
            NormalizedValue::Boolean(b) => Some(FieldValue::Boolean(*b)),
            NormalizedValue::Integer(0) => Some(FieldValue::Boolean(false)),
            NormalizedValue::Integer(1) => Some(FieldValue::Boolean(true)),
            NormalizedValue::Text(s) => parse_bool(s).map(FieldValue::Boolean),
            _ => None,
        },
        TargetKind::Timestamp => match value {
            NormalizedValue::Timestamp(ts) => Some(FieldValue::Timestamp(*ts)),
            NormalizedValue::Text(s) => parse_timestamp(s).map(FieldValue::Timestamp),
            _ => None,
        },
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    if TRUE_TOKENS.contains(&s) {
        Some(true)
    } else if FALSE_TOKENS.contains(&s) {
        Some(false)
    } else {
        None
    }
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, SESSION_TIMESTAMP_LAYOUT)
        .ok()
        .map(|naive| naive.and_utc())
}
