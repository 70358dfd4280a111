//! The record model shared by every orchestration component.
//!
//! A [`Record`] is an ordered mapping of field name to scalar value. Callers
//! may hand in either their own serializable types or ready-made records via
//! [`RecordSource`]; [`normalize`] is the single boundary that turns both into
//! records before anything is partitioned or sent.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Error;

/// Field that carries the Salesforce record identifier.
pub const ID_FIELD: &str = "Id";

/// Fails with the first record lacking a non-empty `field`.
pub(crate) fn require_field(
    records: &[Record],
    field: &str,
    error: impl Fn(usize, String) -> Error,
) -> Result<(), Error> {
    match records.iter().position(|r| r.text(field).is_none()) {
        Some(index) => Err(error(index, field.to_string())),
        None => Ok(()),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Record
// ─────────────────────────────────────────────────────────────────────────────

/// Ordered mapping of field name to scalar value. Keys are unique and keep
/// their insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    /// Creates an empty record.
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Builder-style insert.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(field, value);
        self
    }

    /// Inserts or replaces a field, returning the previous value.
    /// Replacing keeps the field's original position.
    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(field.into(), value.into())
    }

    /// Returns the raw value of a field.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Returns the field rendered as text, or `None` when it is missing,
    /// null, or empty.
    pub fn text(&self, field: &str) -> Option<String> {
        self.0
            .get(field)
            .map(scalar_to_text)
            .filter(|s| !s.trim().is_empty())
    }

    /// Returns the record identifier, if present and non-empty.
    pub fn id(&self) -> Option<String> {
        self.text(ID_FIELD)
    }

    /// Field names in order.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Field/value pairs in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Borrows the underlying map.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Builds a record from any serializable value, which must serialize to a
    /// flat JSON object.
    pub fn from_serializable<T: Serialize>(value: &T) -> Result<Self, Error> {
        let value = serde_json::to_value(value)
            .map_err(|e| Error::InvalidRecord(format!("Failed to serialize record: {}", e)))?;
        Self::try_from(value)
    }

    /// Ensures every value is a scalar.
    fn ensure_flat(&self) -> Result<(), Error> {
        match self.0.iter().find(|(_, v)| v.is_object() || v.is_array()) {
            Some((field, _)) => Err(Error::InvalidRecord(format!(
                "field '{}' holds a nested value",
                field
            ))),
            None => Ok(()),
        }
    }
}

impl TryFrom<Value> for Record {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => {
                let record = Record(map);
                record.ensure_flat()?;
                Ok(record)
            }
            other => Err(Error::InvalidRecord(format!(
                "expected an object, got {}",
                json_type_name(&other)
            ))),
        }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Record(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// RecordSource
// ─────────────────────────────────────────────────────────────────────────────

/// A caller-supplied record, either one of the caller's own types or a
/// generic field mapping.
#[derive(Debug, Clone)]
pub enum RecordSource<T> {
    /// A typed value converted through `serde`.
    Typed(T),
    /// A ready-made field mapping.
    Fields(Record),
}

impl<T: Serialize> RecordSource<T> {
    /// Converts the source into a validated record.
    pub fn into_record(self) -> Result<Record, Error> {
        match self {
            RecordSource::Typed(value) => Record::from_serializable(&value),
            RecordSource::Fields(record) => {
                record.ensure_flat()?;
                Ok(record)
            }
        }
    }
}

impl<T> From<Record> for RecordSource<T> {
    fn from(record: Record) -> Self {
        RecordSource::Fields(record)
    }
}

/// Normalizes a sequence of record sources, preserving order. The first
/// invalid source aborts with its position in the message.
pub fn normalize<T, I>(sources: I) -> Result<Vec<Record>, Error>
where
    T: Serialize,
    I: IntoIterator<Item = RecordSource<T>>,
{
    sources
        .into_iter()
        .enumerate()
        .map(|(index, source)| {
            source.into_record().map_err(|e| match e {
                Error::InvalidRecord(msg) => {
                    Error::InvalidRecord(format!("record {}: {}", index, msg))
                }
                other => other,
            })
        })
        .collect()
}

/// Renders a scalar as CSV/URI text. Null becomes the empty string.
pub(crate) fn scalar_to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
