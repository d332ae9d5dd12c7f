//! Document values, write payloads, and server timestamps.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::DocPath;

/// A point in time with microsecond precision.
///
/// Stored in documents as an integer count of microseconds since the Unix
/// epoch, which keeps timestamp fields orderable by plain value comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    pub const fn from_micros(micros: i64) -> Self {
        Self(micros)
    }

    pub fn as_micros(self) -> i64 {
        self.0
    }

    /// Current wall-clock time.
    pub fn now() -> Self {
        Self(Utc::now().timestamp_micros())
    }

    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_micros(self.0)
    }

    /// Absolute distance between two timestamps.
    pub fn distance(self, other: Timestamp) -> Duration {
        Duration::from_micros(self.0.abs_diff(other.0))
    }

    /// Reads a timestamp back from a stored field value.
    pub fn from_value(value: &Value) -> Option<Self> {
        value.as_i64().map(Self)
    }
}

impl From<Timestamp> for Value {
    fn from(ts: Timestamp) -> Self {
        Value::from(ts.0)
    }
}

/// A single field value in a write.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteValue {
    /// A literal JSON value.
    Value(Value),
    /// Placeholder the store replaces with its own commit time.
    ServerTimestamp,
}

/// An ordered set of field writes.
///
/// ```rust,ignore
/// let fields = WriteFields::new()
///     .set("text", "hello")
///     .server_timestamp("createdAt");
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteFields {
    entries: Vec<(String, WriteValue)>,
}

impl WriteFields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a literal value, replacing any earlier write to the same field.
    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.put(field.into(), WriteValue::Value(value.into()));
        self
    }

    /// Marks a field to receive the store's commit time.
    pub fn server_timestamp(mut self, field: impl Into<String>) -> Self {
        self.put(field.into(), WriteValue::ServerTimestamp);
        self
    }

    pub fn get(&self, field: &str) -> Option<&WriteValue> {
        self.entries
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &WriteValue)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Resolves placeholders against a commit time, producing stored fields.
    pub fn resolve(&self, commit_time: Timestamp) -> Map<String, Value> {
        self.entries
            .iter()
            .map(|(name, value)| {
                let resolved = match value {
                    WriteValue::Value(v) => v.clone(),
                    WriteValue::ServerTimestamp => commit_time.into(),
                };
                (name.clone(), resolved)
            })
            .collect()
    }

    fn put(&mut self, field: String, value: WriteValue) {
        match self.entries.iter_mut().find(|(name, _)| *name == field) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((field, value)),
        }
    }
}

/// A stored document as read back from the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub path: DocPath,
    pub fields: Map<String, Value>,
}

impl Document {
    pub fn new(path: DocPath, fields: Map<String, Value>) -> Self {
        Self { path, fields }
    }

    pub fn id(&self) -> &str {
        self.path.id()
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn str_field(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(Value::as_str)
    }

    pub fn timestamp(&self, field: &str) -> Option<Timestamp> {
        self.get(field).and_then(Timestamp::from_value)
    }

    /// Reads an array of strings, skipping non-string elements.
    pub fn string_array(&self, field: &str) -> Option<Vec<String>> {
        self.get(field).and_then(Value::as_array).map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect()
        })
    }
}
