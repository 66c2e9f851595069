//! Document records held in mirrors

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// A single document from a remote collection.
///
/// Field presence drives categorization: boolean concern flags, `status`, `priority` and a
/// server-assigned timestamp used as the ordering key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    #[serde(default)]
    pub fields: Map<String, JsonValue>,
}

impl Record {
    pub fn new(id: impl Into<String>, fields: Map<String, JsonValue>) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    /// Build a record from a JSON object. Non-object values produce an empty field map.
    pub fn from_json(id: impl Into<String>, value: JsonValue) -> Self {
        let fields = match value {
            JsonValue::Object(map) => map,
            _ => Map::new(),
        };
        Self::new(id, fields)
    }

    pub fn get(&self, field: &str) -> Option<&JsonValue> {
        self.fields.get(field)
    }

    /// Truthiness of a field: `true`, a non-zero number or a non-empty string.
    pub fn flag(&self, field: &str) -> bool {
        match self.fields.get(field) {
            Some(JsonValue::Bool(b)) => *b,
            Some(JsonValue::Number(n)) => n.as_f64().is_some_and(|v| v != 0.0),
            Some(JsonValue::String(s)) => !s.is_empty(),
            Some(JsonValue::Array(_)) | Some(JsonValue::Object(_)) => true,
            _ => false,
        }
    }

    /// Any of the named flags is set.
    pub fn any_flag(&self, fields: &[&str]) -> bool {
        fields.iter().any(|f| self.flag(f))
    }

    pub fn text(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(JsonValue::as_str)
    }

    /// Case-insensitive substring test. `needle` must already be lower-cased.
    pub fn contains_ci(&self, field: &str, needle: &str) -> bool {
        self.text(field)
            .is_some_and(|v| v.to_lowercase().contains(needle))
    }

    /// Timestamp of `field` in unix milliseconds.
    ///
    /// Accepts integer milliseconds, RFC 3339 strings and `{seconds, nanoseconds}` objects.
    pub fn timestamp(&self, field: &str) -> Option<i64> {
        match self.fields.get(field)? {
            JsonValue::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            JsonValue::String(s) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.timestamp_millis()),
            JsonValue::Object(obj) => {
                let seconds = obj.get("seconds").and_then(JsonValue::as_i64)?;
                let nanos = obj
                    .get("nanoseconds")
                    .and_then(JsonValue::as_i64)
                    .unwrap_or(0);
                seconds.checked_mul(1000)?.checked_add(nanos / 1_000_000)
            }
            _ => None,
        }
    }
}
