//! Typed field values.
//!
//! Every document field holds a [`Value`]. Drivers may hand over loosely
//! typed values (a date as a string, a count as a float); the operation
//! builder casts them to the type declared in the schema before anything
//! reaches a backend.
//!
//! # JSON representation
//!
//! Values round-trip through JSON for persistence. Scalars map to plain
//! JSON; the two types JSON cannot express are tagged objects:
//!
//! | Variant | JSON |
//! |---------|------|
//! | `DateTime` | `{"$date": "2024-05-01T12:00:00Z"}` |
//! | `Point` | `{"$point": [x, y]}` |

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::json;
use thiserror::Error;

const DATE_TAG: &str = "$date";
const POINT_TAG: &str = "$point";

/// A single field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    DateTime(DateTime<Utc>),
    Point([f64; 2]),
    List(Vec<Value>),
}

/// A JSON value that has no [`Value`] counterpart (e.g. a nested object).
#[derive(Debug, Error)]
#[error("unsupported JSON value: {0}")]
pub struct UnsupportedJson(pub String);

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Human-readable rendering used for grouping keys and CLI output.
    pub fn display(&self) -> String {
        match self {
            Value::Null => "null".to_string(),
            Value::String(s) => s.clone(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::DateTime(dt) => dt.to_rfc3339_opts(SecondsFormat::Secs, true),
            Value::Point([x, y]) => format!("{},{}", x, y),
            Value::List(items) => items
                .iter()
                .map(Value::display)
                .collect::<Vec<_>>()
                .join(", "),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::String(s) => json!(s),
            Value::Int(i) => json!(i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Bool(b) => json!(b),
            Value::DateTime(dt) => tagged(
                DATE_TAG,
                json!(dt.to_rfc3339_opts(SecondsFormat::Micros, true)),
            ),
            Value::Point([x, y]) => tagged(POINT_TAG, json!([x, y])),
            Value::List(items) => serde_json::Value::Array(items.iter().map(Value::to_json).collect()),
        }
    }

    pub fn from_json(value: serde_json::Value) -> Result<Value, UnsupportedJson> {
        match value {
            serde_json::Value::Null => Ok(Value::Null),
            serde_json::Value::Bool(b) => Ok(Value::Bool(b)),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Ok(Value::Int(i)),
                None => n
                    .as_f64()
                    .map(Value::Float)
                    .ok_or_else(|| UnsupportedJson(n.to_string())),
            },
            serde_json::Value::String(s) => Ok(Value::String(s)),
            serde_json::Value::Array(items) => items
                .into_iter()
                .map(Value::from_json)
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List),
            serde_json::Value::Object(map) => {
                if map.len() == 1 {
                    if let Some(raw) = map.get(DATE_TAG).and_then(|v| v.as_str()) {
                        return DateTime::parse_from_rfc3339(raw)
                            .map(|dt| Value::DateTime(dt.with_timezone(&Utc)))
                            .map_err(|_| UnsupportedJson(raw.to_string()));
                    }
                    if let Some(coords) = map.get(POINT_TAG).and_then(|v| v.as_array()) {
                        if let [x, y] = coords.as_slice() {
                            if let (Some(x), Some(y)) = (x.as_f64(), y.as_f64()) {
                                return Ok(Value::Point([x, y]));
                            }
                        }
                    }
                }
                Err(UnsupportedJson(serde_json::Value::Object(map).to_string()))
            }
        }
    }
}

fn tagged(tag: &str, inner: serde_json::Value) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    map.insert(tag.to_string(), inner);
    serde_json::Value::Object(map)
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = serde_json::Value::deserialize(deserializer)?;
        Value::from_json(raw).map_err(serde::de::Error::custom)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&String> for Value {
    fn from(s: &String) -> Self {
        Value::String(s.clone())
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(dt: DateTime<Utc>) -> Self {
        Value::DateTime(dt)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map(Into::into).unwrap_or(Value::Null)
    }
}
