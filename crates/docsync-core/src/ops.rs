//! Operation builder.
//!
//! Turns one [`Document`] into a backend-agnostic [`UpsertOperation`] using
//! the compiled schema. Every field is cast to its declared type and routed
//! into one of four buckets:
//!
//! | Field | Bucket |
//! |-------|--------|
//! | unique key | `set_on_insert` |
//! | null value | `set` (null) |
//! | multi-valued set + append | `add_to_set` |
//! | multi-valued list + append | `push` |
//! | multi-valued replace, scalar | `set` |
//!
//! Buckets are keyed by storage name and never share a key, so applying
//! them in any order gives the same record.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use sha2::{Digest, Sha256};

use crate::error::SchemaError;
use crate::models::Document;
use crate::schema::{CompiledSchema, FieldType, MultiValuedOperation, MultiValuedType, SchemaField};
use crate::value::Value;

/// A stored record: storage field name → value.
pub type Record = BTreeMap<String, Value>;

/// The composite natural key of a document, as (storage name, value)
/// pairs sorted by storage name.
#[derive(Debug, Clone, PartialEq)]
pub struct UniqueKey(Vec<(String, Value)>);

impl UniqueKey {
    pub fn new(mut parts: Vec<(String, Value)>) -> Self {
        parts.sort_by(|a, b| a.0.cmp(&b.0));
        Self(parts)
    }

    pub fn parts(&self) -> &[(String, Value)] {
        &self.0
    }

    /// Hex SHA-256 of the canonical JSON form of the key.
    pub fn digest(&self) -> String {
        let canonical: Vec<serde_json::Value> = self
            .0
            .iter()
            .map(|(name, value)| serde_json::json!([name, value.to_json()]))
            .collect();
        let mut hasher = Sha256::new();
        hasher.update(serde_json::Value::Array(canonical).to_string().as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Extract and cast the unique-key fields of a document.
    pub fn for_document(schema: &CompiledSchema, doc: &Document) -> Result<Self, SchemaError> {
        let mut parts = Vec::new();
        for field in schema.unique_keys() {
            let value = match doc.get(&field.name) {
                Some(v) if !v.is_null() => cast_scalar(field, v)?,
                _ => return Err(SchemaError::MissingUniqueKey(field.name.clone())),
            };
            parts.push((field.store_field.clone(), value));
        }
        Ok(Self::new(parts))
    }

    /// Rebuild the key of a stored record.
    pub fn for_record(schema: &CompiledSchema, record: &Record) -> Option<Self> {
        schema
            .unique_keys()
            .map(|f| {
                record
                    .get(&f.store_field)
                    .map(|v| (f.store_field.clone(), v.clone()))
            })
            .collect::<Option<Vec<_>>>()
            .map(Self::new)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpsertOperation {
    pub key: UniqueKey,
    pub set_on_insert: BTreeMap<String, Value>,
    pub set: BTreeMap<String, Value>,
    pub add_to_set: BTreeMap<String, Vec<Value>>,
    pub push: BTreeMap<String, Vec<Value>>,
}

impl UpsertOperation {
    /// Apply the operation to an existing record, or create one.
    pub fn apply(&self, existing: Option<Record>) -> Record {
        let mut record = match existing {
            Some(record) => record,
            None => self.set_on_insert.clone(),
        };
        for (name, value) in &self.set {
            record.insert(name.clone(), value.clone());
        }
        for (name, values) in &self.add_to_set {
            append_values(&mut record, name, values, true);
        }
        for (name, values) in &self.push {
            append_values(&mut record, name, values, false);
        }
        record
    }
}

fn append_values(record: &mut Record, name: &str, values: &[Value], distinct: bool) {
    let mut items = match record.remove(name) {
        Some(Value::List(items)) => items,
        Some(Value::Null) | None => Vec::new(),
        Some(scalar) => vec![scalar],
    };
    for value in values {
        if distinct && items.contains(value) {
            continue;
        }
        items.push(value.clone());
    }
    record.insert(name.to_string(), Value::List(items));
}

/// Compile a document into an upsert operation.
pub fn build_operation(
    schema: &CompiledSchema,
    doc: &Document,
) -> Result<UpsertOperation, SchemaError> {
    let mut op = UpsertOperation {
        key: UniqueKey::for_document(schema, doc)?,
        set_on_insert: BTreeMap::new(),
        set: BTreeMap::new(),
        add_to_set: BTreeMap::new(),
        push: BTreeMap::new(),
    };

    for (name, value) in doc.iter() {
        let field = schema
            .field(name)
            .ok_or_else(|| SchemaError::UnknownField(name.clone()))?;
        let store = field.store_field.clone();

        if field.unique_key {
            op.set_on_insert.insert(store, cast_scalar(field, value)?);
            continue;
        }
        if value.is_null() {
            op.set.insert(store, Value::Null);
            continue;
        }

        match field.multi_valued {
            Some(mv) => {
                let items = cast_list(field, value)?;
                match (mv.kind, mv.operation) {
                    (MultiValuedType::Set, MultiValuedOperation::Append) => {
                        op.add_to_set.insert(store, dedup(items));
                    }
                    (MultiValuedType::List, MultiValuedOperation::Append) => {
                        op.push.insert(store, items);
                    }
                    (MultiValuedType::Set, MultiValuedOperation::Replace) => {
                        op.set.insert(store, Value::List(dedup(items)));
                    }
                    (MultiValuedType::List, MultiValuedOperation::Replace) => {
                        op.set.insert(store, Value::List(items));
                    }
                }
            }
            None => {
                op.set.insert(store, cast_scalar(field, value)?);
            }
        }
    }

    if let Some(missing) = schema
        .fields()
        .iter()
        .find(|f| f.required && !doc.contains(&f.name))
    {
        return Err(SchemaError::MissingRequiredField(missing.name.clone()));
    }

    Ok(op)
}

/// Order-preserving deduplication.
fn dedup(items: Vec<Value>) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::with_capacity(items.len());
    for item in items {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out
}

fn cast_list(field: &SchemaField, value: &Value) -> Result<Vec<Value>, SchemaError> {
    let items: &[Value] = match value {
        Value::List(items) => items,
        scalar => std::slice::from_ref(scalar),
    };
    items
        .iter()
        .filter(|v| !v.is_null())
        .map(|v| cast_scalar(field, v))
        .collect()
}

/// Cast a single value to the field's declared type.
pub fn cast_scalar(field: &SchemaField, value: &Value) -> Result<Value, SchemaError> {
    let name = field.name.as_str();
    let fail = |what: &str| {
        SchemaError::invalid_value(
            name,
            format!("cannot cast {} to {}", what, field.field_type.as_str()),
        )
    };

    match (field.field_type, value) {
        (FieldType::Point, Value::List(items)) => point_from_pair(items)
            .map(Value::Point)
            .ok_or_else(|| fail(&value.display())),

        (_, Value::List(_)) => Err(SchemaError::invalid_value(
            name,
            "list given for a single-valued field",
        )),

        (FieldType::String | FieldType::Text, v) => match v {
            Value::String(s) => Ok(Value::String(s.clone())),
            Value::Int(i) => Ok(Value::String(i.to_string())),
            Value::Float(f) => Ok(Value::String(f.to_string())),
            Value::Bool(b) => Ok(Value::String(b.to_string())),
            Value::DateTime(_) => Ok(Value::String(v.display())),
            other => Err(fail(&other.display())),
        },

        (FieldType::Int, v) => match v {
            Value::Int(i) => Ok(Value::Int(*i)),
            Value::Float(f) if f.is_finite() => Ok(Value::Int(f.trunc() as i64)),
            Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
            Value::String(s) => {
                let s = s.trim();
                s.parse::<i64>()
                    .ok()
                    .or_else(|| {
                        s.parse::<f64>()
                            .ok()
                            .filter(|f| f.is_finite())
                            .map(|f| f.trunc() as i64)
                    })
                    .map(Value::Int)
                    .ok_or_else(|| fail(&format!("\"{}\"", s)))
            }
            other => Err(fail(&other.display())),
        },

        (FieldType::Float, v) => match v {
            Value::Float(f) => Ok(Value::Float(*f)),
            Value::Int(i) => Ok(Value::Float(*i as f64)),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| fail(&format!("\"{}\"", s))),
            other => Err(fail(&other.display())),
        },

        (FieldType::Boolean, v) => match v {
            Value::Bool(b) => Ok(Value::Bool(*b)),
            Value::Int(i) => Ok(Value::Bool(*i != 0)),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Ok(Value::Bool(true)),
                "false" | "0" | "no" => Ok(Value::Bool(false)),
                _ => Err(fail(&format!("\"{}\"", s))),
            },
            other => Err(fail(&other.display())),
        },

        (FieldType::Datetime, v) => match v {
            Value::DateTime(dt) => Ok(Value::DateTime(*dt)),
            Value::Int(secs) => DateTime::from_timestamp(*secs, 0)
                .map(Value::DateTime)
                .ok_or_else(|| fail(&secs.to_string())),
            Value::Float(secs) if secs.is_finite() => {
                let whole = secs.trunc() as i64;
                let nanos = ((secs - secs.trunc()) * 1e9) as u32;
                DateTime::from_timestamp(whole, nanos)
                    .map(Value::DateTime)
                    .ok_or_else(|| fail(&secs.to_string()))
            }
            Value::String(s) => parse_datetime(s)
                .map(Value::DateTime)
                .ok_or_else(|| fail(&format!("\"{}\"", s))),
            other => Err(fail(&other.display())),
        },

        (FieldType::Point, v) => match v {
            Value::Point(p) => Ok(Value::Point(*p)),
            Value::String(s) => parse_point(s)
                .map(Value::Point)
                .ok_or_else(|| fail(&format!("\"{}\"", s))),
            other => Err(fail(&other.display())),
        },
    }
}

fn parse_datetime(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// `[x, y]` with numeric coordinates.
fn point_from_pair(items: &[Value]) -> Option<[f64; 2]> {
    let coord = |v: &Value| match v {
        Value::Int(i) => Some(*i as f64),
        Value::Float(f) => Some(*f),
        _ => None,
    };
    match items {
        [x, y] => Some([coord(x)?, coord(y)?]),
        _ => None,
    }
}

fn parse_point(raw: &str) -> Option<[f64; 2]> {
    let (x, y) = raw.split_once(',')?;
    Some([x.trim().parse().ok()?, y.trim().parse().ok()?])
}
