//! Core data models: documents and the well-known field names the
//! orchestrator and store rely on.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Field names with a fixed meaning to the sync engine.
///
/// Every schema used with [`DocStore`](crate::docstore::DocStore) must
/// declare these fields.
pub mod fields {
    pub const ID: &str = "id";
    pub const ACCOUNT_ID: &str = "account_id";
    pub const SOURCE_ID: &str = "source_id";
    pub const EXTERNAL_ID: &str = "external_id";
    pub const TYPE: &str = "type";
    pub const PARENT_ID: &str = "parent_id";
    pub const DIRTY: &str = "dirty";
    pub const CONTENT: &str = "content";
    pub const UPSERT_TIME: &str = "upsert_time";

    /// All well-known fields, in declaration order.
    pub const WELL_KNOWN: &[&str] = &[
        ID,
        ACCOUNT_ID,
        SOURCE_ID,
        EXTERNAL_ID,
        TYPE,
        PARENT_ID,
        DIRTY,
        CONTENT,
        UPSERT_TIME,
    ];
}

/// A document: logical field name → value.
///
/// Documents produced by drivers are unvalidated; the operation builder
/// checks every field against the compiled schema before a write.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document {
    fields: BTreeMap<String, Value>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.fields.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn str_field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }

    pub fn id(&self) -> Option<&str> {
        self.str_field(fields::ID)
    }

    pub fn account_id(&self) -> Option<&str> {
        self.str_field(fields::ACCOUNT_ID)
    }

    pub fn source_id(&self) -> Option<&str> {
        self.str_field(fields::SOURCE_ID)
    }

    pub fn external_id(&self) -> Option<&str> {
        self.str_field(fields::EXTERNAL_ID)
    }

    pub fn doc_type(&self) -> Option<&str> {
        self.str_field(fields::TYPE)
    }

    pub fn parent_id(&self) -> Option<&str> {
        self.str_field(fields::PARENT_ID)
    }

    /// A document without a `dirty` flag is not a placeholder.
    pub fn is_dirty(&self) -> bool {
        self.fields
            .get(fields::DIRTY)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

impl FromIterator<(String, Value)> for Document {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for Document {
    type Item = (String, Value);
    type IntoIter = std::collections::btree_map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}
