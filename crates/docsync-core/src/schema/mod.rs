//! Schema compiler.
//!
//! A schema description is a JSON object with `fields` and `copy_fields`.
//! [`CompiledSchema`] validates it once and derives, for every field, the
//! storage name, the reverse-index name and the analyzer. The compiled
//! schema is immutable and shared behind an `Arc`.
//!
//! The builtin schema (see `schema/builtin_schema.json`) is compiled lazily
//! on first use and cached for the life of the process.

mod defaults;
mod descriptor;

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};

pub use defaults::{default_analyzer, index_field_suffix};

use crate::error::SchemaError;
use crate::models::fields;

const BUILTIN_SCHEMA: &str = include_str!("../../schema/builtin_schema.json");

static BUILTIN: OnceLock<Arc<CompiledSchema>> = OnceLock::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Text,
    Int,
    Boolean,
    Datetime,
    Point,
    Float,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Text => "text",
            FieldType::Int => "int",
            FieldType::Boolean => "boolean",
            FieldType::Datetime => "datetime",
            FieldType::Point => "point",
            FieldType::Float => "float",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Analyzer {
    String,
    Strings,
    TextEn,
    Int,
    Ints,
    Boolean,
    Booleans,
    Tdate,
    Tdates,
    Location,
    Other,
}

impl Analyzer {
    pub fn as_str(&self) -> &'static str {
        match self {
            Analyzer::String => "string",
            Analyzer::Strings => "strings",
            Analyzer::TextEn => "text_en",
            Analyzer::Int => "int",
            Analyzer::Ints => "ints",
            Analyzer::Boolean => "boolean",
            Analyzer::Booleans => "booleans",
            Analyzer::Tdate => "tdate",
            Analyzer::Tdates => "tdates",
            Analyzer::Location => "location",
            Analyzer::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MultiValuedType {
    List,
    Set,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MultiValuedOperation {
    Append,
    Replace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MultiValued {
    pub kind: MultiValuedType,
    pub operation: MultiValuedOperation,
}

/// A validated field with all derived properties filled in.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaField {
    pub name: String,
    pub field_type: FieldType,
    pub required: bool,
    pub unique_key: bool,
    pub indexed: bool,
    pub stored: bool,
    /// Present iff `indexed`.
    pub analyzer: Option<Analyzer>,
    pub multi_valued: Option<MultiValued>,
    pub store_field: String,
    /// Present iff `indexed` or `stored`.
    pub index_field: Option<String>,
}

impl SchemaField {
    pub fn is_multi_valued(&self) -> bool {
        self.multi_valued.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyField {
    pub source: String,
    pub dest: String,
}

#[derive(Debug, Clone)]
pub struct CompiledSchema {
    fields: Vec<SchemaField>,
    by_name: HashMap<String, usize>,
    by_store_field: HashMap<String, usize>,
    copy_fields: Vec<CopyField>,
}

impl CompiledSchema {
    /// Compile a schema description from a JSON string.
    pub fn from_json_str(raw: &str) -> Result<Self, SchemaError> {
        let desc: descriptor::SchemaDescriptor =
            serde_json::from_str(raw).map_err(|e| SchemaError::Parse(e.to_string()))?;

        let mut compiled = Vec::with_capacity(desc.fields.len());
        let mut by_name = HashMap::new();
        let mut by_store_field: HashMap<String, usize> = HashMap::new();
        let mut explicit_index = HashSet::new();

        for (i, raw_field) in desc.fields.into_iter().enumerate() {
            let field_desc = descriptor::parse_field(i, raw_field)?;
            if field_desc.index_field.is_some() {
                explicit_index.insert(field_desc.name.clone());
            }
            let field = descriptor::compile_field(field_desc)?;

            if by_name.contains_key(&field.name) {
                return Err(SchemaError::DuplicateField(field.name));
            }
            if let Some(&other) = by_store_field.get(&field.store_field) {
                let first: &SchemaField = &compiled[other];
                return Err(SchemaError::DuplicateStoreField {
                    store_field: field.store_field.clone(),
                    first: first.name.clone(),
                    second: field.name,
                });
            }
            by_name.insert(field.name.clone(), compiled.len());
            by_store_field.insert(field.store_field.clone(), compiled.len());
            compiled.push(field);
        }

        if !compiled.iter().any(|f| f.unique_key) {
            return Err(SchemaError::NoUniqueKey);
        }

        let declared: HashSet<String> = by_name.keys().cloned().collect();
        let copy_fields = desc
            .copy_fields
            .into_iter()
            .map(|raw| descriptor::compile_copy_field(raw, &declared, &explicit_index))
            .collect::<Result<Vec<_>, _>>()?;

        tracing::debug!(
            fields = compiled.len(),
            copy_fields = copy_fields.len(),
            "compiled schema"
        );

        Ok(Self {
            fields: compiled,
            by_name,
            by_store_field,
            copy_fields,
        })
    }

    pub fn from_path(path: &Path) -> Result<Self, SchemaError> {
        let raw = std::fs::read_to_string(path).map_err(|source| SchemaError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    /// The builtin schema, compiled on first use.
    pub fn builtin() -> Result<Arc<CompiledSchema>, SchemaError> {
        if let Some(schema) = BUILTIN.get() {
            return Ok(schema.clone());
        }
        let compiled = Arc::new(Self::from_json_str(BUILTIN_SCHEMA)?);
        Ok(BUILTIN.get_or_init(|| compiled).clone())
    }

    pub fn field(&self, name: &str) -> Option<&SchemaField> {
        self.by_name.get(name).map(|&i| &self.fields[i])
    }

    pub fn field_by_store_name(&self, store_field: &str) -> Option<&SchemaField> {
        self.by_store_field.get(store_field).map(|&i| &self.fields[i])
    }

    /// Fields in declaration order.
    pub fn fields(&self) -> &[SchemaField] {
        &self.fields
    }

    pub fn unique_keys(&self) -> impl Iterator<Item = &SchemaField> {
        self.fields.iter().filter(|f| f.unique_key)
    }

    pub fn copy_fields(&self) -> &[CopyField] {
        &self.copy_fields
    }

    /// Check that every named field is declared.
    pub fn require_fields(&self, names: &[&str]) -> Result<(), SchemaError> {
        match names.iter().find(|n| !self.by_name.contains_key(**n)) {
            Some(missing) => Err(SchemaError::MissingWellKnownField(missing.to_string())),
            None => Ok(()),
        }
    }

    /// Check that the schema can back a sync engine store.
    pub fn require_well_known(&self) -> Result<(), SchemaError> {
        self.require_fields(fields::WELL_KNOWN)
    }
}
