//! Raw schema descriptors and their validation.
//!
//! The descriptor structs are the meta-schema: serde rejects unknown
//! properties, missing `name`/`type`, and values outside the enumerations.
//! [`compile_field`] then applies the cross-property rules.

use std::collections::HashSet;

use serde::Deserialize;

use super::defaults::{default_analyzer, index_field_suffix};
use super::{
    Analyzer, CopyField, FieldType, MultiValued, MultiValuedOperation, MultiValuedType,
    SchemaField,
};
use crate::error::SchemaError;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(super) struct SchemaDescriptor {
    #[serde(default)]
    pub fields: Vec<serde_json::Value>,
    #[serde(default)]
    pub copy_fields: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(super) struct FieldDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub unique_key: bool,
    #[serde(default)]
    pub indexed: bool,
    #[serde(default)]
    pub stored: bool,
    #[serde(default)]
    pub analyzer: Option<Analyzer>,
    #[serde(default)]
    pub multi_valued: bool,
    #[serde(default)]
    pub multi_valued_type: Option<MultiValuedType>,
    #[serde(default)]
    pub multi_valued_operation: Option<MultiValuedOperation>,
    #[serde(default)]
    pub store_field: Option<String>,
    #[serde(default)]
    pub index_field: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(super) struct CopyFieldDescriptor {
    pub source: String,
    pub dest: String,
}

/// Parse one field descriptor, naming it in the error when possible.
pub(super) fn parse_field(
    index: usize,
    raw: serde_json::Value,
) -> Result<FieldDescriptor, SchemaError> {
    let label = raw
        .get("name")
        .and_then(|n| n.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| format!("#{}", index));
    serde_json::from_value(raw).map_err(|e| SchemaError::InvalidField {
        field: label,
        reason: e.to_string(),
    })
}

pub(super) fn compile_field(desc: FieldDescriptor) -> Result<SchemaField, SchemaError> {
    let name = desc.name;
    if name.trim().is_empty() {
        return Err(SchemaError::InvalidField {
            field: name,
            reason: "name must not be empty".to_string(),
        });
    }

    let multi_valued = if desc.multi_valued {
        Some(MultiValued {
            kind: desc.multi_valued_type.unwrap_or(MultiValuedType::List),
            operation: desc
                .multi_valued_operation
                .unwrap_or(MultiValuedOperation::Replace),
        })
    } else {
        None
    };

    if desc.unique_key && multi_valued.is_some() {
        return Err(SchemaError::InvalidField {
            field: name,
            reason: "unique_key fields cannot be multi_valued".to_string(),
        });
    }

    let is_multi = multi_valued.is_some();
    let analyzer = if desc.indexed {
        match desc
            .analyzer
            .or_else(|| default_analyzer(desc.field_type, is_multi))
        {
            Some(analyzer) => Some(analyzer),
            None => {
                return Err(SchemaError::MissingAnalyzer {
                    field: name,
                    field_type: desc.field_type.as_str().to_string(),
                })
            }
        }
    } else {
        if desc.analyzer.is_some() {
            tracing::debug!(field = %name, "ignoring analyzer on non-indexed field");
        }
        None
    };

    if analyzer == Some(Analyzer::Other) && desc.index_field.is_none() {
        return Err(SchemaError::MissingIndexField {
            field: name,
            reason: "analyzer \"other\" leaves typing to the index".to_string(),
        });
    }

    let index_field = match desc.index_field {
        Some(explicit) => Some(explicit),
        None if desc.indexed || desc.stored => {
            match index_field_suffix(desc.field_type, is_multi) {
                Some(suffix) => Some(format!("{}{}", name, suffix)),
                None => {
                    return Err(SchemaError::MissingIndexField {
                        field: name,
                        reason: format!(
                            "type {} has no dynamic field suffix",
                            desc.field_type.as_str()
                        ),
                    })
                }
            }
        }
        None => None,
    };

    let store_field = desc.store_field.unwrap_or_else(|| name.clone());
    if store_field.trim().is_empty() {
        return Err(SchemaError::InvalidField {
            field: name,
            reason: "store_field must not be empty".to_string(),
        });
    }

    Ok(SchemaField {
        name,
        field_type: desc.field_type,
        required: desc.required,
        unique_key: desc.unique_key,
        indexed: desc.indexed,
        stored: desc.stored,
        analyzer,
        multi_valued,
        store_field,
        index_field,
    })
}

/// Copy fields must reference declared fields that both carry an
/// explicit `index_field`.
pub(super) fn compile_copy_field(
    raw: serde_json::Value,
    declared: &HashSet<String>,
    explicit_index: &HashSet<String>,
) -> Result<CopyField, SchemaError> {
    let desc: CopyFieldDescriptor =
        serde_json::from_value(raw.clone()).map_err(|e| SchemaError::InvalidCopyField {
            from: raw
                .get("source")
                .and_then(|s| s.as_str())
                .unwrap_or("?")
                .to_string(),
            to: raw
                .get("dest")
                .and_then(|s| s.as_str())
                .unwrap_or("?")
                .to_string(),
            reason: e.to_string(),
        })?;

    let fail = |reason: String| SchemaError::InvalidCopyField {
        from: desc.source.clone(),
        to: desc.dest.clone(),
        reason,
    };

    for (role, name) in [("source", &desc.source), ("destination", &desc.dest)] {
        if !declared.contains(name) {
            return Err(fail(format!("{} \"{}\" is not a declared field", role, name)));
        }
        if !explicit_index.contains(name) {
            return Err(fail(format!(
                "{} \"{}\" must declare an explicit index_field",
                role, name
            )));
        }
    }

    Ok(CopyField {
        source: desc.source,
        dest: desc.dest,
    })
}
