//! Error types shared across the core crate.
//!
//! [`SchemaError`] covers both schema compilation (fatal at startup) and
//! per-document compilation (fatal for that document only).
//! [`StoreError`] wraps schema errors, caller errors, and backend failures
//! for [`DocStore`](crate::docstore::DocStore) operations.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("failed to read schema file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("schema is not valid JSON: {0}")]
    Parse(String),

    #[error("invalid descriptor for field \"{field}\": {reason}")]
    InvalidField { field: String, reason: String },

    #[error("field \"{0}\" is declared more than once")]
    DuplicateField(String),

    #[error("store field \"{store_field}\" is used by both \"{first}\" and \"{second}\"")]
    DuplicateStoreField {
        store_field: String,
        first: String,
        second: String,
    },

    #[error("field \"{field}\" is indexed but has no analyzer and type {field_type} has no default")]
    MissingAnalyzer { field: String, field_type: String },

    #[error("field \"{field}\" needs an explicit index_field: {reason}")]
    MissingIndexField { field: String, reason: String },

    #[error("copy field {from} -> {to}: {reason}")]
    InvalidCopyField {
        from: String,
        to: String,
        reason: String,
    },

    #[error("schema declares no unique_key field")]
    NoUniqueKey,

    #[error("schema is missing required field \"{0}\"")]
    MissingWellKnownField(String),

    #[error("field \"{0}\" does not exist in schema")]
    UnknownField(String),

    #[error("document is missing unique key field \"{0}\"")]
    MissingUniqueKey(String),

    #[error("document is missing required field \"{0}\"")]
    MissingRequiredField(String),

    #[error("invalid value for field \"{field}\": {reason}")]
    InvalidValue { field: String, reason: String },
}

impl SchemaError {
    pub(crate) fn invalid_value(field: &str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unallowed filters: {}", .0.join(", "))]
    UnallowedFilter(Vec<String>),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("backend error: {0:#}")]
    Backend(#[from] anyhow::Error),
}
