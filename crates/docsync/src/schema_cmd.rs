//! `docsync schema`: compile a schema description and print the result.
//!
//! With no path the builtin schema is shown. Every derived property
//! (storage name, index name, analyzer, multi-valued behavior) is printed,
//! so the command doubles as a validator for custom schema files.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use docsync_core::schema::{CompiledSchema, MultiValuedOperation, MultiValuedType, SchemaField};

/// Compile the schema at `path`, or the builtin one.
pub fn compile(path: Option<&Path>) -> Result<Arc<CompiledSchema>> {
    match path {
        Some(path) => {
            let schema = CompiledSchema::from_path(path)
                .with_context(|| format!("Invalid schema {}", path.display()))?;
            Ok(Arc::new(schema))
        }
        None => Ok(CompiledSchema::builtin()?),
    }
}

fn multi_label(field: &SchemaField) -> String {
    match field.multi_valued {
        None => "-".to_string(),
        Some(mv) => {
            let kind = match mv.kind {
                MultiValuedType::List => "list",
                MultiValuedType::Set => "set",
            };
            let op = match mv.operation {
                MultiValuedOperation::Append => "append",
                MultiValuedOperation::Replace => "replace",
            };
            format!("{}/{}", kind, op)
        }
    }
}

fn flags(field: &SchemaField) -> String {
    let mut flags = Vec::new();
    if field.unique_key {
        flags.push("unique");
    }
    if field.required {
        flags.push("required");
    }
    if field.indexed {
        flags.push("indexed");
    }
    if field.stored {
        flags.push("stored");
    }
    if flags.is_empty() {
        "-".to_string()
    } else {
        flags.join(",")
    }
}

/// CLI entry point for `docsync schema [PATH]`.
pub fn run_schema(path: Option<&Path>) -> Result<()> {
    let schema = compile(path)?;

    println!(
        "{:<16} {:<9} {:<14} {:<14} {:<14} {:<14} FLAGS",
        "FIELD", "TYPE", "STORE", "INDEX", "ANALYZER", "MULTI"
    );
    for field in schema.fields() {
        println!(
            "{:<16} {:<9} {:<14} {:<14} {:<14} {:<14} {}",
            field.name,
            field.field_type.as_str(),
            field.store_field,
            field.index_field.as_deref().unwrap_or("-"),
            field.analyzer.map(|a| a.as_str()).unwrap_or("-"),
            multi_label(field),
            flags(field),
        );
    }

    if !schema.copy_fields().is_empty() {
        println!();
        println!("copy fields:");
        for copy in schema.copy_fields() {
            println!("  {} -> {}", copy.source, copy.dest);
        }
    }

    println!();
    match schema.require_well_known() {
        Ok(()) => println!("ok: usable as a document store schema"),
        Err(e) => println!("note: not usable as a document store schema ({})", e),
    }
    Ok(())
}
