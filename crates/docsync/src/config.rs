//! Configuration parsing and validation.
//!
//! docsync is configured via a TOML file (default: `config/docsync.toml`).
//! Only `[db]` is required; every other section has defaults.
//!
//! # Example
//!
//! ```toml
//! [db]
//! path = "./data/docsync.sqlite"
//!
//! [schema]
//! path = "./config/schema.json"   # optional; builtin schema when absent
//!
//! [sync]
//! service_unavailable_backoff_secs = 300
//! max_metadata_pages = 1000
//!
//! [drivers.fixture.demo]
//! root = "./fixtures/demo"
//! include_globs = ["metadata/*.json"]
//! ```
//!
//! Relative paths resolve against the working directory.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Deserialize;

use docsync_core::schema::CompiledSchema;
use docsync_core::sync::SyncSettings;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub schema: SchemaConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub drivers: DriversConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SchemaConfig {
    /// Schema description to compile instead of the builtin one.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    #[serde(default = "default_service_unavailable_backoff_secs")]
    pub service_unavailable_backoff_secs: u64,
    #[serde(default = "default_max_metadata_pages")]
    pub max_metadata_pages: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            service_unavailable_backoff_secs: default_service_unavailable_backoff_secs(),
            max_metadata_pages: default_max_metadata_pages(),
        }
    }
}

fn default_service_unavailable_backoff_secs() -> u64 {
    300
}
fn default_max_metadata_pages() -> usize {
    1000
}

impl SyncConfig {
    pub fn settings(&self) -> SyncSettings {
        SyncSettings {
            service_unavailable_backoff_secs: self.service_unavailable_backoff_secs,
            max_metadata_pages: self.max_metadata_pages,
        }
    }
}

/// Named driver instances, grouped by driver type.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct DriversConfig {
    #[serde(default)]
    pub fixture: BTreeMap<String, FixtureDriverConfig>,
}

/// A local directory laid out as metadata pages plus content files.
#[derive(Debug, Deserialize, Clone)]
pub struct FixtureDriverConfig {
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
}

fn default_include_globs() -> Vec<String> {
    vec!["metadata/*.json".to_string()]
}

impl Config {
    /// A config with only a database path, for callers that build drivers
    /// themselves.
    pub fn with_db_path(path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig { path: path.into() },
            schema: SchemaConfig::default(),
            sync: SyncConfig::default(),
            drivers: DriversConfig::default(),
        }
    }

    /// Compile the configured schema, or return the shared builtin one.
    pub fn compiled_schema(&self) -> Result<Arc<CompiledSchema>> {
        match &self.schema.path {
            Some(path) => Ok(Arc::new(CompiledSchema::from_path(path).with_context(
                || format!("Failed to compile schema: {}", path.display()),
            )?)),
            None => Ok(CompiledSchema::builtin().context("Failed to compile builtin schema")?),
        }
    }
}

/// Load and validate a config file.
///
/// Validation rules:
/// - `sync.max_metadata_pages` must be > 0
/// - fixture driver names and roots must be non-empty
/// - the schema must compile and declare every well-known field
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.sync.max_metadata_pages == 0 {
        anyhow::bail!("sync.max_metadata_pages must be > 0");
    }

    for (name, fixture) in &config.drivers.fixture {
        if name.trim().is_empty() {
            anyhow::bail!("drivers.fixture instance names must not be empty");
        }
        if fixture.root.as_os_str().is_empty() {
            anyhow::bail!("drivers.fixture.{}.root must not be empty", name);
        }
    }

    let schema = config.compiled_schema()?;
    schema
        .require_well_known()
        .context("Schema cannot back the document store")?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("docsync.toml");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_defaults_apply() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = write_config(
            tmp.path(),
            r#"
[db]
path = "./data/docsync.sqlite"

[drivers.fixture.demo]
root = "./fixtures/demo"
"#,
        );
        let config = load_config(&path).unwrap();
        assert_eq!(config.sync.max_metadata_pages, 1000);
        assert_eq!(config.sync.service_unavailable_backoff_secs, 300);
        assert_eq!(
            config.drivers.fixture["demo"].include_globs,
            vec!["metadata/*.json"]
        );
        assert!(config.schema.path.is_none());
    }

    #[test]
    fn test_zero_page_cap_rejected() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = write_config(
            tmp.path(),
            "[db]\npath = \"x.sqlite\"\n\n[sync]\nmax_metadata_pages = 0\n",
        );
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn test_invalid_schema_fails_fast() {
        let tmp = tempfile::TempDir::new().unwrap();
        let schema = tmp.path().join("schema.json");
        std::fs::write(
            &schema,
            r#"{"fields": [{"name": "id", "type": "string", "unique_key": true}]}"#,
        )
        .unwrap();
        let path = write_config(
            tmp.path(),
            &format!(
                "[db]\npath = \"x.sqlite\"\n\n[schema]\npath = \"{}\"\n",
                schema.display()
            ),
        );
        let err = load_config(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("account_id"));
    }
}
