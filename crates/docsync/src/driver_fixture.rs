//! Fixture driver: a local directory standing in for an external source.
//!
//! # Layout
//!
//! ```text
//! <root>/
//!   metadata/0001.json        one metadata page per file, sorted by path
//!   metadata/0002.json
//!   data/<external_id>        raw content bytes
//!   children/<external_id>.json
//! ```
//!
//! A page file is `{"docs": [...], "ids_to_remove": [...]}`. A page may
//! instead simulate a failure with `{"rate_limited": <secs>}`,
//! `{"service_unavailable": "<reason>"}` or `{"auth_revoked": "<reason>"}`.
//!
//! The cursor key `page` holds the index of the next page to read. Pages
//! added after a completed cycle are picked up by the next run.
//!
//! A children file is `{"docs": [...], "should_remove_children": bool,
//! "should_remove_doc": bool}` and is returned from `retrieve_data`
//! together with the content bytes.

use std::path::{Component, Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Deserialize;
use walkdir::WalkDir;

use docsync_core::driver::{DataResult, Driver, DriverError, MetadataPage, Payload};
use docsync_core::milestone::Milestone;
use docsync_core::models::Document;

use crate::config::FixtureDriverConfig;

const PAGE_KEY: &str = "page";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PageFile {
    #[serde(default)]
    docs: Vec<Document>,
    #[serde(default)]
    ids_to_remove: Vec<String>,
    #[serde(default)]
    rate_limited: Option<u64>,
    #[serde(default)]
    service_unavailable: Option<String>,
    #[serde(default)]
    auth_revoked: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ChildrenFile {
    #[serde(default)]
    docs: Vec<Document>,
    #[serde(default)]
    should_remove_children: bool,
    #[serde(default)]
    should_remove_doc: bool,
}

pub struct FixtureDriver {
    name: String,
    root: PathBuf,
    include_set: GlobSet,
}

impl FixtureDriver {
    pub fn new(name: &str, config: &FixtureDriverConfig) -> Result<Self> {
        if !config.root.is_dir() {
            bail!(
                "Fixture driver root does not exist: {}",
                config.root.display()
            );
        }
        Ok(Self {
            name: format!("fixture:{}", name),
            root: config.root.clone(),
            include_set: build_globset(&config.include_globs)?,
        })
    }

    /// Page files under the root, sorted by relative path.
    fn page_files(&self) -> Result<Vec<PathBuf>> {
        let mut pages = Vec::new();
        for entry in WalkDir::new(&self.root) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let relative = path.strip_prefix(&self.root).unwrap_or(path);
            if self.include_set.is_match(relative) {
                pages.push(relative.to_path_buf());
            }
        }
        pages.sort();
        Ok(pages)
    }

    fn read_page(&self, relative: &Path) -> Result<PageFile> {
        let path = self.root.join(relative);
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read page {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("Invalid page file {}", path.display()))
    }

    /// Resolve `<root>/<dir>/<name><suffix>` for a document-supplied name,
    /// refusing anything that is not a single plain path component.
    fn content_path(&self, dir: &str, name: &str, suffix: &str) -> Option<PathBuf> {
        let file = format!("{}{}", name, suffix);
        let mut components = Path::new(&file).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Some(self.root.join(dir).join(file)),
            _ => None,
        }
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

fn page_index(cursor: &Milestone) -> Result<usize> {
    match cursor.get(PAGE_KEY) {
        None => Ok(0),
        Some(value) => value
            .as_u64()
            .map(|n| n as usize)
            .ok_or_else(|| anyhow!("cursor key '{}' is not a page index: {}", PAGE_KEY, value)),
    }
}

#[async_trait]
impl Driver for FixtureDriver {
    fn name(&self) -> &str {
        &self.name
    }

    async fn retrieve_metadata(&self, cursor: &Milestone) -> Result<MetadataPage, DriverError> {
        let index = page_index(cursor)?;
        let pages = self.page_files()?;

        let Some(relative) = pages.get(index) else {
            return Ok(MetadataPage {
                milestone: cursor.clone(),
                done: true,
                ..Default::default()
            });
        };

        let page = self.read_page(relative)?;
        if let Some(secs) = page.rate_limited {
            return Err(DriverError::rate_limited(Some(secs)));
        }
        if let Some(reason) = page.service_unavailable {
            return Err(DriverError::service_unavailable(reason));
        }
        if let Some(reason) = page.auth_revoked {
            return Err(DriverError::auth_revoked(reason));
        }

        let mut milestone = cursor.clone();
        milestone.insert(PAGE_KEY, serde_json::json!(index + 1));
        tracing::debug!(page = %relative.display(), docs = page.docs.len(), "fixture page");

        Ok(MetadataPage {
            milestone,
            docs: page.docs,
            ids_to_remove: page.ids_to_remove,
            done: index + 1 >= pages.len(),
        })
    }

    async fn retrieve_data(&self, doc: &Document) -> Result<DataResult, DriverError> {
        let Some(key) = doc.external_id().or_else(|| doc.id()) else {
            return Ok(DataResult::default());
        };

        let mut result = DataResult::default();

        match self.content_path("data", key, "") {
            Some(path) if path.is_file() => {
                let bytes = std::fs::read(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                result.content = Some(Payload::Bytes(bytes));
            }
            Some(_) => {}
            None => {
                tracing::warn!(key, "external id is not a plain file name, skipping content");
                return Ok(result);
            }
        }

        if let Some(path) = self.content_path("children", key, ".json") {
            if path.is_file() {
                let raw = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                let children: ChildrenFile = serde_json::from_str(&raw)
                    .with_context(|| format!("Invalid children file {}", path.display()))?;
                result.docs = children.docs;
                result.should_remove_children = children.should_remove_children;
                result.should_remove_doc = children.should_remove_doc;
            }
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn fixture(pages: &[&str]) -> (TempDir, FixtureDriver) {
        let tmp = TempDir::new().unwrap();
        let meta = tmp.path().join("metadata");
        fs::create_dir_all(&meta).unwrap();
        for (i, body) in pages.iter().enumerate() {
            fs::write(meta.join(format!("{:04}.json", i + 1)), body).unwrap();
        }
        let config = FixtureDriverConfig {
            root: tmp.path().to_path_buf(),
            include_globs: vec!["metadata/*.json".to_string()],
        };
        let driver = FixtureDriver::new("demo", &config).unwrap();
        (tmp, driver)
    }

    #[tokio::test]
    async fn test_pages_advance_cursor() {
        let (_tmp, driver) = fixture(&[
            r#"{"docs": [{"id": "a"}]}"#,
            r#"{"docs": [{"id": "b"}], "ids_to_remove": ["x"]}"#,
        ]);

        let first = driver.retrieve_metadata(&Milestone::new()).await.unwrap();
        assert_eq!(first.docs.len(), 1);
        assert!(!first.done);
        assert_eq!(first.milestone.get("page"), Some(&serde_json::json!(1)));

        let second = driver.retrieve_metadata(&first.milestone).await.unwrap();
        assert!(second.done);
        assert_eq!(second.ids_to_remove, vec!["x"]);

        let idle = driver.retrieve_metadata(&second.milestone).await.unwrap();
        assert!(idle.done);
        assert!(idle.docs.is_empty());
    }

    #[tokio::test]
    async fn test_rate_limited_page() {
        let (_tmp, driver) = fixture(&[r#"{"rate_limited": 90}"#]);
        let err = driver.retrieve_metadata(&Milestone::new()).await.unwrap_err();
        assert!(matches!(err, DriverError::RateLimited { duration_secs: 90 }));
    }

    #[tokio::test]
    async fn test_retrieve_data_reads_bytes_and_children() {
        let (tmp, driver) = fixture(&[]);
        fs::create_dir_all(tmp.path().join("data")).unwrap();
        fs::create_dir_all(tmp.path().join("children")).unwrap();
        fs::write(tmp.path().join("data/ext-1"), "body text").unwrap();
        fs::write(
            tmp.path().join("children/ext-1.json"),
            r#"{"docs": [{"id": "c1", "parent_id": "p"}], "should_remove_children": true}"#,
        )
        .unwrap();

        let doc = Document::new().with("id", "p").with("external_id", "ext-1");
        let result = driver.retrieve_data(&doc).await.unwrap();
        assert_eq!(result.content, Some(Payload::Bytes(b"body text".to_vec())));
        assert_eq!(result.docs.len(), 1);
        assert!(result.should_remove_children);
    }

    #[tokio::test]
    async fn test_path_traversal_refused() {
        let (_tmp, driver) = fixture(&[]);
        let doc = Document::new().with("id", "p").with("external_id", "../secret");
        let result = driver.retrieve_data(&doc).await.unwrap();
        assert!(result.content.is_none());
    }
}
