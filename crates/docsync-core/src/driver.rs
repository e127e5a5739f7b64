//! The driver contract.
//!
//! A [`Driver`] adapts one external source (a file share, a task tracker,
//! a local fixture directory) to the sync engine. It is a pure pull
//! interface: the orchestrator calls it, the driver never calls back.
//!
//! # Lifecycle
//!
//! ```text
//!  SyncTask::run
//!    │
//!    ├─ retrieve_data(doc)       once per dirty document
//!    │
//!    └─ retrieve_metadata(cursor) ─┐
//!         ▲                        │ MetadataPage { milestone, docs,
//!         └──── until done ────────┘               ids_to_remove, done }
//! ```
//!
//! Errors are classified so the orchestrator can decide between backing
//! off, stopping, and failing hard.

use async_trait::async_trait;
use thiserror::Error;

use crate::milestone::Milestone;
use crate::models::Document;

/// Backoff applied when a source rate-limits without saying for how long.
pub const DEFAULT_RATE_LIMIT_SECS: u64 = 1800;

// ═══════════════════════════════════════════════════════════════════════
// Results
// ═══════════════════════════════════════════════════════════════════════

/// One page of metadata.
#[derive(Debug, Clone, Default)]
pub struct MetadataPage {
    /// Cursor to pass to the next call and to persist once the cycle ends.
    pub milestone: Milestone,
    pub docs: Vec<Document>,
    /// External ids of documents removed at the source.
    pub ids_to_remove: Vec<String>,
    /// No more pages this cycle.
    pub done: bool,
}

/// Raw document content.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Already text; stored as-is.
    Text(String),
    /// Bytes that go through the content extractor.
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone, Default)]
pub struct DataResult {
    /// `None` means the content cannot be retrieved and should not be
    /// retried.
    pub content: Option<Payload>,
    /// Documents discovered while fetching, typically children.
    pub docs: Vec<Document>,
    /// The parent document was a placeholder and should go.
    pub should_remove_doc: bool,
    /// Remove stored children of the parent missing from `docs`.
    pub should_remove_children: bool,
}

// ═══════════════════════════════════════════════════════════════════════
// Errors
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("authorization revoked: {reason}")]
    AuthRevoked { reason: String },

    #[error("rate limited for {duration_secs}s")]
    RateLimited { duration_secs: u64 },

    #[error("service unavailable: {reason}")]
    ServiceUnavailable { reason: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DriverError {
    pub fn auth_revoked(reason: impl Into<String>) -> Self {
        Self::AuthRevoked {
            reason: reason.into(),
        }
    }

    /// Rate limit with the source's hint, or the default backoff.
    pub fn rate_limited(duration_secs: Option<u64>) -> Self {
        Self::RateLimited {
            duration_secs: duration_secs.unwrap_or(DEFAULT_RATE_LIMIT_SECS),
        }
    }

    pub fn service_unavailable(reason: impl Into<String>) -> Self {
        Self::ServiceUnavailable {
            reason: reason.into(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Driver Trait
// ═══════════════════════════════════════════════════════════════════════

/// A source adapter for one external account.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use docsync_core::driver::{DataResult, Driver, DriverError, MetadataPage};
/// use docsync_core::milestone::Milestone;
/// use docsync_core::models::Document;
///
/// struct Empty;
///
/// #[async_trait]
/// impl Driver for Empty {
///     fn name(&self) -> &str { "empty" }
///
///     async fn retrieve_metadata(&self, cursor: &Milestone) -> Result<MetadataPage, DriverError> {
///         Ok(MetadataPage { milestone: cursor.clone(), done: true, ..Default::default() })
///     }
///
///     async fn retrieve_data(&self, _doc: &Document) -> Result<DataResult, DriverError> {
///         Ok(DataResult::default())
///     }
/// }
/// ```
#[async_trait]
pub trait Driver: Send + Sync {
    fn name(&self) -> &str;

    /// Fetch the next page of metadata after `cursor`.
    ///
    /// The cursor never contains orchestrator-owned keys.
    async fn retrieve_metadata(&self, cursor: &Milestone) -> Result<MetadataPage, DriverError>;

    /// Fetch content for one document previously stored as dirty.
    async fn retrieve_data(&self, doc: &Document) -> Result<DataResult, DriverError>;
}
