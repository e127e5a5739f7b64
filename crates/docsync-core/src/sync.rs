//! Sync orchestration.
//!
//! [`SyncTask::run`] performs one run for one (account, source) pair:
//!
//! ```text
//!  load milestone ── next-sync in future? ──▶ Deferred
//!       │
//!  dirty docs? ──▶ retrieve_data per doc ──▶ DirtyProcessed
//!       │
//!  retrieve_metadata until done
//!       │   RateLimited / ServiceUnavailable ──▶ persist next-sync, stop
//!       │   AuthRevoked ──▶ persist status, stop
//!       ▼
//!  upsert docs ─▶ apply deletions ─▶ persist cursor ──▶ Completed
//! ```
//!
//! Rate limits never sleep in-process. A run that hits one records the next
//! eligible time on the milestone it loaded and returns; the driver's
//! partial pages are discarded.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, Utc};

use crate::docstore::DocStore;
use crate::driver::{DataResult, Driver, DriverError, Payload};
use crate::extract::{ContentExtractor, PlainTextExtractor};
use crate::milestone::{Milestone, MilestoneStore, SyncStatus};
use crate::models::{fields, Document};
use crate::schema::MultiValuedOperation;
use crate::store::{Filter, FilterKey};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
    /// Backoff after the source reports an outage.
    pub service_unavailable_backoff_secs: u64,
    /// A cycle that has not finished after this many pages is aborted.
    pub max_metadata_pages: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            service_unavailable_backoff_secs: 300,
            max_metadata_pages: 1000,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub pages: usize,
    pub docs_upserted: usize,
    pub docs_rejected: usize,
    pub deleted: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirtyReport {
    /// Dirty documents whose content pass completed.
    pub processed: usize,
    pub children_written: usize,
    /// Placeholders and stale children deleted.
    pub removed: u64,
    /// Documents left dirty because the source was unavailable.
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Completed(CycleReport),
    DirtyProcessed(DirtyReport),
    Deferred { next_sync: DateTime<Utc> },
    RateLimited { next_sync: DateTime<Utc> },
    ServiceUnavailable { next_sync: DateTime<Utc> },
    AuthRevoked { reason: String },
}

pub struct SyncTask {
    account_id: String,
    source_id: String,
    driver: Arc<dyn Driver>,
    docstore: Arc<DocStore>,
    milestones: Arc<dyn MilestoneStore>,
    extractor: Arc<dyn ContentExtractor>,
    settings: SyncSettings,
}

impl SyncTask {
    pub fn new(
        account_id: impl Into<String>,
        source_id: impl Into<String>,
        driver: Arc<dyn Driver>,
        docstore: Arc<DocStore>,
        milestones: Arc<dyn MilestoneStore>,
    ) -> Self {
        Self {
            account_id: account_id.into(),
            source_id: source_id.into(),
            driver,
            docstore,
            milestones,
            extractor: Arc::new(PlainTextExtractor),
            settings: SyncSettings::default(),
        }
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn ContentExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_settings(mut self, settings: SyncSettings) -> Self {
        self.settings = settings;
        self
    }

    pub async fn run(&self) -> Result<SyncOutcome> {
        let milestone = self
            .milestones
            .get(&self.account_id, &self.source_id)
            .await
            .context("failed to load milestone")?
            .unwrap_or_default();

        if let Some(next_sync) = milestone.next_sync() {
            if next_sync > Utc::now() {
                tracing::info!(
                    account = %self.account_id,
                    source = %self.source_id,
                    next_sync = %next_sync,
                    "sync deferred"
                );
                return Ok(SyncOutcome::Deferred { next_sync });
            }
        }

        let dirty = self
            .docstore
            .dirty_count(&self.account_id, &self.source_id)
            .await?;
        if dirty > 0 {
            tracing::info!(
                account = %self.account_id,
                source = %self.source_id,
                dirty,
                "processing dirty documents"
            );
            return self.handle_dirty_docs(milestone).await;
        }

        self.poll_metadata(milestone).await
    }

    async fn poll_metadata(&self, milestone: Milestone) -> Result<SyncOutcome> {
        let mut cursor = milestone.driver_view();
        let mut docs = Vec::new();
        let mut ids_to_remove = Vec::new();
        let mut pages = 0;

        loop {
            if pages >= self.settings.max_metadata_pages {
                bail!(
                    "driver '{}' returned {} metadata pages without finishing",
                    self.driver.name(),
                    pages
                );
            }
            match self.driver.retrieve_metadata(&cursor).await {
                Ok(page) => {
                    pages += 1;
                    tracing::debug!(
                        page = pages,
                        docs = page.docs.len(),
                        removals = page.ids_to_remove.len(),
                        done = page.done,
                        "metadata page"
                    );
                    docs.extend(page.docs);
                    ids_to_remove.extend(page.ids_to_remove);
                    cursor = page.milestone.driver_view();
                    if page.done {
                        break;
                    }
                }
                Err(e) => return self.driver_failure(milestone, e).await,
            }
        }

        let write = self
            .docstore
            .update(&self.account_id, &self.source_id, docs)
            .await?;
        let deleted = self.process_deletions(&ids_to_remove).await?;

        self.milestones
            .upsert(&self.account_id, &self.source_id, &cursor)
            .await
            .context("failed to persist milestone")?;

        let report = CycleReport {
            pages,
            docs_upserted: write.upserted,
            docs_rejected: write.rejected.len(),
            deleted,
        };
        tracing::info!(
            account = %self.account_id,
            source = %self.source_id,
            pages = report.pages,
            upserted = report.docs_upserted,
            rejected = report.docs_rejected,
            deleted = report.deleted,
            "sync cycle complete"
        );
        Ok(SyncOutcome::Completed(report))
    }

    /// Map a classified driver error to an outcome, persisting backoff or
    /// status on the milestone as loaded at the start of the run.
    async fn driver_failure(&self, milestone: Milestone, error: DriverError) -> Result<SyncOutcome> {
        match error {
            DriverError::RateLimited { duration_secs } => {
                let next_sync = self
                    .back_off(milestone, duration_secs, SyncStatus::RateLimited)
                    .await?;
                Ok(SyncOutcome::RateLimited { next_sync })
            }
            DriverError::ServiceUnavailable { reason } => {
                tracing::warn!(
                    account = %self.account_id,
                    source = %self.source_id,
                    reason = %reason,
                    "service unavailable"
                );
                let next_sync = self
                    .back_off(
                        milestone,
                        self.settings.service_unavailable_backoff_secs,
                        SyncStatus::ServiceUnavailable,
                    )
                    .await?;
                Ok(SyncOutcome::ServiceUnavailable { next_sync })
            }
            DriverError::AuthRevoked { reason } => {
                tracing::error!(
                    account = %self.account_id,
                    source = %self.source_id,
                    reason = %reason,
                    "authorization revoked"
                );
                let mut milestone = milestone;
                milestone.set_status(SyncStatus::AuthRevoked);
                self.persist(&milestone).await?;
                Ok(SyncOutcome::AuthRevoked { reason })
            }
            DriverError::Other(e) => {
                Err(e.context(format!("driver '{}' failed", self.driver.name())))
            }
        }
    }

    async fn back_off(
        &self,
        mut milestone: Milestone,
        secs: u64,
        status: SyncStatus,
    ) -> Result<DateTime<Utc>> {
        let next_sync = i64::try_from(secs)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|delay| Utc::now().checked_add_signed(delay))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        milestone.set_next_sync(next_sync);
        milestone.set_status(status);
        self.persist(&milestone).await?;
        tracing::warn!(
            account = %self.account_id,
            source = %self.source_id,
            status = status.as_str(),
            next_sync = %next_sync,
            "backing off"
        );
        Ok(next_sync)
    }

    async fn persist(&self, milestone: &Milestone) -> Result<()> {
        self.milestones
            .upsert(&self.account_id, &self.source_id, milestone)
            .await
            .context("failed to persist milestone")
    }

    /// Delete documents whose `external_id` the driver reported removed.
    async fn process_deletions(&self, external_ids: &[String]) -> Result<u64> {
        let mut seen = HashSet::new();
        let mut doomed = Vec::new();
        for external_id in external_ids {
            if !seen.insert(external_id.as_str()) {
                continue;
            }
            let filter = Filter::scope(&self.account_id, &self.source_id)
                .with(FilterKey::ExternalId, external_id.as_str());
            doomed.extend(self.docstore.select(&filter, None).await?);
        }
        if doomed.is_empty() {
            return Ok(0);
        }
        Ok(self.docstore.delete(&doomed).await?)
    }

    async fn handle_dirty_docs(&self, milestone: Milestone) -> Result<SyncOutcome> {
        let filter =
            Filter::scope(&self.account_id, &self.source_id).with(FilterKey::Dirty, true);
        let dirty_docs = self.docstore.select(&filter, None).await?;
        let mut report = DirtyReport::default();

        for doc in dirty_docs {
            match self.driver.retrieve_data(&doc).await {
                Ok(result) => self.apply_data(doc, result, &mut report).await?,
                Err(DriverError::ServiceUnavailable { reason }) => {
                    tracing::warn!(
                        id = doc.id().unwrap_or_default(),
                        reason = %reason,
                        "content unavailable, leaving document dirty"
                    );
                    report.failed += 1;
                }
                Err(e) => return self.driver_failure(milestone, e).await,
            }
        }

        tracing::info!(
            account = %self.account_id,
            source = %self.source_id,
            processed = report.processed,
            children = report.children_written,
            removed = report.removed,
            failed = report.failed,
            "dirty documents processed"
        );
        Ok(SyncOutcome::DirtyProcessed(report))
    }

    async fn apply_data(
        &self,
        parent: Document,
        result: DataResult,
        report: &mut DirtyReport,
    ) -> Result<()> {
        let mut update = self.rewrite_base(&parent);
        if let Some(text) = result.content.and_then(|payload| self.content_text(&parent, payload)) {
            update.set(fields::CONTENT, text);
        }
        update.set(fields::DIRTY, false);

        let children: Vec<Document> = result
            .docs
            .into_iter()
            .map(|child| self.claim_child(&parent, child))
            .collect();
        let keep_ids: Vec<String> = children
            .iter()
            .filter_map(|c| c.id().map(str::to_string))
            .collect();

        let mut batch = Vec::with_capacity(children.len() + 1);
        batch.push(update);
        batch.extend(children);
        let write = self.docstore.update_raw(&batch).await?;

        let parent_rejected = write.rejected.iter().any(|r| r.index == 0);
        if parent_rejected {
            tracing::warn!(id = parent.id().unwrap_or_default(), "content update rejected");
            report.failed += 1;
        } else {
            report.processed += 1;
        }
        report.children_written += write.upserted - usize::from(!parent_rejected);

        if result.should_remove_doc {
            report.removed += self.docstore.delete(std::slice::from_ref(&parent)).await?;
        }
        if result.should_remove_children {
            report.removed += self.remove_child_docs(&parent, &keep_ids).await?;
        }
        Ok(())
    }

    /// Delete stored children of `parent` (same tenant and `type`) whose id
    /// is not in `keep_ids`.
    pub async fn remove_child_docs(&self, parent: &Document, keep_ids: &[String]) -> Result<u64> {
        let Some(parent_id) = parent.id() else {
            return Ok(0);
        };
        let doc_type = parent.get(fields::TYPE).cloned().unwrap_or(Value::Null);
        let filter = Filter::scope(&self.account_id, &self.source_id)
            .with(FilterKey::Type, doc_type)
            .with(FilterKey::ParentId, parent_id);

        let keep: HashSet<&str> = keep_ids.iter().map(String::as_str).collect();
        let stale: Vec<Document> = self
            .docstore
            .select(&filter, None)
            .await?
            .into_iter()
            .filter(|child| !child.id().is_some_and(|id| keep.contains(id)))
            .collect();
        if stale.is_empty() {
            return Ok(0);
        }
        tracing::debug!(parent = parent_id, stale = stale.len(), "removing stale children");
        Ok(self.docstore.delete(&stale).await?)
    }

    /// The stored document as a full rewrite. Append-mode fields are kept
    /// present but empty, so the rewrite passes the required-field check
    /// without appending their values a second time.
    fn rewrite_base(&self, doc: &Document) -> Document {
        let schema = self.docstore.schema();
        doc.iter()
            .map(|(name, value)| {
                let appends = schema.field(name).and_then(|f| f.multi_valued).is_some_and(|mv| {
                    mv.operation == MultiValuedOperation::Append
                });
                if appends {
                    (name.clone(), Value::List(Vec::new()))
                } else {
                    (name.clone(), value.clone())
                }
            })
            .collect()
    }

    fn claim_child(&self, parent: &Document, mut child: Document) -> Document {
        for name in [fields::ACCOUNT_ID, fields::SOURCE_ID] {
            if !child.contains(name) {
                if let Some(value) = parent.get(name) {
                    child.set(name, value.clone());
                }
            }
        }
        child
    }

    fn content_text(&self, doc: &Document, payload: Payload) -> Option<String> {
        match payload {
            Payload::Text(text) => Some(text),
            Payload::Bytes(bytes) => {
                let content_type = doc.get("mime_type").and_then(Value::as_str);
                match self.extractor.extract(&bytes, content_type) {
                    Ok(text) => Some(text),
                    Err(e) => {
                        tracing::debug!(
                            id = doc.id().unwrap_or_default(),
                            error = %e,
                            "content extraction failed"
                        );
                        None
                    }
                }
            }
        }
    }
}
