//! End-to-end orchestrator runs against a scripted driver.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use docsync_core::driver::{DataResult, Driver, DriverError, MetadataPage, Payload};
use docsync_core::milestone::{
    InMemoryMilestoneStore, Milestone, MilestoneStore, SyncStatus, NEXT_SYNC_KEY,
    SYNC_STATUS_KEY,
};
use docsync_core::schema::CompiledSchema;
use docsync_core::store::memory::MemoryBackend;
use docsync_core::store::Filter;
use docsync_core::sync::{SyncOutcome, SyncSettings, SyncTask};
use docsync_core::{DocStore, Document, Value};
use serde_json::json;

const ACCOUNT: &str = "acct";
const SOURCE: &str = "src";

#[derive(Default)]
struct ScriptedDriver {
    pages: Mutex<VecDeque<Result<MetadataPage, DriverError>>>,
    data: Mutex<HashMap<String, VecDeque<Result<DataResult, DriverError>>>>,
    cursors_seen: Mutex<Vec<Milestone>>,
    metadata_calls: AtomicUsize,
    data_calls: AtomicUsize,
}

impl ScriptedDriver {
    fn page(self, page: Result<MetadataPage, DriverError>) -> Self {
        self.pages.lock().unwrap().push_back(page);
        self
    }

    fn data(self, id: &str, result: Result<DataResult, DriverError>) -> Self {
        self.data
            .lock()
            .unwrap()
            .entry(id.to_string())
            .or_default()
            .push_back(result);
        self
    }
}

#[async_trait]
impl Driver for ScriptedDriver {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn retrieve_metadata(&self, cursor: &Milestone) -> Result<MetadataPage, DriverError> {
        self.metadata_calls.fetch_add(1, Ordering::SeqCst);
        self.cursors_seen.lock().unwrap().push(cursor.clone());
        self.pages.lock().unwrap().pop_front().unwrap_or_else(|| {
            Ok(MetadataPage {
                milestone: cursor.clone(),
                done: true,
                ..Default::default()
            })
        })
    }

    async fn retrieve_data(&self, doc: &Document) -> Result<DataResult, DriverError> {
        self.data_calls.fetch_add(1, Ordering::SeqCst);
        let id = doc.id().unwrap_or_default().to_string();
        self.data
            .lock()
            .unwrap()
            .get_mut(&id)
            .and_then(|queue| queue.pop_front())
            .unwrap_or_else(|| Ok(DataResult::default()))
    }
}

struct Harness {
    docstore: Arc<DocStore>,
    milestones: Arc<InMemoryMilestoneStore>,
}

impl Harness {
    fn new() -> Self {
        Self::with_schema(CompiledSchema::builtin().unwrap())
    }

    fn with_schema(schema: Arc<CompiledSchema>) -> Self {
        Self {
            docstore: Arc::new(DocStore::new(Arc::new(MemoryBackend::new()), schema).unwrap()),
            milestones: Arc::new(InMemoryMilestoneStore::new()),
        }
    }

    fn task(&self, driver: Arc<ScriptedDriver>) -> SyncTask {
        SyncTask::new(
            ACCOUNT,
            SOURCE,
            driver,
            self.docstore.clone(),
            self.milestones.clone(),
        )
    }

    async fn milestone(&self) -> Milestone {
        self.milestones.get(ACCOUNT, SOURCE).await.unwrap().unwrap_or_default()
    }

    async fn all_docs(&self) -> Vec<Document> {
        self.docstore
            .select(&Filter::scope(ACCOUNT, SOURCE), None)
            .await
            .unwrap()
    }
}

fn cursor(page: i64) -> Milestone {
    let mut m = Milestone::new();
    m.insert("page", json!(page));
    m
}

fn page(n: i64, docs: Vec<Document>, done: bool) -> MetadataPage {
    MetadataPage {
        milestone: cursor(n),
        docs,
        ids_to_remove: Vec::new(),
        done,
    }
}

fn doc(id: &str) -> Document {
    Document::new()
        .with("id", id)
        .with("external_id", format!("ext-{id}"))
        .with("type", "file")
}

#[tokio::test]
async fn test_completed_cycle_persists_cursor() {
    let h = Harness::new();
    let driver = Arc::new(
        ScriptedDriver::default()
            .page(Ok(page(1, vec![doc("a")], false)))
            .page(Ok(page(2, vec![doc("b")], true))),
    );

    let outcome = h.task(driver.clone()).run().await.unwrap();
    match outcome {
        SyncOutcome::Completed(report) => {
            assert_eq!(report.pages, 2);
            assert_eq!(report.docs_upserted, 2);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }

    assert_eq!(h.all_docs().await.len(), 2);
    assert_eq!(h.milestone().await.get("page"), Some(&json!(2)));
    let seen = driver.cursors_seen.lock().unwrap();
    assert_eq!(seen[1].get("page"), Some(&json!(1)));
}

#[tokio::test]
async fn test_rate_limit_discards_batch_and_keeps_cursor() {
    let h = Harness::new();
    let mut start = cursor(7);
    start.insert("token", json!("abc"));
    h.milestones.upsert(ACCOUNT, SOURCE, &start).await.unwrap();

    let driver = Arc::new(
        ScriptedDriver::default()
            .page(Ok(page(8, vec![doc("a")], false)))
            .page(Err(DriverError::RateLimited { duration_secs: 60 })),
    );
    let before = Utc::now();
    let outcome = h.task(driver.clone()).run().await.unwrap();

    let next_sync = match outcome {
        SyncOutcome::RateLimited { next_sync } => next_sync,
        other => panic!("unexpected outcome: {other:?}"),
    };
    assert!(next_sync >= before + Duration::seconds(59));
    assert!(h.all_docs().await.is_empty());

    let stored = h.milestone().await;
    assert_eq!(stored.get("page"), Some(&json!(7)));
    assert_eq!(stored.get("token"), Some(&json!("abc")));
    assert_eq!(stored.status(), Some(SyncStatus::RateLimited));
    assert_eq!(
        stored.next_sync().map(|t| t.timestamp()),
        Some(next_sync.timestamp())
    );

    let again = h.task(driver.clone()).run().await.unwrap();
    assert!(matches!(again, SyncOutcome::Deferred { .. }));
    assert_eq!(driver.metadata_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_driver_never_sees_reserved_keys() {
    let h = Harness::new();
    let mut start = cursor(1);
    start.set_status(SyncStatus::ServiceUnavailable);
    start.set_next_sync(Utc::now() - Duration::seconds(10));
    h.milestones.upsert(ACCOUNT, SOURCE, &start).await.unwrap();

    let mut sneaky = cursor(2);
    sneaky.insert(NEXT_SYNC_KEY, json!(i64::MAX));
    let driver = Arc::new(ScriptedDriver::default().page(Ok(MetadataPage {
        milestone: sneaky,
        done: true,
        ..Default::default()
    })));

    let outcome = h.task(driver.clone()).run().await.unwrap();
    assert!(matches!(outcome, SyncOutcome::Completed(_)));

    let seen = driver.cursors_seen.lock().unwrap();
    assert!(seen[0].get(NEXT_SYNC_KEY).is_none());
    assert!(seen[0].get(SYNC_STATUS_KEY).is_none());

    let stored = h.milestone().await;
    assert!(stored.get(NEXT_SYNC_KEY).is_none());
    assert!(stored.status().is_none());
    assert_eq!(stored.get("page"), Some(&json!(2)));
}

#[tokio::test]
async fn test_deletions_apply_after_upserts() {
    let h = Harness::new();
    h.docstore
        .update(ACCOUNT, SOURCE, vec![doc("old")])
        .await
        .unwrap();

    let driver = Arc::new(ScriptedDriver::default().page(Ok(MetadataPage {
        milestone: cursor(1),
        docs: vec![doc("new")],
        ids_to_remove: vec!["ext-new".to_string(), "ext-old".to_string()],
        done: true,
    })));

    let outcome = h.task(driver).run().await.unwrap();
    match outcome {
        SyncOutcome::Completed(report) => assert_eq!(report.deleted, 2),
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(h.all_docs().await.is_empty());
}

#[tokio::test]
async fn test_service_unavailable_schedules_short_backoff() {
    let h = Harness::new();
    let driver = Arc::new(
        ScriptedDriver::default()
            .page(Ok(page(1, vec![doc("a")], false)))
            .page(Err(DriverError::service_unavailable("502"))),
    );
    let task = h.task(driver).with_settings(SyncSettings {
        service_unavailable_backoff_secs: 120,
        ..SyncSettings::default()
    });

    let before = Utc::now();
    let outcome = task.run().await.unwrap();
    let next_sync = match outcome {
        SyncOutcome::ServiceUnavailable { next_sync } => next_sync,
        other => panic!("unexpected outcome: {other:?}"),
    };
    assert!(next_sync >= before + Duration::seconds(119));
    assert!(next_sync <= Utc::now() + Duration::seconds(121));
    assert!(h.all_docs().await.is_empty());
    assert_eq!(h.milestone().await.status(), Some(SyncStatus::ServiceUnavailable));
}

#[tokio::test]
async fn test_auth_revoked_persists_status_until_success() {
    let h = Harness::new();
    h.milestones.upsert(ACCOUNT, SOURCE, &cursor(3)).await.unwrap();

    let driver = Arc::new(
        ScriptedDriver::default().page(Err(DriverError::auth_revoked("token revoked"))),
    );
    let outcome = h.task(driver.clone()).run().await.unwrap();
    assert!(matches!(outcome, SyncOutcome::AuthRevoked { .. }));

    let stored = h.milestone().await;
    assert_eq!(stored.status(), Some(SyncStatus::AuthRevoked));
    assert!(stored.next_sync().is_none());
    assert_eq!(stored.get("page"), Some(&json!(3)));

    // Script is exhausted, so the next call returns a finished page.
    let outcome = h.task(driver).run().await.unwrap();
    assert!(matches!(outcome, SyncOutcome::Completed(_)));
    assert!(h.milestone().await.status().is_none());
}

#[tokio::test]
async fn test_runaway_driver_hits_page_cap() {
    let h = Harness::new();
    let mut driver = ScriptedDriver::default();
    for n in 0..5 {
        driver = driver.page(Ok(page(n, vec![doc(&format!("d{n}"))], false)));
    }
    let task = h.task(Arc::new(driver)).with_settings(SyncSettings {
        max_metadata_pages: 3,
        ..SyncSettings::default()
    });

    assert!(task.run().await.is_err());
    assert!(h.all_docs().await.is_empty());
    assert!(h.milestones.get(ACCOUNT, SOURCE).await.unwrap().is_none());
}

#[tokio::test]
async fn test_dirty_backfill_runs_instead_of_metadata() {
    let h = Harness::new();
    h.docstore
        .update(
            ACCOUNT,
            SOURCE,
            vec![doc("p").with("dirty", true).with("tag", vec!["keep"])],
        )
        .await
        .unwrap();

    let child = Document::new()
        .with("id", "c1")
        .with("type", "attachment")
        .with("parent_id", "p");
    let driver = Arc::new(ScriptedDriver::default().data(
        "p",
        Ok(DataResult {
            content: Some(Payload::Text("hello world".to_string())),
            docs: vec![child],
            ..Default::default()
        }),
    ));

    let outcome = h.task(driver.clone()).run().await.unwrap();
    match outcome {
        SyncOutcome::DirtyProcessed(report) => {
            assert_eq!(report.processed, 1);
            assert_eq!(report.children_written, 1);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(driver.metadata_calls.load(Ordering::SeqCst), 0);

    let parent = h.docstore.get(ACCOUNT, SOURCE, "p").await.unwrap().unwrap();
    assert!(!parent.is_dirty());
    assert_eq!(parent.get("content"), Some(&Value::from("hello world")));
    assert_eq!(parent.get("tag"), Some(&Value::from(vec!["keep"])));

    let child = h.docstore.get(ACCOUNT, SOURCE, "c1").await.unwrap().unwrap();
    assert_eq!(child.account_id(), Some(ACCOUNT));
    assert_eq!(child.source_id(), Some(SOURCE));

    let next = h.task(driver.clone()).run().await.unwrap();
    assert!(matches!(next, SyncOutcome::Completed(_)));
    assert_eq!(driver.metadata_calls.load(Ordering::SeqCst), 1);
}

/// The builtin schema with `title` made required.
fn schema_requiring_title() -> Arc<CompiledSchema> {
    let mut raw: serde_json::Value =
        serde_json::from_str(include_str!("../schema/builtin_schema.json")).unwrap();
    let fields = raw["fields"].as_array_mut().unwrap();
    let title = fields.iter_mut().find(|f| f["name"] == "title").unwrap();
    title["required"] = json!(true);
    Arc::new(CompiledSchema::from_json_str(&raw.to_string()).unwrap())
}

#[tokio::test]
async fn test_backfill_with_required_non_key_field_clears_dirty() {
    let h = Harness::with_schema(schema_requiring_title());
    h.docstore
        .update(
            ACCOUNT,
            SOURCE,
            vec![doc("p")
                .with("title", "Plan")
                .with("dirty", true)
                .with("history", "created")],
        )
        .await
        .unwrap();

    let driver = Arc::new(ScriptedDriver::default().data(
        "p",
        Ok(DataResult {
            content: Some(Payload::Text("hello".to_string())),
            ..Default::default()
        }),
    ));

    match h.task(driver.clone()).run().await.unwrap() {
        SyncOutcome::DirtyProcessed(report) => {
            assert_eq!(report.processed, 1);
            assert_eq!(report.failed, 0);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }

    let parent = h.docstore.get(ACCOUNT, SOURCE, "p").await.unwrap().unwrap();
    assert!(!parent.is_dirty());
    assert_eq!(parent.get("content"), Some(&Value::from("hello")));
    assert_eq!(parent.get("title"), Some(&Value::from("Plan")));
    assert_eq!(parent.get("history"), Some(&Value::from(vec!["created"])));
    assert_eq!(h.docstore.dirty_count(ACCOUNT, SOURCE).await.unwrap(), 0);

    let next = h.task(driver.clone()).run().await.unwrap();
    assert!(matches!(next, SyncOutcome::Completed(_)));
    assert_eq!(driver.metadata_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_child_pruning_keeps_listed_children() {
    let h = Harness::new();
    let child = |id: &str, doc_type: &str| {
        Document::new()
            .with("id", id)
            .with("type", doc_type)
            .with("parent_id", "p")
    };
    h.docstore
        .update(
            ACCOUNT,
            SOURCE,
            vec![
                doc("p").with("dirty", true),
                child("c1", "file"),
                child("c2", "file"),
                child("c3", "comment"),
            ],
        )
        .await
        .unwrap();

    let driver = Arc::new(ScriptedDriver::default().data(
        "p",
        Ok(DataResult {
            docs: vec![child("c1", "file")],
            should_remove_children: true,
            ..Default::default()
        }),
    ));

    let outcome = h.task(driver).run().await.unwrap();
    match outcome {
        SyncOutcome::DirtyProcessed(report) => assert_eq!(report.removed, 1),
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(h.docstore.get(ACCOUNT, SOURCE, "c1").await.unwrap().is_some());
    assert!(h.docstore.get(ACCOUNT, SOURCE, "c2").await.unwrap().is_none());
    assert!(h.docstore.get(ACCOUNT, SOURCE, "c3").await.unwrap().is_some());
}

#[tokio::test]
async fn test_placeholder_removed_on_request() {
    let h = Harness::new();
    h.docstore
        .update(ACCOUNT, SOURCE, vec![doc("p").with("dirty", true)])
        .await
        .unwrap();
    let driver = Arc::new(ScriptedDriver::default().data(
        "p",
        Ok(DataResult {
            should_remove_doc: true,
            ..Default::default()
        }),
    ));

    h.task(driver).run().await.unwrap();
    assert!(h.docstore.get(ACCOUNT, SOURCE, "p").await.unwrap().is_none());
}

#[tokio::test]
async fn test_unavailable_content_stays_dirty() {
    let h = Harness::new();
    h.docstore
        .update(
            ACCOUNT,
            SOURCE,
            vec![doc("a").with("dirty", true), doc("b").with("dirty", true)],
        )
        .await
        .unwrap();
    let driver = Arc::new(
        ScriptedDriver::default()
            .data("a", Err(DriverError::service_unavailable("timeout")))
            .data(
                "b",
                Ok(DataResult {
                    content: Some(Payload::Bytes(vec![0xff, 0xfe])),
                    ..Default::default()
                }),
            ),
    );

    let outcome = h.task(driver).run().await.unwrap();
    match outcome {
        SyncOutcome::DirtyProcessed(report) => {
            assert_eq!(report.processed, 1);
            assert_eq!(report.failed, 1);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(h.docstore.dirty_count(ACCOUNT, SOURCE).await.unwrap(), 1);
    let b = h.docstore.get(ACCOUNT, SOURCE, "b").await.unwrap().unwrap();
    assert!(!b.is_dirty());
    assert!(b.get("content").is_none());
}

#[tokio::test]
async fn test_rate_limit_during_backfill_stops_run() {
    let h = Harness::new();
    h.docstore
        .update(
            ACCOUNT,
            SOURCE,
            vec![doc("a").with("dirty", true), doc("b").with("dirty", true)],
        )
        .await
        .unwrap();
    let driver = Arc::new(
        ScriptedDriver::default().data("a", Err(DriverError::rate_limited(None))),
    );

    let outcome = h.task(driver.clone()).run().await.unwrap();
    let next_sync = match outcome {
        SyncOutcome::RateLimited { next_sync } => next_sync,
        other => panic!("unexpected outcome: {other:?}"),
    };
    assert!(next_sync > Utc::now() + Duration::seconds(1700));
    assert_eq!(driver.data_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.docstore.dirty_count(ACCOUNT, SOURCE).await.unwrap(), 2);

    // Dirty documents remain, but the backoff is checked first.
    let again = h.task(driver.clone()).run().await.unwrap();
    match again {
        SyncOutcome::Deferred { next_sync: deferred } => {
            assert_eq!(deferred.timestamp(), next_sync.timestamp())
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(driver.data_calls.load(Ordering::SeqCst), 1);
    assert_eq!(driver.metadata_calls.load(Ordering::SeqCst), 0);
}
