//! Document store behaviour over the in-memory backend.

use std::sync::Arc;

use docsync_core::error::StoreError;
use docsync_core::schema::CompiledSchema;
use docsync_core::store::memory::MemoryBackend;
use docsync_core::store::{Filter, FilterKey};
use docsync_core::{DocStore, Document, Value};

fn store() -> DocStore {
    DocStore::new(
        Arc::new(MemoryBackend::new()),
        CompiledSchema::builtin().unwrap(),
    )
    .unwrap()
}

fn doc(id: &str) -> Document {
    Document::new().with("id", id).with("type", "file")
}

#[tokio::test]
async fn test_update_is_idempotent() {
    let store = store();
    let batch = vec![doc("a").with("title", "A").with("size", 3)];

    store.update("acct", "src", batch.clone()).await.unwrap();
    let first = store.get("acct", "src", "a").await.unwrap().unwrap();
    let report = store.update("acct", "src", batch).await.unwrap();
    let second = store.get("acct", "src", "a").await.unwrap().unwrap();

    assert_eq!(report.updated, 1);
    assert_eq!(report.inserted, 0);
    assert_eq!(first.get("title"), second.get("title"));
    assert_eq!(first.get("size"), second.get("size"));
    assert_eq!(
        store.select(&Filter::scope("acct", "src"), None).await.unwrap().len(),
        1
    );
}

#[tokio::test]
async fn test_same_id_in_other_tenant_is_distinct() {
    let store = store();
    store.update("acct", "src", vec![doc("a").with("title", "one")]).await.unwrap();
    store.update("acct", "other", vec![doc("a").with("title", "two")]).await.unwrap();
    store.update("acct2", "src", vec![doc("a").with("title", "three")]).await.unwrap();

    let one = store.get("acct", "src", "a").await.unwrap().unwrap();
    let two = store.get("acct", "other", "a").await.unwrap().unwrap();
    assert_eq!(one.get("title"), Some(&Value::from("one")));
    assert_eq!(two.get("title"), Some(&Value::from("two")));

    let counts = store.counts_by_type("acct").await.unwrap();
    assert_eq!(counts.get("file"), Some(&2));
}

#[tokio::test]
async fn test_set_append_vs_list_append() {
    let store = store();
    store
        .update("acct", "src", vec![doc("a").with("tag", vec!["x"]).with("history", "h")])
        .await
        .unwrap();
    store
        .update(
            "acct",
            "src",
            vec![doc("a").with("tag", vec!["x", "y"]).with("history", "h")],
        )
        .await
        .unwrap();

    let stored = store.get("acct", "src", "a").await.unwrap().unwrap();
    assert_eq!(stored.get("tag"), Some(&Value::from(vec!["x", "y"])));
    assert_eq!(stored.get("history"), Some(&Value::from(vec!["h", "h"])));
}

#[tokio::test]
async fn test_replace_overwrites_and_dedups_sets() {
    let store = store();
    store
        .update("acct", "src", vec![doc("a").with("author", vec!["ann", "bob"])])
        .await
        .unwrap();
    store
        .update("acct", "src", vec![doc("a").with("author", vec!["cat", "cat"])])
        .await
        .unwrap();

    let stored = store.get("acct", "src", "a").await.unwrap().unwrap();
    assert_eq!(stored.get("author"), Some(&Value::from(vec!["cat"])));
}

#[tokio::test]
async fn test_add_then_delete_leaves_nothing() {
    let store = store();
    store
        .update("acct", "src", vec![doc("a").with("external_id", "ext-a"), doc("b")])
        .await
        .unwrap();

    let doomed = store
        .select(
            &Filter::scope("acct", "src").with(FilterKey::ExternalId, "ext-a"),
            None,
        )
        .await
        .unwrap();
    assert_eq!(store.delete(&doomed).await.unwrap(), 1);
    assert!(store.get("acct", "src", "a").await.unwrap().is_none());
    assert!(store.get("acct", "src", "b").await.unwrap().is_some());
}

#[tokio::test]
async fn test_delete_is_scoped_to_full_identity() {
    let store = store();
    store.update("acct", "src", vec![doc("a")]).await.unwrap();
    store.update("acct2", "src", vec![doc("a")]).await.unwrap();

    let victim = store.get("acct", "src", "a").await.unwrap().unwrap();
    store.delete(&[victim]).await.unwrap();

    assert!(store.get("acct", "src", "a").await.unwrap().is_none());
    assert!(store.get("acct2", "src", "a").await.unwrap().is_some());
}

#[tokio::test]
async fn test_unallowed_filter_rejected() {
    let err = Filter::from_pairs(vec![("title".to_string(), Value::from("x"))]).unwrap_err();
    assert!(matches!(err, StoreError::UnallowedFilter(ref keys) if keys == &["title"]));
}

#[tokio::test]
async fn test_select_limit() {
    let store = store();
    store
        .update("acct", "src", vec![doc("a"), doc("b"), doc("c")])
        .await
        .unwrap();
    let docs = store
        .select(&Filter::scope("acct", "src"), Some(2))
        .await
        .unwrap();
    assert_eq!(docs.len(), 2);
}
