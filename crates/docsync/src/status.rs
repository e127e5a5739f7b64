//! Sync status and document counts.
//!
//! Read-only views over the milestone table and the document store, used
//! by `docsync status` and `docsync counts`.
//!
//! # Status Fields
//!
//! | Field | Source |
//! |-------|--------|
//! | `sync-status` | Last driver failure recorded in the milestone, if any |
//! | `next-sync` | Earliest time the next run may call the driver |
//! | `dirty` | Documents still waiting for content |

use std::collections::BTreeMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;

use docsync_core::milestone::{MilestoneStore, SyncStatus};

use crate::config::Config;
use crate::sqlite_store::{open_stores, Stores};

/// Sync state of one (account, source).
#[derive(Debug, Clone, Serialize)]
pub struct SourceSyncStatus {
    pub account_id: String,
    pub source_id: String,
    /// Whether a milestone has been persisted yet.
    pub has_milestone: bool,
    pub status: Option<SyncStatus>,
    pub next_sync: Option<DateTime<Utc>>,
    pub dirty: u64,
}

impl SourceSyncStatus {
    /// Whether a run started now would be deferred.
    pub fn is_deferred(&self, now: DateTime<Utc>) -> bool {
        self.next_sync.is_some_and(|at| at > now)
    }
}

async fn load_status(stores: &Stores, account_id: &str, source_id: &str) -> Result<SourceSyncStatus> {
    let milestone = stores.milestones.get(account_id, source_id).await?;
    let dirty = stores.docstore.dirty_count(account_id, source_id).await?;
    Ok(SourceSyncStatus {
        account_id: account_id.to_string(),
        source_id: source_id.to_string(),
        has_milestone: milestone.is_some(),
        status: milestone.as_ref().and_then(|m| m.status()),
        next_sync: milestone.as_ref().and_then(|m| m.next_sync()),
        dirty,
    })
}

pub async fn get_status(config: &Config, account_id: &str, source_id: &str) -> Result<SourceSyncStatus> {
    let stores = open_stores(config).await?;
    let status = load_status(&stores, account_id, source_id).await;
    stores.pool.close().await;
    status
}

/// CLI entry point for `docsync status`.
pub async fn run_status(config: &Config, account_id: &str, source_id: &str) -> Result<()> {
    let status = get_status(config, account_id, source_id).await?;
    let now = Utc::now();

    println!("{}/{}", status.account_id, status.source_id);
    if !status.has_milestone {
        println!("  never synced");
    }
    println!(
        "  status:    {}",
        status.status.map(|s| s.as_str()).unwrap_or("ok")
    );
    match status.next_sync {
        Some(at) if status.is_deferred(now) => {
            println!("  next run:  after {}", at.to_rfc3339());
        }
        _ => println!("  next run:  now"),
    }
    println!("  dirty:     {}", status.dirty);
    Ok(())
}

pub async fn get_counts(config: &Config, account_id: &str) -> Result<BTreeMap<String, u64>> {
    let stores = open_stores(config).await?;
    let counts = stores.docstore.counts_by_type(account_id).await;
    stores.pool.close().await;
    Ok(counts?)
}

/// CLI entry point for `docsync counts`.
pub async fn run_counts(config: &Config, account_id: &str) -> Result<()> {
    let counts = get_counts(config, account_id).await?;
    if counts.is_empty() {
        println!("No documents for account {}.", account_id);
        return Ok(());
    }

    let width = counts.keys().map(|k| k.len()).max().unwrap_or(0).max(4);
    println!("{:<width$}  COUNT", "TYPE", width = width);
    for (kind, count) in &counts {
        println!("{:<width$}  {}", kind, count, width = width);
    }
    println!("{:<width$}  {}", "total", counts.values().sum::<u64>(), width = width);
    Ok(())
}
