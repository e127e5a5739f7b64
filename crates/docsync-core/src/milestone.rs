//! Sync cursors.
//!
//! A [`Milestone`] is an opaque JSON object owned by the driver, persisted
//! per (account, source). The orchestrator reserves two keys for itself:
//! [`NEXT_SYNC_KEY`] and [`SYNC_STATUS_KEY`]. Drivers only ever see
//! [`Milestone::driver_view`], so they can neither read nor clobber them.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const NEXT_SYNC_KEY: &str = "next-sync";
pub const SYNC_STATUS_KEY: &str = "sync-status";

/// Last abnormal outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    RateLimited,
    ServiceUnavailable,
    AuthRevoked,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::RateLimited => "rate_limited",
            SyncStatus::ServiceUnavailable => "service_unavailable",
            SyncStatus::AuthRevoked => "auth_revoked",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Milestone(serde_json::Map<String, serde_json::Value>);

impl Milestone {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.0.insert(key.into(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<serde_json::Value> {
        self.0.remove(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.0
    }

    /// Next eligible run time, if a backoff is scheduled.
    pub fn next_sync(&self) -> Option<DateTime<Utc>> {
        self.0
            .get(NEXT_SYNC_KEY)
            .and_then(|v| v.as_i64())
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
    }

    pub fn set_next_sync(&mut self, at: DateTime<Utc>) {
        self.0
            .insert(NEXT_SYNC_KEY.to_string(), serde_json::json!(at.timestamp()));
    }

    pub fn clear_next_sync(&mut self) {
        self.0.remove(NEXT_SYNC_KEY);
    }

    pub fn status(&self) -> Option<SyncStatus> {
        self.0
            .get(SYNC_STATUS_KEY)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn set_status(&mut self, status: SyncStatus) {
        self.0.insert(
            SYNC_STATUS_KEY.to_string(),
            serde_json::Value::String(status.as_str().to_string()),
        );
    }

    pub fn clear_status(&mut self) {
        self.0.remove(SYNC_STATUS_KEY);
    }

    /// The milestone without orchestrator-owned keys.
    pub fn driver_view(&self) -> Milestone {
        let mut view = self.clone();
        view.clear_next_sync();
        view.clear_status();
        view
    }
}

impl From<serde_json::Map<String, serde_json::Value>> for Milestone {
    fn from(map: serde_json::Map<String, serde_json::Value>) -> Self {
        Self(map)
    }
}

/// Persistence for milestones, one per (account, source).
#[async_trait]
pub trait MilestoneStore: Send + Sync {
    async fn get(&self, account_id: &str, source_id: &str) -> Result<Option<Milestone>>;

    async fn upsert(&self, account_id: &str, source_id: &str, milestone: &Milestone) -> Result<()>;
}

/// In-memory milestone store for tests.
#[derive(Default)]
pub struct InMemoryMilestoneStore {
    milestones: RwLock<HashMap<(String, String), Milestone>>,
}

impl InMemoryMilestoneStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MilestoneStore for InMemoryMilestoneStore {
    async fn get(&self, account_id: &str, source_id: &str) -> Result<Option<Milestone>> {
        let milestones = self
            .milestones
            .read()
            .map_err(|_| anyhow!("milestone store lock poisoned"))?;
        Ok(milestones
            .get(&(account_id.to_string(), source_id.to_string()))
            .cloned())
    }

    async fn upsert(&self, account_id: &str, source_id: &str, milestone: &Milestone) -> Result<()> {
        let mut milestones = self
            .milestones
            .write()
            .map_err(|_| anyhow!("milestone store lock poisoned"))?;
        milestones.insert(
            (account_id.to_string(), source_id.to_string()),
            milestone.clone(),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_driver_view_strips_reserved_keys() {
        let mut m = Milestone::new();
        m.insert("page", serde_json::json!(3));
        m.set_next_sync(Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap());
        m.set_status(SyncStatus::RateLimited);

        let view = m.driver_view();
        assert_eq!(view.get("page"), Some(&serde_json::json!(3)));
        assert!(view.get(NEXT_SYNC_KEY).is_none());
        assert!(view.status().is_none());
        assert_eq!(m.status(), Some(SyncStatus::RateLimited));
    }

    #[test]
    fn test_next_sync_is_unix_seconds() {
        let at = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        let mut m = Milestone::new();
        m.set_next_sync(at);
        assert_eq!(m.get(NEXT_SYNC_KEY), Some(&serde_json::json!(at.timestamp())));
        assert_eq!(m.next_sync(), Some(at));
    }

    #[tokio::test]
    async fn test_in_memory_store_scopes_by_pair() {
        let store = InMemoryMilestoneStore::new();
        let mut m = Milestone::new();
        m.insert("page", serde_json::json!(1));
        store.upsert("a", "s", &m).await.unwrap();
        assert_eq!(store.get("a", "s").await.unwrap(), Some(m));
        assert!(store.get("a", "other").await.unwrap().is_none());
    }
}
