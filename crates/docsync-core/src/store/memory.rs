//! In-memory [`DocumentBackend`] implementation for tests and embedding.
//!
//! Records live in a `BTreeMap` keyed by unique-key digest behind one
//! `std::sync::RwLock`, so a bulk upsert holds the write lock for the whole
//! batch and is atomic with respect to readers.

use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::ops::{Record, UniqueKey, UpsertOperation};

use super::{group_counts, BackendFilter, BulkWriteSummary, DocumentBackend};

#[derive(Default)]
struct State {
    next_seq: u64,
    records: BTreeMap<String, (u64, Record)>,
}

/// In-memory document backend.
#[derive(Default)]
pub struct MemoryBackend {
    state: RwLock<State>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| anyhow!("memory backend lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| anyhow!("memory backend lock poisoned"))
    }

    /// Matching records in insertion order.
    fn matching(state: &State, filter: &BackendFilter) -> Vec<Record> {
        let mut hits: Vec<&(u64, Record)> = state
            .records
            .values()
            .filter(|(_, record)| filter.matches(record))
            .collect();
        hits.sort_by_key(|(seq, _)| *seq);
        hits.into_iter().map(|(_, record)| record.clone()).collect()
    }
}

#[async_trait]
impl DocumentBackend for MemoryBackend {
    async fn bulk_upsert(&self, ops: &[UpsertOperation]) -> Result<BulkWriteSummary> {
        let mut state = self.write()?;
        let mut summary = BulkWriteSummary::default();
        for op in ops {
            let key = op.key.digest();
            match state.records.remove(&key) {
                Some((seq, existing)) => {
                    state.records.insert(key, (seq, op.apply(Some(existing))));
                    summary.updated += 1;
                }
                None => {
                    let seq = state.next_seq;
                    state.next_seq += 1;
                    state.records.insert(key, (seq, op.apply(None)));
                    summary.inserted += 1;
                }
            }
        }
        Ok(summary)
    }

    async fn delete_many(&self, keys: &[UniqueKey]) -> Result<u64> {
        let mut state = self.write()?;
        let deleted = keys
            .iter()
            .filter(|key| state.records.remove(&key.digest()).is_some())
            .count();
        Ok(deleted as u64)
    }

    async fn find(&self, filter: &BackendFilter, limit: Option<usize>) -> Result<Vec<Record>> {
        let state = self.read()?;
        let mut records = Self::matching(&state, filter);
        if let Some(limit) = limit {
            records.truncate(limit);
        }
        Ok(records)
    }

    async fn count_by(&self, filter: &BackendFilter, field: &str) -> Result<BTreeMap<String, u64>> {
        let state = self.read()?;
        let records = Self::matching(&state, filter);
        Ok(group_counts(&records, field))
    }
}
