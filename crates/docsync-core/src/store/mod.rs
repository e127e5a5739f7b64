//! Storage abstraction for the document store.
//!
//! The [`DocumentBackend`] trait is the seam between
//! [`DocStore`](crate::docstore::DocStore) and a physical database. A
//! backend only ever sees storage field names, compiled
//! [`UpsertOperation`]s and [`UniqueKey`]s; schema handling stays above it.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use std::collections::BTreeMap;
use std::str::FromStr;

use anyhow::Result;
use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::fields;
use crate::ops::{Record, UniqueKey, UpsertOperation};
use crate::value::Value;

/// Fields a caller may filter on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterKey {
    AccountId,
    SourceId,
    Type,
    Dirty,
    ExternalId,
    ParentId,
    Id,
}

impl FilterKey {
    pub fn field_name(&self) -> &'static str {
        match self {
            FilterKey::AccountId => fields::ACCOUNT_ID,
            FilterKey::SourceId => fields::SOURCE_ID,
            FilterKey::Type => fields::TYPE,
            FilterKey::Dirty => fields::DIRTY,
            FilterKey::ExternalId => fields::EXTERNAL_ID,
            FilterKey::ParentId => fields::PARENT_ID,
            FilterKey::Id => fields::ID,
        }
    }
}

impl FromStr for FilterKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            fields::ACCOUNT_ID => Ok(FilterKey::AccountId),
            fields::SOURCE_ID => Ok(FilterKey::SourceId),
            fields::TYPE => Ok(FilterKey::Type),
            fields::DIRTY => Ok(FilterKey::Dirty),
            fields::EXTERNAL_ID => Ok(FilterKey::ExternalId),
            fields::PARENT_ID => Ok(FilterKey::ParentId),
            fields::ID => Ok(FilterKey::Id),
            other => Err(other.to_string()),
        }
    }
}

/// An equality filter over logical field names, restricted to
/// [`FilterKey`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    clauses: Vec<(FilterKey, Value)>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: FilterKey, value: impl Into<Value>) -> Self {
        self.clauses.retain(|(k, _)| *k != key);
        self.clauses.push((key, value.into()));
        self
    }

    /// Filter scoped to one tenant.
    pub fn scope(account_id: &str, source_id: &str) -> Self {
        Self::new()
            .with(FilterKey::AccountId, account_id)
            .with(FilterKey::SourceId, source_id)
    }

    /// Build a filter from free-form field names. Every name outside the
    /// allow-list is reported at once.
    pub fn from_pairs<I>(pairs: I) -> Result<Self, StoreError>
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        let mut filter = Self::new();
        let mut unallowed = Vec::new();
        for (name, value) in pairs {
            match name.parse::<FilterKey>() {
                Ok(key) => filter = filter.with(key, value),
                Err(name) => unallowed.push(name),
            }
        }
        if unallowed.is_empty() {
            Ok(filter)
        } else {
            Err(StoreError::UnallowedFilter(unallowed))
        }
    }

    pub fn clauses(&self) -> &[(FilterKey, Value)] {
        &self.clauses
    }
}

/// A filter over storage field names, as handed to a backend.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackendFilter {
    pub clauses: Vec<(String, Value)>,
}

impl BackendFilter {
    /// Equality per clause. A list field matches when it contains the
    /// value; a null clause matches a missing field.
    pub fn matches(&self, record: &Record) -> bool {
        self.clauses
            .iter()
            .all(|(name, expected)| match record.get(name) {
                Some(Value::List(items)) if !matches!(expected, Value::List(_)) => {
                    items.contains(expected)
                }
                Some(actual) => actual == expected,
                None => expected.is_null(),
            })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkWriteSummary {
    pub inserted: u64,
    pub updated: u64,
}

/// Abstract physical storage for compiled documents.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`bulk_upsert`](DocumentBackend::bulk_upsert) | Apply a batch atomically |
/// | [`delete_many`](DocumentBackend::delete_many) | Delete by unique key |
/// | [`find`](DocumentBackend::find) | Filtered read in insertion order |
/// | [`count_by`](DocumentBackend::count_by) | Group-by count on one field |
#[async_trait]
pub trait DocumentBackend: Send + Sync {
    /// Apply every operation, all or nothing.
    async fn bulk_upsert(&self, ops: &[UpsertOperation]) -> Result<BulkWriteSummary>;

    /// Delete the records with the given keys. Returns how many existed.
    async fn delete_many(&self, keys: &[UniqueKey]) -> Result<u64>;

    async fn find(&self, filter: &BackendFilter, limit: Option<usize>) -> Result<Vec<Record>>;

    /// Count matching records grouped by the rendered value of `field`.
    async fn count_by(&self, filter: &BackendFilter, field: &str) -> Result<BTreeMap<String, u64>>;
}

pub fn record_to_json(record: &Record) -> serde_json::Value {
    serde_json::Value::Object(
        record
            .iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect(),
    )
}

pub fn record_from_json(raw: serde_json::Value) -> Result<Record> {
    match raw {
        serde_json::Value::Object(map) => map
            .into_iter()
            .map(|(name, value)| Ok((name, Value::from_json(value)?)))
            .collect(),
        other => anyhow::bail!("stored record is not an object: {}", other),
    }
}

/// Group records by the rendered value of one field.
pub fn group_counts<'a, I>(records: I, field: &str) -> BTreeMap<String, u64>
where
    I: IntoIterator<Item = &'a Record>,
{
    let mut counts = BTreeMap::new();
    for record in records {
        let key = record
            .get(field)
            .map(Value::display)
            .unwrap_or_else(|| Value::Null.display());
        *counts.entry(key).or_insert(0) += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_pairs_reports_every_unallowed_key() {
        let err = Filter::from_pairs(vec![
            ("account_id".to_string(), Value::from("a")),
            ("title".to_string(), Value::from("x")),
            ("size".to_string(), Value::from(1)),
        ])
        .unwrap_err();
        match err {
            StoreError::UnallowedFilter(keys) => assert_eq!(keys, vec!["title", "size"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_with_replaces_existing_clause() {
        let filter = Filter::new()
            .with(FilterKey::Type, "a")
            .with(FilterKey::Type, "b");
        assert_eq!(filter.clauses(), &[(FilterKey::Type, Value::from("b"))]);
    }

    #[test]
    fn test_backend_filter_matches() {
        let mut record = Record::new();
        record.insert("tag".into(), Value::from(vec!["a", "b"]));
        record.insert("type".into(), Value::from("file"));

        let filter = BackendFilter {
            clauses: vec![("tag".into(), Value::from("b")), ("type".into(), Value::from("file"))],
        };
        assert!(filter.matches(&record));

        let missing = BackendFilter {
            clauses: vec![("parent_id".into(), Value::Null)],
        };
        assert!(missing.matches(&record));

        let wrong = BackendFilter {
            clauses: vec![("type".into(), Value::from("folder"))],
        };
        assert!(!wrong.matches(&record));
    }
}
