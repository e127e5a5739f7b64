//! Document store.
//!
//! [`DocStore`] is the schema-aware front of a [`DocumentBackend`]: it
//! compiles documents into upsert operations, translates filters and
//! records between logical and storage field names, and scopes every read
//! to a tenant where the caller asks for one.
//!
//! A document that fails to compile is rejected on its own; the rest of
//! the batch is still written.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;

use crate::error::{SchemaError, StoreError};
use crate::models::{fields, Document};
use crate::ops::{build_operation, cast_scalar, Record, UniqueKey};
use crate::schema::CompiledSchema;
use crate::store::{BackendFilter, DocumentBackend, Filter, FilterKey};
use crate::value::Value;

/// A document that could not be compiled.
#[derive(Debug)]
pub struct RejectedDocument {
    /// Position in the submitted batch.
    pub index: usize,
    pub id: Option<String>,
    pub error: SchemaError,
}

/// Outcome of one bulk write.
#[derive(Debug, Default)]
pub struct WriteReport {
    pub upserted: usize,
    pub inserted: u64,
    pub updated: u64,
    pub rejected: Vec<RejectedDocument>,
}

pub struct DocStore {
    backend: Arc<dyn DocumentBackend>,
    schema: Arc<CompiledSchema>,
}

impl DocStore {
    /// The schema must declare every well-known field.
    pub fn new(
        backend: Arc<dyn DocumentBackend>,
        schema: Arc<CompiledSchema>,
    ) -> Result<Self, SchemaError> {
        schema.require_well_known()?;
        Ok(Self { backend, schema })
    }

    pub fn schema(&self) -> &Arc<CompiledSchema> {
        &self.schema
    }

    /// Stamp tenant fields and `upsert_time`, then write.
    pub async fn update(
        &self,
        account_id: &str,
        source_id: &str,
        docs: Vec<Document>,
    ) -> Result<WriteReport, StoreError> {
        let now = Utc::now();
        let docs: Vec<Document> = docs
            .into_iter()
            .map(|doc| {
                doc.with(fields::ACCOUNT_ID, account_id)
                    .with(fields::SOURCE_ID, source_id)
                    .with(fields::UPSERT_TIME, now)
            })
            .collect();
        self.update_raw(&docs).await
    }

    /// Write documents exactly as given.
    pub async fn update_raw(&self, docs: &[Document]) -> Result<WriteReport, StoreError> {
        let mut report = WriteReport::default();
        let mut ops = Vec::with_capacity(docs.len());

        for (index, doc) in docs.iter().enumerate() {
            match build_operation(&self.schema, doc) {
                Ok(op) => ops.push(op),
                Err(error) => {
                    tracing::warn!(
                        index,
                        id = doc.id().unwrap_or("<none>"),
                        error = %error,
                        "rejected document"
                    );
                    report.rejected.push(RejectedDocument {
                        index,
                        id: doc.id().map(str::to_string),
                        error,
                    });
                }
            }
        }

        if ops.is_empty() {
            tracing::debug!(rejected = report.rejected.len(), "bulk write with no operations");
            return Ok(report);
        }

        let summary = self.backend.bulk_upsert(&ops).await?;
        report.upserted = ops.len();
        report.inserted = summary.inserted;
        report.updated = summary.updated;
        tracing::debug!(
            upserted = report.upserted,
            inserted = report.inserted,
            updated = report.updated,
            rejected = report.rejected.len(),
            "bulk write"
        );
        Ok(report)
    }

    pub async fn select(
        &self,
        filter: &Filter,
        limit: Option<usize>,
    ) -> Result<Vec<Document>, StoreError> {
        let backend_filter = self.backend_filter(filter)?;
        let records = self.backend.find(&backend_filter, limit).await?;
        Ok(records.into_iter().map(|r| self.to_document(r)).collect())
    }

    /// Delete documents by identity. Returns how many were removed.
    pub async fn delete(&self, docs: &[Document]) -> Result<u64, StoreError> {
        if docs.is_empty() {
            return Ok(0);
        }
        let keys = docs
            .iter()
            .map(|doc| UniqueKey::for_document(&self.schema, doc))
            .collect::<Result<Vec<_>, _>>()?;
        let deleted = self.backend.delete_many(&keys).await?;
        tracing::debug!(requested = keys.len(), deleted, "deleted documents");
        Ok(deleted)
    }

    /// Point lookup within one tenant.
    pub async fn get(
        &self,
        account_id: &str,
        source_id: &str,
        id: &str,
    ) -> Result<Option<Document>, StoreError> {
        let filter = Filter::scope(account_id, source_id).with(FilterKey::Id, id);
        Ok(self.select(&filter, Some(1)).await?.pop())
    }

    pub async fn dirty_count(&self, account_id: &str, source_id: &str) -> Result<u64, StoreError> {
        let filter = Filter::scope(account_id, source_id).with(FilterKey::Dirty, true);
        let counts = self.count_by(&filter, fields::DIRTY).await?;
        Ok(counts.values().sum())
    }

    /// Number of stored documents per `type` for one account.
    pub async fn counts_by_type(&self, account_id: &str) -> Result<BTreeMap<String, u64>, StoreError> {
        let filter = Filter::new().with(FilterKey::AccountId, account_id);
        self.count_by(&filter, fields::TYPE).await
    }

    async fn count_by(&self, filter: &Filter, field: &str) -> Result<BTreeMap<String, u64>, StoreError> {
        let store_field = self.store_name(field)?;
        let backend_filter = self.backend_filter(filter)?;
        Ok(self.backend.count_by(&backend_filter, &store_field).await?)
    }

    fn store_name(&self, field: &str) -> Result<String, SchemaError> {
        self.schema
            .field(field)
            .map(|f| f.store_field.clone())
            .ok_or_else(|| SchemaError::UnknownField(field.to_string()))
    }

    fn backend_filter(&self, filter: &Filter) -> Result<BackendFilter, SchemaError> {
        let clauses = filter
            .clauses()
            .iter()
            .map(|(key, value)| {
                let name = key.field_name();
                let field = self
                    .schema
                    .field(name)
                    .ok_or_else(|| SchemaError::UnknownField(name.to_string()))?;
                let value = if value.is_null() {
                    Value::Null
                } else {
                    cast_scalar(field, value)?
                };
                Ok((field.store_field.clone(), value))
            })
            .collect::<Result<Vec<_>, SchemaError>>()?;
        Ok(BackendFilter { clauses })
    }

    fn to_document(&self, record: Record) -> Document {
        record
            .into_iter()
            .map(|(store, value)| match self.schema.field_by_store_name(&store) {
                Some(field) => (field.name.clone(), value),
                None => (store, value),
            })
            .collect()
    }
}
