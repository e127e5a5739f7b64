//! SQLite-backed [`DocumentBackend`] and [`MilestoneStore`].
//!
//! Each document is one row of `documents`: the unique-key digest as
//! primary key and the record (storage names → tagged JSON values) as the
//! body. A bulk upsert is one `BEGIN IMMEDIATE` transaction that reads
//! each record, applies the operation in Rust, and writes it back, so the
//! bucket semantics are exactly those of the in-memory backend and
//! concurrent writers are serialized.
//!
//! Filters are pushed down as `json_each` probes on string clauses and then
//! re-checked in Rust, which keeps list-membership and null semantics
//! identical across backends.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqliteConnection, SqlitePool};

use docsync_core::docstore::DocStore;
use docsync_core::milestone::{Milestone, MilestoneStore};
use docsync_core::ops::{Record, UniqueKey, UpsertOperation};
use docsync_core::store::{
    group_counts, record_from_json, record_to_json, BackendFilter, BulkWriteSummary,
    DocumentBackend,
};
use docsync_core::value::Value;

use crate::config::Config;
use crate::db;
use crate::migrate;

/// SQLite implementation of [`DocumentBackend`].
pub struct SqliteBackend {
    pool: SqlitePool,
}

impl SqliteBackend {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn parse_body(raw: &str) -> Result<Record> {
        let json: serde_json::Value =
            serde_json::from_str(raw).context("stored document body is not JSON")?;
        record_from_json(json)
    }

    /// Records passing the SQL prefilter, in insertion order.
    async fn candidates(&self, filter: &BackendFilter) -> Result<Vec<Record>> {
        let mut sql = String::from("SELECT body FROM documents");
        let mut binds: Vec<(String, String)> = Vec::new();
        for (name, value) in &filter.clauses {
            if let Value::String(s) = value {
                sql.push_str(if binds.is_empty() { " WHERE " } else { " AND " });
                sql.push_str(
                    "EXISTS (SELECT 1 FROM json_each(documents.body, ?) AS j WHERE j.value = ?)",
                );
                binds.push((json_path(name), s.clone()));
            }
        }
        sql.push_str(" ORDER BY rowid");

        let mut query = sqlx::query(&sql);
        for (path, value) in binds {
            query = query.bind(path).bind(value);
        }
        let rows = query.fetch_all(&self.pool).await?;

        rows.iter()
            .map(|row| Self::parse_body(&row.get::<String, _>("body")))
            .collect()
    }
}

fn json_path(field: &str) -> String {
    format!("$.\"{}\"", field.replace('"', "\\\""))
}

/// Take the write lock before the first read of a read-modify-write.
async fn begin_immediate(conn: &mut SqliteConnection) -> Result<()> {
    sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;
    Ok(())
}

async fn finish(conn: &mut SqliteConnection, result: Result<()>) -> Result<()> {
    match result {
        Ok(()) => {
            sqlx::query("COMMIT").execute(&mut *conn).await?;
            Ok(())
        }
        Err(e) => {
            if let Err(rollback) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
                tracing::warn!(error = %rollback, "rollback failed");
            }
            Err(e)
        }
    }
}

async fn upsert_all(
    conn: &mut SqliteConnection,
    ops: &[UpsertOperation],
    summary: &mut BulkWriteSummary,
) -> Result<()> {
    let now = Utc::now().timestamp();
    for op in ops {
        let key = op.key.digest();
        let existing = sqlx::query("SELECT body FROM documents WHERE doc_key = ?")
            .bind(&key)
            .fetch_optional(&mut *conn)
            .await?
            .map(|row| SqliteBackend::parse_body(&row.get::<String, _>("body")))
            .transpose()?;

        if existing.is_some() {
            summary.updated += 1;
        } else {
            summary.inserted += 1;
        }
        let body = record_to_json(&op.apply(existing)).to_string();

        sqlx::query(
            r#"
            INSERT INTO documents (doc_key, body, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(doc_key) DO UPDATE SET
                body = excluded.body,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&key)
        .bind(&body)
        .bind(now)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

async fn delete_all(conn: &mut SqliteConnection, keys: &[UniqueKey], deleted: &mut u64) -> Result<()> {
    for key in keys {
        *deleted += sqlx::query("DELETE FROM documents WHERE doc_key = ?")
            .bind(key.digest())
            .execute(&mut *conn)
            .await?
            .rows_affected();
    }
    Ok(())
}

#[async_trait]
impl DocumentBackend for SqliteBackend {
    async fn bulk_upsert(&self, ops: &[UpsertOperation]) -> Result<BulkWriteSummary> {
        let mut summary = BulkWriteSummary::default();
        let mut conn = self.pool.acquire().await?;
        begin_immediate(&mut conn).await?;
        let result = upsert_all(&mut conn, ops, &mut summary).await;
        finish(&mut conn, result).await?;
        Ok(summary)
    }

    async fn delete_many(&self, keys: &[UniqueKey]) -> Result<u64> {
        let mut deleted = 0;
        let mut conn = self.pool.acquire().await?;
        begin_immediate(&mut conn).await?;
        let result = delete_all(&mut conn, keys, &mut deleted).await;
        finish(&mut conn, result).await?;
        Ok(deleted)
    }

    async fn find(&self, filter: &BackendFilter, limit: Option<usize>) -> Result<Vec<Record>> {
        let matching = self
            .candidates(filter)
            .await?
            .into_iter()
            .filter(|record| filter.matches(record));
        Ok(match limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        })
    }

    async fn count_by(&self, filter: &BackendFilter, field: &str) -> Result<BTreeMap<String, u64>> {
        let records = self.find(filter, None).await?;
        Ok(group_counts(&records, field))
    }
}

/// SQLite implementation of [`MilestoneStore`] over the `milestones` table.
pub struct SqliteMilestoneStore {
    pool: SqlitePool,
}

impl SqliteMilestoneStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MilestoneStore for SqliteMilestoneStore {
    async fn get(&self, account_id: &str, source_id: &str) -> Result<Option<Milestone>> {
        let row = sqlx::query(
            "SELECT milestone FROM milestones WHERE account_id = ? AND source_id = ?",
        )
        .bind(account_id)
        .bind(source_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let raw: String = row.get("milestone");
                let milestone = serde_json::from_str(&raw).with_context(|| {
                    format!("stored milestone for {}/{} is not a JSON object", account_id, source_id)
                })?;
                Ok(Some(milestone))
            }
            None => Ok(None),
        }
    }

    async fn upsert(&self, account_id: &str, source_id: &str, milestone: &Milestone) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO milestones (account_id, source_id, milestone, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(account_id, source_id) DO UPDATE SET
                milestone = excluded.milestone,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(account_id)
        .bind(source_id)
        .bind(serde_json::to_string(milestone)?)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// The SQLite-backed stores for one database.
pub struct Stores {
    pub pool: SqlitePool,
    pub docstore: Arc<DocStore>,
    pub milestones: Arc<SqliteMilestoneStore>,
}

/// Connect, apply migrations, and wire both stores to the configured schema.
pub async fn open_stores(config: &Config) -> Result<Stores> {
    let schema = config.compiled_schema()?;
    let pool = db::connect(config).await?;
    migrate::migrate_pool(&pool).await?;

    let backend = Arc::new(SqliteBackend::new(pool.clone()));
    let docstore = DocStore::new(backend, schema).context("Schema cannot back the document store")?;
    Ok(Stores {
        docstore: Arc::new(docstore),
        milestones: Arc::new(SqliteMilestoneStore::new(pool.clone())),
        pool,
    })
}
