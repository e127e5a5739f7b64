//! Database schema migrations.
//!
//! Creates the tables docsync needs. Every statement uses
//! `CREATE ... IF NOT EXISTS`, so running migrations again is a no-op.
//!
//! # Tables
//!
//! | Table | Purpose |
//! |-------|---------|
//! | `documents` | One JSON record per document, keyed by unique-key digest |
//! | `milestones` | One sync cursor per (account, source) |

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Connect to the configured database and apply all migrations.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate_pool(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Apply all migrations on an open pool.
pub async fn migrate_pool(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            doc_key TEXT PRIMARY KEY,
            body TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS milestones (
            account_id TEXT NOT NULL,
            source_id TEXT NOT NULL,
            milestone TEXT NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (account_id, source_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Tenant fields as stored by the builtin schema.
    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_documents_scope ON documents (
            json_extract(body, '$.account_id'),
            json_extract(body, '$.source_id')
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::debug!("migrations applied");
    Ok(())
}
