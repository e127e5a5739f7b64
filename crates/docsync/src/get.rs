//! Document retrieval by id.
//!
//! ```bash
//! docsync get --account acme --source drive doc-42
//! ```
//!
//! Prints the stored document as pretty JSON using logical field names.

use anyhow::{bail, Result};

use docsync_core::models::Document;

use crate::config::Config;
use crate::sqlite_store::open_stores;

/// Fetch one document from a tenant.
pub async fn get_document(
    config: &Config,
    account_id: &str,
    source_id: &str,
    id: &str,
) -> Result<Document> {
    let stores = open_stores(config).await?;
    let result = stores.docstore.get(account_id, source_id, id).await;
    stores.pool.close().await;

    match result? {
        Some(doc) => Ok(doc),
        None => bail!("document not found: {} ({}/{})", id, account_id, source_id),
    }
}

/// CLI entry point for `docsync get`.
pub async fn run_get(config: &Config, account_id: &str, source_id: &str, id: &str) -> Result<()> {
    let doc = get_document(config, account_id, source_id, id).await?;
    println!("{}", serde_json::to_string_pretty(&doc)?);
    Ok(())
}
