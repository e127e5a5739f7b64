//! `docsync sync`: one orchestrator run for one (account, source).
//!
//! Opens the SQLite stores, resolves the driver by name, runs a
//! [`SyncTask`] and prints a summary of the outcome. Driver-side problems
//! (rate limits, outages, revoked authorization) are outcomes, not errors,
//! so the command still exits successfully for them.

use anyhow::{anyhow, Result};

use docsync_core::sync::{SyncOutcome, SyncTask};

use crate::config::Config;
use crate::drivers::DriverRegistry;
use crate::sqlite_store::open_stores;

/// Run one sync with the drivers declared in the config.
pub async fn run_sync(
    config: &Config,
    driver: &str,
    account_id: &str,
    source_id: &str,
) -> Result<SyncOutcome> {
    let registry = DriverRegistry::from_config(config)?;
    run_sync_with_drivers(config, &registry, driver, account_id, source_id).await
}

/// Run one sync with a caller-supplied registry.
pub async fn run_sync_with_drivers(
    config: &Config,
    registry: &DriverRegistry,
    driver: &str,
    account_id: &str,
    source_id: &str,
) -> Result<SyncOutcome> {
    let driver_impl = registry.find(driver).ok_or_else(|| {
        let names = registry.names();
        anyhow!(
            "Unknown driver: '{}'. Available: {}",
            driver,
            if names.is_empty() {
                "(none configured)".to_string()
            } else {
                names.join(", ")
            }
        )
    })?;

    let stores = open_stores(config).await?;
    let task = SyncTask::new(
        account_id,
        source_id,
        driver_impl,
        stores.docstore.clone(),
        stores.milestones.clone(),
    )
    .with_settings(config.sync.settings());

    let outcome = task.run().await;
    stores.pool.close().await;
    let outcome = outcome?;

    print_outcome(driver, account_id, source_id, &outcome);
    Ok(outcome)
}

fn print_outcome(driver: &str, account_id: &str, source_id: &str, outcome: &SyncOutcome) {
    println!("sync {} ({}/{})", driver, account_id, source_id);
    match outcome {
        SyncOutcome::Completed(report) => {
            println!("  pages: {}", report.pages);
            println!("  upserted documents: {}", report.docs_upserted);
            if report.docs_rejected > 0 {
                println!("  rejected documents: {}", report.docs_rejected);
            }
            println!("  deleted documents: {}", report.deleted);
            println!("ok");
        }
        SyncOutcome::DirtyProcessed(report) => {
            println!("  dirty documents processed: {}", report.processed);
            println!("  children written: {}", report.children_written);
            println!("  documents removed: {}", report.removed);
            if report.failed > 0 {
                println!("  left dirty (unavailable): {}", report.failed);
            }
            println!("ok");
        }
        SyncOutcome::Deferred { next_sync } => {
            println!("  deferred until {}", next_sync.to_rfc3339());
        }
        SyncOutcome::RateLimited { next_sync } => {
            println!("  rate limited, next run after {}", next_sync.to_rfc3339());
        }
        SyncOutcome::ServiceUnavailable { next_sync } => {
            println!(
                "  service unavailable, next run after {}",
                next_sync.to_rfc3339()
            );
        }
        SyncOutcome::AuthRevoked { reason } => {
            println!("  authorization revoked: {}", reason);
        }
    }
}
