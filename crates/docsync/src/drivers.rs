//! Driver registry.
//!
//! ```text
//! ┌──────────────────────────────┐
//! │        DriverRegistry        │
//! │  ┌──────────┐ ┌───────────┐  │
//! │  │ Fixture  │ │  Custom   │  │
//! │  │ (config) │ │  (Rust)   │  │
//! │  └──────────┘ └───────────┘  │
//! └──────────────┬───────────────┘
//!                ▼
//!       run_sync() → SyncTask
//! ```
//!
//! Configured drivers are addressed as `<type>:<name>` (e.g.
//! `fixture:demo`). Embedders register their own [`Driver`]s before
//! calling [`run_sync_with_drivers`](crate::sync_cmd::run_sync_with_drivers).

use std::sync::Arc;

use anyhow::{Context, Result};

use docsync_core::driver::Driver;

use crate::config::Config;
use crate::driver_fixture::FixtureDriver;

#[derive(Default)]
pub struct DriverRegistry {
    drivers: Vec<Arc<dyn Driver>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Instantiate every driver declared in the config.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut registry = Self::new();
        for (name, cfg) in &config.drivers.fixture {
            let driver = FixtureDriver::new(name, cfg)
                .with_context(|| format!("Failed to set up driver fixture:{}", name))?;
            registry.register(Arc::new(driver));
        }
        Ok(registry)
    }

    pub fn register(&mut self, driver: Arc<dyn Driver>) {
        self.drivers.push(driver);
    }

    pub fn find(&self, name: &str) -> Option<Arc<dyn Driver>> {
        self.drivers.iter().find(|d| d.name() == name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        self.drivers.iter().map(|d| d.name()).collect()
    }
}
