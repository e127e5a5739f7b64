//! # docsync
//!
//! **Incremental document synchronization into a schema-driven store.**
//!
//! docsync pulls document metadata from pluggable drivers, upserts it into
//! a document store whose write semantics come from a compiled schema,
//! backfills content for documents flagged dirty, and keeps a resumable
//! cursor (the milestone) per (account, source).
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌──────────────┐
//! │   Drivers   │──▶│   SyncTask   │──▶│   DocStore   │
//! │  (fixture)  │   │ orchestrator │   │  schema ops  │
//! └─────────────┘   └──────┬───────┘   └──────┬───────┘
//!                          │                  │
//!                          ▼                  ▼
//!                   ┌─────────────┐    ┌─────────────┐
//!                   │ milestones  │    │  documents  │
//!                   │  (SQLite)   │    │  (SQLite)   │
//!                   └─────────────┘    └─────────────┘
//! ```
//!
//! The engine itself (schema compiler, operation builder, document store,
//! milestone handling, orchestrator) lives in [`docsync_core`]. This crate
//! adds the SQLite backends, configuration, the fixture driver and the CLI.
//!
//! ## Quick Start
//!
//! ```bash
//! docsync init
//! docsync sync fixture:demo --account acme --source drive
//! docsync status --account acme --source drive
//! docsync counts --account acme
//! docsync schema                   # print the builtin schema
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`db`] | SQLite connection pool |
//! | [`migrate`] | Table creation |
//! | [`sqlite_store`] | SQLite document backend and milestone store |
//! | [`drivers`] | Driver registry |
//! | [`driver_fixture`] | Directory-backed driver for local runs and tests |
//! | [`sync_cmd`] | `docsync sync` |
//! | [`status`] | `docsync status` and `docsync counts` |
//! | [`get`] | `docsync get` |
//! | [`schema_cmd`] | `docsync schema` |

pub mod config;
pub mod db;
pub mod driver_fixture;
pub mod drivers;
pub mod get;
pub mod migrate;
pub mod schema_cmd;
pub mod sqlite_store;
pub mod status;
pub mod sync_cmd;

pub use docsync_core;
