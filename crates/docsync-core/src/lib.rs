//! # docsync core
//!
//! Runtime-agnostic logic for the docsync engine: the typed value model,
//! schema compiler, operation builder, document store over a pluggable
//! backend, milestone persistence trait, driver contract, and the sync
//! orchestrator.
//!
//! This crate contains no sqlx, filesystem scanning, or CLI code. Native
//! backends and drivers live in the `docsync` application crate.

pub mod docstore;
pub mod driver;
pub mod error;
pub mod extract;
pub mod milestone;
pub mod models;
pub mod ops;
pub mod schema;
pub mod store;
pub mod sync;
pub mod value;

pub use docstore::{DocStore, WriteReport};
pub use driver::{DataResult, Driver, DriverError, MetadataPage, Payload};
pub use error::{SchemaError, StoreError};
pub use milestone::{Milestone, MilestoneStore};
pub use models::Document;
pub use schema::CompiledSchema;
pub use sync::{SyncOutcome, SyncTask};
pub use value::Value;
