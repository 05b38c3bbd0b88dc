//! cogcommit - a local store of cognitive commits.
//!
//! Imports AI coding transcripts into an embedded SQLite store, grouping
//! turns into commits, and keeps that store in sync with a remote one.

pub mod config;
pub mod error;
pub mod import;
pub mod models;
pub mod store;
pub mod sync;

pub use config::Config;
pub use error::{Error, Result};
pub use import::{ImportOptions, ImportResult, Importer};
pub use store::Store;
pub use sync::{ConflictPolicy, SyncEngine};
