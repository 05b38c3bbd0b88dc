//! Sync between the local store and the cloud store.
//!
//! [`SyncEngine`] drives push, pull and bidirectional sync against any
//! [`RemoteStore`]. Two remotes ship with the crate: [`HttpRemoteStore`] for
//! the hosted service and [`MemoryRemoteStore`] for tests and offline use.

mod engine;
mod http;
mod memory;
mod policy;
mod remote;

pub use engine::{PullResult, PushOptions, PushResult, SyncEngine, SyncResult, SyncStatusReport};
pub use http::{ApiResponse, HttpRemoteStore};
pub use memory::MemoryRemoteStore;
pub use policy::{ConflictPolicy, Resolution};
pub use remote::{RemoteAck, RemoteCommit, RemoteStore, UpsertResponse, UsageInfo};
