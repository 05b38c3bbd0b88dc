//! Contract between the sync engine and the cloud store.

use crate::error::Result;
use crate::models::CommitBundle;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A commit as the remote store holds it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteCommit {
    #[serde(flatten)]
    pub bundle: CommitBundle,
    /// Remote modification time, assigned by the remote on every write
    pub updated_at: DateTime<Utc>,
}

impl RemoteCommit {
    pub fn id(&self) -> &str {
        &self.bundle.commit.id
    }
}

/// Remote acknowledgement of a full commit upload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteAck {
    pub updated_at: DateTime<Utc>,
    pub sessions: usize,
    pub turns: usize,
    pub visuals: usize,
    /// Visual id -> hosted URL
    #[serde(default)]
    pub visual_urls: HashMap<String, String>,
}

impl RemoteAck {
    /// Whether every child of `bundle` was acknowledged
    pub fn covers(&self, bundle: &CommitBundle) -> bool {
        self.sessions == bundle.sessions.len()
            && self.turns == bundle.turn_count()
            && self.visuals == bundle.visuals.len()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum UpsertResponse {
    Ack(RemoteAck),
    Reject(String),
}

/// Plan usage as reported by the remote
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageInfo {
    pub commit_count: u64,
    pub commit_limit: u64,
    pub storage_used_bytes: u64,
    pub storage_limit_bytes: u64,
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Local credential check, no network
    fn is_authenticated(&self) -> bool;

    /// Commits modified after `since` (all commits when `None`), oldest first
    async fn list_changed_since(&self, since: Option<DateTime<Utc>>) -> Result<Vec<RemoteCommit>>;

    async fn get_commit(&self, id: &str) -> Result<Option<RemoteCommit>>;

    /// Current remote `updated_at` of a commit, `None` if the remote lacks it
    async fn commit_version(&self, id: &str) -> Result<Option<DateTime<Utc>>>;

    /// Upload a commit with all of its sessions, turns and visuals
    async fn upsert_commit(&self, bundle: &CommitBundle) -> Result<UpsertResponse>;

    async fn get_usage(&self, user_id: &str) -> Result<UsageInfo>;
}
