//! In-process remote store.
//!
//! Behaves like the cloud store (monotonic `updated_at`, full-bundle acks,
//! hosted visual URLs) and lets callers inject failures per commit.

use super::remote::{RemoteAck, RemoteCommit, RemoteStore, UpsertResponse, UsageInfo};
use crate::error::{Error, Result};
use crate::models::CommitBundle;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};

const COMMIT_LIMIT: u64 = 1_000;
const STORAGE_LIMIT_BYTES: u64 = 1 << 30;

#[derive(Default)]
struct Inner {
    commits: BTreeMap<String, RemoteCommit>,
    last_stamp: Option<DateTime<Utc>>,
    authenticated: bool,
    /// Upserts fail with a transport error
    failing: HashSet<String>,
    /// Upserts are rejected by the remote
    rejecting: HashSet<String>,
    /// Upserts are acknowledged without their turns
    partial: HashSet<String>,
    /// Upserts are stored but the acknowledgement never arrives
    unacknowledged: HashSet<String>,
    listing_fails: bool,
    upserts: usize,
}

impl Inner {
    /// Next `updated_at`, strictly after every earlier one
    fn stamp(&mut self, at: Option<DateTime<Utc>>) -> DateTime<Utc> {
        let candidate = at.unwrap_or_else(Utc::now);
        let stamp = match self.last_stamp {
            Some(last) if candidate <= last && at.is_none() => last + Duration::milliseconds(1),
            _ => candidate,
        };
        self.last_stamp = Some(self.last_stamp.map_or(stamp, |last| last.max(stamp)));
        stamp
    }
}

pub struct MemoryRemoteStore {
    inner: Mutex<Inner>,
}

impl Default for MemoryRemoteStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemoteStore {
    /// An empty, logged-in remote
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                authenticated: true,
                ..Default::default()
            }),
        }
    }

    pub fn set_authenticated(&self, authenticated: bool) {
        self.inner.lock().authenticated = authenticated;
    }

    /// Make every upsert of `id` fail as if the network dropped
    pub fn fail_commit(&self, id: &str) {
        self.inner.lock().failing.insert(id.to_string());
    }

    /// Make the remote refuse every upsert of `id`
    pub fn reject_commit(&self, id: &str) {
        self.inner.lock().rejecting.insert(id.to_string());
    }

    /// Acknowledge uploads of `id` without their turns
    pub fn partially_ack_commit(&self, id: &str) {
        self.inner.lock().partial.insert(id.to_string());
    }

    /// Store uploads of `id` but fail the call, like a timeout after the write
    pub fn drop_ack_commit(&self, id: &str) {
        self.inner.lock().unacknowledged.insert(id.to_string());
    }

    pub fn fail_listing(&self, fail: bool) {
        self.inner.lock().listing_fails = fail;
    }

    pub fn clear_failures(&self) {
        let mut inner = self.inner.lock();
        inner.failing.clear();
        inner.rejecting.clear();
        inner.partial.clear();
        inner.unacknowledged.clear();
        inner.listing_fails = false;
    }

    /// Store a bundle as if another client had pushed it
    pub fn insert(&self, bundle: CommitBundle, updated_at: DateTime<Utc>) {
        let mut inner = self.inner.lock();
        let updated_at = inner.stamp(Some(updated_at));
        inner
            .commits
            .insert(bundle.commit.id.clone(), RemoteCommit { bundle, updated_at });
    }

    /// Change a stored commit as another client would. Returns `false` if absent.
    pub fn edit<F>(&self, id: &str, updated_at: DateTime<Utc>, f: F) -> bool
    where
        F: FnOnce(&mut CommitBundle),
    {
        let mut inner = self.inner.lock();
        let stamp = inner.stamp(Some(updated_at));
        match inner.commits.get_mut(id) {
            Some(remote) => {
                f(&mut remote.bundle);
                remote.updated_at = stamp;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: &str) -> Option<RemoteCommit> {
        self.inner.lock().commits.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().commits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Upload attempts that reached the remote
    pub fn upsert_count(&self) -> usize {
        self.inner.lock().upserts
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    fn is_authenticated(&self) -> bool {
        self.inner.lock().authenticated
    }

    async fn list_changed_since(&self, since: Option<DateTime<Utc>>) -> Result<Vec<RemoteCommit>> {
        let inner = self.inner.lock();
        if inner.listing_fails {
            return Err(Error::Remote("listing unavailable".to_string()));
        }
        let mut changed: Vec<RemoteCommit> = inner
            .commits
            .values()
            .filter(|c| since.map_or(true, |since| c.updated_at > since))
            .cloned()
            .collect();
        changed.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
        Ok(changed)
    }

    async fn get_commit(&self, id: &str) -> Result<Option<RemoteCommit>> {
        Ok(self.inner.lock().commits.get(id).cloned())
    }

    async fn commit_version(&self, id: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(self.inner.lock().commits.get(id).map(|c| c.updated_at))
    }

    async fn upsert_commit(&self, bundle: &CommitBundle) -> Result<UpsertResponse> {
        let mut inner = self.inner.lock();
        let id = bundle.commit.id.clone();
        if inner.failing.contains(&id) {
            return Err(Error::Remote(format!("connection reset while uploading {}", id)));
        }
        inner.upserts += 1;
        if inner.rejecting.contains(&id) {
            return Ok(UpsertResponse::Reject("commit limit reached".to_string()));
        }

        let updated_at = inner.stamp(None);
        let mut stored = bundle.clone();
        for visual in &mut stored.visuals {
            visual.cloud_url = Some(format!("memory://visuals/{}", visual.id));
        }
        let visual_urls = stored
            .visuals
            .iter()
            .filter_map(|v| Some((v.id.clone(), v.cloud_url.clone()?)))
            .collect();
        let turns = if inner.partial.contains(&id) {
            0
        } else {
            bundle.turn_count()
        };
        let acknowledged = !inner.unacknowledged.contains(&id);
        inner.commits.insert(
            id.clone(),
            RemoteCommit {
                bundle: stored,
                updated_at,
            },
        );
        if !acknowledged {
            return Err(Error::Remote(format!("timed out waiting for {}", id)));
        }

        Ok(UpsertResponse::Ack(RemoteAck {
            updated_at,
            sessions: bundle.sessions.len(),
            turns,
            visuals: bundle.visuals.len(),
            visual_urls,
        }))
    }

    async fn get_usage(&self, _user_id: &str) -> Result<UsageInfo> {
        let inner = self.inner.lock();
        let storage_used_bytes = inner
            .commits
            .values()
            .map(|c| serde_json::to_vec(&c.bundle).map(|v| v.len() as u64))
            .sum::<std::result::Result<u64, _>>()?;
        Ok(UsageInfo {
            commit_count: inner.commits.len() as u64,
            commit_limit: COMMIT_LIMIT,
            storage_used_bytes,
            storage_limit_bytes: STORAGE_LIMIT_BYTES,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CognitiveCommit;

    fn bundle(id: &str) -> CommitBundle {
        CommitBundle {
            commit: CognitiveCommit::new(id, "demo", Utc::now()),
            sessions: vec![],
            visuals: vec![],
        }
    }

    #[tokio::test]
    async fn test_upsert_stamps_are_monotonic() {
        let remote = MemoryRemoteStore::new();
        let first = match remote.upsert_commit(&bundle("a")).await.unwrap() {
            UpsertResponse::Ack(ack) => ack.updated_at,
            other => panic!("unexpected {:?}", other),
        };
        let second = match remote.upsert_commit(&bundle("a")).await.unwrap() {
            UpsertResponse::Ack(ack) => ack.updated_at,
            other => panic!("unexpected {:?}", other),
        };
        assert!(second > first);
        assert_eq!(remote.commit_version("a").await.unwrap(), Some(second));
    }

    #[tokio::test]
    async fn test_list_changed_since() {
        let remote = MemoryRemoteStore::new();
        let t0 = Utc::now();
        remote.insert(bundle("old"), t0);
        remote.insert(bundle("new"), t0 + Duration::seconds(10));

        let all = remote.list_changed_since(None).await.unwrap();
        assert_eq!(all.len(), 2);
        let recent = remote
            .list_changed_since(Some(t0 + Duration::seconds(1)))
            .await
            .unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].id(), "new");
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let remote = MemoryRemoteStore::new();
        remote.fail_commit("a");
        remote.reject_commit("b");
        assert!(remote.upsert_commit(&bundle("a")).await.is_err());
        assert!(matches!(
            remote.upsert_commit(&bundle("b")).await.unwrap(),
            UpsertResponse::Reject(_)
        ));
        assert!(remote.is_empty());

        remote.clear_failures();
        assert!(matches!(
            remote.upsert_commit(&bundle("a")).await.unwrap(),
            UpsertResponse::Ack(_)
        ));
        assert_eq!(remote.get_usage("me").await.unwrap().commit_count, 1);

        remote.drop_ack_commit("c");
        assert!(remote.upsert_commit(&bundle("c")).await.is_err());
        assert!(remote.get("c").is_some());
    }
}
