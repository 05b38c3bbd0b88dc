//! Sync engine - reconciles the local store with a remote store.
//!
//! Push uploads closed commits one at a time, pull applies remote changes
//! since the `last_sync_time` watermark, and `sync` runs both and settles
//! conflicts with the configured [`ConflictPolicy`]. A failure on one commit
//! is recorded on that commit and never aborts the batch.

use super::policy::{ConflictPolicy, Resolution};
use super::remote::{RemoteCommit, RemoteStore, UpsertResponse, UsageInfo};
use crate::error::{Error, Result};
use crate::models::{CommitBundle, SyncStatus};
use crate::store::{Repositories, Store};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, Default)]
pub struct PushOptions {
    /// Push every closed commit and skip the remote version check
    pub force: bool,
    /// Select and check only; write nothing locally or remotely
    pub dry_run: bool,
    /// Only push commits whose last push failed
    pub retry: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushResult {
    pub pushed: usize,
    pub conflicts: usize,
    pub errors: Vec<String>,
    #[serde(skip)]
    pub conflict_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PullResult {
    pub pulled: usize,
    pub conflicts: usize,
    pub errors: Vec<String>,
    #[serde(skip)]
    pub conflict_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    pub pushed: usize,
    pub pulled: usize,
    /// Commits that were in conflict during this pass, resolved or not
    pub conflicts: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatusReport {
    pub is_online: bool,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub pending_count: usize,
    pub synced_count: usize,
    pub conflict_count: usize,
    pub failed_count: usize,
}

enum PushOutcome {
    Pushed,
    WouldPush,
    Conflict,
    /// Deleted locally after selection
    Gone,
}

enum PullOutcome {
    Applied,
    UpToDate,
    Conflict,
}

pub struct SyncEngine<'a, R: RemoteStore + ?Sized> {
    store: &'a Store,
    remote: &'a R,
    policy: ConflictPolicy,
}

impl<'a, R: RemoteStore + ?Sized> SyncEngine<'a, R> {
    pub fn new(store: &'a Store, remote: &'a R) -> Self {
        Self {
            store,
            remote,
            policy: ConflictPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: ConflictPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> ConflictPolicy {
        self.policy
    }

    fn require_auth(&self) -> Result<()> {
        if self.remote.is_authenticated() {
            Ok(())
        } else {
            Err(Error::NotAuthenticated)
        }
    }

    /// Upload selected commits one by one
    pub async fn push(&self, options: &PushOptions) -> Result<PushResult> {
        let statuses: &[SyncStatus] = if options.retry {
            &[SyncStatus::Failed]
        } else if options.force {
            &[
                SyncStatus::Pending,
                SyncStatus::Synced,
                SyncStatus::Conflict,
                SyncStatus::Failed,
            ]
        } else {
            &[SyncStatus::Pending]
        };
        self.push_selected(statuses, options).await
    }

    async fn push_selected(
        &self,
        statuses: &[SyncStatus],
        options: &PushOptions,
    ) -> Result<PushResult> {
        self.require_auth()?;

        let ids = self.store.commits().ids_with_status(statuses, true)?;
        log::debug!("Push selected {} commits", ids.len());

        let mut result = PushResult::default();
        for id in ids {
            match self.push_one(&id, options).await {
                Ok(PushOutcome::Pushed) | Ok(PushOutcome::WouldPush) => result.pushed += 1,
                Ok(PushOutcome::Conflict) => {
                    log::info!("Commit {} changed remotely, marked as conflict", id);
                    result.conflicts += 1;
                    result.conflict_ids.push(id);
                }
                Ok(PushOutcome::Gone) => {}
                Err(e) => {
                    log::warn!("Failed to push commit {}: {}", id, e);
                    if !options.dry_run {
                        if let Err(mark_err) =
                            self.store.commits().set_sync_status(&id, SyncStatus::Failed)
                        {
                            log::warn!("Could not mark commit {} as failed: {}", id, mark_err);
                        }
                    }
                    result.errors.push(format!("{}: {}", id, e));
                }
            }
        }

        log::info!(
            "Push{} complete: {} pushed, {} conflicts, {} errors",
            if options.dry_run { " (dry run)" } else { "" },
            result.pushed,
            result.conflicts,
            result.errors.len()
        );
        Ok(result)
    }

    async fn push_one(&self, id: &str, options: &PushOptions) -> Result<PushOutcome> {
        let Some(bundle) = self.store.commits().load_bundle(id)? else {
            return Ok(PushOutcome::Gone);
        };

        if !options.force {
            let remote_version = self.remote.commit_version(id).await?;
            let commit = &bundle.commit;
            if remote_diverged(remote_version, commit.remote_updated_at, commit.sync_status) {
                if !options.dry_run {
                    self.store.commits().set_sync_status(id, SyncStatus::Conflict)?;
                }
                return Ok(PushOutcome::Conflict);
            }
        }
        if options.dry_run {
            return Ok(PushOutcome::WouldPush);
        }

        let ack = match self.remote.upsert_commit(&bundle).await? {
            UpsertResponse::Ack(ack) => ack,
            UpsertResponse::Reject(reason) => {
                return Err(Error::Remote(format!("rejected: {}", reason)))
            }
        };
        if !ack.covers(&bundle) {
            // The remote now holds this upload; a retry must not read it as a foreign edit
            self.store
                .commits()
                .record_remote_version(id, ack.updated_at, SyncStatus::Failed)?;
            return Err(Error::Remote(format!(
                "partial acknowledgement ({} of {} turns, {} of {} visuals)",
                ack.turns,
                bundle.turn_count(),
                ack.visuals,
                bundle.visuals.len()
            )));
        }

        let current = self.store.transaction(|repos| {
            for (visual_id, url) in &ack.visual_urls {
                repos.visuals.update_cloud_url(visual_id, url)?;
            }
            repos
                .commits
                .mark_synced(id, ack.updated_at, bundle.commit.local_updated_at)
        })?;
        if !current {
            log::debug!("Commit {} was edited during push, left pending", id);
        }
        Ok(PushOutcome::Pushed)
    }

    /// Apply remote changes made since the last pull
    pub async fn pull(&self) -> Result<PullResult> {
        self.require_auth()?;

        let daemon_state = self.store.daemon_state();
        let since = daemon_state.last_sync_time()?;
        let started = Utc::now();

        let mut result = PullResult::default();
        let changed = match self.remote.list_changed_since(since).await {
            Ok(changed) => changed,
            Err(e) => {
                log::warn!("Failed to list remote changes: {}", e);
                result.errors.push(e.to_string());
                return Ok(result);
            }
        };

        let mut watermark = since;
        for remote in &changed {
            watermark = Some(watermark.map_or(remote.updated_at, |w| w.max(remote.updated_at)));
            match self.apply_remote(remote) {
                Ok(PullOutcome::Applied) => result.pulled += 1,
                Ok(PullOutcome::UpToDate) => {}
                Ok(PullOutcome::Conflict) => {
                    log::info!("Commit {} changed on both sides, marked as conflict", remote.id());
                    result.conflicts += 1;
                    result.conflict_ids.push(remote.id().to_string());
                }
                Err(e) => {
                    log::warn!("Failed to apply remote commit {}: {}", remote.id(), e);
                    result.errors.push(format!("{}: {}", remote.id(), e));
                }
            }
        }

        if result.errors.is_empty() {
            daemon_state.set_last_sync_time(watermark.unwrap_or(started))?;
        }

        log::info!(
            "Pull complete: {} pulled, {} conflicts, {} errors",
            result.pulled,
            result.conflicts,
            result.errors.len()
        );
        Ok(result)
    }

    fn apply_remote(&self, remote: &RemoteCommit) -> Result<PullOutcome> {
        self.store.transaction(|repos| {
            let Some(local) = repos.commits.get(remote.id())? else {
                repos.save_bundle(&synced_copy(remote))?;
                return Ok(PullOutcome::Applied);
            };
            if local
                .remote_updated_at
                .map_or(false, |seen| seen >= remote.updated_at)
            {
                return Ok(PullOutcome::UpToDate);
            }
            match local.sync_status {
                SyncStatus::Synced => {
                    replace_with_remote(repos, remote)?;
                    Ok(PullOutcome::Applied)
                }
                SyncStatus::Failed if local.remote_updated_at.is_none() => {
                    // Taken as this client's unacknowledged upload; the retry overwrites it
                    repos
                        .commits
                        .record_remote_version(remote.id(), remote.updated_at, SyncStatus::Failed)?;
                    Ok(PullOutcome::UpToDate)
                }
                SyncStatus::Pending | SyncStatus::Failed | SyncStatus::Conflict => {
                    repos.commits.set_sync_status(remote.id(), SyncStatus::Conflict)?;
                    Ok(PullOutcome::Conflict)
                }
            }
        })
    }

    /// Pull, settle conflicts, then push
    pub async fn sync(&self) -> Result<SyncResult> {
        let pull = self.pull().await?;
        let mut conflicted: BTreeSet<String> = pull.conflict_ids.into_iter().collect();
        let mut errors = pull.errors;

        // Conflicts left over from earlier runs are settled here as well
        let outstanding = self
            .store
            .commits()
            .ids_with_status(&[SyncStatus::Conflict], false)?;
        for id in &outstanding {
            conflicted.insert(id.clone());
            self.resolve_logged(id, &mut errors).await;
        }

        // Re-running sync is how failed uploads get retried
        let selection = [SyncStatus::Pending, SyncStatus::Failed];
        let push = self.push_selected(&selection, &PushOptions::default()).await?;
        let mut pushed = push.pushed;
        errors.extend(push.errors);

        if !push.conflict_ids.is_empty() {
            for id in &push.conflict_ids {
                conflicted.insert(id.clone());
                self.resolve_logged(id, &mut errors).await;
            }
            let second = self.push_selected(&selection, &PushOptions::default()).await?;
            pushed += second.pushed;
            conflicted.extend(second.conflict_ids);
            errors.extend(second.errors);
        }

        let result = SyncResult {
            pushed,
            pulled: pull.pulled,
            conflicts: conflicted.len(),
            errors,
        };
        log::info!(
            "Sync complete: {} pulled, {} pushed, {} conflicts, {} errors",
            result.pulled,
            result.pushed,
            result.conflicts,
            result.errors.len()
        );
        Ok(result)
    }

    async fn resolve_logged(&self, id: &str, errors: &mut Vec<String>) {
        if let Err(e) = self.resolve(id).await {
            log::warn!("Failed to resolve conflict on {}: {}", id, e);
            errors.push(format!("{}: {}", id, e));
        }
    }

    /// Settle one conflicted commit. Returns the applied resolution.
    pub async fn resolve(&self, id: &str) -> Result<Resolution> {
        let Some(local) = self.store.commits().get(id)? else {
            return Ok(Resolution::Unresolved);
        };
        let Some(remote) = self.remote.get_commit(id).await? else {
            // Nothing to conflict with anymore
            self.store.commits().set_sync_status(id, SyncStatus::Pending)?;
            return Ok(Resolution::KeepLocal);
        };

        let resolution = self.policy.resolve(local.local_updated_at, remote.updated_at);
        match resolution {
            Resolution::KeepLocal => {
                self.store
                    .commits()
                    .record_remote_version(id, remote.updated_at, SyncStatus::Pending)?;
            }
            Resolution::TakeRemote => {
                self.store
                    .transaction(|repos| replace_with_remote(repos, &remote))?;
            }
            Resolution::Unresolved => {}
        }
        log::info!(
            "Conflict on {} settled by {}: {:?}",
            id,
            self.policy.as_str(),
            resolution
        );
        Ok(resolution)
    }

    /// Local sync state. Performs no network I/O.
    pub fn status(&self) -> Result<SyncStatusReport> {
        let counts = self.store.commits().count_by_status()?;
        Ok(SyncStatusReport {
            is_online: self.remote.is_authenticated(),
            last_sync_at: self.store.daemon_state().last_sync_time()?,
            pending_count: counts.pending,
            synced_count: counts.synced,
            conflict_count: counts.conflict,
            failed_count: counts.failed,
        })
    }

    pub async fn usage(&self, user_id: &str) -> Result<UsageInfo> {
        self.require_auth()?;
        self.remote.get_usage(user_id).await
    }
}

/// Whether the remote holds a version this client has not seen.
///
/// A failed commit that never recorded a remote version may have been stored
/// by its own last attempt, so the unseen version is not counted against it.
fn remote_diverged(
    remote: Option<DateTime<Utc>>,
    observed: Option<DateTime<Utc>>,
    status: SyncStatus,
) -> bool {
    match (remote, observed) {
        (None, _) => false,
        (Some(_), None) => status != SyncStatus::Failed,
        (Some(remote), Some(observed)) => remote > observed,
    }
}

/// The remote bundle as it should be stored locally after a pull
fn synced_copy(remote: &RemoteCommit) -> CommitBundle {
    let mut bundle = remote.bundle.clone();
    bundle.commit.sync_status = SyncStatus::Synced;
    bundle.commit.remote_updated_at = Some(remote.updated_at);
    for visual in &mut bundle.visuals {
        visual.sync_status = if visual.cloud_url.is_some() {
            SyncStatus::Synced
        } else {
            SyncStatus::Pending
        };
    }
    bundle
}

fn replace_with_remote(repos: &Repositories<'_>, remote: &RemoteCommit) -> Result<()> {
    repos.commits.delete(remote.id())?;
    repos.save_bundle(&synced_copy(remote))
}
