mod common;

use chrono::{Duration, Utc};
use cogcommit::models::{SyncStatus, VisualType};
use cogcommit::store::CommitUpdate;
use cogcommit::sync::{ConflictPolicy, MemoryRemoteStore, PushOptions, SyncEngine};
use cogcommit::{ImportOptions, Importer, Store};
use common::*;

fn imported_store(prompts: &[&str]) -> (tempfile::TempDir, Store) {
    let dir = tempfile::tempdir().unwrap();
    append(
        &dir.path().join("demo/session.jsonl"),
        &closed_commits("/work/demo", prompts),
    );
    let store = Store::open(dir.path().join("data.db")).unwrap();
    Importer::new(&store, dir.path())
        .import_all(&ImportOptions::default())
        .unwrap();
    (dir, store)
}

fn commit_ids(store: &Store) -> Vec<String> {
    store
        .commits()
        .ids_with_status(
            &[
                SyncStatus::Pending,
                SyncStatus::Synced,
                SyncStatus::Conflict,
                SyncStatus::Failed,
            ],
            false,
        )
        .unwrap()
}

fn status_of(store: &Store, id: &str) -> SyncStatus {
    store.commits().get(id).unwrap().unwrap().sync_status
}

#[tokio::test]
async fn test_import_push_pull_round_trip() {
    let (_dir, store) = imported_store(&["add a settings page"]);
    let ids = commit_ids(&store);
    assert_eq!(ids.len(), 1);
    let bundle = store.commits().load_bundle(&ids[0]).unwrap().unwrap();
    assert_eq!(bundle.sessions.len(), 1);
    assert_eq!(bundle.turn_count(), 2);
    assert_eq!(bundle.commit.sync_status, SyncStatus::Pending);

    let remote = MemoryRemoteStore::new();
    let engine = SyncEngine::new(&store, &remote);

    let push = engine.push(&PushOptions::default()).await.unwrap();
    assert_eq!(push.pushed, 1);
    assert_eq!(push.conflicts, 0);
    assert!(push.errors.is_empty());
    assert_eq!(status_of(&store, &ids[0]), SyncStatus::Synced);
    assert_eq!(remote.get(&ids[0]).unwrap().bundle.turn_count(), 2);

    let pull = engine.pull().await.unwrap();
    assert_eq!(pull.pulled, 0);
    assert_eq!(pull.conflicts, 0);
    assert!(store.daemon_state().last_sync_time().unwrap().is_some());
}

#[tokio::test]
async fn test_one_failing_commit_does_not_stop_the_batch() {
    let (_dir, store) = imported_store(&["one", "two", "three", "four", "five"]);
    let ids = commit_ids(&store);
    assert_eq!(ids.len(), 5);

    let remote = MemoryRemoteStore::new();
    remote.fail_commit(&ids[2]);
    let engine = SyncEngine::new(&store, &remote);

    let result = engine.push(&PushOptions::default()).await.unwrap();
    assert_eq!(result.pushed, 4);
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0].starts_with(&ids[2]));
    for (i, id) in ids.iter().enumerate() {
        let expected = if i == 2 { SyncStatus::Failed } else { SyncStatus::Synced };
        assert_eq!(status_of(&store, id), expected);
    }

    let status = engine.status().unwrap();
    assert!(status.is_online);
    assert_eq!(status.synced_count, 4);
    assert_eq!(status.failed_count, 1);
    assert_eq!(status.pending_count, 0);

    // A plain push does not pick the failed commit up again
    remote.clear_failures();
    assert_eq!(engine.push(&PushOptions::default()).await.unwrap().pushed, 0);
    let retry = engine
        .push(&PushOptions { retry: true, ..Default::default() })
        .await
        .unwrap();
    assert_eq!(retry.pushed, 1);
    assert_eq!(status_of(&store, &ids[2]), SyncStatus::Synced);
}

#[tokio::test]
async fn test_sync_reports_conflict_when_both_sides_changed() {
    let (_dir, store) = imported_store(&["fix the login form"]);
    let id = commit_ids(&store).remove(0);
    let remote = MemoryRemoteStore::new();
    let engine = SyncEngine::new(&store, &remote);
    engine.sync().await.unwrap();
    assert_eq!(status_of(&store, &id), SyncStatus::Synced);

    store
        .commits()
        .update(
            &id,
            &CommitUpdate { title: Some("Local title".into()), ..Default::default() },
            Utc::now(),
        )
        .unwrap();
    assert_eq!(status_of(&store, &id), SyncStatus::Pending);
    remote.edit(&id, Utc::now() + Duration::minutes(1), |b| {
        b.commit.title = Some("Remote title".into())
    });

    let result = engine.sync().await.unwrap();
    assert!(result.conflicts >= 1);
    assert!(result.errors.is_empty());

    // Remote edit is newer, so last-writer-wins takes it
    let local = store.commits().get(&id).unwrap().unwrap();
    assert_eq!(local.title.as_deref(), Some("Remote title"));
    assert_eq!(local.sync_status, SyncStatus::Synced);
    assert_eq!(
        remote.get(&id).unwrap().bundle.commit.title.as_deref(),
        Some("Remote title")
    );
}

#[tokio::test]
async fn test_prefer_local_keeps_local_edit() {
    let (_dir, store) = imported_store(&["fix the login form"]);
    let id = commit_ids(&store).remove(0);
    let remote = MemoryRemoteStore::new();
    let engine = SyncEngine::new(&store, &remote).with_policy(ConflictPolicy::PreferLocal);
    engine.push(&PushOptions::default()).await.unwrap();

    store
        .commits()
        .update(
            &id,
            &CommitUpdate { title: Some("Local title".into()), ..Default::default() },
            Utc::now(),
        )
        .unwrap();
    remote.edit(&id, Utc::now() + Duration::minutes(1), |b| {
        b.commit.title = Some("Remote title".into())
    });

    let result = engine.sync().await.unwrap();
    assert_eq!(result.conflicts, 1);
    assert_eq!(result.pushed, 1);
    assert_eq!(
        remote.get(&id).unwrap().bundle.commit.title.as_deref(),
        Some("Local title")
    );
    assert_eq!(status_of(&store, &id), SyncStatus::Synced);
}

#[tokio::test]
async fn test_dry_run_and_unauthenticated_push() {
    let (_dir, store) = imported_store(&["one", "two"]);
    let remote = MemoryRemoteStore::new();
    let engine = SyncEngine::new(&store, &remote);

    let dry = engine
        .push(&PushOptions { dry_run: true, ..Default::default() })
        .await
        .unwrap();
    assert_eq!(dry.pushed, 2);
    assert!(remote.is_empty());
    assert_eq!(engine.status().unwrap().pending_count, 2);

    remote.set_authenticated(false);
    assert!(matches!(
        engine.push(&PushOptions::default()).await,
        Err(cogcommit::Error::NotAuthenticated)
    ));
    let status = engine.status().unwrap();
    assert!(!status.is_online);
    assert_eq!(status.last_sync_at, None);
}

#[tokio::test]
async fn test_visuals_receive_cloud_urls_and_travel_with_pull() {
    let (_dir, store) = imported_store(&["restyle the header"]);
    let id = commit_ids(&store).remove(0);
    let visual = store
        .visuals()
        .create(&id, VisualType::Screenshot, "/tmp/header.png", Some("new header"))
        .unwrap();

    let remote = MemoryRemoteStore::new();
    SyncEngine::new(&store, &remote)
        .push(&PushOptions::default())
        .await
        .unwrap();
    let stored = store.visuals().get(&visual.id).unwrap().unwrap();
    assert_eq!(stored.cloud_url.as_deref(), Some(format!("memory://visuals/{}", visual.id).as_str()));
    assert_eq!(stored.sync_status, SyncStatus::Synced);

    // A second device pulls the commit with its children
    let other = Store::open_in_memory().unwrap();
    let pulled = SyncEngine::new(&other, &remote).pull().await.unwrap();
    assert_eq!(pulled.pulled, 1);
    let bundle = other.commits().load_bundle(&id).unwrap().unwrap();
    assert_eq!(bundle.turn_count(), 2);
    assert_eq!(bundle.visuals.len(), 1);
    assert_eq!(bundle.visuals[0].cloud_url, stored.cloud_url);
    assert_eq!(bundle.visuals[0].sync_status, SyncStatus::Synced);
    assert_eq!(bundle.commit.sync_status, SyncStatus::Synced);

    // Cascade removes every child row
    assert!(other.delete_commit(&id).unwrap());
    assert!(other.sessions().get_for_commit(&id).unwrap().is_empty());
    assert!(other.visuals().get_for_commit(&id).unwrap().is_empty());
    assert!(!other.delete_commit(&id).unwrap());
}

#[tokio::test]
async fn test_visual_added_after_sync_is_pushed() {
    let (_dir, store) = imported_store(&["tune the dashboard colors"]);
    let id = commit_ids(&store).remove(0);
    let remote = MemoryRemoteStore::new();
    let engine = SyncEngine::new(&store, &remote);
    engine.sync().await.unwrap();
    assert_eq!(status_of(&store, &id), SyncStatus::Synced);

    let visual = store
        .visuals()
        .create(&id, VisualType::Screenshot, "/tmp/dashboard.png", None)
        .unwrap();
    assert_eq!(status_of(&store, &id), SyncStatus::Pending);

    let result = engine.sync().await.unwrap();
    assert_eq!(result.pushed, 1);
    assert_eq!(result.conflicts, 0);
    assert_eq!(status_of(&store, &id), SyncStatus::Synced);
    let pushed = remote.get(&id).unwrap().bundle;
    assert_eq!(pushed.visuals.len(), 1);
    assert_eq!(pushed.visuals[0].id, visual.id);
    assert_eq!(
        store.visuals().get(&visual.id).unwrap().unwrap().sync_status,
        SyncStatus::Synced
    );
}

#[tokio::test]
async fn test_rerunning_sync_retries_failed_upload() {
    let (_dir, store) = imported_store(&["one", "two"]);
    let ids = commit_ids(&store);
    let remote = MemoryRemoteStore::new();
    remote.partially_ack_commit(&ids[0]);
    let engine = SyncEngine::new(&store, &remote);

    let first = engine.sync().await.unwrap();
    assert_eq!(first.pushed, 1);
    assert_eq!(first.errors.len(), 1);
    assert_eq!(status_of(&store, &ids[0]), SyncStatus::Failed);

    remote.clear_failures();
    let second = engine.sync().await.unwrap();
    assert_eq!(second.pushed, 1);
    assert_eq!(second.conflicts, 0);
    assert!(second.errors.is_empty());
    assert_eq!(status_of(&store, &ids[0]), SyncStatus::Synced);
    assert_eq!(remote.get(&ids[0]).unwrap().bundle.turn_count(), 2);
}
