use super::commits::touch_commit;
use super::UpsertOutcome;
use crate::error::Result;
use crate::models::{SyncStatus, Visual, VisualType};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};

/// Editable visual fields
#[derive(Debug, Clone, Default)]
pub struct VisualUpdate {
    /// An empty caption clears it
    pub caption: Option<String>,
}

fn row_to_visual(row: &Row) -> rusqlite::Result<Visual> {
    let visual_type: String = row.get(2)?;
    let status: String = row.get(7)?;
    Ok(Visual {
        id: row.get(0)?,
        commit_id: row.get(1)?,
        visual_type: VisualType::from_str(&visual_type),
        path: row.get(3)?,
        captured_at: row.get(4)?,
        caption: row.get(5)?,
        cloud_url: row.get(6)?,
        sync_status: SyncStatus::from_str(&status),
    })
}

#[derive(Clone, Copy)]
pub struct VisualsRepository<'a> {
    conn: &'a Connection,
}

impl<'a> VisualsRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn upsert(&self, visual: &Visual) -> Result<UpsertOutcome> {
        let existed = self.get(&visual.id)?.is_some();
        self.conn.execute(
            "INSERT INTO visuals (id, commit_id, type, path, captured_at, caption, cloud_url, sync_status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO UPDATE SET
                commit_id = excluded.commit_id,
                type = excluded.type,
                path = excluded.path,
                captured_at = excluded.captured_at,
                caption = excluded.caption,
                cloud_url = excluded.cloud_url,
                sync_status = excluded.sync_status",
            params![
                visual.id,
                visual.commit_id,
                visual.visual_type.as_str(),
                visual.path,
                visual.captured_at,
                visual.caption,
                visual.cloud_url,
                visual.sync_status.as_str(),
            ],
        )?;
        Ok(if existed {
            UpsertOutcome::Replaced
        } else {
            UpsertOutcome::Inserted
        })
    }

    /// Store a newly captured visual under a random id.
    ///
    /// Counts as a local edit of the parent commit, which is touched first.
    pub fn create(
        &self,
        commit_id: &str,
        visual_type: VisualType,
        path: &str,
        caption: Option<&str>,
    ) -> Result<Visual> {
        let now = Utc::now();
        let visual = Visual {
            id: uuid::Uuid::new_v4().to_string(),
            commit_id: commit_id.to_string(),
            visual_type,
            path: path.to_string(),
            captured_at: now,
            caption: caption.map(str::to_string),
            cloud_url: None,
            sync_status: SyncStatus::Pending,
        };
        touch_commit(self.conn, commit_id, now)?;
        self.upsert(&visual)?;
        Ok(visual)
    }

    pub fn get(&self, id: &str) -> Result<Option<Visual>> {
        let visual = self
            .conn
            .query_row(
                "SELECT id, commit_id, type, path, captured_at, caption, cloud_url, sync_status
                 FROM visuals WHERE id = ?1",
                [id],
                row_to_visual,
            )
            .optional()?;
        Ok(visual)
    }

    pub fn get_for_commit(&self, commit_id: &str) -> Result<Vec<Visual>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, commit_id, type, path, captured_at, caption, cloud_url, sync_status
             FROM visuals WHERE commit_id = ?1 ORDER BY captured_at ASC, id ASC",
        )?;
        let rows = stmt.query_map([commit_id], row_to_visual)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    /// Apply a partial update. Returns `true` if a row changed.
    ///
    /// A real change sends the parent commit back to pending.
    pub fn update(&self, id: &str, changes: &VisualUpdate) -> Result<bool> {
        let Some(caption) = &changes.caption else {
            return Ok(false);
        };
        let caption = (!caption.is_empty()).then_some(caption.as_str());
        let Some(current) = self.get(id)? else {
            return Ok(false);
        };
        if current.caption.as_deref() == caption {
            return Ok(false);
        }
        touch_commit(self.conn, &current.commit_id, Utc::now())?;
        let changed = self.conn.execute(
            "UPDATE visuals SET caption = ?1 WHERE id = ?2 AND caption IS NOT ?1",
            params![caption, id],
        )?;
        Ok(changed > 0)
    }

    /// Record where the remote stored the visual; it is synced from then on
    pub fn update_cloud_url(&self, id: &str, url: &str) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE visuals SET cloud_url = ?1, sync_status = 'synced' WHERE id = ?2",
            params![url, id],
        )?;
        Ok(changed > 0)
    }

    /// Remove one visual; the parent commit goes back to pending
    pub fn delete(&self, id: &str) -> Result<bool> {
        let Some(current) = self.get(id)? else {
            return Ok(false);
        };
        touch_commit(self.conn, &current.commit_id, Utc::now())?;
        let changed = self.conn.execute("DELETE FROM visuals WHERE id = ?1", [id])?;
        Ok(changed > 0)
    }

    pub fn delete_for_commit(&self, commit_id: &str) -> Result<usize> {
        let removed = self
            .conn
            .execute("DELETE FROM visuals WHERE commit_id = ?1", [commit_id])?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::VisualUpdate;
    use crate::models::{CognitiveCommit, SyncStatus, VisualType};
    use crate::store::Store;
    use chrono::{Duration, Utc};

    #[test]
    fn test_visual_lifecycle() {
        let store = Store::open_in_memory().unwrap();
        store.commits().upsert(&CognitiveCommit::new("c1", "demo", Utc::now())).unwrap();
        let visuals = store.visuals();

        let visual = visuals
            .create("c1", VisualType::Screenshot, "/tmp/shot.png", None)
            .unwrap();
        assert_eq!(visual.sync_status, SyncStatus::Pending);

        let caption = VisualUpdate { caption: Some("login page".into()) };
        assert!(visuals.update(&visual.id, &caption).unwrap());
        assert!(!visuals.update(&visual.id, &caption).unwrap());
        assert!(!visuals.update("missing", &caption).unwrap());
        assert!(visuals.update_cloud_url(&visual.id, "https://cdn/shot.png").unwrap());

        let stored = visuals.get(&visual.id).unwrap().unwrap();
        assert_eq!(stored.caption.as_deref(), Some("login page"));
        assert_eq!(stored.sync_status, SyncStatus::Synced);

        assert_eq!(visuals.get_for_commit("c1").unwrap().len(), 1);
        assert!(visuals.delete(&visual.id).unwrap());
        assert!(!visuals.delete(&visual.id).unwrap());
    }

    #[test]
    fn test_visual_edits_send_synced_commit_back_to_pending() {
        let store = Store::open_in_memory().unwrap();
        let created = Utc::now() - Duration::hours(1);
        store.commits().upsert(&CognitiveCommit::new("c1", "demo", created)).unwrap();
        let commits = store.commits();
        let visuals = store.visuals();
        let status = || commits.get("c1").unwrap().unwrap().sync_status;

        commits.set_sync_status("c1", SyncStatus::Synced).unwrap();
        let visual = visuals
            .create("c1", VisualType::Image, "/tmp/diagram.png", None)
            .unwrap();
        assert_eq!(status(), SyncStatus::Pending);
        assert!(commits.get("c1").unwrap().unwrap().local_updated_at > created);

        commits.set_sync_status("c1", SyncStatus::Synced).unwrap();
        let same = VisualUpdate { caption: Some(String::new()) };
        assert!(!visuals.update(&visual.id, &same).unwrap());
        assert_eq!(status(), SyncStatus::Synced);

        let caption = VisualUpdate { caption: Some("architecture".into()) };
        assert!(visuals.update(&visual.id, &caption).unwrap());
        assert_eq!(status(), SyncStatus::Pending);

        // Recording the hosted URL is sync bookkeeping, not an edit
        commits.set_sync_status("c1", SyncStatus::Synced).unwrap();
        visuals.update_cloud_url(&visual.id, "https://cdn/diagram.png").unwrap();
        assert_eq!(status(), SyncStatus::Synced);

        assert!(visuals.delete(&visual.id).unwrap());
        assert_eq!(status(), SyncStatus::Pending);
    }
}
