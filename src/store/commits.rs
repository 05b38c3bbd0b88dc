use super::{int_bool, SessionsRepository, UpsertOutcome, VisualsRepository};
use crate::error::Result;
use crate::models::{ClosedBy, CognitiveCommit, CommitBundle, ConversationSource, SyncStatus};
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, ToSql};

const COMMIT_COLUMNS: &str = "id, project_name, git_hash, title, hidden, display_order, closed_at, \
     closed_by, source, prompt_count, sync_status, created_at, local_updated_at, remote_updated_at";

/// Filters for [`CommitsRepository::list`]
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub project: Option<String>,
    pub include_hidden: bool,
    pub limit: Option<usize>,
}

/// User-editable commit fields. `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct CommitUpdate {
    /// An empty title clears it
    pub title: Option<String>,
    pub hidden: Option<bool>,
    pub display_order: Option<i64>,
}

impl CommitUpdate {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.hidden.is_none() && self.display_order.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectCount {
    pub name: String,
    pub commits: usize,
}

/// Commit counts per sync status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: usize,
    pub synced: usize,
    pub conflict: usize,
    pub failed: usize,
}

fn row_to_commit(row: &Row) -> rusqlite::Result<CognitiveCommit> {
    let closed_by: Option<String> = row.get(7)?;
    let source: String = row.get(8)?;
    let status: String = row.get(10)?;
    Ok(CognitiveCommit {
        id: row.get(0)?,
        project_name: row.get(1)?,
        git_hash: row.get(2)?,
        title: row.get(3)?,
        hidden: int_bool(row.get(4)?),
        display_order: row.get(5)?,
        closed_at: row.get(6)?,
        closed_by: closed_by.as_deref().and_then(ClosedBy::parse),
        source: ConversationSource::from_str(&source),
        prompt_count: row.get(9)?,
        sync_status: SyncStatus::from_str(&status),
        created_at: row.get(11)?,
        local_updated_at: row.get(12)?,
        remote_updated_at: row.get(13)?,
    })
}

/// Bump `local_updated_at` and send a synced commit back to pending
pub(super) fn touch_commit(conn: &Connection, id: &str, now: DateTime<Utc>) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE commits SET local_updated_at = ?1,
            sync_status = CASE sync_status WHEN 'synced' THEN 'pending' ELSE sync_status END
         WHERE id = ?2",
        params![now, id],
    )?;
    Ok(changed > 0)
}

#[derive(Clone, Copy)]
pub struct CommitsRepository<'a> {
    conn: &'a Connection,
    sessions: SessionsRepository<'a>,
    visuals: VisualsRepository<'a>,
}

impl<'a> CommitsRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self {
            conn,
            sessions: SessionsRepository::new(conn),
            visuals: VisualsRepository::new(conn),
        }
    }

    pub fn exists(&self, id: &str) -> Result<bool> {
        let found = self
            .conn
            .query_row("SELECT 1 FROM commits WHERE id = ?1", [id], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }

    /// Insert the commit, or overwrite every column of an existing row
    pub fn upsert(&self, commit: &CognitiveCommit) -> Result<UpsertOutcome> {
        let existed = self.exists(&commit.id)?;
        self.conn.execute(
            "INSERT INTO commits (id, project_name, git_hash, title, hidden, display_order,
                                  closed_at, closed_by, source, prompt_count, sync_status,
                                  created_at, local_updated_at, remote_updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
             ON CONFLICT(id) DO UPDATE SET
                project_name = excluded.project_name,
                git_hash = excluded.git_hash,
                title = excluded.title,
                hidden = excluded.hidden,
                display_order = excluded.display_order,
                closed_at = excluded.closed_at,
                closed_by = excluded.closed_by,
                source = excluded.source,
                prompt_count = excluded.prompt_count,
                sync_status = excluded.sync_status,
                created_at = excluded.created_at,
                local_updated_at = excluded.local_updated_at,
                remote_updated_at = excluded.remote_updated_at",
            params![
                commit.id,
                commit.project_name,
                commit.git_hash,
                commit.title,
                commit.hidden,
                commit.display_order,
                commit.closed_at,
                commit.closed_by.map(|c| c.as_str()),
                commit.source.as_str(),
                commit.prompt_count,
                commit.sync_status.as_str(),
                commit.created_at,
                commit.local_updated_at,
                commit.remote_updated_at,
            ],
        )?;
        Ok(if existed {
            UpsertOutcome::Replaced
        } else {
            UpsertOutcome::Inserted
        })
    }

    pub fn get(&self, id: &str) -> Result<Option<CognitiveCommit>> {
        let commit = self
            .conn
            .query_row(
                &format!("SELECT {} FROM commits WHERE id = ?1", COMMIT_COLUMNS),
                [id],
                row_to_commit,
            )
            .optional()?;
        Ok(commit)
    }

    /// Newest commit of `project` that is still open
    pub fn open_for_project(&self, project: &str) -> Result<Option<CognitiveCommit>> {
        let commit = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM commits WHERE project_name = ?1 AND closed_at IS NULL
                     ORDER BY created_at DESC, id DESC LIMIT 1",
                    COMMIT_COLUMNS
                ),
                [project],
                row_to_commit,
            )
            .optional()?;
        Ok(commit)
    }

    /// Commits ordered by display order, then newest first
    pub fn list(&self, options: &ListOptions) -> Result<Vec<CognitiveCommit>> {
        let mut sql = format!("SELECT {} FROM commits WHERE 1 = 1", COMMIT_COLUMNS);
        let mut args: Vec<Value> = Vec::new();
        if let Some(project) = &options.project {
            sql.push_str(" AND project_name = ?");
            args.push(Value::Text(project.clone()));
        }
        if !options.include_hidden {
            sql.push_str(" AND hidden = 0");
        }
        sql.push_str(" ORDER BY display_order ASC, COALESCE(closed_at, created_at) DESC");
        if let Some(limit) = options.limit {
            sql.push_str(" LIMIT ?");
            args.push(Value::Integer(limit as i64));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args), row_to_commit)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    pub fn recent(&self, limit: usize) -> Result<Vec<CognitiveCommit>> {
        self.list(&ListOptions {
            limit: Some(limit),
            include_hidden: true,
            ..Default::default()
        })
    }

    pub fn count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM commits", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Projects with their commit counts, busiest first
    pub fn distinct_projects(&self) -> Result<Vec<ProjectCount>> {
        let mut stmt = self.conn.prepare(
            "SELECT project_name, COUNT(*) FROM commits
             GROUP BY project_name ORDER BY COUNT(*) DESC, project_name ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(ProjectCount {
                name: row.get(0)?,
                commits: row.get::<_, i64>(1)? as usize,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    pub fn count_by_status(&self) -> Result<StatusCounts> {
        let mut stmt = self
            .conn
            .prepare("SELECT sync_status, COUNT(*) FROM commits GROUP BY sync_status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
        })?;

        let mut counts = StatusCounts::default();
        for row in rows {
            let (status, n) = row?;
            match SyncStatus::from_str(&status) {
                SyncStatus::Pending => counts.pending += n,
                SyncStatus::Synced => counts.synced += n,
                SyncStatus::Conflict => counts.conflict += n,
                SyncStatus::Failed => counts.failed += n,
            }
        }
        Ok(counts)
    }

    /// Ids of commits in any of `statuses`, oldest first
    pub fn ids_with_status(&self, statuses: &[SyncStatus], closed_only: bool) -> Result<Vec<String>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; statuses.len()].join(", ");
        let mut sql = format!(
            "SELECT id FROM commits WHERE sync_status IN ({})",
            placeholders
        );
        if closed_only {
            sql.push_str(" AND closed_at IS NOT NULL");
        }
        sql.push_str(" ORDER BY created_at ASC, id ASC");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(statuses.iter().map(|s| s.as_str())), |row| {
            row.get::<_, String>(0)
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    /// Apply a partial update. Returns `true` only when a stored value changed.
    ///
    /// A real change bumps `local_updated_at`, and a synced commit goes back
    /// to pending so the edit is pushed.
    pub fn update(&self, id: &str, changes: &CommitUpdate, now: DateTime<Utc>) -> Result<bool> {
        if changes.is_empty() {
            return Ok(false);
        }

        let mut sets = Vec::new();
        let mut differs = Vec::new();
        let mut args: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(title) = &changes.title {
            let value = (!title.is_empty()).then(|| title.clone());
            args.push(Box::new(value));
            let n = args.len();
            sets.push(format!("title = ?{}", n));
            differs.push(format!("title IS NOT ?{}", n));
        }
        if let Some(hidden) = changes.hidden {
            args.push(Box::new(hidden));
            let n = args.len();
            sets.push(format!("hidden = ?{}", n));
            differs.push(format!("hidden IS NOT ?{}", n));
        }
        if let Some(order) = changes.display_order {
            args.push(Box::new(order));
            let n = args.len();
            sets.push(format!("display_order = ?{}", n));
            differs.push(format!("display_order IS NOT ?{}", n));
        }

        args.push(Box::new(now));
        let now_idx = args.len();
        args.push(Box::new(id.to_string()));
        let id_idx = args.len();

        let sql = format!(
            "UPDATE commits SET {}, local_updated_at = ?{}, \
             sync_status = CASE sync_status WHEN 'synced' THEN 'pending' ELSE sync_status END \
             WHERE id = ?{} AND ({})",
            sets.join(", "),
            now_idx,
            id_idx,
            differs.join(" OR ")
        );
        let changed = self
            .conn
            .execute(&sql, params_from_iter(args.iter().map(|a| a.as_ref())))?;
        Ok(changed > 0)
    }

    /// Record a local change to a commit's children
    pub fn touch(&self, id: &str, now: DateTime<Utc>) -> Result<bool> {
        touch_commit(self.conn, id, now)
    }

    pub fn set_sync_status(&self, id: &str, status: SyncStatus) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE commits SET sync_status = ?1 WHERE id = ?2",
            params![status.as_str(), id],
        )?;
        Ok(changed > 0)
    }

    /// Mark a pushed commit synced, unless it was edited after the push read it.
    ///
    /// Returns `false` when `local_updated_at` moved on, leaving the commit
    /// pending for the next push.
    pub fn mark_synced(
        &self,
        id: &str,
        remote_updated_at: DateTime<Utc>,
        expected_local_updated_at: DateTime<Utc>,
    ) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE commits SET sync_status = 'synced', remote_updated_at = ?1
             WHERE id = ?2 AND local_updated_at = ?3",
            params![remote_updated_at, id, expected_local_updated_at],
        )?;
        if changed == 0 {
            self.conn.execute(
                "UPDATE commits SET remote_updated_at = ?1 WHERE id = ?2",
                params![remote_updated_at, id],
            )?;
        }
        Ok(changed > 0)
    }

    /// Remember which remote version a local state was reconciled against
    pub fn record_remote_version(
        &self,
        id: &str,
        remote_updated_at: DateTime<Utc>,
        status: SyncStatus,
    ) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE commits SET remote_updated_at = ?1, sync_status = ?2 WHERE id = ?3",
            params![remote_updated_at, status.as_str(), id],
        )?;
        Ok(changed > 0)
    }

    /// Close an open commit. Returns `false` if it was already closed or missing.
    pub fn close(
        &self,
        id: &str,
        closed_at: DateTime<Utc>,
        closed_by: ClosedBy,
        git_hash: Option<&str>,
    ) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE commits SET closed_at = ?1, closed_by = ?2,
                git_hash = COALESCE(?3, git_hash), local_updated_at = ?1,
                sync_status = CASE sync_status WHEN 'synced' THEN 'pending' ELSE sync_status END
             WHERE id = ?4 AND closed_at IS NULL",
            params![closed_at, closed_by.as_str(), git_hash, id],
        )?;
        Ok(changed > 0)
    }

    /// Recount user turns into `prompt_count`
    pub fn refresh_prompt_count(&self, id: &str) -> Result<i64> {
        self.conn.execute(
            "UPDATE commits SET prompt_count = (
                SELECT COUNT(*) FROM turns t JOIN sessions s ON t.session_id = s.id
                WHERE s.commit_id = ?1 AND t.role = 'user'
             ) WHERE id = ?1",
            [id],
        )?;
        let count = self
            .conn
            .query_row("SELECT prompt_count FROM commits WHERE id = ?1", [id], |row| row.get(0))
            .optional()?;
        Ok(count.unwrap_or(0))
    }

    /// Remove a commit and everything under it, children first.
    ///
    /// Not atomic on its own; use [`super::Store::delete_commit`] or call it
    /// inside a transaction.
    pub fn delete(&self, id: &str) -> Result<bool> {
        self.sessions.delete_for_commit(id)?;
        self.visuals.delete_for_commit(id)?;
        let changed = self.conn.execute("DELETE FROM commits WHERE id = ?1", [id])?;
        Ok(changed > 0)
    }

    /// The commit with its sessions (and their turns) and visuals
    pub fn load_bundle(&self, id: &str) -> Result<Option<CommitBundle>> {
        let Some(commit) = self.get(id)? else {
            return Ok(None);
        };
        Ok(Some(CommitBundle {
            sessions: self.sessions.get_for_commit(id)?,
            visuals: self.visuals.get_for_commit(id)?,
            commit,
        }))
    }
}
