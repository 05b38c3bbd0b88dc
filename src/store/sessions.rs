use super::{TurnsRepository, UpsertOutcome};
use crate::error::Result;
use crate::models::Session;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

#[derive(Clone, Copy)]
pub struct SessionsRepository<'a> {
    conn: &'a Connection,
    turns: TurnsRepository<'a>,
}

impl<'a> SessionsRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self {
            conn,
            turns: TurnsRepository::new(conn),
        }
    }

    fn exists(&self, id: &str) -> Result<bool> {
        let found = self
            .conn
            .query_row("SELECT 1 FROM sessions WHERE id = ?1", [id], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }

    /// Insert or overwrite the session row (turns are written separately)
    pub fn upsert(&self, session: &Session) -> Result<UpsertOutcome> {
        let existed = self.exists(&session.id)?;
        self.conn.execute(
            "INSERT INTO sessions (id, commit_id, started_at, ended_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                commit_id = excluded.commit_id,
                started_at = excluded.started_at,
                ended_at = excluded.ended_at",
            params![session.id, session.commit_id, session.started_at, session.ended_at],
        )?;
        Ok(if existed {
            UpsertOutcome::Replaced
        } else {
            UpsertOutcome::Inserted
        })
    }

    /// Insert the session with all of its turns
    pub fn insert(&self, session: &Session) -> Result<()> {
        self.upsert(session)?;
        for turn in &session.turns {
            self.turns.upsert(turn)?;
        }
        Ok(())
    }

    /// Create the session or widen its window to cover `[started_at, ended_at]`
    pub fn extend_window(
        &self,
        id: &str,
        commit_id: &str,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
    ) -> Result<()> {
        let existing: Option<(DateTime<Utc>, DateTime<Utc>)> = self
            .conn
            .query_row(
                "SELECT started_at, ended_at FROM sessions WHERE id = ?1",
                [id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let (start, end) = match existing {
            Some((s, e)) => (s.min(started_at), e.max(ended_at)),
            None => (started_at, ended_at),
        };
        self.upsert(&Session {
            id: id.to_string(),
            commit_id: commit_id.to_string(),
            started_at: start,
            ended_at: end,
            turns: Vec::new(),
        })?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Option<Session>> {
        let session = self
            .conn
            .query_row(
                "SELECT id, commit_id, started_at, ended_at FROM sessions WHERE id = ?1",
                [id],
                |row| {
                    Ok(Session {
                        id: row.get(0)?,
                        commit_id: row.get(1)?,
                        started_at: row.get(2)?,
                        ended_at: row.get(3)?,
                        turns: Vec::new(),
                    })
                },
            )
            .optional()?;

        match session {
            Some(mut session) => {
                session.turns = self.turns.get_for_session(&session.id)?;
                Ok(Some(session))
            }
            None => Ok(None),
        }
    }

    /// Sessions of a commit in start order, turns included
    pub fn get_for_commit(&self, commit_id: &str) -> Result<Vec<Session>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, commit_id, started_at, ended_at FROM sessions
             WHERE commit_id = ?1 ORDER BY started_at ASC, id ASC",
        )?;
        let rows = stmt.query_map([commit_id], |row| {
            Ok(Session {
                id: row.get(0)?,
                commit_id: row.get(1)?,
                started_at: row.get(2)?,
                ended_at: row.get(3)?,
                turns: Vec::new(),
            })
        })?;

        let mut sessions = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        for session in &mut sessions {
            session.turns = self.turns.get_for_session(&session.id)?;
        }
        Ok(sessions)
    }

    /// Delete a commit's sessions and their turns; returns sessions removed
    pub fn delete_for_commit(&self, commit_id: &str) -> Result<usize> {
        self.conn.execute(
            "DELETE FROM turns WHERE session_id IN (SELECT id FROM sessions WHERE commit_id = ?1)",
            [commit_id],
        )?;
        let removed = self
            .conn
            .execute("DELETE FROM sessions WHERE commit_id = ?1", [commit_id])?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use crate::models::{CognitiveCommit, Role, Session, Turn};
    use crate::store::Store;
    use chrono::{Duration, Utc};

    #[test]
    fn test_sessions_load_with_ordered_turns() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc::now();
        store.commits().upsert(&CognitiveCommit::new("c1", "demo", now)).unwrap();

        let session = Session {
            id: "s1".into(),
            commit_id: "c1".into(),
            started_at: now,
            ended_at: now + Duration::minutes(2),
            turns: vec![
                Turn::new("t2", "s1", Role::Assistant, "second", now + Duration::minutes(1)),
                Turn::new("t1", "s1", Role::User, "first", now),
            ],
        };
        store.sessions().insert(&session).unwrap();

        let loaded = store.sessions().get_for_commit("c1").unwrap();
        assert_eq!(loaded.len(), 1);
        let ids: Vec<&str> = loaded[0].turns.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["t1", "t2"]);
    }

    #[test]
    fn test_extend_window_only_widens() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc::now();
        store.commits().upsert(&CognitiveCommit::new("c1", "demo", now)).unwrap();
        let sessions = store.sessions();

        sessions
            .extend_window("s1", "c1", now, now + Duration::minutes(5))
            .unwrap();
        sessions
            .extend_window("s1", "c1", now + Duration::minutes(1), now + Duration::minutes(2))
            .unwrap();
        sessions
            .extend_window("s1", "c1", now - Duration::minutes(1), now + Duration::minutes(9))
            .unwrap();

        let session = sessions.get("s1").unwrap().unwrap();
        assert_eq!(session.started_at, now - Duration::minutes(1));
        assert_eq!(session.ended_at, now + Duration::minutes(9));
    }

    #[test]
    fn test_session_requires_existing_commit() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc::now();
        let orphan = Session {
            id: "s1".into(),
            commit_id: "missing".into(),
            started_at: now,
            ended_at: now,
            turns: vec![],
        };
        assert!(store.sessions().upsert(&orphan).is_err());
    }
}
