use super::{int_bool, UpsertOutcome};
use crate::error::Result;
use crate::models::{Role, ToolCall, Turn};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

const TURN_COLUMNS: &str = "t.id, t.session_id, t.role, t.content, t.timestamp, t.model, \
     t.tool_calls, t.triggers_visual, t.has_rejection, t.has_approval, t.is_question, \
     t.has_code_block, t.char_count";

const DEFAULT_SEARCH_LIMIT: usize = 20;

fn row_to_turn(row: &Row) -> rusqlite::Result<Turn> {
    let role: String = row.get(2)?;
    let tool_calls_json: Option<String> = row.get(6)?;
    // A corrupt tool_calls blob should not hide the turn itself
    let tool_calls: Option<Vec<ToolCall>> = tool_calls_json
        .as_deref()
        .and_then(|json| serde_json::from_str(json).ok());

    Ok(Turn {
        id: row.get(0)?,
        session_id: row.get(1)?,
        role: Role::from_str(&role),
        content: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        timestamp: row.get(4)?,
        model: row.get(5)?,
        tool_calls,
        triggers_visual_update: int_bool(row.get(7)?),
        has_rejection: int_bool(row.get(8)?),
        has_approval: int_bool(row.get(9)?),
        is_question: int_bool(row.get(10)?),
        has_code_block: int_bool(row.get(11)?),
        char_count: row.get::<_, i64>(12)? as usize,
    })
}

/// Filters for [`TurnsRepository::search`]
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub project: Option<String>,
    /// Defaults to 20
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub turn: Turn,
    pub commit_id: String,
    pub project_name: String,
}

#[derive(Clone, Copy)]
pub struct TurnsRepository<'a> {
    conn: &'a Connection,
}

impl<'a> TurnsRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn exists(&self, id: &str) -> Result<bool> {
        let found = self
            .conn
            .query_row("SELECT 1 FROM turns WHERE id = ?1", [id], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }

    /// Insert the turn or replace an existing one with the same id
    pub fn upsert(&self, turn: &Turn) -> Result<UpsertOutcome> {
        let existed = self.exists(&turn.id)?;
        let tool_calls = turn
            .tool_calls
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        self.conn.execute(
            "INSERT INTO turns (id, session_id, role, content, timestamp, model, tool_calls,
                                triggers_visual, has_rejection, has_approval, is_question,
                                has_code_block, char_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
             ON CONFLICT(id) DO UPDATE SET
                session_id = excluded.session_id,
                role = excluded.role,
                content = excluded.content,
                timestamp = excluded.timestamp,
                model = excluded.model,
                tool_calls = excluded.tool_calls,
                triggers_visual = excluded.triggers_visual,
                has_rejection = excluded.has_rejection,
                has_approval = excluded.has_approval,
                is_question = excluded.is_question,
                has_code_block = excluded.has_code_block,
                char_count = excluded.char_count",
            params![
                turn.id,
                turn.session_id,
                turn.role.as_str(),
                turn.content,
                turn.timestamp,
                turn.model,
                tool_calls,
                turn.triggers_visual_update,
                turn.has_rejection,
                turn.has_approval,
                turn.is_question,
                turn.has_code_block,
                turn.char_count as i64,
            ],
        )?;
        Ok(if existed {
            UpsertOutcome::Replaced
        } else {
            UpsertOutcome::Inserted
        })
    }

    pub fn get(&self, id: &str) -> Result<Option<Turn>> {
        let turn = self
            .conn
            .query_row(
                &format!("SELECT {} FROM turns t WHERE t.id = ?1", TURN_COLUMNS),
                [id],
                row_to_turn,
            )
            .optional()?;
        Ok(turn)
    }

    /// Turns of a session in timestamp order
    pub fn get_for_session(&self, session_id: &str) -> Result<Vec<Turn>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM turns t WHERE t.session_id = ?1 ORDER BY t.timestamp ASC, t.rowid ASC",
            TURN_COLUMNS
        ))?;
        let rows = stmt.query_map([session_id], row_to_turn)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    /// The commit a stored turn belongs to, if the turn exists
    pub fn commit_id_for(&self, turn_id: &str) -> Result<Option<String>> {
        let commit_id = self
            .conn
            .query_row(
                "SELECT s.commit_id FROM turns t JOIN sessions s ON t.session_id = s.id
                 WHERE t.id = ?1",
                [turn_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(commit_id)
    }

    /// Substring search over turn content, newest first
    pub fn search(&self, query: &str, options: &SearchOptions) -> Result<Vec<SearchHit>> {
        let pattern = format!("%{}%", escape_like(query));
        let mut sql = format!(
            "SELECT {}, c.id, c.project_name FROM turns t
             JOIN sessions s ON t.session_id = s.id
             JOIN commits c ON s.commit_id = c.id
             WHERE t.content LIKE ?1 ESCAPE '\\'",
            TURN_COLUMNS
        );
        let mut args = vec![Value::Text(pattern)];
        if let Some(project) = &options.project {
            sql.push_str(" AND c.project_name = ?2");
            args.push(Value::Text(project.clone()));
        }
        sql.push_str(&format!(
            " ORDER BY t.timestamp DESC LIMIT {}",
            options.limit.unwrap_or(DEFAULT_SEARCH_LIMIT)
        ));

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args), |row| {
            Ok(SearchHit {
                turn: row_to_turn(row)?,
                commit_id: row.get(13)?,
                project_name: row.get(14)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }
}

fn escape_like(query: &str) -> String {
    let mut escaped = String::with_capacity(query.len());
    for ch in query.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::escape_like;
    use crate::models::{CognitiveCommit, Role, Session, ToolCall, Turn};
    use crate::store::{SearchOptions, Store};
    use chrono::{Duration, Utc};

    fn seed(store: &Store) {
        let now = Utc::now();
        for (commit, project, offset) in [("c1", "alpha", 0), ("c2", "beta", 10)] {
            let started = now + Duration::minutes(offset);
            store
                .commits()
                .upsert(&CognitiveCommit::new(commit, project, started))
                .unwrap();
            let session_id = format!("s-{}", commit);
            let session = Session {
                id: session_id.clone(),
                commit_id: commit.to_string(),
                started_at: started,
                ended_at: started,
                turns: vec![Turn::new(
                    format!("t-{}", commit),
                    session_id,
                    Role::User,
                    format!("please fix the login bug in {}", project),
                    started,
                )],
            };
            store.sessions().insert(&session).unwrap();
        }
    }

    #[test]
    fn test_search_newest_first() {
        let store = Store::open_in_memory().unwrap();
        seed(&store);
        let hits = store.turns().search("login", &SearchOptions::default()).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].project_name, "beta");
        assert_eq!(hits[1].commit_id, "c1");
    }

    #[test]
    fn test_search_project_filter_and_limit() {
        let store = Store::open_in_memory().unwrap();
        seed(&store);
        let turns = store.turns();
        let alpha = turns
            .search("login", &SearchOptions { project: Some("alpha".into()), limit: None })
            .unwrap();
        assert_eq!(alpha.len(), 1);
        assert_eq!(alpha[0].project_name, "alpha");

        let limited = turns
            .search("login", &SearchOptions { project: None, limit: Some(1) })
            .unwrap();
        assert_eq!(limited.len(), 1);
        assert!(turns.search("100%", &SearchOptions::default()).unwrap().is_empty());
    }

    #[test]
    fn test_tool_calls_round_trip() {
        let store = Store::open_in_memory().unwrap();
        seed(&store);
        let mut turn = Turn::new("t-tool", "s-c1", Role::Assistant, "", Utc::now());
        turn.tool_calls = Some(vec![ToolCall {
            id: "toolu_1".into(),
            name: "Bash".into(),
            input: serde_json::json!({ "command": "ls" }),
            result: Some("src".into()),
            is_error: false,
        }]);
        store.turns().upsert(&turn).unwrap();
        assert_eq!(store.turns().get("t-tool").unwrap(), Some(turn));
        assert_eq!(store.turns().commit_id_for("t-tool").unwrap().as_deref(), Some("c1"));
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("50%_off"), "50\\%\\_off");
    }
}
