//! Key/value state that survives restarts: per-file import watermarks,
//! the currently open commit, and sync bookkeeping.

use crate::error::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

pub const CURRENT_COMMIT_KEY: &str = "current_commit_id";
pub const LAST_SYNC_KEY: &str = "last_sync_time";
pub const LAST_ACTIVITY_KEY: &str = "last_activity";
const FILE_POSITION_PREFIX: &str = "file_pos:";

fn file_position_key(path: &Path) -> String {
    format!("{}{}", FILE_POSITION_PREFIX, path.display())
}

#[derive(Clone, Copy)]
pub struct DaemonStateRepository<'a> {
    conn: &'a Connection,
}

impl<'a> DaemonStateRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row("SELECT value FROM daemon_state WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO daemon_state (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn delete(&self, key: &str) -> Result<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM daemon_state WHERE key = ?1", [key])?;
        Ok(changed > 0)
    }

    fn get_time(&self, key: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(self.get(key)?.and_then(|raw| {
            DateTime::parse_from_rfc3339(&raw)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| log::warn!("Ignoring unparseable {} value {:?}: {}", key, raw, e))
                .ok()
        }))
    }

    fn set_time(&self, key: &str, time: DateTime<Utc>) -> Result<()> {
        self.set(key, &time.to_rfc3339())
    }

    /// Bytes of `path` already consumed by the importer
    pub fn file_position(&self, path: &Path) -> Result<u64> {
        Ok(self
            .get(&file_position_key(path))?
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(0))
    }

    pub fn set_file_position(&self, path: &Path, position: u64) -> Result<()> {
        self.set(&file_position_key(path), &position.to_string())
    }

    pub fn reset_file_position(&self, path: &Path) -> Result<bool> {
        self.delete(&file_position_key(path))
    }

    pub fn current_commit_id(&self) -> Result<Option<String>> {
        self.get(CURRENT_COMMIT_KEY)
    }

    pub fn set_current_commit_id(&self, id: Option<&str>) -> Result<()> {
        match id {
            Some(id) => self.set(CURRENT_COMMIT_KEY, id),
            None => self.delete(CURRENT_COMMIT_KEY).map(|_| ()),
        }
    }

    pub fn last_sync_time(&self) -> Result<Option<DateTime<Utc>>> {
        self.get_time(LAST_SYNC_KEY)
    }

    pub fn set_last_sync_time(&self, time: DateTime<Utc>) -> Result<()> {
        self.set_time(LAST_SYNC_KEY, time)
    }

    pub fn last_activity(&self) -> Result<Option<DateTime<Utc>>> {
        self.get_time(LAST_ACTIVITY_KEY)
    }

    pub fn set_last_activity(&self, time: DateTime<Utc>) -> Result<()> {
        self.set_time(LAST_ACTIVITY_KEY, time)
    }
}
