//! Local embedded store for cognitive commits.
//!
//! One SQLite file holds commits, sessions, turns, visuals and daemon state.
//! The store is opened through [`Store::open`], which applies pending schema
//! migrations before handing out any repository.

mod analytics;
mod commits;
mod daemon_state;
pub mod schema;
mod sessions;
mod turns;
mod visuals;

pub use analytics::{LocalAnalytics, ToolUsage};
pub use commits::{CommitUpdate, CommitsRepository, ListOptions, ProjectCount, StatusCounts};
pub use daemon_state::{DaemonStateRepository, CURRENT_COMMIT_KEY, LAST_ACTIVITY_KEY, LAST_SYNC_KEY};
pub use sessions::SessionsRepository;
pub use turns::{SearchHit, SearchOptions, TurnsRepository};
pub use visuals::{VisualUpdate, VisualsRepository};

use crate::error::{Error, Result};
use crate::models::CommitBundle;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};

/// Whether an upsert created the row or overwrote an existing one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Replaced,
}

impl UpsertOutcome {
    pub fn was_inserted(&self) -> bool {
        matches!(self, UpsertOutcome::Inserted)
    }
}

/// All repositories over one connection (or one open transaction)
#[derive(Clone, Copy)]
pub struct Repositories<'a> {
    pub commits: CommitsRepository<'a>,
    pub sessions: SessionsRepository<'a>,
    pub turns: TurnsRepository<'a>,
    pub visuals: VisualsRepository<'a>,
    pub daemon_state: DaemonStateRepository<'a>,
}

impl<'a> Repositories<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self {
            commits: CommitsRepository::new(conn),
            sessions: SessionsRepository::new(conn),
            turns: TurnsRepository::new(conn),
            visuals: VisualsRepository::new(conn),
            daemon_state: DaemonStateRepository::new(conn),
        }
    }

    /// Write a full bundle: commit first, then sessions, turns and visuals.
    pub fn save_bundle(&self, bundle: &CommitBundle) -> Result<()> {
        self.commits.upsert(&bundle.commit)?;
        for session in &bundle.sessions {
            self.sessions.upsert(session)?;
            for turn in &session.turns {
                self.turns.upsert(turn)?;
            }
        }
        for visual in &bundle.visuals {
            self.visuals.upsert(visual)?;
        }
        Ok(())
    }
}

pub struct Store {
    conn: Connection,
    path: Option<PathBuf>,
}

impl Store {
    /// Open (or create) the store at `path` and migrate it to the current schema
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        let journal: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        log::debug!("Opened store at {:?} (journal_mode={})", path, journal);

        let store = Self {
            conn,
            path: Some(path.to_path_buf()),
        };
        store.initialize()?;
        Ok(store)
    }

    /// Open a private in-memory store, used by tests and dry runs
    pub fn open_in_memory() -> Result<Self> {
        let store = Self {
            conn: Connection::open_in_memory()?,
            path: None,
        };
        store.initialize()?;
        Ok(store)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn initialize(&self) -> Result<()> {
        self.conn.pragma_update(None, "foreign_keys", true)?;
        self.conn.execute_batch(schema::CREATE_TABLES)?;
        self.migrate(schema::SCHEMA_VERSION)
    }

    /// Current schema version, 0 for a store that has never been migrated
    pub fn schema_version(&self) -> Result<u32> {
        let version: Option<u32> = self
            .conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))
            .optional()?
            .flatten();
        Ok(version.unwrap_or(0))
    }

    /// Run every migration between the recorded version and `target`.
    ///
    /// Each migration and its version bump commit together, so a failure
    /// leaves the store at the last fully applied version.
    pub(crate) fn migrate(&self, target: u32) -> Result<()> {
        let current = self.schema_version()?;
        for migration in schema::pending_migrations(current, target) {
            log::info!("Migrating store to schema version {}", migration.version);
            self.apply_migration(migration)
                .map_err(|source| Error::Migration {
                    version: migration.version,
                    source,
                })?;
        }
        Ok(())
    }

    fn apply_migration(&self, migration: &schema::Migration) -> rusqlite::Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        for step in migration.steps {
            match *step {
                schema::Step::AddColumn {
                    table,
                    column,
                    definition,
                } => {
                    if !column_exists(&tx, table, column)? {
                        tx.execute_batch(&format!(
                            "ALTER TABLE {} ADD COLUMN {} {}",
                            table, column, definition
                        ))?;
                    }
                }
                schema::Step::Sql(sql) => tx.execute_batch(sql)?,
            }
        }
        tx.execute("DELETE FROM schema_version", [])?;
        tx.execute(
            "INSERT INTO schema_version (version) VALUES (?1)",
            params![migration.version],
        )?;
        tx.commit()
    }

    pub fn repos(&self) -> Repositories<'_> {
        Repositories::new(&self.conn)
    }

    pub fn commits(&self) -> CommitsRepository<'_> {
        CommitsRepository::new(&self.conn)
    }

    pub fn sessions(&self) -> SessionsRepository<'_> {
        SessionsRepository::new(&self.conn)
    }

    pub fn turns(&self) -> TurnsRepository<'_> {
        TurnsRepository::new(&self.conn)
    }

    pub fn visuals(&self) -> VisualsRepository<'_> {
        VisualsRepository::new(&self.conn)
    }

    pub fn daemon_state(&self) -> DaemonStateRepository<'_> {
        DaemonStateRepository::new(&self.conn)
    }

    /// Run `f` inside one transaction. Everything `f` wrote is rolled back
    /// when it returns an error.
    pub fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Repositories<'_>) -> Result<T>,
    {
        let tx = self.conn.unchecked_transaction()?;
        let value = f(&Repositories::new(&tx))?;
        tx.commit()?;
        Ok(value)
    }

    /// Delete a commit with its sessions, turns and visuals
    pub fn delete_commit(&self, id: &str) -> Result<bool> {
        self.transaction(|repos| repos.commits.delete(id))
    }

    /// Local usage summary over the most recent `recent` commits
    pub fn analytics(&self, recent: usize) -> Result<LocalAnalytics> {
        analytics::compute(&self.conn, recent)
    }
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> rusqlite::Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let names = stmt.query_map([], |row| row.get::<_, String>(1))?;
    for name in names {
        if name? == column {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Turn booleans from SQLite integers
pub(crate) fn int_bool(value: i64) -> bool {
    value != 0
}
