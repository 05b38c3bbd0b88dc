//! Schema and linear migrations for the local store.
//!
//! `CREATE_TABLES` always describes the newest layout but only creates indexes
//! on columns that existed in version 1, so it is safe to run against a store
//! written by an older build before its migrations run.

/// Version this build expects the store to be at.
pub const SCHEMA_VERSION: u32 = 3;

pub const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS commits (
    id TEXT PRIMARY KEY,
    project_name TEXT NOT NULL,
    git_hash TEXT,
    title TEXT,
    hidden INTEGER NOT NULL DEFAULT 0,
    display_order INTEGER NOT NULL DEFAULT 0,
    closed_at TEXT,
    closed_by TEXT,
    source TEXT NOT NULL DEFAULT 'claude_code',
    prompt_count INTEGER NOT NULL DEFAULT 0,
    sync_status TEXT NOT NULL DEFAULT 'pending',
    created_at TEXT NOT NULL,
    local_updated_at TEXT NOT NULL DEFAULT '',
    remote_updated_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_commits_project ON commits(project_name);

CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    commit_id TEXT NOT NULL REFERENCES commits(id),
    started_at TEXT NOT NULL,
    ended_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_sessions_commit ON sessions(commit_id);

CREATE TABLE IF NOT EXISTS turns (
    id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL REFERENCES sessions(id),
    role TEXT NOT NULL,
    content TEXT,
    timestamp TEXT NOT NULL,
    model TEXT,
    tool_calls TEXT,
    triggers_visual INTEGER NOT NULL DEFAULT 0,
    has_rejection INTEGER NOT NULL DEFAULT 0,
    has_approval INTEGER NOT NULL DEFAULT 0,
    is_question INTEGER NOT NULL DEFAULT 0,
    has_code_block INTEGER NOT NULL DEFAULT 0,
    char_count INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_turns_session ON turns(session_id, timestamp);

CREATE TABLE IF NOT EXISTS visuals (
    id TEXT PRIMARY KEY,
    commit_id TEXT NOT NULL REFERENCES commits(id),
    type TEXT NOT NULL,
    path TEXT NOT NULL,
    captured_at TEXT NOT NULL,
    caption TEXT,
    cloud_url TEXT,
    sync_status TEXT NOT NULL DEFAULT 'pending'
);

CREATE INDEX IF NOT EXISTS idx_visuals_commit ON visuals(commit_id);

CREATE TABLE IF NOT EXISTS daemon_state (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// A single idempotent migration step.
#[derive(Debug, Clone, Copy)]
pub enum Step {
    /// `ALTER TABLE .. ADD COLUMN`, skipped when the column already exists
    AddColumn {
        table: &'static str,
        column: &'static str,
        definition: &'static str,
    },
    /// Statement that is safe to run more than once
    Sql(&'static str),
}

/// Steps that bring the store from `version - 1` to `version`.
pub struct Migration {
    pub version: u32,
    pub steps: &'static [Step],
}

pub const MIGRATIONS: &[Migration] = &[
    // 1: baseline, fully described by CREATE_TABLES
    Migration {
        version: 1,
        steps: &[],
    },
    // 2: sync bookkeeping
    Migration {
        version: 2,
        steps: &[
            Step::AddColumn {
                table: "commits",
                column: "sync_status",
                definition: "TEXT NOT NULL DEFAULT 'pending'",
            },
            Step::AddColumn {
                table: "commits",
                column: "local_updated_at",
                definition: "TEXT NOT NULL DEFAULT ''",
            },
            Step::AddColumn {
                table: "commits",
                column: "remote_updated_at",
                definition: "TEXT",
            },
            Step::AddColumn {
                table: "visuals",
                column: "cloud_url",
                definition: "TEXT",
            },
            Step::AddColumn {
                table: "visuals",
                column: "sync_status",
                definition: "TEXT NOT NULL DEFAULT 'pending'",
            },
            Step::Sql("UPDATE commits SET local_updated_at = created_at WHERE local_updated_at = ''"),
            Step::Sql("CREATE INDEX IF NOT EXISTS idx_commits_sync_status ON commits(sync_status)"),
        ],
    },
    // 3: display fields and derived turn flags
    Migration {
        version: 3,
        steps: &[
            Step::AddColumn {
                table: "commits",
                column: "hidden",
                definition: "INTEGER NOT NULL DEFAULT 0",
            },
            Step::AddColumn {
                table: "commits",
                column: "display_order",
                definition: "INTEGER NOT NULL DEFAULT 0",
            },
            Step::AddColumn {
                table: "commits",
                column: "prompt_count",
                definition: "INTEGER NOT NULL DEFAULT 0",
            },
            Step::AddColumn {
                table: "turns",
                column: "has_rejection",
                definition: "INTEGER NOT NULL DEFAULT 0",
            },
            Step::AddColumn {
                table: "turns",
                column: "has_approval",
                definition: "INTEGER NOT NULL DEFAULT 0",
            },
            Step::AddColumn {
                table: "turns",
                column: "is_question",
                definition: "INTEGER NOT NULL DEFAULT 0",
            },
            Step::AddColumn {
                table: "turns",
                column: "has_code_block",
                definition: "INTEGER NOT NULL DEFAULT 0",
            },
            Step::AddColumn {
                table: "turns",
                column: "char_count",
                definition: "INTEGER NOT NULL DEFAULT 0",
            },
            Step::Sql(
                "UPDATE commits SET prompt_count = (
                    SELECT COUNT(*) FROM turns t JOIN sessions s ON t.session_id = s.id
                    WHERE s.commit_id = commits.id AND t.role = 'user'
                 )",
            ),
            Step::Sql("UPDATE turns SET char_count = length(content) WHERE char_count = 0 AND content IS NOT NULL"),
        ],
    },
];

/// Migrations needed to move from `current` to `target`, in order.
pub fn pending_migrations(current: u32, target: u32) -> impl Iterator<Item = &'static Migration> {
    MIGRATIONS
        .iter()
        .filter(move |m| m.version > current && m.version <= target)
}
