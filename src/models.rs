//! Data models for cognitive commits.
//!
//! These structures map to the local SQLite schema in `store::schema` and,
//! with camelCase field names, to the remote store's wire format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reconciliation state of a commit (or visual) relative to the remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    #[default]
    Pending,
    Synced,
    Conflict,
    Failed,
}

impl SyncStatus {
    pub fn from_str(s: &str) -> Self {
        match s {
            "synced" => SyncStatus::Synced,
            "conflict" => SyncStatus::Conflict,
            "failed" => SyncStatus::Failed,
            _ => SyncStatus::Pending,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Synced => "synced",
            SyncStatus::Conflict => "conflict",
            SyncStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who authored a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn from_str(s: &str) -> Self {
        match s {
            "assistant" => Role::Assistant,
            _ => Role::User,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// What ended a commit window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClosedBy {
    /// The assistant ran `git commit`
    GitCommit,
    /// The transcript signalled the end of the conversation
    SessionEnd,
    /// Closed by the user
    Manual,
}

impl ClosedBy {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "git_commit" => Some(ClosedBy::GitCommit),
            "session_end" => Some(ClosedBy::SessionEnd),
            "manual" => Some(ClosedBy::Manual),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ClosedBy::GitCommit => "git_commit",
            ClosedBy::SessionEnd => "session_end",
            ClosedBy::Manual => "manual",
        }
    }
}

/// Tool that produced the transcript
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConversationSource {
    #[default]
    ClaudeCode,
    Cursor,
    Other,
}

impl ConversationSource {
    pub fn from_str(s: &str) -> Self {
        match s {
            "claude_code" => ConversationSource::ClaudeCode,
            "cursor" => ConversationSource::Cursor,
            _ => ConversationSource::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationSource::ClaudeCode => "claude_code",
            ConversationSource::Cursor => "cursor",
            ConversationSource::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VisualType {
    #[default]
    Screenshot,
    Video,
    Image,
}

impl VisualType {
    pub fn from_str(s: &str) -> Self {
        match s {
            "video" => VisualType::Video,
            "image" => VisualType::Image,
            _ => VisualType::Screenshot,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VisualType::Screenshot => "screenshot",
            VisualType::Video => "video",
            VisualType::Image => "image",
        }
    }
}

/// A tool invocation made by the assistant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub input: serde_json::Value,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub is_error: bool,
}

/// One message exchange within a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Turn {
    pub id: String,
    pub session_id: String,
    pub role: Role,
    /// May be empty when the turn only carries tool calls
    #[serde(default)]
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default)]
    pub triggers_visual_update: bool,
    #[serde(default)]
    pub has_rejection: bool,
    #[serde(default)]
    pub has_approval: bool,
    #[serde(default)]
    pub is_question: bool,
    #[serde(default)]
    pub has_code_block: bool,
    #[serde(default)]
    pub char_count: usize,
}

impl Turn {
    /// Create a turn with flags derived from its content
    pub fn new(
        id: impl Into<String>,
        session_id: impl Into<String>,
        role: Role,
        content: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let mut turn = Self {
            id: id.into(),
            session_id: session_id.into(),
            role,
            content: content.into(),
            timestamp,
            model: None,
            tool_calls: None,
            triggers_visual_update: false,
            has_rejection: false,
            has_approval: false,
            is_question: false,
            has_code_block: false,
            char_count: 0,
        };
        turn.derive_flags();
        turn
    }

    /// Recompute the content-derived flags
    pub fn derive_flags(&mut self) {
        let flags = crate::import::flags::TurnFlags::derive(
            self.role,
            &self.content,
            self.tool_calls.as_deref().unwrap_or(&[]),
        );
        self.triggers_visual_update = flags.triggers_visual_update;
        self.has_rejection = flags.has_rejection;
        self.has_approval = flags.has_approval;
        self.is_question = flags.is_question;
        self.has_code_block = flags.has_code_block;
        self.char_count = flags.char_count;
    }

    pub fn is_user(&self) -> bool {
        self.role == Role::User
    }
}

/// One continuous interaction window within a commit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub commit_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    /// Ordered by timestamp
    #[serde(default)]
    pub turns: Vec<Turn>,
}

/// A captured artifact tied to a commit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Visual {
    pub id: String,
    pub commit_id: String,
    #[serde(rename = "type")]
    pub visual_type: VisualType,
    pub path: String,
    pub captured_at: DateTime<Utc>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub cloud_url: Option<String>,
    #[serde(default)]
    pub sync_status: SyncStatus,
}

/// A bounded unit of AI-assisted work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CognitiveCommit {
    pub id: String,
    pub project_name: String,
    #[serde(default)]
    pub git_hash: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub display_order: i64,
    /// `None` while the commit is still open
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub closed_by: Option<ClosedBy>,
    #[serde(default)]
    pub source: ConversationSource,
    /// Number of user turns
    #[serde(default)]
    pub prompt_count: i64,
    #[serde(default)]
    pub sync_status: SyncStatus,
    pub created_at: DateTime<Utc>,
    pub local_updated_at: DateTime<Utc>,
    #[serde(default)]
    pub remote_updated_at: Option<DateTime<Utc>>,
}

impl CognitiveCommit {
    /// Create a new open commit
    pub fn new(id: impl Into<String>, project_name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            project_name: project_name.into(),
            git_hash: None,
            title: None,
            hidden: false,
            display_order: 0,
            closed_at: None,
            closed_by: None,
            source: ConversationSource::default(),
            prompt_count: 0,
            sync_status: SyncStatus::Pending,
            created_at: now,
            local_updated_at: now,
            remote_updated_at: None,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed_at.is_some()
    }
}

/// A commit with all of its children: the unit of push and pull
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitBundle {
    pub commit: CognitiveCommit,
    #[serde(default)]
    pub sessions: Vec<Session>,
    #[serde(default)]
    pub visuals: Vec<Visual>,
}

impl CommitBundle {
    pub fn turn_count(&self) -> usize {
        self.sessions.iter().map(|s| s.turns.len()).sum()
    }
}
