//! Parser for Claude Code JSONL session logs.
//!
//! Each line is one JSON record. Only user and assistant messages become
//! turns; session markers are surfaced so the importer can close commits, and
//! everything else is ignored.

use crate::error::{Error, Result};
use crate::models::{Role, ToolCall};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::sync::OnceLock;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRecord {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    uuid: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    cwd: Option<String>,
    #[serde(default)]
    is_meta: bool,
    #[serde(default)]
    subtype: Option<String>,
    #[serde(default)]
    message: Option<RawMessage>,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    content: Option<RawContent>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawContent {
    Text(String),
    Blocks(Vec<Value>),
}

/// Output of a tool call, reported in a later user record
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub tool_use_id: String,
    pub content: String,
    pub is_error: bool,
}

/// A user or assistant message that becomes a turn
#[derive(Debug, Clone, PartialEq)]
pub struct MessageRecord {
    pub uuid: String,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub cwd: Option<String>,
    pub role: Role,
    pub text: String,
    pub model: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

impl MessageRecord {
    /// The `git commit` tool call in this message, if any
    pub fn git_commit_call(&self) -> Option<&ToolCall> {
        if self.role != Role::Assistant {
            return None;
        }
        self.tool_calls.iter().find(|call| {
            call.name == "Bash"
                && call
                    .input
                    .get("command")
                    .and_then(|c| c.as_str())
                    .map(|c| git_commit_re().is_match(c))
                    .unwrap_or(false)
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Message(MessageRecord),
    /// A user record that only carries tool output
    ToolResults(Vec<ToolResult>),
    SessionEnd { timestamp: Option<DateTime<Utc>> },
    /// Summaries, meta records, snapshots and empty messages
    Ignored,
}

fn git_commit_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\bgit\b[^|;&\n]*\bcommit\b").expect("valid git commit regex"))
}

fn commit_hash_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^\[[^\]\s]+(?: \([^)]*\))? ([0-9a-f]{7,40})\]").expect("valid commit hash regex")
    })
}

/// Pull the short hash out of `git commit` output such as `[main 1a2b3c4] msg`
pub fn commit_hash_from_output(output: &str) -> Option<String> {
    commit_hash_re()
        .captures(output)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Parse one transcript line. `line_number` is only used for error reporting.
pub fn parse_line(line: &str, line_number: usize) -> Result<Record> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(Record::Ignored);
    }

    let raw: RawRecord = serde_json::from_str(trimmed).map_err(|e| Error::Parse {
        line: line_number,
        message: e.to_string(),
    })?;

    let is_session_end = raw.kind == "session_end"
        || (raw.kind == "system" && raw.subtype.as_deref() == Some("session_end"));
    if is_session_end {
        return Ok(Record::SessionEnd {
            timestamp: raw.timestamp,
        });
    }

    let role = match raw.kind.as_str() {
        "user" => Role::User,
        "assistant" => Role::Assistant,
        _ => return Ok(Record::Ignored),
    };
    if raw.is_meta {
        return Ok(Record::Ignored);
    }

    let Some(message) = raw.message else {
        return Ok(Record::Ignored);
    };
    if let Some(declared) = message.role.as_deref() {
        if declared != role.as_str() {
            log::debug!("Line {}: record type {} carries role {}", line_number, raw.kind, declared);
        }
    }

    let mut text_parts = Vec::new();
    let mut tool_calls = Vec::new();
    let mut tool_results = Vec::new();

    match message.content {
        Some(RawContent::Text(text)) => text_parts.push(text),
        Some(RawContent::Blocks(blocks)) => {
            for block in blocks {
                match block.get("type").and_then(|t| t.as_str()) {
                    Some("text") => {
                        if let Some(text) = block.get("text").and_then(|t| t.as_str()) {
                            text_parts.push(text.to_string());
                        }
                    }
                    Some("tool_use") => tool_calls.push(ToolCall {
                        id: str_field(&block, "id"),
                        name: str_field(&block, "name"),
                        input: block.get("input").cloned().unwrap_or(Value::Null),
                        result: None,
                        is_error: false,
                    }),
                    Some("tool_result") => tool_results.push(ToolResult {
                        tool_use_id: str_field(&block, "tool_use_id"),
                        content: tool_result_text(block.get("content")),
                        is_error: block
                            .get("is_error")
                            .and_then(|v| v.as_bool())
                            .unwrap_or(false),
                    }),
                    // thinking, images and anything newer
                    _ => {}
                }
            }
        }
        None => {}
    }

    let text = text_parts.join("\n");
    if text.trim().is_empty() && tool_calls.is_empty() {
        return Ok(if tool_results.is_empty() {
            Record::Ignored
        } else {
            Record::ToolResults(tool_results)
        });
    }

    let uuid = raw.uuid.ok_or_else(|| Error::Parse {
        line: line_number,
        message: "message record without uuid".to_string(),
    })?;
    let timestamp = raw.timestamp.ok_or_else(|| Error::Parse {
        line: line_number,
        message: "message record without timestamp".to_string(),
    })?;

    Ok(Record::Message(MessageRecord {
        uuid,
        session_id: raw.session_id.unwrap_or_default(),
        timestamp,
        cwd: raw.cwd,
        role,
        text,
        model: message.model,
        tool_calls,
    }))
}

fn str_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

fn tool_result_text(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| item.get("text").and_then(|t| t.as_str()))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}
