//! Content-derived turn flags.
//!
//! Everything here is a pure function of the turn's role, text and tool calls.

use crate::models::{Role, ToolCall};
use regex::Regex;
use std::sync::OnceLock;

/// Extensions whose edits show up in the rendered UI
const UI_EXTENSIONS: &[&str] = &["tsx", "jsx", "vue", "svelte", "html", "css", "scss"];

/// Tools that write files
const EDIT_TOOLS: &[&str] = &["Edit", "MultiEdit", "Write", "NotebookEdit"];

fn rejection_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)^\s*(no|nope|wrong|revert|undo|stop|incorrect)\b|\b(that's not|that is not|not what i)\b",
        )
        .expect("valid rejection regex")
    })
}

fn approval_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)^\s*(yes|yep|great|perfect|awesome|nice|lgtm|thanks|thank you)\b|\b(looks good|works now|that works)\b",
        )
        .expect("valid approval regex")
    })
}

fn question_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^\s*(how|what|why|when|where|which|who|can|could|should|would|is|are|does|do)\b")
            .expect("valid question regex")
    })
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TurnFlags {
    pub triggers_visual_update: bool,
    pub has_rejection: bool,
    pub has_approval: bool,
    pub is_question: bool,
    pub has_code_block: bool,
    pub char_count: usize,
}

impl TurnFlags {
    pub fn derive(role: Role, content: &str, tool_calls: &[ToolCall]) -> Self {
        let is_user = role == Role::User;
        let text = content.trim();
        Self {
            triggers_visual_update: role == Role::Assistant && edits_ui_file(tool_calls),
            has_rejection: is_user && rejection_re().is_match(text),
            has_approval: is_user && approval_re().is_match(text),
            is_question: !text.is_empty() && (text.ends_with('?') || question_re().is_match(text)),
            has_code_block: content.contains("```"),
            char_count: content.chars().count(),
        }
    }
}

/// Whether any tool call writes a file with a UI extension
pub fn edits_ui_file(tool_calls: &[ToolCall]) -> bool {
    tool_calls.iter().any(|call| {
        if !EDIT_TOOLS.contains(&call.name.as_str()) {
            return false;
        }
        let path = call
            .input
            .get("file_path")
            .or_else(|| call.input.get("notebook_path"))
            .and_then(|v| v.as_str())
            .unwrap_or("");
        std::path::Path::new(path)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| UI_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            .unwrap_or(false)
    })
}
