//! Local usage summary, computed from the store without contacting the remote.

use super::{CommitsRepository, ProjectCount};
use crate::error::Result;
use crate::models::ToolCall;
use rusqlite::{params, Connection};
use serde::Serialize;
use std::collections::HashMap;

const TOP_TOOLS: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolUsage {
    pub name: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalAnalytics {
    pub commit_count: usize,
    pub project_count: usize,
    /// Sessions in the most recent commits
    pub session_count: usize,
    /// Turns in the most recent commits
    pub turn_count: usize,
    pub avg_turns_per_commit: f64,
    pub top_tools: Vec<ToolUsage>,
}

pub(super) fn compute(conn: &Connection, recent: usize) -> Result<LocalAnalytics> {
    let commits = CommitsRepository::new(conn);
    let commit_count = commits.count()?;
    let projects: Vec<ProjectCount> = commits.distinct_projects()?;

    let recent_ids = "SELECT id FROM commits ORDER BY created_at DESC LIMIT ?1";
    let sampled: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM ({})", recent_ids),
        params![recent as i64],
        |row| row.get(0),
    )?;
    let session_count: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM sessions WHERE commit_id IN ({})", recent_ids),
        params![recent as i64],
        |row| row.get(0),
    )?;

    let mut stmt = conn.prepare(&format!(
        "SELECT t.tool_calls FROM turns t JOIN sessions s ON t.session_id = s.id
         WHERE s.commit_id IN ({})",
        recent_ids
    ))?;
    let rows = stmt.query_map(params![recent as i64], |row| row.get::<_, Option<String>>(0))?;

    let mut turn_count = 0usize;
    let mut tools: HashMap<String, usize> = HashMap::new();
    for row in rows {
        turn_count += 1;
        let Some(json) = row? else { continue };
        if let Ok(calls) = serde_json::from_str::<Vec<ToolCall>>(&json) {
            for call in calls {
                *tools.entry(call.name).or_insert(0) += 1;
            }
        }
    }

    let mut top_tools: Vec<ToolUsage> = tools
        .into_iter()
        .map(|(name, count)| ToolUsage { name, count })
        .collect();
    top_tools.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
    top_tools.truncate(TOP_TOOLS);

    let avg_turns_per_commit = if sampled > 0 {
        turn_count as f64 / sampled as f64
    } else {
        0.0
    };

    Ok(LocalAnalytics {
        commit_count,
        project_count: projects.len(),
        session_count: session_count as usize,
        turn_count,
        avg_turns_per_commit,
        top_tools,
    })
}
