//! Incremental transcript importer.
//!
//! Reads each JSONL transcript from its byte watermark to the last complete
//! line, groups turns into cognitive commits and writes every commit chunk in
//! one store transaction. The watermark only moves after all chunks of a read
//! have been written, so a crash re-reads the same tail and the id-keyed
//! upserts make the replay harmless.

pub mod flags;
pub mod parser;

use crate::error::Result;
use crate::models::{ClosedBy, CognitiveCommit, ToolCall, Turn};
use crate::store::{Store, UpsertOutcome};
use chrono::{DateTime, Utc};
use parser::{MessageRecord, Record, ToolResult};
use serde::Serialize;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use uuid::Uuid;
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, Default)]
pub struct ImportOptions {
    /// Re-read files from the start, ignoring stored watermarks
    pub force: bool,
}

/// Import counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResult {
    /// Turns written for the first time
    pub imported: usize,
    /// Turns that were already stored
    pub skipped: usize,
    pub commits_closed: usize,
    pub parse_errors: usize,
    pub files_processed: usize,
}

impl ImportResult {
    fn merge(&mut self, other: &ImportResult) {
        self.imported += other.imported;
        self.skipped += other.skipped;
        self.commits_closed += other.commits_closed;
        self.parse_errors += other.parse_errors;
        self.files_processed += other.files_processed;
    }
}

pub struct Importer<'a> {
    store: &'a Store,
    transcripts_dir: PathBuf,
}

impl<'a> Importer<'a> {
    pub fn new(store: &'a Store, transcripts_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            transcripts_dir: transcripts_dir.into(),
        }
    }

    /// Import every `*.jsonl` file under the transcripts directory
    pub fn import_all(&self, options: &ImportOptions) -> Result<ImportResult> {
        let mut total = ImportResult::default();
        if !self.transcripts_dir.exists() {
            log::warn!(
                "Transcripts directory {} does not exist",
                self.transcripts_dir.display()
            );
            return Ok(total);
        }

        let mut files: Vec<PathBuf> = WalkDir::new(&self.transcripts_dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| p.extension().map(|ext| ext == "jsonl").unwrap_or(false))
            .collect();
        files.sort();

        for path in files {
            let result = self.import_file(&path, options)?;
            total.merge(&result);
        }

        log::info!(
            "Import finished: {} imported, {} skipped, {} commits closed, {} parse errors",
            total.imported,
            total.skipped,
            total.commits_closed,
            total.parse_errors
        );
        Ok(total)
    }

    /// Import the unread tail of one transcript
    pub fn import_file(&self, path: &Path, options: &ImportOptions) -> Result<ImportResult> {
        let state = self.store.daemon_state();
        if options.force {
            state.reset_file_position(path)?;
        }

        let start = state.file_position(path)?;
        let len = std::fs::metadata(path)?.len();
        let mut result = ImportResult::default();

        if len < start {
            log::warn!(
                "{} is shorter than its watermark ({} < {}), skipping; use --force to re-read",
                path.display(),
                len,
                start
            );
            return Ok(result);
        }
        if len == start {
            return Ok(result);
        }

        let mut file = File::open(path)?;
        file.seek(SeekFrom::Start(start))?;
        let mut buf = Vec::with_capacity((len - start) as usize);
        file.take(len - start).read_to_end(&mut buf)?;

        let Some(last_newline) = buf.iter().rposition(|b| *b == b'\n') else {
            log::debug!("{}: no complete line past offset {}", path.display(), start);
            return Ok(result);
        };
        let complete = &buf[..=last_newline];
        let text = String::from_utf8_lossy(complete);

        log::debug!(
            "Importing {} from offset {} ({} bytes)",
            path.display(),
            start,
            complete.len()
        );
        result.files_processed = 1;

        let mut run = ImportRun::new(self.store, fallback_project(path))?;
        for (index, line) in text.lines().enumerate() {
            match parser::parse_line(line, index + 1) {
                Ok(record) => run.handle(record, &mut result)?,
                Err(e) => {
                    result.parse_errors += 1;
                    log::warn!("{} (after offset {}): {}", path.display(), start, e);
                }
            }
        }
        run.flush(&mut result)?;

        let position = start + complete.len() as u64;
        self.store.transaction(|repos| {
            repos.daemon_state.set_file_position(path, position)?;
            repos.daemon_state.set_last_activity(Utc::now())
        })?;

        Ok(result)
    }
}

/// Project name used when a record carries no working directory
fn fallback_project(path: &Path) -> String {
    path.parent()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unknown".to_string())
}

fn project_from_cwd(cwd: &str) -> Option<String> {
    Path::new(cwd)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
}

/// Commit id derived from the first turn, stable across re-imports
fn commit_id_for(first_turn: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, format!("commit:{}", first_turn).as_bytes()).to_string()
}

/// Session id derived from the commit and the transcript's own session id
fn session_id_for(commit_id: &str, transcript_session: &str) -> String {
    Uuid::new_v5(
        &Uuid::NAMESPACE_OID,
        format!("session:{}:{}", commit_id, transcript_session).as_bytes(),
    )
    .to_string()
}

/// Turns collected for one commit, not yet written
struct PendingCommit {
    commit_id: String,
    project_name: String,
    created_at: DateTime<Utc>,
    turns: Vec<Turn>,
    close: Option<(ClosedBy, DateTime<Utc>)>,
    git_hash: Option<String>,
    /// Tool call whose output may carry the new git hash
    awaiting_result: Option<String>,
}

impl PendingCommit {
    fn new(commit_id: String, project_name: String, created_at: DateTime<Utc>) -> Self {
        Self {
            commit_id,
            project_name,
            created_at,
            turns: Vec::new(),
            close: None,
            git_hash: None,
            awaiting_result: None,
        }
    }

    fn resume(commit: &CognitiveCommit) -> Self {
        Self::new(commit.id.clone(), commit.project_name.clone(), commit.created_at)
    }

    fn attach_results(&mut self, results: &[ToolResult]) {
        for result in results {
            let call: Option<&mut ToolCall> = self
                .turns
                .iter_mut()
                .rev()
                .filter_map(|t| t.tool_calls.as_mut())
                .flat_map(|calls| calls.iter_mut())
                .find(|c| c.id == result.tool_use_id);
            if let Some(call) = call {
                call.result = Some(result.content.clone());
                call.is_error = result.is_error;
            }
        }
    }
}

/// Commit-boundary state machine over the records of one read
struct ImportRun<'s> {
    store: &'s Store,
    fallback_project: String,
    current: Option<PendingCommit>,
}

impl<'s> ImportRun<'s> {
    fn new(store: &'s Store, fallback_project: String) -> Result<Self> {
        let mut current = None;
        if let Some(id) = store.daemon_state().current_commit_id()? {
            match store.commits().get(&id)? {
                Some(commit) if !commit.is_closed() => current = Some(PendingCommit::resume(&commit)),
                _ => log::debug!("Stale current commit pointer {}", id),
            }
        }
        Ok(Self {
            store,
            fallback_project,
            current,
        })
    }

    fn handle(&mut self, record: Record, result: &mut ImportResult) -> Result<()> {
        match record {
            Record::Message(message) => self.handle_message(message, result),
            Record::ToolResults(results) => {
                let Some(pending) = self.current.as_mut() else {
                    return Ok(());
                };
                pending.attach_results(&results);
                let commit_output = pending.awaiting_result.as_deref().and_then(|awaited| {
                    results
                        .iter()
                        .find(|r| r.tool_use_id == awaited)
                        .map(|r| parser::commit_hash_from_output(&r.content))
                });
                if let Some(hash) = commit_output {
                    pending.git_hash = hash;
                    pending.awaiting_result = None;
                    self.flush(result)?;
                }
                Ok(())
            }
            Record::SessionEnd { timestamp } => {
                if let Some(pending) = self.current.as_mut() {
                    if pending.close.is_none() {
                        let at = timestamp
                            .or_else(|| pending.turns.last().map(|t| t.timestamp))
                            .unwrap_or_else(Utc::now);
                        pending.close = Some((ClosedBy::SessionEnd, at));
                    }
                    self.flush(result)?;
                }
                Ok(())
            }
            Record::Ignored => Ok(()),
        }
    }

    fn handle_message(&mut self, message: MessageRecord, result: &mut ImportResult) -> Result<()> {
        // A git commit waiting for its output closes before anything else lands
        if self
            .current
            .as_ref()
            .map(|p| p.close.is_some())
            .unwrap_or(false)
        {
            self.flush(result)?;
        }

        let project = message
            .cwd
            .as_deref()
            .and_then(project_from_cwd)
            .unwrap_or_else(|| self.fallback_project.clone());

        // A turn seen before always returns to the commit that owns it
        if let Some(owner) = self.store.turns().commit_id_for(&message.uuid)? {
            let switching = self
                .current
                .as_ref()
                .map(|p| p.commit_id != owner)
                .unwrap_or(true);
            if switching {
                self.flush(result)?;
                if let Some(commit) = self.store.commits().get(&owner)? {
                    self.current = Some(PendingCommit::resume(&commit));
                }
            }
        } else if self
            .current
            .as_ref()
            .map(|p| p.project_name != project)
            .unwrap_or(false)
        {
            // The open commit belongs to another project and stays open
            self.flush(result)?;
            self.current = None;
        }

        // Pick up the project's own open commit, left behind by another transcript
        if self.current.is_none() {
            if let Some(commit) = self.store.commits().open_for_project(&project)? {
                self.current = Some(PendingCommit::resume(&commit));
            }
        }

        let pending = self.current.get_or_insert_with(|| {
            PendingCommit::new(commit_id_for(&message.uuid), project, message.timestamp)
        });

        let git_call = message.git_commit_call().map(|c| c.id.clone());
        let mut turn = Turn::new(
            message.uuid,
            session_id_for(&pending.commit_id, &message.session_id),
            message.role,
            message.text,
            message.timestamp,
        );
        turn.model = message.model;
        if !message.tool_calls.is_empty() {
            turn.tool_calls = Some(message.tool_calls);
            turn.derive_flags();
        }
        pending.turns.push(turn);

        if let Some(call_id) = git_call {
            pending.close = Some((ClosedBy::GitCommit, message.timestamp));
            pending.awaiting_result = Some(call_id);
        }
        Ok(())
    }

    /// Write the pending commit chunk in one transaction
    fn flush(&mut self, result: &mut ImportResult) -> Result<()> {
        let Some(pending) = self.current.take() else {
            return Ok(());
        };
        let now = Utc::now();

        let (inserted, replaced, closed, still_open) = self.store.transaction(|repos| {
            let existing = repos.commits.get(&pending.commit_id)?;
            if existing.is_none() {
                let mut commit = CognitiveCommit::new(
                    pending.commit_id.clone(),
                    pending.project_name.clone(),
                    pending.created_at,
                );
                commit.local_updated_at = now;
                repos.commits.upsert(&commit)?;
            }

            let (mut inserted, mut replaced) = (0, 0);
            for turn in &pending.turns {
                repos.sessions.extend_window(
                    &turn.session_id,
                    &pending.commit_id,
                    turn.timestamp,
                    turn.timestamp,
                )?;
                match repos.turns.upsert(turn)? {
                    UpsertOutcome::Inserted => inserted += 1,
                    UpsertOutcome::Replaced => replaced += 1,
                }
            }
            repos.commits.refresh_prompt_count(&pending.commit_id)?;
            if existing.is_some() && inserted > 0 {
                repos.commits.touch(&pending.commit_id, now)?;
            }

            let closed = match pending.close {
                Some((by, at)) => {
                    repos
                        .commits
                        .close(&pending.commit_id, at, by, pending.git_hash.as_deref())?
                }
                None => false,
            };
            let was_closed = existing.map(|c| c.is_closed()).unwrap_or(false);
            let still_open = pending.close.is_none() && !was_closed;
            repos
                .daemon_state
                .set_current_commit_id(still_open.then_some(pending.commit_id.as_str()))?;
            Ok((inserted, replaced, closed, still_open))
        })?;

        result.imported += inserted;
        result.skipped += replaced;
        if closed {
            result.commits_closed += 1;
            log::info!(
                "Closed commit {} ({}, {} new turns)",
                pending.commit_id,
                pending.project_name,
                inserted
            );
        } else if still_open {
            // Keep collecting into the same commit
            self.current = Some(PendingCommit::new(
                pending.commit_id,
                pending.project_name,
                pending.created_at,
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SyncStatus;
    use std::io::Write;

    fn user(uuid: &str, ts: &str, text: &str) -> String {
        format!(
            r#"{{"type":"user","uuid":"{}","sessionId":"sess-1","timestamp":"{}","cwd":"/work/demo","message":{{"role":"user","content":"{}"}}}}"#,
            uuid, ts, text
        )
    }

    fn assistant(uuid: &str, ts: &str, text: &str) -> String {
        format!(
            r#"{{"type":"assistant","uuid":"{}","sessionId":"sess-1","timestamp":"{}","cwd":"/work/demo","message":{{"role":"assistant","model":"claude","content":[{{"type":"text","text":"{}"}}]}}}}"#,
            uuid, ts, text
        )
    }

    fn git_commit(uuid: &str, ts: &str, tool_id: &str) -> String {
        format!(
            r#"{{"type":"assistant","uuid":"{}","sessionId":"sess-1","timestamp":"{}","cwd":"/work/demo","message":{{"role":"assistant","content":[{{"type":"tool_use","id":"{}","name":"Bash","input":{{"command":"git commit -m wip"}}}}]}}}}"#,
            uuid, ts, tool_id
        )
    }

    fn tool_output(ts: &str, tool_id: &str, output: &str) -> String {
        format!(
            r#"{{"type":"user","uuid":"r-{}","sessionId":"sess-1","timestamp":"{}","message":{{"role":"user","content":[{{"type":"tool_result","tool_use_id":"{}","content":"{}"}}]}}}}"#,
            tool_id, ts, tool_id, output
        )
    }

    fn write_lines(path: &Path, lines: &[String]) {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
    }

    #[test]
    fn test_git_commit_closes_with_hash() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.jsonl");
        write_lines(
            &path,
            &[
                user("u1", "2026-03-01T10:00:00Z", "add a button"),
                assistant("a1", "2026-03-01T10:00:05Z", "done"),
                git_commit("a2", "2026-03-01T10:00:10Z", "toolu_1"),
                tool_output("2026-03-01T10:00:11Z", "toolu_1", "[main 1a2b3c4] wip"),
            ],
        );

        let store = Store::open_in_memory().unwrap();
        let result = Importer::new(&store, dir.path())
            .import_file(&path, &ImportOptions::default())
            .unwrap();
        assert_eq!(result.imported, 3);
        assert_eq!(result.commits_closed, 1);

        let commits = store.commits().recent(10).unwrap();
        assert_eq!(commits.len(), 1);
        let commit = &commits[0];
        assert_eq!(commit.project_name, "demo");
        assert_eq!(commit.closed_by, Some(ClosedBy::GitCommit));
        assert_eq!(commit.git_hash.as_deref(), Some("1a2b3c4"));
        assert_eq!(commit.prompt_count, 1);
        assert!(store.daemon_state().current_commit_id().unwrap().is_none());

        let bundle = store.commits().load_bundle(&commit.id).unwrap().unwrap();
        let git_turn = &bundle.sessions[0].turns[2];
        let calls = git_turn.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].result.as_deref(), Some("[main 1a2b3c4] wip"));
    }

    #[test]
    fn test_open_commit_resumes_on_next_run() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.jsonl");
        write_lines(&path, &[user("u1", "2026-03-01T10:00:00Z", "start")]);

        let store = Store::open_in_memory().unwrap();
        let importer = Importer::new(&store, dir.path());
        importer.import_file(&path, &ImportOptions::default()).unwrap();
        let open_id = store.daemon_state().current_commit_id().unwrap().unwrap();
        assert!(!store.commits().get(&open_id).unwrap().unwrap().is_closed());

        write_lines(
            &path,
            &[
                assistant("a1", "2026-03-01T10:01:00Z", "ok"),
                r#"{"type":"session_end","timestamp":"2026-03-01T10:02:00Z"}"#.to_string(),
            ],
        );
        let second = importer.import_file(&path, &ImportOptions::default()).unwrap();
        assert_eq!(second.imported, 1);
        assert_eq!(second.commits_closed, 1);

        assert_eq!(store.commits().count().unwrap(), 1);
        let commit = store.commits().get(&open_id).unwrap().unwrap();
        assert_eq!(commit.closed_by, Some(ClosedBy::SessionEnd));
    }

    #[test]
    fn test_partial_trailing_line_waits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.jsonl");
        let full = user("u1", "2026-03-01T10:00:00Z", "hello");
        let partial = user("u2", "2026-03-01T10:00:01Z", "world");
        std::fs::write(&path, format!("{}\n{}", full, &partial[..20])).unwrap();

        let store = Store::open_in_memory().unwrap();
        let importer = Importer::new(&store, dir.path());
        let first = importer.import_file(&path, &ImportOptions::default()).unwrap();
        assert_eq!(first.imported, 1);
        assert_eq!(first.parse_errors, 0);
        assert_eq!(
            store.daemon_state().file_position(&path).unwrap(),
            full.len() as u64 + 1
        );

        std::fs::write(&path, format!("{}\n{}\n", full, partial)).unwrap();
        let second = importer.import_file(&path, &ImportOptions::default()).unwrap();
        assert_eq!(second.imported, 1);
    }

    #[test]
    fn test_truncated_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.jsonl");
        write_lines(
            &path,
            &[
                user("u1", "2026-03-01T10:00:00Z", "hello"),
                user("u2", "2026-03-01T10:00:01Z", "again"),
            ],
        );
        let store = Store::open_in_memory().unwrap();
        let importer = Importer::new(&store, dir.path());
        importer.import_file(&path, &ImportOptions::default()).unwrap();
        let watermark = store.daemon_state().file_position(&path).unwrap();

        std::fs::write(&path, "").unwrap();
        let result = importer.import_file(&path, &ImportOptions::default()).unwrap();
        assert_eq!(result, ImportResult::default());
        assert_eq!(store.daemon_state().file_position(&path).unwrap(), watermark);
    }

    #[test]
    fn test_bad_lines_are_counted_and_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.jsonl");
        write_lines(
            &path,
            &[
                user("u1", "2026-03-01T10:00:00Z", "hello"),
                "{broken".to_string(),
                assistant("a1", "2026-03-01T10:00:02Z", "hi"),
            ],
        );
        let store = Store::open_in_memory().unwrap();
        let result = Importer::new(&store, dir.path())
            .import_file(&path, &ImportOptions::default())
            .unwrap();
        assert_eq!(result.parse_errors, 1);
        assert_eq!(result.imported, 2);
        assert!(store.daemon_state().last_activity().unwrap().is_some());
    }

    #[test]
    fn test_new_turns_on_synced_commit_make_it_pending() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.jsonl");
        write_lines(&path, &[user("u1", "2026-03-01T10:00:00Z", "start")]);
        let store = Store::open_in_memory().unwrap();
        let importer = Importer::new(&store, dir.path());
        importer.import_file(&path, &ImportOptions::default()).unwrap();

        let id = store.daemon_state().current_commit_id().unwrap().unwrap();
        let commit = store.commits().get(&id).unwrap().unwrap();
        store
            .commits()
            .mark_synced(&id, Utc::now(), commit.local_updated_at)
            .unwrap();

        write_lines(&path, &[assistant("a1", "2026-03-01T10:01:00Z", "more")]);
        importer.import_file(&path, &ImportOptions::default()).unwrap();
        let commit = store.commits().get(&id).unwrap().unwrap();
        assert_eq!(commit.sync_status, SyncStatus::Pending);
    }

    #[test]
    fn test_ids_are_deterministic() {
        assert_eq!(commit_id_for("u1"), commit_id_for("u1"));
        assert_ne!(session_id_for("c1", "s"), session_id_for("c2", "s"));
    }
}
