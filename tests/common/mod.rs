//! Transcript builders shared by the integration tests.

#![allow(dead_code)]

use std::io::Write;
use std::path::Path;

pub fn user(uuid: &str, ts: &str, cwd: &str, text: &str) -> String {
    format!(
        r#"{{"type":"user","uuid":"{}","sessionId":"sess-1","timestamp":"{}","cwd":"{}","message":{{"role":"user","content":"{}"}}}}"#,
        uuid, ts, cwd, text
    )
}

pub fn assistant(uuid: &str, ts: &str, cwd: &str, text: &str) -> String {
    format!(
        r#"{{"type":"assistant","uuid":"{}","sessionId":"sess-1","timestamp":"{}","cwd":"{}","message":{{"role":"assistant","model":"claude-sonnet","content":[{{"type":"text","text":"{}"}}]}}}}"#,
        uuid, ts, cwd, text
    )
}

pub fn git_commit(uuid: &str, ts: &str, cwd: &str, tool_id: &str) -> String {
    format!(
        r#"{{"type":"assistant","uuid":"{}","sessionId":"sess-1","timestamp":"{}","cwd":"{}","message":{{"role":"assistant","content":[{{"type":"tool_use","id":"{}","name":"Bash","input":{{"command":"git commit -am checkpoint"}}}}]}}}}"#,
        uuid, ts, cwd, tool_id
    )
}

pub fn tool_output(ts: &str, tool_id: &str, output: &str) -> String {
    format!(
        r#"{{"type":"user","uuid":"out-{}","sessionId":"sess-1","timestamp":"{}","message":{{"role":"user","content":[{{"type":"tool_result","tool_use_id":"{}","content":"{}"}}]}}}}"#,
        tool_id, ts, tool_id, output
    )
}

pub fn session_end(ts: &str) -> String {
    format!(r#"{{"type":"session_end","timestamp":"{}"}}"#, ts)
}

pub fn append(path: &Path, lines: &[String]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .unwrap();
    for line in lines {
        writeln!(file, "{}", line).unwrap();
    }
}

/// One closed commit of a prompt and a reply per entry in `prompts`
pub fn closed_commits(cwd: &str, prompts: &[&str]) -> Vec<String> {
    let mut lines = Vec::new();
    for (i, prompt) in prompts.iter().enumerate() {
        let minute = i * 10;
        lines.push(user(
            &format!("u{}", i),
            &format!("2026-03-01T10:{:02}:00Z", minute),
            cwd,
            prompt,
        ));
        lines.push(assistant(
            &format!("a{}", i),
            &format!("2026-03-01T10:{:02}:30Z", minute),
            cwd,
            "Done.",
        ));
        lines.push(session_end(&format!("2026-03-01T10:{:02}:45Z", minute)));
    }
    lines
}
