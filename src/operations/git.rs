// Git status/commit/diff/log through the git CLI

use crate::error::{ExecutionError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

const DEFAULT_LOG_COUNT: u64 = 10;
const FIELD_SEP: char = '\u{1f}';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GitOperation {
    Status,
    Commit,
    Diff,
    Log,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GitOptions {
    pub message: Option<String>,
    #[serde(default)]
    pub files: Vec<String>,
    pub max_count: Option<u64>,
    pub cwd: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StatusEntry {
    pub path: String,
    pub index: String,
    pub worktree: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct LogEntry {
    pub hash: String,
    pub author: String,
    pub date: String,
    pub message: String,
}

/// Runs one git operation in `repo`, returning its structured result
pub async fn git_operation(
    operation: GitOperation,
    options: &GitOptions,
    repo: &Path,
    timeout: Duration,
) -> Result<Value> {
    match operation {
        GitOperation::Status => {
            let out = run_git(repo, &["status", "--porcelain=v1", "--branch"], timeout).await?;
            let (branch, files) = parse_status(&out);
            Ok(json!({ "branch": branch, "files": files }))
        }
        GitOperation::Commit => {
            // Callers validate that a message is present.
            let message = options.message.as_deref().unwrap_or_default();
            run_git(repo, &["add", "."], timeout).await?;
            run_git(repo, &["commit", "-m", message], timeout).await?;
            let commit = run_git(repo, &["rev-parse", "HEAD"], timeout).await?;
            Ok(json!({ "commit": commit.trim(), "message": message }))
        }
        GitOperation::Diff => {
            let mut args = vec!["diff".to_string()];
            if !options.files.is_empty() {
                args.push("--".to_string());
                args.extend(options.files.iter().cloned());
            }
            let args: Vec<&str> = args.iter().map(String::as_str).collect();
            let diff = run_git(repo, &args, timeout).await?;
            Ok(json!({ "diff": diff }))
        }
        GitOperation::Log => {
            let count = format!("--max-count={}", log_count(options));
            let format = format!("--pretty=format:%H{0}%an{0}%aI{0}%s", FIELD_SEP);
            let out = run_git(repo, &["log", &count, &format], timeout).await?;
            Ok(json!(parse_log(&out)))
        }
    }
}

/// Zero or a missing count means the default
fn log_count(options: &GitOptions) -> u64 {
    match options.max_count {
        Some(n) if n > 0 => n,
        _ => DEFAULT_LOG_COUNT,
    }
}

async fn run_git(repo: &Path, args: &[&str], timeout: Duration) -> Result<String> {
    let child = Command::new("git")
        .args(args)
        .current_dir(repo)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| ExecutionError::Spawn(format!("git {}: {}", args.join(" "), e)))?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result.map_err(|e| ExecutionError::Spawn(e.to_string()))?,
        Err(_) => {
            return Err(ExecutionError::TimedOut {
                timeout_secs: timeout.as_secs(),
                stdout: String::new(),
                stderr: String::new(),
            }
            .into())
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    if !output.status.success() {
        return Err(ExecutionError::NonZeroExit {
            code: output.status.code().unwrap_or(-1),
            stdout: stdout.trim().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        }
        .into());
    }
    Ok(stdout)
}

fn parse_status(out: &str) -> (Option<String>, Vec<StatusEntry>) {
    let mut branch = None;
    let mut files = Vec::new();

    for line in out.lines() {
        if let Some(header) = line.strip_prefix("## ") {
            let name = header.split("...").next().unwrap_or(header);
            let name = name.strip_prefix("No commits yet on ").unwrap_or(name);
            branch = Some(name.trim().to_string());
            continue;
        }
        if line.len() < 4 {
            continue;
        }
        let (codes, path) = line.split_at(3);
        let mut codes = codes.chars();
        files.push(StatusEntry {
            index: codes.next().unwrap_or(' ').to_string(),
            worktree: codes.next().unwrap_or(' ').to_string(),
            path: path.to_string(),
        });
    }

    (branch, files)
}

fn parse_log(out: &str) -> Vec<LogEntry> {
    out.lines()
        .filter_map(|line| {
            let mut fields = line.splitn(4, FIELD_SEP);
            Some(LogEntry {
                hash: fields.next()?.to_string(),
                author: fields.next()?.to_string(),
                date: fields.next()?.to_string(),
                message: fields.next()?.to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_status() {
        let out = "## main...origin/main [ahead 1]\n M src/lib.rs\nA  new.rs\n?? scratch.txt\n";
        let (branch, files) = parse_status(out);
        assert_eq!(branch.as_deref(), Some("main"));
        assert_eq!(files.len(), 3);
        assert_eq!(
            files[0],
            StatusEntry {
                path: "src/lib.rs".into(),
                index: " ".into(),
                worktree: "M".into()
            }
        );
        assert_eq!(files[1].index, "A");
        assert_eq!(files[2].index, "?");
    }

    #[test]
    fn test_parse_status_fresh_repo() {
        let (branch, files) = parse_status("## No commits yet on trunk\n");
        assert_eq!(branch.as_deref(), Some("trunk"));
        assert!(files.is_empty());
    }

    #[test]
    fn test_parse_log() {
        let out = format!("abc{0}Ada{0}2024-01-01T00:00:00+00:00{0}first line", FIELD_SEP);
        let entries = parse_log(&out);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].hash, "abc");
        assert_eq!(entries[0].message, "first line");
    }

    #[test]
    fn test_zero_log_count_uses_default() {
        let mut options = GitOptions::default();
        assert_eq!(log_count(&options), DEFAULT_LOG_COUNT);
        options.max_count = Some(0);
        assert_eq!(log_count(&options), DEFAULT_LOG_COUNT);
        options.max_count = Some(3);
        assert_eq!(log_count(&options), 3);
    }

    #[test]
    fn test_options_reject_unknown_fields() {
        let parsed: std::result::Result<GitOptions, _> =
            serde_json::from_value(json!({"mesage": "typo"}));
        assert!(parsed.is_err());
    }

    #[tokio::test]
    async fn test_status_outside_repository_fails() {
        let dir = TempDir::new().unwrap();
        let res = git_operation(
            GitOperation::Status,
            &GitOptions::default(),
            dir.path(),
            Duration::from_secs(10),
        )
        .await;
        assert!(res.is_err());
    }
}
