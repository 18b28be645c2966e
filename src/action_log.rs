//! Action logging for `gl` commands.
//!
//! Every invocation appends one JSON line to `gl/action.log` in the worktree,
//! so a failed submit can be traced back to the exact arguments it ran with.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// File name of the log inside the workspace directory.
pub const ACTION_LOG_FILE: &str = "action.log";

/// Represents a single action log entry.
#[derive(Debug, Serialize, Deserialize)]
pub struct ActionLog {
    /// ISO 8601 timestamp when the action occurred
    pub timestamp: DateTime<Utc>,

    /// Command name (e.g., "fetch", "submit", "discuss")
    pub command: String,

    /// Command arguments as JSON
    pub args: serde_json::Value,

    pub dry_run: bool,

    /// Whether the command succeeded
    pub success: bool,

    /// Error message if the command failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Command execution duration in milliseconds
    pub duration_ms: u64,

    /// GitLab user the command ran as, or the login name
    pub user: String,
}

/// Path of the log for a worktree.
pub fn log_path(worktree: &Path) -> PathBuf {
    worktree.join(crate::storage::WORKSPACE_DIR).join(ACTION_LOG_FILE)
}

/// Append an entry to the log.
///
/// Never fails the command: problems are reported as warnings only.
pub fn log_action(path: &Path, mut entry: ActionLog) {
    entry.args = sanitize_args(&entry.args);
    if let Err(e) = write_log_entry(path, &entry) {
        tracing::warn!(path = %path.display(), error = %e, "failed to write action log");
    }
}

/// Write a log entry to the log file.
fn write_log_entry(path: &Path, entry: &ActionLog) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string(entry)?;
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{}", json)?;
    Ok(())
}

/// Sanitize arguments to remove sensitive data.
fn sanitize_args(args: &serde_json::Value) -> serde_json::Value {
    match args {
        serde_json::Value::Object(map) => {
            let mut sanitized = serde_json::Map::new();
            for (key, value) in map {
                let key_lower = key.to_lowercase();
                if key_lower.contains("password")
                    || key_lower.contains("token")
                    || key_lower.contains("secret")
                {
                    sanitized.insert(
                        key.clone(),
                        serde_json::Value::String("[REDACTED]".to_string()),
                    );
                } else {
                    sanitized.insert(key.clone(), sanitize_args(value));
                }
            }
            serde_json::Value::Object(sanitized)
        }
        serde_json::Value::Array(arr) => {
            if arr.len() > 10 {
                serde_json::Value::String(format!("[Array with {} items]", arr.len()))
            } else {
                serde_json::Value::Array(arr.iter().map(sanitize_args).collect())
            }
        }
        serde_json::Value::String(s) => {
            let chars = s.chars().count();
            if chars > 200 {
                let head: String = s.chars().take(197).collect();
                serde_json::Value::String(format!("{}... ({} chars)", head, chars))
            } else {
                args.clone()
            }
        }
        _ => args.clone(),
    }
}

/// Login name of the current user.
pub fn current_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sanitize_sensitive_keys() {
        let value = serde_json::json!({
            "targets": ["topic"],
            "gitlab_token": "glpat-123",
            "client_secret": "x",
        });
        let sanitized = sanitize_args(&value);

        assert_eq!(sanitized["targets"], serde_json::json!(["topic"]));
        assert_eq!(sanitized["gitlab_token"], "[REDACTED]");
        assert_eq!(sanitized["client_secret"], "[REDACTED]");
    }

    #[test]
    fn test_sanitize_keeps_urls() {
        let value = serde_json::json!("https://gitlab.example.com/g/p/-/merge_requests/4");
        assert_eq!(sanitize_args(&value), value);
    }

    #[test]
    fn test_sanitize_long_string() {
        let value = serde_json::json!("a".repeat(250));
        let serde_json::Value::String(s) = sanitize_args(&value) else {
            panic!("Expected string value");
        };
        assert!(s.ends_with("... (250 chars)"));
    }

    #[test]
    fn test_sanitize_large_array() {
        let arr: Vec<i32> = (0..15).collect();
        let sanitized = sanitize_args(&serde_json::json!(arr));
        assert_eq!(sanitized, serde_json::json!("[Array with 15 items]"));
    }

    #[test]
    fn test_log_action_appends_lines() {
        let dir = TempDir::new().unwrap();
        let path = log_path(dir.path());
        for success in [true, false] {
            log_action(
                &path,
                ActionLog {
                    timestamp: Utc::now(),
                    command: "fetch".to_string(),
                    args: serde_json::json!({ "targets": ["7"] }),
                    dry_run: false,
                    success,
                    error: (!success).then(|| "boom".to_string()),
                    duration_ms: 3,
                    user: "alice".to_string(),
                },
            );
        }

        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let second: ActionLog = serde_json::from_str(lines[1]).unwrap();
        assert!(!second.success);
        assert_eq!(second.error.as_deref(), Some("boom"));
        assert!(!lines[0].contains("\"error\""));
    }
}
