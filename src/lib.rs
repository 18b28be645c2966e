//! gltext - GitLab discussions as plain, hand-editable text files.
//!
//! This library provides the core functionality for the `gl` CLI tool:
//! the thread file codec, the snapshot-based three-way merge that keeps
//! local edits alive across fetches, the change-set extractor that turns
//! edited text into API calls, and the diff-context builder for drafting
//! review comments.

pub mod action_log;
pub mod changes;
pub mod cli;
pub mod commands;
pub mod config;
pub mod diff_context;
pub mod editor;
pub mod format;
pub mod git;
pub mod gitlab;
pub mod identity;
pub mod merge;
pub mod models;
pub mod render;
pub mod storage;

use std::path::PathBuf;

/// Library-level error type for gltext operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A working file still carries merge-conflict markers.
    #[error("unresolved merge conflict in {} at line {line}", path.display())]
    Conflict { path: PathBuf, line: usize },

    #[error("Not found: {0}")]
    NotFound(String),

    /// The forge rejected a request.
    #[error("{operation} failed{}: {message}", status.map(|s| format!(" (HTTP {})", s)).unwrap_or_default())]
    Remote {
        operation: String,
        status: Option<u16>,
        message: String,
    },

    /// Writing a snapshot or working file failed.
    #[error("failed to persist {}: {source}", path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A header field changed on GitLab since the last fetch.
    #[error("{field} of {resource} changed on GitLab since the last fetch (now '{upstream}'); run `gl fetch {resource}` and redo the edit")]
    Outdated {
        resource: String,
        field: String,
        upstream: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("git: {0}")]
    Git(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a remote error for a named operation.
    pub fn remote(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Remote {
            operation: operation.into(),
            status: None,
            message: message.into(),
        }
    }

    /// Create a persistence error for the given path.
    pub fn persistence(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Persistence {
            path: path.into(),
            source,
        }
    }

    /// Check if this is a merge conflict error.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Result type alias for gltext operations.
pub type Result<T> = std::result::Result<T, Error>;
