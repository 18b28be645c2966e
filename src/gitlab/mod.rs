//! Forge collaborator: GitLab issues, merge requests and their discussions.
//!
//! Reads go straight through the [`Forge`] trait. Every write is described
//! as a [`Mutation`] first, so a dry run can print the exact request that
//! would have been sent without sending it.

pub mod client;
pub mod memory;

pub use client::GitLabClient;
pub use memory::MemoryForge;

use crate::Result;
use crate::models::{
    DiffPosition, Discussion, Label, Milestone, Noteable, RemoteResource, User,
};
use serde_json::{Map, Value, json};

/// Where static reference data comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    Project,
    Group(String),
}

/// A write request against the forge.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// Start a discussion, optionally anchored to a diff position
    CreateThread {
        target: Noteable,
        body: String,
        position: Option<DiffPosition>,
    },
    /// Review comment on a line of a specific commit
    CreateDiffComment {
        target: Noteable,
        commit: String,
        body: String,
        position: DiffPosition,
    },
    CreateComment {
        target: Noteable,
        discussion_id: String,
        body: String,
    },
    UpdateComment {
        target: Noteable,
        discussion_id: String,
        note_id: u64,
        body: String,
    },
    SetResolved {
        target: Noteable,
        discussion_id: String,
        resolved: bool,
    },
    UpdateResource {
        target: Noteable,
        payload: Map<String, Value>,
    },
    DeleteComment {
        target: Noteable,
        discussion_id: String,
        note_id: u64,
    },
    MergeResource {
        target: Noteable,
    },
}

impl Mutation {
    pub fn method(&self) -> &'static str {
        match self {
            Self::CreateThread { .. } | Self::CreateDiffComment { .. } | Self::CreateComment { .. } => "POST",
            Self::UpdateComment { .. }
            | Self::SetResolved { .. }
            | Self::UpdateResource { .. }
            | Self::MergeResource { .. } => "PUT",
            Self::DeleteComment { .. } => "DELETE",
        }
    }

    /// Path below the project API.
    pub fn path(&self) -> String {
        match self {
            Self::CreateThread { target, .. } | Self::CreateDiffComment { target, .. } => {
                format!("{}/discussions", target.api_path())
            }
            Self::CreateComment {
                target,
                discussion_id,
                ..
            } => format!("{}/discussions/{}/notes", target.api_path(), discussion_id),
            Self::UpdateComment {
                target,
                discussion_id,
                note_id,
                ..
            }
            | Self::DeleteComment {
                target,
                discussion_id,
                note_id,
            } => format!(
                "{}/discussions/{}/notes/{}",
                target.api_path(),
                discussion_id,
                note_id
            ),
            Self::SetResolved {
                target,
                discussion_id,
                ..
            } => format!("{}/discussions/{}", target.api_path(), discussion_id),
            Self::UpdateResource { target, .. } => target.api_path(),
            Self::MergeResource { target } => format!("{}/merge", target.api_path()),
        }
    }

    /// JSON request body; `Null` for requests sent without one.
    pub fn body(&self) -> Value {
        match self {
            Self::CreateThread { body, position, .. } => match position {
                Some(position) => json!({ "body": body, "position": position }),
                None => json!({ "body": body }),
            },
            Self::CreateDiffComment {
                commit,
                body,
                position,
                ..
            } => json!({ "commit_id": commit, "body": body, "position": position }),
            Self::CreateComment { body, .. } | Self::UpdateComment { body, .. } => {
                json!({ "body": body })
            }
            Self::SetResolved { resolved, .. } => json!({ "resolved": resolved }),
            Self::UpdateResource { payload, .. } => Value::Object(payload.clone()),
            Self::MergeResource { .. } => json!({}),
            Self::DeleteComment { .. } => Value::Null,
        }
    }

    /// Human description used in error messages.
    pub fn describe(&self) -> String {
        match self {
            Self::CreateThread { target, .. } => format!("create thread on {}", target.api_path()),
            Self::CreateDiffComment { target, position, .. } => format!(
                "review comment on {} {}",
                target.api_path(),
                position.new_path
            ),
            Self::CreateComment { discussion_id, .. } => format!("reply to thread {}", discussion_id),
            Self::UpdateComment { note_id, .. } => format!("edit note {}", note_id),
            Self::SetResolved {
                discussion_id,
                resolved,
                ..
            } => format!(
                "{} thread {}",
                if *resolved { "resolve" } else { "unresolve" },
                discussion_id
            ),
            Self::UpdateResource { target, .. } => format!("update {}", target.api_path()),
            Self::DeleteComment { note_id, .. } => format!("delete note {}", note_id),
            Self::MergeResource { target } => format!("merge {}", target.api_path()),
        }
    }
}

/// What the forge assigned when a mutation was applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    Thread { discussion_id: String, note_id: u64 },
    Note { note_id: u64 },
    Done,
}

/// Quote a string for a POSIX shell.
fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// The `curl` command equivalent to sending `mutation` to `url`.
pub fn curl_trace(url: &str, mutation: &Mutation) -> String {
    let body = mutation.body();
    if body.is_null() {
        return format!(
            "curl -H 'PRIVATE-TOKEN: '\"$GITLAB_TOKEN\" -X{} {}",
            mutation.method(),
            shell_quote(url)
        );
    }
    let data = serde_json::to_string(&body).unwrap_or_default();
    format!(
        "curl -H 'PRIVATE-TOKEN: '\"$GITLAB_TOKEN\" -H 'Content-Type: application/json' -X{} {} --data {}",
        mutation.method(),
        shell_quote(url),
        shell_quote(&data)
    )
}

/// Access to a GitLab project.
pub trait Forge {
    fn get_issue(&self, iid: u64) -> Result<RemoteResource>;

    fn get_merge_request(&self, iid: u64) -> Result<RemoteResource>;

    /// The merge request whose source branch is `branch`, open ones preferred.
    fn find_merge_request(&self, branch: &str) -> Result<RemoteResource>;

    fn list_threads(&self, target: Noteable) -> Result<Vec<Discussion>>;

    fn list_users(&self, scope: &Scope) -> Result<Vec<User>>;

    /// Active milestones.
    fn list_milestones(&self, scope: &Scope) -> Result<Vec<Milestone>>;

    fn list_labels(&self, scope: &Scope) -> Result<Vec<Label>>;

    /// Full URL a mutation would be sent to.
    fn mutation_url(&self, mutation: &Mutation) -> String;

    /// Send a mutation.
    fn apply(&self, mutation: &Mutation) -> Result<Applied>;

    /// Print-ready `curl` command for a mutation.
    fn trace(&self, mutation: &Mutation) -> String {
        curl_trace(&self.mutation_url(mutation), mutation)
    }
}
