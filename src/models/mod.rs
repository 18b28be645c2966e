//! Data models shared between the forge client and the sync engine.
//!
//! This module defines:
//! - `ResourceRef` - which issue or merge request a command works on
//! - `RemoteResource` - issue/merge request attributes as returned by GitLab
//! - `Discussion` / `Note` / `Position` - threads as returned by GitLab
//! - `Author` - a note author that is either a handle or a raw id
//! - `User` / `Milestone` / `Label` - static reference data

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path};

/// Kind of forge resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Issue,
    MergeRequest,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Issue => write!(f, "issue"),
            Self::MergeRequest => write!(f, "merge request"),
        }
    }
}

/// Identifies an issue (by iid) or a merge request (by source branch).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceRef {
    Issue(u64),
    MergeRequest(String),
}

impl ResourceRef {
    /// A merge request by branch name. The name becomes a directory under
    /// the workspace, so it must be relative and free of `.`/`..` parts.
    pub fn merge_request(branch: &str) -> Result<Self> {
        let relative = !branch.is_empty()
            && Path::new(branch)
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !relative {
            return Err(Error::InvalidInput(format!("invalid branch name: {}", branch)));
        }
        Ok(Self::MergeRequest(branch.to_string()))
    }

    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Issue(_) => ResourceKind::Issue,
            Self::MergeRequest(_) => ResourceKind::MergeRequest,
        }
    }

    /// Directory of this resource relative to the workspace root.
    ///
    /// Issues live under `i/<iid>`, merge requests under their branch name.
    pub fn relative_dir(&self) -> String {
        match self {
            Self::Issue(iid) => format!("i/{}", iid),
            Self::MergeRequest(branch) => branch.clone(),
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Issue(iid) => write!(f, "#{}", iid),
            Self::MergeRequest(branch) => write!(f, "{}", branch),
        }
    }
}

/// A GitLab user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: u64,
    pub username: String,
    #[serde(default)]
    pub name: String,
}

/// A GitLab milestone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Milestone {
    pub id: u64,
    pub title: String,
}

/// A GitLab label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    #[serde(default)]
    pub id: u64,
    pub name: String,
}

/// Issue or merge request attributes (only fields we care about).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteResource {
    pub iid: u64,
    pub title: String,
    pub description: Option<String>,
    pub state: String,
    pub web_url: String,
    /// Present for merge requests only
    #[serde(default)]
    pub source_branch: Option<String>,
    #[serde(default)]
    pub target_branch: Option<String>,
    #[serde(default)]
    pub assignees: Vec<User>,
    #[serde(default)]
    pub reviewers: Vec<User>,
    #[serde(default)]
    pub milestone: Option<Milestone>,
    #[serde(default)]
    pub labels: Vec<String>,
    /// Commits the latest merge request diff is based on
    #[serde(default)]
    pub diff_refs: Option<DiffRefs>,
}

/// Base/start/head commits of a merge request diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffRefs {
    pub base_sha: String,
    pub start_sha: String,
    pub head_sha: String,
}

impl RemoteResource {
    pub fn kind(&self) -> ResourceKind {
        if self.source_branch.is_some() {
            ResourceKind::MergeRequest
        } else {
            ResourceKind::Issue
        }
    }

    pub fn is_open(&self) -> bool {
        self.state == "opened"
    }

    pub fn noteable(&self) -> Noteable {
        match self.kind() {
            ResourceKind::Issue => Noteable::Issue(self.iid),
            ResourceKind::MergeRequest => Noteable::MergeRequest(self.iid),
        }
    }

    pub fn resource_ref(&self) -> ResourceRef {
        match &self.source_branch {
            Some(branch) => ResourceRef::MergeRequest(branch.clone()),
            None => ResourceRef::Issue(self.iid),
        }
    }
}

/// Something discussions can be attached to, addressed by iid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Noteable {
    Issue(u64),
    MergeRequest(u64),
}

impl Noteable {
    /// Path below the project API (`issues/3`, `merge_requests/7`).
    pub fn api_path(&self) -> String {
        match self {
            Self::Issue(iid) => format!("issues/{}", iid),
            Self::MergeRequest(iid) => format!("merge_requests/{}", iid),
        }
    }
}

/// Author reference embedded in a note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteAuthor {
    pub id: u64,
    #[serde(default)]
    pub username: Option<String>,
}

/// Who wrote a note: a resolved handle, or a raw id still to be resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Author {
    ByName(String),
    ById(String),
}

impl From<&NoteAuthor> for Author {
    fn from(author: &NoteAuthor) -> Self {
        match &author.username {
            Some(username) if !username.is_empty() => Author::ByName(username.clone()),
            _ => Author::ById(author.id.to_string()),
        }
    }
}

/// Diff position of a note anchored to a merge request diff.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    #[serde(default)]
    pub base_sha: Option<String>,
    #[serde(default)]
    pub start_sha: Option<String>,
    #[serde(default)]
    pub head_sha: Option<String>,
    #[serde(default)]
    pub old_path: Option<String>,
    #[serde(default)]
    pub new_path: Option<String>,
    #[serde(default)]
    pub old_line: Option<u64>,
    #[serde(default)]
    pub new_line: Option<u64>,
}

impl Position {
    /// Path shown in a thread header (new side preferred).
    pub fn path(&self) -> Option<&str> {
        self.new_path.as_deref().or(self.old_path.as_deref())
    }

    /// Line shown in a thread header (new side preferred).
    pub fn line(&self) -> Option<u64> {
        self.new_line.or(self.old_line)
    }
}

/// A single note (comment) inside a discussion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub id: u64,
    pub body: String,
    pub author: NoteAuthor,
    #[serde(default)]
    pub system: bool,
    #[serde(default)]
    pub resolvable: bool,
    #[serde(default)]
    pub resolved: Option<bool>,
    #[serde(default)]
    pub position: Option<Position>,
}

/// A discussion thread as returned by the forge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discussion {
    pub id: String,
    pub notes: Vec<Note>,
}

/// Where a discussion belongs in a merge request's file split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscussionState {
    /// Not resolvable (general comments, system notes)
    Unresolvable,
    Unresolved,
    Resolved,
}

impl Discussion {
    /// Resolution state, taken from the first note like GitLab does.
    pub fn state(&self) -> DiscussionState {
        match self.notes.first() {
            Some(n) if n.resolvable => {
                if n.resolved.unwrap_or(false) {
                    DiscussionState::Resolved
                } else {
                    DiscussionState::Unresolved
                }
            }
            _ => DiscussionState::Unresolvable,
        }
    }

    pub fn position(&self) -> Option<&Position> {
        self.notes.first().and_then(|n| n.position.as_ref())
    }
}

/// Position payload for a new diff comment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffPosition {
    pub base_sha: String,
    pub start_sha: String,
    pub head_sha: String,
    pub old_path: String,
    pub new_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_line: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_line: Option<u64>,
    pub position_type: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discussion_deserialize() {
        let json = r#"{
            "id": "6a9c1750b37d513a43987b574953fceb50b03ce7",
            "notes": [{
                "id": 1126,
                "body": "This line is too long",
                "author": {"id": 1, "username": "root", "name": "Administrator"},
                "system": false,
                "resolvable": true,
                "resolved": false,
                "position": {
                    "base_sha": "aaaa", "start_sha": "aaaa", "head_sha": "bbbb",
                    "old_path": "src/lib.rs", "new_path": "src/lib.rs",
                    "old_line": null, "new_line": 27, "position_type": "text"
                }
            }]
        }"#;

        let discussion: Discussion = serde_json::from_str(json).unwrap();
        assert_eq!(discussion.state(), DiscussionState::Unresolved);
        let pos = discussion.position().unwrap();
        assert_eq!(pos.path(), Some("src/lib.rs"));
        assert_eq!(pos.line(), Some(27));
        assert_eq!(
            Author::from(&discussion.notes[0].author),
            Author::ByName("root".to_string())
        );
    }

    #[test]
    fn test_individual_note_is_unresolvable() {
        let json = r#"{
            "id": "87805b7c09016a7058e91bdbe7b29d1f284a39e6",
            "notes": [{"id": 1, "body": "hi", "author": {"id": 7}}]
        }"#;

        let discussion: Discussion = serde_json::from_str(json).unwrap();
        assert_eq!(discussion.state(), DiscussionState::Unresolvable);
        assert_eq!(
            Author::from(&discussion.notes[0].author),
            Author::ById("7".to_string())
        );
    }

    #[test]
    fn test_resource_kind_from_branch() {
        let json = r#"{
            "iid": 4, "title": "Fix", "description": null, "state": "opened",
            "web_url": "https://gitlab.example.com/g/p/-/merge_requests/4",
            "source_branch": "fix", "target_branch": "main"
        }"#;
        let mr: RemoteResource = serde_json::from_str(json).unwrap();
        assert_eq!(mr.kind(), ResourceKind::MergeRequest);
        assert_eq!(mr.noteable().api_path(), "merge_requests/4");
        assert_eq!(mr.resource_ref(), ResourceRef::MergeRequest("fix".to_string()));
        assert!(mr.is_open());
        assert!(mr.labels.is_empty());
    }

    #[test]
    fn test_merge_request_branch_must_stay_relative() {
        assert_eq!(
            ResourceRef::merge_request("feature/x").unwrap(),
            ResourceRef::MergeRequest("feature/x".to_string())
        );
        assert!(ResourceRef::merge_request("v1.2..fix").is_ok());
        for bad in ["", "..", "../x", "feature/../../x", "/etc", "./x"] {
            let err = ResourceRef::merge_request(bad).unwrap_err();
            assert!(err.to_string().contains("invalid branch name"), "{}", bad);
        }
    }

    #[test]
    fn test_resource_ref_relative_dir() {
        assert_eq!(ResourceRef::Issue(12).relative_dir(), "i/12");
        assert_eq!(
            ResourceRef::MergeRequest("feature/x".to_string()).relative_dir(),
            "feature/x"
        );
    }
}
