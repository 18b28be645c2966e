//! Change-set extraction: the remote mutations implied by edited thread files.
//!
//! Working files are compared with their snapshots. Pending comments and new
//! threads become creations. Edited own notes, header fields and
//! `!!!delete` lines become edits, and `r`/`u` toggles (or threads moved
//! between `todo.gl` and `resolved.gl`) become resolve operations. A
//! `!!!merge` line merges the merge request once everything else is sent.

use crate::format::review::{DraftEntry, ReviewFile};
use crate::format::{Anchor, Header, Label, Resource, Thread, ThreadId};
use crate::identity::{self, CommentState};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Header fields that can be changed through the API.
pub const EDITABLE_FIELDS: &[&str] = &[
    "title",
    "description",
    "state_event",
    "target_branch",
    "reviewers",
    "assignees",
    "milestone",
    "labels",
];

/// One thread file of a resource together with its snapshot.
#[derive(Debug, Clone)]
pub struct ThreadFile {
    pub working: Resource,
    pub baseline: Resource,
    /// Resolved state of threads in this file unless toggled
    /// (`None` where resolving does not apply)
    pub implied_resolved: Option<bool>,
}

/// A single remote mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    CreateThread {
        /// Index of the thread file the thread was written in
        file: usize,
        /// Set for threads typed after the sentinel
        placeholder: Option<u32>,
        anchor: Option<Anchor>,
        body: String,
    },
    CreateComment {
        thread_id: String,
        body: String,
    },
    CreateDiffComment {
        /// Index into the review file's entries
        draft: usize,
        entry: DraftEntry,
    },
    UpdateResource {
        /// Changed `title`, `description` and metadata fields, new values
        fields: Vec<(String, String)>,
    },
    UpdateComment {
        thread_id: String,
        note_id: u64,
        body: String,
    },
    DeleteComment {
        thread_id: String,
        note_id: u64,
    },
    SetResolved {
        thread_id: String,
        resolved: bool,
    },
    MergeResource,
}

impl Operation {
    /// Creations first, then edits, then resolve toggles, then the merge.
    fn rank(&self) -> u8 {
        match self {
            Self::CreateThread { .. } | Self::CreateComment { .. } | Self::CreateDiffComment { .. } => 0,
            Self::UpdateResource { .. } | Self::UpdateComment { .. } | Self::DeleteComment { .. } => 1,
            Self::SetResolved { .. } => 2,
            Self::MergeResource => 3,
        }
    }
}

fn first_line(body: &str) -> &str {
    body.lines().find(|l| !l.trim().is_empty()).unwrap_or_default()
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateThread { anchor, body, .. } => match anchor {
                Some(a) => write!(f, "new thread at {}:{}: {}", a.path, a.line, first_line(body)),
                None => write!(f, "new thread: {}", first_line(body)),
            },
            Self::CreateComment { thread_id, body } => {
                write!(f, "reply to {}: {}", thread_id, first_line(body))
            }
            Self::CreateDiffComment { entry, .. } => write!(
                f,
                "review comment on {} {}:{}: {}",
                entry.commit,
                entry.path,
                entry.new_line,
                first_line(&entry.body)
            ),
            Self::UpdateResource { fields } => {
                let keys: Vec<&str> = fields.iter().map(|(k, _)| k.as_str()).collect();
                write!(f, "update {}", keys.join(", "))
            }
            Self::UpdateComment {
                thread_id, note_id, ..
            } => write!(f, "edit note {} in {}", note_id, thread_id),
            Self::DeleteComment { thread_id, note_id } => {
                write!(f, "delete note {} in {}", note_id, thread_id)
            }
            Self::MergeResource => write!(f, "merge"),
            Self::SetResolved { thread_id, resolved } => write!(
                f,
                "{} {}",
                if *resolved { "resolve" } else { "unresolve" },
                thread_id
            ),
        }
    }
}

/// Ordered list of operations for one resource.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub operations: Vec<Operation>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Operation> {
        self.operations.iter()
    }
}

fn effective_resolved(thread: &Thread, implied: Option<bool>) -> Option<bool> {
    implied.map(|default| thread.resolved.unwrap_or(default))
}

fn header_changes(working: &Header, baseline: Option<&Header>) -> Vec<(String, String)> {
    let mut fields = Vec::new();
    let old_title = baseline.map(|h| h.title.as_str());
    if old_title != Some(working.title.as_str()) {
        fields.push(("title".to_string(), working.title.clone()));
    }
    let old_description = baseline.map(|h| h.description.trim_end());
    if old_description != Some(working.description.trim_end()) {
        fields.push(("description".to_string(), working.description.trim_end().to_string()));
    }
    for (key, value) in &working.fields {
        let old = baseline.and_then(|h| h.field(key));
        if old.map(str::trim) != Some(value.trim()) {
            fields.push((key.clone(), value.trim().to_string()));
        }
    }
    fields
}

/// Derive the operations needed to publish the local edits of one resource.
///
/// `drafts` is the review file of a merge request, if any.
pub fn extract(files: &[ThreadFile], drafts: Option<&ReviewFile>) -> ChangeSet {
    let mut operations = Vec::new();

    // Baseline threads across all files, so moving a thread between files
    // is seen as a toggle and not as a new thread.
    let mut baseline: HashMap<&str, (&Thread, Option<bool>)> = HashMap::new();
    for file in files {
        for thread in &file.baseline.threads {
            if let Some(id) = thread.id.as_remote() {
                baseline
                    .entry(id)
                    .or_insert((thread, file.implied_resolved));
            }
        }
    }

    let mut seen: HashSet<&str> = HashSet::new();
    let mut merge = false;
    for (index, file) in files.iter().enumerate() {
        if let Some(header) = &file.working.header {
            let fields: Vec<(String, String)> = header_changes(header, file.baseline.header.as_ref())
                .into_iter()
                .filter(|(key, _)| EDITABLE_FIELDS.contains(&key.as_str()))
                .collect();
            if !fields.is_empty() {
                operations.push(Operation::UpdateResource { fields });
            }
        }

        for thread in &file.working.threads {
            let Some(id) = thread.id.as_remote() else {
                continue;
            };
            if !seen.insert(id) {
                tracing::warn!(thread = id, "thread appears more than once; using the first copy");
                continue;
            }
            merge |= thread.merge;
            let old = baseline.get(id).copied();
            let pending = identity::pending_comment(thread);

            if old.is_none() && identity::has_only_pending_comments(thread) {
                if let Some(comment) = pending {
                    operations.push(Operation::CreateThread {
                        file: index,
                        placeholder: None,
                        anchor: thread.anchor.clone(),
                        body: comment.body.trim().to_string(),
                    });
                }
                continue;
            }

            if let Some(comment) = pending {
                operations.push(Operation::CreateComment {
                    thread_id: id.to_string(),
                    body: comment.body.trim().to_string(),
                });
            }

            for comment in &thread.comments {
                let Label::Note(note_id) = comment.label else {
                    continue;
                };
                if thread.deleted.contains(&note_id) {
                    operations.push(Operation::DeleteComment {
                        thread_id: id.to_string(),
                        note_id,
                    });
                } else if identity::comment_state(comment, old.map(|(t, _)| t)) == CommentState::Edited {
                    operations.push(Operation::UpdateComment {
                        thread_id: id.to_string(),
                        note_id,
                        body: comment.body.trim().to_string(),
                    });
                }
            }

            if let Some((old_thread, old_implied)) = old {
                let now = effective_resolved(thread, file.implied_resolved);
                let before = effective_resolved(old_thread, old_implied);
                if let (Some(now), Some(before)) = (now, before) {
                    if now != before {
                        operations.push(Operation::SetResolved {
                            thread_id: id.to_string(),
                            resolved: now,
                        });
                    }
                }
            }
        }

        for thread in &file.working.new_threads {
            let (ThreadId::Placeholder(n), Some(comment)) =
                (&thread.id, identity::pending_comment(thread))
            else {
                continue;
            };
            operations.push(Operation::CreateThread {
                file: index,
                placeholder: Some(*n),
                anchor: None,
                body: comment.body.trim().to_string(),
            });
        }
    }

    if let Some(review) = drafts {
        for (draft, entry) in review.entries.iter().enumerate() {
            if entry.is_ready() {
                operations.push(Operation::CreateDiffComment {
                    draft,
                    entry: DraftEntry {
                        body: entry.body.trim().to_string(),
                        ..entry.clone()
                    },
                });
            }
        }
    }

    if merge {
        operations.push(Operation::MergeResource);
    }

    operations.sort_by_key(Operation::rank);
    ChangeSet { operations }
}

/// Local edits that no operation carries.
///
/// Submit resets each file to its snapshot afterwards, so these are lost.
pub fn unsent_edits(file: &ThreadFile) -> Vec<String> {
    let mut unsent = Vec::new();
    if let (Some(working), Some(baseline)) = (&file.working.header, &file.baseline.header) {
        for (key, _) in header_changes(working, Some(baseline)) {
            if !EDITABLE_FIELDS.contains(&key.as_str()) {
                unsent.push(format!("change to {}", key));
            }
        }
    }
    if file.working.preamble != file.baseline.preamble
        && file.working.preamble.iter().any(|l| !l.trim().is_empty())
    {
        unsent.push("text outside any thread".to_string());
    }

    for thread in &file.working.threads {
        let Some(id) = thread.id.as_remote() else {
            continue;
        };
        let Some(old) = file.baseline.thread(id) else {
            continue;
        };
        let before = old.comments.iter().filter(|c| identity::comment_is_settled(c));
        let now = thread.comments.iter().filter(|c| identity::comment_is_settled(c));
        for (now, before) in now.zip(before) {
            if let Label::Author(name) = &now.label {
                if now.label == before.label && !identity::same_body(&now.body, &before.body) {
                    unsent.push(format!("edit to {}'s comment in {}", name, id));
                }
            }
        }
    }
    unsent
}
