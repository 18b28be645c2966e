//! Settled/pending classification of parsed threads and comments.
//!
//! An entity is *settled* once the forge has assigned it an id (a remote
//! thread id, a note id label, or an author label on someone else's note).
//! Everything else is *pending*: typed locally and not yet submitted.

use crate::format::{Comment, Label, Resource, Thread, ThreadId};

/// Lifecycle state of a comment relative to the baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommentState {
    /// Typed locally, no id yet
    Pending,
    /// Settled and unchanged since the last fetch
    Synced,
    /// Settled, but its body differs from the baseline
    Edited,
}

pub fn thread_is_settled(thread: &Thread) -> bool {
    matches!(thread.id, ThreadId::Remote(_))
}

pub fn comment_is_settled(comment: &Comment) -> bool {
    !matches!(comment.label, Label::Pending)
}

/// Compare bodies the way the forge stores them (surrounding whitespace dropped).
pub fn same_body(a: &str, b: &str) -> bool {
    a.trim() == b.trim()
}

/// Classify a comment against the baseline version of its thread.
///
/// Only comments labelled with a note id can be edited; a note id that is
/// missing from the baseline counts as synced since it already exists upstream.
pub fn comment_state(comment: &Comment, baseline: Option<&Thread>) -> CommentState {
    match &comment.label {
        Label::Pending => CommentState::Pending,
        Label::Author(_) => CommentState::Synced,
        Label::Note(id) => match baseline.and_then(|t| t.comment_by_note(*id)) {
            Some(old) if !same_body(&old.body, &comment.body) => CommentState::Edited,
            _ => CommentState::Synced,
        },
    }
}

/// The locally typed comment of a thread, if any.
///
/// Whitespace-only text does not count as a comment.
pub fn pending_comment(thread: &Thread) -> Option<&Comment> {
    thread
        .comments
        .iter()
        .find(|c| c.label == Label::Pending && !c.body.trim().is_empty())
}

/// True when the thread has a header but nothing settled inside it yet.
pub fn has_only_pending_comments(thread: &Thread) -> bool {
    !thread.comments.iter().any(comment_is_settled)
}

/// Record a submitted reply: the pending comment becomes the given note.
pub fn settle_comment(thread: &mut Thread, note_id: u64) {
    if let Some(comment) = thread
        .comments
        .iter_mut()
        .find(|c| c.label == Label::Pending)
    {
        comment.label = Label::Note(note_id);
        comment.body = comment.body.trim().to_string();
    }
}

/// Record a created thread: the placeholder thread moves into the settled
/// threads under its new id, with its first note settled.
pub fn settle_thread(resource: &mut Resource, placeholder: u32, remote_id: &str, note_id: u64) {
    let Some(index) = resource
        .new_threads
        .iter()
        .position(|t| t.id == ThreadId::Placeholder(placeholder))
    else {
        return;
    };
    let mut thread = resource.new_threads.remove(index);
    thread.id = ThreadId::Remote(remote_id.to_string());
    settle_comment(&mut thread, note_id);
    resource.threads.push(thread);
}
