//! In-memory [`Forge`] that records every call.
//!
//! Used by the sync tests: it keeps issues, merge requests and discussions in
//! maps, applies mutations to them the way GitLab would, and remembers each
//! mutation so tests can assert on what would have been sent.

use super::{Applied, Forge, Mutation, Scope};
use crate::models::{
    Discussion, Label, Milestone, Note, NoteAuthor, Noteable, Position, RemoteResource, User,
};
use crate::{Error, Result};
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};

#[derive(Default)]
struct State {
    issues: BTreeMap<u64, RemoteResource>,
    merge_requests: BTreeMap<u64, RemoteResource>,
    discussions: HashMap<Noteable, Vec<Discussion>>,
    users: Vec<User>,
    milestones: Vec<Milestone>,
    labels: Vec<Label>,
    applied: Vec<Mutation>,
    reads: Vec<String>,
}

/// Forge double backed by in-memory maps.
pub struct MemoryForge {
    state: RefCell<State>,
    /// Author of notes created through `apply`
    author: NoteAuthor,
    next_id: Cell<u64>,
    /// Fail the mutation with this index (0-based) with HTTP 500
    fail_at: Cell<Option<usize>>,
}

impl MemoryForge {
    pub fn new(user: &User) -> Self {
        Self {
            state: RefCell::new(State::default()),
            author: NoteAuthor {
                id: user.id,
                username: Some(user.username.clone()),
            },
            next_id: Cell::new(1000),
            fail_at: Cell::new(None),
        }
    }

    pub fn add_issue(&self, issue: RemoteResource) {
        self.state.borrow_mut().issues.insert(issue.iid, issue);
    }

    pub fn add_merge_request(&self, mr: RemoteResource) {
        self.state.borrow_mut().merge_requests.insert(mr.iid, mr);
    }

    pub fn add_discussion(&self, target: Noteable, discussion: Discussion) {
        self.state
            .borrow_mut()
            .discussions
            .entry(target)
            .or_default()
            .push(discussion);
    }

    pub fn set_static(&self, users: Vec<User>, milestones: Vec<Milestone>, labels: Vec<Label>) {
        let mut state = self.state.borrow_mut();
        state.users = users;
        state.milestones = milestones;
        state.labels = labels;
    }

    /// Make the mutation with index `n` fail.
    pub fn fail_at(&self, n: usize) {
        self.fail_at.set(Some(n));
    }

    pub fn clear_failure(&self) {
        self.fail_at.set(None);
    }

    /// Mutations applied so far, in order.
    pub fn applied(&self) -> Vec<Mutation> {
        self.state.borrow().applied.clone()
    }

    /// Read calls made so far (`list_threads merge_requests/4`, ...).
    pub fn reads(&self) -> Vec<String> {
        self.state.borrow().reads.clone()
    }

    pub fn discussions(&self, target: Noteable) -> Vec<Discussion> {
        self.state
            .borrow()
            .discussions
            .get(&target)
            .cloned()
            .unwrap_or_default()
    }

    pub fn resource(&self, target: Noteable) -> Option<RemoteResource> {
        let state = self.state.borrow();
        match target {
            Noteable::Issue(iid) => state.issues.get(&iid).cloned(),
            Noteable::MergeRequest(iid) => state.merge_requests.get(&iid).cloned(),
        }
    }

    /// Change a note body as if someone edited it in the web UI.
    pub fn edit_note(&self, target: Noteable, note_id: u64, body: &str) -> bool {
        let mut state = self.state.borrow_mut();
        let Some(discussions) = state.discussions.get_mut(&target) else {
            return false;
        };
        for note in discussions.iter_mut().flat_map(|d| d.notes.iter_mut()) {
            if note.id == note_id {
                note.body = body.to_string();
                return true;
            }
        }
        false
    }

    /// Append a reply to a discussion as if someone posted it in the web UI.
    pub fn add_note(&self, target: Noteable, discussion_id: &str, note: Note) -> bool {
        let mut state = self.state.borrow_mut();
        let discussion = state
            .discussions
            .get_mut(&target)
            .and_then(|d| d.iter_mut().find(|d| d.id == discussion_id));
        match discussion {
            Some(discussion) => {
                discussion.notes.push(note);
                true
            }
            None => false,
        }
    }

    fn record_read(&self, what: String) {
        self.state.borrow_mut().reads.push(what);
    }

    fn next_id(&self) -> u64 {
        let id = self.next_id.get() + 1;
        self.next_id.set(id);
        id
    }

    fn new_note(&self, body: &str, position: Option<Position>) -> Note {
        Note {
            id: self.next_id(),
            body: body.to_string(),
            author: self.author.clone(),
            system: false,
            resolvable: true,
            resolved: Some(false),
            position,
        }
    }

    fn not_found(operation: &str) -> Error {
        Error::Remote {
            operation: operation.to_string(),
            status: Some(404),
            message: "404 Not found".to_string(),
        }
    }

    fn with_discussion<T>(
        &self,
        operation: &str,
        target: Noteable,
        discussion_id: &str,
        f: impl FnOnce(&mut Discussion) -> Option<T>,
    ) -> Result<T> {
        let mut state = self.state.borrow_mut();
        state
            .discussions
            .get_mut(&target)
            .and_then(|all| all.iter_mut().find(|d| d.id == discussion_id))
            .and_then(f)
            .ok_or_else(|| Self::not_found(operation))
    }

    fn create_discussion(&self, target: Noteable, body: &str, position: Option<Position>) -> Applied {
        let note = self.new_note(body, position);
        let note_id = note.id;
        let discussion_id = format!("{:040x}", note_id);
        self.add_discussion(
            target,
            Discussion {
                id: discussion_id.clone(),
                notes: vec![note],
            },
        );
        Applied::Thread {
            discussion_id,
            note_id,
        }
    }

    fn update_resource(&self, operation: &str, target: Noteable, payload: &serde_json::Map<String, Value>) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let users = state.users.clone();
        let milestones = state.milestones.clone();
        let resource = match target {
            Noteable::Issue(iid) => state.issues.get_mut(&iid),
            Noteable::MergeRequest(iid) => state.merge_requests.get_mut(&iid),
        }
        .ok_or_else(|| Self::not_found(operation))?;

        let ids_to_users = |value: &Value| -> Vec<User> {
            value
                .as_array()
                .map(|ids| {
                    ids.iter()
                        .filter_map(Value::as_u64)
                        .filter_map(|id| users.iter().find(|u| u.id == id).cloned())
                        .collect()
                })
                .unwrap_or_default()
        };

        for (key, value) in payload {
            match key.as_str() {
                "title" => resource.title = value.as_str().unwrap_or_default().to_string(),
                "description" => resource.description = value.as_str().map(str::to_string),
                "target_branch" => resource.target_branch = value.as_str().map(str::to_string),
                "labels" => {
                    resource.labels = value
                        .as_str()
                        .unwrap_or_default()
                        .split(',')
                        .map(str::trim)
                        .filter(|l| !l.is_empty())
                        .map(str::to_string)
                        .collect()
                }
                "assignee_ids" => resource.assignees = ids_to_users(value),
                "reviewer_ids" => resource.reviewers = ids_to_users(value),
                "milestone_id" => {
                    resource.milestone = value
                        .as_u64()
                        .and_then(|id| milestones.iter().find(|m| m.id == id).cloned())
                }
                "state_event" => match value.as_str() {
                    Some("close") => resource.state = "closed".to_string(),
                    Some("reopen") => resource.state = "opened".to_string(),
                    _ => {}
                },
                _ => {}
            }
        }
        Ok(())
    }

    fn merge(&self, operation: &str, target: Noteable) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let mr = match target {
            Noteable::MergeRequest(iid) => state.merge_requests.get_mut(&iid),
            Noteable::Issue(_) => None,
        }
        .ok_or_else(|| Self::not_found(operation))?;
        if !mr.is_open() {
            return Err(Error::Remote {
                operation: operation.to_string(),
                status: Some(405),
                message: "405 Method Not Allowed".to_string(),
            });
        }
        mr.state = "merged".to_string();
        Ok(())
    }
}

impl Forge for MemoryForge {
    fn get_issue(&self, iid: u64) -> Result<RemoteResource> {
        self.record_read(format!("get issues/{}", iid));
        self.state
            .borrow()
            .issues
            .get(&iid)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("issue #{}", iid)))
    }

    fn get_merge_request(&self, iid: u64) -> Result<RemoteResource> {
        self.record_read(format!("get merge_requests/{}", iid));
        self.state
            .borrow()
            .merge_requests
            .get(&iid)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("merge request !{}", iid)))
    }

    fn find_merge_request(&self, branch: &str) -> Result<RemoteResource> {
        self.record_read(format!("find merge_requests {}", branch));
        let state = self.state.borrow();
        let matching = || {
            state
                .merge_requests
                .values()
                .filter(|mr| mr.source_branch.as_deref() == Some(branch))
        };
        matching()
            .find(|mr| mr.is_open())
            .or_else(|| matching().next())
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("merge request for branch '{}'", branch)))
    }

    fn list_threads(&self, target: Noteable) -> Result<Vec<Discussion>> {
        self.record_read(format!("list_threads {}", target.api_path()));
        Ok(self.discussions(target))
    }

    fn list_users(&self, _scope: &Scope) -> Result<Vec<User>> {
        Ok(self.state.borrow().users.clone())
    }

    fn list_milestones(&self, _scope: &Scope) -> Result<Vec<Milestone>> {
        Ok(self.state.borrow().milestones.clone())
    }

    fn list_labels(&self, _scope: &Scope) -> Result<Vec<Label>> {
        Ok(self.state.borrow().labels.clone())
    }

    fn mutation_url(&self, mutation: &Mutation) -> String {
        format!("memory://projects/test/{}", mutation.path())
    }

    fn apply(&self, mutation: &Mutation) -> Result<Applied> {
        let operation = mutation.describe();
        let index = self.state.borrow().applied.len();
        if self.fail_at.get() == Some(index) {
            return Err(Error::Remote {
                operation,
                status: Some(500),
                message: "injected failure".to_string(),
            });
        }

        let applied = match mutation {
            Mutation::CreateThread {
                target,
                body,
                position,
            } => {
                let position = position.as_ref().map(|p| Position {
                    base_sha: Some(p.base_sha.clone()),
                    start_sha: Some(p.start_sha.clone()),
                    head_sha: Some(p.head_sha.clone()),
                    old_path: Some(p.old_path.clone()),
                    new_path: Some(p.new_path.clone()),
                    old_line: p.old_line,
                    new_line: p.new_line,
                });
                self.create_discussion(*target, body, position)
            }
            Mutation::CreateDiffComment {
                target,
                body,
                position,
                ..
            } => {
                let position = Position {
                    base_sha: Some(position.base_sha.clone()),
                    start_sha: Some(position.start_sha.clone()),
                    head_sha: Some(position.head_sha.clone()),
                    old_path: Some(position.old_path.clone()),
                    new_path: Some(position.new_path.clone()),
                    old_line: position.old_line,
                    new_line: position.new_line,
                };
                self.create_discussion(*target, body, Some(position))
            }
            Mutation::CreateComment {
                target,
                discussion_id,
                body,
            } => {
                let mut note = self.new_note(body, None);
                let note_id = note.id;
                self.with_discussion(&operation, *target, discussion_id, |d| {
                    if let Some(first) = d.notes.first() {
                        note.resolvable = first.resolvable;
                        note.resolved = first.resolved;
                    }
                    d.notes.push(note);
                    Some(())
                })?;
                Applied::Note { note_id }
            }
            Mutation::UpdateComment {
                target,
                discussion_id,
                note_id,
                body,
            } => {
                self.with_discussion(&operation, *target, discussion_id, |d| {
                    let note = d.notes.iter_mut().find(|n| n.id == *note_id)?;
                    note.body = body.clone();
                    Some(())
                })?;
                Applied::Note { note_id: *note_id }
            }
            Mutation::SetResolved {
                target,
                discussion_id,
                resolved,
            } => {
                self.with_discussion(&operation, *target, discussion_id, |d| {
                    for note in d.notes.iter_mut().filter(|n| n.resolvable) {
                        note.resolved = Some(*resolved);
                    }
                    Some(())
                })?;
                Applied::Done
            }
            Mutation::UpdateResource { target, payload } => {
                self.update_resource(&operation, *target, payload)?;
                Applied::Done
            }
            Mutation::DeleteComment {
                target,
                discussion_id,
                note_id,
            } => {
                self.with_discussion(&operation, *target, discussion_id, |d| {
                    let index = d.notes.iter().position(|n| n.id == *note_id)?;
                    d.notes.remove(index);
                    Some(())
                })?;
                // GitLab drops a discussion together with its last note
                if let Some(all) = self.state.borrow_mut().discussions.get_mut(target) {
                    all.retain(|d| !d.notes.is_empty());
                }
                Applied::Done
            }
            Mutation::MergeResource { target } => {
                self.merge(&operation, *target)?;
                Applied::Done
            }
        };

        tracing::debug!(operation = %operation, "applied in memory");
        self.state.borrow_mut().applied.push(mutation.clone());
        Ok(applied)
    }
}
