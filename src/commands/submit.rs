//! `gl submit`: publish local edits to GitLab.
//!
//! The edits of a resource become an ordered [`ChangeSet`]; each operation is
//! turned into a [`Mutation`] and applied in order. The first failure stops
//! the run, after the ids of everything already applied have been written
//! back, so running submit again does not post anything twice. After full
//! success the working files are reset to their snapshots and fetched again.
//! Header edits are refused when the same field changed on GitLab since the
//! last fetch.

use super::fetch::{ResourceFetch, fetch_locked};
use super::{Output, Session, render_json};
use crate::changes::{ChangeSet, Operation, ThreadFile, extract, unsent_edits};
use crate::format::review::{self, LineMarker, ReviewFile};
use crate::format::{self, Header, Label, Resource, ThreadId};
use crate::git::Vcs;
use crate::gitlab::{Applied, Mutation};
use crate::identity;
use crate::merge::ensure_no_conflicts;
use crate::models::{DiffPosition, Milestone, Noteable, RemoteResource, ResourceRef, User};
use crate::render::Renderer;
use crate::storage::{SnapshotStore, read_optional, remove_if_exists, write_atomic};
use crate::{Error, Result};
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitStatus {
    NothingToSubmit,
    /// The issue or merge request is not open
    Closed,
    DryRun,
    Applied,
}

/// A request that would be sent, as a `curl` command line.
#[derive(Debug, Clone, Serialize)]
pub struct PlannedRequest {
    pub operation: String,
    pub request: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResourceSubmit {
    pub resource: String,
    pub status: SubmitStatus,
    /// Every operation derived from the local edits
    pub operations: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub requests: Vec<PlannedRequest>,
    /// Local edits no operation carries; the reset after submit drops them
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unsent: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_state: Option<String>,
    /// The fetch that followed a successful submit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fetch: Option<ResourceFetch>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SubmitReport {
    pub resources: Vec<ResourceSubmit>,
}

impl SubmitReport {
    /// Files the follow-up fetch left with conflict markers.
    pub fn conflicts(&self) -> Vec<&super::FileSync> {
        self.resources
            .iter()
            .filter_map(|r| r.fetch.as_ref())
            .flat_map(|f| f.files.iter())
            .filter(|f| f.is_conflict())
            .collect()
    }
}

impl Output for SubmitReport {
    fn to_json(&self) -> String {
        render_json(self)
    }

    fn to_human(&self) -> String {
        let mut lines = Vec::new();
        for r in &self.resources {
            match r.status {
                SubmitStatus::NothingToSubmit => {
                    lines.push(format!("{}: nothing to submit", r.resource))
                }
                SubmitStatus::Closed => lines.push(format!(
                    "{}: {} on GitLab, not submitting {} change(s)",
                    r.resource,
                    r.remote_state.as_deref().unwrap_or("not open"),
                    r.operations.len()
                )),
                SubmitStatus::DryRun => {
                    lines.push(format!(
                        "{}: would send {} request(s)",
                        r.resource,
                        r.requests.len()
                    ));
                    for planned in &r.requests {
                        lines.push(format!("# {}", planned.operation));
                        lines.push(planned.request.clone());
                    }
                    for edit in &r.unsent {
                        lines.push(format!("# not sent: {}", edit));
                    }
                }
                SubmitStatus::Applied => {
                    lines.push(format!(
                        "{}: submitted {} change(s)",
                        r.resource,
                        r.operations.len()
                    ));
                    for op in &r.operations {
                        lines.push(format!("  {}", op));
                    }
                    for edit in &r.unsent {
                        lines.push(format!("  not sent, discarded: {}", edit));
                    }
                }
            }
        }
        if lines.is_empty() {
            lines.push("Nothing fetched yet; name an issue number or branch.".to_string());
        }
        lines.join("\n")
    }
}

/// Submit every target in turn.
pub fn submit(session: &Session, targets: &[String]) -> Result<SubmitReport> {
    let mut report = SubmitReport::default();
    for resource in session.resolve_targets(targets)? {
        let _lock = session.workspace.lock(&resource)?;
        report.resources.push(submit_locked(session, &resource)?);
    }
    Ok(report)
}

/// A thread file as loaded for submit.
struct LoadedFile {
    path: PathBuf,
    snapshot: String,
    file: ThreadFile,
    /// Working model changed by applied operations
    dirty: bool,
}

fn load_thread_files(
    session: &Session,
    resource: &ResourceRef,
) -> Result<(Vec<LoadedFile>, Option<PathBuf>)> {
    // (path, implied resolved state, starts with a header)
    let (paths, review): (Vec<(PathBuf, Option<bool>, bool)>, Option<PathBuf>) = match resource {
        ResourceRef::Issue(iid) => (vec![(session.workspace.issue_file(*iid), None, true)], None),
        ResourceRef::MergeRequest(branch) => {
            let files = session.workspace.merge_request_files(branch);
            let paths = files
                .thread_files()
                .iter()
                .map(|(path, implied)| (path.to_path_buf(), *implied, *path == files.meta.as_path()))
                .collect();
            (paths, Some(files.review.clone()))
        }
    };

    let snapshots = SnapshotStore;
    let mut loaded = Vec::new();
    for (path, implied_resolved, has_header) in paths {
        let Some(text) = read_optional(&path)? else {
            continue;
        };
        ensure_no_conflicts(&path, &text)?;
        let snapshot = snapshots.get(&path)?.ok_or_else(|| {
            Error::InvalidInput(format!(
                "{} has no snapshot; run `gl fetch {}` first",
                session.display_path(&path),
                resource
            ))
        })?;
        let parse: fn(&str) -> Resource = if has_header {
            format::parse_with_header
        } else {
            format::parse
        };
        loaded.push(LoadedFile {
            file: ThreadFile {
                working: parse(&text),
                baseline: parse(&snapshot),
                implied_resolved,
            },
            path,
            snapshot,
            dirty: false,
        });
    }
    Ok((loaded, review))
}

/// Submit one resource; the caller holds its lock.
fn submit_locked(session: &Session, resource: &ResourceRef) -> Result<ResourceSubmit> {
    let (mut loaded, review_path) = load_thread_files(session, resource)?;
    let review = match &review_path {
        Some(path) => read_optional(path)?.map(|text| review::parse(&text)),
        None => None,
    };

    let files: Vec<ThreadFile> = loaded.iter().map(|l| l.file.clone()).collect();
    let changes: ChangeSet = extract(&files, review.as_ref());
    let mut result = ResourceSubmit {
        resource: resource.to_string(),
        status: SubmitStatus::NothingToSubmit,
        operations: changes.iter().map(ToString::to_string).collect(),
        requests: Vec::new(),
        unsent: loaded
            .iter()
            .flat_map(|l| {
                let file = session.display_path(&l.path);
                unsent_edits(&l.file)
                    .into_iter()
                    .map(move |edit| format!("{}: {}", file, edit))
            })
            .collect(),
        remote_state: None,
        fetch: None,
    };
    if changes.is_empty() {
        return Ok(result);
    }

    let forge = session.forge()?;
    let remote = match resource {
        ResourceRef::Issue(iid) => forge.get_issue(*iid)?,
        ResourceRef::MergeRequest(branch) => forge.find_merge_request(branch)?,
    };
    if !remote.is_open() {
        tracing::warn!(resource = %resource, state = %remote.state, "not open; skipping submit");
        result.status = SubmitStatus::Closed;
        result.remote_state = Some(remote.state);
        return Ok(result);
    }
    if let Some(Operation::UpdateResource { fields }) = changes
        .iter()
        .find(|op| matches!(op, Operation::UpdateResource { .. }))
    {
        if let Some(fetched) = loaded.iter().find_map(|l| l.file.baseline.header.as_ref()) {
            ensure_fresh(resource, fields, fetched, &remote)?;
        }
    }

    let users = session.users()?;
    let milestones: Vec<Milestone> = session
        .workspace
        .load_static("milestones")?
        .unwrap_or_default();
    let mut planned = Vec::new();
    for op in changes.iter() {
        if let Some(mutation) = plan(op, &remote, session.vcs, &users, &milestones)? {
            planned.push((op, mutation));
        }
    }

    if session.dry_run() {
        result.status = SubmitStatus::DryRun;
        result.requests = planned
            .iter()
            .map(|(op, mutation)| PlannedRequest {
                operation: op.to_string(),
                request: forge.trace(mutation),
            })
            .collect();
        return Ok(result);
    }

    let mut applied_drafts = HashSet::new();
    for (index, (op, mutation)) in planned.iter().enumerate() {
        match forge.apply(mutation) {
            Ok(applied) => {
                tracing::info!(operation = %op, "applied");
                record(&mut loaded, &mut applied_drafts, op, &applied);
            }
            Err(e) => {
                tracing::warn!(
                    applied = index,
                    remaining = planned.len() - index,
                    "stopping at the first failed request"
                );
                save_progress(&loaded, review_path.as_deref(), review.as_ref(), &applied_drafts)?;
                return Err(e);
            }
        }
    }

    for edit in &result.unsent {
        tracing::warn!(edit = %edit, "not sent to GitLab; discarded");
    }
    for l in &loaded {
        write_atomic(&l.path, &l.snapshot)?;
    }
    if let (Some(path), Some(review)) = (&review_path, &review) {
        write_remaining_drafts(path, review, &applied_drafts)?;
    }

    result.status = SubmitStatus::Applied;
    result.fetch = Some(fetch_locked(session, resource)?);
    Ok(result)
}

/// Refuse to overwrite header fields that changed on GitLab since the fetch.
///
/// A field already holding the new value upstream (an earlier, interrupted
/// submit) is not a conflict.
fn ensure_fresh(
    resource: &ResourceRef,
    fields: &[(String, String)],
    fetched: &Header,
    remote: &RemoteResource,
) -> Result<()> {
    let upstream = Renderer::new(None, &[], 0).header(remote);
    for (key, value) in fields {
        let (was, now) = match key.as_str() {
            "title" => (fetched.title.trim(), upstream.title.trim()),
            "description" => (fetched.description.trim_end(), upstream.description.trim_end()),
            "state_event" => continue,
            _ => (
                fetched.field(key).unwrap_or_default().trim(),
                upstream.field(key).unwrap_or_default().trim(),
            ),
        };
        if was != now && now != value.trim() {
            return Err(Error::Outdated {
                resource: resource.to_string(),
                field: key.clone(),
                upstream: now.to_string(),
            });
        }
    }
    Ok(())
}

/// The request for one operation; `None` when nothing is left to send.
fn plan(
    op: &Operation,
    remote: &RemoteResource,
    vcs: &dyn Vcs,
    users: &[User],
    milestones: &[Milestone],
) -> Result<Option<Mutation>> {
    let target = remote.noteable();
    let mutation = match op {
        Operation::CreateThread { anchor, body, .. } => {
            let position = match (anchor, &remote.diff_refs) {
                (Some(anchor), Some(refs)) => Some(DiffPosition {
                    base_sha: refs.base_sha.clone(),
                    start_sha: refs.start_sha.clone(),
                    head_sha: refs.head_sha.clone(),
                    old_path: anchor.path.clone(),
                    new_path: anchor.path.clone(),
                    old_line: None,
                    new_line: Some(anchor.line),
                    position_type: "text",
                }),
                (Some(anchor), None) => {
                    tracing::warn!(path = %anchor.path, "no diff to anchor to; posting as a plain thread");
                    None
                }
                (None, _) => None,
            };
            Mutation::CreateThread {
                target,
                body: body.clone(),
                position,
            }
        }
        Operation::CreateComment { thread_id, body } => Mutation::CreateComment {
            target,
            discussion_id: thread_id.clone(),
            body: body.clone(),
        },
        Operation::CreateDiffComment { entry, .. } => {
            vcs.ensure_commit(&entry.commit)?;
            let base = vcs.parent(&entry.commit)?;
            Mutation::CreateDiffComment {
                target,
                commit: entry.commit.clone(),
                body: entry.body.clone(),
                position: DiffPosition {
                    base_sha: base.clone(),
                    start_sha: base,
                    head_sha: entry.commit.clone(),
                    old_path: entry.path.clone(),
                    new_path: entry.path.clone(),
                    old_line: (entry.marker != LineMarker::Added).then_some(entry.old_line),
                    new_line: (entry.marker != LineMarker::Removed).then_some(entry.new_line),
                    position_type: "text",
                },
            }
        }
        Operation::UpdateResource { fields } => {
            let payload = update_payload(fields, users, milestones)?;
            if payload.is_empty() {
                return Ok(None);
            }
            Mutation::UpdateResource { target, payload }
        }
        Operation::UpdateComment {
            thread_id,
            note_id,
            body,
        } => Mutation::UpdateComment {
            target,
            discussion_id: thread_id.clone(),
            note_id: *note_id,
            body: body.clone(),
        },
        Operation::DeleteComment { thread_id, note_id } => Mutation::DeleteComment {
            target,
            discussion_id: thread_id.clone(),
            note_id: *note_id,
        },
        Operation::SetResolved { thread_id, resolved } => Mutation::SetResolved {
            target,
            discussion_id: thread_id.clone(),
            resolved: *resolved,
        },
        Operation::MergeResource => {
            if !matches!(target, Noteable::MergeRequest(_)) {
                tracing::warn!("{} only applies to merge requests; ignoring", format::MERGE_DIRECTIVE);
                return Ok(None);
            }
            Mutation::MergeResource { target }
        }
    };
    Ok(Some(mutation))
}

fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|s| !s.is_empty())
}

fn user_ids(value: &str, users: &[User]) -> Result<Vec<u64>> {
    let ids = split_list(value)
        .map(|name| {
            users
                .iter()
                .find(|u| u.username == name)
                .map(|u| u.id)
                .ok_or_else(|| {
                    Error::InvalidInput(format!("unknown user '{}' (run `gl fetchstatic`)", name))
                })
        })
        .collect::<Result<Vec<u64>>>()?;
    // GitLab clears the list when given a single 0
    Ok(if ids.is_empty() { vec![0] } else { ids })
}

/// API attributes for changed header fields.
fn update_payload(
    fields: &[(String, String)],
    users: &[User],
    milestones: &[Milestone],
) -> Result<Map<String, Value>> {
    let mut payload = Map::new();
    for (key, value) in fields {
        match key.as_str() {
            "title" | "description" | "state_event" | "target_branch" => {
                payload.insert(key.clone(), Value::String(value.clone()));
            }
            "labels" => {
                let labels: Vec<&str> = split_list(value).collect();
                payload.insert("labels".to_string(), Value::String(labels.join(",")));
            }
            "assignees" => {
                payload.insert("assignee_ids".to_string(), json!(user_ids(value, users)?));
            }
            "reviewers" => {
                payload.insert("reviewer_ids".to_string(), json!(user_ids(value, users)?));
            }
            "milestone" => {
                let title = value.trim();
                let id = if title.is_empty() {
                    0
                } else {
                    milestones
                        .iter()
                        .find(|m| m.title == title)
                        .map(|m| m.id)
                        .ok_or_else(|| {
                            Error::InvalidInput(format!(
                                "unknown milestone '{}' (run `gl fetchstatic`)",
                                title
                            ))
                        })?
                };
                payload.insert("milestone_id".to_string(), json!(id));
            }
            other => {
                tracing::warn!(field = other, "unknown metadata field; ignoring");
            }
        }
    }
    Ok(payload)
}

/// Write what the forge assigned back into the working model.
fn record(
    loaded: &mut [LoadedFile],
    applied_drafts: &mut HashSet<usize>,
    op: &Operation,
    applied: &Applied,
) {
    match (op, applied) {
        (
            Operation::CreateThread {
                file,
                placeholder: Some(n),
                ..
            },
            Applied::Thread {
                discussion_id,
                note_id,
            },
        ) => {
            let l = &mut loaded[*file];
            identity::settle_thread(&mut l.file.working, *n, discussion_id, *note_id);
            l.dirty = true;
        }
        (
            Operation::CreateThread {
                file,
                placeholder: None,
                body,
                ..
            },
            Applied::Thread {
                discussion_id,
                note_id,
            },
        ) => {
            let l = &mut loaded[*file];
            let thread = l.file.working.threads.iter_mut().find(|t| {
                identity::has_only_pending_comments(t)
                    && identity::pending_comment(t).is_some_and(|c| identity::same_body(&c.body, body))
            });
            if let Some(thread) = thread {
                thread.id = ThreadId::Remote(discussion_id.clone());
                identity::settle_comment(thread, *note_id);
                l.dirty = true;
            }
        }
        (
            Operation::CreateComment { thread_id, .. },
            Applied::Note { note_id } | Applied::Thread { note_id, .. },
        ) => {
            for l in loaded.iter_mut() {
                if let Some(thread) = l.file.working.thread_mut(thread_id) {
                    identity::settle_comment(thread, *note_id);
                    l.dirty = true;
                    break;
                }
            }
        }
        (Operation::SetResolved { thread_id, .. }, _) => {
            for l in loaded.iter_mut() {
                if let Some(thread) = l.file.working.thread_mut(thread_id) {
                    thread.resolved = None;
                    l.dirty = true;
                }
            }
        }
        (Operation::CreateDiffComment { draft, .. }, _) => {
            applied_drafts.insert(*draft);
        }
        (Operation::DeleteComment { thread_id, note_id }, _) => {
            for l in loaded.iter_mut() {
                if let Some(thread) = l.file.working.thread_mut(thread_id) {
                    thread.comments.retain(|c| c.label != Label::Note(*note_id));
                    thread.deleted.retain(|id| id != note_id);
                    l.dirty = true;
                }
            }
        }
        (Operation::MergeResource, _) => {
            for l in loaded.iter_mut() {
                for thread in l.file.working.threads.iter_mut().filter(|t| t.merge) {
                    thread.merge = false;
                    l.dirty = true;
                }
            }
        }
        _ => {}
    }
}

/// After a failure: persist the ids of what was applied.
fn save_progress(
    loaded: &[LoadedFile],
    review_path: Option<&Path>,
    review: Option<&ReviewFile>,
    applied_drafts: &HashSet<usize>,
) -> Result<()> {
    for l in loaded.iter().filter(|l| l.dirty) {
        write_atomic(&l.path, &format::serialize(&l.file.working))?;
    }
    if let (Some(path), Some(review)) = (review_path, review) {
        write_remaining_drafts(path, review, applied_drafts)?;
    }
    Ok(())
}

/// Rewrite the review file without the submitted drafts.
fn write_remaining_drafts(path: &Path, review: &ReviewFile, applied: &HashSet<usize>) -> Result<()> {
    if applied.is_empty() {
        return Ok(());
    }
    let remaining = ReviewFile {
        preamble: review.preamble.clone(),
        entries: review
            .entries
            .iter()
            .enumerate()
            .filter(|(i, _)| !applied.contains(i))
            .map(|(_, e)| e.clone())
            .collect(),
    };
    if remaining.entries.is_empty() && remaining.preamble.iter().all(|l| l.trim().is_empty()) {
        remove_if_exists(path)
    } else {
        write_atomic(path, &review::serialize(&remaining))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users() -> Vec<User> {
        ["alice", "bob"]
            .iter()
            .enumerate()
            .map(|(i, name)| User {
                id: i as u64 + 10,
                username: name.to_string(),
                name: String::new(),
            })
            .collect()
    }

    fn milestones() -> Vec<Milestone> {
        vec![Milestone {
            id: 5,
            title: "v1.0".to_string(),
        }]
    }

    fn fields(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_update_payload_maps_names_to_ids() {
        let payload = update_payload(
            &fields(&[
                ("title", "New"),
                ("assignees", "bob, alice"),
                ("reviewers", ""),
                ("milestone", "v1.0"),
                ("labels", "bug , ui,"),
                ("source_branch", "other"),
            ]),
            &users(),
            &milestones(),
        )
        .unwrap();

        assert_eq!(payload["title"], "New");
        assert_eq!(payload["assignee_ids"], json!([11, 10]));
        assert_eq!(payload["reviewer_ids"], json!([0]));
        assert_eq!(payload["milestone_id"], json!(5));
        assert_eq!(payload["labels"], "bug,ui");
        assert!(!payload.contains_key("source_branch"));
    }

    #[test]
    fn test_update_payload_clears_milestone() {
        let payload = update_payload(&fields(&[("milestone", "")]), &[], &[]).unwrap();
        assert_eq!(payload["milestone_id"], json!(0));
    }

    #[test]
    fn test_unknown_user_is_an_error() {
        let err = update_payload(&fields(&[("assignees", "mallory")]), &users(), &[]).unwrap_err();
        assert!(err.to_string().contains("unknown user 'mallory'"));
    }

    fn remote_issue(title: &str) -> RemoteResource {
        serde_json::from_value(json!({
            "iid": 3,
            "title": title,
            "description": "body",
            "state": "opened",
            "web_url": "https://gitlab.example.com/g/p/-/issues/3",
        }))
        .unwrap()
    }

    #[test]
    fn test_ensure_fresh() {
        let fetched = Renderer::new(None, &[], 0).header(&remote_issue("Old"));
        let title = fields(&[("title", "Mine")]);
        let issue = ResourceRef::Issue(3);

        assert!(ensure_fresh(&issue, &title, &fetched, &remote_issue("Old")).is_ok());
        assert!(ensure_fresh(&issue, &title, &fetched, &remote_issue("Mine")).is_ok());
        let err = ensure_fresh(&issue, &title, &fetched, &remote_issue("Theirs")).unwrap_err();
        assert!(matches!(err, Error::Outdated { ref field, ref upstream, .. } if field == "title" && upstream == "Theirs"));
        assert!(ensure_fresh(&issue, &fields(&[("labels", "bug")]), &fetched, &remote_issue("Theirs")).is_ok());
    }

    #[test]
    fn test_write_remaining_drafts_removes_empty_file() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("review.gl");
        let entry = review::DraftEntry {
            commit: "c".repeat(40),
            path: "a.rs".to_string(),
            new_line: 1,
            marker: LineMarker::Added,
            old_line: 0,
            context: vec!["+x".to_string()],
            body: "nit".to_string(),
        };
        let file = ReviewFile {
            preamble: Vec::new(),
            entries: vec![entry.clone(), review::DraftEntry {
                body: String::new(),
                ..entry
            }],
        };
        write_atomic(&path, &review::serialize(&file)).unwrap();

        write_remaining_drafts(&path, &file, &HashSet::from([0])).unwrap();
        let left = review::parse(&std::fs::read_to_string(&path).unwrap());
        assert_eq!(left.entries.len(), 1);
        assert!(!left.entries[0].is_ready());

        write_remaining_drafts(&path, &file, &HashSet::from([0, 1])).unwrap();
        assert!(!path.exists());
    }
}
