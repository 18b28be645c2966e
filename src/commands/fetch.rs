//! `gl fetch`: bring working files up to date with GitLab.

use super::{Output, Session, render_json};
use crate::merge::{MergeEngine, SyncOutcome};
use crate::models::ResourceRef;
use crate::render::Renderer;
use crate::Result;
use serde::Serialize;
use std::path::Path;

/// What happened to one working file.
#[derive(Debug, Clone, Serialize)]
pub struct FileSync {
    pub file: String,
    /// `created`, `unchanged`, `updated`, `merged` or `conflict`
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflict_line: Option<usize>,
}

impl FileSync {
    fn new(file: String, outcome: SyncOutcome) -> Self {
        let (outcome, conflict_line) = match outcome {
            SyncOutcome::Created => ("created", None),
            SyncOutcome::Unchanged => ("unchanged", None),
            SyncOutcome::FastForward => ("updated", None),
            SyncOutcome::Merged => ("merged", None),
            SyncOutcome::Conflicted { line } => ("conflict", Some(line)),
        };
        Self {
            file,
            outcome,
            conflict_line,
        }
    }

    pub fn is_conflict(&self) -> bool {
        self.conflict_line.is_some()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ResourceFetch {
    pub resource: String,
    pub files: Vec<FileSync>,
}

impl ResourceFetch {
    fn human_lines(&self, out: &mut Vec<String>) {
        let changed: Vec<&FileSync> = self
            .files
            .iter()
            .filter(|f| f.outcome != "unchanged")
            .collect();
        if changed.is_empty() {
            out.push(format!("{}: up to date", self.resource));
        }
        for file in changed {
            out.push(format!("{} {}", file.outcome, file.file));
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FetchReport {
    pub resources: Vec<ResourceFetch>,
}

impl FetchReport {
    /// Files left with conflict markers.
    pub fn conflicts(&self) -> Vec<&FileSync> {
        self.resources
            .iter()
            .flat_map(|r| r.files.iter())
            .filter(|f| f.is_conflict())
            .collect()
    }
}

impl Output for FetchReport {
    fn to_json(&self) -> String {
        render_json(self)
    }

    fn to_human(&self) -> String {
        let mut lines = Vec::new();
        for resource in &self.resources {
            resource.human_lines(&mut lines);
        }
        if lines.is_empty() {
            lines.push("Nothing fetched yet; name an issue number or branch.".to_string());
        }
        lines.join("\n")
    }
}

/// Fetch every target, continuing past conflicts.
pub fn fetch(session: &Session, targets: &[String]) -> Result<FetchReport> {
    let mut report = FetchReport::default();
    for resource in session.resolve_targets(targets)? {
        let _lock = session.workspace.lock(&resource)?;
        report.resources.push(fetch_locked(session, &resource)?);
    }
    Ok(report)
}

/// Fetch one resource; the caller holds its lock.
pub(crate) fn fetch_locked(session: &Session, resource: &ResourceRef) -> Result<ResourceFetch> {
    let forge = session.forge()?;
    let users = session.users()?;
    let renderer = Renderer::new(
        session.settings.user(),
        &users,
        session.settings.context_lines(),
    )
    .with_vcs(session.vcs);
    let engine = MergeEngine::new(session.merger);

    let sync = |path: &Path, text: &str| -> Result<FileSync> {
        let outcome = engine.sync_file(path, text)?;
        Ok(FileSync::new(session.display_path(path), outcome))
    };

    let files = match resource {
        ResourceRef::Issue(iid) => {
            let issue = forge.get_issue(*iid)?;
            let discussions = forge.list_threads(issue.noteable())?;
            let text = renderer.issue(&issue, &discussions);
            vec![sync(&session.workspace.issue_file(*iid), &text)?]
        }
        ResourceRef::MergeRequest(branch) => {
            let mr = forge.find_merge_request(branch)?;
            let discussions = forge.list_threads(mr.noteable())?;
            let texts = renderer.merge_request(&mr, &discussions);
            let paths = session.workspace.merge_request_files(branch);
            vec![
                sync(&paths.meta, &texts.meta)?,
                sync(&paths.todo, &texts.todo)?,
                sync(&paths.resolved, &texts.resolved)?,
            ]
        }
    };

    tracing::debug!(resource = %resource, files = files.len(), "fetched");
    Ok(ResourceFetch {
        resource: resource.to_string(),
        files,
    })
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::gitlab::MemoryForge;
    use crate::merge::GitMergeFile;
    use crate::models::{Discussion, Note, NoteAuthor, Noteable, RemoteResource, User};
    use crate::git::Git;
    use std::fs;
    use tempfile::TempDir;

    const D1: &str = "6a9c1750b37d513a43987b574953fceb50b03ce7";

    fn me() -> User {
        User {
            id: 1,
            username: "me".to_string(),
            name: "Me".to_string(),
        }
    }

    fn issue() -> RemoteResource {
        RemoteResource {
            iid: 3,
            title: "Crash".to_string(),
            description: Some("It crashes".to_string()),
            state: "opened".to_string(),
            web_url: "https://gitlab.example.com/g/p/-/issues/3".to_string(),
            source_branch: None,
            target_branch: None,
            assignees: Vec::new(),
            reviewers: Vec::new(),
            milestone: None,
            labels: Vec::new(),
            diff_refs: None,
        }
    }

    fn discussion(note_id: u64, author: &str, body: &str) -> Discussion {
        Discussion {
            id: D1.to_string(),
            notes: vec![Note {
                id: note_id,
                body: body.to_string(),
                author: NoteAuthor {
                    id: 2,
                    username: Some(author.to_string()),
                },
                system: false,
                resolvable: false,
                resolved: None,
                position: None,
            }],
        }
    }

    #[test]
    fn test_fetch_creates_then_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let settings = settings(temp.path(), &[("GITLAB_USER", "me")], false);
        let forge = MemoryForge::new(&me());
        forge.add_issue(issue());
        forge.add_discussion(Noteable::Issue(3), discussion(10, "bob", "does it?"));
        let git = Git::new(temp.path());
        let launcher = RecordingLauncher::default();
        let session = Session::new(&settings, &git, &GitMergeFile, &launcher).with_forge(&forge);

        let first = fetch(&session, &["3".to_string()]).unwrap();
        assert_eq!(first.resources[0].files[0].outcome, "created");
        assert_eq!(first.resources[0].files[0].file, "gl/i/3/comments.gl");

        let path = session.workspace.issue_file(3);
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("Crash\n\nIt crashes\n"));
        assert!(text.contains(&format!("{}\n\t[bob] does it?\n", D1)));

        let second = fetch(&session, &[]).unwrap();
        assert_eq!(second.resources[0].files[0].outcome, "unchanged");
        assert_eq!(fs::read_to_string(&path).unwrap(), text);
        assert!(second.to_human().contains("#3: up to date"));
    }

    #[test]
    fn test_fetch_keeps_local_reply_when_remote_changes() {
        let temp = TempDir::new().unwrap();
        let settings = settings(temp.path(), &[("GITLAB_USER", "me")], false);
        let forge = MemoryForge::new(&me());
        forge.add_issue(issue());
        forge.add_discussion(Noteable::Issue(3), discussion(10, "bob", "does it?"));
        let git = Git::new(temp.path());
        let launcher = RecordingLauncher::default();
        let session = Session::new(&settings, &git, &GitMergeFile, &launcher).with_forge(&forge);

        fetch(&session, &["3".to_string()]).unwrap();
        let path = session.workspace.issue_file(3);
        let text = fs::read_to_string(&path).unwrap();
        fs::write(&path, text.replace("\t[bob] does it?\n", "\t[bob] does it?\nyes, always\n")).unwrap();

        let mut updated = issue();
        updated.title = "Crash on start".to_string();
        forge.add_issue(updated);

        let report = fetch(&session, &["3".to_string()]).unwrap();
        assert!(report.conflicts().is_empty());
        assert_eq!(report.resources[0].files[0].outcome, "merged");
        let merged = fs::read_to_string(&path).unwrap();
        assert!(merged.starts_with("Crash on start\n"));
        assert!(merged.contains("yes, always\n"));
    }
}
