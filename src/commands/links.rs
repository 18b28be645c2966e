//! `gl url2path` and `gl path2url`: translate between web URLs and working files.

use super::{Output, Session, render_json};
use crate::Result;
use crate::models::{ResourceKind, ResourceRef};
use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

/// Issue or merge request named by a web URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkTarget {
    pub kind: ResourceKind,
    pub iid: u64,
    /// `#note_<id>` fragment
    pub note: Option<u64>,
}

fn link_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(merge_requests|issues)/(\d+)(?:[^#]*#note_(\d+))?")
            .expect("valid link regex")
    })
}

/// Parse `.../-/issues/<iid>` or `.../-/merge_requests/<iid>` URLs.
pub fn parse_url(url: &str) -> Option<LinkTarget> {
    let caps = link_re().captures(url)?;
    let kind = match &caps[1] {
        "issues" => ResourceKind::Issue,
        _ => ResourceKind::MergeRequest,
    };
    Some(LinkTarget {
        kind,
        iid: caps[2].parse().ok()?,
        note: caps.get(3).and_then(|m| m.as_str().parse().ok()),
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct PathResult {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<u64>,
}

impl Output for PathResult {
    fn to_json(&self) -> String {
        render_json(self)
    }

    fn to_human(&self) -> String {
        self.path.clone()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UrlReport {
    pub urls: Vec<String>,
}

impl Output for UrlReport {
    fn to_json(&self) -> String {
        render_json(self)
    }

    fn to_human(&self) -> String {
        self.urls.join("\n")
    }
}

/// The working file for an issue or merge request URL.
pub fn url2path(session: &Session, url: &str) -> Result<PathResult> {
    let resource = session.resolve_target(url)?;
    Ok(PathResult {
        path: session.display_path(&session.workspace.primary_file(&resource)),
        note: parse_url(url).and_then(|link| link.note),
    })
}

/// Web URLs of the given targets, optionally opened in the browser.
pub fn path2url(session: &Session, targets: &[String], open: bool) -> Result<UrlReport> {
    let mut report = UrlReport::default();
    for resource in session.resolve_targets(targets)? {
        let url = match &resource {
            ResourceRef::Issue(iid) => session.remote()?.issue_url(*iid),
            ResourceRef::MergeRequest(branch) => session.forge()?.find_merge_request(branch)?.web_url,
        };
        if open {
            session.launcher.open_url(&url)?;
        }
        report.urls.push(url);
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::git::{Git, RemoteInfo};
    use crate::gitlab::MemoryForge;
    use crate::merge::GitMergeFile;
    use crate::models::{RemoteResource, User};
    use tempfile::TempDir;

    #[test]
    fn test_parse_url() {
        assert_eq!(
            parse_url("https://gitlab.example.com/g/p/-/merge_requests/12/diffs#note_345"),
            Some(LinkTarget {
                kind: ResourceKind::MergeRequest,
                iid: 12,
                note: Some(345),
            })
        );
        assert_eq!(
            parse_url("https://gitlab.example.com/g/p/-/issues/7"),
            Some(LinkTarget {
                kind: ResourceKind::Issue,
                iid: 7,
                note: None,
            })
        );
        assert_eq!(parse_url("https://gitlab.example.com/g/p/-/pipelines/7"), None);
    }

    fn merge_request() -> RemoteResource {
        RemoteResource {
            iid: 12,
            title: "Topic".to_string(),
            description: None,
            state: "opened".to_string(),
            web_url: "https://gitlab.example.com/g/p/-/merge_requests/12".to_string(),
            source_branch: Some("feature/x".to_string()),
            target_branch: Some("main".to_string()),
            assignees: Vec::new(),
            reviewers: Vec::new(),
            milestone: None,
            labels: Vec::new(),
            diff_refs: None,
        }
    }

    #[test]
    fn test_url2path_and_back() {
        let temp = TempDir::new().unwrap();
        let settings = settings(temp.path(), &[], false);
        let forge = MemoryForge::new(&User {
            id: 1,
            username: "me".to_string(),
            name: String::new(),
        });
        forge.add_merge_request(merge_request());
        let git = Git::new(temp.path());
        let launcher = RecordingLauncher::default();
        let remote = RemoteInfo::parse("origin", "git@gitlab.example.com:g/p.git").unwrap();
        let session = Session::new(&settings, &git, &GitMergeFile, &launcher)
            .with_remote(remote)
            .with_forge(&forge);

        let mr = url2path(&session, "https://gitlab.example.com/g/p/-/merge_requests/12#note_5").unwrap();
        assert_eq!(mr.path, "gl/feature/x/todo.gl");
        assert_eq!(mr.note, Some(5));

        let issue = url2path(&session, "https://gitlab.example.com/g/p/-/issues/7").unwrap();
        assert_eq!(issue.path, "gl/i/7/comments.gl");

        let report = path2url(
            &session,
            &["gl/feature/x/todo.gl".to_string(), "7".to_string()],
            true,
        )
        .unwrap();
        assert_eq!(
            report.urls,
            vec![
                "https://gitlab.example.com/g/p/-/merge_requests/12",
                "https://gitlab.example.com/g/p/-/issues/7",
            ]
        );
        assert_eq!(launcher.urls.borrow().len(), 2);
    }
}
