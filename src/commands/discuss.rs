//! `gl discuss`: stage a review comment on a line of a commit.

use super::{Output, Session, render_json};
use crate::Result;
use crate::diff_context::{DiffContextBuilder, TargetLine};
use crate::format::review::LineMarker;
use crate::models::ResourceRef;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct DiscussResult {
    /// Review file the draft was appended to
    pub file: String,
    /// 1-based line where the comment body goes
    pub line: usize,
    /// Full id of the commit
    pub commit: String,
    pub path: String,
}

impl Output for DiscussResult {
    fn to_json(&self) -> String {
        render_json(self)
    }

    fn to_human(&self) -> String {
        format!("{}:{}", self.file, self.line)
    }
}

/// Append a draft for `target` in `path` at `commit` to the branch's
/// review file, then open the editor on it unless `edit` is false.
#[allow(clippy::too_many_arguments)]
pub fn discuss(
    session: &Session,
    branch: &str,
    commit: &str,
    path: &str,
    marker: LineMarker,
    old_line: u64,
    new_line: u64,
    edit: bool,
) -> Result<DiscussResult> {
    let resource = ResourceRef::merge_request(branch)?;
    let review = session.workspace.merge_request_files(branch).review;
    let target = TargetLine {
        marker,
        old_line,
        new_line,
    };

    let (entry, location) = {
        let _lock = session.workspace.lock(&resource)?;
        DiffContextBuilder::new(session.vcs, session.settings.context_lines())
            .append(&review, commit, path, target)?
    };

    if edit {
        session.launcher.open_at(&review, location.line)?;
    }

    Ok(DiscussResult {
        file: session.display_path(&review),
        line: location.line,
        commit: entry.commit,
        path: entry.path,
    })
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::git::Git;
    use crate::merge::GitMergeFile;
    use std::fs;
    use std::path::Path;
    use std::process::Command;
    use tempfile::TempDir;

    fn git(dir: &Path, args: &[&str]) -> String {
        let output = Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .unwrap();
        assert!(output.status.success(), "git {:?} failed", args);
        String::from_utf8(output.stdout).unwrap().trim().to_string()
    }

    fn repo() -> TempDir {
        let temp = TempDir::new().unwrap();
        let dir = temp.path();
        git(dir, &["init", "-q"]);
        git(dir, &["config", "user.email", "test@example.com"]);
        git(dir, &["config", "user.name", "Test"]);
        fs::write(dir.join("a.txt"), "one\ntwo\nthree\n").unwrap();
        git(dir, &["add", "a.txt"]);
        git(dir, &["commit", "-q", "-m", "first"]);
        fs::write(dir.join("a.txt"), "one\n2\nthree\nfour\n").unwrap();
        git(dir, &["commit", "-q", "-am", "second"]);
        temp
    }

    #[test]
    fn test_discuss_appends_draft_and_opens_editor() {
        let temp = repo();
        let head = git(temp.path(), &["rev-parse", "HEAD"]);
        let settings = settings(temp.path(), &[], false);
        let vcs = Git::new(temp.path());
        let launcher = RecordingLauncher::default();
        let session = Session::new(&settings, &vcs, &GitMergeFile, &launcher);

        let result = discuss(&session, "topic", "HEAD", "a.txt", LineMarker::Added, 0, 4, true).unwrap();

        assert_eq!(result.commit, head);
        assert_eq!(result.file, "gl/topic/review.gl");
        let text = fs::read_to_string(temp.path().join("gl/topic/review.gl")).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], format!("𑁍 {} a.txt:4 + 0 5", head));
        assert_eq!(&lines[1..6], &[" one", "-two", "+2", " three", "+four"]);
        assert_eq!(result.line, 7);
        assert_eq!(lines[6], "");
        assert_eq!(
            launcher.files.borrow().as_slice(),
            &[(temp.path().join("gl/topic/review.gl"), result.line)]
        );
    }
}
