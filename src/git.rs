//! Version-control accessor backed by the `git` command line.
//!
//! Provides the commit diffs used for thread context and review drafts, ref
//! resolution, fetching of commits that are not available locally, and
//! detection of the GitLab instance behind the repository's remotes.

use crate::{Error, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;

/// Hash of the empty tree, used as the base when diffing a root commit.
pub const EMPTY_TREE: &str = "4b825dc642cb6eb9a060e54bf8d69288fbee4904";

/// Context size passed to `git diff` so a file's diff is one hunk.
const FULL_CONTEXT: &str = "-U123123123";

/// Read access to the repository history.
pub trait Vcs {
    /// Unified diff between two revisions, limited to the given paths.
    fn diff(&self, base: &str, head: &str, paths: &[&str]) -> Result<String>;

    /// Resolve a revision name to a full commit id.
    fn resolve_ref(&self, name: &str) -> Result<String>;

    /// Make sure a commit is available locally, fetching it if needed.
    fn ensure_commit(&self, sha: &str) -> Result<()>;

    /// First parent of a commit, or the empty tree for a root commit.
    fn parent(&self, sha: &str) -> Result<String> {
        self.resolve_ref(sha)?;
        Ok(self
            .resolve_ref(&format!("{}~", sha))
            .unwrap_or_else(|_| EMPTY_TREE.to_string()))
    }

    /// Diff a single commit introduced for one path.
    fn diff_for_commit(&self, sha: &str, path: &str) -> Result<String> {
        let base = self.parent(sha)?;
        self.diff(&base, sha, &[path])
    }
}

/// [`Vcs`] implementation that shells out to `git`.
#[derive(Debug, Clone)]
pub struct Git {
    worktree: PathBuf,
    /// Remote used to fetch missing commits
    remote: Option<String>,
}

impl Git {
    pub fn new(worktree: &Path) -> Self {
        Self {
            worktree: worktree.to_path_buf(),
            remote: None,
        }
    }

    pub fn with_remote(mut self, remote: impl Into<String>) -> Self {
        self.remote = Some(remote.into());
        self
    }

    pub fn worktree(&self) -> &Path {
        &self.worktree
    }

    /// Top level of the worktree containing `start`.
    pub fn discover(start: &Path) -> Result<PathBuf> {
        let output = Command::new("git")
            .args(["rev-parse", "--show-toplevel"])
            .current_dir(start)
            .output()
            .map_err(|e| Error::Git(format!("failed to run git: {}", e)))?;

        if !output.status.success() {
            return Err(Error::Git(format!(
                "not inside a git repository: {}",
                start.display()
            )));
        }
        Ok(PathBuf::from(
            String::from_utf8_lossy(&output.stdout).trim(),
        ))
    }

    fn run(&self, args: &[&str]) -> Result<String> {
        tracing::debug!(?args, "git");
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.worktree)
            .output()
            .map_err(|e| Error::Git(format!("failed to run git: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Git(format!(
                "git {} failed: {}",
                args.first().copied().unwrap_or_default(),
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn has_commit(&self, sha: &str) -> bool {
        self.run(&["cat-file", "-e", &format!("{}^{{commit}}", sha)])
            .is_ok()
    }

    /// Configured remotes with their fetch URLs, in `git remote` order.
    pub fn remotes(&self) -> Result<Vec<(String, String)>> {
        let mut remotes = Vec::new();
        for name in self.run(&["remote"])?.lines() {
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            let url = self.run(&["remote", "get-url", name])?;
            remotes.push((name.to_string(), url.trim().to_string()));
        }
        Ok(remotes)
    }

    /// Find the GitLab project behind the remotes.
    ///
    /// With `preferred`, only that remote is considered; otherwise the first
    /// remote whose URL looks like a GitLab project wins.
    pub fn detect_remote(&self, preferred: Option<&str>) -> Result<RemoteInfo> {
        let remotes = self.remotes()?;
        remotes
            .iter()
            .filter(|(name, _)| preferred.is_none_or(|p| p == name))
            .find_map(|(name, url)| RemoteInfo::parse(name, url))
            .ok_or_else(|| match preferred {
                Some(name) => Error::Config(format!("remote '{}' is not a GitLab project URL", name)),
                None => Error::Config(
                    "missing remote, don't know which GitLab instance to talk to".to_string(),
                ),
            })
    }
}

impl Vcs for Git {
    fn diff(&self, base: &str, head: &str, paths: &[&str]) -> Result<String> {
        let mut args = vec!["diff", FULL_CONTEXT, base, head, "--"];
        args.extend_from_slice(paths);
        self.run(&args)
    }

    fn resolve_ref(&self, name: &str) -> Result<String> {
        let spec = format!("{}^{{commit}}", name);
        let out = self
            .run(&["rev-parse", "--verify", "--quiet", &spec])
            .map_err(|_| Error::NotFound(format!("revision '{}'", name)))?;
        Ok(out.trim().to_string())
    }

    fn ensure_commit(&self, sha: &str) -> Result<()> {
        if self.has_commit(sha) {
            return Ok(());
        }
        let Some(remote) = &self.remote else {
            return Err(Error::NotFound(format!("commit {}", sha)));
        };
        tracing::info!(commit = sha, remote = %remote, "fetching missing commit");
        self.run(&["fetch", "--quiet", remote, sha])?;
        if self.has_commit(sha) {
            Ok(())
        } else {
            Err(Error::NotFound(format!("commit {}", sha)))
        }
    }
}

fn remote_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(?:\w+://)?(?:[\w.-]+@)?(?P<host>[\w.-]+)(?::\d+)?[/:](?P<project>[\w.-]+(?:/[\w.-]+?)+?)(?:\.git)?/?$",
        )
        .expect("valid remote regex")
    })
}

/// GitLab instance and project derived from a git remote URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteInfo {
    /// Name of the git remote (`origin`)
    pub name: String,
    pub host: String,
    /// Project path with namespace (`group/project`)
    pub project: String,
}

impl RemoteInfo {
    /// Parse `[proto://][user@]host[:port][/:]group/project[.git]`.
    pub fn parse(name: &str, url: &str) -> Option<Self> {
        let caps = remote_re().captures(url.trim())?;
        Some(Self {
            name: name.to_string(),
            host: caps["host"].to_string(),
            project: caps["project"].to_string(),
        })
    }

    pub fn protocol(&self) -> &'static str {
        if self.host == "localhost" {
            "http"
        } else {
            "https"
        }
    }

    /// `https://host`
    pub fn base_url(&self) -> String {
        format!("{}://{}", self.protocol(), self.host)
    }

    /// `https://host/group/project`
    pub fn web_url(&self) -> String {
        format!("{}/{}", self.base_url(), self.project)
    }

    pub fn issue_url(&self, iid: u64) -> String {
        format!("{}/-/issues/{}", self.web_url(), iid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ssh_remote() {
        let info = RemoteInfo::parse("origin", "git@gitlab.example.com:group/project.git").unwrap();
        assert_eq!(info.host, "gitlab.example.com");
        assert_eq!(info.project, "group/project");
        assert_eq!(info.web_url(), "https://gitlab.example.com/group/project");
    }

    #[test]
    fn test_parse_https_remote_with_subgroup() {
        let info =
            RemoteInfo::parse("origin", "https://gitlab.com/group/sub/project.git").unwrap();
        assert_eq!(info.project, "group/sub/project");
        assert_eq!(info.web_url(), "https://gitlab.com/group/sub/project");
    }

    #[test]
    fn test_parse_localhost_with_port_uses_http() {
        let info = RemoteInfo::parse("up", "ssh://git@localhost:2222/root/demo").unwrap();
        assert_eq!(info.host, "localhost");
        assert_eq!(info.project, "root/demo");
        assert_eq!(info.issue_url(1), "http://localhost/root/demo/-/issues/1");
    }

    #[test]
    fn test_parse_rejects_local_path() {
        assert!(RemoteInfo::parse("origin", "/srv/git/project").is_none());
    }
}
