//! Command implementations for the `gl` CLI.
//!
//! Each command takes a [`Session`] carrying the resolved settings and the
//! collaborators it may use (forge, repository, merge tool, editor), and
//! returns a result type implementing [`Output`]:
//! - `fetch` - download discussions and merge them into the working files
//! - `submit` - publish local edits, then fetch again
//! - `discuss` - draft a review comment on a diff line
//! - `fetchstatic` - cache users, milestones and labels
//! - `links` - `url2path` and `path2url`

pub mod discuss;
pub mod fetch;
pub mod fetchstatic;
pub mod links;
pub mod submit;

pub use discuss::{DiscussResult, discuss};
pub use fetch::{FetchReport, FileSync, ResourceFetch, fetch};
pub use fetchstatic::{StaticReport, fetchstatic};
pub use links::{LinkTarget, PathResult, UrlReport, parse_url, path2url, url2path};
pub use submit::{ResourceSubmit, SubmitReport, SubmitStatus, submit};

use crate::config::Settings;
use crate::editor::EditorLauncher;
use crate::git::{RemoteInfo, Vcs};
use crate::gitlab::Forge;
use crate::merge::TextMerger;
use crate::models::{ResourceKind, ResourceRef, User};
use crate::storage::Workspace;
use crate::{Error, Result};
use serde::Serialize;
use std::path::Path;

/// Command results that can be serialized to JSON or formatted for humans.
pub trait Output {
    fn to_json(&self) -> String;

    fn to_human(&self) -> String;
}

/// JSON form of any serializable result.
fn render_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| format!(r#"{{"error": "{}"}}"#, e))
}

/// Settings and collaborators shared by every command of one invocation.
pub struct Session<'a> {
    pub settings: &'a Settings,
    pub workspace: Workspace,
    pub vcs: &'a dyn Vcs,
    pub merger: &'a dyn TextMerger,
    pub launcher: &'a dyn EditorLauncher,
    remote: Option<RemoteInfo>,
    forge: Option<&'a dyn Forge>,
}

impl<'a> Session<'a> {
    pub fn new(
        settings: &'a Settings,
        vcs: &'a dyn Vcs,
        merger: &'a dyn TextMerger,
        launcher: &'a dyn EditorLauncher,
    ) -> Self {
        Self {
            workspace: Workspace::new(settings.worktree()),
            settings,
            vcs,
            merger,
            launcher,
            remote: None,
            forge: None,
        }
    }

    /// GitLab project the worktree's remote points at.
    pub fn with_remote(mut self, remote: RemoteInfo) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn with_forge(mut self, forge: &'a dyn Forge) -> Self {
        self.forge = Some(forge);
        self
    }

    pub fn dry_run(&self) -> bool {
        self.settings.dry_run
    }

    pub fn remote(&self) -> Result<&RemoteInfo> {
        self.remote.as_ref().ok_or_else(|| {
            Error::Config("no git remote points at a GitLab project (use --remote)".to_string())
        })
    }

    /// The forge, or the reason it is unavailable.
    pub fn forge(&self) -> Result<&'a dyn Forge> {
        match self.forge {
            Some(forge) => Ok(forge),
            None => {
                self.settings.token()?;
                self.remote()?;
                Err(Error::Config("GitLab client unavailable".to_string()))
            }
        }
    }

    /// Cached user directory; empty until `fetchstatic` ran.
    pub fn users(&self) -> Result<Vec<User>> {
        Ok(self.workspace.load_static("users")?.unwrap_or_default())
    }

    /// A path for display: relative to the worktree when inside it.
    pub fn display_path(&self, path: &Path) -> String {
        path.strip_prefix(self.settings.worktree())
            .unwrap_or(path)
            .display()
            .to_string()
    }

    /// Interpret a command-line target: an issue number, a URL, a path in
    /// the workspace, or a branch name.
    pub fn resolve_target(&self, target: &str) -> Result<ResourceRef> {
        let target = target.trim();
        if target.is_empty() {
            return Err(Error::InvalidInput("empty target".to_string()));
        }

        if target.contains("://") {
            let link = parse_url(target)
                .ok_or_else(|| Error::InvalidInput(format!("not an issue or merge request URL: {}", target)))?;
            return match link.kind {
                ResourceKind::Issue => Ok(ResourceRef::Issue(link.iid)),
                ResourceKind::MergeRequest => {
                    match self.forge()?.get_merge_request(link.iid)?.resource_ref() {
                        ResourceRef::MergeRequest(branch) => ResourceRef::merge_request(&branch),
                        issue => Ok(issue),
                    }
                }
            };
        }

        if let Ok(iid) = target.trim_start_matches('#').parse::<u64>() {
            return Ok(ResourceRef::Issue(iid));
        }

        let path = Path::new(target);
        let explicit_path = target.ends_with(".gl")
            || target.ends_with(".json")
            || path.is_absolute()
            || path.starts_with(crate::storage::WORKSPACE_DIR);
        if explicit_path || path.exists() {
            if let Some(resource) = self.workspace.resource_for_path(path) {
                return Ok(resource);
            }
            if explicit_path {
                return Err(Error::InvalidInput(format!(
                    "{} is not inside {}",
                    target,
                    self.workspace.root().display()
                )));
            }
        }

        ResourceRef::merge_request(target.trim_end_matches('/'))
    }

    /// Resolve targets; no targets means every resource fetched before.
    pub fn resolve_targets(&self, targets: &[String]) -> Result<Vec<ResourceRef>> {
        if targets.is_empty() {
            return self.workspace.list_resources();
        }
        let mut resources = Vec::new();
        for target in targets {
            let resource = self.resolve_target(target)?;
            if !resources.contains(&resource) {
                resources.push(resource);
            }
        }
        Ok(resources)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::config::{ConfigOverrides, ConfigPaths};
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::path::PathBuf;

    /// Settings rooted at `worktree` with a fixed environment.
    pub fn settings(worktree: &Path, vars: &[(&str, &str)], dry_run: bool) -> Settings {
        let env: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let lookup = move |name: &str| env.get(name).cloned();
        Settings::resolve(
            &ConfigOverrides {
                worktree: Some(worktree.to_path_buf()),
                remote: None,
                dry_run,
            },
            &ConfigPaths {
                system_config: None,
                state: None,
            },
            &lookup,
        )
        .unwrap()
    }

    /// Launcher that records what it was asked to open.
    #[derive(Default)]
    pub struct RecordingLauncher {
        pub files: RefCell<Vec<(PathBuf, usize)>>,
        pub urls: RefCell<Vec<String>>,
    }

    impl EditorLauncher for RecordingLauncher {
        fn open_at(&self, path: &Path, line: usize) -> Result<()> {
            self.files.borrow_mut().push((path.to_path_buf(), line));
            Ok(())
        }

        fn open_url(&self, url: &str) -> Result<()> {
            self.urls.borrow_mut().push(url.to_string());
            Ok(())
        }
    }
}
