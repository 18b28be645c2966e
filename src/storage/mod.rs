//! Storage layer for the `gl/` workspace.
//!
//! Everything lives under `<worktree>/gl/`:
//!
//! - `i/<iid>/comments.gl` - one file per issue
//! - `<branch>/{meta,todo,resolved,review}.gl` - one directory per merge request
//! - `pristine-*.gl` - snapshot of each thread file as last fetched
//! - `users.json`, `milestones.json`, `labels.json` - static reference data
//!
//! All writes go through [`write_atomic`], and every command holds the
//! resource's [`ResourceLock`] while it touches that resource's files.

pub mod snapshot;

pub use snapshot::SnapshotStore;

use crate::models::ResourceRef;
use crate::{Error, Result};
use fs2::FileExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Name of the workspace directory inside the worktree.
pub const WORKSPACE_DIR: &str = "gl";

/// Thread file of an issue.
pub const ISSUE_FILE: &str = "comments.gl";
/// Metadata and unresolvable threads of a merge request.
pub const META_FILE: &str = "meta.gl";
/// Unresolved merge request threads.
pub const TODO_FILE: &str = "todo.gl";
/// Resolved merge request threads.
pub const RESOLVED_FILE: &str = "resolved.gl";
/// Pending review drafts of a merge request.
pub const REVIEW_FILE: &str = "review.gl";

const LOCK_FILE: &str = ".lock";

/// Thread files of one merge request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeRequestFiles {
    pub meta: PathBuf,
    pub todo: PathBuf,
    pub resolved: PathBuf,
    pub review: PathBuf,
}

impl MergeRequestFiles {
    /// Thread files in submit order, with the resolved state implied by each.
    pub fn thread_files(&self) -> [(&Path, Option<bool>); 3] {
        [
            (self.meta.as_path(), None),
            (self.todo.as_path(), Some(false)),
            (self.resolved.as_path(), Some(true)),
        ]
    }
}

/// The `gl/` directory of a worktree.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(worktree: &Path) -> Self {
        Self {
            root: worktree.join(WORKSPACE_DIR),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn resource_dir(&self, resource: &ResourceRef) -> PathBuf {
        match resource {
            ResourceRef::Issue(iid) => self.root.join("i").join(iid.to_string()),
            ResourceRef::MergeRequest(branch) => self.root.join(branch),
        }
    }

    pub fn issue_file(&self, iid: u64) -> PathBuf {
        self.resource_dir(&ResourceRef::Issue(iid)).join(ISSUE_FILE)
    }

    pub fn merge_request_files(&self, branch: &str) -> MergeRequestFiles {
        let dir = self.resource_dir(&ResourceRef::MergeRequest(branch.to_string()));
        MergeRequestFiles {
            meta: dir.join(META_FILE),
            todo: dir.join(TODO_FILE),
            resolved: dir.join(RESOLVED_FILE),
            review: dir.join(REVIEW_FILE),
        }
    }

    /// The file a user would open first for a resource.
    pub fn primary_file(&self, resource: &ResourceRef) -> PathBuf {
        match resource {
            ResourceRef::Issue(iid) => self.issue_file(*iid),
            ResourceRef::MergeRequest(branch) => self.merge_request_files(branch).todo,
        }
    }

    /// Map a path inside the workspace back to its resource.
    ///
    /// Accepts a thread file, a snapshot, or a resource directory.
    pub fn resource_for_path(&self, path: &Path) -> Option<ResourceRef> {
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir().ok()?.join(path)
        };
        let relative = absolute
            .strip_prefix(&self.root)
            .ok()
            .or_else(|| path.strip_prefix(WORKSPACE_DIR).ok())?;

        let mut parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        if parts
            .last()
            .is_some_and(|p| p.ends_with(".gl") || p.ends_with(".json"))
        {
            parts.pop();
        }

        match parts.as_slice() {
            [] => None,
            [i, iid] if i == "i" => iid.parse().ok().map(ResourceRef::Issue),
            _ => ResourceRef::merge_request(&parts.join("/")).ok(),
        }
    }

    /// Every resource that has been fetched before, issues first.
    pub fn list_resources(&self) -> Result<Vec<ResourceRef>> {
        let mut issues = Vec::new();
        let issue_root = self.root.join("i");
        if issue_root.is_dir() {
            for entry in fs::read_dir(&issue_root)? {
                let entry = entry?;
                let name = entry.file_name().to_string_lossy().into_owned();
                match name.parse::<u64>() {
                    Ok(iid) if entry.path().join(ISSUE_FILE).is_file() => {
                        issues.push(ResourceRef::Issue(iid));
                    }
                    _ => {}
                }
            }
        }
        issues.sort();

        let mut branches = Vec::new();
        if self.root.is_dir() {
            collect_branches(&self.root, &self.root, &mut branches)?;
        }
        branches.sort();

        Ok(issues
            .into_iter()
            .chain(branches.into_iter().map(ResourceRef::MergeRequest))
            .collect())
    }

    /// Take the advisory lock of a resource, creating its directory.
    pub fn lock(&self, resource: &ResourceRef) -> Result<ResourceLock> {
        ResourceLock::acquire(&self.resource_dir(resource))
    }

    fn static_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}.json", name))
    }

    /// Load cached static data (`users`, `milestones`, `labels`), if fetched.
    pub fn load_static<T: DeserializeOwned>(&self, name: &str) -> Result<Option<Vec<T>>> {
        match read_optional(&self.static_path(name))? {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    pub fn store_static<T: Serialize>(&self, name: &str, items: &[T]) -> Result<PathBuf> {
        let path = self.static_path(name);
        let mut json = serde_json::to_string_pretty(items)?;
        json.push('\n');
        write_atomic(&path, &json)?;
        Ok(path)
    }
}

fn collect_branches(root: &Path, dir: &Path, out: &mut Vec<String>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if !entry.file_type()?.is_dir() {
            continue;
        }
        if dir == root && entry.file_name() == "i" {
            continue;
        }
        if path.join(TODO_FILE).is_file() || path.join(META_FILE).is_file() {
            if let Ok(relative) = path.strip_prefix(root) {
                out.push(relative.to_string_lossy().into_owned());
            }
        }
        collect_branches(root, &path, out)?;
    }
    Ok(())
}

/// Read a file, treating a missing file as `None`.
pub fn read_optional(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Replace a file's contents atomically (temporary file in the same
/// directory, synced, then renamed over the target).
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| Error::Other(format!("no parent directory for {}", path.display())))?;
    fs::create_dir_all(parent).map_err(|e| Error::persistence(parent, e))?;

    let mut tmp = NamedTempFile::new_in(parent).map_err(|e| Error::persistence(path, e))?;
    tmp.write_all(contents.as_bytes())
        .map_err(|e| Error::persistence(path, e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| Error::persistence(path, e))?;
    tmp.persist(path)
        .map_err(|e| Error::persistence(path, e.error))?;
    Ok(())
}

/// Remove a file if it exists.
pub fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::persistence(path, e)),
    }
}

/// Exclusive advisory lock on a resource directory, released on drop.
#[derive(Debug)]
pub struct ResourceLock {
    file: File,
    path: PathBuf,
}

impl ResourceLock {
    pub fn acquire(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir).map_err(|e| Error::persistence(dir, e))?;
        let path = dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| Error::persistence(&path, e))?;
        FileExt::lock_exclusive(&file).map_err(|e| Error::persistence(&path, e))?;
        tracing::debug!(lock = %path.display(), "acquired resource lock");
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ResourceLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::User;
    use tempfile::TempDir;

    #[test]
    fn test_write_atomic_replaces_contents() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a/b/file.gl");
        write_atomic(&path, "one\n").unwrap();
        write_atomic(&path, "two\n").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "two\n");

        let leftovers: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name() != "file.gl")
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_read_optional_missing() {
        let temp = TempDir::new().unwrap();
        assert_eq!(read_optional(&temp.path().join("nope")).unwrap(), None);
    }

    #[test]
    fn test_resource_paths() {
        let ws = Workspace::new(Path::new("/repo"));
        assert_eq!(ws.issue_file(3), PathBuf::from("/repo/gl/i/3/comments.gl"));
        let files = ws.merge_request_files("feature/x");
        assert_eq!(files.todo, PathBuf::from("/repo/gl/feature/x/todo.gl"));
        assert_eq!(files.review, PathBuf::from("/repo/gl/feature/x/review.gl"));
    }

    #[test]
    fn test_resource_for_path() {
        let ws = Workspace::new(Path::new("/repo"));
        assert_eq!(
            ws.resource_for_path(Path::new("/repo/gl/i/12/comments.gl")),
            Some(ResourceRef::Issue(12))
        );
        assert_eq!(
            ws.resource_for_path(Path::new("/repo/gl/feature/x/todo.gl")),
            Some(ResourceRef::MergeRequest("feature/x".to_string()))
        );
        assert_eq!(
            ws.resource_for_path(Path::new("/repo/gl/topic")),
            Some(ResourceRef::MergeRequest("topic".to_string()))
        );
        assert_eq!(ws.resource_for_path(Path::new("/elsewhere/x.gl")), None);
        assert_eq!(ws.resource_for_path(Path::new("/repo/gl/../etc/todo.gl")), None);
    }

    #[test]
    fn test_list_resources() {
        let temp = TempDir::new().unwrap();
        let ws = Workspace::new(temp.path());
        write_atomic(&ws.issue_file(7), "𑁍\n").unwrap();
        write_atomic(&ws.merge_request_files("feature/x").todo, "𑁍\n").unwrap();
        write_atomic(&ws.merge_request_files("topic").meta, "t\n\n\n𑁍 labels: \n\n").unwrap();
        fs::create_dir_all(ws.root().join("empty")).unwrap();

        assert_eq!(
            ws.list_resources().unwrap(),
            vec![
                ResourceRef::Issue(7),
                ResourceRef::MergeRequest("feature/x".to_string()),
                ResourceRef::MergeRequest("topic".to_string()),
            ]
        );
    }

    #[test]
    fn test_static_data_round_trip() {
        let temp = TempDir::new().unwrap();
        let ws = Workspace::new(temp.path());
        assert!(ws.load_static::<User>("users").unwrap().is_none());

        let users = vec![User {
            id: 1,
            username: "root".to_string(),
            name: "Administrator".to_string(),
        }];
        ws.store_static("users", &users).unwrap();
        assert_eq!(ws.load_static::<User>("users").unwrap(), Some(users));
    }

    #[test]
    fn test_lock_creates_directory() {
        let temp = TempDir::new().unwrap();
        let ws = Workspace::new(temp.path());
        let resource = ResourceRef::MergeRequest("topic".to_string());
        let lock = ws.lock(&resource).unwrap();
        assert!(lock.path().exists());
        drop(lock);
        // Re-acquiring after release must not block.
        ws.lock(&resource).unwrap();
    }
}
