//! Snapshot store: the remote text of each thread file as last fetched.
//!
//! The snapshot of `gl/topic/todo.gl` is `gl/topic/pristine-todo.gl`. It is
//! only ever replaced with freshly fetched remote text, never with a merge
//! result, so anything the user typed stays visible as a difference until it
//! has been submitted.

use super::{read_optional, write_atomic};
use crate::Result;
use std::path::{Path, PathBuf};

const PREFIX: &str = "pristine-";

/// Snapshots keyed by the path of their working file.
#[derive(Debug, Clone, Copy, Default)]
pub struct SnapshotStore;

impl SnapshotStore {
    pub fn path_for(working: &Path) -> PathBuf {
        let name = working
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        working.with_file_name(format!("{}{}", PREFIX, name))
    }

    /// Last fetched text for a working file, or `None` before the first fetch.
    pub fn get(&self, working: &Path) -> Result<Option<String>> {
        read_optional(&Self::path_for(working))
    }

    /// Replace the snapshot. The write is atomic.
    pub fn put(&self, working: &Path, text: &str) -> Result<()> {
        let path = Self::path_for(working);
        tracing::debug!(snapshot = %path.display(), "updating snapshot");
        write_atomic(&path, text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_path_for() {
        assert_eq!(
            SnapshotStore::path_for(Path::new("/r/gl/feature/x/todo.gl")),
            PathBuf::from("/r/gl/feature/x/pristine-todo.gl")
        );
    }

    #[test]
    fn test_get_put() {
        let temp = TempDir::new().unwrap();
        let working = temp.path().join("i/1/comments.gl");
        let store = SnapshotStore;

        assert_eq!(store.get(&working).unwrap(), None);
        store.put(&working, "first\n").unwrap();
        store.put(&working, "second\n").unwrap();
        assert_eq!(store.get(&working).unwrap().as_deref(), Some("second\n"));
        assert!(!working.exists());
    }
}
