//! Three-way merge of working files with freshly fetched remote text.
//!
//! The working file is "mine", its snapshot is the common ancestor and the
//! newly serialized remote text is "theirs". After every sync the snapshot
//! holds the remote text, never the merge result.

use crate::format::find_conflict_marker;
use crate::storage::{SnapshotStore, read_optional, write_atomic};
use crate::{Error, Result};
use std::fs;
use std::path::Path;
use std::process::Command;

/// Result of a line-based three-way merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    pub text: String,
    /// Number of conflict regions left in `text`
    pub conflicts: usize,
}

impl MergeOutcome {
    pub fn has_conflicts(&self) -> bool {
        self.conflicts > 0
    }
}

/// Line-based three-way text merge.
pub trait TextMerger {
    fn merge(&self, mine: &str, ancestor: &str, theirs: &str) -> Result<MergeOutcome>;
}

/// [`TextMerger`] backed by `git merge-file`.
#[derive(Debug, Clone, Copy, Default)]
pub struct GitMergeFile;

impl TextMerger for GitMergeFile {
    fn merge(&self, mine: &str, ancestor: &str, theirs: &str) -> Result<MergeOutcome> {
        let dir = tempfile::Builder::new().prefix("gl-merge").tempdir()?;
        let paths = [
            dir.path().join("working"),
            dir.path().join("snapshot"),
            dir.path().join("remote"),
        ];
        for (path, text) in paths.iter().zip([mine, ancestor, theirs]) {
            fs::write(path, text)?;
        }

        let output = Command::new("git")
            .args(["merge-file", "-p", "-L", "working", "-L", "snapshot", "-L", "remote"])
            .args(&paths)
            .output()
            .map_err(|e| Error::Git(format!("failed to run git merge-file: {}", e)))?;

        // Exit status is the number of conflicts; negative (>127) means failure.
        match output.status.code() {
            Some(code) if (0..=127).contains(&code) => Ok(MergeOutcome {
                text: String::from_utf8_lossy(&output.stdout).into_owned(),
                conflicts: code as usize,
            }),
            _ => Err(Error::Git(format!(
                "git merge-file failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ))),
        }
    }
}

/// What a sync did to a working file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// No working file existed; it was created from the remote text
    Created,
    /// Remote unchanged since the last fetch; working file untouched
    Unchanged,
    /// No local edits; working file replaced by the remote text
    FastForward,
    /// Local edits and remote changes merged cleanly
    Merged,
    /// Conflict markers were written, starting at this line
    Conflicted { line: usize },
}

/// Reconciles working files with remote text through their snapshots.
pub struct MergeEngine<'a> {
    merger: &'a dyn TextMerger,
    snapshots: SnapshotStore,
}

impl<'a> MergeEngine<'a> {
    pub fn new(merger: &'a dyn TextMerger) -> Self {
        Self {
            merger,
            snapshots: SnapshotStore,
        }
    }

    /// Bring one working file up to date with `remote`.
    ///
    /// Fails with [`Error::Conflict`] if the working file still carries
    /// markers from an earlier conflicted merge.
    pub fn sync_file(&self, working: &Path, remote: &str) -> Result<SyncOutcome> {
        let Some(local) = read_optional(working)? else {
            write_atomic(working, remote)?;
            self.snapshots.put(working, remote)?;
            return Ok(SyncOutcome::Created);
        };

        ensure_no_conflicts(working, &local)?;

        let base = self.snapshots.get(working)?.unwrap_or_default();
        if base == remote {
            return Ok(SyncOutcome::Unchanged);
        }

        let outcome = if local == base || local == remote {
            write_atomic(working, remote)?;
            SyncOutcome::FastForward
        } else {
            let merged = self.merger.merge(&local, &base, remote)?;
            write_atomic(working, &merged.text)?;
            if merged.has_conflicts() {
                let line = find_conflict_marker(&merged.text).unwrap_or(1);
                tracing::warn!(file = %working.display(), line, "merge left conflict markers");
                SyncOutcome::Conflicted { line }
            } else {
                SyncOutcome::Merged
            }
        };

        self.snapshots.put(working, remote)?;
        tracing::debug!(file = %working.display(), ?outcome, "synced working file");
        Ok(outcome)
    }
}

/// Refuse to touch a file that still has unresolved conflict markers.
pub fn ensure_no_conflicts(path: &Path, text: &str) -> Result<()> {
    match find_conflict_marker(text) {
        Some(line) => Err(Error::Conflict {
            path: path.to_path_buf(),
            line,
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use tempfile::TempDir;

    /// Records its inputs and returns a canned outcome.
    struct FakeMerger {
        outcome: MergeOutcome,
        calls: RefCell<Vec<(String, String, String)>>,
    }

    impl FakeMerger {
        fn new(text: &str, conflicts: usize) -> Self {
            Self {
                outcome: MergeOutcome {
                    text: text.to_string(),
                    conflicts,
                },
                calls: RefCell::new(Vec::new()),
            }
        }
    }

    impl TextMerger for FakeMerger {
        fn merge(&self, mine: &str, ancestor: &str, theirs: &str) -> Result<MergeOutcome> {
            self.calls
                .borrow_mut()
                .push((mine.to_string(), ancestor.to_string(), theirs.to_string()));
            Ok(self.outcome.clone())
        }
    }

    fn setup() -> (TempDir, std::path::PathBuf) {
        let temp = TempDir::new().unwrap();
        let working = temp.path().join("topic/todo.gl");
        (temp, working)
    }

    #[test]
    fn test_first_fetch_creates_file_and_snapshot() {
        let (_temp, working) = setup();
        let merger = FakeMerger::new("", 0);
        let engine = MergeEngine::new(&merger);

        assert_eq!(engine.sync_file(&working, "remote\n").unwrap(), SyncOutcome::Created);
        assert_eq!(fs::read_to_string(&working).unwrap(), "remote\n");
        assert_eq!(SnapshotStore.get(&working).unwrap().as_deref(), Some("remote\n"));
        assert!(merger.calls.borrow().is_empty());
    }

    #[test]
    fn test_unchanged_remote_keeps_local_edits() {
        let (_temp, working) = setup();
        let merger = FakeMerger::new("", 0);
        let engine = MergeEngine::new(&merger);
        engine.sync_file(&working, "base\n").unwrap();
        fs::write(&working, "base\nmy edit\n").unwrap();

        assert_eq!(engine.sync_file(&working, "base\n").unwrap(), SyncOutcome::Unchanged);
        assert_eq!(fs::read_to_string(&working).unwrap(), "base\nmy edit\n");
        assert!(merger.calls.borrow().is_empty());
    }

    #[test]
    fn test_fast_forward_without_local_edits() {
        let (_temp, working) = setup();
        let merger = FakeMerger::new("", 0);
        let engine = MergeEngine::new(&merger);
        engine.sync_file(&working, "base\n").unwrap();

        assert_eq!(engine.sync_file(&working, "new\n").unwrap(), SyncOutcome::FastForward);
        assert_eq!(fs::read_to_string(&working).unwrap(), "new\n");
        assert_eq!(SnapshotStore.get(&working).unwrap().as_deref(), Some("new\n"));
    }

    #[test]
    fn test_merge_sets_snapshot_to_remote_not_result() {
        let (_temp, working) = setup();
        let merger = FakeMerger::new("merged\n", 0);
        let engine = MergeEngine::new(&merger);
        engine.sync_file(&working, "base\n").unwrap();
        fs::write(&working, "mine\n").unwrap();

        assert_eq!(engine.sync_file(&working, "theirs\n").unwrap(), SyncOutcome::Merged);
        assert_eq!(
            merger.calls.borrow()[0],
            ("mine\n".to_string(), "base\n".to_string(), "theirs\n".to_string())
        );
        assert_eq!(fs::read_to_string(&working).unwrap(), "merged\n");
        assert_eq!(SnapshotStore.get(&working).unwrap().as_deref(), Some("theirs\n"));
    }

    #[test]
    fn test_conflict_is_written_then_refused() {
        let (_temp, working) = setup();
        let conflicted = "a\n<<<<<<< working\nx\n=======\ny\n>>>>>>> remote\n";
        let merger = FakeMerger::new(conflicted, 1);
        let engine = MergeEngine::new(&merger);
        engine.sync_file(&working, "a\nb\n").unwrap();
        fs::write(&working, "a\nx\n").unwrap();

        assert_eq!(
            engine.sync_file(&working, "a\ny\n").unwrap(),
            SyncOutcome::Conflicted { line: 2 }
        );
        assert_eq!(fs::read_to_string(&working).unwrap(), conflicted);

        let err = engine.sync_file(&working, "a\nz\n").unwrap_err();
        assert!(err.is_conflict());
    }
}
