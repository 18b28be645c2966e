//! Diff context for review drafts and diff-anchored threads.
//!
//! Diffs are requested with effectively unlimited context, so the single
//! hunk of a file covers the whole file and any line can be located by its
//! old or new line number.

use crate::format::review::{DraftEntry, LineMarker, serialize_entry};
use crate::git::Vcs;
use crate::storage::{read_optional, write_atomic};
use crate::{Error, Result};
use std::path::Path;

/// Default number of diff lines shown above (and including) a target line.
pub const DEFAULT_CONTEXT_LINES: usize = 5;

/// One line of a unified diff hunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffLine {
    pub marker: LineMarker,
    pub text: String,
    pub old_line: Option<u64>,
    pub new_line: Option<u64>,
}

impl DiffLine {
    /// The line as shown in a diff, prefix included.
    pub fn render(&self) -> String {
        format!("{}{}", self.marker, self.text)
    }
}

/// Diff of a single file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileDiff {
    pub old_path: Option<String>,
    pub new_path: Option<String>,
    pub hunks: Vec<Vec<DiffLine>>,
}

impl FileDiff {
    fn matches(&self, path: &str) -> bool {
        self.new_path.as_deref() == Some(path) || self.old_path.as_deref() == Some(path)
    }
}

fn strip_path(raw: &str) -> Option<String> {
    let raw = raw.split('\t').next().unwrap_or_default();
    match raw {
        "/dev/null" => None,
        _ => Some(
            raw.strip_prefix("a/")
                .or_else(|| raw.strip_prefix("b/"))
                .unwrap_or(raw)
                .to_string(),
        ),
    }
}

/// Parse `@@ -a[,b] +c[,d] @@` into the starting old and new line numbers.
fn parse_hunk_header(line: &str) -> Option<(u64, u64)> {
    let rest = line.strip_prefix("@@ -")?;
    let (old, rest) = rest.split_once(" +")?;
    let (new, _) = rest.split_once(" @@")?;
    let start = |range: &str| range.split(',').next()?.parse::<u64>().ok();
    Some((start(old)?, start(new)?))
}

/// Parse the output of `git diff` into per-file hunks.
pub fn parse_unified_diff(diff: &str) -> Vec<FileDiff> {
    let mut files: Vec<FileDiff> = Vec::new();
    let mut old_no = 0;
    let mut new_no = 0;
    let mut in_hunk = false;

    for line in diff.lines() {
        if line.starts_with("diff --git ") {
            files.push(FileDiff::default());
            in_hunk = false;
            continue;
        }
        if !in_hunk {
            if let Some(path) = line.strip_prefix("--- ") {
                if files.is_empty() {
                    files.push(FileDiff::default());
                }
                if let Some(file) = files.last_mut() {
                    file.old_path = strip_path(path);
                }
                continue;
            }
            if let Some(path) = line.strip_prefix("+++ ") {
                if let Some(file) = files.last_mut() {
                    file.new_path = strip_path(path);
                }
                continue;
            }
        }
        if let Some((old_start, new_start)) = parse_hunk_header(line) {
            if let Some(file) = files.last_mut() {
                file.hunks.push(Vec::new());
            }
            old_no = old_start;
            new_no = new_start;
            in_hunk = true;
            continue;
        }
        if !in_hunk {
            continue;
        }
        let Some(marker) = line.chars().next().and_then(LineMarker::from_char) else {
            // "\ No newline at end of file"
            continue;
        };
        let (old_line, new_line) = match marker {
            LineMarker::Context => {
                old_no += 1;
                new_no += 1;
                (Some(old_no - 1), Some(new_no - 1))
            }
            LineMarker::Removed => {
                old_no += 1;
                (Some(old_no - 1), None)
            }
            LineMarker::Added => {
                new_no += 1;
                (None, Some(new_no - 1))
            }
        };
        if let Some(hunk) = files.last_mut().and_then(|f| f.hunks.last_mut()) {
            hunk.push(DiffLine {
                marker,
                text: line[1..].to_string(),
                old_line,
                new_line,
            });
        }
    }

    files
}

/// Line of a commit diff that a review comment refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetLine {
    pub marker: LineMarker,
    pub old_line: u64,
    pub new_line: u64,
}

impl TargetLine {
    fn matches(&self, line: &DiffLine) -> bool {
        if line.marker != self.marker {
            return false;
        }
        match self.marker {
            LineMarker::Removed => line.old_line == Some(self.old_line),
            _ => line.new_line == Some(self.new_line),
        }
    }
}

fn last_lines(lines: &[&DiffLine], end: usize, count: usize) -> Vec<String> {
    let start = (end + 1).saturating_sub(count.max(1));
    lines[start..=end].iter().map(|l| l.render()).collect()
}

/// Up to `count` diff lines ending at `target`, prefixes preserved.
pub fn extract_context(diff: &str, path: &str, target: &TargetLine, count: usize) -> Result<Vec<String>> {
    let files = parse_unified_diff(diff);
    for file in files.iter().filter(|f| f.matches(path)) {
        for hunk in &file.hunks {
            let lines: Vec<&DiffLine> = hunk.iter().collect();
            if let Some(end) = lines.iter().position(|l| target.matches(l)) {
                return Ok(last_lines(&lines, end, count));
            }
        }
    }
    Err(Error::NotFound(format!(
        "line {}:{} ({} {}) in the diff",
        path,
        target.new_line,
        target.marker,
        target.old_line
    )))
}

/// Context of a diff-anchored thread: `count` lines of one side of the diff
/// ending at the anchored line (new side unless only an old line is known).
pub fn side_context(
    diff: &str,
    path: &str,
    old_line: Option<u64>,
    new_line: Option<u64>,
    count: usize,
) -> Option<Vec<String>> {
    let files = parse_unified_diff(diff);
    let file = files.iter().find(|f| f.matches(path))?;
    for hunk in &file.hunks {
        let side: Vec<&DiffLine> = match (new_line, old_line) {
            (Some(_), _) => hunk.iter().filter(|l| l.new_line.is_some()).collect(),
            (None, Some(_)) => hunk.iter().filter(|l| l.old_line.is_some()).collect(),
            (None, None) => return None,
        };
        let end = side.iter().position(|l| match new_line {
            Some(n) => l.new_line == Some(n),
            None => l.old_line == old_line,
        });
        if let Some(end) = end {
            return Some(last_lines(&side, end, count));
        }
    }
    None
}

/// Where the editor should place the cursor for a fresh draft.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DraftLocation {
    /// 1-based line of the empty body line
    pub line: usize,
    /// Byte offset of the empty body line
    pub offset: usize,
}

/// Builds review drafts from commit diffs.
pub struct DiffContextBuilder<'a> {
    vcs: &'a dyn Vcs,
    context_lines: usize,
}

impl<'a> DiffContextBuilder<'a> {
    pub fn new(vcs: &'a dyn Vcs, context_lines: usize) -> Self {
        Self { vcs, context_lines }
    }

    /// Draft entry for a line of the diff `commit` introduced in `path`.
    pub fn build(&self, commit: &str, path: &str, target: TargetLine) -> Result<DraftEntry> {
        self.vcs.ensure_commit(commit)?;
        let commit = self.vcs.resolve_ref(commit)?;
        let diff = self.vcs.diff_for_commit(&commit, path)?;
        let context = extract_context(&diff, path, &target, self.context_lines)?;
        Ok(DraftEntry {
            commit,
            path: path.to_string(),
            new_line: target.new_line,
            marker: target.marker,
            old_line: target.old_line,
            context,
            body: String::new(),
        })
    }

    /// Build a draft and append it to the review file.
    pub fn append(
        &self,
        review_file: &Path,
        commit: &str,
        path: &str,
        target: TargetLine,
    ) -> Result<(DraftEntry, DraftLocation)> {
        let entry = self.build(commit, path, target)?;
        let location = append_draft(review_file, &entry)?;
        Ok((entry, location))
    }
}

/// Append a draft to a review file without reformatting existing text.
pub fn append_draft(review_file: &Path, entry: &DraftEntry) -> Result<DraftLocation> {
    let mut text = read_optional(review_file)?.unwrap_or_default();
    if !text.is_empty() && !text.ends_with('\n') {
        text.push('\n');
    }

    let existing_lines = text.lines().count();
    let header_and_context: usize = entry.header_line().len()
        + 1
        + entry.context.iter().map(|l| l.len() + 1).sum::<usize>();
    let location = DraftLocation {
        line: existing_lines + 1 + entry.context.len() + 1,
        offset: text.len() + header_and_context,
    };

    text.push_str(&serialize_entry(&DraftEntry {
        body: String::new(),
        ..entry.clone()
    }));
    write_atomic(review_file, &text)?;
    tracing::debug!(file = %review_file.display(), line = location.line, "appended review draft");
    Ok(location)
}
