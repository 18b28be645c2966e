//! Codec for the review-draft file (`review.gl`).
//!
//! Each draft starts with a header naming the commit and diff line it is
//! anchored to, followed by the diff context and the comment body:
//!
//! ```text
//! 𑁍 1f0c2d3e4b5a69788796a5b4c3d2e1f001234567 src/lib.rs:27 + 25 3
//!  fn main() {
//! -    old();
//! +    new();
//! Why not keep old()?
//!
//! ```

use super::MARKER;
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

/// Which side of the diff a draft line belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineMarker {
    Added,
    Removed,
    Context,
}

impl LineMarker {
    pub fn as_char(self) -> char {
        match self {
            Self::Added => '+',
            Self::Removed => '-',
            Self::Context => ' ',
        }
    }

    pub fn from_char(c: char) -> Option<Self> {
        match c {
            '+' => Some(Self::Added),
            '-' => Some(Self::Removed),
            ' ' => Some(Self::Context),
            _ => None,
        }
    }

    /// Parse a command-line marker: `+`, `-`, a space, or a word starting with one.
    pub fn parse_arg(arg: &str) -> Option<Self> {
        match arg {
            "" | "context" => Some(Self::Context),
            "added" => Some(Self::Added),
            "removed" => Some(Self::Removed),
            _ => arg.chars().next().and_then(Self::from_char),
        }
    }
}

impl fmt::Display for LineMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// A staged review comment anchored to one line of a commit's diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftEntry {
    pub commit: String,
    pub path: String,
    pub new_line: u64,
    pub marker: LineMarker,
    pub old_line: u64,
    pub context: Vec<String>,
    pub body: String,
}

impl DraftEntry {
    pub fn header_line(&self) -> String {
        format!(
            "{} {} {}:{} {} {} {}",
            MARKER,
            self.commit,
            self.path,
            self.new_line,
            self.marker,
            self.old_line,
            self.context.len()
        )
    }

    /// Drafts whose body is still blank are kept but never submitted.
    pub fn is_ready(&self) -> bool {
        !self.body.trim().is_empty()
    }
}

/// Parsed `review.gl`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReviewFile {
    /// Lines before the first draft header, kept verbatim
    pub preamble: Vec<String>,
    pub entries: Vec<DraftEntry>,
}

fn header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^𑁍 (\S+) (.+):(\d+) ([ +-]) (\d+)(?: (\d+))?$").expect("valid draft header regex")
    })
}

fn parse_header(line: &str) -> Option<(DraftEntry, Option<usize>)> {
    let caps = header_re().captures(line)?;
    let marker = caps[4].chars().next().and_then(LineMarker::from_char)?;
    let entry = DraftEntry {
        commit: caps[1].to_string(),
        path: caps[2].to_string(),
        new_line: caps[3].parse().ok()?,
        marker,
        old_line: caps[5].parse().ok()?,
        context: Vec::new(),
        body: String::new(),
    };
    let count = caps.get(6).and_then(|m| m.as_str().parse().ok());
    Some((entry, count))
}

fn finish(entry: &mut DraftEntry, mut body: Vec<&str>) {
    while body.last().is_some_and(|l| l.trim().is_empty()) {
        body.pop();
    }
    entry.body = body.join("\n");
}

/// Parse a review file. Never fails; unrecognized leading lines become preamble.
pub fn parse(text: &str) -> ReviewFile {
    let mut file = ReviewFile::default();
    let mut lines = text.lines().peekable();

    while let Some(line) = lines.next() {
        let Some((mut entry, count)) = parse_header(line) else {
            file.preamble.push(line.to_string());
            continue;
        };

        // Context: exactly `count` diff lines, or any run of them in the
        // count-less header form.
        let mut taken = 0;
        while let Some(next) = lines.peek() {
            let is_diff = next.starts_with([' ', '+', '-']);
            if !is_diff || count.is_some_and(|c| taken >= c) {
                break;
            }
            entry.context.push(next.to_string());
            lines.next();
            taken += 1;
        }

        let mut body = Vec::new();
        while let Some(next) = lines.peek() {
            if parse_header(next).is_some() {
                break;
            }
            body.push(*next);
            lines.next();
        }
        finish(&mut entry, body);
        file.entries.push(entry);
    }

    file
}

/// Serialize a single draft, including its trailing blank separator.
pub fn serialize_entry(entry: &DraftEntry) -> String {
    let mut out = entry.header_line();
    out.push('\n');
    for line in &entry.context {
        out.push_str(line);
        out.push('\n');
    }
    out.push_str(&entry.body);
    out.push_str("\n\n");
    out
}

pub fn serialize(file: &ReviewFile) -> String {
    let mut out = String::new();
    for line in &file.preamble {
        out.push_str(line);
        out.push('\n');
    }
    for entry in &file.entries {
        out.push_str(&serialize_entry(entry));
    }
    out
}
