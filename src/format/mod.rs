//! Plain-text codec for thread files.
//!
//! A thread file holds a list of threads and, after a lone sentinel line,
//! any number of new threads typed in by the user. Issue files and `meta.gl`
//! start with a header (title, description, metadata fields):
//!
//! ```text
//! Fix the frobnicator
//!
//! The frobnicator is broken.
//! 𑁍 assignees: alice
//! 𑁍 milestone: v1
//! 𑁍 labels: bug
//!
//! src/frob.rs:12: 6a9c1750b37d513a43987b574953fceb50b03ce7
//!  fn frob() {
//! +    panic!();
//! 	[bob] Why panic here?
//! 	[1126] Placeholder, will fix.
//! 		Promise.
//!
//! 𑁍
//! ```
//!
//! Parsing never fails: text that fits no rule is kept literally, either
//! as preamble or as part of the nearest comment.

pub mod review;

use regex::Regex;
use std::sync::OnceLock;

/// Marker character for metadata lines, sentinels and review drafts.
pub const MARKER: char = '𑁍';

/// Lone sentinel line after which new threads may be written.
pub const SENTINEL: &str = "𑁍";

/// Line under one of your own notes asking for it to be deleted.
pub const DELETE_DIRECTIVE: &str = "!!!delete";

/// Line in any merge request thread asking for the merge request to be merged.
pub const MERGE_DIRECTIVE: &str = "!!!merge";

/// Parsed form of a thread file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resource {
    /// Title/description/metadata, present in issue files and `meta.gl`
    pub header: Option<Header>,
    /// Unclassified lines before the first thread, kept verbatim
    pub preamble: Vec<String>,
    /// Threads known to the forge, in file order
    pub threads: Vec<Thread>,
    /// Threads written after the sentinel, not yet submitted
    pub new_threads: Vec<Thread>,
}

/// Title, description and `key: value` metadata of an issue or merge request.
///
/// A header always carries at least one field; the first metadata line is
/// what marks the end of the description.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Header {
    pub title: String,
    pub description: String,
    pub fields: Vec<(String, String)>,
}

impl Header {
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Thread identity.
///
/// Placeholder ids are local to one parse and never collide with forge ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ThreadId {
    Remote(String),
    Placeholder(u32),
}

impl ThreadId {
    pub fn as_remote(&self) -> Option<&str> {
        match self {
            Self::Remote(id) => Some(id),
            Self::Placeholder(_) => None,
        }
    }
}

impl std::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Remote(id) => write!(f, "{}", id),
            Self::Placeholder(n) => write!(f, "new thread {}", n),
        }
    }
}

/// Diff location shown in a thread header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Anchor {
    pub path: String,
    pub line: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thread {
    pub id: ThreadId,
    pub anchor: Option<Anchor>,
    /// Explicit `r`/`u` toggle written in the file.
    ///
    /// `None` means the thread keeps the state implied by the file holding it.
    pub resolved: Option<bool>,
    /// Diff lines shown under an anchored header; never edited
    pub context: Vec<String>,
    pub comments: Vec<Comment>,
    /// Own notes marked with [`DELETE_DIRECTIVE`]
    pub deleted: Vec<u64>,
    /// Holds a [`MERGE_DIRECTIVE`] line
    pub merge: bool,
}

impl Thread {
    /// A thread with no anchor and no comments.
    pub fn new(id: ThreadId) -> Self {
        Self {
            id,
            anchor: None,
            resolved: None,
            context: Vec::new(),
            comments: Vec::new(),
            deleted: Vec::new(),
            merge: false,
        }
    }

    pub fn comment_by_note(&self, note_id: u64) -> Option<&Comment> {
        self.comments
            .iter()
            .find(|c| c.label == Label::Note(note_id))
    }
}

/// Bracketed prefix of a comment line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Label {
    /// `[1126]` - written by the configured user; the note id is known
    Note(u64),
    /// `[alice]` - written by someone else
    Author(String),
    /// No prefix: typed locally, not yet submitted
    Pending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comment {
    pub label: Label,
    pub body: String,
}

impl Comment {
    pub fn pending(body: impl Into<String>) -> Self {
        Self {
            label: Label::Pending,
            body: body.into(),
        }
    }
}

impl Resource {
    pub fn thread(&self, id: &str) -> Option<&Thread> {
        self.threads
            .iter()
            .find(|t| t.id.as_remote() == Some(id))
    }

    pub fn thread_mut(&mut self, id: &str) -> Option<&mut Thread> {
        self.threads
            .iter_mut()
            .find(|t| t.id.as_remote() == Some(id))
    }
}

fn thread_header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:(.+):(\d+): )?([0-9a-f]{40})$").expect("valid thread header regex")
    })
}

fn comment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\t\[([^\]\t]+)\] ?(.*)$").expect("valid comment regex"))
}

fn field_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^𑁍 +([A-Za-z_]+): ?(.*)$").expect("valid field regex"))
}

fn is_sentinel(line: &str) -> bool {
    line.trim_end() == SENTINEL
}

fn parse_thread_header(line: &str) -> Option<(Option<Anchor>, String)> {
    let caps = thread_header_re().captures(line)?;
    let anchor = match (caps.get(1), caps.get(2)) {
        (Some(path), Some(l)) => Some(Anchor {
            path: path.as_str().to_string(),
            line: l.as_str().parse().ok()?,
        }),
        _ => None,
    };
    Some((anchor, caps[3].to_string()))
}

fn parse_field(line: &str) -> Option<(String, String)> {
    let caps = field_re().captures(line)?;
    Some((caps[1].to_string(), caps[2].to_string()))
}

fn parse_label(raw: &str) -> Label {
    match raw.parse::<u64>() {
        Ok(id) => Label::Note(id),
        Err(_) => Label::Author(raw.to_string()),
    }
}

fn is_context_line(line: &str) -> bool {
    line.starts_with([' ', '+', '-'])
}

fn toggle(line: &str) -> Option<bool> {
    match line {
        "r" => Some(true),
        "u" => Some(false),
        _ => None,
    }
}

fn trim_trailing_blank_lines(lines: &mut Vec<String>) {
    while lines.last().is_some_and(|l| l.trim().is_empty()) {
        lines.pop();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Context,
    Comments,
    Pending,
}

/// Thread under construction.
struct OpenThread {
    thread: Thread,
    state: State,
    /// Blank lines seen in the comment region, not yet attributed
    blanks: usize,
    pending: Vec<String>,
}

impl OpenThread {
    fn new(id: String, anchor: Option<Anchor>) -> Self {
        let state = if anchor.is_some() {
            State::Context
        } else {
            State::Comments
        };
        Self {
            thread: Thread {
                anchor,
                ..Thread::new(ThreadId::Remote(id))
            },
            state,
            blanks: 0,
            pending: Vec::new(),
        }
    }

    fn push_line(&mut self, line: &str) {
        if let Some(resolved) = toggle(line) {
            self.thread.resolved = Some(resolved);
            return;
        }
        if line == MERGE_DIRECTIVE {
            self.thread.merge = true;
            return;
        }
        if line == DELETE_DIRECTIVE {
            match self.thread.comments.last().map(|c| &c.label) {
                Some(Label::Note(id)) => {
                    if !self.thread.deleted.contains(id) {
                        self.thread.deleted.push(*id);
                    }
                }
                _ => tracing::warn!(
                    thread = %self.thread.id,
                    "{} only applies below one of your own notes; ignoring it",
                    DELETE_DIRECTIVE
                ),
            }
            return;
        }

        if self.state == State::Context {
            if is_context_line(line) {
                self.thread.context.push(line.to_string());
                return;
            }
            self.state = State::Comments;
        }

        if self.state == State::Pending {
            self.pending.push(line.to_string());
            return;
        }

        if line.is_empty() {
            self.blanks += 1;
            return;
        }

        if let Some(caps) = comment_re().captures(line) {
            self.flush_blanks();
            self.thread.comments.push(Comment {
                label: parse_label(&caps[1]),
                body: caps[2].to_string(),
            });
        } else if let Some(rest) = line.strip_prefix('\t') {
            let rest = rest.strip_prefix('\t').unwrap_or(rest);
            self.flush_blanks();
            match self.thread.comments.last_mut() {
                Some(comment) => {
                    comment.body.push('\n');
                    comment.body.push_str(rest);
                }
                None => self.thread.comments.push(Comment::pending(rest)),
            }
        } else {
            self.blanks = 0;
            self.state = State::Pending;
            self.pending.push(line.to_string());
        }
    }

    /// Blank lines followed by more comment text belong to the last comment.
    fn flush_blanks(&mut self) {
        if let Some(comment) = self.thread.comments.last_mut() {
            for _ in 0..self.blanks {
                comment.body.push('\n');
            }
        }
        self.blanks = 0;
    }

    fn finish(mut self) -> Thread {
        trim_trailing_blank_lines(&mut self.pending);
        if !self.pending.is_empty() {
            self.thread
                .comments
                .push(Comment::pending(self.pending.join("\n")));
        }
        self.thread
    }
}

/// Read the header block, returning it and the index of the first line after it.
///
/// The title is the first line and an optional blank line follows it. The
/// description runs up to the first line starting with [`MARKER`], whatever
/// it looks like, and the metadata fields follow. Without any marker line
/// there is no header.
fn parse_header(lines: &[&str]) -> (Option<Header>, usize) {
    let Some(first_marker) = lines.iter().skip(1).position(|l| l.starts_with(MARKER)) else {
        return (None, 0);
    };
    let first_marker = first_marker + 1;

    let title = lines[0].to_string();
    let desc_start = if first_marker >= 2 && lines[1].is_empty() {
        2
    } else {
        1
    };
    let description = lines[desc_start..first_marker].join("\n");

    let mut fields = Vec::new();
    let mut i = first_marker;
    while i < lines.len() {
        match parse_field(lines[i]) {
            Some(field) => fields.push(field),
            None => break,
        }
        i += 1;
    }
    if i < lines.len() && lines[i].is_empty() {
        i += 1;
    }

    (
        Some(Header {
            title,
            description,
            fields,
        }),
        i,
    )
}

/// Parse a thread file without a header (`todo.gl`, `resolved.gl`). Never fails.
pub fn parse(text: &str) -> Resource {
    let lines: Vec<&str> = text.lines().collect();
    parse_body(&lines, Resource::default())
}

/// Parse a file that starts with a title, description and metadata: an issue
/// file or `meta.gl`. Never fails.
pub fn parse_with_header(text: &str) -> Resource {
    let lines: Vec<&str> = text.lines().collect();
    let (header, start) = parse_header(&lines);
    parse_body(
        &lines[start..],
        Resource {
            header,
            ..Resource::default()
        },
    )
}

fn parse_body(lines: &[&str], mut resource: Resource) -> Resource {
    let mut current: Option<OpenThread> = None;
    let mut new_thread_lines: Option<Vec<Vec<String>>> = None;

    for line in lines {
        if let Some(bodies) = new_thread_lines.as_mut() {
            if is_sentinel(line) {
                bodies.push(Vec::new());
            } else {
                if bodies.is_empty() {
                    bodies.push(Vec::new());
                }
                if let Some(body) = bodies.last_mut() {
                    body.push(line.to_string());
                }
            }
            continue;
        }

        if is_sentinel(line) {
            if let Some(open) = current.take() {
                resource.threads.push(open.finish());
            }
            new_thread_lines = Some(Vec::new());
            continue;
        }

        if let Some((anchor, id)) = parse_thread_header(line) {
            if let Some(open) = current.take() {
                resource.threads.push(open.finish());
            }
            current = Some(OpenThread::new(id, anchor));
            continue;
        }

        match current.as_mut() {
            Some(open) => open.push_line(line),
            None => resource.preamble.push(line.to_string()),
        }
    }

    if let Some(open) = current.take() {
        resource.threads.push(open.finish());
    }

    for (n, mut body) in new_thread_lines.unwrap_or_default().into_iter().enumerate() {
        trim_trailing_blank_lines(&mut body);
        let mut thread = Thread::new(ThreadId::Placeholder(n as u32 + 1));
        thread.comments.push(Comment::pending(body.join("\n")));
        resource.new_threads.push(thread);
    }

    resource
}

fn write_header(out: &mut String, header: &Header) {
    out.push_str(&header.title);
    out.push_str("\n\n");
    out.push_str(&header.description);
    out.push('\n');
    for (key, value) in &header.fields {
        out.push_str(&format!("{} {}: {}\n", MARKER, key, value));
    }
    out.push('\n');
}

fn write_comment(out: &mut String, comment: &Comment) {
    let label = match &comment.label {
        Label::Note(id) => id.to_string(),
        Label::Author(name) => name.clone(),
        Label::Pending => {
            for line in comment.body.split('\n') {
                out.push_str(line);
                out.push('\n');
            }
            return;
        }
    };

    let mut lines = comment.body.split('\n');
    out.push_str(&format!("\t[{}] {}\n", label, lines.next().unwrap_or_default()));
    for line in lines {
        out.push_str("\t\t");
        out.push_str(line);
        out.push('\n');
    }
}

fn write_thread(out: &mut String, thread: &Thread) {
    if let Some(anchor) = &thread.anchor {
        out.push_str(&format!("{}:{}: ", anchor.path, anchor.line));
    }
    out.push_str(&thread.id.to_string());
    out.push('\n');
    for line in &thread.context {
        out.push_str(line);
        out.push('\n');
    }
    for comment in &thread.comments {
        write_comment(out, comment);
        if let Label::Note(id) = comment.label {
            if thread.deleted.contains(&id) {
                out.push_str(DELETE_DIRECTIVE);
                out.push('\n');
            }
        }
    }
    match thread.resolved {
        Some(true) => out.push_str("r\n"),
        Some(false) => out.push_str("u\n"),
        None => {}
    }
    if thread.merge {
        out.push_str(MERGE_DIRECTIVE);
        out.push('\n');
    }
    out.push('\n');
}

/// Serialize a resource. Equal models always produce identical text.
pub fn serialize(resource: &Resource) -> String {
    let mut out = String::new();
    if let Some(header) = &resource.header {
        write_header(&mut out, header);
    }
    for line in &resource.preamble {
        out.push_str(line);
        out.push('\n');
    }
    for thread in &resource.threads {
        write_thread(&mut out, thread);
    }
    out.push_str(SENTINEL);
    out.push('\n');
    for (i, thread) in resource.new_threads.iter().enumerate() {
        if i > 0 {
            out.push_str(SENTINEL);
            out.push('\n');
        }
        let body = thread
            .comments
            .first()
            .map(|c| c.body.as_str())
            .unwrap_or_default();
        for line in body.split('\n') {
            out.push_str(line);
            out.push('\n');
        }
    }
    out
}

/// Find the first merge-conflict region, returning the 1-based line of its
/// opening marker.
///
/// A region is a `<<<<<<< ` line later followed by `=======` and a
/// `>>>>>>> ` line; a lone `=======` (a Markdown heading underline) is not one.
pub fn find_conflict_marker(text: &str) -> Option<usize> {
    let lines: Vec<&str> = text.lines().collect();
    lines.iter().enumerate().find_map(|(i, line)| {
        if !line.starts_with("<<<<<<< ") {
            return None;
        }
        let rest = &lines[i + 1..];
        let sep = rest.iter().position(|l| *l == "=======")?;
        rest[sep + 1..]
            .iter()
            .any(|l| l.starts_with(">>>>>>> "))
            .then_some(i + 1)
    })
}
