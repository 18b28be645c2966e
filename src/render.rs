//! Turn forge data into thread-file text.
//!
//! Issues render to a single file with the metadata header on top. Merge
//! requests are split by resolution state: `meta.gl` carries the header and
//! the discussions that cannot be resolved, `todo.gl` the unresolved ones and
//! `resolved.gl` the rest.

use crate::format::{self, Anchor, Comment, Header, Label, Resource, Thread, ThreadId};
use crate::git::Vcs;
use crate::models::{Author, Discussion, DiscussionState, Note, Position, RemoteResource, User};

/// Serialized thread files of a merge request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeRequestTexts {
    pub meta: String,
    pub todo: String,
    pub resolved: String,
}

/// Renders forge discussions for one user.
pub struct Renderer<'a> {
    /// Notes by this user are labelled with their note id
    user: Option<&'a str>,
    /// Cached user directory for authors that only carry an id
    users: &'a [User],
    vcs: Option<&'a dyn Vcs>,
    context_lines: usize,
}

/// Line endings and trailing whitespace as GitLab would echo them back.
fn normalize(text: &str) -> String {
    text.replace("\r\n", "\n").trim_end().to_string()
}

fn usernames(users: &[User]) -> String {
    users
        .iter()
        .map(|u| u.username.as_str())
        .collect::<Vec<_>>()
        .join(",")
}

impl<'a> Renderer<'a> {
    pub fn new(user: Option<&'a str>, users: &'a [User], context_lines: usize) -> Self {
        Self {
            user,
            users,
            vcs: None,
            context_lines,
        }
    }

    /// Fill in diff context of anchored threads from the repository.
    pub fn with_vcs(mut self, vcs: &'a dyn Vcs) -> Self {
        self.vcs = Some(vcs);
        self
    }

    /// Metadata header: title, description and the editable fields.
    pub fn header(&self, resource: &RemoteResource) -> Header {
        let mut fields = Vec::new();
        if let Some(source) = &resource.source_branch {
            fields.push(("source_branch".to_string(), source.clone()));
            fields.push((
                "target_branch".to_string(),
                resource.target_branch.clone().unwrap_or_default(),
            ));
            fields.push(("reviewers".to_string(), usernames(&resource.reviewers)));
        }
        fields.push(("assignees".to_string(), usernames(&resource.assignees)));
        fields.push((
            "milestone".to_string(),
            resource
                .milestone
                .as_ref()
                .map(|m| m.title.clone())
                .unwrap_or_default(),
        ));
        fields.push(("labels".to_string(), resource.labels.join(",")));

        Header {
            title: resource.title.trim().to_string(),
            description: resource
                .description
                .as_deref()
                .map(normalize)
                .unwrap_or_default(),
            fields,
        }
    }

    fn label(&self, note: &Note) -> Label {
        let author = Author::from(&note.author);
        match author {
            Author::ByName(name) if Some(name.as_str()) == self.user => Label::Note(note.id),
            Author::ByName(name) => Label::Author(name),
            Author::ById(id) => {
                let known = id
                    .parse::<u64>()
                    .ok()
                    .and_then(|id| self.users.iter().find(|u| u.id == id));
                match known {
                    Some(user) if Some(user.username.as_str()) == self.user => Label::Note(note.id),
                    Some(user) => Label::Author(user.username.clone()),
                    // `#` keeps a bare id from reading back as a note id
                    None => Label::Author(format!("#{}", id)),
                }
            }
        }
    }

    fn context(&self, position: &Position) -> Vec<String> {
        let Some(vcs) = self.vcs else {
            return Vec::new();
        };
        let (Some(base), Some(head)) = (&position.base_sha, &position.head_sha) else {
            return vec![" ? position has no commits".to_string()];
        };
        let path = position.path().unwrap_or_default();

        let fetched = vcs.ensure_commit(base).and_then(|_| vcs.ensure_commit(head));
        if let Err(e) = fetched {
            tracing::debug!(error = %e, "commits for thread context unavailable");
            return vec![format!(" ? missing commits {} or {}", base, head)];
        }

        let mut paths: Vec<&str> = Vec::new();
        for p in [position.old_path.as_deref(), position.new_path.as_deref()]
            .into_iter()
            .flatten()
        {
            if !paths.contains(&p) {
                paths.push(p);
            }
        }
        let diff = match vcs.diff(base, head, &paths) {
            Ok(diff) => diff,
            Err(e) => return vec![format!(" ? {}", e)],
        };
        crate::diff_context::side_context(
            &diff,
            path,
            position.old_line,
            position.new_line,
            self.context_lines,
        )
        .unwrap_or_else(|| vec![format!(" ? no file '{}' in {}..{}", path, base, head)])
    }

    /// A discussion as a thread; `None` when it holds only system notes.
    pub fn thread(&self, discussion: &Discussion) -> Option<Thread> {
        let comments: Vec<Comment> = discussion
            .notes
            .iter()
            .filter(|n| !n.system)
            .map(|n| Comment {
                label: self.label(n),
                body: normalize(&n.body),
            })
            .collect();
        if comments.is_empty() {
            return None;
        }

        let mut thread = Thread::new(ThreadId::Remote(discussion.id.clone()));
        if let Some(position) = discussion.position() {
            if let (Some(path), Some(line)) = (position.path(), position.line()) {
                thread.anchor = Some(Anchor {
                    path: path.to_string(),
                    line,
                });
                thread.context = self.context(position);
            }
        }
        thread.comments = comments;
        Some(thread)
    }

    fn threads<'d>(&self, discussions: impl Iterator<Item = &'d Discussion>) -> Vec<Thread> {
        discussions.filter_map(|d| self.thread(d)).collect()
    }

    /// Text of an issue's `comments.gl`.
    pub fn issue(&self, issue: &RemoteResource, discussions: &[Discussion]) -> String {
        format::serialize(&Resource {
            header: Some(self.header(issue)),
            threads: self.threads(discussions.iter()),
            ..Resource::default()
        })
    }

    /// Text of a merge request's `meta.gl`, `todo.gl` and `resolved.gl`.
    pub fn merge_request(&self, mr: &RemoteResource, discussions: &[Discussion]) -> MergeRequestTexts {
        let in_state = |state: DiscussionState| discussions.iter().filter(move |d| d.state() == state);

        let meta = Resource {
            header: Some(self.header(mr)),
            threads: self.threads(in_state(DiscussionState::Unresolvable)),
            ..Resource::default()
        };
        let todo = Resource {
            threads: self.threads(in_state(DiscussionState::Unresolved)),
            ..Resource::default()
        };
        let resolved = Resource {
            threads: self.threads(in_state(DiscussionState::Resolved)),
            ..Resource::default()
        };
        MergeRequestTexts {
            meta: format::serialize(&meta),
            todo: format::serialize(&todo),
            resolved: format::serialize(&resolved),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Milestone, NoteAuthor};
    use crate::Result;

    const D1: &str = "6a9c1750b37d513a43987b574953fceb50b03ce7";
    const D2: &str = "87805b7c09016a7058e91bdbe7b29d1f284a39e6";

    fn note(id: u64, author: &str, body: &str) -> Note {
        Note {
            id,
            body: body.to_string(),
            author: NoteAuthor {
                id: id * 10,
                username: Some(author.to_string()),
            },
            system: false,
            resolvable: false,
            resolved: None,
            position: None,
        }
    }

    fn issue() -> RemoteResource {
        RemoteResource {
            iid: 3,
            title: "Crash on start".to_string(),
            description: Some("It crashes.\r\n\r\nAlways.  ".to_string()),
            state: "opened".to_string(),
            web_url: "https://gitlab.example.com/g/p/-/issues/3".to_string(),
            source_branch: None,
            target_branch: None,
            assignees: vec![User {
                id: 1,
                username: "me".to_string(),
                name: String::new(),
            }],
            reviewers: Vec::new(),
            milestone: Some(Milestone {
                id: 5,
                title: "v1".to_string(),
            }),
            labels: vec!["bug".to_string(), "p1".to_string()],
            diff_refs: None,
        }
    }

    #[test]
    fn test_issue_rendering_round_trips() {
        let discussions = vec![Discussion {
            id: D1.to_string(),
            notes: vec![note(11, "alice", "Seen it\ntoo"), note(12, "me", "fixing")],
        }];
        let renderer = Renderer::new(Some("me"), &[], 5);
        let text = renderer.issue(&issue(), &discussions);

        assert_eq!(
            text,
            "Crash on start\n\nIt crashes.\n\nAlways.\n\
             𑁍 assignees: me\n𑁍 milestone: v1\n𑁍 labels: bug,p1\n\n\
             6a9c1750b37d513a43987b574953fceb50b03ce7\n\
             \t[alice] Seen it\n\t\ttoo\n\t[12] fixing\n\n𑁍\n"
        );
        assert_eq!(format::serialize(&format::parse_with_header(&text)), text);
    }

    #[test]
    fn test_merge_request_split_by_state() {
        let mut mr = issue();
        mr.source_branch = Some("topic".to_string());
        mr.target_branch = Some("main".to_string());
        mr.description = None;

        let mut todo = note(21, "bob", "please fix");
        todo.resolvable = true;
        todo.resolved = Some(false);
        let mut done = note(22, "bob", "ok");
        done.resolvable = true;
        done.resolved = Some(true);
        let discussions = vec![
            Discussion { id: D1.to_string(), notes: vec![todo] },
            Discussion { id: D2.to_string(), notes: vec![done] },
        ];

        let texts = Renderer::new(Some("me"), &[], 5).merge_request(&mr, &discussions);
        assert!(texts.meta.starts_with("Crash on start\n\n\n𑁍 source_branch: topic\n𑁍 target_branch: main\n𑁍 reviewers: \n"));
        assert!(texts.todo.contains(D1));
        assert!(!texts.todo.contains(D2));
        assert!(texts.resolved.contains(D2));
        assert!(texts.resolved.ends_with("𑁍\n"));
    }

    #[test]
    fn test_author_by_id_resolution() {
        let users = vec![User {
            id: 70,
            username: "carol".to_string(),
            name: String::new(),
        }];
        let renderer = Renderer::new(Some("me"), &users, 5);
        let mut known = note(7, "x", "hi");
        known.author.username = None;
        assert_eq!(renderer.label(&known), Label::Author("carol".to_string()));

        let mut unknown = note(8, "x", "hi");
        unknown.author.username = None;
        assert_eq!(renderer.label(&unknown), Label::Author("#80".to_string()));
    }

    #[test]
    fn test_system_only_discussion_skipped() {
        let mut system = note(1, "bot", "changed the description");
        system.system = true;
        let discussion = Discussion { id: D1.to_string(), notes: vec![system] };
        assert!(Renderer::new(None, &[], 5).thread(&discussion).is_none());
    }

    struct NoCommits;

    impl Vcs for NoCommits {
        fn diff(&self, _: &str, _: &str, _: &[&str]) -> Result<String> {
            unreachable!()
        }
        fn resolve_ref(&self, name: &str) -> Result<String> {
            Err(crate::Error::NotFound(name.to_string()))
        }
        fn ensure_commit(&self, sha: &str) -> Result<()> {
            Err(crate::Error::NotFound(sha.to_string()))
        }
    }

    #[test]
    fn test_anchored_thread_without_commits() {
        let mut first = note(5, "bob", "typo");
        first.position = Some(Position {
            base_sha: Some("aaaa".to_string()),
            head_sha: Some("bbbb".to_string()),
            new_path: Some("src/lib.rs".to_string()),
            new_line: Some(4),
            ..Position::default()
        });
        let discussion = Discussion { id: D1.to_string(), notes: vec![first] };
        let vcs = NoCommits;
        let thread = Renderer::new(None, &[], 5)
            .with_vcs(&vcs)
            .thread(&discussion)
            .unwrap();
        assert_eq!(
            thread.anchor,
            Some(Anchor { path: "src/lib.rs".to_string(), line: 4 })
        );
        assert_eq!(thread.context, vec![" ? missing commits aaaa or bbbb"]);
    }
}
