//! CLI argument definitions for gl.

use crate::format::review::LineMarker;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// gl - GitLab discussions as plain text files.
///
/// `gl fetch <branch>` writes the threads of a merge request to
/// `gl/<branch>/todo.gl`; edit it, then `gl submit <branch>`.
#[derive(Parser, Debug)]
#[command(name = "gl")]
#[command(
    author,
    version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("GL_GIT_COMMIT"), ", built ", env!("GL_BUILD_TIMESTAMP"), ")"),
    about = "GitLab discussions as plain, hand-editable text files",
    long_about = None
)]
pub struct Cli {
    /// Print the requests that would change GitLab instead of sending them
    #[arg(short = 'n', long = "dry-run", global = true)]
    pub dry_run: bool,

    /// Only print errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log requests and per-file decisions
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output in JSON instead of human-readable text
    #[arg(long, global = true)]
    pub json: bool,

    /// Run as if gl was started in <path>. Can also be set via GIT_WORKTREE.
    #[arg(short = 'C', long = "worktree", global = true)]
    pub worktree: Option<PathBuf>,

    /// Git remote that points at the GitLab project
    #[arg(long, global = true)]
    pub remote: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Download discussions and merge them into the local files
    ///
    /// Targets are issue numbers, branch names, URLs or paths below gl/.
    /// Without targets every resource fetched before is refreshed.
    Fetch {
        targets: Vec<String>,
    },

    /// Publish replies, new threads, edits, resolve toggles and review drafts
    Submit {
        targets: Vec<String>,
    },

    /// Draft a review comment on a line of a commit
    ///
    /// Appends the diff context to gl/<branch>/review.gl and opens the editor
    /// on the empty line below it.
    Discuss {
        /// Source branch of the merge request
        branch: String,
        commit: String,
        /// File path in the commit
        file: String,
        /// Side of the diff: '+', '-' or ' ' (or added/removed/context)
        #[arg(value_parser = parse_marker, allow_hyphen_values = true)]
        marker: LineMarker,
        old_line: u64,
        new_line: u64,
        /// Do not open the editor
        #[arg(long)]
        no_edit: bool,
    },

    /// Cache users, active milestones and labels under gl/
    Fetchstatic,

    /// Print the working file for an issue or merge request URL
    Url2path {
        url: String,
    },

    /// Print the web URL of issues and merge requests
    Path2url {
        #[arg(required = true)]
        targets: Vec<String>,

        /// Also open each URL in the browser
        #[arg(long)]
        open: bool,
    },
}

impl Commands {
    /// Name used in the action log.
    pub fn name(&self) -> &'static str {
        match self {
            Commands::Fetch { .. } => "fetch",
            Commands::Submit { .. } => "submit",
            Commands::Discuss { .. } => "discuss",
            Commands::Fetchstatic => "fetchstatic",
            Commands::Url2path { .. } => "url2path",
            Commands::Path2url { .. } => "path2url",
        }
    }
}

fn parse_marker(arg: &str) -> Result<LineMarker, String> {
    LineMarker::parse_arg(arg)
        .ok_or_else(|| format!("invalid diff side '{}', expected '+', '-' or ' '", arg))
}
