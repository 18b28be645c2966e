//! gl CLI - GitLab discussions as plain, hand-editable text files.

use chrono::Utc;
use clap::Parser;
use gltext::action_log::{self, ActionLog};
use gltext::cli::{Cli, Commands};
use gltext::commands::{self, Output, Session};
use gltext::config::{ConfigOverrides, Settings};
use gltext::editor::SystemLauncher;
use gltext::git::Git;
use gltext::gitlab::GitLabClient;
use gltext::merge::GitMergeFile;
use std::process;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

/// Exit status when a fetch left conflict markers or a file still has them.
const EXIT_CONFLICT: i32 = 2;

fn main() {
    let cli = Cli::parse();
    init_tracing(&cli);
    let json = cli.json;

    let overrides = ConfigOverrides {
        worktree: cli.worktree.clone(),
        remote: cli.remote.clone(),
        dry_run: cli.dry_run,
    };
    let settings = match Settings::load(&overrides) {
        Ok(settings) => settings,
        Err(e) => exit_with(&e, json),
    };

    // Serialize command for logging
    let (cmd_name, args_json) = serialize_command(&cli.command);

    let start = Instant::now();
    let result = run_command(cli.command, &settings, json);
    let duration_ms = start.elapsed().as_millis() as u64;

    if settings.action_log.value {
        action_log::log_action(
            &action_log::log_path(settings.worktree()),
            ActionLog {
                timestamp: Utc::now(),
                command: cmd_name,
                args: args_json,
                dry_run: settings.dry_run,
                success: result.is_ok(),
                error: result.as_ref().err().map(ToString::to_string),
                duration_ms,
                user: settings
                    .user()
                    .map(str::to_string)
                    .unwrap_or_else(action_log::current_user),
            },
        );
    }

    match result {
        Ok(code) => process::exit(code),
        Err(e) => exit_with(&e, json),
    }
}

fn exit_with(error: &gltext::Error, json: bool) -> ! {
    if json {
        eprintln!("{}", serde_json::json!({ "error": error.to_string() }));
    } else {
        eprintln!("Error: {}", error);
    }
    process::exit(if error.is_conflict() { EXIT_CONFLICT } else { 1 })
}

fn init_tracing(cli: &Cli) {
    let filter = if cli.quiet {
        EnvFilter::new("off")
    } else if cli.verbose {
        EnvFilter::new("gltext=debug,gl=debug")
    } else {
        EnvFilter::try_from_env("GL_LOG").unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

fn run_command(command: Commands, settings: &Settings, json: bool) -> gltext::Result<i32> {
    let mut vcs = Git::new(settings.worktree());
    let remote = match vcs.detect_remote(settings.remote()) {
        Ok(remote) => Some(remote),
        Err(e) => {
            tracing::debug!(error = %e, "no GitLab remote");
            None
        }
    };
    if let Some(remote) = &remote {
        vcs = vcs.with_remote(remote.name.clone());
    }

    let client = match (&remote, settings.token()) {
        (Some(remote), Ok(token)) => Some(GitLabClient::new(remote, token)),
        _ => None,
    };
    let launcher = SystemLauncher::new(settings.editor());
    let merger = GitMergeFile;

    let mut session = Session::new(settings, &vcs, &merger, &launcher);
    if let Some(remote) = remote {
        session = session.with_remote(remote);
    }
    if let Some(client) = &client {
        session = session.with_forge(client);
    }

    match command {
        Commands::Fetch { targets } => {
            let report = commands::fetch(&session, &targets)?;
            output(&report, json);
            Ok(report_conflicts(report.conflicts()))
        }
        Commands::Submit { targets } => {
            let report = commands::submit(&session, &targets)?;
            output(&report, json);
            Ok(report_conflicts(report.conflicts()))
        }
        Commands::Discuss {
            branch,
            commit,
            file,
            marker,
            old_line,
            new_line,
            no_edit,
        } => {
            let result = commands::discuss(
                &session, &branch, &commit, &file, marker, old_line, new_line, !no_edit,
            )?;
            output(&result, json);
            Ok(0)
        }
        Commands::Fetchstatic => {
            output(&commands::fetchstatic(&session)?, json);
            Ok(0)
        }
        Commands::Url2path { url } => {
            output(&commands::url2path(&session, &url)?, json);
            Ok(0)
        }
        Commands::Path2url { targets, open } => {
            output(&commands::path2url(&session, &targets, open)?, json);
            Ok(0)
        }
    }
}

/// Name conflicted files on stderr; the exit status for the run.
fn report_conflicts(conflicts: Vec<&commands::FileSync>) -> i32 {
    for file in &conflicts {
        eprintln!(
            "conflict in {} (line {})",
            file.file,
            file.conflict_line.unwrap_or(1)
        );
    }
    if conflicts.is_empty() { 0 } else { EXIT_CONFLICT }
}

/// Print output in JSON or human-readable format.
fn output<T: Output>(result: &T, json: bool) {
    if json {
        println!("{}", result.to_json());
    } else {
        println!("{}", result.to_human());
    }
}

/// Serialize command to extract name and arguments for logging.
fn serialize_command(command: &Commands) -> (String, serde_json::Value) {
    let args = match command {
        Commands::Fetch { targets } | Commands::Submit { targets } => {
            serde_json::json!({ "targets": targets })
        }
        Commands::Discuss {
            branch,
            commit,
            file,
            marker,
            old_line,
            new_line,
            no_edit,
        } => serde_json::json!({
            "branch": branch,
            "commit": commit,
            "file": file,
            "marker": marker.to_string(),
            "old_line": old_line,
            "new_line": new_line,
            "no_edit": no_edit,
        }),
        Commands::Fetchstatic => serde_json::json!({}),
        Commands::Url2path { url } => serde_json::json!({ "url": url }),
        Commands::Path2url { targets, open } => {
            serde_json::json!({ "targets": targets, "open": open })
        }
    };
    (command.name().to_string(), args)
}
