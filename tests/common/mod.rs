//! Common test utilities for gl integration tests.
//!
//! Provides `TestEnv`: a throwaway git repository whose `origin` looks like a
//! GitLab project, with config and state directories that don't touch the
//! user's `~/.config/gl/` or `~/.local/share/gl/`.

#![allow(dead_code)]

use assert_cmd::Command;
use std::fs;
use std::path::Path;
pub use tempfile::TempDir;

pub const REMOTE_URL: &str = "git@gitlab.example.com:group/project.git";
pub const PROJECT_URL: &str = "https://gitlab.example.com/group/project";

/// Run git in `dir`, returning trimmed stdout.
pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = std::process::Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("git should run");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// A test environment with an isolated repository and gl directories.
pub struct TestEnv {
    pub repo_dir: TempDir,
    pub config_dir: TempDir,
    pub data_dir: TempDir,
}

impl TestEnv {
    /// Create a git repository with one commit and a GitLab `origin`.
    pub fn new() -> Self {
        let env = Self {
            repo_dir: TempDir::new().unwrap(),
            config_dir: TempDir::new().unwrap(),
            data_dir: TempDir::new().unwrap(),
        };
        env.git(&["init", "-q"]);
        env.git(&["config", "user.email", "test@example.com"]);
        env.git(&["config", "user.name", "Test"]);
        env.git(&["remote", "add", "origin", REMOTE_URL]);
        env.commit_file("a.txt", "one\ntwo\nthree\n", "first");
        env
    }

    /// Get a Command for the gl binary with isolated config and state.
    pub fn gl(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_gl"));
        cmd.current_dir(self.repo_dir.path());
        cmd.env("GL_CONFIG_DIR", self.config_dir.path());
        cmd.env("GL_DATA_DIR", self.data_dir.path());
        cmd.env("HOME", self.data_dir.path());
        cmd.env("EDITOR", "true");
        for var in ["GITLAB_TOKEN", "GITLAB_USER", "GITLAB_GROUP", "GIT_WORKTREE", "VISUAL", "GL_LOG"] {
            cmd.env_remove(var);
        }
        cmd
    }

    pub fn git(&self, args: &[&str]) -> String {
        git(self.repo_dir.path(), args)
    }

    /// Write and commit a file, returning the new commit id.
    pub fn commit_file(&self, name: &str, contents: &str, message: &str) -> String {
        let path = self.repo_dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, contents).unwrap();
        self.git(&["add", name]);
        self.git(&["commit", "-q", "-m", message]);
        self.git(&["rev-parse", "HEAD"])
    }

    pub fn path(&self) -> &Path {
        self.repo_dir.path()
    }

    /// Write `gl/config.kdl` in the repository.
    pub fn write_repo_config(&self, kdl: &str) {
        let dir = self.repo_dir.path().join("gl");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("config.kdl"), kdl).unwrap();
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}
