//! Precedence resolution of configuration and state into [`Settings`].
//!
//! ## Precedence (highest to lowest)
//!
//! 1. CLI flags
//! 2. Environment (`GITLAB_TOKEN`, `GITLAB_USER`, `GITLAB_GROUP`,
//!    `GIT_WORKTREE`, `VISUAL`/`EDITOR`)
//! 3. Repository config `<worktree>/gl/config.kdl`
//! 4. System config `~/.config/gl/config.kdl`
//! 5. Built-in defaults
//!
//! The token only ever comes from the environment or `state.kdl`.

use crate::config::schema::{GlConfig, GlState};
use crate::diff_context::DEFAULT_CONTEXT_LINES;
use crate::git::Git;
use crate::storage::WORKSPACE_DIR;
use crate::{Error, Result};
use kdl::KdlDocument;
use std::path::{Path, PathBuf};

pub const TOKEN_ENV: &str = "GITLAB_TOKEN";
pub const USER_ENV: &str = "GITLAB_USER";
pub const GROUP_ENV: &str = "GITLAB_GROUP";
pub const WORKTREE_ENV: &str = "GIT_WORKTREE";
/// Overrides the directory holding the system config.kdl
pub const CONFIG_DIR_ENV: &str = "GL_CONFIG_DIR";
/// Overrides the directory holding state.kdl
pub const DATA_DIR_ENV: &str = "GL_DATA_DIR";

const DEFAULT_EDITOR: &str = "vi";

/// Tracks where a resolved value came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueSource {
    CliFlag,
    EnvVar(String),
    /// `<worktree>/gl/config.kdl`
    Repository,
    /// System config.kdl or state.kdl
    System,
    Default,
}

impl std::fmt::Display for ValueSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueSource::CliFlag => write!(f, "cli"),
            ValueSource::EnvVar(name) => write!(f, "env:{}", name),
            ValueSource::Repository => write!(f, "repository"),
            ValueSource::System => write!(f, "system"),
            ValueSource::Default => write!(f, "default"),
        }
    }
}

/// A resolved value with its source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved<T> {
    pub value: T,
    pub source: ValueSource,
}

impl<T> Resolved<T> {
    pub fn new(value: T, source: ValueSource) -> Self {
        Self { value, source }
    }
}

/// CLI overrides for configuration resolution.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub worktree: Option<PathBuf>,
    pub remote: Option<String>,
    pub dry_run: bool,
}

/// Location of the per-machine files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigPaths {
    pub system_config: Option<PathBuf>,
    pub state: Option<PathBuf>,
}

impl ConfigPaths {
    pub fn from_env(env: &dyn Fn(&str) -> Option<String>) -> Self {
        let system_config = env(CONFIG_DIR_ENV)
            .map(PathBuf::from)
            .or_else(|| dirs::config_dir().map(|d| d.join("gl")))
            .map(|d| d.join("config.kdl"));
        let state = env(DATA_DIR_ENV)
            .map(PathBuf::from)
            .or_else(|| dirs::data_dir().map(|d| d.join("gl")))
            .map(|d| d.join("state.kdl"));
        Self {
            system_config,
            state,
        }
    }
}

/// Non-empty environment variable of the running process.
pub fn process_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_kdl(path: &Path) -> Result<Option<KdlDocument>> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    text.parse::<KdlDocument>()
        .map(Some)
        .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
}

/// Read a config.kdl; a missing file is an empty config.
pub fn read_config(path: &Path) -> Result<GlConfig> {
    let config = read_kdl(path)?
        .map(|doc| GlConfig::from_kdl(&doc))
        .unwrap_or_default();
    config
        .validate()
        .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
    Ok(config)
}

/// Read state.kdl, warning when other users can read it.
pub fn read_state(path: &Path) -> Result<GlState> {
    let Some(doc) = read_kdl(path)? else {
        return Ok(GlState::default());
    };
    #[cfg(unix)]
    {
        use crate::config::schema::STATE_FILE_MODE;
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(path)?.permissions().mode() & 0o777;
        if mode & !STATE_FILE_MODE != 0 {
            tracing::warn!(
                path = %path.display(),
                mode = %format!("{:o}", mode),
                "state file holds a token but is readable by others; chmod 600 it"
            );
        }
    }
    let state = GlState::from_kdl(&doc);
    tracing::debug!(path = %path.display(), token = ?state.masked_token(), "read state");
    Ok(state)
}

/// First present value in precedence order.
fn pick<T>(candidates: impl IntoIterator<Item = (Option<T>, ValueSource)>) -> Option<Resolved<T>> {
    candidates
        .into_iter()
        .find_map(|(value, source)| value.map(|v| Resolved::new(v, source)))
}

fn env_candidate(env: &dyn Fn(&str) -> Option<String>, name: &str) -> (Option<String>, ValueSource) {
    (env(name), ValueSource::EnvVar(name.to_string()))
}

/// Everything a command needs to know, resolved once per invocation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub worktree: Resolved<PathBuf>,
    pub user: Option<Resolved<String>>,
    pub group: Option<Resolved<String>>,
    pub token: Option<Resolved<String>>,
    pub editor: Resolved<String>,
    pub context_lines: Resolved<usize>,
    /// Git remote to use; auto-detected when unset
    pub remote: Option<Resolved<String>>,
    pub target_branch: Option<Resolved<String>>,
    pub action_log: Resolved<bool>,
    pub dry_run: bool,
}

impl Settings {
    /// Resolve settings from the process environment and the usual files.
    pub fn load(overrides: &ConfigOverrides) -> Result<Self> {
        let paths = ConfigPaths::from_env(&process_env);
        Self::resolve(overrides, &paths, &process_env)
    }

    /// Resolve settings with an explicit environment and file locations.
    pub fn resolve(
        overrides: &ConfigOverrides,
        paths: &ConfigPaths,
        env: &dyn Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let worktree = match pick([
            (overrides.worktree.clone(), ValueSource::CliFlag),
            (env(WORKTREE_ENV).map(PathBuf::from), ValueSource::EnvVar(WORKTREE_ENV.to_string())),
        ]) {
            Some(worktree) => worktree,
            None => Resolved::new(
                Git::discover(&std::env::current_dir()?)?,
                ValueSource::Default,
            ),
        };

        let system = match &paths.system_config {
            Some(path) => read_config(path)?,
            None => GlConfig::default(),
        };
        let repo = read_config(&worktree.value.join(WORKSPACE_DIR).join("config.kdl"))?;
        let state = match &paths.state {
            Some(path) => read_state(path)?,
            None => GlState::default(),
        };

        let editor = pick([
            env_candidate(env, "VISUAL"),
            env_candidate(env, "EDITOR"),
            (repo.editor.clone(), ValueSource::Repository),
            (system.editor.clone(), ValueSource::System),
        ])
        .unwrap_or_else(|| Resolved::new(DEFAULT_EDITOR.to_string(), ValueSource::Default));

        let context_lines = pick([
            (repo.context_lines, ValueSource::Repository),
            (system.context_lines, ValueSource::System),
        ])
        .unwrap_or_else(|| Resolved::new(DEFAULT_CONTEXT_LINES, ValueSource::Default));

        let action_log = pick([
            (repo.action_log, ValueSource::Repository),
            (system.action_log, ValueSource::System),
        ])
        .unwrap_or_else(|| Resolved::new(true, ValueSource::Default));

        Ok(Self {
            user: pick([
                env_candidate(env, USER_ENV),
                (repo.user.clone(), ValueSource::Repository),
                (system.user.clone(), ValueSource::System),
            ]),
            group: pick([
                env_candidate(env, GROUP_ENV),
                (repo.group.clone(), ValueSource::Repository),
                (system.group.clone(), ValueSource::System),
            ]),
            token: pick([
                env_candidate(env, TOKEN_ENV),
                (state.gitlab_token, ValueSource::System),
            ]),
            remote: pick([
                (overrides.remote.clone(), ValueSource::CliFlag),
                (repo.remote, ValueSource::Repository),
                (system.remote, ValueSource::System),
            ]),
            target_branch: pick([
                (repo.target_branch, ValueSource::Repository),
                (system.target_branch, ValueSource::System),
            ]),
            worktree,
            editor,
            context_lines,
            action_log,
            dry_run: overrides.dry_run,
        })
    }

    pub fn worktree(&self) -> &Path {
        &self.worktree.value
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_ref().map(|r| r.value.as_str())
    }

    pub fn group(&self) -> Option<&str> {
        self.group.as_ref().map(|r| r.value.as_str())
    }

    pub fn remote(&self) -> Option<&str> {
        self.remote.as_ref().map(|r| r.value.as_str())
    }

    pub fn editor(&self) -> &str {
        &self.editor.value
    }

    pub fn context_lines(&self) -> usize {
        self.context_lines.value
    }

    /// The GitLab token; required by every command that talks to the forge.
    pub fn token(&self) -> Result<&str> {
        self.token.as_ref().map(|r| r.value.as_str()).ok_or_else(|| {
            Error::Config(format!(
                "no GitLab token: set {} or gitlab-token in state.kdl",
                TOKEN_ENV
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::collections::HashMap;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        worktree: PathBuf,
        paths: ConfigPaths,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let worktree = dir.path().join("repo");
        std::fs::create_dir_all(worktree.join(WORKSPACE_DIR)).unwrap();
        let paths = ConfigPaths {
            system_config: Some(dir.path().join("config.kdl")),
            state: Some(dir.path().join("state.kdl")),
        };
        Fixture {
            _dir: dir,
            worktree,
            paths,
        }
    }

    fn resolve(fx: &Fixture, vars: &[(&str, &str)]) -> Result<Settings> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let env = move |name: &str| vars.get(name).cloned();
        let overrides = ConfigOverrides {
            worktree: Some(fx.worktree.clone()),
            ..Default::default()
        };
        Settings::resolve(&overrides, &fx.paths, &env)
    }

    #[test]
    fn test_defaults() {
        let fx = fixture();
        let settings = resolve(&fx, &[]).unwrap();
        assert_eq!(settings.editor(), "vi");
        assert_eq!(settings.editor.source, ValueSource::Default);
        assert_eq!(settings.context_lines(), DEFAULT_CONTEXT_LINES);
        assert!(settings.action_log.value);
        assert!(settings.user().is_none());
        assert!(settings.token().is_err());
        assert_eq!(settings.worktree.source, ValueSource::CliFlag);
    }

    #[test]
    fn test_repository_overrides_system() {
        let fx = fixture();
        std::fs::write(
            fx.paths.system_config.as_ref().unwrap(),
            "user \"sys\"\ncontext-lines 9\ngroup \"g\"\n",
        )
        .unwrap();
        std::fs::write(
            fx.worktree.join("gl/config.kdl"),
            "user \"repo\"\naction-log #false\n",
        )
        .unwrap();

        let settings = resolve(&fx, &[]).unwrap();
        assert_eq!(settings.user(), Some("repo"));
        assert_eq!(settings.user.as_ref().unwrap().source, ValueSource::Repository);
        assert_eq!(settings.context_lines(), 9);
        assert_eq!(settings.context_lines.source, ValueSource::System);
        assert_eq!(settings.group(), Some("g"));
        assert!(!settings.action_log.value);
    }

    #[test]
    fn test_env_overrides_files() {
        let fx = fixture();
        std::fs::write(fx.worktree.join("gl/config.kdl"), "user \"repo\"\n").unwrap();
        std::fs::write(fx.paths.state.as_ref().unwrap(), "gitlab-token \"from-state\"\n").unwrap();

        let settings = resolve(&fx, &[(USER_ENV, "env-user"), ("EDITOR", "nano")]).unwrap();
        assert_eq!(settings.user(), Some("env-user"));
        assert_eq!(
            settings.user.as_ref().unwrap().source,
            ValueSource::EnvVar(USER_ENV.to_string())
        );
        assert_eq!(settings.editor(), "nano");
        assert_eq!(settings.token().unwrap(), "from-state");

        let settings = resolve(&fx, &[(TOKEN_ENV, "from-env")]).unwrap();
        assert_eq!(settings.token().unwrap(), "from-env");
    }

    #[test]
    fn test_invalid_config_is_reported() {
        let fx = fixture();
        std::fs::write(fx.worktree.join("gl/config.kdl"), "context-lines 0\n").unwrap();
        let err = resolve(&fx, &[]).unwrap_err();
        assert!(matches!(err, Error::Config(ref m) if m.contains("context-lines")));
    }

    #[test]
    #[serial]
    fn test_config_paths_from_process_env() {
        let dir = TempDir::new().unwrap();
        // SAFETY: serialized test; no other thread reads these variables
        unsafe {
            std::env::set_var(CONFIG_DIR_ENV, dir.path());
            std::env::set_var(DATA_DIR_ENV, dir.path());
        }
        let paths = ConfigPaths::from_env(&process_env);
        assert_eq!(paths.system_config, Some(dir.path().join("config.kdl")));
        assert_eq!(paths.state, Some(dir.path().join("state.kdl")));
        unsafe {
            std::env::remove_var(CONFIG_DIR_ENV);
            std::env::remove_var(DATA_DIR_ENV);
        }
    }
}
