//! Configuration and state management.
//!
//! ## config.kdl - preferences (safe to sync across machines)
//!
//! Located at:
//! - System: `~/.config/gl/config.kdl` (or `$GL_CONFIG_DIR/config.kdl`)
//! - Repository: `<worktree>/gl/config.kdl`
//!
//! ## state.kdl - secrets (machine-specific)
//!
//! Located at `~/.local/share/gl/state.kdl` (or `$GL_DATA_DIR/state.kdl`) and
//! holds `gitlab-token`. It MUST be mode 0600; a looser mode is reported.
//!
//! Everything is resolved once into an immutable [`Settings`] that commands
//! receive explicitly. See [`resolver`] for the precedence rules.

pub mod resolver;
pub mod schema;

pub use resolver::{
    ConfigOverrides, ConfigPaths, Resolved, Settings, ValueSource, process_env, read_config,
    read_state,
};
pub use schema::{GlConfig, GlState};
#[cfg(unix)]
pub use schema::STATE_FILE_MODE;
