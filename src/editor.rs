//! Editor and browser launcher.

use crate::{Error, Result};
use std::path::Path;
use std::process::Command;

/// Hands files and URLs to the user's programs.
pub trait EditorLauncher {
    /// Open `path` with the cursor on 1-based `line`, waiting for the editor.
    fn open_at(&self, path: &Path, line: usize) -> Result<()>;

    fn open_url(&self, url: &str) -> Result<()>;
}

/// Launches the configured editor through `sh` and the platform URL opener.
#[derive(Debug, Clone)]
pub struct SystemLauncher {
    /// Editor command line, may carry arguments (`code --wait`)
    editor: String,
}

impl SystemLauncher {
    pub fn new(editor: impl Into<String>) -> Self {
        Self {
            editor: editor.into(),
        }
    }

    /// Arguments that place the cursor, by editor family.
    fn position_args(&self, path: &Path, line: usize) -> Vec<String> {
        let program = self
            .editor
            .split_whitespace()
            .next()
            .and_then(|p| p.rsplit('/').next())
            .unwrap_or_default();
        match program {
            "code" | "codium" | "cursor" => {
                vec!["-g".to_string(), format!("{}:{}", path.display(), line)]
            }
            "zed" | "subl" => vec![format!("{}:{}", path.display(), line)],
            _ => vec![format!("+{}", line), path.display().to_string()],
        }
    }
}

impl EditorLauncher for SystemLauncher {
    fn open_at(&self, path: &Path, line: usize) -> Result<()> {
        tracing::debug!(editor = %self.editor, path = %path.display(), line, "opening editor");
        let status = Command::new("sh")
            .arg("-c")
            .arg(format!("{} \"$@\"", self.editor))
            .arg("gl-editor")
            .args(self.position_args(path, line))
            .status()
            .map_err(|e| Error::Other(format!("failed to start editor '{}': {}", self.editor, e)))?;
        if !status.success() {
            return Err(Error::Other(format!(
                "editor '{}' exited with {}",
                self.editor, status
            )));
        }
        Ok(())
    }

    fn open_url(&self, url: &str) -> Result<()> {
        let opener = if cfg!(target_os = "macos") {
            "open"
        } else {
            "xdg-open"
        };
        tracing::debug!(opener, url, "opening browser");
        Command::new(opener)
            .arg(url)
            .spawn()
            .map_err(|e| Error::Other(format!("failed to run {}: {}", opener, e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_position_args() {
        let path = PathBuf::from("gl/topic/review.gl");
        assert_eq!(
            SystemLauncher::new("vim").position_args(&path, 7),
            vec!["+7", "gl/topic/review.gl"]
        );
        assert_eq!(
            SystemLauncher::new("/usr/bin/code --wait").position_args(&path, 7),
            vec!["-g", "gl/topic/review.gl:7"]
        );
    }

    #[test]
    fn test_open_at_runs_editor_command() {
        let dir = tempfile::TempDir::new().unwrap();
        let marker = dir.path().join("args");
        let editor = format!("printf '%s\\n' >{}", marker.display());
        SystemLauncher::new(editor)
            .open_at(Path::new("todo.gl"), 3)
            .unwrap();
        assert_eq!(std::fs::read_to_string(&marker).unwrap(), "+3\ntodo.gl\n");
    }

    #[test]
    fn test_failing_editor_is_an_error() {
        assert!(SystemLauncher::new("false").open_at(Path::new("x"), 1).is_err());
    }
}
