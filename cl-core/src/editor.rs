//! # Description Editor
//!
//! Opens the user's editor on a temporary file holding a description and
//! reads the result back.

use std::fs;
use std::path::PathBuf;
use std::process::Command;

use anyhow::{Context, Result};
use tracing::debug;

/// Something that can let a user edit text.
pub trait DescriptionEditor {
  /// Returns the edited text, or `None` when the editor failed.
  fn edit(&self, text: &str) -> Result<Option<String>>;
}

/// Runs an external editor command.
#[derive(Debug, Clone)]
pub struct ExternalEditor {
  command: String,
}

impl ExternalEditor {
  pub fn new(command: impl Into<String>) -> Self {
    Self {
      command: command.into(),
    }
  }

  /// Pick the editor the way git does: `GIT_EDITOR`, then `core.editor`,
  /// then `VISUAL`, then `EDITOR`, then `vi`.
  pub fn resolve(core_editor: Option<&str>) -> Self {
    let from_env = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
    let command = from_env("GIT_EDITOR")
      .or_else(|| core_editor.map(str::to_string))
      .or_else(|| from_env("VISUAL"))
      .or_else(|| from_env("EDITOR"))
      .unwrap_or_else(|| "vi".to_string());
    Self::new(command)
  }

  pub fn command(&self) -> &str {
    &self.command
  }

  fn temp_path() -> PathBuf {
    std::env::temp_dir().join(format!("git-cl-description-{}.txt", uuid::Uuid::new_v4()))
  }
}

impl DescriptionEditor for ExternalEditor {
  fn edit(&self, text: &str) -> Result<Option<String>> {
    let path = Self::temp_path();
    let mut content = text.to_string();
    if !content.ends_with('\n') {
      content.push('\n');
    }
    fs::write(&path, content).with_context(|| format!("Failed to write {}", path.display()))?;

    debug!("Running editor {:?} on {}", self.command, path.display());
    #[cfg(not(windows))]
    let status = Command::new("sh")
      .arg("-c")
      .arg(format!("{} \"$@\"", self.command))
      .arg(&self.command)
      .arg(&path)
      .status();
    #[cfg(windows)]
    let status = Command::new("cmd").arg("/C").arg(&self.command).arg(&path).status();

    let result = match status {
      Ok(status) if status.success() => {
        Some(fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))?)
      }
      Ok(_) | Err(_) => None,
    };
    let _ = fs::remove_file(&path);
    Ok(result)
  }
}
