//! # User Configuration
//!
//! Per-user defaults stored as TOML under the platform config directory
//! (overridable with `GIT_CL_CONFIG_DIR`). Repository and branch state lives
//! in git config instead; see [`crate::settings`] and
//! [`crate::branch_config`].

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::consts::{DEFAULT_BUILDBUCKET_HOST, DEFAULT_STATUS_MAX_JOBS, ENV_CONFIG_DIR};
use crate::issue_ref::BackendKind;

/// Directories git-cl keeps user-level files in.
#[derive(Debug, Clone)]
pub struct ConfigDirs {
  pub config_dir: PathBuf,
  pub cache_dir: Option<PathBuf>,
}

impl ConfigDirs {
  pub fn new() -> Result<Self> {
    if let Some(dir) = std::env::var_os(ENV_CONFIG_DIR).filter(|v| !v.is_empty()) {
      return Ok(Self::at(PathBuf::from(dir)));
    }
    let proj_dirs =
      ProjectDirs::from("eddieland", "", "git-cl").context("Failed to determine project directories")?;
    Ok(Self {
      config_dir: proj_dirs.config_dir().to_path_buf(),
      cache_dir: Some(proj_dirs.cache_dir().to_path_buf()),
    })
  }

  /// Config rooted at an explicit directory, without a cache.
  pub fn at(config_dir: impl Into<PathBuf>) -> Self {
    Self {
      config_dir: config_dir.into(),
      cache_dir: None,
    }
  }

  pub fn config_dir(&self) -> &Path {
    &self.config_dir
  }

  pub fn cache_dir(&self) -> Option<&Path> {
    self.cache_dir.as_deref()
  }

  pub fn config_path(&self) -> PathBuf {
    self.config_dir.join("config.toml")
  }

  /// Load the user config, or defaults when the file does not exist.
  pub fn load_user_config(&self) -> Result<UserConfig> {
    let config_path = self.config_path();
    if !config_path.exists() {
      return Ok(UserConfig::default());
    }
    let content = fs::read_to_string(&config_path)
      .with_context(|| format!("Failed to read config from {}", config_path.display()))?;
    toml::from_str(&content).with_context(|| format!("Failed to parse config from {}", config_path.display()))
  }
}

/// Get the configuration directories
pub fn get_config_dirs() -> Result<ConfigDirs> {
  ConfigDirs::new()
}

/// Optional user-level defaults. Every field may be omitted in the file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserConfig {
  /// Backend used for branches without an issue when the repository does not
  /// configure a Gerrit host.
  pub default_backend: Option<BackendKind>,
  /// Worker cap for `git cl status`.
  pub status_max_jobs: Option<usize>,
  /// Try-job scheduling service host.
  pub buildbucket_host: Option<String>,
  /// Attempts for retried remote operations.
  pub retry_attempts: Option<u32>,
}

impl UserConfig {
  pub fn status_max_jobs(&self) -> usize {
    self.status_max_jobs.filter(|&n| n > 0).unwrap_or(DEFAULT_STATUS_MAX_JOBS)
  }

  pub fn buildbucket_host(&self) -> &str {
    self.buildbucket_host.as_deref().unwrap_or(DEFAULT_BUILDBUCKET_HOST)
  }

  pub fn retry_attempts(&self) -> u32 {
    self.retry_attempts.filter(|&n| n > 0).unwrap_or(3)
  }
}

#[cfg(test)]
mod tests {
  use cl_test_utils::EnvTestGuard;
  use tempfile::TempDir;

  use super::*;

  #[test]
  fn test_missing_config_is_default() {
    let dir = TempDir::new().unwrap();
    let dirs = ConfigDirs::at(dir.path().join("nothing-here"));
    let config = dirs.load_user_config().unwrap();
    assert_eq!(config, UserConfig::default());
    assert_eq!(config.status_max_jobs(), DEFAULT_STATUS_MAX_JOBS);
    assert_eq!(config.retry_attempts(), 3);
    assert_eq!(config.buildbucket_host(), DEFAULT_BUILDBUCKET_HOST);
  }

  #[test]
  fn test_config_dir_from_environment() {
    let guard = EnvTestGuard::with_config_dir();
    fs::write(
      guard.config_dir().join("config.toml"),
      "default_backend = \"gerrit\"\nbuildbucket_host = \"bb.example.com\"\n",
    )
    .unwrap();

    let dirs = get_config_dirs().unwrap();
    assert_eq!(dirs.config_dir(), guard.config_dir());
    assert!(dirs.cache_dir().is_none());
    let config = dirs.load_user_config().unwrap();
    assert_eq!(config.default_backend, Some(BackendKind::Gerrit));
    assert_eq!(config.buildbucket_host(), "bb.example.com");
  }

  #[test]
  fn test_partial_file() {
    let dir = TempDir::new().unwrap();
    let dirs = ConfigDirs::at(dir.path());
    fs::write(dirs.config_path(), "default_backend = \"rietveld\"\nstatus_max_jobs = 0\n").unwrap();
    let config = dirs.load_user_config().unwrap();
    assert_eq!(config.default_backend, Some(BackendKind::Rietveld));
    assert_eq!(config.status_max_jobs(), DEFAULT_STATUS_MAX_JOBS);
  }

  #[test]
  fn test_invalid_toml_reports_path() {
    let dir = TempDir::new().unwrap();
    let dirs = ConfigDirs::at(dir.path());
    fs::write(dirs.config_path(), "default_backend = [").unwrap();
    let err = dirs.load_user_config().unwrap_err();
    assert!(err.to_string().contains("config.toml"));
  }
}
