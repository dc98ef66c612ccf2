//! # Branch Config Store
//!
//! Key/value persistence scoped to a local branch, stored as
//! `branch.<name>.<key>` entries in the repository's git config. Integers and
//! booleans are encoded so that an absent key stays distinguishable from
//! `0`/`false`.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::debug;

use crate::git::{GitCommandError, Vcs};

/// Exit code of `git config --unset` when the key does not exist.
const GIT_CONFIG_KEY_MISSING: i32 = 5;

/// A typed value to persist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigValue {
  Str(String),
  Int(i64),
  Bool(bool),
}

impl From<&str> for ConfigValue {
  fn from(value: &str) -> Self {
    Self::Str(value.to_string())
  }
}

impl From<String> for ConfigValue {
  fn from(value: String) -> Self {
    Self::Str(value)
  }
}

impl From<i64> for ConfigValue {
  fn from(value: i64) -> Self {
    Self::Int(value)
  }
}

impl From<u64> for ConfigValue {
  fn from(value: u64) -> Self {
    Self::Int(i64::try_from(value).unwrap_or(i64::MAX))
  }
}

impl From<bool> for ConfigValue {
  fn from(value: bool) -> Self {
    Self::Bool(value)
  }
}

/// Reads and writes `branch.<branch>.<key>` git config entries.
#[derive(Clone)]
pub struct BranchConfigStore {
  vcs: Arc<dyn Vcs>,
}

impl BranchConfigStore {
  pub fn new(vcs: Arc<dyn Vcs>) -> Self {
    Self { vcs }
  }

  fn key(branch: &str, name: &str) -> String {
    format!("branch.{branch}.{name}")
  }

  /// Raw string value, `None` when unset.
  pub fn get_str(&self, branch: &str, name: &str) -> Result<Option<String>> {
    let key = Self::key(branch, name);
    Ok(self.vcs.run_ok(&["config", &key])?.map(|v| v.trim().to_string()))
  }

  /// Integer value, `None` when unset.
  pub fn get_int(&self, branch: &str, name: &str) -> Result<Option<i64>> {
    let Some(raw) = self.get_str(branch, name)? else {
      return Ok(None);
    };
    let value = raw
      .parse::<i64>()
      .with_context(|| format!("branch.{branch}.{name} is not a number: {raw:?}"))?;
    Ok(Some(value))
  }

  /// Boolean value as interpreted by `git config --bool`, `None` when unset.
  pub fn get_bool(&self, branch: &str, name: &str) -> Result<Option<bool>> {
    let key = Self::key(branch, name);
    Ok(
      self
        .vcs
        .run_ok(&["config", "--bool", &key])?
        .map(|v| v.trim() == "true"),
    )
  }

  /// Persist a value immediately.
  pub fn set(&self, branch: &str, name: &str, value: impl Into<ConfigValue>) -> Result<()> {
    let key = Self::key(branch, name);
    match value.into() {
      ConfigValue::Str(s) => self.vcs.run(&["config", &key, &s])?,
      ConfigValue::Int(i) => self.vcs.run(&["config", &key, &i.to_string()])?,
      ConfigValue::Bool(b) => {
        let raw = if b { "true" } else { "false" };
        self.vcs.run(&["config", "--bool", &key, raw])?
      }
    };
    debug!("Set {key}");
    Ok(())
  }

  /// Persist `Some(value)` or unset on `None`.
  pub fn set_opt<V: Into<ConfigValue>>(&self, branch: &str, name: &str, value: Option<V>) -> Result<()> {
    match value {
      Some(v) => self.set(branch, name, v),
      None => self.unset(branch, name),
    }
  }

  /// Remove a key. Removing a key that does not exist is not an error.
  pub fn unset(&self, branch: &str, name: &str) -> Result<()> {
    let key = Self::key(branch, name);
    let (code, output) = self.vcs.run_with_code(&["config", "--unset", &key])?;
    match code {
      0 => {
        debug!("Unset {key}");
        Ok(())
      }
      GIT_CONFIG_KEY_MISSING => Ok(()),
      _ => Err(
        GitCommandError {
          args: vec!["config".into(), "--unset".into(), key],
          code,
          output,
        }
        .into(),
      ),
    }
  }

  /// All `(branch, value)` pairs that have `name` set, in config order.
  pub fn branches_with_key(&self, name: &str) -> Result<Vec<(String, String)>> {
    let pattern = format!("^branch\\..*\\.{}$", regex::escape(name));
    let Some(raw) = self.vcs.run_ok(&["config", "--local", "--get-regexp", &pattern])? else {
      return Ok(Vec::new());
    };
    let suffix = format!(".{name}");
    Ok(
      raw
        .lines()
        .filter_map(|line| {
          let (key, value) = line.split_once(' ').unwrap_or((line, ""));
          let branch = key.strip_prefix("branch.")?.strip_suffix(suffix.as_str())?;
          Some((branch.to_string(), value.trim().to_string()))
        })
        .collect(),
    )
  }
}

#[cfg(test)]
mod tests {
  use cl_test_utils::GitRepoTestGuard;

  use super::*;
  use crate::git::GitCli;

  fn store(guard: &GitRepoTestGuard) -> BranchConfigStore {
    BranchConfigStore::new(Arc::new(GitCli::new(guard.path())))
  }

  #[test]
  fn test_absent_key_is_none_not_default() {
    let guard = GitRepoTestGuard::new();
    let store = store(&guard);

    assert_eq!(store.get_str("feature", "gerritissue").unwrap(), None);
    assert_eq!(store.get_int("feature", "gerritissue").unwrap(), None);
    assert_eq!(store.get_bool("feature", "git-find-copies").unwrap(), None);
  }

  #[test]
  fn test_typed_values_round_trip() {
    let guard = GitRepoTestGuard::new();
    let store = store(&guard);

    store.set("feature", "gerritissue", 123_i64).unwrap();
    store.set("feature", "gerritserver", "https://x-review.example.com").unwrap();
    store.set("feature", "git-find-copies", false).unwrap();

    assert_eq!(store.get_int("feature", "gerritissue").unwrap(), Some(123));
    assert_eq!(
      store.get_str("feature", "gerritserver").unwrap().as_deref(),
      Some("https://x-review.example.com")
    );
    assert_eq!(store.get_bool("feature", "git-find-copies").unwrap(), Some(false));
  }

  #[test]
  fn test_unset_missing_key_is_tolerated() {
    let guard = GitRepoTestGuard::new();
    let store = store(&guard);

    store.unset("feature", "never-set").unwrap();
    store.set("feature", "gerritpatchset", 2_i64).unwrap();
    store.unset("feature", "gerritpatchset").unwrap();
    store.unset("feature", "gerritpatchset").unwrap();
    assert_eq!(store.get_int("feature", "gerritpatchset").unwrap(), None);
  }

  #[test]
  fn test_set_opt_none_unsets() {
    let guard = GitRepoTestGuard::new();
    let store = store(&guard);

    store.set_opt("feature", "base-url", Some("https://git.example.com")).unwrap();
    store.set_opt::<String>("feature", "base-url", None).unwrap();
    assert_eq!(store.get_str("feature", "base-url").unwrap(), None);
  }

  #[test]
  fn test_branches_with_key_handles_dotted_names() {
    let guard = GitRepoTestGuard::new();
    let store = store(&guard);

    store.set("feature", "rietveldissue", 10_i64).unwrap();
    store.set("release.1.2", "rietveldissue", 11_i64).unwrap();
    store.set("other", "gerritissue", 12_i64).unwrap();

    let mut found = store.branches_with_key("rietveldissue").unwrap();
    found.sort();
    assert_eq!(
      found,
      vec![
        ("feature".to_string(), "10".to_string()),
        ("release.1.2".to_string(), "11".to_string())
      ]
    );
  }
}
