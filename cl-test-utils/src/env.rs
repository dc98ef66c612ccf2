//! Scoped environment variable overrides.
//!
//! Tests that set process environment must not run concurrently with tests
//! that read the same variables; keep such tests in their own integration
//! test binary or mark them serial by construction.

use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

/// Sets environment variables for the lifetime of the guard and restores the
/// previous values on drop. Also owns a scratch directory, handy for pointing
/// config variables somewhere disposable.
pub struct EnvTestGuard {
  pub temp_dir: TempDir,
  saved: Vec<(String, Option<OsString>)>,
}

impl Default for EnvTestGuard {
  fn default() -> Self {
    Self::new()
  }
}

impl EnvTestGuard {
  pub fn new() -> Self {
    Self {
      temp_dir: TempDir::new().expect("Failed to create temporary directory"),
      saved: Vec::new(),
    }
  }

  /// A guard that points `GIT_CL_CONFIG_DIR` at its scratch directory.
  pub fn with_config_dir() -> Self {
    let mut guard = Self::new();
    let dir = guard.config_dir();
    std::fs::create_dir_all(&dir).expect("Failed to create config directory");
    guard.set("GIT_CL_CONFIG_DIR", &dir);
    guard
  }

  pub fn path(&self) -> &Path {
    self.temp_dir.path()
  }

  pub fn config_dir(&self) -> PathBuf {
    self.temp_dir.path().join("config")
  }

  pub fn set(&mut self, key: &str, value: impl AsRef<std::ffi::OsStr>) -> &mut Self {
    self.save(key);
    // SAFETY: test-only; callers keep environment-mutating tests from
    // running concurrently with readers of the same variable.
    unsafe {
      env::set_var(key, value);
    }
    self
  }

  pub fn remove(&mut self, key: &str) -> &mut Self {
    self.save(key);
    // SAFETY: see `set`.
    unsafe {
      env::remove_var(key);
    }
    self
  }

  fn save(&mut self, key: &str) {
    if !self.saved.iter().any(|(k, _)| k == key) {
      self.saved.push((key.to_string(), env::var_os(key)));
    }
  }
}

impl Drop for EnvTestGuard {
  fn drop(&mut self) {
    for (key, value) in self.saved.drain(..).rev() {
      // SAFETY: see `set`.
      unsafe {
        match value {
          Some(value) => env::set_var(&key, value),
          None => env::remove_var(&key),
        }
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_set_and_restore() {
    let key = "CL_TEST_UTILS_ENV_GUARD";
    {
      let mut guard = EnvTestGuard::new();
      guard.set(key, "value");
      assert_eq!(env::var(key).unwrap(), "value");
    }
    assert!(env::var(key).is_err());
  }
}
