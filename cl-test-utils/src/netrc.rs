//! An isolated `HOME` with a `.netrc`.

use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

/// Writes `content` to `<tmp>/.netrc` and points `HOME` at `<tmp>` until
/// dropped.
pub struct NetrcGuard {
  temp_dir: TempDir,
  netrc_path: PathBuf,
  original_home: Option<OsString>,
}

impl NetrcGuard {
  pub fn new(content: &str) -> Self {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let netrc_path = temp_dir.path().join(".netrc");
    fs::write(&netrc_path, content).expect("Failed to write test .netrc");

    let original_home = env::var_os("HOME");
    // SAFETY: test-only; tests using this guard do not run alongside other
    // readers of HOME.
    unsafe {
      env::set_var("HOME", temp_dir.path());
    }

    Self {
      temp_dir,
      netrc_path,
      original_home,
    }
  }

  pub fn netrc_path(&self) -> &Path {
    &self.netrc_path
  }

  pub fn home_dir(&self) -> &Path {
    self.temp_dir.path()
  }
}

impl Drop for NetrcGuard {
  fn drop(&mut self) {
    // SAFETY: see `new`.
    unsafe {
      match &self.original_home {
        Some(home) => env::set_var("HOME", home),
        None => env::remove_var("HOME"),
      }
    }
  }
}
