//! # Watch Lists
//!
//! People who asked to be CC'd on changes touching certain paths. The
//! repository provides the matcher as `.git/hooks/cl-watchlists`, which reads
//! the changed paths on stdin and prints the watchers' emails.

use std::path::{Path, PathBuf};

use anyhow::Result;
use cl_core::consts::WATCHLISTS_HOOK;
use cl_core::print_warning;
use tracing::debug;

use crate::changelist::ChangeSnapshot;
use crate::hooks::{is_executable, run_script};
use crate::owners::{changed_paths, parse_emails};

pub trait Watchlists {
  /// Emails of everyone watching a file in `change`.
  fn watchers_for(&self, change: &ChangeSnapshot) -> Result<Vec<String>>;
}

#[derive(Debug, Clone)]
pub struct ScriptWatchlists {
  script: PathBuf,
}

impl ScriptWatchlists {
  pub fn for_root(root: &Path) -> Self {
    Self {
      script: root.join(WATCHLISTS_HOOK),
    }
  }
}

impl Watchlists for ScriptWatchlists {
  fn watchers_for(&self, change: &ChangeSnapshot) -> Result<Vec<String>> {
    if !is_executable(&self.script) {
      debug!("No watchlists script at {}", self.script.display());
      return Ok(Vec::new());
    }
    let (code, output) = run_script(&self.script, &change.root, &[], Some(&changed_paths(change)))?;
    if code != 0 {
      // A broken watch list only loses CCs.
      print_warning(&format!("Watchlists script exited with code {code}; no watchers added"));
      return Ok(Vec::new());
    }
    Ok(parse_emails(&output))
  }
}
