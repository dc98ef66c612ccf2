//! # Code Owners
//!
//! Lookup of the owners still needed to approve a change, used by
//! `git cl upload --tbr-owners`. The repository provides the lookup as an
//! executable at `.git/hooks/cl-owners`: it receives the reviewers already on
//! the change as arguments and the changed paths on stdin, and prints the
//! owners of the uncovered files.

use std::path::{Path, PathBuf};

use anyhow::Result;
use cl_core::ClError;
use cl_core::consts::OWNERS_HOOK;
use cl_core::text::cleanup_list;
use tracing::debug;

use crate::changelist::ChangeSnapshot;
use crate::hooks::{is_executable, run_script};

/// Something that knows who owns which files.
pub trait OwnersService {
  /// Owners to add as TBR so every file in `change` has an owner among
  /// `reviewers`. The change author never appears in the result.
  fn reviewers_for_uncovered(&self, change: &ChangeSnapshot, reviewers: &[String]) -> Result<Vec<String>>;
}

/// Owners lookup backed by the repository's `cl-owners` script.
#[derive(Debug, Clone)]
pub struct ScriptOwners {
  script: PathBuf,
}

impl ScriptOwners {
  pub fn for_root(root: &Path) -> Self {
    Self {
      script: root.join(OWNERS_HOOK),
    }
  }
}

/// Email-looking tokens of a script's output, split on commas and whitespace.
pub(crate) fn parse_emails(output: &str) -> Vec<String> {
  let emails: Vec<String> = output
    .split(|c: char| c == ',' || c.is_whitespace())
    .filter(|token| token.contains('@'))
    .map(str::to_string)
    .collect();
  let mut emails = cleanup_list(&emails);
  emails.dedup();
  emails
}

pub(crate) fn changed_paths(change: &ChangeSnapshot) -> String {
  change.files.iter().map(|(_, path)| format!("{path}\n")).collect()
}

impl OwnersService for ScriptOwners {
  fn reviewers_for_uncovered(&self, change: &ChangeSnapshot, reviewers: &[String]) -> Result<Vec<String>> {
    if !is_executable(&self.script) {
      debug!("No owners script at {}", self.script.display());
      return Ok(Vec::new());
    }
    let args: Vec<&str> = reviewers.iter().map(String::as_str).collect();
    let (code, output) = run_script(&self.script, &change.root, &args, Some(&changed_paths(change)))?;
    if code != 0 {
      return Err(ClError::precondition(format!("Owners lookup failed with exit code {code}:\n{}", output.trim_end())).into());
    }
    let mut owners = parse_emails(&output);
    if let Some(author) = &change.author {
      owners.retain(|owner| owner != author);
    }
    Ok(owners)
  }
}
