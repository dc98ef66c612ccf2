//! # Repository Hooks
//!
//! Executable scripts under `.git/hooks` that git-cl runs around uploads and
//! landings. A pre-upload or pre-land hook receives the upstream base as its
//! argument and the description on stdin; a non-zero exit stops the
//! operation. Lines of the form `R=a,b` on its stdout suggest reviewers.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::LazyLock;

use anyhow::{Context, Result};
use cl_core::consts::{POST_UPLOAD_HOOK, POSTUPSTREAM_HOOK, PRE_LAND_HOOK, PRE_UPLOAD_HOOK};
use cl_core::text::cleanup_list;
use cl_core::{ClError, print_warning};
use regex::Regex;
use tracing::{debug, info};

use crate::changelist::ChangeSnapshot;
use crate::consts::GERRIT_HOOK_MARKERS;

static SUGGESTED_REVIEWERS: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"^\s*R\s*=\s*(.+?)\s*$").expect("Failed to compile suggested reviewers regex"));

/// Which gate a hook guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
  PreUpload,
  PreLand,
}

impl HookKind {
  const fn relative_path(self) -> &'static str {
    match self {
      Self::PreUpload => PRE_UPLOAD_HOOK,
      Self::PreLand => PRE_LAND_HOOK,
    }
  }
}

/// Outcome of a passing hook.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HookResult {
  /// Reviewers the hook suggests adding to the description.
  pub reviewers: Vec<String>,
  pub output: String,
}

pub(crate) fn is_executable(path: &Path) -> bool {
  let Ok(metadata) = fs::metadata(path) else {
    return false;
  };
  #[cfg(unix)]
  {
    use std::os::unix::fs::PermissionsExt;
    metadata.is_file() && metadata.permissions().mode() & 0o111 != 0
  }
  #[cfg(not(unix))]
  {
    metadata.is_file()
  }
}

pub(crate) fn run_script(path: &Path, root: &Path, args: &[&str], stdin: Option<&str>) -> Result<(i32, String)> {
  debug!("Running hook {} {:?}", path.display(), args);
  let mut child = Command::new(path)
    .args(args)
    .current_dir(root)
    .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
    .stdout(Stdio::piped())
    .stderr(Stdio::piped())
    .spawn()
    .with_context(|| format!("Failed to run hook {}", path.display()))?;
  if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
    pipe
      .write_all(input.as_bytes())
      .with_context(|| format!("Failed to write to hook {}", path.display()))?;
  }
  let output = child
    .wait_with_output()
    .with_context(|| format!("Failed to wait for hook {}", path.display()))?;
  let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
  text.push_str(&String::from_utf8_lossy(&output.stderr));
  Ok((output.status.code().unwrap_or(-1), text))
}

/// Run the pre-upload or pre-land hook for `change`, if one is installed.
pub fn run_hook(kind: HookKind, change: &ChangeSnapshot) -> Result<HookResult> {
  let path = change.root.join(kind.relative_path());
  if !is_executable(&path) {
    debug!("No executable hook at {}", path.display());
    return Ok(HookResult::default());
  }
  let (code, output) = run_script(&path, &change.root, &[&change.upstream], Some(&change.description))?;
  if code != 0 {
    return Err(
      ClError::precondition(format!(
        "Hook {} failed with exit code {code}:\n{}",
        kind.relative_path(),
        output.trim_end()
      ))
      .into(),
    );
  }
  let suggested: Vec<String> = output
    .lines()
    .filter_map(|line| SUGGESTED_REVIEWERS.captures(line))
    .map(|caps| caps[1].to_string())
    .collect();
  let reviewers = cleanup_list(&suggested);
  info!("Hook {} passed", kind.relative_path());
  Ok(HookResult { reviewers, output })
}

/// Run `.git/hooks/post-cl-upload` when the repository opts in.
pub fn run_post_upload_hook(root: &Path, enabled: bool, issue: u64, patchset: Option<u64>) -> Result<()> {
  if !enabled {
    return Ok(());
  }
  let path = root.join(POST_UPLOAD_HOOK);
  if !is_executable(&path) {
    return Ok(());
  }
  let patchset = patchset.map(|p| p.to_string()).unwrap_or_default();
  let (code, output) = run_script(&path, root, &[&issue.to_string(), &patchset], None)?;
  print!("{output}");
  if code != 0 {
    print_warning(&format!("Post-upload hook exited with code {code}"));
  }
  Ok(())
}

/// Run `.git/hooks/post-cl-land` after a successful landing.
pub fn run_post_land_hook(root: &Path, args: &[&str]) -> Result<()> {
  let path = root.join(POSTUPSTREAM_HOOK);
  if !is_executable(&path) {
    return Ok(());
  }
  let (code, output) = run_script(&path, root, args, None)?;
  print!("{output}");
  if code != 0 {
    print_warning(&format!("Post-land hook exited with code {code}"));
  }
  Ok(())
}

fn commit_msg_hook(root: &Path) -> PathBuf {
  root.join(".git").join("hooks").join("commit-msg")
}

/// Whether the commit-msg hook generated by Gerrit is installed.
pub fn has_gerrit_commit_msg_hook(root: &Path) -> bool {
  fs::read_to_string(commit_msg_hook(root)).is_ok_and(|data| GERRIT_HOOK_MARKERS.iter().all(|m| data.contains(m)))
}

/// Install `script` as `.git/hooks/commit-msg`. Refuses anything that is
/// not a script, since git would fail to run it on every commit.
pub fn install_commit_msg_hook(root: &Path, script: &str) -> Result<PathBuf> {
  let hook = commit_msg_hook(root);
  if !script.starts_with("#!") {
    return Err(
      ClError::precondition(format!(
        "Downloaded commit-msg hook is not a script.\n\
         Install Gerrit's commit-msg hook into {} and chmod +x it.",
        hook.display()
      ))
      .into(),
    );
  }
  if let Some(dir) = hook.parent() {
    fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
  }
  fs::write(&hook, script).with_context(|| format!("Failed to write {}", hook.display()))?;
  #[cfg(unix)]
  {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(&hook, fs::Permissions::from_mode(0o700))
      .with_context(|| format!("Failed to make {} executable", hook.display()))?;
  }
  info!("Installed commit-msg hook at {}", hook.display());
  Ok(hook)
}

/// Whether a commit-msg hook of any origin would run on commit.
pub fn has_commit_msg_hook(root: &Path) -> bool {
  is_executable(&commit_msg_hook(root))
}

/// Warn about Gerrit's commit-msg hook, which squash uploads do not need,
/// and offer to remove it.
pub fn gerrit_commit_msg_hook_check(root: &Path, offer_removal: bool) -> Result<()> {
  if !has_gerrit_commit_msg_hook(root) {
    return Ok(());
  }
  print_warning(
    "You have Gerrit commit-msg hook installed.\n\
     It is not necessary for uploading with git cl in squash mode, \
     and may interfere with it in subtle ways.\n\
     We recommend you remove the commit-msg hook.",
  );
  if offer_removal {
    if cl_core::prompts::confirm("Do you want to remove it now?", false)? {
      let hook = commit_msg_hook(root);
      fs::remove_file(&hook).with_context(|| format!("Failed to remove {}", hook.display()))?;
      println!("Gerrit commit-msg hook removed.");
    } else {
      println!("OK, will keep Gerrit commit-msg hook in place.");
    }
  }
  Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
  use tempfile::TempDir;

  use super::*;

  pub(crate) fn write_hook(root: &Path, relative: &str, body: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, body).unwrap();
    #[cfg(unix)]
    {
      use std::os::unix::fs::PermissionsExt;
      fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    }
  }

  fn snapshot(root: &Path) -> ChangeSnapshot {
    ChangeSnapshot {
      root: root.to_path_buf(),
      description: "Fix the frobnicator".to_string(),
      upstream: "abc123".to_string(),
      ..ChangeSnapshot::default()
    }
  }

  #[test]
  fn test_missing_hook_passes() -> Result<()> {
    let dir = TempDir::new()?;
    assert_eq!(run_hook(HookKind::PreUpload, &snapshot(dir.path()))?, HookResult::default());
    Ok(())
  }

  #[cfg(unix)]
  #[test]
  fn test_hook_suggests_reviewers() -> Result<()> {
    let dir = TempDir::new()?;
    write_hook(
      dir.path(),
      PRE_UPLOAD_HOOK,
      "#!/bin/sh\nread desc\necho \"checked $1: $desc\"\necho 'R=b@example.com, a@example.com'\n",
    );
    let result = run_hook(HookKind::PreUpload, &snapshot(dir.path()))?;
    assert_eq!(result.reviewers, vec!["a@example.com", "b@example.com"]);
    assert!(result.output.contains("checked abc123: Fix the frobnicator"));
    Ok(())
  }

  #[cfg(unix)]
  #[test]
  fn test_failing_hook_is_fatal() -> Result<()> {
    let dir = TempDir::new()?;
    write_hook(dir.path(), PRE_LAND_HOOK, "#!/bin/sh\necho 'lint errors'\nexit 3\n");
    let err = run_hook(HookKind::PreLand, &snapshot(dir.path())).unwrap_err();
    let message = err.to_string();
    assert!(message.contains("exit code 3"));
    assert!(message.contains("lint errors"));
    Ok(())
  }

  #[test]
  fn test_detects_gerrit_commit_msg_hook() -> Result<()> {
    let dir = TempDir::new()?;
    assert!(!has_gerrit_commit_msg_hook(dir.path()));
    write_hook(
      dir.path(),
      ".git/hooks/commit-msg",
      "#!/bin/sh\n# From Gerrit Code Review 2.x\nadd_ChangeId() {\n  :\n}\n",
    );
    assert!(has_gerrit_commit_msg_hook(dir.path()));
    gerrit_commit_msg_hook_check(dir.path(), false)?;
    Ok(())
  }

  #[test]
  fn test_install_commit_msg_hook() -> Result<()> {
    let dir = TempDir::new()?;
    let err = install_commit_msg_hook(dir.path(), "<html>Not Found</html>").unwrap_err();
    assert!(matches!(err.downcast_ref::<ClError>(), Some(ClError::Precondition(_))));
    assert!(!commit_msg_hook(dir.path()).exists());

    let hook = install_commit_msg_hook(dir.path(), "#!/bin/sh\nexit 0\n")?;
    assert_eq!(hook, dir.path().join(".git/hooks/commit-msg"));
    assert!(has_commit_msg_hook(dir.path()));
    Ok(())
  }
}
