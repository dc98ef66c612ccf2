//! # Git Command Helpers
//!
//! The [`Vcs`] trait is the only way git-cl talks to the working copy. The
//! production implementation, [`GitCli`], spawns the `git` executable; tests
//! drive the same code against real temporary repositories.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{Context, Result};
use thiserror::Error;
use tracing::debug;

use crate::consts;
use crate::error::ClError;

/// Output of a git sub-process.
#[derive(Debug, Clone, Default)]
pub struct GitCommandOutput {
  pub stdout: String,
  pub stderr: String,
  /// Exit code, `-1` when the process was killed by a signal.
  pub code: i32,
}

impl GitCommandOutput {
  pub const fn success(&self) -> bool {
    self.code == 0
  }

  /// Stdout followed by stderr, separated by a newline when both are set.
  pub fn combined(&self) -> String {
    let mut combined = self.stdout.clone();
    if !self.stderr.is_empty() {
      if !combined.is_empty() && !combined.ends_with('\n') {
        combined.push('\n');
      }
      combined.push_str(&self.stderr);
    }
    combined
  }
}

/// A git invocation exited non-zero.
#[derive(Debug, Error)]
#[error("Command \"git {}\" failed with exit code {code}:\n{output}", args.join(" "))]
pub struct GitCommandError {
  pub args: Vec<String>,
  pub code: i32,
  pub output: String,
}

/// Extra knobs for a single invocation.
#[derive(Debug, Default, Clone, Copy)]
pub struct RunOptions<'a> {
  /// Written to the child's stdin, which is then closed.
  pub stdin: Option<&'a str>,
  /// Extra environment variables.
  pub env: &'a [(&'a str, &'a str)],
}

/// Version-control executor.
///
/// Only [`Vcs::execute`] must be provided; the rest are conveniences with the
/// error conventions used throughout git-cl.
pub trait Vcs: Send + Sync {
  /// Top-level directory of the working copy.
  fn root(&self) -> &Path;

  /// Run `git <args>` and capture its output regardless of exit status.
  fn execute(&self, args: &[&str], opts: RunOptions<'_>) -> Result<GitCommandOutput>;

  /// Run a command and return its stdout, failing on non-zero exit.
  fn run(&self, args: &[&str]) -> Result<String> {
    checked(args, self.execute(args, RunOptions::default())?)
  }

  /// Run a command and return `(exit code, stdout+stderr)`.
  fn run_with_code(&self, args: &[&str]) -> Result<(i32, String)> {
    let out = self.execute(args, RunOptions::default())?;
    Ok((out.code, out.combined()))
  }

  /// Like [`Vcs::run`] with additional environment variables.
  fn run_with_env(&self, args: &[&str], env: &[(&str, &str)]) -> Result<String> {
    checked(args, self.execute(args, RunOptions { stdin: None, env })?)
  }

  /// Like [`Vcs::run`] feeding `stdin` to the process.
  fn run_with_stdin(&self, args: &[&str], stdin: &str) -> Result<String> {
    checked(
      args,
      self.execute(
        args,
        RunOptions {
          stdin: Some(stdin),
          env: &[],
        },
      )?,
    )
  }

  /// Run a command whose failure is an expected outcome; `None` on non-zero
  /// exit.
  fn run_ok(&self, args: &[&str]) -> Result<Option<String>> {
    let out = self.execute(args, RunOptions::default())?;
    Ok(out.success().then_some(out.stdout))
  }
}

fn checked(args: &[&str], out: GitCommandOutput) -> Result<String> {
  if out.success() {
    Ok(out.stdout)
  } else {
    Err(
      GitCommandError {
        args: args.iter().map(|a| (*a).to_string()).collect(),
        code: out.code,
        output: out.combined(),
      }
      .into(),
    )
  }
}

/// [`Vcs`] backed by the `git` executable.
#[derive(Debug, Clone)]
pub struct GitCli {
  root: PathBuf,
}

impl GitCli {
  /// Use `root` as the working copy without validation.
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  /// Locate the working copy containing `dir`.
  pub fn discover(dir: &Path) -> Result<Self> {
    let probe = Self::new(dir);
    let top = probe
      .run_ok(&["rev-parse", "--show-toplevel"])?
      .ok_or_else(|| ClError::precondition(format!("{} is not inside a git repository", dir.display())))?;
    Ok(Self::new(top.trim()))
  }
}

impl Vcs for GitCli {
  fn root(&self) -> &Path {
    &self.root
  }

  fn execute(&self, args: &[&str], opts: RunOptions<'_>) -> Result<GitCommandOutput> {
    debug!("git {}", args.join(" "));
    let mut cmd = Command::new(consts::GIT_EXECUTABLE);
    cmd
      .args(args)
      .current_dir(&self.root)
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .stdin(if opts.stdin.is_some() { Stdio::piped() } else { Stdio::null() });
    for (key, value) in opts.env {
      cmd.env(key, value);
    }

    let mut child = cmd
      .spawn()
      .with_context(|| format!("Failed to execute git command: {args:?}"))?;
    if let (Some(input), Some(mut pipe)) = (opts.stdin, child.stdin.take()) {
      pipe
        .write_all(input.as_bytes())
        .with_context(|| format!("Failed to write stdin of git command: {args:?}"))?;
    }
    let output = child
      .wait_with_output()
      .with_context(|| format!("Failed to wait for git command: {args:?}"))?;

    Ok(GitCommandOutput {
      stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
      stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
      code: output.status.code().unwrap_or(-1),
    })
  }
}

/// Strip `refs/heads/` from a branch ref.
pub fn short_branch_name(branch_ref: &str) -> &str {
  branch_ref.strip_prefix("refs/heads/").unwrap_or(branch_ref)
}

/// Full ref of the checked out branch, `None` on a detached HEAD.
pub fn current_branch_ref(vcs: &dyn Vcs) -> Result<Option<String>> {
  Ok(
    vcs
      .run_ok(&["symbolic-ref", "HEAD"])?
      .map(|s| s.trim().to_string())
      .filter(|s| !s.is_empty()),
  )
}

/// Short name of the checked out branch, `None` on a detached HEAD.
pub fn current_branch(vcs: &dyn Vcs) -> Result<Option<String>> {
  Ok(current_branch_ref(vcs)?.map(|r| short_branch_name(&r).to_string()))
}

/// Resolve a revision to a full hash.
pub fn rev_parse(vcs: &dyn Vcs, rev: &str) -> Result<String> {
  Ok(vcs.run(&["rev-parse", rev])?.trim().to_string())
}

/// Best common ancestor of two revisions.
pub fn merge_base(vcs: &dyn Vcs, a: &str, b: &str) -> Result<String> {
  Ok(vcs.run(&["merge-base", a, b])?.trim().to_string())
}

/// Read a single git config value.
pub fn config_get(vcs: &dyn Vcs, key: &str) -> Result<Option<String>> {
  Ok(vcs.run_ok(&["config", key])?.map(|v| v.trim().to_string()))
}

/// Committer timestamp of `rev` in seconds since the epoch.
pub fn commit_timestamp(vcs: &dyn Vcs, rev: &str) -> Result<i64> {
  let raw = vcs.run(&["show", "-s", "--format=%ct", rev])?;
  raw
    .trim()
    .parse()
    .with_context(|| format!("Unexpected committer timestamp for {rev}: {raw:?}"))
}

/// Fail with a precondition error when the working tree has uncommitted
/// changes.
pub fn ensure_clean_tree(vcs: &dyn Vcs, action: &str) -> Result<()> {
  // Refresh stat info so touched-but-unchanged files do not count as dirty.
  let _ = vcs.run_with_code(&["update-index", "--refresh", "-q"])?;
  let dirty = vcs.run(&["diff-index", "--name-status", "HEAD"])?;
  if dirty.trim().is_empty() {
    return Ok(());
  }
  Err(
    ClError::precondition(format!(
      "Cannot {action} with a dirty tree. Commit or stash your changes first.\nUncommitted files: (git diff-index --name-status HEAD)\n{}",
      dirty.trim_end()
    ))
    .into(),
  )
}

#[cfg(test)]
mod tests {
  use cl_test_utils::{GitRepoTestGuard, create_commit};

  use super::*;

  #[test]
  fn test_run_returns_stdout() {
    let guard = GitRepoTestGuard::new();
    create_commit(&guard.repo, "a.txt", "a", "first").unwrap();
    let git = GitCli::new(guard.path());

    let subject = git.run(&["log", "-1", "--format=%s"]).unwrap();
    assert_eq!(subject.trim(), "first");
  }

  #[test]
  fn test_run_fails_with_command_error() {
    let guard = GitRepoTestGuard::new();
    let git = GitCli::new(guard.path());

    let err = git.run(&["rev-parse", "--verify", "does-not-exist"]).unwrap_err();
    let cmd_err = err.downcast_ref::<GitCommandError>().unwrap();
    assert_ne!(cmd_err.code, 0);
    assert_eq!(cmd_err.args[0], "rev-parse");
  }

  #[test]
  fn test_run_with_code_reports_failure_without_error() {
    let guard = GitRepoTestGuard::new();
    let git = GitCli::new(guard.path());

    let (code, _) = git.run_with_code(&["config", "no.such.key"]).unwrap();
    assert_ne!(code, 0);
  }

  #[test]
  fn test_run_with_stdin_and_env() {
    let guard = GitRepoTestGuard::new();
    let git = GitCli::new(guard.path());

    let hash = git.run_with_stdin(&["hash-object", "--stdin"], "hello\n").unwrap();
    assert_eq!(hash.trim(), "ce013625030ba8dba906f756967f9e9ca394464a");

    let out = git
      .run_with_env(&["var", "GIT_COMMITTER_IDENT"], &[("GIT_COMMITTER_DATE", "1500000000 +0000")])
      .unwrap();
    assert!(out.contains("1500000000 +0000"));
  }

  #[test]
  fn test_current_branch_and_detached_head() {
    let guard = GitRepoTestGuard::new();
    create_commit(&guard.repo, "a.txt", "a", "first").unwrap();
    let git = GitCli::new(guard.path());

    assert_eq!(current_branch(&git).unwrap().as_deref(), Some("main"));
    assert_eq!(current_branch_ref(&git).unwrap().as_deref(), Some("refs/heads/main"));

    git.run(&["checkout", "--detach", "HEAD"]).unwrap();
    assert_eq!(current_branch(&git).unwrap(), None);
  }

  #[test]
  fn test_ensure_clean_tree() {
    let guard = GitRepoTestGuard::new();
    create_commit(&guard.repo, "a.txt", "a", "first").unwrap();
    let git = GitCli::new(guard.path());

    assert!(ensure_clean_tree(&git, "upload").is_ok());

    std::fs::write(guard.path().join("a.txt"), "changed").unwrap();
    let err = ensure_clean_tree(&git, "upload").unwrap_err();
    assert!(err.to_string().contains("Cannot upload with a dirty tree"));
    assert!(err.to_string().contains("a.txt"));
  }

  #[test]
  fn test_short_branch_name() {
    assert_eq!(short_branch_name("refs/heads/feature"), "feature");
    assert_eq!(short_branch_name("feature"), "feature");
    assert_eq!(short_branch_name("refs/remotes/origin/main"), "refs/remotes/origin/main");
  }

  #[test]
  fn test_discover_finds_top_level() {
    let guard = GitRepoTestGuard::new();
    let nested = guard.path().join("sub/dir");
    std::fs::create_dir_all(&nested).unwrap();

    let git = GitCli::discover(&nested).unwrap();
    assert_eq!(
      std::fs::canonicalize(git.root()).unwrap(),
      std::fs::canonicalize(guard.path()).unwrap()
    );
  }
}
