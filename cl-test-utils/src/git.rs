//! Temporary git repositories for tests.
//!
//! Repositories start on `main` regardless of the machine's
//! `init.defaultBranch`, have a committer identity configured, and can be
//! given a bare `origin` to push to.

use std::path::{Path, PathBuf};
use std::fs;

use anyhow::{Context, Result};
use git2::{BranchType, Oid, Repository, RepositoryInitOptions, Signature};
use tempfile::TempDir;

pub const TEST_USER_NAME: &str = "Git Cl Test User";
pub const TEST_USER_EMAIL: &str = "git-cl-test@example.com";

/// A temporary git repository, removed on drop together with its `origin`.
pub struct GitRepoTestGuard {
  pub temp_dir: TempDir,
  pub repo: Repository,
  remote_dir: Option<TempDir>,
}

fn init_repo(path: &Path, bare: bool) -> Repository {
  let mut opts = RepositoryInitOptions::new();
  opts.initial_head("main").bare(bare);
  let repo = Repository::init_opts(path, &opts).expect("Failed to initialize git repository");
  {
    let mut config = repo.config().expect("Failed to get repository config");
    config
      .set_str("user.name", TEST_USER_NAME)
      .expect("Failed to set user.name");
    config
      .set_str("user.email", TEST_USER_EMAIL)
      .expect("Failed to set user.email");
  }
  repo
}

impl GitRepoTestGuard {
  /// A fresh repository on an unborn `main`, cwd untouched.
  pub fn new() -> Self {
    let temp_dir = TempDir::new().expect("Failed to create temporary directory");
    let repo = init_repo(temp_dir.path(), false);
    assert!(
      temp_dir.path().join(".git").exists(),
      "Git repository was not properly initialized"
    );
    Self {
      temp_dir,
      repo,
      remote_dir: None,
    }
  }

  /// A fresh repository with an initial commit on `main`.
  pub fn with_initial_commit() -> Self {
    let guard = Self::new();
    create_commit(&guard.repo, "README.md", "initial\n", "Initial commit").expect("Failed to create initial commit");
    guard
  }

  pub fn path(&self) -> &Path {
    self.temp_dir.path()
  }

  /// Attach a bare repository as `origin`, push `main` to it and fetch it
  /// back so `refs/remotes/origin/main` exists. Returns the bare repo path.
  pub fn add_origin(&mut self) -> PathBuf {
    let remote_dir = TempDir::new().expect("Failed to create remote directory");
    init_repo(remote_dir.path(), true);
    let url = remote_dir.path().to_string_lossy().to_string();
    {
      let mut remote = self.repo.remote("origin", &url).expect("Failed to add origin");
      remote
        .push(&["refs/heads/main:refs/heads/main"], None)
        .expect("Failed to push main to origin");
      remote
        .fetch(&["+refs/heads/*:refs/remotes/origin/*"], None, None)
        .expect("Failed to fetch origin");
    }
    let path = remote_dir.path().to_path_buf();
    self.remote_dir = Some(remote_dir);
    path
  }
}

impl Default for GitRepoTestGuard {
  fn default() -> Self {
    Self::new()
  }
}

/// Write `file_name` and commit it on HEAD.
pub fn create_commit(repo: &Repository, file_name: &str, content: &str, message: &str) -> Result<Oid> {
  let workdir = repo.workdir().context("Repository has no working directory")?;
  let file_path = workdir.join(file_name);
  if let Some(parent) = file_path.parent() {
    fs::create_dir_all(parent)?;
  }
  fs::write(&file_path, content)?;

  let mut index = repo.index()?;
  index.add_path(Path::new(file_name))?;
  index.write()?;
  let tree = repo.find_tree(index.write_tree()?)?;

  let signature = Signature::now(TEST_USER_NAME, TEST_USER_EMAIL)?;
  let parent = repo.head().ok().and_then(|head| head.peel_to_commit().ok());
  let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();
  Ok(repo.commit(Some("HEAD"), &signature, &signature, message, &tree, &parents)?)
}

/// Create a local branch at `start_point` (a local branch) or HEAD.
pub fn create_branch(repo: &Repository, branch_name: &str, start_point: Option<&str>) -> Result<()> {
  let head = match start_point {
    Some(start) => repo
      .find_branch(start, BranchType::Local)?
      .into_reference()
      .peel_to_commit()?,
    None => repo.head()?.peel_to_commit()?,
  };
  repo.branch(branch_name, &head, false)?;
  Ok(())
}

pub fn checkout_branch(repo: &Repository, branch_name: &str) -> Result<()> {
  let refname = format!("refs/heads/{branch_name}");
  let commit = repo.revparse_single(&refname)?.peel_to_commit()?;
  repo.checkout_tree(commit.as_object(), Some(git2::build::CheckoutBuilder::new().force()))?;
  repo.set_head(&refname)?;
  Ok(())
}

/// Make `branch_name` track `upstream`, either a local branch (`main`) or a
/// remote branch (`origin/main`).
pub fn set_upstream(repo: &Repository, branch_name: &str, upstream: &str) -> Result<()> {
  let mut config = repo.config()?;
  let (remote, merge) = match upstream.split_once('/') {
    Some((remote, branch)) if repo.find_remote(remote).is_ok() => (remote.to_string(), branch.to_string()),
    _ => (".".to_string(), upstream.to_string()),
  };
  config.set_str(&format!("branch.{branch_name}.remote"), &remote)?;
  config.set_str(&format!("branch.{branch_name}.merge"), &format!("refs/heads/{merge}"))?;
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_new_creates_repo_on_main() {
    let guard = GitRepoTestGuard::new();
    assert!(guard.path().join(".git").exists());
    assert_eq!(
      guard.repo.find_reference("HEAD").unwrap().symbolic_target(),
      Some("refs/heads/main")
    );
  }

  #[test]
  fn test_branch_helpers() {
    let guard = GitRepoTestGuard::with_initial_commit();
    create_branch(&guard.repo, "feature", None).unwrap();
    checkout_branch(&guard.repo, "feature").unwrap();
    create_commit(&guard.repo, "a.txt", "a", "Add a").unwrap();
    set_upstream(&guard.repo, "feature", "main").unwrap();

    let head = guard.repo.head().unwrap();
    assert_eq!(head.shorthand(), Some("feature"));
    let config = guard.repo.config().unwrap().snapshot().unwrap();
    assert_eq!(config.get_str("branch.feature.remote").unwrap(), ".");
    assert_eq!(config.get_str("branch.feature.merge").unwrap(), "refs/heads/main");
  }

  #[test]
  fn test_add_origin() {
    let mut guard = GitRepoTestGuard::with_initial_commit();
    let remote = guard.add_origin();
    assert!(remote.join("HEAD").exists());
    assert!(guard.repo.find_reference("refs/remotes/origin/main").is_ok());
  }
}
