//! # Invocation Context
//!
//! Everything a command needs that is loaded once per invocation: the git
//! executor, the repository settings snapshot, the branch config store, the
//! user config and a lazily created async runtime for the HTTP clients.
//! Changelists and backends receive it explicitly instead of reaching for
//! global state.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result, anyhow};
use cl_core::{BackendKind, BranchConfigStore, GitCli, RetryPolicy, Settings, UserConfig, Vcs, get_config_dirs};
use directories::BaseDirs;
use tokio::runtime::Runtime;
use tracing::{debug, warn};

pub struct ClContext {
  vcs: Arc<dyn Vcs>,
  settings: Settings,
  store: BranchConfigStore,
  user_config: UserConfig,
  home: PathBuf,
  runtime: Mutex<Option<Arc<Runtime>>>,
}

impl ClContext {
  pub fn new(vcs: Arc<dyn Vcs>, settings: Settings, user_config: UserConfig, home: PathBuf) -> Self {
    Self {
      store: BranchConfigStore::new(Arc::clone(&vcs)),
      vcs,
      settings,
      user_config,
      home,
      runtime: Mutex::new(None),
    }
  }

  /// Discover the repository around the working directory, refresh settings
  /// from `codereview.settings` and load the user config.
  pub fn discover(squash_override: Option<bool>) -> Result<Arc<Self>> {
    let cwd = std::env::current_dir().context("Failed to read the current directory")?;
    let vcs: Arc<dyn Vcs> = Arc::new(GitCli::discover(&cwd)?);
    let settings = Settings::load_with_update(vcs.as_ref(), &cwd)?.with_squash_override(squash_override);
    let user_config = match get_config_dirs().and_then(|dirs| dirs.load_user_config()) {
      Ok(config) => config,
      Err(err) => {
        warn!("Ignoring unreadable user config: {err:#}");
        UserConfig::default()
      }
    };
    let home = BaseDirs::new()
      .map(|dirs| dirs.home_dir().to_path_buf())
      .ok_or_else(|| anyhow!("Failed to determine the home directory"))?;
    debug!("Repository root: {}", vcs.root().display());
    Ok(Arc::new(Self::new(vcs, settings, user_config, home)))
  }

  /// Context for the repository at `root` with default user config.
  pub fn for_repo(root: &Path, home: &Path) -> Result<Arc<Self>> {
    let vcs: Arc<dyn Vcs> = Arc::new(GitCli::new(root));
    let settings = Settings::load(vcs.as_ref())?;
    Ok(Arc::new(Self::new(vcs, settings, UserConfig::default(), home.to_path_buf())))
  }

  pub fn vcs(&self) -> &dyn Vcs {
    self.vcs.as_ref()
  }

  pub const fn settings(&self) -> &Settings {
    &self.settings
  }

  pub const fn store(&self) -> &BranchConfigStore {
    &self.store
  }

  pub const fn user_config(&self) -> &UserConfig {
    &self.user_config
  }

  pub fn home(&self) -> &Path {
    &self.home
  }

  /// Backend for branches that have no issue yet: Gerrit when the repository
  /// names a Gerrit host, then the user's default, then the legacy server.
  pub fn default_backend(&self) -> BackendKind {
    if self.settings.is_gerrit() {
      BackendKind::Gerrit
    } else {
      self.user_config.default_backend.unwrap_or(BackendKind::Rietveld)
    }
  }

  /// Retry policy for review server requests, honoring the user's attempt
  /// count.
  pub fn review_retry(&self) -> RetryPolicy {
    let policy = RetryPolicy::review_server();
    RetryPolicy {
      max_attempts: self.user_config.retry_attempts(),
      ..policy
    }
  }

  /// Shared runtime, created on first use.
  pub fn runtime(&self) -> Result<Arc<Runtime>> {
    let mut slot = self.runtime.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(rt) = slot.as_ref() {
      return Ok(Arc::clone(rt));
    }
    let rt = Arc::new(Runtime::new().context("Failed to create async runtime")?);
    *slot = Some(Arc::clone(&rt));
    Ok(rt)
  }

  /// Drive `future` to completion on the shared runtime.
  pub fn block_on<F: Future>(&self, future: F) -> Result<F::Output> {
    Ok(self.runtime()?.block_on(future))
  }
}

#[cfg(test)]
mod tests {
  use cl_test_utils::GitRepoTestGuard;

  use super::*;

  #[test]
  fn test_default_backend_follows_gerrit_host() -> Result<()> {
    let guard = GitRepoTestGuard::with_initial_commit();
    let ctx = ClContext::for_repo(guard.path(), guard.path())?;
    assert_eq!(ctx.default_backend(), BackendKind::Rietveld);

    ctx.vcs().run(&["config", "gerrit.host", "true"])?;
    let ctx = ClContext::for_repo(guard.path(), guard.path())?;
    assert_eq!(ctx.default_backend(), BackendKind::Gerrit);
    Ok(())
  }

  #[test]
  fn test_runtime_is_shared() -> Result<()> {
    let guard = GitRepoTestGuard::with_initial_commit();
    let ctx = ClContext::for_repo(guard.path(), guard.path())?;
    let first = ctx.runtime()?;
    let second = ctx.runtime()?;
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(ctx.block_on(async { 40 + 2 })?, 42);
    Ok(())
  }
}
