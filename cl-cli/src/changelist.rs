//! # Changelist
//!
//! Binds a local branch to at most one issue on exactly one review backend.
//! Issue, patchset and server identity are read lazily from the branch
//! config store and written back as soon as they change.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Result;
use cl_core::consts::DESCRIPTION_WRAP_WIDTH;
use cl_core::git::{current_branch_ref, short_branch_name};
use cl_core::issue_ref::parse_issue_number_argument;
use cl_core::text::wrap_text;
use cl_core::{BackendKind, ClError, ClStatus, ConfigValue};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::backend::{Backend, CqState, LandOptions, PatchOptions, ReviewMessage, create_backend};
use crate::context::ClContext;
use crate::git;

/// What hooks and uploads see of the local change.
#[derive(Debug, Clone, Default)]
pub struct ChangeSnapshot {
  pub name: String,
  pub description: String,
  pub root: PathBuf,
  /// `(status, path)` pairs relative to the upstream.
  pub files: Vec<(String, String)>,
  pub issue: Option<u64>,
  pub patchset: Option<u64>,
  pub author: Option<String>,
  pub upstream: String,
}

#[derive(Debug, Default)]
struct ClCache {
  issue: Option<Option<u64>>,
  patchset: Option<Option<u64>>,
  description: Option<String>,
  upstream_branch: Option<String>,
  remote: Option<(String, String)>,
}

pub struct Changelist {
  ctx: Arc<ClContext>,
  branchref: Option<String>,
  backend: Box<dyn Backend>,
  cache: Mutex<ClCache>,
}

impl Changelist {
  /// Changelist for `branchref`. An explicit `issue` takes precedence over
  /// the branch config; an explicit `backend` skips resolution.
  pub fn new(
    ctx: Arc<ClContext>,
    branchref: Option<String>,
    issue: Option<u64>,
    backend: Option<BackendKind>,
  ) -> Result<Self> {
    let kind = resolve_backend(&ctx, branchref.as_deref().map(short_branch_name), backend)?;
    debug!(
      "Changelist for {} bound to {kind}",
      branchref.as_deref().unwrap_or("(detached)")
    );
    let cache = ClCache {
      issue: issue.map(Some),
      ..ClCache::default()
    };
    Ok(Self {
      ctx,
      branchref,
      backend: create_backend(kind),
      cache: Mutex::new(cache),
    })
  }

  /// Changelist for the checked out branch.
  pub fn for_current_branch(ctx: Arc<ClContext>, backend: Option<BackendKind>) -> Result<Self> {
    let branchref = current_branch_ref(ctx.vcs())?;
    Self::new(ctx, branchref, None, backend)
  }

  /// Point the changelist at another branch, replacing the backend and every
  /// cached value together.
  pub fn rebind(&mut self, branchref: Option<String>, backend: Option<BackendKind>) -> Result<()> {
    let kind = resolve_backend(&self.ctx, branchref.as_deref().map(short_branch_name), backend)?;
    let fresh = create_backend(kind);
    self.backend = fresh;
    self.branchref = branchref;
    *self.cache.get_mut().unwrap_or_else(PoisonError::into_inner) = ClCache::default();
    Ok(())
  }

  fn cache(&self) -> std::sync::MutexGuard<'_, ClCache> {
    self.cache.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn context(&self) -> &Arc<ClContext> {
    &self.ctx
  }

  pub fn backend(&self) -> &dyn Backend {
    self.backend.as_ref()
  }

  pub fn backend_kind(&self) -> BackendKind {
    self.backend.kind()
  }

  pub fn branchref(&self) -> Option<&str> {
    self.branchref.as_deref()
  }

  /// Short branch name.
  pub fn branch(&self) -> Option<&str> {
    self.branchref.as_deref().map(short_branch_name)
  }

  pub fn require_branch(&self) -> Result<&str> {
    self
      .branch()
      .ok_or_else(|| ClError::precondition("ERROR: unable to determine current branch (detached HEAD?)").into())
  }

  pub fn branch_config(&self, key: &str) -> Result<Option<String>> {
    match self.branch() {
      Some(branch) => self.ctx.store().get_str(branch, key),
      None => Ok(None),
    }
  }

  pub fn set_branch_config(&self, key: &str, value: impl Into<ConfigValue>) -> Result<()> {
    self.ctx.store().set(self.require_branch()?, key, value)
  }

  /// Issue number, `None` when the branch has none.
  pub fn issue(&self) -> Result<Option<u64>> {
    if let Some(issue) = self.cache().issue {
      return Ok(issue);
    }
    let issue = self.read_positive(self.backend_kind().issue_key())?;
    self.cache().issue = Some(issue);
    Ok(issue)
  }

  pub fn require_issue(&self) -> Result<u64> {
    self.issue()?.ok_or_else(|| {
      ClError::precondition(format!(
        "No issue is associated with branch {}. Upload one with \"git cl upload\" or set it with \"git cl issue\".",
        self.branch().unwrap_or("(detached)")
      ))
      .into()
    })
  }

  pub fn patchset(&self) -> Result<Option<u64>> {
    if let Some(patchset) = self.cache().patchset {
      return Ok(patchset);
    }
    let patchset = self.read_positive(self.backend_kind().patchset_key())?;
    self.cache().patchset = Some(patchset);
    Ok(patchset)
  }

  fn read_positive(&self, key: &str) -> Result<Option<u64>> {
    let Some(branch) = self.branch() else {
      return Ok(None);
    };
    let value = self.ctx.store().get_int(branch, key)?;
    Ok(value.and_then(|v| u64::try_from(v).ok()).filter(|v| *v != 0))
  }

  /// Link the branch to `issue`, or unlink it with `None`/`0`. Unlinking
  /// clears the patchset, the server and backend-specific keys as well.
  pub fn set_issue(&self, issue: Option<u64>) -> Result<()> {
    let kind = self.backend_kind();
    let issue = issue.filter(|i| *i != 0);
    match issue {
      Some(issue) => {
        let server = self.codereview_server()?;
        let branch = self.require_branch()?;
        let store = self.ctx.store();
        store.set(branch, kind.issue_key(), issue)?;
        store.set(branch, kind.server_key(), server.as_str())?;
        info!("Branch {branch} now tracks {kind} issue {issue}");
      }
      None => {
        if let Some(branch) = self.branch() {
          let store = self.ctx.store();
          store.unset(branch, "last-upload-hash")?;
          for key in [kind.issue_key(), kind.patchset_key(), kind.server_key()] {
            store.unset(branch, key)?;
          }
          for key in kind.extra_keys() {
            store.unset(branch, key)?;
          }
        }
        self.cache().patchset = Some(None);
      }
    }
    let mut cache = self.cache();
    cache.issue = Some(issue);
    cache.description = None;
    Ok(())
  }

  /// Work on `issue` for the rest of this invocation without touching the
  /// branch config.
  pub fn remember_issue(&self, issue: u64) {
    let mut cache = self.cache();
    cache.issue = Some(Some(issue));
    cache.patchset = None;
    cache.description = None;
  }

  /// Record the uploaded patchset; `None`/`0` clears it.
  pub fn set_patchset(&self, patchset: Option<u64>) -> Result<()> {
    let patchset = patchset.filter(|p| *p != 0);
    if let Some(branch) = self.branch() {
      let key = self.backend_kind().patchset_key();
      self.ctx.store().set_opt(branch, key, patchset)?;
    }
    self.cache().patchset = Some(patchset);
    Ok(())
  }

  pub fn codereview_server(&self) -> Result<String> {
    self.backend.get_codereview_server(self)
  }

  /// `<server>/<issue>`, `None` without an issue.
  pub fn issue_url(&self) -> Result<Option<String>> {
    let Some(issue) = self.issue()? else {
      return Ok(None);
    };
    Ok(Some(format!("{}/{issue}", self.codereview_server()?)))
  }

  /// Remote description, fetched once per changelist.
  pub fn description(&self, force: bool) -> Result<String> {
    if !force && let Some(description) = self.cache().description.clone() {
      return Ok(description);
    }
    let description = if self.issue()?.is_some() {
      self.backend.fetch_description(self, force)?
    } else {
      String::new()
    };
    self.cache().description = Some(description.clone());
    Ok(description)
  }

  /// Description wrapped for terminal display.
  pub fn pretty_description(&self) -> Result<String> {
    Ok(wrap_text(&self.description(false)?, DESCRIPTION_WRAP_WIDTH, "  "))
  }

  pub fn update_description(&self, description: &str, force: bool) -> Result<()> {
    self.require_issue()?;
    self.backend.update_description_remote(self, description, force)?;
    self.cache().description = Some(description.to_string());
    Ok(())
  }

  pub fn most_recent_patchset(&self) -> Result<Option<u64>> {
    self.backend.get_most_recent_patchset(self)
  }

  /// Review status, `None` without an issue.
  pub fn status(&self) -> Result<Option<ClStatus>> {
    if self.issue()?.is_none() {
      return Ok(None);
    }
    Ok(Some(self.backend.get_status(self)?))
  }

  pub fn ensure_authenticated(&self, force: bool) -> Result<()> {
    self.backend.ensure_authenticated(self, force)
  }

  pub fn set_cq_state(&self, state: CqState) -> Result<()> {
    self.require_issue()?;
    self.backend.set_cq_state(self, state)
  }

  pub fn close_issue(&self) -> Result<()> {
    self.require_issue()?;
    self.backend.close_issue(self)
  }

  pub fn add_comment(&self, message: &str) -> Result<()> {
    self.require_issue()?;
    self.backend.add_comment(self, message)
  }

  pub fn messages(&self) -> Result<Vec<ReviewMessage>> {
    self.require_issue()?;
    self.backend.messages(self)
  }

  pub fn approving_reviewers(&self) -> Result<Vec<String>> {
    self.backend.approving_reviewers(self)
  }

  pub fn issue_owner(&self) -> Result<Option<String>> {
    self.backend.issue_owner(self)
  }

  pub fn cannot_trigger_tryjob_reason(&self) -> Result<Option<String>> {
    self.backend.cannot_trigger_tryjob_reason(self)
  }

  pub fn tryjob_properties(&self, patchset: Option<u64>) -> Result<Map<String, Value>> {
    self.backend.get_tryjob_properties(self, patchset)
  }

  pub fn land(&self, opts: &LandOptions) -> Result<i32> {
    self.backend.land(self, opts)
  }

  /// Apply the patch named by `arg`, an issue number or review URL.
  pub fn patch_issue(&self, arg: &str, opts: &PatchOptions) -> Result<i32> {
    let parsed = parse_issue_number_argument(arg, Some(self.backend_kind())).ok_or_else(|| {
      ClError::invalid_input(format!(
        "Failed to parse issue argument \"{arg}\". Must be an issue number or a valid URL."
      ))
    })?;
    self.backend.patch_with_parsed_issue(self, &parsed, opts)
  }

  /// Upstream of the branch as a local ref.
  pub fn upstream_branch(&self) -> Result<String> {
    if let Some(upstream) = self.cache().upstream_branch.clone() {
      return Ok(upstream);
    }
    let upstream = git::upstream_branch(&self.ctx, self.require_branch()?)?;
    self.cache().upstream_branch = Some(upstream.clone());
    Ok(upstream)
  }

  /// `(remote, remote tracking ref)` the branch ultimately tracks.
  pub fn remote_branch(&self) -> Result<(String, String)> {
    if let Some(remote) = self.cache().remote.clone() {
      return Ok(remote);
    }
    let remote = git::remote_branch(&self.ctx, self.require_branch()?)?;
    self.cache().remote = Some(remote.clone());
    Ok(remote)
  }

  pub fn remote_url(&self) -> Result<Option<String>> {
    let (remote, _) = self.remote_branch()?;
    git::remote_url(&self.ctx, &remote)
  }

  /// Snapshot of the change against `upstream` for hooks and uploads. The
  /// description comes from the issue when there is one, else from the log.
  pub fn change_snapshot(&self, upstream: &str, author: Option<String>) -> Result<ChangeSnapshot> {
    let vcs = self.ctx.vcs();
    let issue = self.issue()?;
    let description = match issue {
      Some(_) => self.description(false)?,
      None => git::create_description_from_log(vcs, &[upstream.to_string()])?,
    };
    Ok(ChangeSnapshot {
      name: issue.map_or_else(|| "None".to_string(), |i| i.to_string()),
      description,
      root: vcs.root().to_path_buf(),
      files: git::changed_files(vcs, upstream)?,
      issue,
      patchset: self.patchset()?,
      author,
      upstream: upstream.to_string(),
    })
  }
}

/// Backend for `branch`: the explicit choice, else the first backend with a
/// stored issue, else the repository default.
pub fn resolve_backend(ctx: &ClContext, branch: Option<&str>, explicit: Option<BackendKind>) -> Result<BackendKind> {
  if let Some(kind) = explicit {
    return Ok(kind);
  }
  if let Some(branch) = branch {
    for kind in BackendKind::ALL {
      let issue = ctx.store().get_int(branch, kind.issue_key())?;
      if issue.is_some_and(|i| i != 0) {
        debug!("Branch {branch} has a {kind} issue");
        return Ok(kind);
      }
    }
  }
  Ok(ctx.default_backend())
}

#[cfg(test)]
mod tests {
  use cl_test_utils::GitRepoTestGuard;

  use super::*;

  fn setup() -> (GitRepoTestGuard, Arc<ClContext>) {
    let guard = GitRepoTestGuard::with_initial_commit();
    let ctx = ClContext::for_repo(guard.path(), guard.path()).unwrap();
    (guard, ctx)
  }

  fn branch_keys(ctx: &ClContext) -> Vec<String> {
    ctx
      .vcs()
      .run_ok(&["config", "--get-regexp", r"^branch\.feature1\."])
      .unwrap()
      .unwrap_or_default()
      .lines()
      .map(str::to_string)
      .collect()
  }

  #[test]
  fn test_no_issue_means_no_status() -> Result<()> {
    let (_guard, ctx) = setup();
    let cl = Changelist::new(ctx, Some("refs/heads/feature1".into()), None, None)?;
    assert_eq!(cl.issue()?, None);
    assert_eq!(cl.status()?, None);
    assert_eq!(cl.issue_url()?, None);
    assert!(cl.require_issue().is_err());
    Ok(())
  }

  #[test]
  fn test_resolves_repo_default_backend() -> Result<()> {
    let (guard, ctx) = setup();
    ctx.vcs().run(&["config", "gerrit.host", "true"])?;
    let ctx = ClContext::for_repo(guard.path(), guard.path())?;
    let cl = Changelist::new(ctx, Some("refs/heads/feature1".into()), None, None)?;
    assert_eq!(cl.backend_kind(), BackendKind::Gerrit);
    assert_eq!(cl.issue()?, None);
    Ok(())
  }

  #[test]
  fn test_resolves_backend_from_stored_issue() -> Result<()> {
    let (_guard, ctx) = setup();
    ctx.vcs().run(&["config", "branch.feature1.gerritissue", "123"])?;
    let cl = Changelist::new(Arc::clone(&ctx), Some("refs/heads/feature1".into()), None, None)?;
    assert_eq!(cl.backend_kind(), BackendKind::Gerrit);
    assert_eq!(cl.issue()?, Some(123));

    ctx.vcs().run(&["config", "branch.feature1.rietveldissue", "7"])?;
    let cl = Changelist::new(ctx, Some("refs/heads/feature1".into()), None, None)?;
    assert_eq!(cl.backend_kind(), BackendKind::Rietveld);
    Ok(())
  }

  #[test]
  fn test_zero_issue_is_unset() -> Result<()> {
    let (_guard, ctx) = setup();
    ctx.vcs().run(&["config", "branch.feature1.gerritissue", "0"])?;
    let cl = Changelist::new(ctx, Some("refs/heads/feature1".into()), None, Some(BackendKind::Gerrit))?;
    assert_eq!(cl.issue()?, None);
    Ok(())
  }

  #[test]
  fn test_set_issue_round_trip_restores_config() -> Result<()> {
    let (_guard, ctx) = setup();
    ctx.vcs().run(&["config", "branch.feature1.merge", "refs/heads/main"])?;
    let before = branch_keys(&ctx);

    let cl = Changelist::new(
      Arc::clone(&ctx),
      Some("refs/heads/feature1".into()),
      None,
      Some(BackendKind::Gerrit),
    )?;
    ctx
      .store()
      .set("feature1", "gerritserver", "https://chromium-review.googlesource.com")?;
    cl.set_issue(Some(42))?;
    cl.set_patchset(Some(3))?;
    ctx.store().set("feature1", "gerritsquashhash", "abc")?;
    ctx.store().set("feature1", "last-upload-hash", "def")?;
    assert_eq!(cl.issue()?, Some(42));
    assert_eq!(cl.patchset()?, Some(3));
    assert_eq!(
      ctx.store().get_str("feature1", "gerritserver")?.as_deref(),
      Some("https://chromium-review.googlesource.com")
    );

    cl.set_issue(None)?;
    assert_eq!(cl.issue()?, None);
    assert_eq!(cl.patchset()?, None);
    assert_eq!(branch_keys(&ctx), before);
    Ok(())
  }

  #[test]
  fn test_rebind_resets_cached_state() -> Result<()> {
    let (_guard, ctx) = setup();
    ctx.vcs().run(&["config", "branch.feature1.gerritissue", "5"])?;
    ctx.vcs().run(&["config", "branch.feature2.rietveldissue", "9"])?;
    let mut cl = Changelist::new(ctx, Some("refs/heads/feature1".into()), None, None)?;
    assert_eq!(cl.issue()?, Some(5));

    cl.rebind(Some("refs/heads/feature2".into()), None)?;
    assert_eq!(cl.branch(), Some("feature2"));
    assert_eq!(cl.backend_kind(), BackendKind::Rietveld);
    assert_eq!(cl.issue()?, Some(9));
    Ok(())
  }

  #[test]
  fn test_patch_issue_rejects_garbage() -> Result<()> {
    let (_guard, ctx) = setup();
    let cl = Changelist::new(ctx, Some("refs/heads/main".into()), None, Some(BackendKind::Gerrit))?;
    let err = cl.patch_issue("not-an-issue", &PatchOptions::default()).unwrap_err();
    assert!(err.to_string().contains("Failed to parse issue argument \"not-an-issue\""));
    Ok(())
  }
}
