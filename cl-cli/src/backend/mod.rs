//! # Review Backends
//!
//! The capability interface every review system implements. A
//! [`Changelist`] holds exactly one backend and calls it without knowing
//! which review system is on the other side; URL shapes, footer conventions
//! and squash handling all live behind this trait.

pub mod gerrit;
pub mod rietveld;

use anyhow::Result;
use cl_core::{BackendKind, ClStatus, ParsedIssueRef};
use serde_json::{Map, Value};
use url::Url;

use crate::changelist::{ChangeSnapshot, Changelist};

/// Commit-queue state of an issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CqState {
  None,
  DryRun,
  Commit,
}

/// Everything `git cl upload` lets the user choose.
#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
  pub bypass_hooks: bool,
  pub bypass_watchlists: bool,
  pub force: bool,
  pub message: Option<String>,
  pub title: Option<String>,
  pub bug: Option<String>,
  pub reviewers: Vec<String>,
  pub cc: Vec<String>,
  pub send_mail: bool,
  pub use_commit_queue: bool,
  pub cq_dry_run: bool,
  pub private: bool,
  pub target_branch: Option<String>,
  pub squash: bool,
  pub no_squash: bool,
  pub topic: Option<String>,
  pub email: Option<String>,
  pub tbr_owners: bool,
  /// Owners added as TBR reviewers. Filled in from the owners lookup when
  /// `tbr_owners` is set.
  pub extra_tbr: Vec<String>,
  pub dependencies: bool,
  pub similarity: Option<u8>,
  pub find_copies: Option<bool>,
}

/// One message on an issue's review thread.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReviewMessage {
  pub date: String,
  pub sender: String,
  pub text: String,
  pub approval: bool,
  pub disapproval: bool,
}

/// How a downloaded patch is applied.
#[derive(Debug, Clone, Default)]
pub struct PatchOptions {
  /// Leave `.rej` files for hunks that do not apply.
  pub reject: bool,
  /// Apply to the index without committing.
  pub nocommit: bool,
  /// Apply relative to this directory.
  pub directory: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct LandOptions {
  pub bypass_hooks: bool,
  pub force: bool,
  pub message: Option<String>,
  /// External author as `First Last <email@example.com>`.
  pub contributor: Option<String>,
  pub verbose: bool,
  /// Branch to land against, defaulting to the upstream.
  pub base_branch: Option<String>,
  pub similarity: Option<u8>,
  pub find_copies: Option<bool>,
}

/// Operations a review system provides to a changelist.
pub trait Backend: Send + Sync {
  fn kind(&self) -> BackendKind;

  /// Server URL issues of this changelist live on.
  fn get_codereview_server(&self, cl: &Changelist) -> Result<String>;

  /// Current description of the changelist's issue.
  fn fetch_description(&self, cl: &Changelist, force: bool) -> Result<String>;

  fn get_most_recent_patchset(&self, cl: &Changelist) -> Result<Option<u64>>;

  /// Fail with [`cl_core::ClError::AuthRequired`] when the server cannot be
  /// reached with credentials.
  fn ensure_authenticated(&self, cl: &Changelist, force: bool) -> Result<()>;

  /// Upload the local change. `args` are the diff base arguments. Returns the
  /// process exit code.
  fn upload_change(&self, cl: &Changelist, opts: &UploadOptions, args: &[String], change: &ChangeSnapshot) -> Result<i32>;

  /// Replace the remote description.
  fn update_description_remote(&self, cl: &Changelist, description: &str, force: bool) -> Result<()>;

  fn set_cq_state(&self, cl: &Changelist, state: CqState) -> Result<()>;

  fn close_issue(&self, cl: &Changelist) -> Result<()>;

  /// Review status. Remote failures are reported as [`ClStatus::Error`].
  fn get_status(&self, cl: &Changelist) -> Result<ClStatus>;

  /// Why try jobs cannot be triggered for the issue, if they cannot.
  fn cannot_trigger_tryjob_reason(&self, cl: &Changelist) -> Result<Option<String>>;

  /// Properties identifying `patchset` to the try-job service.
  fn get_tryjob_properties(&self, cl: &Changelist, patchset: Option<u64>) -> Result<Map<String, Value>>;

  fn parse_issue_url(&self, url: &Url) -> Option<ParsedIssueRef> {
    self.kind().parse_issue_url(url)
  }

  /// Apply the issue's patch to the working copy. Returns the exit code.
  fn patch_with_parsed_issue(&self, cl: &Changelist, issue: &ParsedIssueRef, opts: &PatchOptions) -> Result<i32>;

  fn add_comment(&self, cl: &Changelist, message: &str) -> Result<()>;

  /// Review thread of the issue, oldest first.
  fn messages(&self, cl: &Changelist) -> Result<Vec<ReviewMessage>>;

  fn approving_reviewers(&self, cl: &Changelist) -> Result<Vec<String>>;

  fn issue_owner(&self, cl: &Changelist) -> Result<Option<String>>;

  /// Patchset numbers of the issue, oldest first.
  fn patchset_numbers(&self, cl: &Changelist) -> Result<Vec<u64>>;

  /// Land the changelist. Returns the exit code.
  fn land(&self, cl: &Changelist, opts: &LandOptions) -> Result<i32>;

  /// Whether uploads and try jobs compare the local patchset with the
  /// server's most recent one.
  fn warns_on_patchset_mismatch(&self) -> bool {
    false
  }
}

/// Fresh backend of `kind` with empty caches.
pub fn create_backend(kind: BackendKind) -> Box<dyn Backend> {
  match kind {
    BackendKind::Rietveld => Box::new(rietveld::RietveldBackend::default()),
    BackendKind::Gerrit => Box::new(gerrit::GerritBackend::default()),
  }
}
