//! # Patch Command
//!
//! Applies the patch of an issue to the working copy, optionally on a new
//! branch, or reapplies the current branch's issue on top of its upstream.

use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use cl_core::git::ensure_clean_tree;
use cl_core::issue_ref::parse_issue_number_argument;
use cl_core::{BackendKind, ClError};
use tracing::debug;

use super::BackendArgs;
use crate::backend::PatchOptions;
use crate::changelist::Changelist;
use crate::context::ClContext;

#[derive(Args)]
pub struct PatchArgs {
  /// Issue number or URL to patch
  #[arg(value_name = "ISSUE", required_unless_present = "reapply")]
  pub issue: Option<String>,

  /// Create a new branch off trunk for the patch
  #[arg(short = 'b', long = "branch", value_name = "BRANCH")]
  pub new_branch: Option<String>,

  /// With -b, clobber any existing branch
  #[arg(short, long)]
  pub force: bool,

  /// Change to the directory DIR immediately, before doing anything else
  #[arg(short, long, value_name = "DIR")]
  pub directory: Option<String>,

  /// Failed patches spew .rej files rather than failing
  #[arg(long)]
  pub reject: bool,

  /// Don't commit after the patch applies
  #[arg(short = 'n', long = "no-commit")]
  pub nocommit: bool,

  /// Reset the branch and reapply the issue on top of the upstream
  #[arg(long, conflicts_with_all = ["issue", "new_branch"])]
  pub reapply: bool,

  /// With --reapply, pull before reapplying
  #[arg(long, requires = "reapply")]
  pub pull: bool,

  #[command(flatten)]
  pub backend: BackendArgs,
}

pub(crate) fn handle_patch_command(args: PatchArgs) -> Result<i32> {
  let ctx = ClContext::discover(None)?;
  let opts = PatchOptions {
    reject: args.reject,
    nocommit: args.nocommit,
    directory: args.directory.clone(),
  };

  if args.reapply {
    let cl = Changelist::for_current_branch(Arc::clone(&ctx), args.backend.kind())?;
    let issue = cl
      .issue()?
      .ok_or_else(|| ClError::invalid_input("current branch must have an associated issue"))?;
    let upstream = cl.upstream_branch()?;
    let vcs = ctx.vcs();
    vcs.run(&["reset", "--hard", &upstream])?;
    if args.pull {
      vcs.run(&["pull"])?;
    }
    return cl.patch_issue(&issue.to_string(), &opts);
  }

  let arg = args
    .issue
    .as_deref()
    .filter(|a| !a.is_empty())
    .ok_or_else(|| ClError::invalid_input("Must specify issue number or url"))?;
  let parsed = parse_issue_number_argument(arg, args.backend.kind()).ok_or_else(|| {
    ClError::invalid_input(format!(
      "Failed to parse issue argument \"{arg}\". Must be an issue number or a valid URL."
    ))
  })?;

  let vcs = ctx.vcs();
  ensure_clean_tree(vcs, "patch")?;
  if let Some(branch) = &args.new_branch {
    if args.force {
      let (code, _) = vcs.run_with_code(&["branch", "-D", branch])?;
      debug!("Deleting {branch} before patching exited with {code}");
    }
    vcs.run(&["checkout", "-b", branch])?;
  }

  let backend = args.backend.kind().or(parsed.backend);
  let cl = Changelist::for_current_branch(Arc::clone(&ctx), backend)?;
  if cl.backend_kind() == BackendKind::Gerrit && args.directory.is_some() {
    return Err(ClError::invalid_input("--directory is not supported for Gerrit codereview").into());
  }
  cl.patch_issue(arg, &opts)
}
