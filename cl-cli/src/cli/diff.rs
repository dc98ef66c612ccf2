//! # Diff Command
//!
//! Shows how the local branch differs from the patchset last uploaded to
//! its issue. The patchset is applied on a scratch branch at the merge base,
//! which is removed again however the diff ends.

use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use cl_core::consts::DIFF_BRANCH;
use cl_core::git::ensure_clean_tree;
use cl_core::{ClError, Vcs};
use tracing::{debug, warn};

use super::{BackendArgs, current_changelist};
use crate::backend::PatchOptions;
use crate::changelist::Changelist;
use crate::git::get_or_create_merge_base;

#[derive(Args)]
pub struct DiffArgs {
  /// Generate a diffstat
  #[arg(long)]
  pub stat: bool,

  #[command(flatten)]
  pub backend: BackendArgs,
}

pub(crate) fn handle_diff_command(args: DiffArgs) -> Result<i32> {
  let cl = current_changelist(args.backend, None)?;
  print!("{}", diff_against_last_upload(&cl, args.stat)?);
  Ok(0)
}

/// Output of `git diff` from the last uploaded patchset to the branch.
pub(crate) fn diff_against_last_upload(cl: &Changelist, stat: bool) -> Result<String> {
  let ctx = cl.context();
  let vcs = ctx.vcs();
  ensure_clean_tree(vcs, "diff")?;
  let branch = cl.require_branch()?.to_string();
  let issue = cl
    .issue()?
    .ok_or_else(|| ClError::precondition(format!("No issue found for current branch ({branch})")))?;
  let base = get_or_create_merge_base(ctx, &branch, &cl.upstream_branch()?)?;

  vcs.run(&["checkout", "-q", "-b", DIFF_BRANCH, &base])?;
  let diff = diff_on_scratch_branch(cl, vcs, issue, &branch, stat);
  if diff.is_err() {
    let _ = vcs.run_with_code(&["reset", "--hard"])?;
  }
  vcs.run(&["checkout", "-q", &branch])?;
  vcs.run(&["branch", "-q", "-D", DIFF_BRANCH])?;
  debug!("Removed {DIFF_BRANCH}");
  diff
}

fn diff_on_scratch_branch(cl: &Changelist, vcs: &dyn Vcs, issue: u64, branch: &str, stat: bool) -> Result<String> {
  let scratch = Changelist::new(
    Arc::clone(cl.context()),
    Some(format!("refs/heads/{DIFF_BRANCH}")),
    None,
    Some(cl.backend_kind()),
  )?;
  let kind = cl.backend_kind();
  scratch.set_branch_config(kind.server_key(), cl.codereview_server()?)?;

  let code = scratch.patch_issue(&issue.to_string(), &PatchOptions::default())?;
  if code != 0 {
    warn!("Applying issue {issue} exited with {code}");
    return Err(ClError::precondition(format!("Could not apply the last uploaded patchset of issue {issue}")).into());
  }

  let mut diff_args = vec!["diff", "--no-ext-diff"];
  if stat {
    diff_args.push("--stat");
  }
  diff_args.extend([DIFF_BRANCH, branch, "--"]);
  vcs.run(&diff_args)
}
