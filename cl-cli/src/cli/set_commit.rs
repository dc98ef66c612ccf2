//! # Set-Commit Command

use anyhow::Result;
use clap::Args;
use cl_core::print_success;

use super::{BackendArgs, current_changelist};
use crate::backend::CqState;

#[derive(Args)]
pub struct SetCommitArgs {
  /// Trigger a CQ dry run instead of a full commit
  #[arg(short, long, conflicts_with = "clear")]
  pub dry_run: bool,

  /// Remove the commit bit
  #[arg(short, long)]
  pub clear: bool,

  #[command(flatten)]
  pub backend: BackendArgs,
}

pub(crate) fn handle_set_commit_command(args: SetCommitArgs) -> Result<i32> {
  let cl = current_changelist(args.backend, None)?;
  let state = if args.clear {
    CqState::None
  } else if args.dry_run {
    CqState::DryRun
  } else {
    CqState::Commit
  };
  cl.set_cq_state(state)?;
  if let Some(url) = cl.issue_url()? {
    print_success(&format!("Commit queue state of {url} set to {state:?}"));
  }
  Ok(0)
}
