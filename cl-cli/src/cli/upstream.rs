//! # Upstream Command
//!
//! Prints or changes the branch the current branch tracks.

use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use cl_core::output::format_branch;

use super::{BackendArgs, current_changelist};

#[derive(Args)]
pub struct UpstreamArgs {
  /// New upstream branch
  #[arg(value_name = "BRANCH")]
  pub branch: Option<String>,

  #[command(flatten)]
  pub backend: BackendArgs,
}

pub(crate) fn handle_upstream_command(args: UpstreamArgs) -> Result<i32> {
  let mut cl = current_changelist(args.backend, None)?;
  let Some(upstream) = args.branch else {
    println!("{}", cl.upstream_branch()?);
    return Ok(0);
  };

  let branch = cl.require_branch()?.to_string();
  let ctx = Arc::clone(cl.context());
  ctx.vcs().run(&["branch", "--set-upstream-to", &upstream, &branch])?;
  // The cached merge base belongs to the old upstream.
  ctx.store().unset(&branch, "base")?;

  cl.rebind(Some(format!("refs/heads/{branch}")), args.backend.kind())?;
  println!("Upstream branch set to {}", format_branch(&cl.upstream_branch()?));
  Ok(0)
}
