//! # Baseurl Command

use anyhow::Result;
use clap::Args;
use cl_core::ClError;
use cl_core::git::current_branch;

use crate::context::ClContext;

#[derive(Args)]
pub struct BaseurlArgs {
  /// New base URL for the current branch
  #[arg(value_name = "URL")]
  pub url: Option<String>,
}

pub(crate) fn handle_baseurl_command(args: BaseurlArgs) -> Result<i32> {
  let ctx = ClContext::discover(None)?;
  let branch = current_branch(ctx.vcs())?
    .ok_or_else(|| ClError::precondition("Not on a branch, cannot read or set base-url"))?;
  match args.url {
    Some(url) => {
      println!("Setting base-url to {url}");
      ctx.store().set(&branch, "base-url", url.as_str())?;
    }
    None => {
      println!("Current base-url:");
      println!("{}", ctx.store().get_str(&branch, "base-url")?.unwrap_or_default());
    }
  }
  Ok(0)
}
