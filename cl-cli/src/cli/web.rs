//! # Web Command
//!
//! Opens the review page of the current changelist in a browser.

use anyhow::{Context, Result};
use clap::Args;
use cl_core::output::format_url;
use cl_core::{print_error, print_info};

use super::{BackendArgs, current_changelist};

#[derive(Args)]
pub struct WebArgs {
  #[command(flatten)]
  pub backend: BackendArgs,
}

pub(crate) fn handle_web_command(args: WebArgs) -> Result<i32> {
  let cl = current_changelist(args.backend, None)?;
  let Some(url) = cl.issue_url()? else {
    print_error("No issue to open");
    return Ok(1);
  };
  print_info(&format!("Opening {}", format_url(&url)));
  open::that(&url).with_context(|| format!("Failed to open {url} in a browser"))?;
  Ok(0)
}
