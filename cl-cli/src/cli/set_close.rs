//! # Set-Close Command

use anyhow::Result;
use clap::Args;
use cl_core::print_success;

use super::{BackendArgs, current_changelist};

#[derive(Args)]
pub struct SetCloseArgs {
  #[command(flatten)]
  pub backend: BackendArgs,
}

pub(crate) fn handle_set_close_command(args: SetCloseArgs) -> Result<i32> {
  let cl = current_changelist(args.backend, None)?;
  cl.close_issue()?;
  print_success(&format!("Closed issue {}", cl.require_issue()?));
  Ok(0)
}
