//! # Checkout Command
//!
//! Switches to the local branch associated with an issue.

use anyhow::Result;
use clap::Args;
use cl_core::issue_ref::parse_issue_number_argument;
use cl_core::prompts::ask;
use cl_core::{BackendKind, ClError, print_error};

use crate::context::ClContext;

#[derive(Args)]
pub struct CheckoutArgs {
  /// Issue number or URL
  #[arg(value_name = "ISSUE")]
  pub issue: String,
}

/// Local branches whose issue on any backend is `issue`.
pub fn branches_for_issue(ctx: &ClContext, issue: u64) -> Result<Vec<String>> {
  let wanted = issue.to_string();
  let mut branches = Vec::new();
  for kind in BackendKind::ALL {
    for (branch, value) in ctx.store().branches_with_key(kind.issue_key())? {
      if value == wanted {
        branches.push(branch);
      }
    }
  }
  Ok(branches)
}

pub(crate) fn handle_checkout_command(args: CheckoutArgs) -> Result<i32> {
  let parsed = parse_issue_number_argument(&args.issue, None)
    .ok_or_else(|| ClError::invalid_input(format!("Invalid issue argument \"{}\"", args.issue)))?;
  let ctx = ClContext::discover(None)?;
  let branches = branches_for_issue(&ctx, parsed.issue)?;

  let branch = match branches.as_slice() {
    [] => {
      println!("No branch found for issue {}.", parsed.issue);
      return Ok(1);
    }
    [only] => only,
    many => {
      println!("Multiple branches match issue {}:", parsed.issue);
      for (index, branch) in many.iter().enumerate() {
        println!("{index}: {branch}");
      }
      let which = ask("Choose by index", None)?;
      match which.trim().parse::<usize>().ok().and_then(|i| many.get(i)) {
        Some(branch) => branch,
        None => {
          print_error("Invalid selection, not checking out any branch.");
          return Ok(1);
        }
      }
    }
  };
  ctx.vcs().run(&["checkout", branch])?;
  Ok(0)
}
