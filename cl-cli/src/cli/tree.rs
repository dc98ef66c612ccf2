//! # Tree Command

use anyhow::Result;

use crate::context::ClContext;
use crate::tree_status::{TreeStatus, get_tree_status, get_tree_status_reason};

/// Exit code 0 when the tree is open, 1 when it is not, 2 when no status
/// URL is configured.
pub(crate) fn handle_tree_command() -> Result<i32> {
  let ctx = ClContext::discover(None)?;
  let status = get_tree_status(&ctx)?;
  if status == TreeStatus::Unset {
    println!("You must configure your tree status URL by running \"git cl config\".");
    return Ok(2);
  }
  println!("The tree is {status}");
  println!();
  if let Some(reason) = get_tree_status_reason(&ctx)? {
    println!("{reason}");
  }
  Ok(if status == TreeStatus::Open { 0 } else { 1 })
}
