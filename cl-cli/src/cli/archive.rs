//! # Archive Command
//!
//! Deletes local branches whose changelists are closed, tagging each tip
//! first so the work can be recovered.

use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use cl_core::git::current_branch;
use cl_core::prompts::confirm;
use cl_core::{ClStatus, print_error, print_success};
use tabled::settings::Style;
use tabled::{Table, Tabled};

use crate::changelist::Changelist;
use crate::consts::ARCHIVE_TAG_PREFIX;
use crate::context::ClContext;
use crate::git::local_branch_refs;
use crate::status::get_cl_statuses;

#[derive(Args)]
pub struct ArchiveArgs {
  /// Maximum number of status requests in flight
  #[arg(short = 'j', long = "maxjobs", value_name = "N")]
  pub max_jobs: Option<usize>,

  /// Bypass the confirmation prompt
  #[arg(short, long)]
  pub force: bool,

  /// Show what would be archived without doing it
  #[arg(short, long)]
  pub dry_run: bool,

  /// Do not tag archived branches
  #[arg(short = 't', long)]
  pub notags: bool,
}

#[derive(Tabled)]
struct ArchiveRow {
  #[tabled(rename = "Branch name")]
  branch: String,
  #[tabled(rename = "Archival tag name")]
  tag: String,
}

/// Tag that preserves an archived branch.
pub fn archive_tag(issue: u64, branch: &str) -> String {
  format!("{ARCHIVE_TAG_PREFIX}-{issue}-{branch}")
}

pub(crate) fn handle_archive_command(args: ArchiveArgs) -> Result<i32> {
  let ctx = ClContext::discover(None)?;
  let branches = local_branch_refs(ctx.vcs())?;
  if branches.is_empty() {
    return Ok(0);
  }

  println!("Finding all branches associated with closed issues...");
  let changes = branches
    .into_iter()
    .map(|branchref| Changelist::new(Arc::clone(&ctx), Some(branchref), None, None))
    .collect::<Result<Vec<_>>>()?;
  let max_jobs = args.max_jobs.unwrap_or_else(|| ctx.user_config().status_max_jobs());

  let mut statuses = Vec::with_capacity(changes.len());
  get_cl_statuses(&changes, true, max_jobs, |index, status| statuses.push((index, status)));
  let mut proposal = Vec::new();
  for (index, status) in statuses {
    let cl = &changes[index];
    if status == Some(ClStatus::Closed)
      && let (Some(branch), Some(issue)) = (cl.branch(), cl.issue()?)
    {
      proposal.push(ArchiveRow {
        branch: branch.to_string(),
        tag: archive_tag(issue, branch),
      });
    }
  }
  proposal.sort_by(|a, b| a.branch.cmp(&b.branch));

  if proposal.is_empty() {
    println!("No branches with closed codereview issues found.");
    return Ok(0);
  }

  println!("\nBranches with closed issues that will be archived:\n");
  if args.notags {
    for row in &proposal {
      println!("  {}", row.branch);
    }
  } else {
    println!("{}", Table::new(&proposal).with(Style::sharp()));
  }

  if args.dry_run {
    println!("\nNo changes were made (dry run).\n");
    return Ok(0);
  }
  let vcs = ctx.vcs();
  if let Some(current) = current_branch(vcs)?
    && proposal.iter().any(|row| row.branch == current)
  {
    print_error(&format!(
      "You are currently on a branch '{current}' which is associated with a closed codereview issue, \
       so archive cannot proceed. Please checkout another branch and run this command again."
    ));
    return Ok(1);
  }
  if !args.force && !confirm("Proceed with deletion?", true)? {
    println!("Aborted.");
    return Ok(1);
  }

  for row in &proposal {
    if !args.notags {
      vcs.run(&["tag", &row.tag, &row.branch])?;
    }
    vcs.run(&["branch", "-D", &row.branch])?;
  }
  print_success("Job's done!");
  Ok(0)
}
