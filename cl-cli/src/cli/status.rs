//! # Status Command
//!
//! Lists every local branch tied to an issue with its review status, then
//! details the current branch.

use std::sync::Arc;

use anyhow::Result;
use clap::{Args, ValueEnum};
use cl_core::{ClError, ClStatus};
use cl_core::git::current_branch_ref;
use owo_colors::OwoColorize;

use super::{BackendArgs, branches_with_issues};
use crate::changelist::Changelist;
use crate::context::ClContext;
use crate::status::get_cl_statuses;

/// A single value `status --field` can print.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusField {
  Desc,
  Id,
  Patch,
  Status,
  Url,
}

#[derive(Args)]
pub struct StatusArgs {
  /// Print only one field of the current changelist
  #[arg(long, value_enum)]
  pub field: Option<StatusField>,

  /// Do not retrieve review status
  #[arg(short, long)]
  pub fast: bool,

  /// Maximum number of status requests in flight
  #[arg(short = 'j', long = "maxjobs", value_name = "N")]
  pub max_jobs: Option<usize>,

  /// Operate on this issue instead of the current branch's (requires --field)
  #[arg(short, long, value_name = "ISSUE")]
  pub issue: Option<u64>,

  #[command(flatten)]
  pub backend: BackendArgs,
}

pub(crate) fn handle_status_command(args: StatusArgs) -> Result<i32> {
  let ctx = ClContext::discover(None)?;
  if let Some(field) = args.field {
    return print_field(&ctx, &args, field);
  }
  if args.issue.is_some() {
    return Err(ClError::invalid_input("--field must be specified with --issue").into());
  }

  let branches = branches_with_issues(&ctx)?;
  if branches.is_empty() {
    println!("No local branch found.");
    return Ok(0);
  }

  let mut changes = branches
    .into_iter()
    .map(|branchref| Changelist::new(Arc::clone(&ctx), Some(branchref), None, None))
    .collect::<Result<Vec<_>>>()?;
  changes.sort_by(|a, b| a.branch().cmp(&b.branch()));

  let max_jobs = args.max_jobs.unwrap_or_else(|| ctx.user_config().status_max_jobs());
  let width = changes.iter().filter_map(Changelist::branch).map(str::len).max().unwrap_or(0);
  println!("Branches associated with reviews:");
  let mut rows = StatusRows::new(changes.len());
  get_cl_statuses(&changes, !args.fast, max_jobs, |index, status| {
    for (cl, status) in rows.arrived(&changes, index, status) {
      println!("{}", format_row(cl, status, width));
    }
  });

  println!();
  let cl = Changelist::for_current_branch(ctx, args.backend.kind())?;
  println!("Current branch: {}", cl.branch().unwrap_or("(detached)"));
  let Some(issue) = cl.issue()? else {
    println!("No issue assigned.");
    return Ok(0);
  };
  println!(
    "Issue number: {issue} ({})",
    cl.issue_url()?.unwrap_or_default().blue().underline()
  );
  if !args.fast {
    println!("Issue description:");
    println!("{}", cl.pretty_description()?);
  }
  Ok(0)
}

/// Rows of the branch listing, released in branch order as soon as every
/// earlier branch has its status.
struct StatusRows {
  statuses: Vec<Option<Option<ClStatus>>>,
  printed: usize,
}

impl StatusRows {
  fn new(len: usize) -> Self {
    Self {
      statuses: vec![None; len],
      printed: 0,
    }
  }

  fn arrived<'a>(
    &mut self,
    changes: &'a [Changelist],
    index: usize,
    status: Option<ClStatus>,
  ) -> Vec<(&'a Changelist, Option<ClStatus>)> {
    self.statuses[index] = Some(status);
    let mut ready = Vec::new();
    while let Some(Some(status)) = self.statuses.get(self.printed) {
      ready.push((&changes[self.printed], *status));
      self.printed += 1;
    }
    ready
  }
}

fn format_row(cl: &Changelist, status: Option<ClStatus>, width: usize) -> String {
  let url = cl.issue_url().ok().flatten().unwrap_or_default();
  let status = status.map(|s| format!(" ({})", s.colored())).unwrap_or_default();
  format!("  {:>width$} : {url}{status}", cl.branch().unwrap_or_default())
}

fn print_field(ctx: &Arc<ClContext>, args: &StatusArgs, field: StatusField) -> Result<i32> {
  let branchref = current_branch_ref(ctx.vcs())?;
  let cl = Changelist::new(Arc::clone(ctx), branchref, args.issue, args.backend.kind())?;
  let value = match field {
    StatusField::Desc => Some(cl.description(false)?),
    StatusField::Id => cl.issue()?.map(|i| i.to_string()),
    StatusField::Patch => match cl.issue()? {
      Some(_) => cl.most_recent_patchset()?.map(|p| p.to_string()),
      None => None,
    },
    StatusField::Status => cl.status()?.map(|s| s.as_str().to_string()),
    StatusField::Url => cl.issue_url()?,
  };
  if let Some(value) = value {
    println!("{value}");
  }
  Ok(0)
}

#[cfg(test)]
mod tests {
  use cl_core::git::short_branch_name;
  use cl_core::{GitCli, Vcs};
  use cl_test_utils::GitRepoTestGuard;

  use super::*;

  fn short_names(refs: &[String]) -> Vec<&str> {
    let mut names: Vec<&str> = refs.iter().map(|r| short_branch_name(r)).collect();
    names.sort_unstable();
    names
  }

  #[test]
  fn test_only_branches_with_issues_are_listed() -> Result<()> {
    let guard = GitRepoTestGuard::with_initial_commit();
    let vcs = GitCli::new(guard.path());
    vcs.run(&["branch", "with-gerrit"])?;
    vcs.run(&["branch", "with-rietveld"])?;
    vcs.run(&["branch", "cleared"])?;
    let ctx = ClContext::for_repo(guard.path(), guard.path())?;
    ctx.store().set("with-gerrit", "gerritissue", 12_i64)?;
    ctx.store().set("with-rietveld", "rietveldissue", 34_i64)?;
    ctx.store().set("cleared", "gerritissue", 0_i64)?;

    let refs = branches_with_issues(&ctx)?;
    assert_eq!(short_names(&refs), vec!["with-gerrit", "with-rietveld"]);
    Ok(())
  }

  #[test]
  fn test_rows_are_released_in_branch_order() -> Result<()> {
    let guard = GitRepoTestGuard::with_initial_commit();
    let ctx = ClContext::for_repo(guard.path(), guard.path())?;
    let changes = ["a", "b", "c"]
      .iter()
      .map(|name| Changelist::new(Arc::clone(&ctx), Some(format!("refs/heads/{name}")), None, None))
      .collect::<Result<Vec<_>>>()?;
    let branches = |rows: Vec<(&Changelist, Option<ClStatus>)>| -> Vec<String> {
      rows.iter().map(|(cl, _)| cl.branch().unwrap_or_default().to_string()).collect()
    };

    let mut rows = StatusRows::new(changes.len());
    assert!(rows.arrived(&changes, 2, Some(ClStatus::Lgtm)).is_empty());
    assert_eq!(branches(rows.arrived(&changes, 0, Some(ClStatus::Waiting))), vec!["a"]);
    let rest = rows.arrived(&changes, 1, None);
    assert_eq!(rest[1].1, Some(ClStatus::Lgtm));
    assert_eq!(branches(rest), vec!["b", "c"]);
    Ok(())
  }
}
