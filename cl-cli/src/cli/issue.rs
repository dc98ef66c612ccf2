//! # Issue Command
//!
//! Shows, sets or clears the issue of the current branch, or looks up the
//! branches that track given issues.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use cl_core::ClError;
use cl_core::git::short_branch_name;
use cl_core::issue_ref::parse_issue_number_argument;
use serde_json::json;

use super::{BackendArgs, write_json};
use crate::changelist::Changelist;
use crate::context::ClContext;
use crate::git::local_branch_refs;

#[derive(Args)]
pub struct IssueArgs {
  /// Issue number or URL to set; 0 clears the issue
  #[arg(value_name = "ISSUE")]
  pub issue: Vec<String>,

  /// Look up the branches of the given issues instead
  #[arg(short, long)]
  pub reverse: bool,

  /// Write the result as JSON to this file
  #[arg(long, value_name = "FILE")]
  pub json: Option<PathBuf>,

  #[command(flatten)]
  pub backend: BackendArgs,
}

pub(crate) fn handle_issue_command(args: IssueArgs) -> Result<i32> {
  let ctx = ClContext::discover(None)?;
  if args.reverse {
    return reverse_lookup(&ctx, &args);
  }

  let mut backend = args.backend.kind();
  let parsed = match args.issue.first() {
    Some(arg) => {
      let parsed = parse_issue_number_argument(arg, backend).ok_or_else(|| {
        ClError::invalid_input(
          "Pass a url or number to set the issue, 0 to unset it, or no argument to list it.\n\
           Maybe you want to run git cl status?",
        )
      })?;
      backend = backend.or(parsed.backend);
      Some(parsed)
    }
    None => None,
  };

  let cl = Changelist::for_current_branch(Arc::clone(&ctx), backend)?;
  if let Some(parsed) = parsed {
    cl.set_issue(Some(parsed.issue))?;
  }

  let issue = cl.issue()?;
  let url = cl.issue_url()?;
  println!(
    "Issue number: {} ({})",
    issue.map_or_else(|| "None".to_string(), |i| i.to_string()),
    url.as_deref().unwrap_or("None")
  );
  if let Some(path) = &args.json {
    write_json(path, &json!({ "issue": issue, "issue_url": url }))?;
  }
  Ok(0)
}

/// Issue number to the short names of the branches tracking it.
pub fn issue_branch_map(ctx: &Arc<ClContext>) -> Result<BTreeMap<u64, Vec<String>>> {
  let mut map: BTreeMap<u64, Vec<String>> = BTreeMap::new();
  for branchref in local_branch_refs(ctx.vcs())? {
    let branch = short_branch_name(&branchref).to_string();
    let cl = Changelist::new(Arc::clone(ctx), Some(branchref), None, None)?;
    if let Some(issue) = cl.issue()? {
      map.entry(issue).or_default().push(branch);
    }
  }
  Ok(map)
}

fn reverse_lookup(ctx: &Arc<ClContext>, args: &IssueArgs) -> Result<i32> {
  let map = issue_branch_map(ctx)?;
  let issues: Vec<u64> = if args.issue.is_empty() {
    map.keys().copied().collect()
  } else {
    args
      .issue
      .iter()
      .map(|i| {
        i.parse::<u64>()
          .map_err(|_parse_error| anyhow::Error::from(ClError::invalid_input(format!("Invalid issue number {i}"))))
      })
      .collect::<Result<_>>()?
  };

  let mut result = serde_json::Map::new();
  for issue in issues.into_iter().filter(|i| *i != 0) {
    let branches = map.get(&issue);
    let listed = branches.map_or_else(|| "None".to_string(), |b| b.join(", "));
    println!("Branch for issue number {issue}: {listed}");
    result.insert(issue.to_string(), json!(branches));
  }
  if let Some(path) = &args.json {
    write_json(path, &serde_json::Value::Object(result))?;
  }
  Ok(0)
}
