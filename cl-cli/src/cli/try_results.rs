//! # Try-Results Command
//!
//! Prints the try jobs of a patchset grouped by outcome, or writes them as
//! JSON.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use cl_core::print_error;

use super::tryjob::latest_patchset;
use super::{BackendArgs, current_changelist, write_json};
use crate::tryjobs::{create_buildbucket_client, fetch_try_jobs, format_try_jobs, try_results_json};

#[derive(Args)]
pub struct TryResultsArgs {
  /// Patchset to show results for; defaults to the latest
  #[arg(short, long)]
  pub patchset: Option<u64>,

  /// Print the bucket of each builder
  #[arg(long)]
  pub print_master: bool,

  /// Buildbucket host to talk to
  #[arg(long, value_name = "HOST")]
  pub buildbucket_host: Option<String>,

  /// Write the results as JSON to this file
  #[arg(long, value_name = "FILE")]
  pub json: Option<PathBuf>,

  #[command(flatten)]
  pub backend: BackendArgs,
}

pub(crate) fn handle_try_results_command(args: TryResultsArgs) -> Result<i32> {
  let cl = current_changelist(args.backend, None)?;
  let patchset = match args.patchset {
    Some(patchset) => patchset,
    None => latest_patchset(&cl, "try-results")?,
  };

  let host = args
    .buildbucket_host
    .clone()
    .unwrap_or_else(|| cl.context().user_config().buildbucket_host().to_string());
  let client = create_buildbucket_client(&cl, &host)?;
  let jobs = match fetch_try_jobs(&cl, &client, patchset) {
    Ok(jobs) => jobs,
    Err(err) => {
      print_error(&format!("Buildbucket error: {err:#}"));
      return Ok(1);
    }
  };

  match &args.json {
    Some(path) => write_json(path, &try_results_json(&jobs))?,
    None => println!("{}", format_try_jobs(&jobs, args.print_master)),
  }
  Ok(0)
}
