//! # Try Command
//!
//! Schedules try jobs for the latest patchset of the current changelist, or
//! a CQ dry run when no builders are named.

use anyhow::Result;
use clap::Args;
use cl_core::text::cleanup_list;
use cl_core::{ClError, print_error, print_success, print_warning};
use tracing::info;

use super::{BackendArgs, current_changelist};
use crate::backend::CqState;
use crate::tryjobs::{TryOptions, create_buildbucket_client, get_bucket_map, parse_properties, trigger_try_jobs};

#[derive(Args)]
pub struct TryArgs {
  /// Builders to run (comma separated, repeatable)
  #[arg(short, long = "bot", value_name = "BOT")]
  pub bot: Vec<String>,

  /// Buildbucket bucket to send the try jobs to
  #[arg(short = 'B', long, conflicts_with = "master")]
  pub bucket: Option<String>,

  /// Try server master to send the try jobs to
  #[arg(short, long)]
  pub master: Option<String>,

  /// Revision to use for the try job
  #[arg(short, long)]
  pub revision: Option<String>,

  /// Force a clobber before building
  #[arg(short, long)]
  pub clobber: bool,

  /// Extra build property, as key=value (repeatable)
  #[arg(short, long = "property", value_name = "KEY=VALUE")]
  pub properties: Vec<String>,

  /// Project to use for the try job
  #[arg(long)]
  pub project: Option<String>,

  /// Buildbucket host to talk to
  #[arg(long, value_name = "HOST")]
  pub buildbucket_host: Option<String>,

  #[command(flatten)]
  pub backend: BackendArgs,
}

pub(crate) fn handle_try_command(args: TryArgs) -> Result<i32> {
  if args.master.as_deref().is_some_and(|m| m.starts_with("luci.")) {
    return Err(ClError::invalid_input("-m option does not support LUCI. Please use -B option").into());
  }
  let properties = parse_properties(&args.properties)?;
  let mut bots = cleanup_list(&args.bot);
  bots.dedup();

  let cl = current_changelist(args.backend, None)?;
  if cl.issue()?.is_none() {
    return Err(ClError::precondition("Need to upload first").into());
  }
  if let Some(reason) = cl.cannot_trigger_tryjob_reason()? {
    return Err(ClError::precondition(format!("Can't trigger try jobs: {reason}")).into());
  }

  let host = args
    .buildbucket_host
    .clone()
    .unwrap_or_else(|| cl.context().user_config().buildbucket_host().to_string());
  let client = create_buildbucket_client(&cl, &host)?;
  let Some(buckets) = get_bucket_map(&cl, &client, &bots, args.bucket.as_deref(), args.master.as_deref())? else {
    info!("git cl try with no bots defaults to a CQ Dry Run");
    if let Err(err) = cl.set_cq_state(CqState::DryRun) {
      print_warning(
        "failed to trigger CQ Dry Run.\nEither:\n * your project has no CQ\n * you don't have permission to trigger Dry Run\n\
         Consider specifying which bots to trigger manually or asking your project owners for permissions.",
      );
      return Err(err);
    }
    print_success(&format!("scheduled CQ Dry Run on {}", cl.issue_url()?.unwrap_or_default()));
    return Ok(0);
  };

  for builders in buckets.values() {
    if builders.keys().any(|b| b.contains("triggered")) {
      print_error(&format!(
        "You are trying to send a job to a triggered bot. This type of bot requires an initial job from a \
         parent (usually a builder). Instead send your job to the parent.\nBot list: {:?}",
        builders.keys().collect::<Vec<_>>()
      ));
      return Ok(1);
    }
  }

  let patchset = latest_patchset(&cl, "try")?;
  let opts = TryOptions {
    revision: args.revision,
    clobber: args.clobber,
    project: args.project,
    properties,
  };
  match trigger_try_jobs(&cl, &client, buckets, &opts, patchset) {
    Ok(_) => Ok(0),
    Err(err) => {
      print_error(&format!("{err:#}"));
      Ok(1)
    }
  }
}

/// Most recent patchset on the server. Backends that track patchsets
/// locally warn when it differs from the last local upload.
pub(super) fn latest_patchset(cl: &crate::changelist::Changelist, command: &str) -> Result<u64> {
  let issue = cl.require_issue()?;
  let patchset = cl.most_recent_patchset()?.ok_or_else(|| {
    ClError::precondition(format!(
      "Codereview doesn't know about issue {issue}. No access to issue or wrong issue number?\n\
       Either upload first, or pass --patchset explicitly"
    ))
  })?;
  let local = cl.patchset()?;
  if cl.backend().warns_on_patchset_mismatch() && local != Some(patchset) {
    print_warning(&format!(
      "Codereview server has newer patchsets ({patchset}) than most recent upload from local checkout ({}). \
       Did a previous upload fail?\nBy default, git cl {command} uses the latest patchset from codereview, \
       continuing to use patchset {patchset}.",
      local.map_or_else(|| "None".to_string(), |p| p.to_string())
    ));
  }
  Ok(patchset)
}
