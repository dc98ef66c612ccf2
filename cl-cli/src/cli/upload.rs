//! # Upload Command
//!
//! Turns the upload flags into [`UploadOptions`] and runs the upload
//! protocol on the current branch.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use cl_core::text::cleanup_list;

use super::{BackendArgs, current_changelist};
use crate::backend::UploadOptions;
use crate::upload::upload;

#[derive(Args)]
pub struct UploadArgs {
  /// Diff base, or `git diff`-style arguments
  #[arg(value_name = "BASE")]
  pub base: Vec<String>,

  /// Bypass upload presubmit hook
  #[arg(long)]
  pub bypass_hooks: bool,

  /// Don't CC watchers of the touched files
  #[arg(long)]
  pub bypass_watchlists: bool,

  /// Skip confirmation prompts and use the commit log as description
  #[arg(short, long)]
  pub force: bool,

  /// Message for the patchset
  #[arg(short, long, conflicts_with = "message_file")]
  pub message: Option<String>,

  /// File to read the patchset message from
  #[arg(long, value_name = "FILE")]
  pub message_file: Option<PathBuf>,

  /// Title for the patchset
  #[arg(short, long)]
  pub title: Option<String>,

  /// Bugs to add to BUG= lines when the description is created
  #[arg(short, long)]
  pub bug: Option<String>,

  /// Reviewers to add (comma separated, repeatable)
  #[arg(short, long = "reviewers", value_name = "REVIEWERS")]
  pub reviewers: Vec<String>,

  /// People to CC (comma separated, repeatable)
  #[arg(long, value_name = "CC")]
  pub cc: Vec<String>,

  /// Send email to reviewers immediately
  #[arg(short, long)]
  pub send_mail: bool,

  /// Tell the commit queue to commit this patchset
  #[arg(short = 'c', long, conflicts_with = "cq_dry_run")]
  pub use_commit_queue: bool,

  /// Send the patchset to do a CQ dry run right after upload
  #[arg(short = 'd', long)]
  pub cq_dry_run: bool,

  /// Make the change private
  #[arg(long)]
  pub private: bool,

  /// Remote branch the change should land on
  #[arg(long, value_name = "BRANCH")]
  pub target_branch: Option<String>,

  /// Squash multiple commits into one (Gerrit only)
  #[arg(long, conflicts_with = "no_squash")]
  pub squash: bool,

  /// Don't squash multiple commits into one (Gerrit only)
  #[arg(long)]
  pub no_squash: bool,

  /// Topic to specify when uploading (Gerrit only)
  #[arg(long)]
  pub topic: Option<String>,

  /// Email address to use to connect to Rietveld
  #[arg(short = 'e', long)]
  pub email: Option<String>,

  /// Add reviewers in TBR mode
  #[arg(long)]
  pub tbr_owners: bool,

  /// Upload dependent local branches afterwards
  #[arg(long)]
  pub dependencies: bool,

  /// Similarity percentage for rename detection
  #[arg(long, value_parser = clap::value_parser!(u8).range(0..=100))]
  pub similarity: Option<u8>,

  /// Find copies as well as renames
  #[arg(long, overrides_with = "no_find_copies")]
  pub find_copies: bool,

  /// Don't find copies
  #[arg(long)]
  pub no_find_copies: bool,

  #[command(flatten)]
  pub backend: BackendArgs,
}

impl UploadArgs {
  fn squash_override(&self) -> Option<bool> {
    if self.squash {
      Some(true)
    } else if self.no_squash {
      Some(false)
    } else {
      None
    }
  }

  fn to_options(&self) -> Result<UploadOptions> {
    let message = match &self.message_file {
      Some(path) => {
        Some(fs::read_to_string(path).with_context(|| format!("Failed to read message file {}", path.display()))?)
      }
      None => self.message.clone(),
    };
    let find_copies = if self.find_copies {
      Some(true)
    } else if self.no_find_copies {
      Some(false)
    } else {
      None
    };
    Ok(UploadOptions {
      bypass_hooks: self.bypass_hooks,
      bypass_watchlists: self.bypass_watchlists,
      force: self.force,
      message,
      title: self.title.clone(),
      bug: self.bug.clone(),
      reviewers: cleanup_list(&self.reviewers),
      cc: cleanup_list(&self.cc),
      send_mail: self.send_mail,
      use_commit_queue: self.use_commit_queue,
      cq_dry_run: self.cq_dry_run,
      private: self.private,
      target_branch: self.target_branch.clone(),
      squash: self.squash,
      no_squash: self.no_squash,
      topic: self.topic.clone(),
      email: self.email.clone(),
      tbr_owners: self.tbr_owners,
      extra_tbr: Vec::new(),
      dependencies: self.dependencies,
      similarity: self.similarity,
      find_copies,
    })
  }
}

pub(crate) fn handle_upload_command(args: UploadArgs) -> Result<i32> {
  let opts = args.to_options()?;
  let cl = current_changelist(args.backend, args.squash_override())?;
  upload(&cl, &opts, &args.base)
}
