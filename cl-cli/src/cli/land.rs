//! # Land Command
//!
//! Commits the current changelist: server-side submission on Gerrit, the
//! local squash-and-push protocol on Rietveld.

use anyhow::Result;
use clap::Args;

use super::{BackendArgs, current_changelist};
use crate::backend::LandOptions;
use crate::git::validate_contributor;

#[derive(Args)]
pub struct LandArgs {
  /// Branch to land against instead of the upstream
  #[arg(value_name = "BASE")]
  pub base: Option<String>,

  /// Bypass the pre-land hook
  #[arg(long)]
  pub bypass_hooks: bool,

  /// Force yes to questions (don't prompt)
  #[arg(short, long)]
  pub force: bool,

  /// Override the review description
  #[arg(short, long)]
  pub message: Option<String>,

  /// External contributor for the patch, as "First Last <email@example.com>"
  #[arg(short = 'c', long, value_name = "CONTRIBUTOR")]
  pub contributor: Option<String>,

  /// Squash the branch into a single commit (the default)
  #[arg(long, default_value_t = true)]
  pub squash: bool,

  /// Show the full output of the push
  #[arg(long)]
  pub verbose: bool,

  /// Similarity percentage for rename detection
  #[arg(long, value_parser = clap::value_parser!(u8).range(0..=100))]
  pub similarity: Option<u8>,

  /// Find copies as well as renames
  #[arg(long)]
  pub find_copies: bool,

  #[command(flatten)]
  pub backend: BackendArgs,
}

pub(crate) fn handle_land_command(args: LandArgs) -> Result<i32> {
  if let Some(contributor) = &args.contributor {
    validate_contributor(contributor)?;
  }
  let opts = LandOptions {
    bypass_hooks: args.bypass_hooks,
    force: args.force,
    message: args.message,
    contributor: args.contributor,
    verbose: args.verbose,
    base_branch: args.base,
    similarity: args.similarity,
    find_copies: args.find_copies.then_some(true),
  };
  let cl = current_changelist(args.backend, None)?;
  cl.land(&opts)
}
