//! # Command Line Interface
//!
//! Defines the CLI structure and dispatches each subcommand to its handler.
//! Handlers return the process exit code for outcomes that are not errors.

mod archive;
mod baseurl;
mod checkout;
mod comments;
mod completion;
mod config;
mod description;
mod diff;
mod issue;
mod land;
mod patch;
mod set_close;
mod set_commit;
mod status;
mod tree;
mod try_results;
mod tryjob;
mod upload;
mod upstream;
mod web;

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use cl_core::git::short_branch_name;
use cl_core::{BackendKind, ColorMode};
use clap::builder::Styles;
use clap::builder::styling::AnsiColor;
use clap::{ArgAction, Args, Parser, Subcommand};

use crate::changelist::Changelist;
use crate::context::ClContext;
use crate::git::local_branch_refs;

/// Top-level CLI command for git-cl
#[derive(Parser)]
#[command(name = "git-cl")]
#[command(author = env!("CARGO_PKG_AUTHORS"))]
#[command(about = "Manage code-review changelists on Rietveld and Gerrit")]
#[command(
  long_about = "git-cl ties local git branches to code-review issues.\n\n\
        It uploads branches as changelists, tracks their review status, schedules\n\
        try jobs and lands approved changes, against either a Rietveld server or a\n\
        Gerrit host."
)]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(propagate_version = true)]
#[command(subcommand_required(true))]
#[command(disable_help_subcommand = true)]
#[command(max_term_width = 120)]
#[command(styles = Styles::styled()
    .header(AnsiColor::BrightGreen.on_default().bold().underline())
    .usage(AnsiColor::Green.on_default().bold())
    .literal(AnsiColor::BrightGreen.on_default().bold())
    .placeholder(AnsiColor::BrightWhite.on_default().italic())
    .valid(AnsiColor::Green.on_default())
    .invalid(AnsiColor::BrightRed.on_default().bold())
)]
pub struct Cli {
  /// Sets the level of verbosity (can be used multiple times)
  #[arg(
    short = 'v',
    long = "verbose",
    action = ArgAction::Count,
    long_help = "Sets the level of verbosity for tracing and logging output.\n\n\
             -v: Show info level messages\n\
             -vv: Show debug level messages\n\
             -vvv: Show trace level messages"
  )]
  pub verbose: u8,

  /// Controls when colored output is used
  #[arg(
    long,
    value_enum,
    ignore_case = true,
    default_value_t = ColorMode::Auto,
  )]
  pub colors: ColorMode,

  /// Subcommands
  #[command(subcommand)]
  pub command: Commands,
}

/// Forces one review backend instead of resolving it from branch config.
#[derive(Args, Debug, Clone, Copy, Default)]
pub struct BackendArgs {
  /// Use the Gerrit backend
  #[arg(long, conflicts_with = "rietveld")]
  pub gerrit: bool,

  /// Use the Rietveld backend
  #[arg(long)]
  pub rietveld: bool,
}

impl BackendArgs {
  pub const fn kind(self) -> Option<BackendKind> {
    if self.gerrit {
      Some(BackendKind::Gerrit)
    } else if self.rietveld {
      Some(BackendKind::Rietveld)
    } else {
      None
    }
  }
}

/// Subcommands for git-cl
#[derive(Subcommand)]
pub enum Commands {
  /// Archive branches whose changelists are closed
  #[command(long_about = "Delete local branches whose changelists have been closed.\n\n\
            Each archived branch is tagged as git-cl-archived-<issue>-<branch> first\n\
            so it can be restored, unless --notags is given.")]
  Archive(archive::ArchiveArgs),

  /// Get or set the base URL for the current branch
  #[command(long_about = "Get or set the base URL used by the review server for diffs of this branch.")]
  Baseurl(baseurl::BaseurlArgs),

  /// Check out the local branch tracking an issue
  #[command(long_about = "Check out the local branch that is associated with an issue.\n\n\
            The issue may be given as a number or as a review URL.")]
  Checkout(checkout::CheckoutArgs),

  /// Show or add comments on the changelist
  #[command(long_about = "Print the review thread of the changelist, oldest message first.\n\n\
            Each header is colored by the sender's vote. With --add-comment a message is\n\
            posted instead, and --json-file writes a summary of the thread.")]
  Comments(comments::CommentsArgs),

  /// Generate shell completions
  #[command(long_about = "Generates shell completion scripts for git-cl commands.")]
  Completion(completion::CompletionArgs),

  /// Apply codereview.settings to the repository config
  #[command(long_about = "Apply the repository's codereview.settings to git config.\n\n\
            With a URL the settings file is fetched from that location instead. The\n\
            --activate-update and --deactivate-update flags control whether settings are\n\
            refreshed automatically on every invocation.")]
  Config(config::ConfigArgs),

  /// Show or edit the description of the changelist
  #[command(long_about = "Show or edit the description of the current changelist.\n\n\
            The new description may come from the editor, from --new-description,\n\
            from stdin (-n -) or from the local git log (-n +). The remote is only\n\
            updated when the description changed.")]
  Description(description::DescriptionArgs),

  /// Diff the branch against its last uploaded patchset
  #[command(long_about = "Show the changes made locally since the last upload.\n\n\
            The uploaded patchset is applied on a temporary branch at the merge base and\n\
            compared with the current branch. Requires a clean working tree.")]
  Diff(diff::DiffArgs),

  /// Show or set the issue of the current branch
  #[command(long_about = "Show, set or clear the issue associated with the current branch.\n\n\
            Pass 0 to clear the association. With --reverse, list which local branches\n\
            are associated with which issues.")]
  Issue(issue::IssueArgs),

  /// Land the current changelist
  #[command(long_about = "Commit the current changelist to its upstream branch.\n\n\
            On Gerrit the change is submitted on the server once the uploaded patchset\n\
            matches local HEAD. On Rietveld the branch is squashed and pushed locally and\n\
            the issue is closed.")]
  #[command(alias = "dcommit")]
  #[command(alias = "push")]
  Land(land::LandArgs),

  /// Apply the patch of an issue
  #[command(long_about = "Download the patch of an issue and apply it to the working copy.\n\n\
            With --branch the patch is applied on a new branch created from HEAD. With\n\
            --reapply the issue of the current branch is reapplied on top of its upstream.")]
  Patch(patch::PatchArgs),

  /// Close the issue of the current branch
  #[command(name = "set-close")]
  SetClose(set_close::SetCloseArgs),

  /// Start the commit queue on the current changelist
  #[command(name = "set-commit")]
  #[command(long_about = "Set the commit bit on the current changelist.\n\n\
            With --dry-run only a CQ dry run is requested. With --clear the commit bit\n\
            is removed.")]
  SetCommit(set_commit::SetCommitArgs),

  /// Show the status of changelists
  #[command(long_about = "Show the status of every local branch that has an issue.\n\n\
            Statuses are fetched in parallel. With --field only one value of the\n\
            current branch is printed, which is handy for scripts.")]
  Status(status::StatusArgs),

  /// Show the status of the tree
  #[command(long_about = "Show whether the tree is open for landing, and why if it is closed.")]
  Tree,

  /// Schedule try jobs for the current changelist
  #[command(name = "try")]
  #[command(long_about = "Schedule try jobs on the latest uploaded patchset.\n\n\
            Builders are given with --bot. Without any builder a CQ dry run is\n\
            requested instead.")]
  Try(tryjob::TryArgs),

  /// Show the try jobs of the current changelist
  #[command(name = "try-results")]
  TryResults(try_results::TryResultsArgs),

  /// Upload the current branch for review
  #[command(long_about = "Upload the current branch to the review server.\n\n\
            The diff is computed against the merge base with the upstream unless a base\n\
            is given. Pre-upload hooks run first unless --bypass-hooks is set.")]
  Upload(upload::UploadArgs),

  /// Get or set the upstream of the current branch
  Upstream(upstream::UpstreamArgs),

  /// Open the changelist in a browser
  Web(web::WebArgs),
}

/// Changelist for the current branch of the repository in the working
/// directory.
fn current_changelist(backend: BackendArgs, squash_override: Option<bool>) -> Result<Changelist> {
  let ctx = ClContext::discover(squash_override)?;
  Changelist::for_current_branch(ctx, backend.kind())
}

/// Pretty-printed JSON written to `path`.
fn write_json(path: &Path, value: &serde_json::Value) -> Result<()> {
  let content = serde_json::to_string_pretty(value)?;
  fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
}

/// Full refs of the local branches that track an issue on either backend.
fn branches_with_issues(ctx: &ClContext) -> Result<Vec<String>> {
  let mut refs = Vec::new();
  for branchref in local_branch_refs(ctx.vcs())? {
    let branch = short_branch_name(&branchref);
    let mut has_issue = false;
    for kind in BackendKind::ALL {
      has_issue |= ctx.store().get_int(branch, kind.issue_key())?.is_some_and(|i| i != 0);
    }
    if has_issue {
      refs.push(branchref);
    }
  }
  Ok(refs)
}

pub fn handle_cli(cli: Cli) -> Result<i32> {
  cli.colors.apply();

  match cli.command {
    Commands::Archive(args) => archive::handle_archive_command(args),
    Commands::Baseurl(args) => baseurl::handle_baseurl_command(args),
    Commands::Checkout(args) => checkout::handle_checkout_command(args),
    Commands::Comments(args) => comments::handle_comments_command(args),
    Commands::Completion(args) => completion::handle_completion_command(args),
    Commands::Config(args) => config::handle_config_command(args),
    Commands::Description(args) => description::handle_description_command(args),
    Commands::Diff(args) => diff::handle_diff_command(args),
    Commands::Issue(args) => issue::handle_issue_command(args),
    Commands::Land(args) => land::handle_land_command(args),
    Commands::Patch(args) => patch::handle_patch_command(args),
    Commands::SetClose(args) => set_close::handle_set_close_command(args),
    Commands::SetCommit(args) => set_commit::handle_set_commit_command(args),
    Commands::Status(args) => status::handle_status_command(args),
    Commands::Tree => tree::handle_tree_command(),
    Commands::Try(args) => tryjob::handle_try_command(args),
    Commands::TryResults(args) => try_results::handle_try_results_command(args),
    Commands::Upload(args) => upload::handle_upload_command(args),
    Commands::Upstream(args) => upstream::handle_upstream_command(args),
    Commands::Web(args) => web::handle_web_command(args),
  }
}
