//! # Description Command
//!
//! Shows or rewrites the description of a changelist on the review server.

use std::io::{self, Read};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use cl_core::editor::ExternalEditor;
use cl_core::git::current_branch_ref;
use cl_core::issue_ref::parse_issue_number_argument;
use cl_core::{ChangeDescription, ClError};
use tracing::info;

use super::BackendArgs;
use crate::changelist::Changelist;
use crate::context::ClContext;
use crate::git::{create_description_from_log, get_or_create_merge_base};

#[derive(Args)]
pub struct DescriptionArgs {
  /// Issue number or URL; defaults to the current branch's issue
  #[arg(value_name = "ISSUE")]
  pub issue: Option<String>,

  /// Display the description instead of opening an editor
  #[arg(short, long)]
  pub display: bool,

  /// New description to set; '-' reads stdin, '+' uses the local commit log
  #[arg(short, long = "new-description", value_name = "TEXT", allow_hyphen_values = true)]
  pub new_description: Option<String>,

  /// Delete any unpublished Gerrit edits for this issue without prompting
  #[arg(short, long)]
  pub force: bool,

  #[command(flatten)]
  pub backend: BackendArgs,
}

pub(crate) fn handle_description_command(args: DescriptionArgs) -> Result<i32> {
  let ctx = ClContext::discover(None)?;
  let target = args
    .issue
    .as_deref()
    .map(|arg| {
      parse_issue_number_argument(arg, args.backend.kind())
        .ok_or_else(|| ClError::invalid_input("invalid codereview url or CL id"))
    })
    .transpose()?;

  let backend = args.backend.kind().or_else(|| target.as_ref().and_then(|t| t.backend));
  let branchref = current_branch_ref(ctx.vcs())?;
  let cl = Changelist::new(Arc::clone(&ctx), branchref, target.map(|t| t.issue), backend)?;
  if cl.issue()?.is_none() {
    return Err(ClError::precondition("This branch has no associated changelist.").into());
  }

  let current = cl.description(false)?;
  let mut description = ChangeDescription::new(&current);
  if args.display {
    println!("{}", description.description());
    return Ok(0);
  }

  match args.new_description.as_deref() {
    Some("-") => {
      let mut text = String::new();
      io::stdin().read_to_string(&mut text).context("Failed to read description from stdin")?;
      let text: Vec<&str> = text.lines().map(str::trim_end).collect();
      description.set_description(&text.join("\n"));
    }
    Some("+") => description.set_description(&local_description(&ctx, &cl)?),
    Some(text) => description.set_description(text),
    None => {
      let editor = ExternalEditor::resolve(ctx.settings().git_editor());
      description.prompt(None, ctx.settings().bug_prefix(), &editor)?;
    }
  }

  if description.description() == current {
    info!("Description unchanged, not updating");
  } else {
    cl.update_description(&description.description(), args.force)?;
  }
  Ok(0)
}

/// Commit log of the branch since it left its upstream.
fn local_description(ctx: &ClContext, cl: &Changelist) -> Result<String> {
  let branch = cl.require_branch()?;
  let upstream = cl.upstream_branch()?;
  let base = get_or_create_merge_base(ctx, branch, &upstream)?;
  create_description_from_log(ctx.vcs(), &[base])
}
