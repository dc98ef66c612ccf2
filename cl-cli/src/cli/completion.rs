//! # Completion Command

use anyhow::Result;
use clap::Args;
use clap_complete::Shell;

use crate::completion::generate_completions;

#[derive(Args)]
pub struct CompletionArgs {
  /// Shell to generate completions for
  #[arg(value_enum)]
  pub shell: Shell,
}

pub(crate) fn handle_completion_command(args: CompletionArgs) -> Result<i32> {
  generate_completions(args.shell)?;
  Ok(0)
}
