//! # Shell Completion
//!
//! Completion scripts for the `git-cl` binary.

use std::io;

use anyhow::Result;
use clap::CommandFactory;
use clap_complete::{Shell, generate};

use crate::cli::Cli;

/// Write the completion script for `shell` to stdout.
pub fn generate_completions(shell: Shell) -> Result<()> {
  generate_completions_to(shell, &mut io::stdout())
}

pub fn generate_completions_to(shell: Shell, out: &mut dyn io::Write) -> Result<()> {
  let mut cmd = Cli::command();
  let app_name = cmd.get_name().to_string();
  generate(shell, &mut cmd, app_name, out);
  Ok(())
}
