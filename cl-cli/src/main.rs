//! # git-cl Entry Point
//!
//! Parses the command line, sets up tracing and turns the command outcome
//! into a process exit code.

use std::process::ExitCode;

use cl_cli::cli::{self, Cli};
use cl_cli::consts::version_info;
use cl_core::error::is_user_abort;
use cl_core::{ClError, print_error};
use clap::Parser;
use tracing::debug;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

fn main() -> ExitCode {
  let cmd = Cli::parse();

  let level = match cmd.verbose {
    0 => tracing::Level::WARN,  // Default: warnings and errors
    1 => tracing::Level::INFO,  // -v: info, warnings, and errors
    2 => tracing::Level::DEBUG, // -vv: debug, info, warnings, and errors
    _ => tracing::Level::TRACE, // -vvv or more: trace and everything else
  };

  tracing_subscriber::registry()
    .with(fmt::layer().with_writer(std::io::stderr))
    .with(EnvFilter::from_default_env().add_directive(level.into()))
    .init();

  debug!("Tracing initialized with level: {}", level);
  debug!("git-cl {}", version_info());

  match cli::handle_cli(cmd) {
    Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
    Err(err) if is_user_abort(&err) => ExitCode::from(1),
    Err(err) => {
      let code = err.downcast_ref::<ClError>().map_or(1, ClError::exit_code);
      print_error(&format!("{err:#}"));
      ExitCode::from(u8::try_from(code).unwrap_or(1))
    }
  }
}
