//! # Config Command
//!
//! Loads review settings into git config, either interactively, from a
//! `codereview.settings` URL, or by toggling automatic updates.

use anyhow::{Context, Result};
use clap::Args;
use cl_core::consts::{CODEREVIEW_SETTINGS_FILE, DEFAULT_SERVER};
use cl_core::prompts::ask;
use cl_core::settings::{apply_codereview_settings, parse_codereview_settings, upgrade_to_https};
use cl_core::{GitCli, Settings, Vcs, print_success};
use tracing::debug;

#[derive(Args)]
pub struct ConfigArgs {
  /// URL of a codereview.settings file, or of the directory holding it
  #[arg(value_name = "URL", conflicts_with_all = ["activate_update", "deactivate_update"])]
  pub url: Option<String>,

  /// Refresh settings from codereview.settings on every invocation
  #[arg(long, conflicts_with = "deactivate_update")]
  pub activate_update: bool,

  /// Stop refreshing settings from codereview.settings
  #[arg(long)]
  pub deactivate_update: bool,
}

/// Where to fetch the settings file from for a user-supplied location.
pub fn settings_url(location: &str) -> String {
  if location.ends_with(CODEREVIEW_SETTINGS_FILE) {
    location.to_string()
  } else {
    format!("{}/{CODEREVIEW_SETTINGS_FILE}", location.trim_end_matches('/'))
  }
}

pub(crate) fn handle_config_command(args: ConfigArgs) -> Result<i32> {
  // Read git config directly; the automatic refresh is what this command manages.
  let cwd = std::env::current_dir().context("Failed to read the working directory")?;
  let vcs = GitCli::discover(&cwd)?;
  if args.deactivate_update {
    vcs.run(&["config", "rietveld.autoupdate", "false"])?;
    return Ok(0);
  }
  if args.activate_update {
    vcs.run_with_code(&["config", "--unset", "rietveld.autoupdate"])?;
    return Ok(0);
  }

  match args.url {
    Some(location) => load_from_url(&vcs, &settings_url(&location))?,
    None => load_interactively(&vcs)?,
  }
  Ok(0)
}

fn load_from_url(vcs: &dyn Vcs, url: &str) -> Result<()> {
  debug!("Fetching review settings from {url}");
  let content = reqwest::blocking::get(url)
    .and_then(reqwest::blocking::Response::error_for_status)
    .and_then(reqwest::blocking::Response::text)
    .with_context(|| format!("Failed to fetch {url}"))?;
  let keyvals = parse_codereview_settings(&content)?;
  apply_codereview_settings(vcs, &keyvals)?;
  print_success(&format!("Applied review settings from {url}"));
  Ok(())
}

fn load_interactively(vcs: &dyn Vcs) -> Result<()> {
  let settings = Settings::load(vcs)?;

  let server = settings.get("rietveld.server");
  let answer = ask(
    &format!("Rietveld server (host[:port]) [{}]", server.unwrap_or(DEFAULT_SERVER)),
    None,
  )?;
  let new_server = match answer.trim() {
    "" if server.is_none() => Some(DEFAULT_SERVER.to_string()),
    "" => None,
    other => Some(upgrade_to_https(other)),
  };
  if let Some(new_server) = new_server
    && Some(new_server.as_str()) != server
  {
    vcs.run(&["config", "rietveld.server", &new_server])?;
  }

  let properties = [
    ("CC list", "cc", false),
    ("Private flag (rietveld only)", "private", false),
    ("Tree status URL", "tree-status-url", false),
    ("ViewVC URL", "viewvc-url", true),
    ("Bug Prefix", "bug-prefix", false),
    ("Run Post Upload Hook", "run-post-upload-hook", false),
  ];
  for (caption, name, is_url) in properties {
    let key = format!("rietveld.{name}");
    let initial = settings.get(&key).filter(|v| !v.is_empty());
    let prompt = match initial {
      Some(initial) => format!("{caption} (\"x\" to clear) [{initial}]"),
      None => caption.to_string(),
    };
    match ask(&prompt, None)?.trim() {
      "" => {}
      "x" => {
        vcs.run_with_code(&["config", "--unset-all", &key])?;
      }
      value => {
        let value = if is_url { upgrade_to_https(value) } else { value.to_string() };
        if Some(value.as_str()) != initial {
          vcs.run(&["config", &key, &value])?;
        }
      }
    }
  }
  Ok(())
}
