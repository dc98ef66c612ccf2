//! # Sequential Numbering Detection
//!
//! Some remotes give every landed commit a position footer and stage pushes
//! through a pending ref. Both facts are read from special refs of the
//! remote: `refs/meta/config` (the numbering validator's ref globs) and
//! `refs/gnumbd-config/main` (the pending ref prefix).

use anyhow::Result;
use cl_core::{Settings, Vcs};
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use crate::consts::GIT_NUMBERER_PROJECTS;

const LOCAL_META_CONFIG: &str = "refs/git_cl/meta/config";
const LOCAL_GNUMBD_CONFIG: &str = "refs/git_cl/gnumbd-config/main";

/// Numbering requirements for pushes to one remote ref.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GitNumbererState {
  /// Prefix of the pending ref to stage pushes through, like
  /// `refs/pending/`.
  pub pending_prefix: Option<String>,
  /// Whether landed commits need position footers added locally.
  pub should_add_git_number: bool,
}

#[derive(Debug, Deserialize)]
struct GnumbdConfig {
  #[serde(default)]
  enabled_refglobs: Vec<String>,
  pending_ref_prefix: Option<String>,
}

impl GitNumbererState {
  /// Figure out the state for pushing to `remote_ref` of `remote_url`,
  /// fetching the config refs for known projects only.
  pub fn load(vcs: &dyn Vcs, settings: &Settings, remote_url: &str, remote_ref: &str) -> Result<Self> {
    let fallback = || Self {
      pending_prefix: settings.pending_ref_prefix().map(str::to_string),
      should_add_git_number: false,
    };
    if !is_known_project(remote_url) {
      debug!("{remote_url} does not use sequential numbering");
      return Ok(fallback());
    }

    let (code, output) = vcs.run_with_code(&[
      "fetch",
      remote_url,
      &format!("+refs/meta/config:{LOCAL_META_CONFIG}"),
      &format!("+refs/gnumbd-config/main:{LOCAL_GNUMBD_CONFIG}"),
    ])?;
    if code != 0 {
      warn!("Failed to fetch gnumbd and project config for {remote_url}: {}", output.trim());
      return Ok(fallback());
    }

    Ok(Self {
      pending_prefix: pending_prefix(vcs, settings, remote_ref)?,
      should_add_git_number: is_validator_enabled(vcs, remote_ref)?,
    })
  }
}

fn is_known_project(remote_url: &str) -> bool {
  let path = Url::parse(remote_url).map_or_else(|_parse_error| remote_url.to_string(), |url| url.path().to_string());
  let project = path
    .trim_start_matches('/')
    .trim_end_matches(|c| matches!(c, 'g' | 'i' | 't' | '.' | '/'));
  GIT_NUMBERER_PROJECTS.iter().any(|known| project.ends_with(known))
}

fn pending_prefix(vcs: &dyn Vcs, settings: &Settings, remote_ref: &str) -> Result<Option<String>> {
  let fallback = settings.pending_ref_prefix().map(str::to_string);
  let Some(data) = vcs.run_ok(&["show", &format!("{LOCAL_GNUMBD_CONFIG}:config.json")])? else {
    warn!("gnumbd config file not found");
    return Ok(fallback);
  };
  match serde_json::from_str::<GnumbdConfig>(&data) {
    Ok(config) if match_refglobs(remote_ref, &config.enabled_refglobs) => Ok(config.pending_ref_prefix),
    Ok(_) => Ok(None),
    Err(err) => {
      warn!("Failed to parse gnumbd config: {err}");
      Ok(fallback)
    }
  }
}

fn is_validator_enabled(vcs: &dyn Vcs, remote_ref: &str) -> Result<bool> {
  let blob = format!("{LOCAL_META_CONFIG}:project.config");
  let Some(listing) = vcs.run_ok(&["config", "--blob", &blob, "--list"])? else {
    warn!("project.config file not found");
    return Ok(false);
  };
  let values = |key: &str| -> Vec<String> {
    listing
      .lines()
      .filter_map(|line| line.split_once('='))
      .filter(|(k, _)| *k == key)
      .map(|(_, v)| v.to_string())
      .collect()
  };
  let enabled = values("plugin.git-numberer.validate-enabled-refglob");
  let disabled = values("plugin.git-numberer.validate-disabled-refglob");
  Ok(match_refglobs(remote_ref, &enabled) && !match_refglobs(remote_ref, &disabled))
}

/// Whether `git_ref` equals or matches any of the shell-style `globs`.
pub fn match_refglobs(git_ref: &str, globs: &[String]) -> bool {
  globs
    .iter()
    .any(|glob| glob == git_ref || glob_to_regex(glob).is_some_and(|re| re.is_match(git_ref)))
}

fn glob_to_regex(glob: &str) -> Option<Regex> {
  let mut pattern = String::from("^");
  let mut chars = glob.chars().peekable();
  while let Some(c) = chars.next() {
    match c {
      '*' => pattern.push_str(".*"),
      '?' => pattern.push('.'),
      '[' => {
        let mut class = String::new();
        let mut closed = false;
        for next in chars.by_ref() {
          if next == ']' {
            closed = true;
            break;
          }
          class.push(next);
        }
        if !closed {
          pattern.push_str(r"\[");
          pattern.push_str(&regex::escape(&class));
          continue;
        }
        pattern.push('[');
        match class.strip_prefix('!') {
          Some(negated) => {
            pattern.push('^');
            pattern.push_str(&negated.replace('\\', r"\\"));
          }
          None => pattern.push_str(&class.replace('\\', r"\\")),
        }
        pattern.push(']');
      }
      other => pattern.push_str(&regex::escape(&other.to_string())),
    }
  }
  pattern.push('$');
  Regex::new(&pattern).ok()
}
